use std::env;
use std::env::current_dir;
use std::fmt::Display;
use std::time::Duration;

use config::Config;
use config::ConfigError;
use secrecy::ExposeSecret;
use secrecy::Secret;
use serde::Deserialize;
use serde_aux::field_attributes::deserialize_number_from_string;

use crate::mailchimp::ListApiClient;

/// Global configuration, loaded from configuration/*.yaml. See
/// `get_configuration`.
#[derive(Deserialize, Clone)]
pub struct Settings {
    pub mailchimp: MailchimpSettings,
    pub sync: SyncSettings,
    pub cleanup: CleanupSettings,
    /// Per-list subscribe configurations. A subscriber whose list id matches
    /// none of these is synced with the default (non-destructive) policy.
    #[serde(default)]
    pub lists: Vec<ListSettings>,
}

/// API access configuration
#[derive(Deserialize, Clone)]
pub struct MailchimpSettings {
    /// Key issued by the provider, in `<key>-<dc>` form. Supply via
    /// `APP_MAILCHIMP__API_KEY` rather than committing it to yaml.
    pub api_key: Secret<String>,

    /// Explicit API base URL. When empty, the URL is derived from the
    /// datacentre suffix of the api key. Tests point this at a mock server.
    #[serde(default)]
    pub base_url: String,

    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub timeout_milliseconds: u64,

    /// How many times a request is re-sent after a 5xx or timeout before
    /// giving up. 0 disables retries.
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub retry_limit: u32,

    /// Base sleep between retries; doubles with each attempt.
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub retry_backoff_milliseconds: u64,
}

impl MailchimpSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_milliseconds)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_milliseconds)
    }

    /// The datacentre (dc) component of the api key, e.g. `us2` for
    /// `xxxx-us2`. Empty if the key carries no suffix.
    pub fn datacentre(&self) -> String {
        self.api_key
            .expose_secret()
            .split_once('-')
            .map(|(_, dc)| dc.to_string())
            .unwrap_or_default()
    }

    /// Endpoint all list-member operations are made against.
    pub fn api_endpoint(&self) -> String {
        match self.base_url.is_empty() {
            false => self.base_url.clone(),
            true => format!("https://{}.api.mailchimp.com/3.0", self.datacentre()),
        }
    }

    /// Build the API client. An unset api key is a configuration error; no
    /// request should ever be attempted without one.
    pub fn client(&self) -> Result<ListApiClient, ConfigError> {
        if self.api_key.expose_secret().is_empty() {
            return Err(ConfigError::Message(
                "no Mailchimp API key configured".to_string(),
            ));
        }
        Ok(ListApiClient::new(
            self.api_endpoint(),
            self.api_key.clone(),
            self.timeout(),
            self.retry_limit,
            self.retry_backoff(),
        ))
    }
}

/// Batch subscription policy
#[derive(Deserialize, Clone)]
pub struct SyncSettings {
    /// Site-wide switch; when off, the worker idles without touching records
    /// or the remote API.
    pub enabled: bool,

    /// Max subscribers picked up per batch run
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub batch_limit: usize,

    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub run_interval_seconds: u64,

    /// Character used to mask PII after a successful sync. An empty value
    /// disables obfuscation entirely.
    #[serde(default = "default_obfuscation_chr")]
    pub obfuscation_chr: String,

    /// List (audience) id used for records that carry none of their own
    pub default_list_id: String,
}

fn default_obfuscation_chr() -> String {
    "\u{2022}".to_string()
}

impl SyncSettings {
    /// Time between batch runs, floored at 30s
    pub fn run_interval(&self) -> Duration {
        Duration::from_secs(self.run_interval_seconds.max(30))
    }
}

/// Record-pruning policy. Synced records hold only obfuscated PII, but they
/// still accumulate; failed records are kept longer for triage.
#[derive(Deserialize, Clone)]
pub struct CleanupSettings {
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub run_interval_minutes: u64,

    /// Synced records older than this many minutes are deleted
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub prune_after_minutes: i64,

    /// Max deletions per status per run; 0 removes the bound
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub prune_limit: usize,

    /// Log what would be deleted without deleting
    #[serde(default)]
    pub report_only: bool,
}

impl CleanupSettings {
    /// Time between cleanup runs, floored at 2 minutes
    pub fn run_interval(&self) -> Duration {
        Duration::from_secs(self.run_interval_minutes.max(2) * 60)
    }
}

/// A local subscribe configuration mapped to a remote list (audience)
#[derive(Deserialize, Clone)]
pub struct ListSettings {
    /// Local identifier, e.g. used by the host to select a form config
    pub code: String,

    /// Remote list (audience) id
    pub list_id: String,

    /// New members enter the list as `pending` (confirmation email sent by
    /// the provider) rather than `subscribed`
    #[serde(default = "default_true")]
    pub double_opt_in: bool,

    /// When on, tags present remotely but absent from the subscriber's tag
    /// list are marked inactive during reconciliation. Destructive: this also
    /// strips tags that were assigned to the member by other means.
    #[serde(default)]
    pub remove_stale_tags: bool,

    /// Tags applied to every subscription made under this configuration
    #[serde(default)]
    pub tags: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl ListSettings {
    /// Fallback policy for list ids that have no configured entry
    pub fn defaults_for(list_id: &str) -> Self {
        Self {
            code: String::new(),
            list_id: list_id.to_string(),
            double_opt_in: true,
            remove_stale_tags: false,
            tags: Vec::new(),
        }
    }
}

impl Settings {
    pub fn list_by_code(
        &self,
        code: &str,
    ) -> Option<&ListSettings> {
        self.lists.iter().find(|l| l.code == code)
    }

    /// A record's own list id wins; records without one fall back to the
    /// configured default.
    pub fn resolve_list_id(
        &self,
        record_list_id: &str,
    ) -> String {
        match record_list_id.is_empty() {
            false => record_list_id.to_string(),
            true => self.sync.default_list_id.clone(),
        }
    }

    /// Per-list policy for a (resolved) list id
    pub fn list_settings(
        &self,
        list_id: &str,
    ) -> ListSettings {
        self.lists
            .iter()
            .find(|l| l.list_id == list_id)
            .cloned()
            .unwrap_or_else(|| ListSettings::defaults_for(list_id))
    }
}

pub enum Environment {
    Local,
    Production,
}

impl Display for Environment {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Environment::Local => "local",
                Environment::Production => "production",
            }
        )?;
        Ok(())
    }
}

impl TryFrom<String> for Environment {
    type Error = String;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            e => Err(format!("Invalid: {e}")),
        }
    }
}

/// Load yaml configuration files at `<project_root>/configuration`.
///
/// All fields without a serde default must be present in these files,
/// otherwise initialisation fails immediately and no worker starts.
pub fn get_configuration() -> Result<Settings, ConfigError> {
    let cfg_dir = current_dir()
        .expect("could not get current dir")
        .join("configuration");

    let env: Environment = env::var("APP_ENVIRONMENT")
        .unwrap_or("local".to_string())
        .try_into()
        .expect("could not initiate Environment struct");

    let settings = Config::builder()
        .add_source(config::File::from(cfg_dir.join("base.yaml")))
        .add_source(config::File::from(cfg_dir.join(format!("{env}.yaml"))))
        .add_source(
            // env vars are -always- parsed as String, `serde-aux` is required to parse other
            // types.
            //
            // `APP_MAILCHIMP__API_KEY=key-us2` -> `Settings.mailchimp.api_key`
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    settings.try_deserialize::<Settings>()
}
