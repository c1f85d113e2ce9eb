use chimp_sync::configuration::CleanupSettings;
use chimp_sync::configuration::ListSettings;
use chimp_sync::configuration::MailchimpSettings;
use chimp_sync::configuration::Settings;
use chimp_sync::configuration::SyncSettings;
use chimp_sync::domain::SubscriberEmail;
use chimp_sync::domain::SubscriberName;
use chimp_sync::mailchimp::ListApiClient;
use chimp_sync::store::SubscriberStore;
use chimp_sync::subscriber::Subscriber;
use chimp_sync::telemetry::get_subscriber;
use chimp_sync::telemetry::init_subscriber;
use once_cell::sync::Lazy;
use secrecy::Secret;
use serde_json::json;
use wiremock::matchers::method;
use wiremock::matchers::path;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;

/// To opt in to verbose logging, use the env var `TEST_LOG`:
///
/// ```sh
///      TEST_LOG=true cargo test [test_name] | bunyan
/// ```
static TRACING: Lazy<()> = Lazy::new(|| {
    match std::env::var("TEST_LOG") {
        Ok(_) => {
            let subscriber = get_subscriber("test", "debug", std::io::stdout);
            init_subscriber(subscriber);
        }
        Err(_) => {
            let subscriber = get_subscriber("test", "debug", std::io::sink);
            init_subscriber(subscriber);
        }
    };
});

pub const LIST_ID: &str = "9e67587f52";

/// A store, a client and a wiremock server standing in for the list API
pub struct TestApp {
    pub api_server: MockServer,
    pub store: SubscriberStore,
    pub cfg: Settings,
    pub client: ListApiClient,
}

pub async fn spawn_app() -> TestApp {
    Lazy::force(&TRACING);

    let api_server = MockServer::start().await;
    let cfg = Settings {
        mailchimp: MailchimpSettings {
            api_key: Secret::new("testkey-us6".to_string()),
            base_url: api_server.uri(),
            timeout_milliseconds: 2000,
            retry_limit: 0,
            retry_backoff_milliseconds: 50,
        },
        sync: SyncSettings {
            enabled: true,
            batch_limit: 100,
            run_interval_seconds: 60,
            obfuscation_chr: "\u{2022}".to_string(),
            default_list_id: LIST_ID.to_string(),
        },
        cleanup: CleanupSettings {
            run_interval_minutes: 30,
            prune_after_minutes: 30,
            prune_limit: 0,
            report_only: false,
        },
        lists: vec![ListSettings {
            code: "newsletter".to_string(),
            list_id: LIST_ID.to_string(),
            double_opt_in: true,
            remove_stale_tags: false,
            tags: Vec::new(),
        }],
    };
    let client = cfg.mailchimp.client().expect("api key is configured");

    TestApp {
        api_server,
        store: SubscriberStore::new(),
        cfg,
        client,
    }
}

pub fn hash_of(email: &str) -> String {
    SubscriberEmail::parse(email.to_string())
        .unwrap()
        .member_hash()
}

/// A member payload as the API returns it on a successful create/update
pub fn member_body(
    email: &str,
    status: &str,
) -> serde_json::Value {
    json!({
        "id": hash_of(email),
        "unique_email_id": "882e9bat0c",
        "web_id": 145_956_022,
        "email_address": email,
        "status": status,
    })
}

impl TestApp {
    pub fn list(&self) -> ListSettings { self.cfg.list_settings(LIST_ID) }

    pub fn subscriber(
        &self,
        name: &str,
        email: &str,
    ) -> Subscriber {
        Subscriber::new(
            SubscriberName::parse(name.to_string()).unwrap(),
            SubscriberEmail::parse(email.to_string()).unwrap(),
            LIST_ID.to_string(),
        )
    }

    pub async fn mock_member_missing(
        &self,
        email: &str,
    ) {
        Mock::given(method("GET"))
            .and(path(format!("/lists/{LIST_ID}/members/{}", hash_of(email))))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "status": 404,
                "title": "Resource Not Found",
            })))
            .expect(1)
            .mount(&self.api_server)
            .await;
    }

    pub async fn mock_member_found(
        &self,
        email: &str,
        status: &str,
    ) {
        Mock::given(method("GET"))
            .and(path(format!("/lists/{LIST_ID}/members/{}", hash_of(email))))
            .respond_with(ResponseTemplate::new(200).set_body_json(member_body(email, status)))
            .expect(1)
            .mount(&self.api_server)
            .await;
    }

    pub async fn mock_create(
        &self,
        email: &str,
    ) {
        Mock::given(method("POST"))
            .and(path(format!("/lists/{LIST_ID}/members")))
            .respond_with(ResponseTemplate::new(200).set_body_json(member_body(email, "pending")))
            .expect(1)
            .mount(&self.api_server)
            .await;
    }

    pub async fn mock_update(
        &self,
        email: &str,
        status: &str,
    ) {
        Mock::given(method("PATCH"))
            .and(path(format!("/lists/{LIST_ID}/members/{}", hash_of(email))))
            .respond_with(ResponseTemplate::new(200).set_body_json(member_body(email, status)))
            .expect(1)
            .mount(&self.api_server)
            .await;
    }

    pub async fn mock_member_tags(
        &self,
        email: &str,
        tags: &[&str],
    ) {
        let tag_list: Vec<_> = tags
            .iter()
            .enumerate()
            .map(|(id, name)| json!({"id": id, "name": name}))
            .collect();
        Mock::given(method("GET"))
            .and(path(format!(
                "/lists/{LIST_ID}/members/{}/tags",
                hash_of(email)
            )))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "tags": tag_list,
                "total_items": tags.len(),
            })))
            .expect(1)
            .mount(&self.api_server)
            .await;
    }

    pub async fn mock_tag_update(
        &self,
        email: &str,
    ) {
        Mock::given(method("POST"))
            .and(path(format!(
                "/lists/{LIST_ID}/members/{}/tags",
                hash_of(email)
            )))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&self.api_server)
            .await;
    }

    /// Bodies of the requests made with `method` to `path`, in order
    pub async fn requests_to(
        &self,
        method: &str,
        request_path: &str,
    ) -> Vec<serde_json::Value> {
        self.api_server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|r| r.method.to_string() == method && r.url.path() == request_path)
            .map(|r| serde_json::from_slice(&r.body).unwrap())
            .collect()
    }
}
