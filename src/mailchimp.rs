use std::collections::BTreeMap;
use std::fmt::Debug;
use std::time::Duration;

use reqwest::Client;
use reqwest::Method;
use reqwest::RequestBuilder;
use reqwest::Response;
use reqwest::StatusCode;
use secrecy::ExposeSecret;
use secrecy::Secret;
use serde::Deserialize;
use serde::Serialize;

use crate::error_chain_fmt;

/// Member status for new list members when the list requires double opt-in;
/// the provider sends the confirmation email
pub const MEMBER_PENDING: &str = "pending";
/// Member status for new list members on single opt-in lists
pub const MEMBER_SUBSCRIBED: &str = "subscribed";

pub const EMAIL_TYPE_HTML: &str = "html";
pub const EMAIL_TYPE_TEXT: &str = "text";

/// Tags per page when listing a member's tags
const TAG_PAGE_SIZE: u64 = 10;

/// A list member, as returned by the list-members endpoints. Only the fields
/// the sync cares about are deserialized; a missing `unique_email_id` (the
/// success identifier) comes through as an empty string.
#[derive(Deserialize, Debug, Clone)]
pub struct Member {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub unique_email_id: String,
    #[serde(default)]
    pub web_id: Option<i64>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub email_address: String,
}

/// Payload for member create (POST) and update (PATCH) calls
#[derive(Serialize, Debug, Clone)]
pub struct MemberUpsert {
    pub email_address: String,
    pub email_type: String,
    pub merge_fields: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Initial tag set; only accepted on create
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TagUpdate {
    pub name: String,
    pub status: TagStatus,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TagStatus {
    /// Attached to the member; submitting an unknown tag as active makes the
    /// remote create it
    Active,
    /// Detached from the member
    Inactive,
    /// Local bookkeeping only (tags observed on, or submitted with, the
    /// member record); never sent to the tag endpoint
    Current,
}

#[derive(Deserialize)]
struct TagPage {
    #[serde(default)]
    tags: Vec<MemberTag>,
    #[serde(default)]
    total_items: u64,
}

#[derive(Deserialize)]
struct MemberTag {
    name: String,
}

/// Problem document returned by the API on rejection
#[derive(Deserialize, Default)]
struct Problem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    detail: String,
}

#[derive(thiserror::Error)]
pub enum ApiError {
    /// The API rejected the call; summarized as `status|title|detail`, which
    /// is what ends up in a failed record's `last_error`
    #[error("{status}|{title}|{detail}")]
    Remote {
        status: u16,
        title: String,
        detail: String,
    },

    #[error("request to the list API failed")]
    Transport(#[from] reqwest::Error),
}

impl Debug for ApiError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

/// Client for the list-member and member-tag endpoints.
///
/// A single instance should be built at startup (see
/// `MailchimpSettings::client`) and passed to whatever drives the sync;
/// `reqwest::Client` keeps a connection pool, so rebuilding per call throws
/// the pooling away.
#[derive(Debug)]
pub struct ListApiClient {
    http_client: Client,
    base_url: String,
    api_key: Secret<String>,
    retry_limit: u32,
    retry_backoff: Duration,
}

impl ListApiClient {
    pub fn new(
        base_url: String,
        api_key: Secret<String>,
        timeout: Duration,
        retry_limit: u32,
        retry_backoff: Duration,
    ) -> Self {
        Self {
            http_client: Client::builder()
                .timeout(timeout)
                .build()
                .expect("could not build HTTP client"),
            base_url,
            api_key,
            retry_limit,
            retry_backoff,
        }
    }

    /// Fetch the member addressed by `member_hash`, `None` if the list has no
    /// such member
    #[tracing::instrument(skip(self))]
    pub async fn get_member(
        &self,
        list_id: &str,
        member_hash: &str,
    ) -> Result<Option<Member>, ApiError> {
        let url = format!("{}/lists/{list_id}/members/{member_hash}", self.base_url);
        let resp = self.send_with_retry(self.request(Method::GET, &url)).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let member: Member = reject_errors(resp).await?.json().await?;
        // an existing member echoes an id equal to the hash; anything else is
        // not a match for this address
        Ok((member.id == member_hash).then_some(member))
    }

    #[tracing::instrument(skip(self, member), fields(email = %member.email_address))]
    pub async fn create_member(
        &self,
        list_id: &str,
        member: &MemberUpsert,
    ) -> Result<Member, ApiError> {
        let url = format!("{}/lists/{list_id}/members", self.base_url);
        let resp = self
            .send_with_retry(self.request(Method::POST, &url).json(member))
            .await?;
        Ok(reject_errors(resp).await?.json().await?)
    }

    #[tracing::instrument(skip(self, member))]
    pub async fn update_member(
        &self,
        list_id: &str,
        member_hash: &str,
        member: &MemberUpsert,
    ) -> Result<Member, ApiError> {
        let url = format!("{}/lists/{list_id}/members/{member_hash}", self.base_url);
        let resp = self
            .send_with_retry(self.request(Method::PATCH, &url).json(member))
            .await?;
        Ok(reject_errors(resp).await?.json().await?)
    }

    /// All tag names currently on a member, fetched page by page until
    /// `total_items` is covered
    #[tracing::instrument(skip(self))]
    pub async fn member_tags(
        &self,
        list_id: &str,
        member_hash: &str,
    ) -> Result<Vec<String>, ApiError> {
        let url = format!(
            "{}/lists/{list_id}/members/{member_hash}/tags",
            self.base_url
        );
        let mut names: Vec<String> = Vec::new();
        let mut offset = 0;
        loop {
            let resp = self
                .send_with_retry(
                    self.request(Method::GET, &url)
                        .query(&[("count", TAG_PAGE_SIZE), ("offset", offset)]),
                )
                .await?;
            let page: TagPage = reject_errors(resp).await?.json().await?;
            // a short page means the remote has nothing more to give, whatever
            // total_items claims
            let exhausted = (page.tags.len() as u64) < TAG_PAGE_SIZE;
            names.extend(page.tags.into_iter().map(|t| t.name));
            if exhausted || names.len() as u64 >= page.total_items {
                return Ok(names);
            }
            offset += TAG_PAGE_SIZE;
        }
    }

    /// Submit a combined list of tag status changes in one call
    #[tracing::instrument(skip(self, updates), fields(n_updates = updates.len()))]
    pub async fn update_member_tags(
        &self,
        list_id: &str,
        member_hash: &str,
        updates: &[TagUpdate],
    ) -> Result<(), ApiError> {
        #[derive(Serialize)]
        struct Payload<'a> {
            tags: &'a [TagUpdate],
        }

        let url = format!(
            "{}/lists/{list_id}/members/{member_hash}/tags",
            self.base_url
        );
        let resp = self
            .send_with_retry(
                self.request(Method::POST, &url)
                    .json(&Payload { tags: updates }),
            )
            .await?;
        reject_errors(resp).await?;
        Ok(())
    }

    fn request(
        &self,
        method: Method,
        url: &str,
    ) -> RequestBuilder {
        // HTTP basic auth; the key is the credential, the username is ignored
        // by the provider
        self.http_client
            .request(method, url)
            .basic_auth("apikey", Some(self.api_key.expose_secret()))
    }

    /// Send a request, re-sending after a 5xx or timeout with a doubling
    /// backoff, up to `retry_limit` retries. 4xx responses are returned
    /// untouched: they describe the payload, and re-sending the same payload
    /// cannot succeed.
    async fn send_with_retry(
        &self,
        request: RequestBuilder,
    ) -> Result<Response, ApiError> {
        let mut attempt = 0;
        loop {
            // never fails here: no request in this client carries a streaming
            // body
            let req = request.try_clone().expect("request must be cloneable");
            let result = req.send().await;
            let retryable = match &result {
                Ok(resp) => resp.status().is_server_error(),
                Err(e) => e.is_timeout() || e.is_connect(),
            };
            if !retryable || attempt >= self.retry_limit {
                return Ok(result?);
            }
            let backoff = self.retry_backoff * 2u32.pow(attempt);
            tracing::warn!(attempt, "list API request failed, retrying in {backoff:?}");
            tokio::time::sleep(backoff).await;
            attempt += 1;
        }
    }
}

/// Map a non-2xx response to `ApiError::Remote`
async fn reject_errors(resp: Response) -> Result<Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let problem: Problem = resp.json().await.unwrap_or_default();
    let title = match problem.title.is_empty() {
        false => problem.title,
        true => status.canonical_reason().unwrap_or_default().to_string(),
    };
    Err(ApiError::Remote {
        status: status.as_u16(),
        title,
        detail: problem.detail,
    })
}
