use std::collections::BTreeMap;
use std::fmt::Display;

use chrono::DateTime;
use chrono::Utc;
use uuid::Uuid;

use crate::configuration::ListSettings;
use crate::domain::SubscriberEmail;
use crate::domain::SubscriberName;
use crate::mailchimp::Member;
use crate::mailchimp::MemberUpsert;
use crate::mailchimp::TagStatus;
use crate::mailchimp::TagUpdate;
use crate::mailchimp::EMAIL_TYPE_HTML;

/// Where a record sits in the subscription queue.
///
/// Transition table: `New -> Processing -> {Success, Fail}`. `Fail` (and a
/// stuck `Processing`, e.g. after a crashed batch run) can be reset to `New`
/// for another attempt; that reset is always an external decision, never made
/// by the sync itself.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum SyncStatus {
    New,
    Processing,
    Success,
    Fail,
}

impl SyncStatus {
    pub fn can_transition_to(
        self,
        next: SyncStatus,
    ) -> bool {
        matches!(
            (self, next),
            (SyncStatus::New, SyncStatus::Processing)
                | (SyncStatus::Processing, SyncStatus::Success)
                | (SyncStatus::Processing, SyncStatus::Fail)
                | (SyncStatus::Processing, SyncStatus::New)
                | (SyncStatus::Fail, SyncStatus::New)
        )
    }
}

impl Display for SyncStatus {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                SyncStatus::New => "NEW",
                SyncStatus::Processing => "PROCESSING",
                SyncStatus::Success => "SUCCESS",
                SyncStatus::Fail => "FAIL",
            }
        )
    }
}

/// Rejected status change; the record is left untouched
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("cannot move subscriber from {from} to {to}")]
pub struct InvalidTransition {
    pub from: SyncStatus,
    pub to: SyncStatus,
}

/// A queued subscription attempt.
///
/// PII fields (`email`, `name`, `surname`) hold real values only while the
/// record is unsynced; after a confirmed sync they are obfuscated, and the
/// canonical member hash survives in `member_id`.
#[derive(Clone, Debug)]
pub struct Subscriber {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub name: String,
    pub surname: String,
    pub email: String,

    /// Remote list (audience) id; empty means "use the configured default"
    pub list_id: String,

    /// Subscriber meta submitted as merge fields, e.g. `{"PHONE": "..."}`
    pub merge_fields: BTreeMap<String, String>,

    /// Tags this subscriber should end up with
    pub tags: Vec<String>,

    pub status: SyncStatus,
    pub last_error: String,

    /// Identifier for the address across the whole provider account
    pub unique_email_id: String,
    /// Id of the member's profile page in the provider UI
    pub web_id: String,
    /// The MD5 hash of the lowercase version of the list member's email
    /// address
    pub member_id: String,

    tag_delta: Vec<TagUpdate>,
}

impl Subscriber {
    /// A fresh record enters the queue as `New`. A missing surname is split
    /// off the name's first space, since subscribe forms commonly submit a
    /// single full-name field.
    pub fn new(
        name: SubscriberName,
        email: SubscriberEmail,
        list_id: String,
    ) -> Self {
        let (name, surname) = split_surname(name.as_ref());
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            name,
            surname,
            email: email.as_ref().to_string(),
            list_id,
            merge_fields: BTreeMap::new(),
            tags: Vec::new(),
            status: SyncStatus::New,
            last_error: String::new(),
            unique_email_id: String::new(),
            web_id: String::new(),
            member_id: String::new(),
            tag_delta: Vec::new(),
        }
    }

    pub fn begin_processing(&mut self) -> Result<(), InvalidTransition> {
        self.transition(SyncStatus::Processing)
    }

    /// External reset: re-queue a failed (or stuck-processing) record for
    /// another attempt
    pub fn reset(&mut self) -> Result<(), InvalidTransition> {
        self.transition(SyncStatus::New)
    }

    fn transition(
        &mut self,
        to: SyncStatus,
    ) -> Result<(), InvalidTransition> {
        match self.status.can_transition_to(to) {
            true => {
                self.status = to;
                Ok(())
            }
            false => Err(InvalidTransition {
                from: self.status,
                to,
            }),
        }
    }

    pub fn successful(&self) -> bool { self.status == SyncStatus::Success }

    pub fn has_last_error(&self) -> bool { !self.last_error.trim().is_empty() }

    /// Canonical member hash for addressing remote operations: the captured
    /// remote id when present (it survives obfuscation), otherwise derived
    /// from the email address.
    pub fn member_hash(&self) -> Result<String, String> {
        if !self.member_id.is_empty() {
            return Ok(self.member_id.clone());
        }
        SubscriberEmail::parse(self.email.clone()).map(|email| email.member_hash())
    }

    /// The record's own tags followed by the list configuration's defaults,
    /// first occurrence wins
    pub fn desired_tags(
        &self,
        list: &ListSettings,
    ) -> Vec<String> {
        let mut tags = self.tags.clone();
        for tag in &list.tags {
            if !tags.contains(tag) {
                tags.push(tag.clone());
            }
        }
        tags
    }

    /// Payload for the member create/update endpoints. The caller decides the
    /// member status (opt-in policy on create, remote passthrough on update).
    pub fn subscribe_record(&self) -> MemberUpsert {
        MemberUpsert {
            email_address: self.email.clone(),
            email_type: EMAIL_TYPE_HTML.to_string(),
            merge_fields: self.merge_field_payload(),
            status: None,
            tags: None,
        }
    }

    /// Merge fields sent with the member payload: record meta first
    /// (uppercased keys; empty values are skipped, the remote rejects them
    /// with "The resource submitted could not be validated"), then the name
    /// fields, which win on collision.
    fn merge_field_payload(&self) -> BTreeMap<String, String> {
        let mut fields = BTreeMap::new();
        for (k, v) in &self.merge_fields {
            let key = k.trim().to_uppercase();
            let value = v.trim();
            if key.is_empty() || value.is_empty() {
                continue;
            }
            fields.insert(key, value.to_string());
        }
        for (tag, value) in [("FNAME", &self.name), ("LNAME", &self.surname)] {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            fields.insert(tag.to_string(), value.to_string());
        }
        fields
    }

    /// Changes made to the member's tags in the last subscribe attempt,
    /// optionally filtered by status. For inspection and diagnostics; reset
    /// at the start of every attempt.
    pub fn tag_delta(
        &self,
        status: Option<TagStatus>,
    ) -> Vec<TagUpdate> {
        self.tag_delta
            .iter()
            .filter(|t| status.is_none_or(|s| t.status == s))
            .cloned()
            .collect()
    }

    pub(crate) fn record_tag_delta(
        &mut self,
        delta: Vec<TagUpdate>,
    ) {
        self.tag_delta = delta;
    }

    pub(crate) fn clear_tag_delta(&mut self) { self.tag_delta.clear(); }

    /// Confirmed remote upsert: capture identifiers, drop any previous error,
    /// obfuscate PII
    pub(crate) fn mark_synced(
        &mut self,
        member: &Member,
        obfuscation_chr: &str,
    ) {
        self.unique_email_id = member.unique_email_id.clone();
        self.web_id = member.web_id.map(|id| id.to_string()).unwrap_or_default();
        self.member_id = member.id.clone();
        self.last_error = String::new();
        self.email = obfuscate(&self.email, obfuscation_chr);
        self.name = obfuscate(&self.name, obfuscation_chr);
        self.surname = obfuscate(&self.surname, obfuscation_chr);
        self.status = SyncStatus::Success;
    }

    pub(crate) fn mark_failed(
        &mut self,
        error: String,
    ) {
        self.unique_email_id = String::new();
        self.web_id = String::new();
        self.member_id = String::new();
        self.last_error = error;
        self.status = SyncStatus::Fail;
    }
}

fn split_surname(name: &str) -> (String, String) {
    match name.split_once(' ') {
        Some((first, rest)) if !rest.trim().is_empty() => {
            (first.to_string(), rest.trim().to_string())
        }
        _ => (name.to_string(), String::new()),
    }
}

/// Mask the middle of a value, keeping the first and last character. Values
/// of one or two characters are fully masked. An empty `chr` disables
/// obfuscation (e.g. when a project must keep plaintext records).
fn obfuscate(
    value: &str,
    chr: &str,
) -> String {
    if value.is_empty() || chr.is_empty() {
        return value.to_string();
    }
    let length = value.chars().count();
    if length <= 2 {
        return chr.repeat(length);
    }
    let first = value.chars().next().unwrap();
    let last = value.chars().next_back().unwrap();
    format!("{first}{}{last}", chr.repeat(length - 2))
}
