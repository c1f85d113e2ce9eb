use std::collections::HashSet;
use std::fmt::Debug;

use crate::configuration::ListSettings;
use crate::configuration::SyncSettings;
use crate::domain::SubscriberEmail;
use crate::error_chain_fmt;
use crate::mailchimp::ApiError;
use crate::mailchimp::ListApiClient;
use crate::mailchimp::Member;
use crate::mailchimp::TagStatus;
use crate::mailchimp::TagUpdate;
use crate::mailchimp::MEMBER_PENDING;
use crate::mailchimp::MEMBER_SUBSCRIBED;
use crate::subscriber::Subscriber;
use crate::subscriber::SyncStatus;

#[derive(thiserror::Error)]
pub enum SyncError {
    // input/config errors: fail fast, the remote is never contacted
    #[error("{0}")]
    InvalidEmail(String),
    #[error("no list (audience) id configured")]
    MissingListId,

    #[error(transparent)]
    Api(#[from] ApiError),

    /// The call came back 2xx but without a `unique_email_id`; without it
    /// there is no proof the member exists remotely
    #[error("no success identifier returned for email: {0}")]
    MissingSuccessIdentifier(String),
}

impl Debug for SyncError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        error_chain_fmt(self, f)
    }
}

/// Sync one subscriber record to its remote list, mutating the record per
/// the outcome and returning the resulting status.
///
/// Success means: member created or updated remotely, tags reconciled (update
/// path), identifiers captured, PII obfuscated. Anything less marks the
/// record `Fail` with the summarized error; identifiers are cleared so a
/// half-recorded sync can't masquerade as a finished one. The routine never
/// retries a record on its own; a failed record re-enters the queue only via
/// an external `reset`.
#[tracing::instrument(
    name = "Syncing subscriber",
    skip_all,
    fields(
        subscriber_id = %subscriber.id,
        list_id = %list.list_id,
    )
)]
pub async fn subscribe(
    subscriber: &mut Subscriber,
    client: &ListApiClient,
    list: &ListSettings,
    sync_cfg: &SyncSettings,
) -> SyncStatus {
    // a record handed over directly (outside the batch driver) enters
    // processing here
    if subscriber.status == SyncStatus::New {
        let _ = subscriber.begin_processing();
    }

    match try_subscribe(subscriber, client, list).await {
        Ok(member) => {
            subscriber.mark_synced(&member, &sync_cfg.obfuscation_chr);
            tracing::info!("subscriber synced");
        }
        Err(e) => {
            tracing::warn!(
                error.cause_chain = ?e,
                "subscriber could not be synced"
            );
            subscriber.mark_failed(e.to_string());
        }
    }
    subscriber.status
}

async fn try_subscribe(
    subscriber: &mut Subscriber,
    client: &ListApiClient,
    list: &ListSettings,
) -> Result<Member, SyncError> {
    subscriber.clear_tag_delta();

    if list.list_id.is_empty() {
        return Err(SyncError::MissingListId);
    }
    let email =
        SubscriberEmail::parse(subscriber.email.clone()).map_err(SyncError::InvalidEmail)?;
    let member_hash = email.member_hash();
    let desired = subscriber.desired_tags(list);

    let existing = client.get_member(&list.list_id, &member_hash).await?;

    let member = match existing {
        None => {
            let mut record = subscriber.subscribe_record();
            record.tags = Some(desired.clone());
            // the opt-in policy decides whether the provider asks the address
            // for confirmation before listing it
            record.status = Some(
                match list.double_opt_in {
                    true => MEMBER_PENDING,
                    false => MEMBER_SUBSCRIBED,
                }
                .to_string(),
            );
            let member = client.create_member(&list.list_id, &record).await?;
            subscriber.record_tag_delta(
                desired
                    .into_iter()
                    .map(|name| TagUpdate {
                        name,
                        status: TagStatus::Current,
                    })
                    .collect(),
            );
            member
        }
        Some(current) => {
            let mut record = subscriber.subscribe_record();
            // never flip the member's own standing: an address that
            // unsubscribed itself stays unsubscribed
            record.status = Some(current.status.clone());
            let member = client
                .update_member(&list.list_id, &member_hash, &record)
                .await?;
            if member.unique_email_id.is_empty() {
                return Err(SyncError::MissingSuccessIdentifier(
                    subscriber.email.clone(),
                ));
            }
            // a tag failure fails the whole sync; the upsert above is
            // idempotent, so the external-reset retry path re-runs it safely
            let delta = reconcile_tags(client, list, &member_hash, &desired).await?;
            subscriber.record_tag_delta(delta);
            member
        }
    };

    match member.unique_email_id.is_empty() {
        true => Err(SyncError::MissingSuccessIdentifier(
            subscriber.email.clone(),
        )),
        false => Ok(member),
    }
}

/// Reconcile a member's remote tags against the record's desired set and
/// record the delta on the record. Addressed via the captured member id when
/// the record has one, so this also works on an already-obfuscated record.
///
/// Returns the recorded delta: the submitted status changes plus a `Current`
/// entry for every tag that was on the member beforehand.
#[tracing::instrument(
    name = "Modifying subscriber tags",
    skip_all,
    fields(subscriber_id = %subscriber.id, list_id = %list.list_id),
)]
pub async fn modify_subscriber_tags(
    subscriber: &mut Subscriber,
    client: &ListApiClient,
    list: &ListSettings,
) -> Result<Vec<TagUpdate>, SyncError> {
    if list.list_id.is_empty() {
        return Err(SyncError::MissingListId);
    }
    let member_hash = subscriber.member_hash().map_err(SyncError::InvalidEmail)?;
    let desired = subscriber.desired_tags(list);
    let delta = reconcile_tags(client, list, &member_hash, &desired).await?;
    subscriber.record_tag_delta(delta.clone());
    Ok(delta)
}

async fn reconcile_tags(
    client: &ListApiClient,
    list: &ListSettings,
    member_hash: &str,
    desired: &[String],
) -> Result<Vec<TagUpdate>, ApiError> {
    let current = client.member_tags(&list.list_id, member_hash).await?;
    let updates = tag_updates(&current, desired, list.remove_stale_tags);
    if !updates.is_empty() {
        client
            .update_member_tags(&list.list_id, member_hash, &updates)
            .await?;
    }

    // keep the pre-update state alongside the submitted changes, for
    // inspection
    let mut delta = updates;
    delta.extend(current.into_iter().map(|name| TagUpdate {
        name,
        status: TagStatus::Current,
    }));
    Ok(delta)
}

/// Compute the tag submission for a member: tags in both sets stay active,
/// tags only in `desired` become active (the remote creates unknown tags on
/// the fly), and tags only in `current` are marked inactive when
/// `remove_stale` is on. With `remove_stale` off the result is strictly
/// additive; an `inactive` entry never appears.
pub fn tag_updates(
    current: &[String],
    desired: &[String],
    remove_stale: bool,
) -> Vec<TagUpdate> {
    let current_set: HashSet<&String> = current.iter().collect();
    let desired_set: HashSet<&String> = desired.iter().collect();

    let mut updates = Vec::new();

    if remove_stale {
        // destructive: also strips tags assigned to the member by other means
        for name in current {
            if !desired_set.contains(name) {
                updates.push(TagUpdate {
                    name: name.clone(),
                    status: TagStatus::Inactive,
                });
            }
        }
    }

    // retained
    for name in current {
        if desired_set.contains(name) {
            updates.push(TagUpdate {
                name: name.clone(),
                status: TagStatus::Active,
            });
        }
    }

    // new
    for name in desired {
        if !current_set.contains(name) {
            updates.push(TagUpdate {
                name: name.clone(),
                status: TagStatus::Active,
            });
        }
    }

    updates
}
