use std::collections::BTreeMap;

use crate::configuration::Settings;
use crate::mailchimp::ListApiClient;
use crate::store::SubscriberStore;
use crate::subscriber::SyncStatus;
use crate::sync::subscribe;

/// Per-status tallies for one batch run
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub counts: BTreeMap<SyncStatus, usize>,
}

impl BatchSummary {
    fn record(
        &mut self,
        status: SyncStatus,
    ) {
        *self.counts.entry(status).or_default() += 1;
    }

    pub fn count(
        &self,
        status: SyncStatus,
    ) -> usize {
        self.counts.get(&status).copied().unwrap_or_default()
    }

    pub fn total(&self) -> usize { self.counts.values().sum() }

    /// Everything that did not end up `Fail`
    pub fn total_non_failed(&self) -> usize { self.total() - self.count(SyncStatus::Fail) }
}

/// Pick up all `New` records (at most `limit`; 0 lifts the bound) and sync
/// them one at a time, tallying the resulting statuses.
///
/// Each record is written back as `Processing` before its remote call, so a
/// crash mid-batch leaves the half-done record visibly stuck rather than
/// silently re-eligible; recovery is an external reset to `New`.
///
/// With `report_only`, eligible records are only counted and logged; nothing
/// is mutated and the remote API is never contacted.
#[tracing::instrument(skip(store, client, cfg))]
pub async fn batch_subscribe(
    store: &SubscriberStore,
    client: &ListApiClient,
    cfg: &Settings,
    limit: usize,
    report_only: bool,
) -> BatchSummary {
    let mut summary = BatchSummary::default();
    let pending = store.with_status(SyncStatus::New, limit);

    if report_only {
        for subscriber in &pending {
            tracing::debug!(
                "REPORT_ONLY: would subscribe {} to list {}",
                subscriber.id,
                cfg.resolve_list_id(&subscriber.list_id)
            );
        }
        summary.counts.insert(SyncStatus::Processing, pending.len());
        return summary;
    }

    for mut subscriber in pending {
        if subscriber.begin_processing().is_err() {
            // externally edited since the query; leave it alone
            continue;
        }
        store.save(subscriber.clone());

        let list_id = cfg.resolve_list_id(&subscriber.list_id);
        let list = cfg.list_settings(&list_id);
        let status = subscribe(&mut subscriber, client, &list, &cfg.sync).await;
        store.save(subscriber);
        summary.record(status);
    }

    if summary.total() > 0 {
        tracing::info!(counts = ?summary.counts, "batch finished");
    }
    summary
}

pub enum BatchOutcome {
    /// The queue had fewer `New` records than the batch bound
    Drained,
    /// A full batch was processed; more records are likely waiting
    MoreLeft,
}

async fn batch_loop(
    store: &SubscriberStore,
    client: &ListApiClient,
    cfg: &Settings,
) -> Result<(), anyhow::Error> {
    loop {
        if !cfg.sync.enabled {
            tokio::time::sleep(cfg.sync.run_interval()).await;
            continue;
        }
        let summary = batch_subscribe(store, client, cfg, cfg.sync.batch_limit, false).await;
        let outcome = match cfg.sync.batch_limit > 0 && summary.total() >= cfg.sync.batch_limit {
            true => BatchOutcome::MoreLeft,
            false => BatchOutcome::Drained,
        };
        match outcome {
            BatchOutcome::Drained => tokio::time::sleep(cfg.sync.run_interval()).await,
            BatchOutcome::MoreLeft => {} // start the next batch immediately
        }
    }
}

/// To be run as a separate worker, alongside the host application
pub async fn init_sync_worker(
    cfg: Settings,
    store: SubscriberStore,
) -> Result<(), anyhow::Error> {
    let client = cfg.mailchimp.client()?;
    batch_loop(&store, &client, &cfg).await
}
