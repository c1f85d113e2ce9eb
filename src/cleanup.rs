use chrono::Duration;
use chrono::Utc;

use crate::configuration::CleanupSettings;
use crate::configuration::Settings;
use crate::store::SubscriberStore;
use crate::subscriber::SyncStatus;

/// Failed records are kept longer than synced ones so their `last_error` can
/// still be inspected
const FAILED_RETENTION_DAYS: i64 = 7;

/// Drop synced records older than the configured window (they only hold
/// obfuscated PII, but they still accumulate) and failed records older than
/// `FAILED_RETENTION_DAYS`. The per-run bound applies to each status
/// separately; report-only counts without deleting.
///
/// Returns the (synced, failed) deletion counts.
#[tracing::instrument(skip(store, cfg))]
pub fn prune_subscribers(
    store: &SubscriberStore,
    cfg: &CleanupSettings,
) -> (usize, usize) {
    let synced_cutoff = Utc::now() - Duration::minutes(cfg.prune_after_minutes);
    let failed_cutoff = Utc::now() - Duration::days(FAILED_RETENTION_DAYS);

    if cfg.report_only {
        let synced = store.count_older_than(SyncStatus::Success, synced_cutoff);
        let failed = store.count_older_than(SyncStatus::Fail, failed_cutoff);
        tracing::info!("REPORT_ONLY: would delete {synced} synced and {failed} failed subscribers");
        return (synced, failed);
    }

    let synced = store.prune(SyncStatus::Success, synced_cutoff, cfg.prune_limit);
    let failed = store.prune(SyncStatus::Fail, failed_cutoff, cfg.prune_limit);
    if synced + failed > 0 {
        tracing::info!("deleted {synced} synced and {failed} failed subscribers");
    }
    (synced, failed)
}

async fn cleanup_loop(
    store: &SubscriberStore,
    cfg: &CleanupSettings,
) -> Result<(), anyhow::Error> {
    loop {
        prune_subscribers(store, cfg);
        tokio::time::sleep(cfg.run_interval()).await;
    }
}

/// To be run as a separate worker, alongside the sync worker
pub async fn init_cleanup_worker(
    cfg: Settings,
    store: SubscriberStore,
) -> Result<(), anyhow::Error> {
    cleanup_loop(&store, &cfg.cleanup).await
}
