use std::fmt::Debug;
use std::fmt::Display;

use chimp_sync::batch::init_sync_worker;
use chimp_sync::cleanup::init_cleanup_worker;
use chimp_sync::configuration::get_configuration;
use chimp_sync::store::SubscriberStore;
use chimp_sync::telemetry::get_subscriber;
use chimp_sync::telemetry::init_subscriber;
use tokio::task::JoinError;

fn report_exit(
    name: &str,
    outcome: Result<Result<(), impl Debug + Display>, JoinError>,
) {
    match outcome {
        Ok(Ok(())) => {
            tracing::info!("{name} exited gracefully")
        }

        Ok(Err(e)) => {
            tracing::error!(
                error.cause_chain=?e,
                error.message=%e,
                "{name} failed (inner)"
            )
        }

        Err(e) => {
            tracing::error!(
                error.cause_chain=?e,
                error.message=%e,
                "{name} failed (outer)"
            )
        }
    }
}

/// Initialise telemetry, load config, and start the workers
#[tokio::main] // requires tokio features: macros, rt-multi-thread
async fn main() -> Result<(), anyhow::Error> {
    let subscriber = get_subscriber("chimp-sync", "info", std::io::stdout);
    init_subscriber(subscriber);

    let cfg = get_configuration()?;

    // the in-memory store stands in for the host application's persistence;
    // both workers operate on the same records
    let store = SubscriberStore::new();

    let sync_worker = tokio::spawn(init_sync_worker(cfg.clone(), store.clone()));
    let cleanup_worker = tokio::spawn(init_cleanup_worker(cfg, store));

    // Waits on multiple concurrent branches, returning when the **first** branch
    // completes, cancelling the remaining branches.
    tokio::select! {
        o = sync_worker => { report_exit("Subscription sync worker", o) },
        o = cleanup_worker => { report_exit("Record cleanup worker", o) },
    }

    Ok(())
}
