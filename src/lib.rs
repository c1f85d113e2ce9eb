pub mod batch;
pub mod cleanup;
pub mod configuration;
pub mod domain;
pub mod mailchimp;
pub mod store;
pub mod subscriber;
pub mod sync;
pub mod telemetry;

/// Walk an error's source chain when formatting `Debug` output. `thiserror`
/// derives `Display` from the top-level message only; without this, the
/// underlying cause (e.g. the reqwest error behind a sync failure) is lost in
/// logs.
pub fn error_chain_fmt(
    e: &impl std::error::Error,
    f: &mut std::fmt::Formatter<'_>,
) -> std::fmt::Result {
    writeln!(f, "{e}\n")?;
    let mut current = e.source();
    while let Some(cause) = current {
        writeln!(f, "Caused by:\n\t{cause}")?;
        current = cause.source();
    }
    Ok(())
}
