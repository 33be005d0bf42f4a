// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub const RECORDS_APPENDED: &str = "changelog_records_appended_total";
pub const RECORDS_PURGED: &str = "changelog_records_purged_total";
pub const PURGE_FAILURES: &str = "changelog_purge_failures_total";
pub const CORRUPT_STATE_ENTRIES: &str = "changelog_corrupt_state_entries_total";
pub const APPEND_DURATION: &str = "changelog_append_duration_seconds";
pub const CHECKPOINTS: &str = "changelog_checkpoints_total";

/// Installs the global tracing subscriber, writing to stderr. `RUST_LOG`
/// overrides the default filter. A second call is a no-op.
pub fn init_tracing() {
    let installed = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "changelog_persistence=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();

    if installed.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

/// Registers descriptions with whatever metrics recorder the host installed.
pub fn describe_metrics() {
    metrics::describe_counter!(RECORDS_APPENDED, "Change records durably appended");
    metrics::describe_counter!(RECORDS_PURGED, "Change records removed by purge");
    metrics::describe_counter!(PURGE_FAILURES, "Logs skipped by a bulk purge after an error");
    metrics::describe_counter!(
        CORRUPT_STATE_ENTRIES,
        "State table entries skipped because they could not be decoded"
    );
    metrics::describe_histogram!(APPEND_DURATION, "Time taken to durably append one record");
    metrics::describe_counter!(CHECKPOINTS, "Forced environment syncs");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_repeatable() {
        init_tracing();
        init_tracing();
        describe_metrics();
    }
}
