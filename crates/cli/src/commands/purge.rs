// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use super::open;
use changelog_core::Csn;
use changelog_persistence::AccessMode;
use std::path::Path;

/// Removes every record older than `before` from every known log. Logs that
/// fail do not stop the others, but make the command fail.
pub fn execute(dir: &Path, before: Csn) -> anyhow::Result<usize> {
    let db = open(dir, AccessMode::Attach)?;
    let report = db.purge_all_before(before)?;
    db.checkpoint()?;
    db.close()?;

    for failure in &report.failed {
        eprintln!(
            "FAILED {} server {}: {}",
            failure.domain, failure.server_id, failure.error
        );
    }
    anyhow::ensure!(
        report.is_complete(),
        "Purged {} record(s) but {} log(s) failed",
        report.removed,
        report.failed.len()
    );
    Ok(report.removed)
}

pub fn run(dir: &Path, before: Csn, json: bool) -> anyhow::Result<()> {
    let removed = execute(dir, before)?;
    if json {
        println!(
            "{}",
            serde_json::json!({ "before": before.to_string(), "removed": removed })
        );
    } else {
        println!("Purged {removed} record(s) older than {before}");
    }
    Ok(())
}
