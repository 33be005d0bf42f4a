// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use super::{csn_time, new_table, open};
use changelog_core::{ChangelogState, Csn, Dn, ServerId};
use changelog_persistence::env::RuntimeStateRecord;
use changelog_persistence::AccessMode;
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize)]
pub struct LogSummary {
    pub domain: Dn,
    pub server_id: ServerId,
    pub table: String,
    pub records: u64,
    pub oldest: Option<String>,
    pub newest: Option<String>,
    /// Whether the state table lists this replica.
    pub known: bool,
}

#[derive(Debug, Serialize)]
pub struct InspectReport {
    pub path: PathBuf,
    /// Sentinel of a server that is running, or that crashed.
    pub owner: Option<RuntimeStateRecord>,
    pub corrupt_state_entries: Vec<String>,
    pub state: ChangelogState,
    pub logs: Vec<LogSummary>,
}

pub fn collect(dir: &Path) -> anyhow::Result<InspectReport> {
    let db = open(dir, AccessMode::ReadOnly)?;
    let state = db.state();

    let mut logs = Vec::new();
    for (domain, server_id) in db.replica_tables()? {
        let log = db.replica_log(&domain, server_id)?;
        logs.push(LogSummary {
            known: state.has_replica(&domain, server_id),
            table: log.name().to_string(),
            records: log.count()?,
            oldest: log.oldest_csn()?.map(|c| c.to_string()),
            newest: log.newest_csn().map(|c| c.to_string()),
            domain,
            server_id,
        });
    }

    let report = InspectReport {
        path: dir.to_path_buf(),
        owner: db.environment().previous_run().cloned(),
        corrupt_state_entries: db
            .corrupt_state_entries()
            .iter()
            .map(ToString::to_string)
            .collect(),
        state,
        logs,
    };
    db.close()?;
    Ok(report)
}

pub fn run(dir: &Path, json: bool) -> anyhow::Result<()> {
    let report = collect(dir)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("\nChangelog at {}", report.path.display());
    println!("--------------------");
    if let Some(owner) = &report.owner {
        println!(
            "Owned by instance {} (pid {}), running or not closed cleanly",
            owner.instance_id, owner.pid
        );
    }
    for entry in &report.corrupt_state_entries {
        println!("SKIPPED {entry}");
    }

    let mut domains = new_table(&["Domain", "Generation", "Replicas", "Offline"]);
    for domain in report.state.domains() {
        let replicas = report
            .state
            .replicas(domain)
            .map(|set| {
                set.iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default();
        let offline = report
            .state
            .offline_replicas()
            .get(domain)
            .map(|map| {
                map.iter()
                    .map(|(id, csn)| format!("{id} @ {csn}"))
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default();
        domains.add_row(vec![
            domain.to_string(),
            report
                .state
                .generation(domain)
                .map(|g| g.to_string())
                .unwrap_or_else(|| "-".into()),
            replicas,
            offline,
        ]);
    }
    println!("{domains}\n");

    let mut logs = new_table(&["Domain", "Server", "Records", "Oldest", "Newest"]);
    for log in &report.logs {
        let server = if log.known {
            log.server_id.to_string()
        } else {
            format!("{} (unlisted)", log.server_id)
        };
        let bound = |csn: &Option<String>| match csn.as_deref() {
            Some(text) => match text.parse::<Csn>() {
                Ok(parsed) => format!("{text}\n{}", csn_time(&parsed)),
                Err(_) => text.to_string(),
            },
            None => "-".to_string(),
        };
        logs.add_row(vec![
            log.domain.to_string(),
            server,
            log.records.to_string(),
            bound(&log.oldest),
            bound(&log.newest),
        ]);
    }
    println!("{logs}\n");
    Ok(())
}
