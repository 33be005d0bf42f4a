// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use super::{new_table, open};
use changelog_core::Csn;
use changelog_persistence::{AccessMode, ChangelogError};
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Serialize)]
pub struct CorruptRecord {
    pub table: String,
    pub csn: String,
    pub reason: String,
}

#[derive(Debug, Default, Serialize)]
pub struct VerifyReport {
    pub logs_checked: usize,
    pub records_ok: u64,
    pub corrupt_records: Vec<CorruptRecord>,
    pub corrupt_state_entries: Vec<String>,
}

impl VerifyReport {
    pub fn is_clean(&self) -> bool {
        self.corrupt_records.is_empty() && self.corrupt_state_entries.is_empty()
    }
}

/// Next possible key of the same replica.
fn successor(csn: Csn) -> Option<Csn> {
    match csn.seq().checked_add(1) {
        Some(seq) => Csn::new(csn.timestamp_ms(), csn.server_id(), seq).ok(),
        None => Csn::new(csn.timestamp_ms() + 1, csn.server_id(), 0).ok(),
    }
}

/// Decodes every record of every log, checking each checksum. A corrupt
/// record is reported and the walk resumes after it.
pub fn check(dir: &Path) -> anyhow::Result<VerifyReport> {
    let db = open(dir, AccessMode::ReadOnly)?;
    let mut report = VerifyReport {
        corrupt_state_entries: db
            .corrupt_state_entries()
            .iter()
            .map(ToString::to_string)
            .collect(),
        ..VerifyReport::default()
    };

    for (domain, server_id) in db.replica_tables()? {
        let log = db.replica_log(&domain, server_id)?;
        let mut iter = log.iterate_from(Csn::first_at(0))?;
        report.logs_checked += 1;

        while let Some(result) = iter.next() {
            match result {
                Ok(_) => report.records_ok += 1,
                Err(ChangelogError::CorruptRecord { table, csn, source }) => {
                    report.corrupt_records.push(CorruptRecord {
                        table,
                        csn: csn.to_string(),
                        reason: source.to_string(),
                    });
                    match successor(csn) {
                        Some(next) => iter.restart_from(next),
                        None => break,
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    db.close()?;
    Ok(report)
}

pub fn run(dir: &Path, json: bool) -> anyhow::Result<()> {
    let report = check(dir)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if report.is_clean() {
        println!("\nVERIFIED\n");
        println!("Logs:    {}", report.logs_checked);
        println!("Records: {}\n", report.records_ok);
    } else {
        println!("\nCORRUPTED\n");
        let mut table = new_table(&["Location", "Key", "Reason"]);
        for entry in &report.corrupt_state_entries {
            table.add_row(vec!["state".to_string(), String::new(), entry.clone()]);
        }
        for record in &report.corrupt_records {
            table.add_row(vec![
                record.table.clone(),
                record.csn.clone(),
                record.reason.clone(),
            ]);
        }
        println!("{table}\n");
    }

    anyhow::ensure!(
        report.is_clean(),
        "{} corrupt record(s), {} corrupt state entr(ies)",
        report.corrupt_records.len(),
        report.corrupt_state_entries.len()
    );
    Ok(())
}
