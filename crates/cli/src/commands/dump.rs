// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use super::{csn_time, new_table, open};
use changelog_core::{Csn, Dn, ServerId};
use changelog_persistence::AccessMode;
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Serialize)]
pub struct DumpRow {
    pub csn: String,
    pub time: String,
    pub size: usize,
    /// Payload as text; invalid UTF-8 is replaced.
    pub payload: String,
}

pub fn collect(
    dir: &Path,
    domain: &Dn,
    server_id: ServerId,
    from: Option<Csn>,
    limit: Option<usize>,
) -> anyhow::Result<Vec<DumpRow>> {
    let db = open(dir, AccessMode::ReadOnly)?;
    anyhow::ensure!(
        db.replica_tables()?.contains(&(domain.clone(), server_id)),
        "No log for server {server_id} in {domain}"
    );

    let mut rows = Vec::new();
    let records = db
        .iterate_from(domain, server_id, from.unwrap_or_else(|| Csn::first_at(0)))?
        .take(limit.unwrap_or(usize::MAX));
    for record in records {
        let record = record?;
        rows.push(DumpRow {
            csn: record.csn.to_string(),
            time: csn_time(&record.csn),
            size: record.payload.len(),
            payload: String::from_utf8_lossy(&record.payload).into_owned(),
        });
    }
    db.close()?;
    Ok(rows)
}

pub fn run(
    dir: &Path,
    domain: &Dn,
    server_id: ServerId,
    from: Option<Csn>,
    limit: Option<usize>,
    json: bool,
) -> anyhow::Result<()> {
    let rows = collect(dir, domain, server_id, from, limit)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    let mut table = new_table(&["CSN", "Time", "Bytes", "Payload"]);
    for row in &rows {
        table.add_row(vec![
            row.csn.clone(),
            row.time.clone(),
            row.size.to_string(),
            row.payload.lines().next().unwrap_or_default().to_string(),
        ]);
    }
    println!("\n{domain} / server {server_id}\n");
    println!("{table}\n");
    Ok(())
}
