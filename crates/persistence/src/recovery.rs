// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Reconciliation after an unclean shutdown.
//!
//! A replica log is created before its first record lands, but the replica
//! entry in the state table is a separate transaction. After a crash a log
//! table can therefore hold records for a replica the state has never heard
//! of. Recovery walks every log table and re-records those replicas.

use crate::env::Environment;
use crate::error::Result;
use crate::state_store::StateStore;
use crate::tables::REPLICA_TABLE_PREFIX;
use changelog_core::{Dn, ServerId};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Replicas whose state entry was missing and has been written back.
    pub restored_replicas: Vec<(Dn, ServerId)>,
    /// Tables under the log prefix whose name does not resolve to a
    /// registered domain.
    pub unknown_tables: Vec<String>,
    pub corrupt_state_entries: usize,
}

pub(crate) fn recover(
    env: &Environment,
    state: &StateStore,
    corrupt_state_entries: usize,
) -> Result<RecoveryReport> {
    let mut report = RecoveryReport {
        corrupt_state_entries,
        ..RecoveryReport::default()
    };

    for name in env.table_names(REPLICA_TABLE_PREFIX)? {
        let Some((domain, server_id)) = env.resolve_replica_table(&name)? else {
            warn!(table = %name, "Ignoring table with an unresolvable name");
            report.unknown_tables.push(name);
            continue;
        };
        if state.has_replica(&domain, server_id) {
            continue;
        }
        let Some(table) = env.open_table(&name)? else {
            continue;
        };
        let records = env.read(|rtxn| Ok(table.len(rtxn)?))?;
        if records == 0 {
            continue;
        }

        state.record_replica(&domain, server_id)?;
        warn!(
            domain = %domain,
            server_id = %server_id,
            records,
            "Restored replica entry missing from state"
        );
        report.restored_replicas.push((domain, server_id));
    }

    env.checkpoint()?;
    info!(
        restored = report.restored_replicas.len(),
        unknown_tables = report.unknown_tables.len(),
        corrupt_state_entries = report.corrupt_state_entries,
        "Changelog recovery complete"
    );
    Ok(report)
}
