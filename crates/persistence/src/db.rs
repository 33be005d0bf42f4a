// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::config::ChangelogConfig;
use crate::env::Environment;
use crate::error::Result;
use crate::maintenance::{self, Maintenance};
use crate::recovery::{self, RecoveryReport};
use crate::replica_log::{
    BulkPurgeReport, ChangeIter, LogOptions, LogRegistry, PurgeReport, ReplicaLog,
};
use crate::state_store::StateStore;
use crate::tables::{domain_table_prefix, parse_replica_table_name, REPLICA_TABLE_PREFIX};
use crate::telemetry;
use changelog_core::codec::DecodedState;
use changelog_core::{
    ChangeRecord, ChangelogState, CorruptStateError, Csn, Dn, GenerationId, ServerId,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// The replication changelog: domain state plus one change log per replica.
pub struct ChangelogDb {
    config: ChangelogConfig,
    env: Arc<Environment>,
    state: Arc<StateStore>,
    logs: Arc<LogRegistry>,
    corrupt_state: Vec<CorruptStateError>,
    recovery: Option<RecoveryReport>,
    maintenance: Mutex<Option<Maintenance>>,
}

impl ChangelogDb {
    /// Opens (or creates) the changelog at `config.path`. If the previous
    /// owner did not close cleanly, recovery runs before this returns.
    /// Non-owner modes never recover or start maintenance.
    pub fn open(config: ChangelogConfig) -> Result<Self> {
        config.validate()?;
        let env = Arc::new(Environment::open(&config)?);
        let (state, corrupt_state) = StateStore::load(Arc::clone(&env))?;
        let state = Arc::new(state);
        let logs = Arc::new(LogRegistry::new(
            Arc::clone(&env),
            LogOptions::from(&config),
        ));

        let recovery = if env.crash_detected() {
            Some(recovery::recover(&env, &state, corrupt_state.len())?)
        } else {
            None
        };

        let wants_maintenance =
            config.checkpoint_interval().is_some() || config.retention().is_some();
        let maintenance = if wants_maintenance && config.access.is_owner() {
            Some(Maintenance::start(
                Arc::clone(&env),
                Arc::clone(&state),
                Arc::clone(&logs),
                config.checkpoint_interval(),
                config.retention(),
            )?)
        } else {
            None
        };

        info!(
            path = %config.path.display(),
            mode = ?config.access,
            recovered = recovery.is_some(),
            "Changelog database ready"
        );
        Ok(Self {
            config,
            env,
            state,
            logs,
            corrupt_state,
            recovery,
            maintenance: Mutex::new(maintenance),
        })
    }

    pub fn config(&self) -> &ChangelogConfig {
        &self.config
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// Snapshot of the domain state.
    pub fn state(&self) -> ChangelogState {
        self.state.snapshot()
    }

    /// Re-reads the state table from disk.
    pub fn load_state(&self) -> Result<DecodedState> {
        self.state.load_state()
    }

    /// State entries skipped at open.
    pub fn corrupt_state_entries(&self) -> &[CorruptStateError] {
        &self.corrupt_state
    }

    /// Present when this open followed an unclean shutdown.
    pub fn crash_recovered(&self) -> Option<&RecoveryReport> {
        self.recovery.as_ref()
    }

    pub fn replica_log(&self, domain: &Dn, server_id: ServerId) -> Result<Arc<ReplicaLog>> {
        self.logs.get_or_open(domain, server_id)
    }

    /// Every (domain, replica) pair that has a log table, whether or not the
    /// state knows about it, in domain order.
    pub fn replica_tables(&self) -> Result<Vec<(Dn, ServerId)>> {
        let mut tables = Vec::new();
        for name in self.env.table_names(REPLICA_TABLE_PREFIX)? {
            if let Some(table) = self.env.resolve_replica_table(&name)? {
                tables.push(table);
            }
        }
        tables.sort();
        Ok(tables)
    }

    /// Opens the replica's log, records the replica if it is new, then
    /// appends. A replica that produces changes past its offline marker is
    /// back online.
    pub fn append(&self, domain: &Dn, record: &ChangeRecord) -> Result<()> {
        let server_id = record.server_id();
        let log = self.logs.get_or_open(domain, server_id)?;
        self.state.record_replica(domain, server_id)?;
        log.append(record)?;

        if self
            .state
            .offline_csn(domain, server_id)
            .is_some_and(|offline| record.csn > offline)
        {
            self.state.clear_replica_offline(domain, server_id)?;
        }
        Ok(())
    }

    pub fn iterate_from(&self, domain: &Dn, server_id: ServerId, from: Csn) -> Result<ChangeIter> {
        self.logs.get_or_open(domain, server_id)?.iterate_from(from)
    }

    pub fn purge_before(&self, domain: &Dn, server_id: ServerId, bound: Csn) -> Result<PurgeReport> {
        self.logs.get_or_open(domain, server_id)?.purge_before(bound)
    }

    /// Purges every known log. A failing log is reported in the result and
    /// does not stop the others.
    pub fn purge_all_before(&self, bound: Csn) -> Result<BulkPurgeReport> {
        maintenance::purge_logs(&self.state, &self.logs, |_| Some(bound))
    }

    /// Purges records older than `retention`, keeping each log's newest.
    pub fn purge_expired(&self, retention: Duration, now_ms: u64) -> Result<BulkPurgeReport> {
        maintenance::purge_expired(&self.state, &self.logs, retention, now_ms)
    }

    pub fn oldest_csn(&self, domain: &Dn, server_id: ServerId) -> Result<Option<Csn>> {
        self.logs.get_or_open(domain, server_id)?.oldest_csn()
    }

    pub fn newest_csn(&self, domain: &Dn, server_id: ServerId) -> Result<Option<Csn>> {
        Ok(self.logs.get_or_open(domain, server_id)?.newest_csn())
    }

    pub fn record_generation(&self, domain: &Dn, generation: GenerationId) -> Result<()> {
        self.state.record_generation(domain, generation)
    }

    pub fn record_replica(&self, domain: &Dn, server_id: ServerId) -> Result<bool> {
        self.state.record_replica(domain, server_id)
    }

    pub fn remove_replica(&self, domain: &Dn, server_id: ServerId) -> Result<bool> {
        self.state.remove_replica(domain, server_id)
    }

    /// Remembers the last CSN seen from a replica that went offline.
    pub fn notify_replica_offline(&self, domain: &Dn, server_id: ServerId, csn: Csn) -> Result<()> {
        self.state.record_replica_offline(domain, server_id, csn)
    }

    /// Starts a new generation: every log of the domain is emptied and the
    /// domain's state is replaced by the new generation alone.
    pub fn reset_generation(&self, domain: &Dn, generation: GenerationId) -> Result<()> {
        let prefix = domain_table_prefix(domain);
        let mut targets: Vec<ServerId> = self.state.replicas(domain).into_iter().collect();
        for name in self.env.table_names(&prefix)? {
            if let Some((_, server_id)) = parse_replica_table_name(&name) {
                targets.push(server_id);
            }
        }
        targets.sort();
        targets.dedup();

        for server_id in targets {
            self.logs.get_or_open(domain, server_id)?.clear()?;
        }
        self.state.clear_domain(domain)?;
        self.state.record_generation(domain, generation)?;
        info!(domain = %domain, generation = %generation, "Reset domain generation");
        Ok(())
    }

    /// Empties the replica's log and forgets the replica. The empty table
    /// stays; LMDB cannot drop a named database that may be reopened.
    pub fn decommission_replica(&self, domain: &Dn, server_id: ServerId) -> Result<()> {
        self.logs.get_or_open(domain, server_id)?.clear()?;
        self.logs.forget(domain, server_id);
        self.state.remove_replica(domain, server_id)?;
        info!(domain = %domain, server_id = %server_id, "Decommissioned replica");
        Ok(())
    }

    pub fn checkpoint(&self) -> Result<()> {
        self.env.checkpoint()?;
        metrics::counter!(telemetry::CHECKPOINTS, 1);
        Ok(())
    }

    /// Stops maintenance, waits for in-flight operations and releases the
    /// environment. Idempotent.
    pub fn close(&self) -> Result<()> {
        if let Some(mut maintenance) = self.maintenance.lock().take() {
            maintenance.stop();
        }
        self.logs.clear();
        self.env.close()
    }

    /// Simulates a crash: releases the environment without clearing the
    /// runtime sentinel.
    #[cfg(test)]
    pub(crate) fn abandon(&self) {
        if let Some(mut maintenance) = self.maintenance.lock().take() {
            maintenance.stop();
        }
        self.logs.clear();
        self.env.abandon();
    }

    #[cfg(test)]
    pub(crate) fn logs(&self) -> &LogRegistry {
        &self.logs
    }
}

impl Drop for ChangelogDb {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("Failed to close changelog database: {}", e);
        }
    }
}
