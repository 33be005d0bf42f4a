// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! LMDB environment with an explicit open/closed lifecycle.
//!
//! Every operation holds a read guard on the lifecycle gate for its whole
//! duration. `close` takes the write guard, so it waits for in-flight
//! operations and every later call fails with `EnvironmentClosed`.
//! Guards are never nested: a caller inside `with_env` must not call back
//! into another gated method.
//!
//! Only an [`AccessMode::Owner`] writes the runtime sentinel and treats a
//! leftover one as a crash. Other processes may attach to the same
//! directory; they read the owner's sentinel but never touch it.

use crate::config::{AccessMode, ChangelogConfig};
use crate::error::{ChangelogError, Result};
use crate::tables::{
    domain_digest, parse_replica_table_name, DomainDigest, DOMAIN_TABLE, MAX_TABLE_NAME_LEN,
    RUNTIME_TABLE, STATE_TABLE,
};
use changelog_core::{Dn, ServerId};
use heed::byteorder::BigEndian;
use heed::types::{Bytes, DecodeIgnore, SerdeBincode, Str, U32};
use heed::{Database, Env, EnvOpenOptions, RoTxn, RwTxn};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub type RawTable = Database<Bytes, Bytes>;
/// Domain digest to normalized DN.
pub type DomainTable = Database<Bytes, Str>;
type RuntimeTable = Database<U32<BigEndian>, SerdeBincode<RuntimeStateRecord>>;

const RUNTIME_STATE_VERSION: u16 = 1;
const RUNTIME_STATE_KEY: u32 = 0;

/// Sentinel written on open and deleted on clean close. Finding one at open
/// means the previous owner never closed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuntimeStateRecord {
    pub record_version: u16,
    pub instance_id: Uuid,
    pub pid: u32,
    pub started_at_epoch_ms: u64,
}

pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

pub struct Environment {
    path: PathBuf,
    mode: AccessMode,
    gate: RwLock<Option<Env>>,
    tables: Mutex<HashMap<String, RawTable>>,
    state_table: RawTable,
    domain_table: DomainTable,
    runtime_table: RuntimeTable,
    runtime: Option<RuntimeStateRecord>,
    previous_run: Option<RuntimeStateRecord>,
}

impl Environment {
    pub fn open(config: &ChangelogConfig) -> Result<Self> {
        let path = config.path.clone();
        let mode = config.access;
        let open_err = |source: heed::Error| ChangelogError::EnvironmentOpen {
            path: path.clone(),
            source,
        };

        if mode.is_owner() {
            std::fs::create_dir_all(&path).map_err(|e| open_err(heed::Error::Io(e)))?;
        } else if !path.join("data.mdb").is_file() {
            return Err(open_err(heed::Error::Io(io::Error::new(
                io::ErrorKind::NotFound,
                "no changelog to attach to",
            ))));
        }
        let map_size = usize::try_from(config.map_size.as_u64())
            .map_err(|_| ChangelogError::Config(format!("map_size {} too large", config.map_size)))?;

        // SAFETY: the directory is only ever opened through this type, and
        // callers never truncate or rewrite the LMDB files underneath it.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(config.max_tables)
                .open(&path)
                .map_err(open_err)?
        };

        let (state_table, domain_table, runtime_table) = {
            let create = mode.allows_writes();
            let mut wtxn = env.write_txn().map_err(open_err)?;
            let state: RawTable = table(&env, &mut wtxn, STATE_TABLE, create).map_err(open_err)?;
            let domains: DomainTable =
                table(&env, &mut wtxn, DOMAIN_TABLE, create).map_err(open_err)?;
            let runtime: RuntimeTable =
                table(&env, &mut wtxn, RUNTIME_TABLE, create).map_err(open_err)?;
            wtxn.commit().map_err(open_err)?;
            (state, domains, runtime)
        };

        let runtime = mode.is_owner().then(|| RuntimeStateRecord {
            record_version: RUNTIME_STATE_VERSION,
            instance_id: Uuid::new_v4(),
            pid: process::id(),
            started_at_epoch_ms: epoch_millis(),
        });
        let previous_run = {
            let mut wtxn = env.write_txn().map_err(open_err)?;
            let existing = runtime_table
                .get(&wtxn, &RUNTIME_STATE_KEY)
                .map_err(open_err)?;
            if let Some(runtime) = &runtime {
                runtime_table
                    .put(&mut wtxn, &RUNTIME_STATE_KEY, runtime)
                    .map_err(open_err)?;
            }
            wtxn.commit().map_err(open_err)?;
            existing
        };

        match (&previous_run, mode.is_owner()) {
            (Some(previous), true) => warn!(
                path = %path.display(),
                previous_instance = %previous.instance_id,
                previous_pid = previous.pid,
                "Changelog environment was not closed cleanly"
            ),
            (Some(owner), false) => debug!(
                path = %path.display(),
                owner_instance = %owner.instance_id,
                owner_pid = owner.pid,
                "Attached next to a live or crashed owner"
            ),
            (None, _) => {}
        }
        info!(path = %path.display(), ?mode, "Opened changelog environment");

        Ok(Self {
            path,
            mode,
            gate: RwLock::new(Some(env)),
            tables: Mutex::new(HashMap::new()),
            state_table,
            domain_table,
            runtime_table,
            runtime,
            previous_run,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        self.gate.read().is_some()
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    /// True when an owner found the sentinel of an earlier owner.
    pub fn crash_detected(&self) -> bool {
        self.mode.is_owner() && self.previous_run.is_some()
    }

    /// Sentinel found at open. For a non-owner this is the current owner's,
    /// or that of an owner which crashed.
    pub fn previous_run(&self) -> Option<&RuntimeStateRecord> {
        self.previous_run.as_ref()
    }

    /// This instance's sentinel; only owners write one.
    pub fn runtime_state(&self) -> Option<&RuntimeStateRecord> {
        self.runtime.as_ref()
    }

    pub(crate) fn state_table(&self) -> RawTable {
        self.state_table
    }

    pub(crate) fn domain_table(&self) -> DomainTable {
        self.domain_table
    }

    pub fn ensure_writable(&self) -> Result<()> {
        if self.mode.allows_writes() {
            Ok(())
        } else {
            Err(ChangelogError::ReadOnly)
        }
    }

    /// Runs `f` against the open environment, holding the lifecycle gate.
    pub fn with_env<T>(&self, f: impl FnOnce(&Env) -> Result<T>) -> Result<T> {
        let guard = self.gate.read();
        let env = guard.as_ref().ok_or(ChangelogError::EnvironmentClosed)?;
        f(env)
    }

    pub fn read<T>(&self, f: impl FnOnce(&RoTxn<'_>) -> Result<T>) -> Result<T> {
        self.with_env(|env| {
            let rtxn = env.read_txn()?;
            f(&rtxn)
        })
    }

    /// Runs `f` in a write transaction and commits if it succeeds.
    pub fn write<T>(&self, f: impl FnOnce(&mut RwTxn<'_>) -> Result<T>) -> Result<T> {
        self.ensure_writable()?;
        self.with_env(|env| {
            let mut wtxn = env.write_txn()?;
            let out = f(&mut wtxn)?;
            wtxn.commit()?;
            Ok(out)
        })
    }

    /// Opens a named table, creating it if absent. Handles are cached.
    pub fn open_or_create_table(&self, name: &str) -> Result<RawTable> {
        check_table_name(name)?;
        self.with_env(|env| {
            let mut tables = self.tables.lock();
            if let Some(table) = tables.get(name) {
                return Ok(*table);
            }
            let mut wtxn = env.write_txn()?;
            let table: RawTable = match env.open_database(&wtxn, Some(name))? {
                Some(table) => table,
                None => {
                    self.ensure_writable()?;
                    env.create_database(&mut wtxn, Some(name))?
                }
            };
            wtxn.commit()?;
            debug!(table = name, "Opened changelog table");
            tables.insert(name.to_string(), table);
            Ok(table)
        })
    }

    /// Opens a named table only if it already exists.
    pub fn open_table(&self, name: &str) -> Result<Option<RawTable>> {
        check_table_name(name)?;
        self.with_env(|env| {
            let mut tables = self.tables.lock();
            if let Some(table) = tables.get(name) {
                return Ok(Some(*table));
            }
            // Opened in a write transaction so the handle outlives it.
            let wtxn = env.write_txn()?;
            let table: Option<RawTable> = env.open_database(&wtxn, Some(name))?;
            wtxn.commit()?;
            if let Some(table) = table {
                tables.insert(name.to_string(), table);
            }
            Ok(table)
        })
    }

    /// Names of every named table starting with `prefix`.
    pub fn table_names(&self, prefix: &str) -> Result<Vec<String>> {
        self.with_env(|env| {
            let rtxn = env.read_txn()?;
            let main: Option<Database<Str, DecodeIgnore>> = env.open_database(&rtxn, None)?;
            let Some(main) = main else {
                return Ok(Vec::new());
            };
            let mut names = Vec::new();
            for entry in main.prefix_iter(&rtxn, prefix)? {
                let (name, ()) = entry?;
                names.push(name.to_string());
            }
            Ok(names)
        })
    }

    /// Maps the domain's digest to the domain, so log table names can be
    /// resolved. Fails if the digest already stands for another domain.
    pub fn register_domain(&self, domain: &Dn) -> Result<DomainDigest> {
        let digest = domain_digest(domain);
        let collision = |existing: &str| ChangelogError::DomainDigestCollision {
            domain: domain.clone(),
            existing: existing.to_string(),
        };

        let known = self.read(|rtxn| {
            Ok(self
                .domain_table
                .get(rtxn, digest.as_slice())?
                .map(str::to_string))
        })?;
        match known {
            Some(existing) if existing == domain.as_str() => return Ok(digest),
            Some(existing) => return Err(collision(&existing)),
            None => {}
        }

        // Checked again inside the write: another process may have won.
        self.write(|wtxn| {
            match self.domain_table.get(wtxn, digest.as_slice())? {
                Some(existing) if existing != domain.as_str() => return Err(collision(existing)),
                Some(_) => {}
                None => self.domain_table.put(wtxn, digest.as_slice(), domain.as_str())?,
            }
            Ok(())
        })?;
        debug!(domain = %domain, digest = %hex::encode(digest), "Registered domain");
        Ok(digest)
    }

    pub fn domain_for_digest(&self, digest: &DomainDigest) -> Result<Option<Dn>> {
        let stored = self.read(|rtxn| {
            Ok(self
                .domain_table
                .get(rtxn, digest.as_slice())?
                .map(str::to_string))
        })?;
        Ok(stored.map(|text| Dn::parse(&text)).transpose()?)
    }

    /// Domain and replica of a log table. `None` for names this layer did
    /// not produce, or whose domain was never registered.
    pub fn resolve_replica_table(&self, name: &str) -> Result<Option<(Dn, ServerId)>> {
        let Some((digest, server_id)) = parse_replica_table_name(name) else {
            return Ok(None);
        };
        Ok(self
            .domain_for_digest(&digest)?
            .map(|domain| (domain, server_id)))
    }

    /// Flushes the environment to disk.
    pub fn checkpoint(&self) -> Result<()> {
        self.with_env(|env| Ok(env.force_sync()?))
    }

    /// Waits for in-flight operations, syncs, clears the sentinel (owners
    /// only) and releases the engine. Idempotent.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.gate.write();
        let Some(env) = guard.take() else {
            return Ok(());
        };
        self.tables.lock().clear();

        let synced = env.force_sync();
        let cleared = if self.mode.is_owner() {
            self.clear_sentinel(&env)
        } else {
            Ok(())
        };
        env.prepare_for_closing().wait();
        info!(path = %self.path.display(), "Closed changelog environment");

        synced?;
        cleared
    }

    fn clear_sentinel(&self, env: &Env) -> Result<()> {
        let mut wtxn = env.write_txn()?;
        self.runtime_table.delete(&mut wtxn, &RUNTIME_STATE_KEY)?;
        wtxn.commit()?;
        Ok(())
    }

    /// Releases the engine without clearing the sentinel, as a killed
    /// process would.
    #[cfg(test)]
    pub(crate) fn abandon(&self) {
        let env = self.gate.write().take();
        self.tables.lock().clear();
        if let Some(env) = env {
            env.prepare_for_closing().wait();
        }
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close changelog environment: {}", e);
        }
    }
}

/// Creates a fixed table, or for a non-writing mode requires that it exists.
fn table<K: 'static, D: 'static>(
    env: &Env,
    wtxn: &mut RwTxn<'_>,
    name: &str,
    create: bool,
) -> heed::Result<Database<K, D>> {
    if create {
        return env.create_database(wtxn, Some(name));
    }
    env.open_database(wtxn, Some(name))?.ok_or_else(|| {
        heed::Error::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("missing changelog table {name}"),
        ))
    })
}

fn check_table_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_TABLE_NAME_LEN {
        return Err(ChangelogError::TableName {
            name: name.to_string(),
            reason: format!("length must be 1..={MAX_TABLE_NAME_LEN} bytes"),
        });
    }
    Ok(())
}
