// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Durable per-domain generation and replica bookkeeping.
//!
//! Every mutation commits to the state table first and only then touches the
//! in-memory snapshot, all under one writer mutex. A failed commit leaves the
//! snapshot as it was.

use crate::env::Environment;
use crate::error::{ChangelogError, Result};
use crate::telemetry;
use changelog_core::codec::{
    decode_all, domain_prefix, encode_generation_entry, encode_offline_entry,
    encode_replica_entry, DecodedState, StateEntry, StateKey, KIND_GENERATION, KIND_OFFLINE,
    KIND_REPLICA,
};
use changelog_core::{ChangelogState, CorruptStateError, Csn, Dn, GenerationId, ServerId};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

pub struct StateStore {
    env: Arc<Environment>,
    writer: Mutex<()>,
    snapshot: RwLock<ChangelogState>,
}

impl StateStore {
    /// Scans the state table and builds the in-memory snapshot. Entries that
    /// fail to decode are returned, not fatal.
    pub fn load(env: Arc<Environment>) -> Result<(Self, Vec<CorruptStateError>)> {
        let decoded = scan(&env)?;
        if !decoded.corrupt.is_empty() {
            metrics::counter!(
                telemetry::CORRUPT_STATE_ENTRIES,
                decoded.corrupt.len() as u64
            );
        }
        info!(
            domains = decoded.state.domains().len(),
            corrupt = decoded.corrupt.len(),
            "Loaded changelog state"
        );

        let store = Self {
            env,
            writer: Mutex::new(()),
            snapshot: RwLock::new(decoded.state),
        };
        Ok((store, decoded.corrupt))
    }

    /// Re-reads the state table from disk. The snapshot is not touched.
    pub fn load_state(&self) -> Result<DecodedState> {
        scan(&self.env)
    }

    pub fn snapshot(&self) -> ChangelogState {
        self.snapshot.read().clone()
    }

    pub fn generation(&self, domain: &Dn) -> Option<GenerationId> {
        self.snapshot.read().generation(domain)
    }

    pub fn replicas(&self, domain: &Dn) -> BTreeSet<ServerId> {
        self.snapshot
            .read()
            .replicas(domain)
            .cloned()
            .unwrap_or_default()
    }

    pub fn has_replica(&self, domain: &Dn, server_id: ServerId) -> bool {
        self.snapshot.read().has_replica(domain, server_id)
    }

    pub fn offline_csn(&self, domain: &Dn, server_id: ServerId) -> Option<Csn> {
        self.snapshot.read().offline_csn(domain, server_id)
    }

    pub fn record_generation(&self, domain: &Dn, generation: GenerationId) -> Result<()> {
        let _writer = self.writer.lock();
        self.persist(domain, &[encode_generation_entry(domain, generation)], &[])?;
        self.snapshot
            .write()
            .set_generation(domain.clone(), generation);
        debug!(domain = %domain, generation = %generation, "Recorded generation");
        Ok(())
    }

    /// Returns false, without writing, if the replica is already known.
    pub fn record_replica(&self, domain: &Dn, server_id: ServerId) -> Result<bool> {
        let _writer = self.writer.lock();
        if self.snapshot.read().has_replica(domain, server_id) {
            return Ok(false);
        }
        self.persist(domain, &[encode_replica_entry(domain, server_id)], &[])?;
        self.snapshot.write().add_replica(domain.clone(), server_id);
        debug!(domain = %domain, server_id = %server_id, "Recorded replica");
        Ok(true)
    }

    /// Deletes the replica entry and its offline marker.
    pub fn remove_replica(&self, domain: &Dn, server_id: ServerId) -> Result<bool> {
        let _writer = self.writer.lock();
        let keys = [
            StateKey::Replica(domain.clone(), server_id).encode(),
            StateKey::Offline(domain.clone(), server_id).encode(),
        ];
        self.persist(domain, &[], &keys)?;
        Ok(self.snapshot.write().remove_replica(domain, server_id))
    }

    pub fn record_replica_offline(&self, domain: &Dn, server_id: ServerId, csn: Csn) -> Result<()> {
        let _writer = self.writer.lock();
        self.persist(domain, &[encode_offline_entry(domain, server_id, &csn)], &[])?;
        self.snapshot
            .write()
            .set_offline(domain.clone(), server_id, csn);
        debug!(domain = %domain, server_id = %server_id, csn = %csn, "Replica went offline");
        Ok(())
    }

    pub fn clear_replica_offline(&self, domain: &Dn, server_id: ServerId) -> Result<bool> {
        let _writer = self.writer.lock();
        if self.snapshot.read().offline_csn(domain, server_id).is_none() {
            return Ok(false);
        }
        let key = StateKey::Offline(domain.clone(), server_id).encode();
        self.persist(domain, &[], &[key])?;
        Ok(self.snapshot.write().clear_offline(domain, server_id))
    }

    /// Deletes every entry of `domain` in one transaction, including entries
    /// that never decoded.
    pub fn clear_domain(&self, domain: &Dn) -> Result<()> {
        let _writer = self.writer.lock();
        self.env.ensure_writable()?;
        let table = self.env.state_table();
        let prefixes = [KIND_GENERATION, KIND_REPLICA, KIND_OFFLINE].map(|kind| domain_prefix(kind, domain));

        self.env.with_env(|env| {
            let clear = || -> heed::Result<usize> {
                let mut wtxn = env.write_txn()?;
                let mut keys = Vec::new();
                for prefix in &prefixes {
                    for entry in table.prefix_iter(&wtxn, prefix.as_slice())? {
                        let (key, _) = entry?;
                        keys.push(key.to_vec());
                    }
                }
                for key in &keys {
                    table.delete(&mut wtxn, key.as_slice())?;
                }
                wtxn.commit()?;
                Ok(keys.len())
            };
            clear().map_err(|source| ChangelogError::StateWrite {
                domain: domain.clone(),
                source,
            })
        })?;

        self.snapshot.write().clear_domain(domain);
        debug!(domain = %domain, "Cleared domain state");
        Ok(())
    }

    /// Commits puts and deletes in one transaction. Caller holds `writer`.
    fn persist(&self, domain: &Dn, puts: &[StateEntry], deletes: &[Vec<u8>]) -> Result<()> {
        self.env.ensure_writable()?;
        let table = self.env.state_table();
        self.env.with_env(|env| {
            let write = || -> heed::Result<()> {
                let mut wtxn = env.write_txn()?;
                for key in deletes {
                    table.delete(&mut wtxn, key.as_slice())?;
                }
                for (key, value) in puts {
                    table.put(&mut wtxn, key.as_slice(), value.as_slice())?;
                }
                wtxn.commit()
            };
            write().map_err(|source| ChangelogError::StateWrite {
                domain: domain.clone(),
                source,
            })
        })
    }
}

fn scan(env: &Environment) -> Result<DecodedState> {
    let table = env.state_table();
    let entries = env.read(|rtxn| {
        let mut entries = Vec::new();
        for entry in table.iter(rtxn)? {
            let (key, value) = entry?;
            entries.push((key.to_vec(), value.to_vec()));
        }
        Ok(entries)
    })?;
    Ok(decode_all(entries))
}
