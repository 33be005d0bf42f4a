// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Per-(domain, replica) change logs.
//!
//! Appends to one log are serialized by the log's own mutex. Iteration runs
//! alongside appends and purges: each [`ChangeIter`] refill opens its own read
//! transaction and no cursor outlives a batch. Every live iterator registers a
//! low-water CSN, and `purge_before` never removes anything at or above it.

use crate::config::{ChangelogConfig, OutOfOrderPolicy};
use crate::env::Environment;
use crate::error::{ChangelogError, Result};
use crate::tables::{replica_table_name, CsnKey};
use crate::telemetry;
use changelog_core::codec::{decode_record_value, encode_record_value};
use changelog_core::{ChangeRecord, Csn, Dn, ServerId};
use heed::types::Bytes;
use heed::Database;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

pub type LogTable = Database<CsnKey, Bytes>;

/// Append and iteration settings shared by every log.
#[derive(Debug, Clone, Copy)]
pub struct LogOptions {
    pub out_of_order: OutOfOrderPolicy,
    pub clock_skew_tolerance_ms: u64,
    pub iterate_batch_size: usize,
}

impl From<&ChangelogConfig> for LogOptions {
    fn from(config: &ChangelogConfig) -> Self {
        Self {
            out_of_order: config.out_of_order,
            clock_skew_tolerance_ms: config.clock_skew_tolerance_ms,
            iterate_batch_size: config.iterate_batch_size,
        }
    }
}

/// Outcome of a purge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurgeReport {
    pub requested: Csn,
    /// Bound actually applied, lowered to the oldest position an open
    /// iterator still needs.
    pub effective: Csn,
    pub removed: usize,
}

impl PurgeReport {
    pub fn clamped(&self) -> bool {
        self.effective < self.requested
    }
}

/// Outcome of purging every known log. A log that fails is reported and the
/// others are still purged.
#[derive(Debug, Default)]
pub struct BulkPurgeReport {
    pub removed: usize,
    pub failed: Vec<LogFailure>,
}

#[derive(Debug)]
pub struct LogFailure {
    pub domain: Dn,
    pub server_id: ServerId,
    pub error: ChangelogError,
}

impl BulkPurgeReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Low-water marks of the live iterators of one log.
#[derive(Debug, Default)]
struct CursorRegistry {
    next_id: AtomicU64,
    marks: Mutex<BTreeMap<u64, Csn>>,
}

impl CursorRegistry {
    fn register(&self, from: Csn) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.marks.lock().insert(id, from);
        id
    }

    fn advance(&self, id: u64, to: Csn) {
        if let Some(mark) = self.marks.lock().get_mut(&id) {
            *mark = to;
        }
    }

    fn unregister(&self, id: u64) {
        self.marks.lock().remove(&id);
    }

    fn low_water(&self) -> Option<Csn> {
        self.marks.lock().values().min().copied()
    }
}

pub struct ReplicaLog {
    env: Arc<Environment>,
    table: LogTable,
    name: String,
    domain: Dn,
    server_id: ServerId,
    options: LogOptions,
    append_lock: Mutex<()>,
    newest: RwLock<Option<Csn>>,
    cursors: CursorRegistry,
}

impl ReplicaLog {
    /// Opens the log table, creating it if absent. The domain is registered
    /// first so the table name can always be resolved back to it.
    pub fn open(
        env: Arc<Environment>,
        domain: &Dn,
        server_id: ServerId,
        options: LogOptions,
    ) -> Result<Self> {
        env.register_domain(domain)?;
        let name = replica_table_name(domain, server_id);
        let table: LogTable = env.open_or_create_table(&name)?.remap_key_type::<CsnKey>();
        let newest = env.read(|rtxn| Ok(table.last(rtxn)?.map(|(csn, _)| csn)))?;
        debug!(table = %name, newest = ?newest.map(|c| c.to_string()), "Opened replica log");

        Ok(Self {
            env,
            table,
            name,
            domain: domain.clone(),
            server_id,
            options,
            append_lock: Mutex::new(()),
            newest: RwLock::new(newest),
            cursors: CursorRegistry::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn domain(&self) -> &Dn {
        &self.domain
    }

    pub fn server_id(&self) -> ServerId {
        self.server_id
    }

    /// Durably appends one record.
    pub fn append(&self, record: &ChangeRecord) -> Result<()> {
        let csn = record.csn;
        if record.server_id() != self.server_id {
            return Err(ChangelogError::ReplicaMismatch {
                table: self.name.clone(),
                csn,
                expected: self.server_id,
                found: record.server_id(),
            });
        }
        let value = encode_record_value(record)?;
        let started = Instant::now();

        let _append = self.append_lock.lock();
        let newest = *self.newest.read();

        self.env.write(|wtxn| {
            if self.table.get(wtxn, &csn)?.is_some() {
                return Err(ChangelogError::DuplicateCsn {
                    table: self.name.clone(),
                    csn,
                });
            }
            if let Some(newest) = newest {
                self.check_order(csn, newest)?;
            }
            self.table.put(wtxn, &csn, value.as_slice())?;
            Ok(())
        })?;

        *self.newest.write() = Some(newest.map_or(csn, |n| n.max(csn)));
        metrics::counter!(telemetry::RECORDS_APPENDED, 1);
        metrics::histogram!(telemetry::APPEND_DURATION, started.elapsed().as_secs_f64());
        Ok(())
    }

    fn check_order(&self, csn: Csn, newest: Csn) -> Result<()> {
        let limit = csn
            .timestamp_ms()
            .saturating_add(self.options.clock_skew_tolerance_ms);
        if limit >= newest.timestamp_ms() {
            return Ok(());
        }
        match self.options.out_of_order {
            OutOfOrderPolicy::Reject => Err(ChangelogError::OutOfOrderCsn {
                table: self.name.clone(),
                csn,
                newest,
            }),
            OutOfOrderPolicy::Warn => {
                warn!(table = %self.name, csn = %csn, newest = %newest, "Accepting out-of-order CSN");
                Ok(())
            }
        }
    }

    /// Ascending iteration over every record with CSN >= `from`, up to the
    /// newest record present now.
    pub fn iterate_from(self: &Arc<Self>, from: Csn) -> Result<ChangeIter> {
        if !self.env.is_open() {
            return Err(ChangelogError::EnvironmentClosed);
        }
        let cursor_id = self.cursors.register(from);
        Ok(ChangeIter {
            log: Arc::clone(self),
            cursor_id,
            next_from: Bound::Included(from),
            ceiling: self.newest_csn(),
            buffer: VecDeque::new(),
            failure: None,
            exhausted: false,
        })
    }

    /// Deletes records with CSN < `bound`, lowered to the low-water mark of
    /// any open iterator.
    pub fn purge_before(&self, bound: Csn) -> Result<PurgeReport> {
        let _append = self.append_lock.lock();
        let effective = match self.cursors.low_water() {
            Some(mark) if mark < bound => {
                warn!(
                    table = %self.name,
                    requested = %bound,
                    effective = %mark,
                    "Purge clamped by an open iterator"
                );
                mark
            }
            _ => bound,
        };

        let removed = self
            .env
            .write(|wtxn| Ok(self.table.delete_range(wtxn, &(..effective))?))?;

        let mut newest = self.newest.write();
        if newest.is_some_and(|n| n < effective) {
            *newest = None;
        }
        drop(newest);

        if removed > 0 {
            metrics::counter!(telemetry::RECORDS_PURGED, removed as u64);
            debug!(table = %self.name, removed, bound = %effective, "Purged records");
        }
        Ok(PurgeReport {
            requested: bound,
            effective,
            removed,
        })
    }

    pub fn oldest_csn(&self) -> Result<Option<Csn>> {
        self.env
            .read(|rtxn| Ok(self.table.first(rtxn)?.map(|(csn, _)| csn)))
    }

    pub fn newest_csn(&self) -> Option<Csn> {
        *self.newest.read()
    }

    pub fn get(&self, csn: Csn) -> Result<Option<ChangeRecord>> {
        let value = self
            .env
            .read(|rtxn| Ok(self.table.get(rtxn, &csn)?.map(<[u8]>::to_vec)))?;
        value
            .map(|bytes| self.decode(csn, &bytes))
            .transpose()
    }

    pub fn count(&self) -> Result<u64> {
        self.env.read(|rtxn| Ok(self.table.len(rtxn)?))
    }

    /// Removes every record.
    pub fn clear(&self) -> Result<()> {
        let _append = self.append_lock.lock();
        self.env.write(|wtxn| Ok(self.table.clear(wtxn)?))?;
        *self.newest.write() = None;
        debug!(table = %self.name, "Cleared replica log");
        Ok(())
    }

    /// True when a peer asking for changes from `from` can no longer be
    /// served incrementally because older records were purged.
    pub fn requires_full_resync(&self, from: Csn) -> Result<bool> {
        Ok(self.oldest_csn()?.is_some_and(|oldest| from < oldest))
    }

    fn decode(&self, csn: Csn, bytes: &[u8]) -> Result<ChangeRecord> {
        decode_record_value(csn, bytes).map_err(|source| ChangelogError::CorruptRecord {
            table: self.name.clone(),
            csn,
            source,
        })
    }

    /// Reads up to one batch. A record that fails to decode ends the batch;
    /// the records before it are still returned alongside the failure.
    fn read_batch(
        &self,
        from: Bound<Csn>,
        ceiling: Csn,
    ) -> Result<(Vec<ChangeRecord>, Option<ChangelogError>)> {
        let limit = self.options.iterate_batch_size;
        self.env.read(|rtxn| {
            let mut batch = Vec::with_capacity(limit);
            for entry in self.table.range(rtxn, &(from, Bound::Included(ceiling)))? {
                let decoded = entry
                    .map_err(ChangelogError::from)
                    .and_then(|(csn, bytes)| self.decode(csn, bytes));
                match decoded {
                    Ok(record) => batch.push(record),
                    Err(e) => return Ok((batch, Some(e))),
                }
                if batch.len() == limit {
                    break;
                }
            }
            Ok((batch, None))
        })
    }
}

/// Lazy, batched, ascending iteration over one log.
///
/// The ceiling is the newest CSN when the iterator was created (or last
/// restarted). A failure is yielded once, after which the iterator is
/// exhausted; callers can tell it apart from a clean end. Dropping the
/// iterator releases its low-water registration.
pub struct ChangeIter {
    log: Arc<ReplicaLog>,
    cursor_id: u64,
    next_from: Bound<Csn>,
    ceiling: Option<Csn>,
    buffer: VecDeque<ChangeRecord>,
    failure: Option<ChangelogError>,
    exhausted: bool,
}

impl ChangeIter {
    /// Starts over from `from`, picking up records appended since creation.
    pub fn restart_from(&mut self, from: Csn) {
        self.log.cursors.advance(self.cursor_id, from);
        self.next_from = Bound::Included(from);
        self.ceiling = self.log.newest_csn();
        self.buffer.clear();
        self.failure = None;
        self.exhausted = false;
    }

    pub fn ceiling(&self) -> Option<Csn> {
        self.ceiling
    }

    fn refill(&mut self) -> Result<()> {
        let Some(ceiling) = self.ceiling else {
            self.exhausted = true;
            return Ok(());
        };
        let empty = match self.next_from {
            Bound::Included(from) => from > ceiling,
            Bound::Excluded(from) => from >= ceiling,
            Bound::Unbounded => false,
        };
        if empty {
            self.exhausted = true;
            return Ok(());
        }

        let (batch, failure) = self.log.read_batch(self.next_from, ceiling)?;
        if failure.is_some() || batch.len() < self.log.options.iterate_batch_size {
            self.exhausted = true;
        }
        self.failure = failure;
        if let Some(last) = batch.last() {
            self.next_from = Bound::Excluded(last.csn);
        }
        self.buffer.extend(batch);
        Ok(())
    }
}

impl Iterator for ChangeIter {
    type Item = Result<ChangeRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.refill() {
                self.exhausted = true;
                return Some(Err(e));
            }
        }
        match self.buffer.pop_front() {
            Some(record) => {
                self.log.cursors.advance(self.cursor_id, record.csn);
                Some(Ok(record))
            }
            None => self.failure.take().map(Err),
        }
    }
}

impl Drop for ChangeIter {
    fn drop(&mut self) {
        self.log.cursors.unregister(self.cursor_id);
    }
}

/// Open logs keyed by table name, created lazily on first access.
pub struct LogRegistry {
    env: Arc<Environment>,
    options: LogOptions,
    logs: RwLock<HashMap<String, Arc<ReplicaLog>>>,
}

impl LogRegistry {
    pub fn new(env: Arc<Environment>, options: LogOptions) -> Self {
        Self {
            env,
            options,
            logs: RwLock::new(HashMap::new()),
        }
    }

    pub fn get_or_open(&self, domain: &Dn, server_id: ServerId) -> Result<Arc<ReplicaLog>> {
        let name = replica_table_name(domain, server_id);
        if let Some(log) = self.logs.read().get(&name) {
            return Ok(Arc::clone(log));
        }

        let mut logs = self.logs.write();
        if let Some(log) = logs.get(&name) {
            return Ok(Arc::clone(log));
        }
        let log = Arc::new(ReplicaLog::open(
            Arc::clone(&self.env),
            domain,
            server_id,
            self.options,
        )?);
        logs.insert(name, Arc::clone(&log));
        Ok(log)
    }

    pub fn forget(&self, domain: &Dn, server_id: ServerId) {
        self.logs
            .write()
            .remove(&replica_table_name(domain, server_id));
    }

    pub fn clear(&self) {
        self.logs.write().clear();
    }
}
