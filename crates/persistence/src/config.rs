// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::error::{ChangelogError, Result};
use changelog_core::{ByteSize, SizeUnit};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The state, domain and runtime tables, on top of the per-replica logs.
const RESERVED_TABLES: u32 = 3;

/// What to do with a record whose CSN is older than the newest one in its
/// log by more than the clock skew tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutOfOrderPolicy {
    /// Refuse the append with `OutOfOrderCsn`.
    #[default]
    Reject,
    /// Log a warning and store the record at its CSN position.
    Warn,
}

/// How a process uses the changelog directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    /// The server owning the directory. Writes the runtime sentinel,
    /// recovers after a crash and runs maintenance.
    #[default]
    Owner,
    /// A tool working next to the owner. Writes records and state but leaves
    /// the sentinel, recovery and maintenance to the owner.
    Attach,
    /// Like `Attach`, and every write fails with `ReadOnly`.
    ReadOnly,
}

impl AccessMode {
    pub fn is_owner(self) -> bool {
        self == AccessMode::Owner
    }

    pub fn allows_writes(self) -> bool {
        self != AccessMode::ReadOnly
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangelogConfig {
    pub path: PathBuf,
    pub map_size: ByteSize,
    pub max_tables: u32,
    pub clock_skew_tolerance_ms: u64,
    pub out_of_order: OutOfOrderPolicy,
    pub iterate_batch_size: usize,
    pub checkpoint_interval_secs: Option<u64>,
    pub retention_secs: Option<u64>,
    pub access: AccessMode,
}

impl Default for ChangelogConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("changelogDb"),
            map_size: ByteSize(SizeUnit::GibiBytes.size()),
            max_tables: 1024,
            clock_skew_tolerance_ms: 5_000,
            out_of_order: OutOfOrderPolicy::Reject,
            iterate_batch_size: 256,
            checkpoint_interval_secs: None,
            retention_secs: None,
            access: AccessMode::Owner,
        }
    }
}

impl ChangelogConfig {
    /// Defaults rooted at `path`.
    pub fn at(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.map_size.as_u64() == 0 {
            return Err(ChangelogError::Config("map_size must be positive".into()));
        }
        if usize::try_from(self.map_size.as_u64()).is_err() {
            return Err(ChangelogError::Config(format!(
                "map_size {} exceeds the address space",
                self.map_size
            )));
        }
        if self.max_tables <= RESERVED_TABLES {
            return Err(ChangelogError::Config(format!(
                "max_tables must exceed {RESERVED_TABLES}, got {}",
                self.max_tables
            )));
        }
        if self.iterate_batch_size == 0 {
            return Err(ChangelogError::Config(
                "iterate_batch_size must be positive".into(),
            ));
        }
        if self.checkpoint_interval_secs == Some(0) {
            return Err(ChangelogError::Config(
                "checkpoint_interval_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn checkpoint_interval(&self) -> Option<Duration> {
        self.checkpoint_interval_secs.map(Duration::from_secs)
    }

    pub fn retention(&self) -> Option<Duration> {
        self.retention_secs.map(Duration::from_secs)
    }
}
