// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Durable storage for the replication changelog, backed by LMDB.

pub mod config;
pub mod db;
pub mod env;
pub mod error;
pub mod fixtures;
mod maintenance;
pub mod recovery;
pub mod replica_log;
pub mod state_store;
pub mod tables;
pub mod telemetry;

pub use config::{AccessMode, ChangelogConfig, OutOfOrderPolicy};
pub use db::ChangelogDb;
pub use error::{ChangelogError, Result};
pub use recovery::RecoveryReport;
pub use replica_log::{BulkPurgeReport, ChangeIter, LogFailure, PurgeReport, ReplicaLog};

#[cfg(test)]
mod tests;
