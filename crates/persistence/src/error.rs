// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use changelog_core::{CodecError, Csn, Dn, ServerId};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChangelogError {
    #[error("Failed to open changelog environment at {}: {source}", .path.display())]
    EnvironmentOpen {
        path: PathBuf,
        #[source]
        source: heed::Error,
    },
    #[error("Changelog environment is closed")]
    EnvironmentClosed,
    #[error("CSN {csn} already present in {table}")]
    DuplicateCsn { table: String, csn: Csn },
    #[error("CSN {csn} is older than newest {newest} in {table} beyond the clock skew tolerance")]
    OutOfOrderCsn { table: String, csn: Csn, newest: Csn },
    #[error("Record {csn} originates from server {found}, log {table} belongs to server {expected}")]
    ReplicaMismatch {
        table: String,
        csn: Csn,
        expected: ServerId,
        found: ServerId,
    },
    #[error("Failed to persist state of domain {domain:?}: {source}")]
    StateWrite {
        domain: Dn,
        #[source]
        source: heed::Error,
    },
    #[error("Corrupt record {csn} in {table}: {source}")]
    CorruptRecord {
        table: String,
        csn: Csn,
        #[source]
        source: CodecError,
    },
    #[error("Domain {domain:?} hashes to the same table prefix as {existing:?}")]
    DomainDigestCollision { domain: Dn, existing: String },
    #[error("Changelog environment is open read-only")]
    ReadOnly,
    #[error("Invalid table name {name:?}: {reason}")]
    TableName { name: String, reason: String },
    #[error("Storage error: {0}")]
    Storage(#[from] heed::Error),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("Invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ChangelogError>;
