// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Error types.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Timestamp {0} does not fit in 48 bits")]
    TimestampOverflow(u64),
    #[error("Invalid CSN text: {0:?}")]
    InvalidCsnText(String),
    #[error("Invalid CSN key: expected {expected} bytes, found {found}")]
    InvalidCsnKey { expected: usize, found: usize },
    #[error("Invalid DN {dn:?}: {reason}")]
    InvalidDn { dn: String, reason: String },
    #[error("Unsupported format version {0}")]
    UnsupportedVersion(u8),
    #[error("Truncated value: expected {expected} bytes, found {found}")]
    Truncated { expected: usize, found: usize },
    #[error("Payload of {0} bytes exceeds the 4 GiB record limit")]
    PayloadTooLarge(usize),
    #[error("Checksum mismatch: expected {expected:#018x}, found {found:#018x}")]
    ChecksumMismatch { expected: u64, found: u64 },
}

pub type Result<T> = std::result::Result<T, CodecError>;

/// Why a state entry could not be decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CorruptReason {
    #[error("unknown entry kind {0:#04x}")]
    UnknownKind(u8),
    #[error("malformed key: {0}")]
    MalformedKey(String),
    #[error("malformed value: {0}")]
    MalformedValue(String),
    /// A replica entry whose value names a different server than its key.
    #[error("key names server {key} but value names {value}")]
    ServerIdMismatch { key: i32, value: i32 },
}

/// One state entry skipped while rebuilding the changelog state.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Corrupt state entry {}: {reason}", hex_prefix(.key))]
pub struct CorruptStateError {
    pub key: Vec<u8>,
    pub reason: CorruptReason,
}

fn hex_prefix(bytes: &[u8]) -> String {
    let mut out = hex::encode(&bytes[..bytes.len().min(32)]);
    if bytes.len() > 32 {
        out.push_str("..");
    }
    out
}
