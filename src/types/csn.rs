// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Change sequence numbers.

use crate::error::{CodecError, Result};
use crate::types::id::ServerId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Largest timestamp representable in the 48-bit field.
pub const MAX_TIMESTAMP_MS: u64 = (1 << 48) - 1;

/// Length of the textual form: 12 hex digits timestamp, 8 server id, 4 seq.
pub const CSN_TEXT_LEN: usize = 24;

/// Logical clock value identifying one change.
///
/// Ordering is timestamp-major, then server id, then sequence number. The
/// field order below is what makes the derived `Ord` correct.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Csn {
    timestamp_ms: u64,
    server_id: ServerId,
    seq: u16,
}

impl Csn {
    pub fn new(timestamp_ms: u64, server_id: ServerId, seq: u16) -> Result<Self> {
        if timestamp_ms > MAX_TIMESTAMP_MS {
            return Err(CodecError::TimestampOverflow(timestamp_ms));
        }
        Ok(Self {
            timestamp_ms,
            server_id,
            seq,
        })
    }

    /// Smallest CSN carrying the given timestamp, whatever its origin.
    /// Used as an exclusive purge bound for time-based retention.
    pub fn first_at(timestamp_ms: u64) -> Self {
        Self {
            timestamp_ms: timestamp_ms.min(MAX_TIMESTAMP_MS),
            server_id: ServerId(i32::MIN),
            seq: 0,
        }
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    pub fn server_id(&self) -> ServerId {
        self.server_id
    }

    pub fn seq(&self) -> u16 {
        self.seq
    }
}

impl fmt::Display for Csn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:012x}{:08x}{:04x}",
            self.timestamp_ms, self.server_id.0 as u32, self.seq
        )
    }
}

impl FromStr for Csn {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.len() != CSN_TEXT_LEN || !s.is_ascii() {
            return Err(CodecError::InvalidCsnText(s.to_string()));
        }
        let bad = |_| CodecError::InvalidCsnText(s.to_string());
        let timestamp_ms = u64::from_str_radix(&s[0..12], 16).map_err(bad)?;
        let server = u32::from_str_radix(&s[12..20], 16).map_err(bad)?;
        let seq = u16::from_str_radix(&s[20..24], 16).map_err(bad)?;
        Csn::new(timestamp_ms, ServerId(server as i32), seq)
    }
}
