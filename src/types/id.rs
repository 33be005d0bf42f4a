// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Identity types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Replica (server) identifier. Scoped to a domain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ServerId(pub i32);

impl ServerId {
    /// Order-preserving unsigned form: flips the sign bit so that big-endian
    /// bytes sort the same way as the signed value.
    pub fn to_biased(self) -> u32 {
        (self.0 as u32) ^ 0x8000_0000
    }

    pub fn from_biased(raw: u32) -> Self {
        ServerId((raw ^ 0x8000_0000) as i32)
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for ServerId {
    fn from(v: i32) -> Self {
        ServerId(v)
    }
}

/// Epoch marker of a domain. A new value invalidates all earlier history.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[repr(transparent)]
pub struct GenerationId(pub u64);

impl fmt::Display for GenerationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for GenerationId {
    fn from(v: u64) -> Self {
        GenerationId(v)
    }
}
