// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Replicated change records.

use crate::types::{Csn, ServerId};
use bytes::Bytes;

/// One replicated mutation. The payload is the serialized operation and is
/// never interpreted by the changelog.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeRecord {
    pub csn: Csn,
    pub payload: Bytes,
}

impl ChangeRecord {
    pub fn new(csn: Csn, payload: impl Into<Bytes>) -> Self {
        Self {
            csn,
            payload: payload.into(),
        }
    }

    /// Replica that originated the change.
    pub fn server_id(&self) -> ServerId {
        self.csn.server_id()
    }
}
