// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! State table entries.
//!
//! Keys never embed a domain between delimiters. Every key starts with a
//! kind byte and a length-prefixed normalized DN, so no character a DN may
//! contain (spaces included) can be mistaken for structure:
//!
//! ```text
//! generation: [0x01][dn_len:4 BE][dn]
//! replica:    [0x02][dn_len:4 BE][dn][server id ^ sign bit:4 BE]
//! offline:    [0x03][dn_len:4 BE][dn][server id ^ sign bit:4 BE]
//! ```
//!
//! Values start with a format version byte followed by the generation id
//! (u64 BE), the server id (i32 BE, must match the key) or the 12-byte CSN
//! key of the offline marker.

use crate::codec::csn::{decode_csn_key, encode_csn_key, CSN_KEY_LEN};
use crate::error::{CorruptReason, CorruptStateError};
use crate::state::ChangelogState;
use crate::types::{Csn, Dn, GenerationId, ServerId};
use byteorder::{BigEndian, ReadBytesExt};
use std::io::{Cursor, Read};

pub const STATE_FORMAT_VERSION: u8 = 1;

pub const KIND_GENERATION: u8 = 0x01;
pub const KIND_REPLICA: u8 = 0x02;
pub const KIND_OFFLINE: u8 = 0x03;

/// Encoded (key, value) pair ready for the state table.
pub type StateEntry = (Vec<u8>, Vec<u8>);

/// Classified state key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateKey {
    Generation(Dn),
    Replica(Dn, ServerId),
    Offline(Dn, ServerId),
}

impl StateKey {
    pub fn domain(&self) -> &Dn {
        match self {
            StateKey::Generation(dn) | StateKey::Replica(dn, _) | StateKey::Offline(dn, _) => dn,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            StateKey::Generation(dn) => domain_key(KIND_GENERATION, dn, None),
            StateKey::Replica(dn, id) => domain_key(KIND_REPLICA, dn, Some(*id)),
            StateKey::Offline(dn, id) => domain_key(KIND_OFFLINE, dn, Some(*id)),
        }
    }

    pub fn decode(key: &[u8]) -> Result<Self, CorruptReason> {
        let mut cursor = Cursor::new(key);
        let kind = cursor
            .read_u8()
            .map_err(|_| CorruptReason::MalformedKey("empty key".into()))?;
        if !matches!(kind, KIND_GENERATION | KIND_REPLICA | KIND_OFFLINE) {
            return Err(CorruptReason::UnknownKind(kind));
        }

        let dn_len = cursor
            .read_u32::<BigEndian>()
            .map_err(|_| CorruptReason::MalformedKey("missing domain length".into()))?
            as usize;
        let remaining = key.len() - cursor.position() as usize;
        if dn_len > remaining {
            return Err(CorruptReason::MalformedKey(format!(
                "domain length {dn_len} exceeds remaining {remaining} bytes"
            )));
        }
        let mut dn_bytes = vec![0u8; dn_len];
        cursor
            .read_exact(&mut dn_bytes)
            .map_err(|e| CorruptReason::MalformedKey(e.to_string()))?;
        let dn_text = String::from_utf8(dn_bytes)
            .map_err(|_| CorruptReason::MalformedKey("domain is not UTF-8".into()))?;
        let dn = Dn::parse(&dn_text).map_err(|e| CorruptReason::MalformedKey(e.to_string()))?;
        if dn.as_str() != dn_text {
            return Err(CorruptReason::MalformedKey(format!(
                "domain {dn_text:?} is not in normalized form"
            )));
        }

        let parsed = match kind {
            KIND_GENERATION => StateKey::Generation(dn),
            _ => {
                let raw = cursor
                    .read_u32::<BigEndian>()
                    .map_err(|_| CorruptReason::MalformedKey("missing server id".into()))?;
                let id = ServerId::from_biased(raw);
                if kind == KIND_REPLICA {
                    StateKey::Replica(dn, id)
                } else {
                    StateKey::Offline(dn, id)
                }
            }
        };

        if (cursor.position() as usize) != key.len() {
            return Err(CorruptReason::MalformedKey(format!(
                "{} trailing bytes",
                key.len() - cursor.position() as usize
            )));
        }
        Ok(parsed)
    }
}

fn domain_key(kind: u8, domain: &Dn, server_id: Option<ServerId>) -> Vec<u8> {
    let dn = domain.as_str().as_bytes();
    let mut key = Vec::with_capacity(1 + 4 + dn.len() + 4);
    key.push(kind);
    key.extend_from_slice(&(dn.len() as u32).to_be_bytes());
    key.extend_from_slice(dn);
    if let Some(id) = server_id {
        key.extend_from_slice(&id.to_biased().to_be_bytes());
    }
    key
}

/// Prefix shared by every key of `kind` that belongs to exactly `domain`.
/// The length field keeps longer domains with the same leading bytes out.
pub fn domain_prefix(kind: u8, domain: &Dn) -> Vec<u8> {
    domain_key(kind, domain, None)
}

pub fn encode_generation_entry(domain: &Dn, generation: GenerationId) -> StateEntry {
    let mut value = Vec::with_capacity(9);
    value.push(STATE_FORMAT_VERSION);
    value.extend_from_slice(&generation.0.to_be_bytes());
    (StateKey::Generation(domain.clone()).encode(), value)
}

pub fn encode_replica_entry(domain: &Dn, server_id: ServerId) -> StateEntry {
    let mut value = Vec::with_capacity(5);
    value.push(STATE_FORMAT_VERSION);
    value.extend_from_slice(&server_id.0.to_be_bytes());
    (StateKey::Replica(domain.clone(), server_id).encode(), value)
}

pub fn encode_offline_entry(domain: &Dn, server_id: ServerId, csn: &Csn) -> StateEntry {
    let mut value = Vec::with_capacity(1 + CSN_KEY_LEN);
    value.push(STATE_FORMAT_VERSION);
    value.extend_from_slice(&encode_csn_key(csn));
    (StateKey::Offline(domain.clone(), server_id).encode(), value)
}

/// A fully decoded state entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateRecord {
    Generation(Dn, GenerationId),
    Replica(Dn, ServerId),
    Offline(Dn, ServerId, Csn),
}

pub fn decode_entry(key: &[u8], value: &[u8]) -> Result<StateRecord, CorruptReason> {
    let parsed = StateKey::decode(key)?;

    let (&version, body) = value
        .split_first()
        .ok_or_else(|| CorruptReason::MalformedValue("empty value".into()))?;
    if version != STATE_FORMAT_VERSION {
        return Err(CorruptReason::MalformedValue(format!(
            "unsupported version {version}"
        )));
    }

    let width = |expected: usize| {
        if body.len() == expected {
            Ok(())
        } else {
            Err(CorruptReason::MalformedValue(format!(
                "expected {expected} bytes, found {}",
                body.len()
            )))
        }
    };

    match parsed {
        StateKey::Generation(dn) => {
            width(8)?;
            let generation = Cursor::new(body)
                .read_u64::<BigEndian>()
                .map_err(|e| CorruptReason::MalformedValue(e.to_string()))?;
            Ok(StateRecord::Generation(dn, GenerationId(generation)))
        }
        StateKey::Replica(dn, id) => {
            width(4)?;
            let stored = Cursor::new(body)
                .read_i32::<BigEndian>()
                .map_err(|e| CorruptReason::MalformedValue(e.to_string()))?;
            if stored != id.0 {
                return Err(CorruptReason::ServerIdMismatch {
                    key: id.0,
                    value: stored,
                });
            }
            Ok(StateRecord::Replica(dn, id))
        }
        StateKey::Offline(dn, id) => {
            width(CSN_KEY_LEN)?;
            let csn =
                decode_csn_key(body).map_err(|e| CorruptReason::MalformedValue(e.to_string()))?;
            Ok(StateRecord::Offline(dn, id, csn))
        }
    }
}

/// Result of folding the whole state table.
#[derive(Debug, Default)]
pub struct DecodedState {
    pub state: ChangelogState,
    pub corrupt: Vec<CorruptStateError>,
}

/// Rebuilds the changelog state from every persisted entry.
///
/// An entry that cannot be classified or parsed is logged and skipped; the
/// remaining entries still decode.
pub fn decode_all<I, K, V>(entries: I) -> DecodedState
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<[u8]>,
    V: AsRef<[u8]>,
{
    let mut decoded = DecodedState::default();

    for (key, value) in entries {
        let key = key.as_ref();
        match decode_entry(key, value.as_ref()) {
            Ok(StateRecord::Generation(dn, generation)) => {
                decoded.state.set_generation(dn, generation);
            }
            Ok(StateRecord::Replica(dn, id)) => {
                decoded.state.add_replica(dn, id);
            }
            Ok(StateRecord::Offline(dn, id, csn)) => {
                decoded.state.set_offline(dn, id, csn);
            }
            Err(reason) => {
                let err = CorruptStateError {
                    key: key.to_vec(),
                    reason,
                };
                tracing::warn!("Skipping state entry: {}", err);
                decoded.corrupt.push(err);
            }
        }
    }

    decoded
}
