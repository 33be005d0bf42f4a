// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Order-preserving CSN keys.
//!
//! Layout (12 bytes, big-endian): `[timestamp:6][server id ^ sign bit:4][seq:2]`.
//! Byte-wise comparison of two keys gives the same answer as comparing the
//! CSNs, which is what makes range scans and range deletes correct.

use crate::error::{CodecError, Result};
use crate::types::{Csn, ServerId};
use byteorder::{BigEndian, ByteOrder};

pub const CSN_KEY_LEN: usize = 6 + 4 + 2;

pub fn encode_csn_key(csn: &Csn) -> [u8; CSN_KEY_LEN] {
    let mut key = [0u8; CSN_KEY_LEN];
    BigEndian::write_u48(&mut key[0..6], csn.timestamp_ms());
    BigEndian::write_u32(&mut key[6..10], csn.server_id().to_biased());
    BigEndian::write_u16(&mut key[10..12], csn.seq());
    key
}

pub fn decode_csn_key(bytes: &[u8]) -> Result<Csn> {
    if bytes.len() != CSN_KEY_LEN {
        return Err(CodecError::InvalidCsnKey {
            expected: CSN_KEY_LEN,
            found: bytes.len(),
        });
    }
    let timestamp_ms = BigEndian::read_u48(&bytes[0..6]);
    let server_id = ServerId::from_biased(BigEndian::read_u32(&bytes[6..10]));
    let seq = BigEndian::read_u16(&bytes[10..12]);
    Csn::new(timestamp_ms, server_id, seq)
}
