// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Change record values.
//!
//! ```text
//! [version:1][payload_len:4 BE][crc64:8 BE][payload]
//! ```
//!
//! The checksum covers the CSN key the value is stored under followed by the
//! payload, so a value that ends up under the wrong key fails verification
//! just like a bit flip does.

use crate::codec::csn::encode_csn_key;
use crate::error::{CodecError, Result};
use crate::record::ChangeRecord;
use crate::types::Csn;
use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;
use crc64fast::Digest;

pub const RECORD_FORMAT_VERSION: u8 = 1;
pub const RECORD_HEADER_LEN: usize = 1 + 4 + 8;

fn checksum(csn: &Csn, payload: &[u8]) -> u64 {
    let mut digest = Digest::new();
    digest.write(&encode_csn_key(csn));
    digest.write(payload);
    digest.sum64()
}

pub fn encode_record_value(record: &ChangeRecord) -> Result<Vec<u8>> {
    let payload_len = u32::try_from(record.payload.len())
        .map_err(|_| CodecError::PayloadTooLarge(record.payload.len()))?;

    let mut buf = vec![0u8; RECORD_HEADER_LEN + record.payload.len()];
    buf[0] = RECORD_FORMAT_VERSION;
    BigEndian::write_u32(&mut buf[1..5], payload_len);
    BigEndian::write_u64(&mut buf[5..13], checksum(&record.csn, &record.payload));
    buf[RECORD_HEADER_LEN..].copy_from_slice(&record.payload);
    Ok(buf)
}

pub fn decode_record_value(csn: Csn, value: &[u8]) -> Result<ChangeRecord> {
    if value.len() < RECORD_HEADER_LEN {
        return Err(CodecError::Truncated {
            expected: RECORD_HEADER_LEN,
            found: value.len(),
        });
    }
    if value[0] != RECORD_FORMAT_VERSION {
        return Err(CodecError::UnsupportedVersion(value[0]));
    }

    let payload_len = BigEndian::read_u32(&value[1..5]) as usize;
    let expected = BigEndian::read_u64(&value[5..13]);
    let payload = &value[RECORD_HEADER_LEN..];
    if payload.len() != payload_len {
        return Err(CodecError::Truncated {
            expected: RECORD_HEADER_LEN + payload_len,
            found: value.len(),
        });
    }

    let found = checksum(&csn, payload);
    if found != expected {
        return Err(CodecError::ChecksumMismatch { expected, found });
    }

    Ok(ChangeRecord {
        csn,
        payload: Bytes::copy_from_slice(payload),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ServerId;

    fn record() -> ChangeRecord {
        let csn = Csn::new(1_700_000_000_000, ServerId(42), 7).unwrap();
        ChangeRecord::new(csn, &b"changetype: modify"[..])
    }

    #[test]
    fn test_value_round_trip() {
        let rec = record();
        let value = encode_record_value(&rec).unwrap();
        assert_eq!(value.len(), RECORD_HEADER_LEN + rec.payload.len());
        assert_eq!(decode_record_value(rec.csn, &value).unwrap(), rec);
    }

    #[test]
    fn test_detects_bit_flip() {
        let rec = record();
        let mut value = encode_record_value(&rec).unwrap();
        let last = value.len() - 1;
        value[last] ^= 0x01;
        assert!(matches!(
            decode_record_value(rec.csn, &value),
            Err(CodecError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_detects_wrong_key() {
        let rec = record();
        let value = encode_record_value(&rec).unwrap();
        let other = Csn::new(1_700_000_000_001, ServerId(42), 7).unwrap();
        assert!(decode_record_value(other, &value).is_err());
    }

    #[test]
    fn test_rejects_truncation_and_version() {
        let rec = record();
        let value = encode_record_value(&rec).unwrap();
        assert!(matches!(
            decode_record_value(rec.csn, &value[..5]),
            Err(CodecError::Truncated { .. })
        ));
        assert!(matches!(
            decode_record_value(rec.csn, &value[..value.len() - 1]),
            Err(CodecError::Truncated { .. })
        ));

        let mut bumped = value.clone();
        bumped[0] = 9;
        assert_eq!(
            decode_record_value(rec.csn, &bumped),
            Err(CodecError::UnsupportedVersion(9))
        );
    }

    #[test]
    fn test_empty_payload() {
        let csn = Csn::new(5, ServerId(-3), 0).unwrap();
        let rec = ChangeRecord::new(csn, Bytes::new());
        let value = encode_record_value(&rec).unwrap();
        assert_eq!(decode_record_value(csn, &value).unwrap(), rec);
    }
}
