// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Table naming and the heed codec for CSN keys.

use changelog_core::codec::{decode_csn_key, encode_csn_key};
use changelog_core::{Csn, Dn, ServerId};
use heed::{BoxedError, BytesDecode, BytesEncode};
use std::borrow::Cow;

pub const STATE_TABLE: &str = "changelog_state";
pub const RUNTIME_TABLE: &str = "runtime_state";
/// Domain digest to normalized DN, one entry per domain with a log.
pub const DOMAIN_TABLE: &str = "changelog_domains";
pub const REPLICA_TABLE_PREFIX: &str = "changelog/";

/// LMDB stores table names as keys of its main database.
pub const MAX_TABLE_NAME_LEN: usize = 511;

/// Keys of a replica log table: 12-byte order-preserving CSNs.
pub enum CsnKey {}

impl<'a> BytesEncode<'a> for CsnKey {
    type EItem = Csn;

    fn bytes_encode(item: &'a Self::EItem) -> std::result::Result<Cow<'a, [u8]>, BoxedError> {
        Ok(Cow::Owned(encode_csn_key(item).to_vec()))
    }
}

impl<'a> BytesDecode<'a> for CsnKey {
    type DItem = Csn;

    fn bytes_decode(bytes: &'a [u8]) -> std::result::Result<Self::DItem, BoxedError> {
        decode_csn_key(bytes).map_err(Into::into)
    }
}

/// Bytes of the BLAKE3 hash of a normalized DN kept in table names.
pub const DOMAIN_DIGEST_LEN: usize = 16;

pub type DomainDigest = [u8; DOMAIN_DIGEST_LEN];

pub fn domain_digest(domain: &Dn) -> DomainDigest {
    let hash = blake3::hash(domain.as_str().as_bytes());
    let mut digest = [0u8; DOMAIN_DIGEST_LEN];
    digest.copy_from_slice(&hash.as_bytes()[..DOMAIN_DIGEST_LEN]);
    digest
}

/// `changelog/<hex digest of normalized dn>/<server id>`. The length does not
/// depend on the DN; [`DOMAIN_TABLE`] maps the digest back to it.
pub fn replica_table_name(domain: &Dn, server_id: ServerId) -> String {
    format!("{}{server_id}", domain_table_prefix(domain))
}

/// Prefix shared by every log table of `domain`.
pub fn domain_table_prefix(domain: &Dn) -> String {
    format!("{REPLICA_TABLE_PREFIX}{}/", hex::encode(domain_digest(domain)))
}

/// Digest and server id of a name produced by [`replica_table_name`].
/// `None` for anything else.
pub fn parse_replica_table_name(name: &str) -> Option<(DomainDigest, ServerId)> {
    let rest = name.strip_prefix(REPLICA_TABLE_PREFIX)?;
    let (encoded, id) = rest.split_once('/')?;
    let server_id = ServerId(id.parse().ok()?);
    let mut digest = [0u8; DOMAIN_DIGEST_LEN];
    hex::decode_to_slice(encoded, &mut digest).ok()?;

    let canonical = format!("{REPLICA_TABLE_PREFIX}{}/{server_id}", hex::encode(digest));
    (canonical == name).then_some((digest, server_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_name_round_trip() {
        let domain = Dn::parse("ou=people, dc=Example,dc=com").unwrap();
        let name = replica_table_name(&domain, ServerId(-7));
        assert!(name.starts_with(&domain_table_prefix(&domain)));
        assert_eq!(
            parse_replica_table_name(&name),
            Some((domain_digest(&domain), ServerId(-7)))
        );

        // Spelling does not matter, only the normalized DN.
        let respelled = Dn::parse("OU=People,DC=example, DC=com").unwrap();
        assert_eq!(replica_table_name(&respelled, ServerId(-7)), name);

        let root = replica_table_name(&Dn::root(), ServerId(1));
        assert_eq!(
            parse_replica_table_name(&root),
            Some((domain_digest(&Dn::root()), ServerId(1)))
        );
    }

    #[test]
    fn test_foreign_names_rejected() {
        let digest = hex::encode(domain_digest(&Dn::parse("dc=x").unwrap()));
        for name in [
            STATE_TABLE.to_string(),
            RUNTIME_TABLE.to_string(),
            DOMAIN_TABLE.to_string(),
            "changelog/zz/1".to_string(),
            "changelog/6463/1".to_string(),
            format!("changelog/{digest}/x"),
            format!("changelog/{digest}"),
            format!("changelog/{digest}/1/2"),
            format!("changelog/{digest}/+1"),
            format!("changelog/{digest}/01"),
            format!("changelog/{}/1", digest.to_uppercase()),
        ] {
            assert_eq!(parse_replica_table_name(&name), None, "{name}");
        }
    }

    #[test]
    fn test_long_domain_names_stay_short() {
        let value = "x".repeat(300);
        let domain = Dn::parse(&format!("cn={value}")).unwrap();
        let name = replica_table_name(&domain, ServerId(i32::MIN));
        assert!(name.len() < 64, "{name}");
        assert_eq!(
            parse_replica_table_name(&name),
            Some((domain_digest(&domain), ServerId(i32::MIN)))
        );
    }
}
