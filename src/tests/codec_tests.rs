// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::codec::{
    decode_all, decode_csn_key, decode_entry, encode_csn_key, encode_generation_entry,
    encode_offline_entry, encode_replica_entry, StateKey, StateRecord,
};
use crate::error::{CorruptReason, CorruptStateError};
use crate::state::ChangelogState;
use crate::types::csn::MAX_TIMESTAMP_MS;
use crate::types::{Csn, Dn, GenerationId, ServerId};
use proptest::prelude::*;

fn dn(s: &str) -> Dn {
    Dn::parse(s).unwrap()
}

fn arb_csn() -> impl Strategy<Value = Csn> {
    (0..=MAX_TIMESTAMP_MS, any::<i32>(), any::<u16>())
        .prop_map(|(ts, id, seq)| Csn::new(ts, ServerId(id), seq).unwrap())
}

// Values with an inner space are the case a delimiter-based layout gets wrong.
fn arb_domain() -> impl Strategy<Value = Dn> {
    "[a-c]{1,3}( [a-c]{1,3})?".prop_map(|v| dn(&format!("dc={v},dc=com")))
}

#[derive(Debug, Clone)]
enum Entry {
    Generation(Dn, u64),
    Replica(Dn, i32),
}

fn arb_entries() -> impl Strategy<Value = Vec<Entry>> {
    let entry = prop_oneof![
        (arb_domain(), any::<u64>()).prop_map(|(d, g)| Entry::Generation(d, g)),
        (arb_domain(), -4i32..4).prop_map(|(d, id)| Entry::Replica(d, id)),
    ];
    // One generation per domain, as the store guarantees.
    prop::collection::vec(entry, 0..24).prop_map(|entries| {
        let mut seen = std::collections::HashSet::new();
        entries
            .into_iter()
            .filter(|e| match e {
                Entry::Generation(d, _) => seen.insert(d.clone()),
                Entry::Replica(..) => true,
            })
            .collect()
    })
}

fn encode(entry: &Entry) -> (Vec<u8>, Vec<u8>) {
    match entry {
        Entry::Generation(d, g) => encode_generation_entry(d, GenerationId(*g)),
        Entry::Replica(d, id) => encode_replica_entry(d, ServerId(*id)),
    }
}

fn expected_state(entries: &[Entry]) -> ChangelogState {
    let mut state = ChangelogState::new();
    for entry in entries {
        match entry {
            Entry::Generation(d, g) => state.set_generation(d.clone(), GenerationId(*g)),
            Entry::Replica(d, id) => {
                state.add_replica(d.clone(), ServerId(*id));
            }
        }
    }
    state
}

proptest! {
    #[test]
    fn prop_csn_key_order_matches_csn_order(a in arb_csn(), b in arb_csn()) {
        prop_assert_eq!(a.cmp(&b), encode_csn_key(&a).cmp(&encode_csn_key(&b)));
        prop_assert_eq!(decode_csn_key(&encode_csn_key(&a)).unwrap(), a);
    }

    #[test]
    fn prop_state_keys_never_collide(
        d1 in arb_domain(), id1 in any::<i32>(),
        d2 in arb_domain(), id2 in any::<i32>(),
    ) {
        let r1 = encode_replica_entry(&d1, ServerId(id1)).0;
        let r2 = encode_replica_entry(&d2, ServerId(id2)).0;
        prop_assert_eq!(r1 == r2, d1 == d2 && id1 == id2);

        let g1 = encode_generation_entry(&d1, GenerationId(1)).0;
        let g2 = encode_generation_entry(&d2, GenerationId(1)).0;
        prop_assert_eq!(g1 == g2, d1 == d2);
        prop_assert_ne!(&g1, &r2);
    }

    #[test]
    fn prop_decode_all_ignores_insertion_order(
        (entries, shuffled) in arb_entries().prop_flat_map(|entries| {
            let shuffled = Just(entries.clone()).prop_shuffle();
            (Just(entries), shuffled)
        })
    ) {
        let expected = expected_state(&entries);
        let decoded = decode_all(shuffled.iter().map(encode));
        prop_assert!(decoded.corrupt.is_empty());
        prop_assert_eq!(decoded.state, expected);
    }

    #[test]
    fn prop_corrupt_entry_is_isolated(
        entries in arb_entries(),
        garbage in prop::collection::vec(any::<u8>(), 0..16),
        position in any::<prop::sample::Index>(),
    ) {
        // Kind 0xff is never produced by the encoders.
        let mut bad_key = vec![0xff];
        bad_key.extend_from_slice(&garbage);

        let mut encoded: Vec<_> = entries.iter().map(encode).collect();
        let at = position.index(encoded.len() + 1);
        encoded.insert(at, (bad_key, garbage));

        let decoded = decode_all(encoded);
        prop_assert_eq!(decoded.corrupt.len(), 1);
        prop_assert_eq!(decoded.state, expected_state(&entries));
    }
}

#[test]
fn test_domain_with_space_does_not_alias_replica_key() {
    // "dc=example" + server 12 must not read back as a domain "dc=example 12".
    let plain = dn("dc=example");
    let spaced = dn("dc=example 12");

    let (k1, v1) = encode_replica_entry(&plain, ServerId(12));
    let (k2, v2) = encode_generation_entry(&spaced, GenerationId(7));
    assert_ne!(k1, k2);

    let decoded = decode_all(vec![(k1, v1), (k2, v2)]);
    assert!(decoded.corrupt.is_empty());
    assert!(decoded.state.has_replica(&plain, ServerId(12)));
    assert_eq!(decoded.state.generation(&spaced), Some(GenerationId(7)));
    assert_eq!(decoded.state.generation(&plain), None);
}

#[test]
fn test_offline_entry_round_trip() {
    let domain = dn("o=test");
    let csn = Csn::new(99, ServerId(3), 1).unwrap();
    let (key, value) = encode_offline_entry(&domain, ServerId(3), &csn);
    assert_eq!(
        decode_entry(&key, &value).unwrap(),
        StateRecord::Offline(domain.clone(), ServerId(3), csn)
    );
    assert_eq!(
        StateKey::decode(&key).unwrap(),
        StateKey::Offline(domain, ServerId(3))
    );
}

#[test]
fn test_decode_entry_rejections() {
    let domain = dn("dc=example,dc=com");

    // Unknown kind.
    let (mut key, value) = encode_generation_entry(&domain, GenerationId(1));
    key[0] = 0x7f;
    assert_eq!(
        decode_entry(&key, &value),
        Err(CorruptReason::UnknownKind(0x7f))
    );

    // Trailing bytes after the domain.
    let (mut key, value) = encode_generation_entry(&domain, GenerationId(1));
    key.push(0);
    assert!(matches!(
        decode_entry(&key, &value),
        Err(CorruptReason::MalformedKey(_))
    ));

    // Domain length pointing past the end of the key.
    let (mut key, value) = encode_generation_entry(&domain, GenerationId(1));
    key[1..5].copy_from_slice(&u32::MAX.to_be_bytes());
    assert!(matches!(
        decode_entry(&key, &value),
        Err(CorruptReason::MalformedKey(_))
    ));

    // Wrong value width.
    let (key, value) = encode_generation_entry(&domain, GenerationId(1));
    assert!(matches!(
        decode_entry(&key, &value[..5]),
        Err(CorruptReason::MalformedValue(_))
    ));

    // Replica value naming another server.
    let (key, _) = encode_replica_entry(&domain, ServerId(1));
    let (_, other) = encode_replica_entry(&domain, ServerId(2));
    assert_eq!(
        decode_entry(&key, &other),
        Err(CorruptReason::ServerIdMismatch { key: 1, value: 2 })
    );
}

#[test]
fn test_decode_rejects_unnormalized_domain() {
    let raw = b"DC=Example";
    let mut key = vec![0x01];
    key.extend_from_slice(&(raw.len() as u32).to_be_bytes());
    key.extend_from_slice(raw);
    let (_, value) = encode_generation_entry(&dn("dc=example"), GenerationId(1));
    assert!(matches!(
        decode_entry(&key, &value),
        Err(CorruptReason::MalformedKey(_))
    ));
}

#[test]
fn test_equivalent_spellings_share_a_key() {
    let a = encode_replica_entry(&dn("DC=Example, DC=Com"), ServerId(5)).0;
    let b = encode_replica_entry(&dn("dc=example,dc=com"), ServerId(5)).0;
    assert_eq!(a, b);
}

#[test]
fn test_negative_server_ids_sort_first() {
    let domain = dn("dc=x");
    let neg = encode_replica_entry(&domain, ServerId(-1)).0;
    let pos = encode_replica_entry(&domain, ServerId(1)).0;
    assert!(neg < pos);
}

#[test]
fn test_state_values_are_versioned_big_endian() {
    let d = dn("dc=example,dc=com");
    let (_, value) = encode_generation_entry(&d, GenerationId(0x0102_0304_0506_0708));
    assert_eq!(value, [1, 1, 2, 3, 4, 5, 6, 7, 8]);

    let (_, value) = encode_replica_entry(&d, ServerId(-2));
    assert_eq!(value, [1, 0xff, 0xff, 0xff, 0xfe]);
}

#[test]
fn test_corrupt_entry_display() {
    let err = CorruptStateError {
        key: vec![0x07, 0xab],
        reason: CorruptReason::UnknownKind(0x07),
    };
    assert_eq!(err.to_string(), "Corrupt state entry 07ab: unknown entry kind 0x07");

    let err = CorruptStateError {
        key: vec![0xcd; 40],
        reason: CorruptReason::ServerIdMismatch { key: 1, value: 2 },
    };
    let text = err.to_string();
    assert!(text.starts_with(&format!("Corrupt state entry {}..", "cd".repeat(32))));
    assert!(text.ends_with("key names server 1 but value names 2"));
}
