// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::state::ChangelogState;
use crate::types::{Csn, Dn, GenerationId, ServerId};

fn dn(s: &str) -> Dn {
    Dn::parse(s).unwrap()
}

#[test]
fn test_replica_bookkeeping() {
    let mut state = ChangelogState::new();
    let domain = dn("dc=example,dc=com");

    // 1. Add twice: second add reports no change
    assert!(state.add_replica(domain.clone(), ServerId(1)));
    assert!(!state.add_replica(domain.clone(), ServerId(1)));
    assert!(state.add_replica(domain.clone(), ServerId(2)));
    assert_eq!(state.replicas(&domain).unwrap().len(), 2);

    // 2. Case-insensitive lookup
    assert!(state.has_replica(&dn("DC=Example,DC=Com"), ServerId(2)));

    // 3. Removing the last replica drops the domain entry
    assert!(state.remove_replica(&domain, ServerId(1)));
    assert!(state.remove_replica(&domain, ServerId(2)));
    assert!(!state.remove_replica(&domain, ServerId(2)));
    assert!(state.replicas(&domain).is_none());
    assert!(state.is_empty());
}

#[test]
fn test_offline_marker_cleared_with_replica() {
    let mut state = ChangelogState::new();
    let domain = dn("o=test");
    let csn = Csn::new(10, ServerId(4), 0).unwrap();

    state.add_replica(domain.clone(), ServerId(4));
    state.set_offline(domain.clone(), ServerId(4), csn);
    assert_eq!(state.offline_csn(&domain, ServerId(4)), Some(csn));

    state.remove_replica(&domain, ServerId(4));
    assert_eq!(state.offline_csn(&domain, ServerId(4)), None);
    assert!(state.offline_replicas().is_empty());
}

#[test]
fn test_generation_overwrite_and_clear_domain() {
    let mut state = ChangelogState::new();
    let a = dn("dc=a");
    let b = dn("dc=b");

    state.set_generation(a.clone(), GenerationId(1));
    state.set_generation(a.clone(), GenerationId(2));
    state.set_generation(b.clone(), GenerationId(9));
    state.add_replica(a.clone(), ServerId(1));
    assert_eq!(state.generation(&a), Some(GenerationId(2)));
    assert_eq!(state.domains().len(), 2);

    state.clear_domain(&a);
    assert_eq!(state.generation(&a), None);
    assert!(state.replicas(&a).is_none());
    assert_eq!(state.generation(&b), Some(GenerationId(9)));
    assert_eq!(state.domain_to_generation().len(), 1);
}
