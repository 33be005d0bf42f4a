// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! In-memory view of the domain state table.

use crate::types::{Csn, Dn, GenerationId, ServerId};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Which replicas and generations exist, per domain.
///
/// Built from the state table at startup and kept in step with it by the
/// state store. Consumers only ever see clones.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ChangelogState {
    generations: BTreeMap<Dn, GenerationId>,
    replicas: BTreeMap<Dn, BTreeSet<ServerId>>,
    offline: BTreeMap<Dn, BTreeMap<ServerId, Csn>>,
}

impl ChangelogState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_generation(&mut self, domain: Dn, generation: GenerationId) {
        self.generations.insert(domain, generation);
    }

    /// Returns false if the replica was already known.
    pub fn add_replica(&mut self, domain: Dn, server_id: ServerId) -> bool {
        self.replicas.entry(domain).or_default().insert(server_id)
    }

    pub fn remove_replica(&mut self, domain: &Dn, server_id: ServerId) -> bool {
        let removed = match self.replicas.get_mut(domain) {
            Some(set) => {
                let removed = set.remove(&server_id);
                if set.is_empty() {
                    self.replicas.remove(domain);
                }
                removed
            }
            None => false,
        };
        self.clear_offline(domain, server_id);
        removed
    }

    pub fn set_offline(&mut self, domain: Dn, server_id: ServerId, csn: Csn) {
        self.offline.entry(domain).or_default().insert(server_id, csn);
    }

    pub fn clear_offline(&mut self, domain: &Dn, server_id: ServerId) -> bool {
        match self.offline.get_mut(domain) {
            Some(map) => {
                let removed = map.remove(&server_id).is_some();
                if map.is_empty() {
                    self.offline.remove(domain);
                }
                removed
            }
            None => false,
        }
    }

    /// Forgets everything known about a domain.
    pub fn clear_domain(&mut self, domain: &Dn) {
        self.generations.remove(domain);
        self.replicas.remove(domain);
        self.offline.remove(domain);
    }

    pub fn generation(&self, domain: &Dn) -> Option<GenerationId> {
        self.generations.get(domain).copied()
    }

    pub fn replicas(&self, domain: &Dn) -> Option<&BTreeSet<ServerId>> {
        self.replicas.get(domain)
    }

    pub fn has_replica(&self, domain: &Dn, server_id: ServerId) -> bool {
        self.replicas
            .get(domain)
            .is_some_and(|set| set.contains(&server_id))
    }

    pub fn offline_csn(&self, domain: &Dn, server_id: ServerId) -> Option<Csn> {
        self.offline.get(domain)?.get(&server_id).copied()
    }

    pub fn domain_to_generation(&self) -> &BTreeMap<Dn, GenerationId> {
        &self.generations
    }

    pub fn domain_to_replicas(&self) -> &BTreeMap<Dn, BTreeSet<ServerId>> {
        &self.replicas
    }

    pub fn offline_replicas(&self) -> &BTreeMap<Dn, BTreeMap<ServerId, Csn>> {
        &self.offline
    }

    /// Every domain with at least one kind of entry.
    pub fn domains(&self) -> BTreeSet<&Dn> {
        self.generations
            .keys()
            .chain(self.replicas.keys())
            .chain(self.offline.keys())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.generations.is_empty() && self.replicas.is_empty() && self.offline.is_empty()
    }
}
