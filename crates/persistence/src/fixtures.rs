// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::config::ChangelogConfig;
use crate::db::ChangelogDb;
use crate::error::Result;
use crate::tables::replica_table_name;
use changelog_core::codec::{encode_csn_key, KIND_GENERATION};
use changelog_core::{ChangeRecord, Csn, Dn, GenerationId, ServerId};
use std::path::Path;

pub const BASE_TIMESTAMP_MS: u64 = 1_700_000_000_000;
pub const RECORDS_PER_REPLICA: u16 = 5;

pub struct Scenario {
    pub domains: Vec<Dn>,
    pub replicas: Vec<ServerId>,
    /// Every CSN written, per (domain index, replica index), ascending.
    pub csns: Vec<Vec<Vec<Csn>>>,
}

/// Builds a realistic modify payload for a user entry.
pub fn modify_payload(domain: &Dn, uid: u16) -> Vec<u8> {
    format!(
        "dn: uid=user{uid},ou=people,{domain}\nchangetype: modify\nreplace: description\ndescription: revision {uid}\n"
    )
    .into_bytes()
}

pub fn csn(offset_ms: u64, server_id: i32, seq: u16) -> Csn {
    // Fixture timestamps stay far below the 48-bit limit.
    Csn::new(BASE_TIMESTAMP_MS + offset_ms, ServerId(server_id), seq).expect("fixture CSN")
}

/// Two domains, two replicas each, `RECORDS_PER_REPLICA` records per log.
/// The database is closed cleanly before returning.
pub fn generate_test_scenario(dir: &Path) -> Result<Scenario> {
    let db = ChangelogDb::open(ChangelogConfig::at(dir))?;
    let domains = vec![
        Dn::parse("dc=example,dc=com")?,
        Dn::parse("ou=admin data,dc=example,dc=com")?,
    ];
    let replicas = vec![ServerId(1), ServerId(2)];
    let mut csns = Vec::new();

    for (d, domain) in domains.iter().enumerate() {
        db.record_generation(domain, GenerationId(100 + d as u64))?;
        let mut per_domain = Vec::new();
        for replica in &replicas {
            let mut per_log = Vec::new();
            for i in 0..RECORDS_PER_REPLICA {
                let csn = csn(u64::from(i) * 1000, replica.0, 0);
                db.append(domain, &ChangeRecord::new(csn, modify_payload(domain, i)))?;
                per_log.push(csn);
            }
            per_domain.push(per_log);
        }
        csns.push(per_domain);
    }

    db.close()?;
    Ok(Scenario {
        domains,
        replicas,
        csns,
    })
}

/// The clean scenario plus one undecodable state entry and one record with a
/// flipped payload bit (domain 0, replica 1, third record).
pub fn generate_corrupt_scenario(dir: &Path) -> Result<Scenario> {
    let scenario = generate_test_scenario(dir)?;
    let db = ChangelogDb::open(ChangelogConfig::at(dir))?;
    let env = db.environment();

    let state = env.state_table();
    let mut bad_key = vec![KIND_GENERATION];
    bad_key.extend_from_slice(&u32::MAX.to_be_bytes());
    env.write(|wtxn| Ok(state.put(wtxn, bad_key.as_slice(), &[1u8][..])?))?;

    let domain = &scenario.domains[0];
    let target = scenario.csns[0][0][2];
    let table = env.open_or_create_table(&replica_table_name(domain, scenario.replicas[0]))?;
    let key = encode_csn_key(&target);
    env.write(|wtxn| {
        if let Some(value) = table.get(wtxn, &key[..])? {
            let mut value = value.to_vec();
            let last = value.len() - 1;
            value[last] ^= 0x01;
            table.put(wtxn, &key[..], value.as_slice())?;
        }
        Ok(())
    })?;

    db.close()?;
    Ok(scenario)
}
