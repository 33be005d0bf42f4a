// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::config::{AccessMode, ChangelogConfig};
use crate::db::ChangelogDb;
use crate::error::ChangelogError;
use crate::fixtures::{csn, modify_payload};
use crate::tables::{domain_digest, REPLICA_TABLE_PREFIX};
use changelog_core::{ChangeRecord, Csn, Dn, GenerationId, ServerId};
use tempfile::tempdir;

fn domain() -> Dn {
    Dn::parse("dc=example,dc=com").unwrap()
}

fn record(offset: u64, server: i32) -> ChangeRecord {
    ChangeRecord::new(csn(offset, server, 0), modify_payload(&domain(), offset as u16))
}

#[test]
fn test_unclean_shutdown_detected() {
    let dir = tempdir().unwrap();
    let config = ChangelogConfig::at(dir.path());

    let db = ChangelogDb::open(config.clone()).unwrap();
    assert!(db.crash_recovered().is_none());
    db.record_generation(&domain(), GenerationId(7)).unwrap();
    db.append(&domain(), &record(0, 1)).unwrap();
    db.append(&domain(), &record(10, 1)).unwrap();
    let first_run = db.environment().runtime_state().cloned().unwrap();
    db.abandon();

    // 1. Committed work survives and the crash is reported
    let db = ChangelogDb::open(config.clone()).unwrap();
    let report = db.crash_recovered().expect("crash should be detected");
    assert_eq!(db.environment().previous_run(), Some(&first_run));
    assert_ne!(
        db.environment().runtime_state().unwrap().instance_id,
        first_run.instance_id
    );
    assert!(report.restored_replicas.is_empty());
    assert!(report.unknown_tables.is_empty());
    assert_eq!(db.state().generation(&domain()), Some(GenerationId(7)));
    let csns: Vec<Csn> = db
        .iterate_from(&domain(), ServerId(1), csn(0, 1, 0))
        .unwrap()
        .map(|r| r.unwrap().csn)
        .collect();
    assert_eq!(csns, vec![csn(0, 1, 0), csn(10, 1, 0)]);
    db.close().unwrap();

    // 2. A clean close clears the sentinel
    let db = ChangelogDb::open(config).unwrap();
    assert!(db.crash_recovered().is_none());
}

#[test]
fn test_recovery_restores_orphan_replica() {
    let dir = tempdir().unwrap();
    let config = ChangelogConfig::at(dir.path());

    let db = ChangelogDb::open(config.clone()).unwrap();
    db.append(&domain(), &record(0, 1)).unwrap();
    // Log written without the state entry, as if the process died between
    // the two transactions.
    db.logs()
        .get_or_open(&domain(), ServerId(9))
        .unwrap()
        .append(&record(5, 9))
        .unwrap();
    // An empty orphan has nothing worth restoring.
    db.logs().get_or_open(&domain(), ServerId(10)).unwrap();
    assert!(!db.state().has_replica(&domain(), ServerId(9)));
    db.abandon();

    let db = ChangelogDb::open(config).unwrap();
    let report = db.crash_recovered().unwrap();
    assert_eq!(report.restored_replicas, vec![(domain(), ServerId(9))]);

    let state = db.state();
    assert!(state.has_replica(&domain(), ServerId(1)));
    assert!(state.has_replica(&domain(), ServerId(9)));
    assert!(!state.has_replica(&domain(), ServerId(10)));
    assert_eq!(db.newest_csn(&domain(), ServerId(9)).unwrap(), Some(csn(5, 9, 0)));
}

#[test]
fn test_recovery_reports_unknown_tables() {
    let dir = tempdir().unwrap();
    let config = ChangelogConfig::at(dir.path());

    // Well formed, but no domain was ever registered under this digest.
    let unregistered = format!(
        "{REPLICA_TABLE_PREFIX}{}/1",
        hex::encode(domain_digest(&Dn::parse("dc=nowhere").unwrap()))
    );

    let db = ChangelogDb::open(config.clone()).unwrap();
    for name in ["changelog/not-hex/1", unregistered.as_str()] {
        db.environment().open_or_create_table(name).unwrap();
    }
    db.abandon();

    let db = ChangelogDb::open(config).unwrap();
    let report = db.crash_recovered().unwrap();
    let mut unknown = report.unknown_tables.clone();
    unknown.sort();
    let mut expected = vec!["changelog/not-hex/1".to_string(), unregistered];
    expected.sort();
    assert_eq!(unknown, expected);
    assert!(db.replica_tables().unwrap().is_empty());
}

#[test]
fn test_operations_after_close_fail() {
    let dir = tempdir().unwrap();
    let db = ChangelogDb::open(ChangelogConfig::at(dir.path())).unwrap();
    db.append(&domain(), &record(0, 1)).unwrap();
    let log = db.replica_log(&domain(), ServerId(1)).unwrap();
    let mut iter = log.iterate_from(csn(0, 1, 0)).unwrap();

    db.close().unwrap();
    db.close().unwrap();

    assert!(matches!(
        db.append(&domain(), &record(1, 1)),
        Err(ChangelogError::EnvironmentClosed)
    ));
    assert!(matches!(
        db.record_generation(&domain(), GenerationId(2)),
        Err(ChangelogError::EnvironmentClosed)
    ));
    assert!(matches!(db.checkpoint(), Err(ChangelogError::EnvironmentClosed)));
    assert!(matches!(
        log.iterate_from(csn(0, 1, 0)),
        Err(ChangelogError::EnvironmentClosed)
    ));

    // An iterator created before close fails instead of ending quietly.
    assert!(matches!(iter.next(), Some(Err(ChangelogError::EnvironmentClosed))));
    assert!(iter.next().is_none());

    // The last snapshot stays readable.
    assert!(db.state().has_replica(&domain(), ServerId(1)));
}

#[test]
fn test_state_survives_crash() {
    let dir = tempdir().unwrap();
    let config = ChangelogConfig::at(dir.path());
    let other = Dn::parse("ou=admin data,dc=example,dc=com").unwrap();

    let db = ChangelogDb::open(config.clone()).unwrap();
    db.record_generation(&domain(), GenerationId(1)).unwrap();
    db.record_generation(&domain(), GenerationId(2)).unwrap();
    db.record_generation(&other, GenerationId(5)).unwrap();
    for server in [1, 2, 3] {
        db.append(&domain(), &record(server as u64, server)).unwrap();
    }
    db.record_replica(&other, ServerId(4)).unwrap();
    db.record_replica(&other, ServerId(5)).unwrap();
    db.remove_replica(&domain(), ServerId(2)).unwrap();
    db.notify_replica_offline(&domain(), ServerId(3), csn(50, 3, 0))
        .unwrap();
    db.notify_replica_offline(&other, ServerId(5), csn(60, 5, 1))
        .unwrap();
    let before = db.state();
    assert_eq!(db.load_state().unwrap().state, before);
    db.abandon();

    let db = ChangelogDb::open(config).unwrap();
    let report = db.crash_recovered().unwrap();
    // Replica 2 still has records, so its log brings it back.
    assert_eq!(report.restored_replicas, vec![(domain(), ServerId(2))]);
    assert!(db.corrupt_state_entries().is_empty());

    let mut expected = before;
    assert!(expected.add_replica(domain(), ServerId(2)));
    let reloaded = db.load_state().unwrap();
    assert!(reloaded.corrupt.is_empty());
    assert_eq!(reloaded.state, expected);
    assert_eq!(db.state(), expected);
    assert_eq!(db.state().generation(&domain()), Some(GenerationId(2)));
    assert_eq!(
        db.state().offline_csn(&other, ServerId(5)),
        Some(csn(60, 5, 1))
    );
}

#[test]
fn test_attached_processes_leave_owner_sentinel() {
    let dir = tempdir().unwrap();
    let owner = ChangelogConfig::at(dir.path());
    let mut read_only = owner.clone();
    read_only.access = AccessMode::ReadOnly;
    let mut attached = owner.clone();
    attached.access = AccessMode::Attach;

    let db = ChangelogDb::open(owner.clone()).unwrap();
    db.append(&domain(), &record(0, 1)).unwrap();
    db.append(&domain(), &record(1, 1)).unwrap();
    db.logs()
        .get_or_open(&domain(), ServerId(9))
        .unwrap()
        .append(&record(5, 9))
        .unwrap();
    let owner_run = db.environment().runtime_state().cloned().unwrap();
    // The sentinel stays, as it would while the owner is still running.
    db.abandon();

    // 1. A reader sees the owner but neither recovers nor writes
    let reader = ChangelogDb::open(read_only).unwrap();
    assert!(reader.crash_recovered().is_none());
    assert!(!reader.environment().crash_detected());
    assert_eq!(reader.environment().previous_run(), Some(&owner_run));
    assert!(reader.environment().runtime_state().is_none());
    assert!(!reader.state().has_replica(&domain(), ServerId(9)));
    let csns: Vec<Csn> = reader
        .iterate_from(&domain(), ServerId(1), csn(0, 1, 0))
        .unwrap()
        .map(|r| r.unwrap().csn)
        .collect();
    assert_eq!(csns, vec![csn(0, 1, 0), csn(1, 1, 0)]);
    assert!(matches!(
        reader.append(&domain(), &record(2, 1)),
        Err(ChangelogError::ReadOnly)
    ));
    assert!(matches!(
        reader.record_generation(&domain(), GenerationId(3)),
        Err(ChangelogError::ReadOnly)
    ));
    assert!(matches!(
        reader.replica_log(&domain(), ServerId(42)),
        Err(ChangelogError::ReadOnly)
    ));
    reader.close().unwrap();

    // 2. An attached tool may purge, still without touching the sentinel
    let tool = ChangelogDb::open(attached).unwrap();
    assert!(tool.crash_recovered().is_none());
    let report = tool.purge_all_before(csn(1, 1, 0)).unwrap();
    assert!(report.is_complete());
    assert_eq!(report.removed, 1);
    tool.close().unwrap();

    // 3. The owner still finds its own crash
    let db = ChangelogDb::open(owner).unwrap();
    assert_eq!(db.environment().previous_run(), Some(&owner_run));
    let report = db.crash_recovered().expect("crash should be detected");
    assert_eq!(report.restored_replicas, vec![(domain(), ServerId(9))]);
    assert_eq!(db.oldest_csn(&domain(), ServerId(1)).unwrap(), Some(csn(1, 1, 0)));
}

#[test]
fn test_attach_requires_existing_changelog() {
    let dir = tempdir().unwrap();
    let mut config = ChangelogConfig::at(dir.path().join("missing"));
    config.access = AccessMode::ReadOnly;
    assert!(matches!(
        ChangelogDb::open(config),
        Err(ChangelogError::EnvironmentOpen { .. })
    ));
    assert!(!dir.path().join("missing").exists());
}
