// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::config::ChangelogConfig;
use crate::db::ChangelogDb;
use crate::error::ChangelogError;
use crate::fixtures::{csn, modify_payload, BASE_TIMESTAMP_MS};
use crate::tables::domain_digest;
use changelog_core::{ChangeRecord, Dn, ServerId};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::tempdir;

fn domain() -> Dn {
    Dn::parse("o=retention").unwrap()
}

fn fill(db: &ChangelogDb, server: i32) {
    for i in 0..5u64 {
        let rec = ChangeRecord::new(csn(i * 1000, server, 0), modify_payload(&domain(), i as u16));
        db.append(&domain(), &rec).unwrap();
    }
}

#[test]
fn test_retention_keeps_newest_record() {
    let dir = tempdir().unwrap();
    let db = ChangelogDb::open(ChangelogConfig::at(dir.path())).unwrap();
    fill(&db, 1);
    fill(&db, 2);

    // Everything is older than the cutoff, but each log keeps its newest.
    let now = BASE_TIMESTAMP_MS + 60_000;
    let report = db.purge_expired(Duration::from_secs(1), now).unwrap();
    assert!(report.is_complete());
    assert_eq!(report.removed, 8);
    for server in [1, 2] {
        let log = db.replica_log(&domain(), ServerId(server)).unwrap();
        assert_eq!(log.count().unwrap(), 1);
        assert_eq!(log.oldest_csn().unwrap(), Some(csn(4000, server, 0)));
        assert_eq!(log.newest_csn(), Some(csn(4000, server, 0)));
    }
}

#[test]
fn test_retention_window() {
    let dir = tempdir().unwrap();
    let db = ChangelogDb::open(ChangelogConfig::at(dir.path())).unwrap();
    fill(&db, 1);

    // Cutoff falls between the second and third records.
    let now = BASE_TIMESTAMP_MS + 4000;
    let removed = db.purge_expired(Duration::from_millis(2500), now).unwrap().removed;
    assert_eq!(removed, 2);
    assert_eq!(
        db.oldest_csn(&domain(), ServerId(1)).unwrap(),
        Some(csn(2000, 1, 0))
    );
}

#[test]
fn test_failing_log_does_not_stop_bulk_purge() {
    let dir = tempdir().unwrap();
    let db = ChangelogDb::open(ChangelogConfig::at(dir.path())).unwrap();
    fill(&db, 1);

    // Claim the digest of "dc=a" for another domain. "dc=a" sorts before
    // the filled domain, so its log is visited first.
    let blocked = Dn::parse("dc=a").unwrap();
    let env = db.environment();
    let domains = env.domain_table();
    let digest = domain_digest(&blocked);
    env.write(|wtxn| Ok(domains.put(wtxn, digest.as_slice(), "dc=elsewhere")?))
        .unwrap();
    db.record_replica(&blocked, ServerId(1)).unwrap();
    assert!(matches!(
        db.replica_log(&blocked, ServerId(1)),
        Err(ChangelogError::DomainDigestCollision { .. })
    ));

    let report = db.purge_all_before(csn(2500, 1, 0)).unwrap();
    assert_eq!(report.removed, 3);
    assert!(!report.is_complete());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].domain, blocked);
    assert_eq!(report.failed[0].server_id, ServerId(1));
    assert!(matches!(
        report.failed[0].error,
        ChangelogError::DomainDigestCollision { .. }
    ));

    let report = db
        .purge_expired(Duration::from_secs(1), BASE_TIMESTAMP_MS + 60_000)
        .unwrap();
    assert_eq!(report.removed, 1);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(
        db.oldest_csn(&domain(), ServerId(1)).unwrap(),
        Some(csn(4000, 1, 0))
    );

    // Closing is the one failure that ends the pass.
    db.close().unwrap();
    assert!(matches!(
        db.purge_all_before(csn(5000, 1, 0)),
        Err(ChangelogError::EnvironmentClosed)
    ));
}

#[test]
fn test_maintenance_thread_purges_and_stops() {
    let dir = tempdir().unwrap();
    let mut config = ChangelogConfig::at(dir.path());
    config.checkpoint_interval_secs = Some(1);
    config.retention_secs = Some(1);
    let db = ChangelogDb::open(config).unwrap();
    fill(&db, 3);

    let log = db.replica_log(&domain(), ServerId(3)).unwrap();
    let deadline = Instant::now() + Duration::from_secs(10);
    while log.count().unwrap() > 1 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(100));
    }
    assert_eq!(log.count().unwrap(), 1);

    // Close joins the thread before releasing the environment.
    db.close().unwrap();
    assert!(!db.environment().is_open());
}
