// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::env::{epoch_millis, Environment};
use crate::error::{ChangelogError, Result};
use crate::replica_log::{BulkPurgeReport, LogFailure, LogRegistry, ReplicaLog};
use crate::state_store::StateStore;
use crate::telemetry;
use changelog_core::Csn;
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Tick used when only retention is configured.
const DEFAULT_TICK: Duration = Duration::from_secs(60);

/// Background checkpoint and retention purge.
pub(crate) struct Maintenance {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Maintenance {
    pub(crate) fn start(
        env: Arc<Environment>,
        state: Arc<StateStore>,
        registry: Arc<LogRegistry>,
        interval: Option<Duration>,
        retention: Option<Duration>,
    ) -> Result<Self> {
        let tick = interval.unwrap_or(DEFAULT_TICK);
        let (shutdown, signal) = bounded::<()>(1);

        let handle = thread::Builder::new()
            .name("changelog-maintenance".into())
            .spawn(move || {
                info!(?tick, ?retention, "Changelog maintenance started");
                loop {
                    match signal.recv_timeout(tick) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    match run_once(&env, &state, &registry, retention) {
                        Ok(()) => {}
                        Err(ChangelogError::EnvironmentClosed) => break,
                        Err(e) => warn!("Changelog maintenance pass failed: {}", e),
                    }
                }
                info!("Changelog maintenance stopped");
            })?;

        Ok(Self {
            shutdown: Some(shutdown),
            handle: Some(handle),
        })
    }

    /// Signals the thread and waits for it. Idempotent.
    pub(crate) fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Changelog maintenance thread panicked");
            }
        }
    }
}

impl Drop for Maintenance {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_once(
    env: &Environment,
    state: &StateStore,
    registry: &LogRegistry,
    retention: Option<Duration>,
) -> Result<()> {
    if let Some(retention) = retention {
        let report = purge_expired(state, registry, retention, epoch_millis())?;
        debug!(
            removed = report.removed,
            failed = report.failed.len(),
            "Retention purge finished"
        );
    }
    env.checkpoint()?;
    metrics::counter!(telemetry::CHECKPOINTS, 1);
    Ok(())
}

/// Purges records older than `now_ms - retention` from every known log,
/// always keeping each log's newest record.
pub(crate) fn purge_expired(
    state: &StateStore,
    registry: &LogRegistry,
    retention: Duration,
    now_ms: u64,
) -> Result<BulkPurgeReport> {
    let cutoff = Csn::first_at(now_ms.saturating_sub(retention.as_millis() as u64));
    purge_logs(state, registry, |log| {
        log.newest_csn().map(|newest| cutoff.min(newest))
    })
}

/// Purges each known log up to the bound `bound_for` picks for it; `None`
/// skips the log. Only a closed environment stops the pass.
pub(crate) fn purge_logs(
    state: &StateStore,
    registry: &LogRegistry,
    bound_for: impl Fn(&ReplicaLog) -> Option<Csn>,
) -> Result<BulkPurgeReport> {
    let snapshot = state.snapshot();
    let mut report = BulkPurgeReport::default();

    for (domain, replicas) in snapshot.domain_to_replicas() {
        for &server_id in replicas {
            let purged = registry
                .get_or_open(domain, server_id)
                .and_then(|log| match bound_for(&log) {
                    Some(bound) => log.purge_before(bound).map(|r| r.removed),
                    None => Ok(0),
                });
            match purged {
                Ok(removed) => report.removed += removed,
                Err(ChangelogError::EnvironmentClosed) => {
                    return Err(ChangelogError::EnvironmentClosed)
                }
                Err(error) => {
                    warn!(domain = %domain, server_id = %server_id, "Purge failed: {}", error);
                    metrics::counter!(telemetry::PURGE_FAILURES, 1);
                    report.failed.push(LogFailure {
                        domain: domain.clone(),
                        server_id,
                        error,
                    });
                }
            }
        }
    }
    Ok(report)
}
