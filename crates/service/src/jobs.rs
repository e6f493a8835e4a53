//! Job boundary: every run is locked, bounded in time, and reduced to a
//! [`RunOutcome`]. Nothing a job does can unwind into the scheduler loop.

use crate::metrics::{global_metrics, scrape_metrics};
use crate::status_provider::{BasicStatusProvider, JobStatus, RunOutcome, write_atomic};
use chrono::Utc;
use core_types::config::RUN_LOCK_FILE;
use scheduler::{JobKind, RunLock};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use sync_engine::{
    ResyncEngine, ResyncReport, SyncContext, SyncEngine, SyncError, SyncReport, SyncSettings,
};
use tracing::Instrument;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum JobReport {
    Sync(SyncReport),
    Resync(ResyncReport),
}

/// Run one job on the calling thread.
///
/// The incremental job gives up immediately when the lock is taken; the
/// daily job waits up to `wait` for it. `Ok(None)` means the run was skipped.
pub fn run_job_blocking(
    kind: JobKind,
    ctx: &SyncContext,
    settings: &SyncSettings,
    lock: &RunLock,
    wait: Duration,
) -> Result<Option<JobReport>, SyncError> {
    let guard = match kind {
        JobKind::IncrementalSync => lock.try_acquire(kind)?,
        JobKind::DailyResync => lock.acquire_timeout(kind, wait)?,
    };
    let Some(_guard) = guard else {
        tracing::warn!("another run holds the run lock, skipping");
        return Ok(None);
    };

    let report = match kind {
        JobKind::IncrementalSync => {
            JobReport::Sync(SyncEngine::new(ctx.clone(), settings.clone()).run()?)
        }
        JobKind::DailyResync => {
            JobReport::Resync(ResyncEngine::new(ctx.clone(), settings.clone()).run()?)
        }
    };
    Ok(Some(report))
}

pub struct JobRunner {
    ctx: SyncContext,
    settings: SyncSettings,
    lock: RunLock,
    timeout: Duration,
    status: Arc<BasicStatusProvider>,
    state_dir: PathBuf,
}

impl JobRunner {
    pub fn new(
        ctx: SyncContext,
        settings: SyncSettings,
        timeout: Duration,
        status: Arc<BasicStatusProvider>,
        state_dir: impl Into<PathBuf>,
    ) -> Self {
        let state_dir = state_dir.into();
        Self {
            ctx,
            settings,
            lock: RunLock::with_file(state_dir.join(RUN_LOCK_FILE)),
            timeout,
            status,
            state_dir,
        }
    }

    pub const fn lock(&self) -> &RunLock {
        &self.lock
    }

    pub fn status_path(&self) -> PathBuf {
        self.state_dir.join("status.json")
    }

    /// Run `kind` on the blocking pool under the run timeout, then record the
    /// outcome in status and metrics.
    ///
    /// A timed-out run is abandoned, not killed: its blocking task keeps the
    /// run lock until it finishes, so the next tick is skipped rather than
    /// overlapping it.
    pub async fn run(&self, kind: JobKind) -> RunOutcome {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("job", job = kind.as_str(), %run_id);
        self.run_inner(kind, run_id).instrument(span).await
    }

    async fn run_inner(&self, kind: JobKind, run_id: Uuid) -> RunOutcome {
        let started_at = Utc::now();
        tracing::info!("run started");

        let (ctx, settings, lock, wait) = (
            self.ctx.clone(),
            self.settings.clone(),
            self.lock.clone(),
            self.timeout,
        );
        let span = tracing::Span::current();
        let task = tokio::task::spawn_blocking(move || {
            span.in_scope(|| run_job_blocking(kind, &ctx, &settings, &lock, wait))
        });

        let (outcome, report, error) = match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(Ok(Some(report)))) => (RunOutcome::Succeeded, Some(report), None),
            Ok(Ok(Ok(None))) => (RunOutcome::Skipped, None, None),
            Ok(Ok(Err(err))) => {
                if err.is_recoverable() {
                    tracing::warn!(kind = err.kind(), error = %err, "run skipped, will retry next tick");
                } else {
                    tracing::error!(kind = err.kind(), error = %err, "run failed");
                }
                let error = (err.kind(), err.to_string());
                (RunOutcome::Failed, None, Some(error))
            }
            Ok(Err(join_err)) => {
                tracing::error!(error = %join_err, "job task panicked");
                (RunOutcome::Failed, None, Some(("panic", join_err.to_string())))
            }
            Err(_) => {
                let err = SyncError::Timeout(self.timeout);
                tracing::error!(error = %err, "run abandoned");
                (RunOutcome::TimedOut, None, Some((err.kind(), err.to_string())))
            }
        };
        tracing::info!(outcome = outcome.as_str(), "run finished");

        if let Some(metrics) = global_metrics() {
            metrics.record_run(kind, outcome);
            match &report {
                Some(JobReport::Sync(r)) => metrics.record_sync(r),
                Some(JobReport::Resync(r)) => metrics.record_resync(r),
                None => {}
            }
            self.status.update_metrics(Some(metrics.snapshot()));
        }

        self.status.record_run(
            kind.as_str(),
            JobStatus {
                run_id: run_id.to_string(),
                started_at,
                finished_at: Utc::now(),
                outcome,
                report: report.and_then(|r| serde_json::to_value(r).ok()),
                error_kind: error.as_ref().map(|(kind, _)| (*kind).to_string()),
                error: error.map(|(_, message)| message),
                consecutive_failures: 0,
            },
        );
        self.persist_state();
        outcome
    }

    fn persist_state(&self) {
        if let Err(err) = self.status.persist(&self.status_path()) {
            tracing::warn!(error = %err, "failed to persist status");
        }
        if let Some(text) = scrape_metrics()
            && let Err(err) = write_atomic(&self.state_dir.join("metrics.prom"), text.as_bytes())
        {
            tracing::warn!(error = %err, "failed to write metrics");
        }
    }
}
