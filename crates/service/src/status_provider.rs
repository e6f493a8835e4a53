use crate::metrics::MetricsSnapshot;
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use scheduler::ScheduledJob;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, OnceLock, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Succeeded,
    /// Another run held the run lock.
    Skipped,
    Failed,
    TimedOut,
}

impl RunOutcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }

    pub const fn is_failure(self) -> bool {
        matches!(self, Self::Failed | Self::TimedOut)
    }
}

/// Last run of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunOutcome,
    /// Stage counts of a successful run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub consecutive_failures: u32,
}

/// Everything `syncctl status` shows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusSnapshot {
    pub scheduler_state: String,
    pub started_at: Option<DateTime<Utc>>,
    pub jobs: BTreeMap<String, JobStatus>,
    /// Next due time per job, local wall clock.
    pub next_runs: BTreeMap<String, NaiveDateTime>,
    pub metrics: Option<MetricsSnapshot>,
}

pub trait StatusProvider: Send + Sync {
    fn snapshot(&self) -> StatusSnapshot;
}

static PROVIDER: OnceLock<Arc<dyn StatusProvider>> = OnceLock::new();

/// Install a process-wide status provider.
pub fn set_status_provider(provider: Arc<dyn StatusProvider>) {
    let _ = PROVIDER.set(provider);
}

/// Create a [`BasicStatusProvider`], register it, and return the handle for updates.
pub fn init_basic_status_provider() -> Arc<BasicStatusProvider> {
    let basic = Arc::new(BasicStatusProvider::new());
    set_status_provider(basic.clone());
    basic
}

/// Current snapshot from the registered provider, or an "initializing" stub.
pub fn status_snapshot() -> StatusSnapshot {
    PROVIDER.get().map_or_else(
        || StatusSnapshot {
            scheduler_state: "initializing".into(),
            ..StatusSnapshot::default()
        },
        |p| p.snapshot(),
    )
}

/// In-memory status that the job runner and scheduler loop update.
#[derive(Debug, Default)]
pub struct BasicStatusProvider {
    state: RwLock<StatusSnapshot>,
}

impl BasicStatusProvider {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StatusSnapshot {
                scheduler_state: "starting".into(),
                started_at: Some(Utc::now()),
                ..StatusSnapshot::default()
            }),
        }
    }

    pub fn update_scheduler_state(&self, state: impl Into<String>) {
        if let Ok(mut guard) = self.state.write() {
            guard.scheduler_state = state.into();
        }
    }

    pub fn update_next_runs(&self, jobs: &[ScheduledJob]) {
        if let Ok(mut guard) = self.state.write() {
            guard.next_runs = jobs
                .iter()
                .map(|j| (j.kind.as_str().to_string(), j.next_due))
                .collect();
        }
    }

    pub fn update_metrics(&self, metrics: Option<MetricsSnapshot>) {
        if let Ok(mut guard) = self.state.write()
            && metrics.is_some()
        {
            guard.metrics = metrics;
        }
    }

    /// Record a finished run; the failure streak carries over from the
    /// previous run of the same job.
    pub fn record_run(&self, job: &str, mut status: JobStatus) {
        if let Ok(mut guard) = self.state.write() {
            let previous = guard.jobs.get(job).map_or(0, |s| s.consecutive_failures);
            status.consecutive_failures = if status.outcome.is_failure() {
                previous.saturating_add(1)
            } else if status.outcome == RunOutcome::Skipped {
                previous
            } else {
                0
            };
            guard.jobs.insert(job.to_string(), status);
        }
    }

    /// Write the snapshot as JSON via temp file and rename.
    pub fn persist(&self, path: &Path) -> Result<()> {
        let body = serde_json::to_vec_pretty(&self.snapshot())?;
        write_atomic(path, &body)
    }
}

impl StatusProvider for BasicStatusProvider {
    fn snapshot(&self) -> StatusSnapshot {
        self.state
            .read()
            .map(|s| s.clone())
            .unwrap_or_else(|_| StatusSnapshot {
                scheduler_state: "initializing".into(),
                ..StatusSnapshot::default()
            })
    }
}

/// Read a snapshot written by [`BasicStatusProvider::persist`].
pub fn load_status(path: &Path) -> Result<StatusSnapshot> {
    let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

pub(crate) fn write_atomic(path: &Path, body: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, body).with_context(|| format!("failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("failed to rename into {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn status(outcome: RunOutcome) -> JobStatus {
        JobStatus {
            run_id: "r".into(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            outcome,
            report: None,
            error_kind: None,
            error: None,
            consecutive_failures: 0,
        }
    }

    #[test]
    fn failure_streak_counts_and_resets() {
        let p = BasicStatusProvider::new();
        p.record_run("incremental_sync", status(RunOutcome::Failed));
        p.record_run("incremental_sync", status(RunOutcome::TimedOut));
        p.record_run("incremental_sync", status(RunOutcome::Skipped));
        assert_eq!(p.snapshot().jobs["incremental_sync"].consecutive_failures, 2);
        p.record_run("incremental_sync", status(RunOutcome::Succeeded));
        assert_eq!(p.snapshot().jobs["incremental_sync"].consecutive_failures, 0);
    }

    #[test]
    fn persisted_snapshot_reads_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state").join("status.json");
        let p = BasicStatusProvider::new();
        p.update_scheduler_state("idle");
        p.record_run("daily_resync", status(RunOutcome::Succeeded));
        p.persist(&path).unwrap();

        let back = load_status(&path).unwrap();
        assert_eq!(back.scheduler_state, "idle");
        assert_eq!(back.jobs["daily_resync"].outcome, RunOutcome::Succeeded);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn none_metrics_do_not_clear_previous() {
        let p = BasicStatusProvider::new();
        p.update_metrics(Some(MetricsSnapshot {
            documents_stored: 4,
            ..MetricsSnapshot::default()
        }));
        p.update_metrics(None);
        assert_eq!(p.snapshot().metrics.unwrap().documents_stored, 4);
    }
}
