//! Scheduler primitives: job cadences, due-job selection, and the run lock
//! shared by the jobs. The service crate drives the clock and executes jobs;
//! this crate keeps the decision logic testable and self-contained.

pub mod lock;

pub use lock::{RunGuard, RunLock};

use anyhow::Result;
use chrono::{Duration as ChronoDuration, NaiveDateTime, NaiveTime};
use core_types::config::ScheduleSection;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    /// High-frequency pull of new remote documents.
    IncrementalSync,
    /// Daily remote rebuild followed by the local clear.
    DailyResync,
}

impl JobKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::IncrementalSync => "incremental_sync",
            Self::DailyResync => "daily_resync",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    Every(Duration),
    /// Once a day at a local wall-clock time.
    DailyAt(NaiveTime),
}

impl Cadence {
    /// First due instant strictly after `now`.
    pub fn next_after(self, now: NaiveDateTime) -> NaiveDateTime {
        match self {
            Self::Every(interval) => {
                let step = ChronoDuration::from_std(interval)
                    .unwrap_or(ChronoDuration::MAX)
                    .max(ChronoDuration::seconds(1));
                now.checked_add_signed(step).unwrap_or(NaiveDateTime::MAX)
            }
            Self::DailyAt(at) => {
                let today = now.date().and_time(at);
                if today > now {
                    today
                } else {
                    today
                        .checked_add_signed(ChronoDuration::days(1))
                        .unwrap_or(NaiveDateTime::MAX)
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScheduledJob {
    pub kind: JobKind,
    pub cadence: Cadence,
    pub next_due: NaiveDateTime,
}

/// Static policy inputs for the two jobs.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub sync_interval: Duration,
    pub resync_at: NaiveTime,
    pub run_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(60),
            resync_at: NaiveTime::MIN,
            run_timeout: Duration::from_secs(600),
        }
    }
}

impl SchedulerConfig {
    pub fn from_section(section: &ScheduleSection) -> Result<Self> {
        Ok(Self {
            sync_interval: Duration::from_secs(section.sync_interval_secs.max(1)),
            resync_at: section.resync_time()?,
            run_timeout: Duration::from_secs(section.run_timeout_secs.max(1)),
        })
    }
}

/// Tracks when each registered job is next due.
#[derive(Debug, Default)]
pub struct JobScheduler {
    jobs: Vec<ScheduledJob>,
}

impl JobScheduler {
    /// Scheduler with the incremental and daily jobs registered from `config`.
    pub fn with_config(config: &SchedulerConfig, now: NaiveDateTime) -> Self {
        let mut sched = Self::default();
        sched.register(JobKind::IncrementalSync, Cadence::Every(config.sync_interval), now);
        sched.register(JobKind::DailyResync, Cadence::DailyAt(config.resync_at), now);
        sched
    }

    pub fn register(&mut self, kind: JobKind, cadence: Cadence, now: NaiveDateTime) {
        self.jobs.push(ScheduledJob {
            kind,
            cadence,
            next_due: cadence.next_after(now),
        });
    }

    pub fn jobs(&self) -> &[ScheduledJob] {
        &self.jobs
    }

    /// Jobs due at `now`, in registration order. Each returned job is
    /// rescheduled from `now`; missed periods are not replayed.
    pub fn due_jobs(&mut self, now: NaiveDateTime) -> Vec<JobKind> {
        let mut due = Vec::new();
        for job in &mut self.jobs {
            if job.next_due <= now {
                due.push(job.kind);
                job.next_due = job.cadence.next_after(now);
            }
        }
        due
    }

    /// Earliest upcoming due instant across all jobs.
    pub fn next_wakeup(&self) -> Option<NaiveDateTime> {
        self.jobs.iter().map(|j| j.next_due).min()
    }
}
