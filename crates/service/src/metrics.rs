//! Prometheus counters for the sync jobs.
//!
//! The daemon exposes no HTTP endpoint; the text rendering is written next to
//! the status snapshot after every run, ready for a node-exporter textfile
//! collector.

use crate::status_provider::RunOutcome;
use anyhow::{Context, Result};
use core_types::config::MetricsSection;
use once_cell::sync::OnceCell;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use scheduler::JobKind;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use sync_engine::{ResyncReport, SyncReport};

static GLOBAL: OnceCell<Arc<SyncMetrics>> = OnceCell::new();

pub struct SyncMetrics {
    registry: Registry,
    runs: IntCounterVec,
    retrieved: IntCounter,
    stored: IntCounter,
    indexed: IntCounter,
    annotated: IntCounter,
    local_clears: IntCounter,
    remote_index_size: IntGauge,
}

/// Point-in-time counter values, persisted in the status snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub documents_retrieved: u64,
    pub documents_stored: u64,
    pub documents_indexed: u64,
    pub documents_annotated: u64,
    pub local_clears: u64,
    pub remote_index_size: i64,
}

impl SyncMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new_custom(Some("docsync".into()), None)?;
        let runs = IntCounterVec::new(
            Opts::new("job_runs_total", "Job runs by job and outcome"),
            &["job", "outcome"],
        )?;
        let counter = |name: &str, help: &str| -> Result<IntCounter> {
            let c = IntCounter::new(name, help)?;
            registry.register(Box::new(c.clone()))?;
            Ok(c)
        };
        let retrieved = counter("documents_retrieved_total", "Remote documents fetched")?;
        let stored = counter("documents_stored_total", "Documents written to the local store")?;
        let indexed = counter("documents_indexed_total", "Documents added to the local index")?;
        let annotated = counter(
            "documents_annotated_total",
            "Similarity annotations written to the remote store",
        )?;
        let local_clears = counter("local_clears_total", "Daily local store clears")?;
        let remote_index_size = IntGauge::new(
            "remote_index_documents",
            "Documents in the last rebuilt remote index",
        )?;
        registry.register(Box::new(runs.clone()))?;
        registry.register(Box::new(remote_index_size.clone()))?;

        Ok(Self {
            registry,
            runs,
            retrieved,
            stored,
            indexed,
            annotated,
            local_clears,
            remote_index_size,
        })
    }

    pub fn record_run(&self, job: JobKind, outcome: RunOutcome) {
        self.runs
            .with_label_values(&[job.as_str(), outcome.as_str()])
            .inc();
    }

    pub fn record_sync(&self, report: &SyncReport) {
        self.retrieved.inc_by(report.retrieved as u64);
        self.stored.inc_by(report.stored as u64);
        self.indexed.inc_by(report.indexed as u64);
        self.annotated.inc_by(report.annotated as u64);
    }

    pub fn record_resync(&self, report: &ResyncReport) {
        self.remote_index_size
            .set(i64::try_from(report.remote_indexed).unwrap_or(i64::MAX));
        if report.local_cleared {
            self.local_clears.inc();
        }
    }

    pub fn runs(&self, job: JobKind, outcome: RunOutcome) -> u64 {
        self.runs
            .with_label_values(&[job.as_str(), outcome.as_str()])
            .get()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            documents_retrieved: self.retrieved.get(),
            documents_stored: self.stored.get(),
            documents_indexed: self.indexed.get(),
            documents_annotated: self.annotated.get(),
            local_clears: self.local_clears.get(),
            remote_index_size: self.remote_index_size.get(),
        }
    }

    /// Prometheus text exposition of every registered metric.
    pub fn render(&self) -> Result<String> {
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buf)
            .context("failed to encode metrics")?;
        String::from_utf8(buf).context("metrics output was not utf-8")
    }
}

/// Build the metrics set when enabled in config.
pub fn init_metrics_from_config(cfg: &MetricsSection) -> Result<Option<Arc<SyncMetrics>>> {
    if !cfg.enabled {
        return Ok(None);
    }
    Ok(Some(Arc::new(SyncMetrics::new()?)))
}

pub fn set_global_metrics(metrics: Arc<SyncMetrics>) {
    let _ = GLOBAL.set(metrics);
}

pub fn global_metrics() -> Option<Arc<SyncMetrics>> {
    GLOBAL.get().cloned()
}

/// Text rendering of the global metrics, if installed.
pub fn scrape_metrics() -> Option<String> {
    let metrics = GLOBAL.get()?;
    match metrics.render() {
        Ok(text) => Some(text),
        Err(err) => {
            tracing::warn!(error = %err, "metrics scrape failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sync_engine::SyncOutcome;

    fn report(stored: usize, annotated: usize) -> SyncReport {
        SyncReport {
            outcome: SyncOutcome::Synced,
            window_start: 0,
            in_window: stored,
            retrieved: stored,
            stored,
            indexed: stored,
            annotated,
            remote_index_available: true,
        }
    }

    #[test]
    fn sync_reports_accumulate() {
        let m = SyncMetrics::new().unwrap();
        m.record_sync(&report(3, 1));
        m.record_sync(&report(2, 2));
        let snap = m.snapshot();
        assert_eq!(snap.documents_stored, 5);
        assert_eq!(snap.documents_annotated, 3);
    }

    #[test]
    fn runs_are_labelled_by_job_and_outcome() {
        let m = SyncMetrics::new().unwrap();
        m.record_run(JobKind::IncrementalSync, RunOutcome::Succeeded);
        m.record_run(JobKind::IncrementalSync, RunOutcome::Succeeded);
        m.record_run(JobKind::DailyResync, RunOutcome::Failed);
        assert_eq!(m.runs(JobKind::IncrementalSync, RunOutcome::Succeeded), 2);
        assert_eq!(m.runs(JobKind::DailyResync, RunOutcome::Succeeded), 0);

        let text = m.render().unwrap();
        assert!(text.contains("docsync_job_runs_total"));
        assert!(text.contains("outcome=\"failed\""));
    }

    #[test]
    fn resync_sets_gauge_and_counts_clears() {
        let m = SyncMetrics::new().unwrap();
        m.record_resync(&ResyncReport {
            vectorizers_retrained: true,
            remote_indexed: 42,
            local_index_removed: true,
            local_cleared: true,
        });
        let snap = m.snapshot();
        assert_eq!(snap.remote_index_size, 42);
        assert_eq!(snap.local_clears, 1);
    }

    #[test]
    fn disabled_config_builds_nothing() {
        let cfg = MetricsSection { enabled: false };
        assert!(init_metrics_from_config(&cfg).unwrap().is_none());
    }
}
