//! Service support library for `syncd`: tracing bootstrap, metrics, status,
//! and the job boundary the scheduler loop calls into.

pub mod jobs;
mod logging;
pub mod metrics;
pub mod status_provider;

pub use jobs::{JobReport, JobRunner, run_job_blocking};
pub use logging::init_tracing_with_config;
pub use metrics::{
    MetricsSnapshot, SyncMetrics, init_metrics_from_config, scrape_metrics, set_global_metrics,
};
pub use status_provider::{
    BasicStatusProvider, JobStatus, RunOutcome, StatusSnapshot, init_basic_status_provider,
    load_status, set_status_provider, status_snapshot,
};

use anyhow::{Context, Result};
use core_types::config::AppConfig;
use doc_store::SnapshotStore;
use std::sync::Arc;
use sync_engine::{StoreHandle, SyncContext};

/// Open the configured local and remote snapshot stores.
pub fn open_stores(cfg: &AppConfig) -> Result<SyncContext> {
    let local: StoreHandle = Arc::new(
        SnapshotStore::open("local", &cfg.stores.local)
            .with_context(|| format!("failed to open local store at {}", cfg.stores.local))?,
    );
    let remote: StoreHandle = Arc::new(
        SnapshotStore::open("remote", &cfg.stores.remote)
            .with_context(|| format!("failed to open remote store at {}", cfg.stores.remote))?,
    );
    Ok(SyncContext::new(local, remote))
}
