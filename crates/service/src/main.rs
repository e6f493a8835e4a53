//! Entry point for `syncd`, the docsync scheduler daemon.

use std::path::PathBuf;

use anyhow::{Result, bail};
use chrono::Local;
use clap::{Parser, ValueEnum};
use core_types::config::load_or_create_config;
use scheduler::{JobKind, JobScheduler, SchedulerConfig};
use service::{
    BasicStatusProvider, JobRunner, RunOutcome, init_basic_status_provider,
    init_metrics_from_config, init_tracing_with_config, open_stores, set_global_metrics,
};
use sync_engine::SyncSettings;

#[derive(Parser, Debug)]
#[command(name = "syncd", version, about = "Keeps the local and remote document stores in sync")]
struct Args {
    /// Config file (defaults to docsync.toml, created if missing).
    #[arg(short, long, env = "SYNCD_CONFIG")]
    config: Option<PathBuf>,
    /// Run a single job and exit instead of starting the scheduler loop.
    #[arg(long, value_enum)]
    once: Option<JobArg>,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum JobArg {
    Sync,
    Resync,
}

impl From<JobArg> for JobKind {
    fn from(arg: JobArg) -> Self {
        match arg {
            JobArg::Sync => Self::IncrementalSync,
            JobArg::Resync => Self::DailyResync,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    let cfg = load_or_create_config(args.config.as_deref())?;
    let _guard = init_tracing_with_config(&cfg.logging)?;

    if let Some(metrics) = init_metrics_from_config(&cfg.metrics)? {
        set_global_metrics(metrics);
    }
    let status = init_basic_status_provider();
    let sched_cfg = SchedulerConfig::from_section(&cfg.schedule)?;

    let runner = JobRunner::new(
        open_stores(cfg)?,
        SyncSettings::from_config(cfg),
        sched_cfg.run_timeout,
        status.clone(),
        &cfg.app.state_dir,
    );

    if let Some(job) = args.once {
        let outcome = runner.run(job.into()).await;
        if outcome.is_failure() {
            bail!("{} run {}", JobKind::from(job).as_str(), outcome.as_str());
        }
        return Ok(());
    }

    tracing::info!(
        interval_secs = sched_cfg.sync_interval.as_secs(),
        resync_at = %sched_cfg.resync_at,
        "syncd started"
    );
    run_loop(&runner, &sched_cfg, &status).await;
    tracing::info!("syncd stopped");
    Ok(())
}

/// Sleep until the next due job, run everything due, repeat until Ctrl+C.
/// Jobs due at the same instant run in registration order: sync, then resync.
async fn run_loop(runner: &JobRunner, cfg: &SchedulerConfig, status: &BasicStatusProvider) {
    let mut sched = JobScheduler::with_config(cfg, Local::now().naive_local());
    loop {
        status.update_next_runs(sched.jobs());
        status.update_scheduler_state("idle");
        let Some(next) = sched.next_wakeup() else {
            tracing::warn!("no jobs registered");
            return;
        };
        let wait = (next - Local::now().naive_local())
            .to_std()
            .unwrap_or_default();
        tracing::debug!(next = %next, wait_secs = wait.as_secs(), "sleeping until next job");

        tokio::select! {
            () = tokio::time::sleep(wait) => {}
            res = tokio::signal::ctrl_c() => {
                if let Err(err) = res {
                    tracing::error!(error = %err, "failed to listen for shutdown signal");
                }
                tracing::info!("shutdown requested");
                return;
            }
        }

        for kind in sched.due_jobs(Local::now().naive_local()) {
            status.update_scheduler_state(format!("running {}", kind.as_str()));
            if runner.run(kind).await == RunOutcome::TimedOut {
                tracing::warn!(job = kind.as_str(), "abandoned run keeps the run lock until it returns");
            }
        }
    }
}
