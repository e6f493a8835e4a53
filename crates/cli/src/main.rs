use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use cli::{report_lines, status_lines};
use console::style;
use core_types::config::{AppConfig, LoggingConfig, load_or_create_config};
use indicatif::{ProgressBar, ProgressStyle};
use retriever::UpdateScope;
use scheduler::{JobKind, RunLock};
use service::{init_tracing_with_config, load_status, open_stores, run_job_blocking};
use std::path::PathBuf;
use std::time::Duration;
use sync_engine::{SyncSettings, build_retriever, train_vectorizers};

/// Operator CLI for docsync.
#[derive(Parser, Debug)]
#[command(name = "syncctl", version, about = "Run and inspect the docsync jobs")]
struct Cli {
    /// Config file (defaults to docsync.toml, created if missing).
    #[arg(short, long, env = "SYNCD_CONFIG", global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the incremental sync once.
    Sync {},
    /// Run the daily resync once: remote rebuild, then local clear.
    Resync {},
    /// Fit both vectorizers on the remote corpus, overwriting existing models.
    Train {
        /// Also rebuild the remote index with the new models.
        #[arg(long)]
        index: bool,
    },
    /// Show the last status written by syncd.
    Status {
        /// Print the raw JSON snapshot.
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration.
    Config {},
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    // Keep the terminal for the spinner and the report.
    let _guard = init_tracing_with_config(&LoggingConfig {
        level: "warn".into(),
        ..LoggingConfig::default()
    })?;
    let cfg = load_or_create_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Sync {} => run_once(cfg, JobKind::IncrementalSync),
        Commands::Resync {} => run_once(cfg, JobKind::DailyResync),
        Commands::Train { index } => train(cfg, index),
        Commands::Status { json } => status(cfg, json),
        Commands::Config {} => {
            print!("{}", toml::to_string_pretty(cfg)?);
            Ok(())
        }
    }
}

fn spinner(msg: &'static str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg} ({elapsed})")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(msg);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Run one job in-process under the same lock file as syncd, so a manual run
/// never interleaves with a scheduled one.
fn run_once(cfg: &AppConfig, kind: JobKind) -> Result<()> {
    let ctx = open_stores(cfg)?;
    let settings = SyncSettings::from_config(cfg);
    let lock = RunLock::with_file(cfg.run_lock_file());

    let pb = spinner(match kind {
        JobKind::IncrementalSync => "syncing",
        JobKind::DailyResync => "resyncing",
    });
    let result = run_job_blocking(kind, &ctx, &settings, &lock, Duration::ZERO);
    pb.finish_and_clear();

    match result {
        Ok(Some(report)) => {
            println!("{}", style(format!("{} finished", kind.as_str())).green().bold());
            for (label, value) in report_lines(&report) {
                println!("  {:<22} {value}", style(label).dim());
            }
            Ok(())
        }
        Ok(None) => bail!("run lock {} is held, is syncd mid-run?", cfg.run_lock_file().display()),
        Err(err) => {
            eprintln!("{} {err}", style(format!("{}:", err.kind())).red().bold());
            bail!("{} failed", kind.as_str())
        }
    }
}

fn train(cfg: &AppConfig, index: bool) -> Result<()> {
    let ctx = open_stores(cfg)?;
    let settings = SyncSettings::from_config(cfg);
    let mut retriever = build_retriever(ctx.remote.clone(), &settings);

    let pb = spinner("fitting vectorizers on the remote corpus");
    let trained = train_vectorizers(&mut retriever, &settings, true);
    pb.finish_and_clear();
    trained.context("training failed")?;
    println!(
        "{} {} and {}",
        style("models written:").green(),
        settings.candidate_path.display(),
        settings.retriever_path.display()
    );

    if index {
        let pb = spinner("rebuilding the remote index");
        let update = retriever.update_embeddings(true, &settings.remote_index_path, UpdateScope::Corpus);
        pb.finish_and_clear();
        let update = update.context("remote index rebuild failed")?;
        println!(
            "{} {} ({} documents)",
            style("remote index written:").green(),
            settings.remote_index_path.display(),
            update.total
        );
    }
    Ok(())
}

fn status(cfg: &AppConfig, json: bool) -> Result<()> {
    let path = cfg.state_file();
    if !path.exists() {
        println!("{}", style(format!("no status at {} yet", path.display())).yellow());
        return Ok(());
    }
    let snapshot = load_status(&path)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
        return Ok(());
    }

    println!("{} {}", style("scheduler:").bold(), snapshot.scheduler_state);
    for line in status_lines(&snapshot, Utc::now()) {
        println!("  {line}");
    }
    for (job, at) in &snapshot.next_runs {
        println!("  {} {job} at {at}", style("next").dim());
    }
    if let Some(m) = &snapshot.metrics {
        println!(
            "{} retrieved={} stored={} indexed={} annotated={} clears={}",
            style("totals:").bold(),
            m.documents_retrieved,
            m.documents_stored,
            m.documents_indexed,
            m.documents_annotated,
            m.local_clears
        );
    }
    Ok(())
}
