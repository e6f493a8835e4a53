use anyhow::{Context, Result, anyhow};
use core_types::config::LoggingConfig;
use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `cfg.level`. When `cfg.file` is set, a daily-rolling
/// plain-text copy of the log is written through a non-blocking appender; the
/// returned guard must stay alive for buffered lines to be flushed.
pub fn init_tracing_with_config(cfg: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.level))
        .with_context(|| format!("invalid log level '{}'", cfg.level))?;

    let (file_layer, guard) = if cfg.file.is_empty() {
        (None, None)
    } else {
        let path = Path::new(&cfg.file);
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let name = path
            .file_name()
            .with_context(|| format!("logging.file '{}' has no file name", cfg.file))?;
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create log dir {}", dir.display()))?;
        let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, name));
        (
            Some(fmt::layer().with_ansi(false).with_writer(writer)),
            Some(guard),
        )
    };

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);
    let installed = if cfg.json {
        registry.with(fmt::layer().json().with_target(true)).try_init()
    } else {
        registry.with(fmt::layer().with_target(false)).try_init()
    };
    installed.map_err(|err| anyhow!("failed to install tracing subscriber: {err}"))?;
    Ok(guard)
}
