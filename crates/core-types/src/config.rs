//! Process configuration loaded from a TOML file with environment overrides.
//!
//! Values are static for the lifetime of the process: the first call to
//! [`load_or_create_config`] wins and later calls return the same snapshot.

use anyhow::{Context, Result, bail};
use chrono::NaiveTime;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "docsync.toml";
pub const CONFIG_PATH_ENV: &str = "SYNCD_CONFIG";
pub const RUN_LOCK_FILE: &str = "run.lock";

static CONFIG: OnceCell<AppConfig> = OnceCell::new();

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub stores: StoresSection,
    pub vectorizers: VectorizersSection,
    pub index: IndexSection,
    pub schedule: ScheduleSection,
    pub logging: LoggingConfig,
    pub metrics: MetricsSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSection {
    /// Directory for the persisted status snapshot.
    pub state_dir: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            state_dir: "state".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoresSection {
    pub local: String,
    pub remote: String,
}

impl Default for StoresSection {
    fn default() -> Self {
        Self {
            local: "local.db".into(),
            remote: "remote.db".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorizersSection {
    pub candidate_dim: usize,
    pub retriever_dim: usize,
    pub candidate_path: String,
    pub retriever_path: String,
    /// Refit both vectorizers on the remote corpus during the daily resync.
    pub retrain_daily: bool,
}

impl Default for VectorizersSection {
    fn default() -> Self {
        Self {
            candidate_dim: 768,
            retriever_dim: 1024,
            candidate_path: "cand.bin".into(),
            retriever_path: "rtrv.bin".into(),
            retrain_daily: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSection {
    /// Index artifact for the local corpus, maintained by the incremental job.
    pub local_path: String,
    /// Index artifact for the remote corpus, rebuilt by the daily job.
    pub remote_path: String,
    /// Number of candidate neighbours rescored by the retriever vectorizer.
    pub candidate_pool: usize,
}

impl Default for IndexSection {
    fn default() -> Self {
        Self {
            local_path: "index.bin".into(),
            remote_path: "remote_index.bin".into(),
            candidate_pool: 32,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleSection {
    pub sync_interval_secs: u64,
    /// How far back each incremental run looks for new remote documents.
    pub lookback_secs: u64,
    /// Wall-clock time (`HH:MM`, local time) of the daily resync.
    pub resync_at: String,
    pub run_timeout_secs: u64,
}

impl Default for ScheduleSection {
    fn default() -> Self {
        Self {
            sync_interval_secs: 60,
            lookback_secs: 120,
            resync_at: "00:00".into(),
            run_timeout_secs: 600,
        }
    }
}

impl ScheduleSection {
    pub fn resync_time(&self) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(&self.resync_at, "%H:%M")
            .with_context(|| format!("invalid resync_at '{}', expected HH:MM", self.resync_at))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is not set.
    pub level: String,
    /// Optional log file; empty disables file output.
    pub file: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            file: String::new(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSection {
    pub enabled: bool,
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl AppConfig {
    /// Apply the environment overrides recognised by the jobs.
    pub fn apply_env_overrides(&mut self) {
        let overrides: [(&str, &mut String); 6] = [
            ("LOCAL_DB_PATH", &mut self.stores.local),
            ("REMOTE_DB_PATH", &mut self.stores.remote),
            ("CAND_PATH", &mut self.vectorizers.candidate_path),
            ("RTRV_PATH", &mut self.vectorizers.retriever_path),
            ("IDX_PATH", &mut self.index.local_path),
            ("REMOTE_IDX_PATH", &mut self.index.remote_path),
        ];
        for (key, slot) in overrides {
            if let Ok(value) = env::var(key)
                && !value.is_empty()
            {
                *slot = value;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.vectorizers.candidate_dim == 0 || self.vectorizers.retriever_dim == 0 {
            bail!("vectorizer dimensions must be non-zero");
        }
        if self.index.candidate_pool == 0 {
            bail!("index.candidate_pool must be non-zero");
        }
        if self.schedule.sync_interval_secs == 0 {
            bail!("schedule.sync_interval_secs must be non-zero");
        }
        self.schedule.resync_time()?;
        Ok(())
    }

    pub fn state_file(&self) -> PathBuf {
        Path::new(&self.app.state_dir).join("status.json")
    }

    /// Advisory lock shared by every process that runs jobs against this config.
    pub fn run_lock_file(&self) -> PathBuf {
        Path::new(&self.app.state_dir).join(RUN_LOCK_FILE)
    }
}

/// Read a config file, writing the defaults first if it does not exist.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let mut cfg = if path.exists() {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("failed to parse config {}", path.display()))?
    } else {
        let cfg = AppConfig::default();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(&cfg)?)
            .with_context(|| format!("failed to write default config {}", path.display()))?;
        cfg
    };
    cfg.apply_env_overrides();
    cfg.validate()?;
    Ok(cfg)
}

/// Load the process-wide configuration once.
///
/// Resolution order for the file: explicit `path`, then `SYNCD_CONFIG`, then
/// `docsync.toml` in the working directory.
pub fn load_or_create_config(path: Option<&Path>) -> Result<&'static AppConfig> {
    CONFIG.get_or_try_init(|| {
        dotenvy::dotenv().ok();
        let resolved = path.map(Path::to_path_buf).unwrap_or_else(|| {
            env::var(CONFIG_PATH_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE))
        });
        load_config_from(&resolved)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_are_valid() {
        let cfg = AppConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.vectorizers.candidate_dim, 768);
        assert_eq!(cfg.vectorizers.retriever_dim, 1024);
        assert_eq!(cfg.schedule.resync_time().unwrap(), NaiveTime::MIN);
    }

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("conf").join("docsync.toml");
        let cfg = load_config_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(cfg.index.candidate_pool, 32);
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("docsync.toml");
        fs::write(&path, "[schedule]\nresync_at = \"03:30\"\n").unwrap();
        let cfg = load_config_from(&path).unwrap();
        assert_eq!(cfg.schedule.resync_at, "03:30");
        assert_eq!(cfg.schedule.sync_interval_secs, 60);
    }

    #[test]
    fn bad_resync_time_is_rejected() {
        let cfg = AppConfig {
            schedule: ScheduleSection {
                resync_at: "midnight".into(),
                ..ScheduleSection::default()
            },
            ..AppConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_dimension_is_rejected() {
        let mut cfg = AppConfig::default();
        cfg.vectorizers.candidate_dim = 0;
        assert!(cfg.validate().is_err());
    }
}
