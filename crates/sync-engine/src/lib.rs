//! The two recurring jobs that keep the local and remote stores in step.
//!
//! [`SyncEngine`] is the incremental job: replicate new remote documents
//! locally, keep the local index current, and write back the similarity
//! annotation whenever the local corpus produced the better match.
//! [`ResyncEngine`] is the daily job: rebuild the remote index from scratch,
//! then clear the local store.
//!
//! Both jobs are plain blocking calls over an explicit [`SyncContext`]; the
//! caller owns scheduling, timeouts, and serialization of runs.

use core_types::config::AppConfig;
use doc_store::{DocumentStore, StoreError};
use retriever::{Retriever, RetrieverError};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use vectorizer::{TfidfVectorizer, VectorizerKind};

mod resync;
mod sync;

pub use resync::{ResyncEngine, ResyncReport};
pub use sync::{SyncEngine, SyncOutcome, SyncReport};

pub type StoreHandle = Arc<dyn DocumentStore>;

/// Run-level failures. Every variant is caught at the job boundary and turns
/// into a logged, skipped run.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{store} store unavailable")]
    StoreUnavailable { store: String },
    #[error("trained artifact missing at {}", path.display())]
    ArtifactsMissing { path: PathBuf },
    #[error("similarity lookup attempted before the index was ready")]
    IndexNotReady,
    #[error("training failed: {0}")]
    TrainingFailure(String),
    #[error("run exceeded its {0:?} time limit")]
    Timeout(Duration),
    #[error(transparent)]
    Store(StoreError),
    #[error(transparent)]
    Retriever(RetrieverError),
    #[error("artifact housekeeping failed: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Short machine-friendly label for logs and metrics.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::StoreUnavailable { .. } => "store_unavailable",
            Self::ArtifactsMissing { .. } => "artifacts_missing",
            Self::IndexNotReady => "index_not_ready",
            Self::TrainingFailure(_) => "training_failure",
            Self::Timeout(_) => "timeout",
            Self::Store(_) => "store",
            Self::Retriever(_) => "retriever",
            Self::Io(_) => "io",
        }
    }

    /// Whether a later tick can succeed without operator action.
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable { .. } | Self::Timeout(_) | Self::Store(_) | Self::Io(_)
        )
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(store) => Self::StoreUnavailable { store },
            other => Self::Store(other),
        }
    }
}

impl From<RetrieverError> for SyncError {
    fn from(err: RetrieverError) -> Self {
        match err {
            RetrieverError::IndexNotReady => Self::IndexNotReady,
            RetrieverError::Training { kind, source } => {
                Self::TrainingFailure(format!("{kind} vectorizer: {source}"))
            }
            RetrieverError::Store(store) => store.into(),
            other => Self::Retriever(other),
        }
    }
}

pub type SyncResult<T> = Result<T, SyncError>;

/// Both store connections, injected into every job run.
#[derive(Clone)]
pub struct SyncContext {
    pub local: StoreHandle,
    pub remote: StoreHandle,
}

impl SyncContext {
    pub fn new(local: StoreHandle, remote: StoreHandle) -> Self {
        Self { local, remote }
    }

    /// Check both connections, reconnecting each at most once.
    pub fn ensure_connected(&self) -> SyncResult<()> {
        self.local.ensure_connected()?;
        self.remote.ensure_connected()?;
        Ok(())
    }
}

/// Artifact paths and vectorizer shape shared by both jobs.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub candidate_dim: usize,
    pub retriever_dim: usize,
    pub candidate_path: PathBuf,
    pub retriever_path: PathBuf,
    pub local_index_path: PathBuf,
    pub remote_index_path: PathBuf,
    pub candidate_pool: usize,
    pub lookback: Duration,
    pub retrain_daily: bool,
}

impl SyncSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            candidate_dim: cfg.vectorizers.candidate_dim,
            retriever_dim: cfg.vectorizers.retriever_dim,
            candidate_path: cfg.vectorizers.candidate_path.clone().into(),
            retriever_path: cfg.vectorizers.retriever_path.clone().into(),
            local_index_path: cfg.index.local_path.clone().into(),
            remote_index_path: cfg.index.remote_path.clone().into(),
            candidate_pool: cfg.index.candidate_pool,
            lookback: Duration::from_secs(cfg.schedule.lookback_secs),
            retrain_daily: cfg.vectorizers.retrain_daily,
        }
    }

    /// First vectorizer artifact that is not on disk, if any.
    pub fn missing_vectorizer_artifact(&self) -> Option<&PathBuf> {
        [&self.candidate_path, &self.retriever_path]
            .into_iter()
            .find(|p| !p.exists())
    }
}

/// A retriever bound to `store` with freshly constructed (untrained)
/// vectorizers of the configured dimensions.
pub fn build_retriever(store: StoreHandle, settings: &SyncSettings) -> Retriever<StoreHandle> {
    Retriever::new(
        store,
        Box::new(TfidfVectorizer::new(
            VectorizerKind::Candidate,
            settings.candidate_dim,
        )),
        Box::new(TfidfVectorizer::new(
            VectorizerKind::Retriever,
            settings.retriever_dim,
        )),
    )
    .with_candidate_pool(settings.candidate_pool)
}

/// Fit-or-load both vectorizers of `retriever`, candidate first.
pub fn train_vectorizers(
    retriever: &mut Retriever<StoreHandle>,
    settings: &SyncSettings,
    retrain: bool,
) -> SyncResult<()> {
    retriever.train_candidate_vectorizer(retrain, &settings.candidate_path)?;
    retriever.train_retriever_vectorizer(retrain, &settings.retriever_path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use vectorizer::VectorizerError;

    #[test]
    fn unavailable_store_maps_to_store_unavailable() {
        let err: SyncError = StoreError::Unavailable("remote".into()).into();
        assert!(matches!(err, SyncError::StoreUnavailable { ref store } if store == "remote"));
        assert!(err.is_recoverable());
    }

    #[test]
    fn training_error_maps_to_training_failure() {
        let err: SyncError = RetrieverError::Training {
            kind: "candidate",
            source: VectorizerError::EmptyCorpus,
        }
        .into();
        assert_eq!(err.kind(), "training_failure");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn nested_store_error_is_unwrapped() {
        let err: SyncError =
            RetrieverError::Store(StoreError::Unavailable("local".into())).into();
        assert_eq!(err.kind(), "store_unavailable");
    }

    #[test]
    fn index_not_ready_is_preserved() {
        let err: SyncError = RetrieverError::IndexNotReady.into();
        assert!(matches!(err, SyncError::IndexNotReady));
    }

    #[test]
    fn settings_follow_config() {
        let cfg = AppConfig::default();
        let settings = SyncSettings::from_config(&cfg);
        assert_eq!(settings.candidate_dim, 768);
        assert_eq!(settings.lookback, Duration::from_secs(120));
        assert_eq!(settings.local_index_path, PathBuf::from("index.bin"));
    }
}
