//! Trainable document vectorizers.
//!
//! A vectorizer maps document text to a fixed-dimension embedding. It has a
//! training phase (a pass over a corpus) and can be persisted to and loaded
//! from a path. Embedding with an untrained instance is an error.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

mod tfidf;

pub use tfidf::TfidfVectorizer;

/// Which role a vectorizer plays in retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VectorizerKind {
    /// Low-dimensional model used to shortlist neighbours.
    Candidate,
    /// Higher-dimensional model used to score the shortlist.
    Retriever,
}

impl VectorizerKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Candidate => "candidate",
            Self::Retriever => "retriever",
        }
    }
}

#[derive(Debug, Error)]
pub enum VectorizerError {
    #[error("{0} vectorizer used before training or loading")]
    NotTrained(&'static str),
    #[error("cannot train on an empty corpus")]
    EmptyCorpus,
    #[error("model dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("model io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type VectorizerResult<T> = Result<T, VectorizerError>;

pub trait Vectorizer: Send + Sync {
    fn kind(&self) -> VectorizerKind;

    /// Embedding dimension.
    fn dim(&self) -> usize;

    fn is_trained(&self) -> bool;

    /// Fit parameters against `corpus`, replacing any previous model.
    fn fit(&mut self, corpus: &[&str]) -> VectorizerResult<()>;

    fn load(&mut self, path: &Path) -> VectorizerResult<()>;

    fn save(&self, path: &Path) -> VectorizerResult<()>;

    fn embed(&self, text: &str) -> VectorizerResult<Vec<f32>>;
}
