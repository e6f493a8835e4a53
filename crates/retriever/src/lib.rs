//! Similarity retrieval over a single document store.
//!
//! A [`Retriever`] binds one store to a candidate vectorizer, a retriever
//! vectorizer, and an index artifact. Lookups are two-stage: the candidate
//! embedding shortlists neighbours from the candidate index, then the
//! retriever embedding rescores the shortlist and the best rescored
//! neighbour wins.

use core_types::DocId;
use doc_store::StoreError;
use semantic_index::IndexError;
use thiserror::Error;
use vectorizer::VectorizerError;

mod retriever;

pub use retriever::Retriever;

#[derive(Debug, Error)]
pub enum RetrieverError {
    #[error("similarity lookup before any index was built or loaded")]
    IndexNotReady,
    #[error("training the {kind} vectorizer failed: {source}")]
    Training {
        kind: &'static str,
        #[source]
        source: VectorizerError,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Vectorizer(#[from] VectorizerError),
    #[error(transparent)]
    Index(#[from] IndexError),
}

pub type RetrieverResult<T> = Result<T, RetrieverError>;

/// Best prior match for one looked-up document.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityResult {
    pub doc_id: DocId,
    pub similarity_score: Option<f32>,
    pub retrieve_result: Option<DocId>,
}

impl SimilarityResult {
    pub const fn empty(doc_id: DocId) -> Self {
        Self {
            doc_id,
            similarity_score: None,
            retrieve_result: None,
        }
    }

    /// Score used for comparisons; a missing neighbour counts as 0.
    pub fn score_or_default(&self) -> f32 {
        self.similarity_score.unwrap_or(0.0)
    }
}

/// Whether a vectorizer was read from disk or fitted from the corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainOutcome {
    Loaded,
    Fitted { documents: usize },
}

/// Which documents an incremental index update considers.
#[derive(Debug, Clone, Copy)]
pub enum UpdateScope<'a> {
    /// Every document in the bound store.
    Corpus,
    /// Only these ids (typically the documents just written).
    Ids(&'a [DocId]),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexMode {
    Rebuilt,
    Appended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexUpdate {
    pub mode: IndexMode,
    /// Documents embedded and written into the index by this call.
    pub indexed: usize,
    /// Documents in the index afterwards.
    pub total: usize,
}
