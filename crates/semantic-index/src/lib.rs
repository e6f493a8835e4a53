//! Semantic / vector search over document embeddings.
//!
//! The index is a nearest-neighbour oracle: callers hand it embeddings keyed
//! by document id and ask for the closest stored embeddings to a query
//! vector. [`HnswIndex`] answers from an HNSW graph (`hnsw_rs`). Entries are never mutated in place; re-embedding a document goes
//! through [`EmbeddingIndex::rebuild`] or [`EmbeddingIndex::upsert`].

use core_types::DocId;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

pub mod ann;
mod artifact;

pub use ann::hnsw::HnswIndex;
pub use artifact::IndexArtifact;

/// A derived embedding for one document. Always recomputable from the
/// document content and a trained vectorizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub doc_id: DocId,
    pub vector: Vec<f32>,
}

impl EmbeddingRecord {
    pub const fn new(doc_id: DocId, vector: Vec<f32>) -> Self {
        Self { doc_id, vector }
    }
}

/// A query hit: higher `score` means more similar.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub doc_id: DocId,
    pub score: f32,
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("vector dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("index io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type IndexResult<T> = Result<T, IndexError>;

pub trait EmbeddingIndex: Send + Sync {
    fn dim(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn contains(&self, id: &DocId) -> bool;

    /// Stored embedding for `id`.
    fn get(&self, id: &DocId) -> Option<&[f32]>;

    /// Replace the whole index with `records`.
    fn rebuild(&mut self, records: Vec<EmbeddingRecord>) -> IndexResult<()>;

    /// Append records whose ids are not indexed yet; returns how many were added.
    fn insert(&mut self, records: Vec<EmbeddingRecord>) -> IndexResult<usize>;

    /// Insert or replace a single record.
    fn upsert(&mut self, record: EmbeddingRecord) -> IndexResult<()>;

    /// Up to `k` nearest stored embeddings, best first.
    fn query(&self, vector: &[f32], k: usize) -> IndexResult<Vec<Neighbor>>;

    fn save(&self, path: &Path) -> IndexResult<()>;

    fn load(path: &Path) -> IndexResult<Self>
    where
        Self: Sized;
}

/// Cosine similarity of two equal-length vectors; 0 when either is all zeros.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}
