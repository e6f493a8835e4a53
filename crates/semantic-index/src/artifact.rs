use crate::{EmbeddingIndex, HnswIndex, IndexError, IndexResult};
use core_types::DocId;
use core_types::persist::{read_snapshot, write_snapshot};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// The persisted index artifact for one corpus: a candidate index and a
/// retriever index covering the same documents.
#[derive(Debug, Serialize, Deserialize)]
pub struct IndexArtifact {
    pub candidate: HnswIndex,
    pub retriever: HnswIndex,
}

impl IndexArtifact {
    pub fn new(candidate_dim: usize, retriever_dim: usize) -> Self {
        Self {
            candidate: HnswIndex::new(candidate_dim),
            retriever: HnswIndex::new(retriever_dim),
        }
    }

    pub fn len(&self) -> usize {
        self.retriever.len()
    }

    pub fn is_empty(&self) -> bool {
        self.retriever.is_empty()
    }

    pub fn contains(&self, id: &DocId) -> bool {
        self.candidate.contains(id) && self.retriever.contains(id)
    }

    /// Load an artifact and check it was built with the expected dimensions.
    pub fn load(path: &Path, candidate_dim: usize, retriever_dim: usize) -> IndexResult<Self> {
        let artifact: Self = read_snapshot(path)?;
        for (expected, found) in [
            (candidate_dim, artifact.candidate.dim()),
            (retriever_dim, artifact.retriever.dim()),
        ] {
            if expected != found {
                return Err(IndexError::DimensionMismatch { expected, found });
            }
        }
        tracing::debug!(path = %path.display(), documents = artifact.len(), "index artifact loaded");
        Ok(artifact)
    }

    pub fn save(&self, path: &Path) -> IndexResult<()> {
        write_snapshot(path, self)?;
        tracing::debug!(path = %path.display(), documents = self.len(), "index artifact saved");
        Ok(())
    }
}
