//! Hashed TF-IDF vectorizer.
//!
//! Tokens are hashed into `dim` buckets (CRC32 of the lowercased token), so
//! the vocabulary never has to be stored and the output dimension is fixed up
//! front. Fitting records per-bucket document frequencies and turns them into
//! smoothed IDF weights; embeddings are L2-normalised TF-IDF vectors.

use crate::{Vectorizer, VectorizerError, VectorizerKind, VectorizerResult};
use core_types::persist::{read_snapshot, write_snapshot};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct TfidfModel {
    dim: usize,
    documents: u64,
    idf: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct TfidfVectorizer {
    kind: VectorizerKind,
    dim: usize,
    model: Option<TfidfModel>,
}

impl TfidfVectorizer {
    pub const fn new(kind: VectorizerKind, dim: usize) -> Self {
        Self {
            kind,
            dim,
            model: None,
        }
    }

    /// Number of documents the current model was fitted on.
    pub fn trained_documents(&self) -> Option<u64> {
        self.model.as_ref().map(|m| m.documents)
    }

    fn bucket(&self, token: &str) -> usize {
        crc32fast::hash(token.as_bytes()) as usize % self.dim
    }

    fn term_counts(&self, text: &str) -> Vec<u32> {
        let mut counts = vec![0u32; self.dim];
        for token in tokenize(text) {
            counts[self.bucket(&token)] += 1;
        }
        counts
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

impl Vectorizer for TfidfVectorizer {
    fn kind(&self) -> VectorizerKind {
        self.kind
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn is_trained(&self) -> bool {
        self.model.is_some()
    }

    #[allow(clippy::cast_precision_loss)]
    fn fit(&mut self, corpus: &[&str]) -> VectorizerResult<()> {
        let mut df = vec![0u64; self.dim];
        let mut tokens_seen = false;
        for text in corpus {
            let counts = self.term_counts(text);
            for (slot, count) in df.iter_mut().zip(&counts) {
                if *count > 0 {
                    *slot += 1;
                    tokens_seen = true;
                }
            }
        }
        if corpus.is_empty() || !tokens_seen {
            return Err(VectorizerError::EmptyCorpus);
        }

        let n = corpus.len() as f32;
        let idf = df
            .iter()
            .map(|&d| ((1.0 + n) / (1.0 + d as f32)).ln() + 1.0)
            .collect();
        self.model = Some(TfidfModel {
            dim: self.dim,
            documents: corpus.len() as u64,
            idf,
        });
        tracing::debug!(kind = self.kind.as_str(), dim = self.dim, documents = corpus.len(), "tf-idf model fitted");
        Ok(())
    }

    fn load(&mut self, path: &Path) -> VectorizerResult<()> {
        let model: TfidfModel = read_snapshot(path)?;
        if model.dim != self.dim || model.idf.len() != self.dim {
            return Err(VectorizerError::DimensionMismatch {
                expected: self.dim,
                found: model.dim,
            });
        }
        self.model = Some(model);
        Ok(())
    }

    fn save(&self, path: &Path) -> VectorizerResult<()> {
        let model = self
            .model
            .as_ref()
            .ok_or(VectorizerError::NotTrained(self.kind.as_str()))?;
        write_snapshot(path, model)?;
        Ok(())
    }

    #[allow(clippy::cast_precision_loss)]
    fn embed(&self, text: &str) -> VectorizerResult<Vec<f32>> {
        let model = self
            .model
            .as_ref()
            .ok_or(VectorizerError::NotTrained(self.kind.as_str()))?;
        let counts = self.term_counts(text);
        let mut vector: Vec<f32> = counts
            .iter()
            .zip(&model.idf)
            .map(|(&tf, &idf)| tf as f32 * idf)
            .collect();
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }
}
