//! Core identifiers and shared lightweight types for docsync.
//!
//! These types intentionally avoid heavy dependencies and stay
//! serialization-friendly for bincode snapshots and JSON status payloads.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub type Timestamp = i64; // Unix timestamp (seconds); i64 for easy serde.

/// Metadata key holding the best similarity score found for a document.
pub const SIM_SCORE_KEY: &str = "sim_score";
/// Metadata key holding the id of the most similar prior document.
pub const SIMILAR_TO_KEY: &str = "similar_to";

/// Opaque unique document key shared by the local and remote stores.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocId(pub String);

impl DocId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for DocId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A typed metadata value attached to a document.
///
/// Uses the default externally-tagged serde representation so bincode
/// snapshots can round-trip it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetadataValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl MetadataValue {
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

pub type Metadata = BTreeMap<String, MetadataValue>;

/// A stored document. Content is immutable once written; metadata is where
/// annotations land.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocId,
    pub content: String,
    pub created_at: Timestamp,
    pub metadata: Metadata,
}

impl Document {
    pub fn new(id: impl Into<DocId>, content: impl Into<String>, created_at: Timestamp) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            created_at,
            metadata: Metadata::new(),
        }
    }

    /// Similarity score previously folded into this document's metadata.
    pub fn sim_score(&self) -> Option<f64> {
        self.metadata.get(SIM_SCORE_KEY).and_then(MetadataValue::as_f64)
    }

    /// Id of the most similar prior document, if annotated.
    pub fn similar_to(&self) -> Option<DocId> {
        self.metadata
            .get(SIMILAR_TO_KEY)
            .and_then(MetadataValue::as_str)
            .map(DocId::new)
    }
}

/// Build the `{sim_score, similar_to}` metadata patch written back to a store.
pub fn similarity_annotation(score: f32, similar_to: &DocId) -> Metadata {
    let mut patch = Metadata::new();
    patch.insert(
        SIM_SCORE_KEY.to_string(),
        MetadataValue::Float(f64::from(score)),
    );
    patch.insert(
        SIMILAR_TO_KEY.to_string(),
        MetadataValue::String(similar_to.0.clone()),
    );
    patch
}

/// Current wall-clock time as a Unix timestamp in seconds.
pub fn now_ts() -> Timestamp {
    chrono::Utc::now().timestamp()
}

pub mod config;
pub mod persist;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn annotation_round_trips_through_metadata() {
        let mut doc = Document::new("a", "hello", 10);
        doc.metadata
            .extend(similarity_annotation(0.75, &DocId::from("b")));
        assert_eq!(doc.sim_score(), Some(0.75));
        assert_eq!(doc.similar_to(), Some(DocId::from("b")));
    }

    #[test]
    fn unannotated_document_has_no_score() {
        let doc = Document::new("a", "hello", 10);
        assert!(doc.sim_score().is_none());
        assert!(doc.similar_to().is_none());
    }
}
