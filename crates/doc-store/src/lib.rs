//! Document store contract consumed by the sync jobs.
//!
//! The storage engine behind a store is not this crate's concern; the trait
//! captures the handful of calls the jobs make, and every call must be safe to
//! retry. Two implementations ship here: [`InMemoryStore`] for tests and
//! ephemeral runs, and [`SnapshotStore`], a file-backed store rooted at a
//! directory.

use core_types::{DocId, Document, Metadata, Timestamp};
use std::collections::BTreeSet;
use thiserror::Error;

mod memory;
mod snapshot;

pub use memory::InMemoryStore;
pub use snapshot::SnapshotStore;

/// Errors that can surface while talking to a document store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store '{0}' is unavailable")]
    Unavailable(String),
    #[error("document {0} not found")]
    NotFound(DocId),
    #[error("store data is corrupt: {0}")]
    Corrupt(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Key-value view over documents and their metadata.
pub trait DocumentStore: Send + Sync {
    /// Short label used in logs ("local", "remote", ...).
    fn name(&self) -> &str;

    /// Whether the underlying connection is currently usable.
    fn is_connected(&self) -> bool;

    /// Re-establish the connection.
    fn reconnect(&self) -> StoreResult<()>;

    /// Ids of documents created at or after `from_time`, or all ids when `None`.
    fn get_document_ids(&self, from_time: Option<Timestamp>) -> StoreResult<BTreeSet<DocId>>;

    /// Documents for `ids`, in the order requested. Unknown ids are skipped.
    fn get_document_by_id(&self, ids: &[DocId]) -> StoreResult<Vec<Document>>;

    /// Every document in the store, ordered by id.
    fn get_all_documents(&self) -> StoreResult<Vec<Document>>;

    /// Insert documents; ids already present are left untouched. Returns the
    /// number of documents actually written.
    fn write_documents(&self, docs: &[Document]) -> StoreResult<usize>;

    /// Merge `patch` into a document's metadata.
    fn update_document_meta(&self, id: &DocId, patch: &Metadata) -> StoreResult<()>;

    /// Remove every document.
    fn delete_all_documents(&self) -> StoreResult<()>;

    /// Verify the connection, attempting one reconnect if it is down.
    fn ensure_connected(&self) -> StoreResult<()> {
        if self.is_connected() {
            return Ok(());
        }
        tracing::warn!(store = self.name(), "store connection not live, trying reconnect");
        match self.reconnect() {
            Ok(()) if self.is_connected() => Ok(()),
            Ok(()) => Err(StoreError::Unavailable(self.name().to_string())),
            Err(err) => {
                tracing::error!(store = self.name(), error = %err, "reconnect failed");
                Err(StoreError::Unavailable(self.name().to_string()))
            }
        }
    }
}

impl<S: DocumentStore + ?Sized> DocumentStore for std::sync::Arc<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn reconnect(&self) -> StoreResult<()> {
        (**self).reconnect()
    }

    fn get_document_ids(&self, from_time: Option<Timestamp>) -> StoreResult<BTreeSet<DocId>> {
        (**self).get_document_ids(from_time)
    }

    fn get_document_by_id(&self, ids: &[DocId]) -> StoreResult<Vec<Document>> {
        (**self).get_document_by_id(ids)
    }

    fn get_all_documents(&self) -> StoreResult<Vec<Document>> {
        (**self).get_all_documents()
    }

    fn write_documents(&self, docs: &[Document]) -> StoreResult<usize> {
        (**self).write_documents(docs)
    }

    fn update_document_meta(&self, id: &DocId, patch: &Metadata) -> StoreResult<()> {
        (**self).update_document_meta(id, patch)
    }

    fn delete_all_documents(&self) -> StoreResult<()> {
        (**self).delete_all_documents()
    }

    fn ensure_connected(&self) -> StoreResult<()> {
        (**self).ensure_connected()
    }
}
