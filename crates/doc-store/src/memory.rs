use crate::{DocumentStore, StoreError, StoreResult};
use core_types::{DocId, Document, Metadata, Timestamp};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};

pub(crate) type DocumentMap = BTreeMap<DocId, Document>;

pub(crate) fn ids_since(docs: &DocumentMap, from_time: Option<Timestamp>) -> BTreeSet<DocId> {
    docs.values()
        .filter(|d| from_time.is_none_or(|t| d.created_at >= t))
        .map(|d| d.id.clone())
        .collect()
}

pub(crate) fn select(docs: &DocumentMap, ids: &[DocId]) -> Vec<Document> {
    ids.iter().filter_map(|id| docs.get(id).cloned()).collect()
}

pub(crate) fn insert_new(docs: &mut DocumentMap, incoming: &[Document]) -> usize {
    let mut written = 0;
    for doc in incoming {
        if !docs.contains_key(&doc.id) {
            docs.insert(doc.id.clone(), doc.clone());
            written += 1;
        }
    }
    written
}

pub(crate) fn merge_meta(docs: &mut DocumentMap, id: &DocId, patch: &Metadata) -> StoreResult<()> {
    let doc = docs
        .get_mut(id)
        .ok_or_else(|| StoreError::NotFound(id.clone()))?;
    doc.metadata
        .extend(patch.iter().map(|(k, v)| (k.clone(), v.clone())));
    Ok(())
}

/// Process-local store. The connection flag can be flipped to simulate an
/// outage in tests.
#[derive(Debug)]
pub struct InMemoryStore {
    name: String,
    docs: RwLock<DocumentMap>,
    connected: AtomicBool,
    reconnectable: AtomicBool,
}

impl InMemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            docs: RwLock::new(DocumentMap::new()),
            connected: AtomicBool::new(true),
            reconnectable: AtomicBool::new(true),
        }
    }

    pub fn with_documents(name: impl Into<String>, docs: impl IntoIterator<Item = Document>) -> Self {
        let store = Self::new(name);
        {
            let mut guard = store.docs.write();
            for doc in docs {
                guard.insert(doc.id.clone(), doc);
            }
        }
        store
    }

    /// Drop the connection; `reconnectable` decides whether a reconnect heals it.
    pub fn disconnect(&self, reconnectable: bool) {
        self.connected.store(false, Ordering::SeqCst);
        self.reconnectable.store(reconnectable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.docs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.read().is_empty()
    }

    pub fn get(&self, id: &DocId) -> Option<Document> {
        self.docs.read().get(id).cloned()
    }

    fn check(&self) -> StoreResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable(self.name.clone()))
        }
    }
}

impl DocumentStore for InMemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn reconnect(&self) -> StoreResult<()> {
        if self.reconnectable.load(Ordering::SeqCst) {
            self.connected.store(true, Ordering::SeqCst);
            Ok(())
        } else {
            Err(StoreError::Unavailable(self.name.clone()))
        }
    }

    fn get_document_ids(&self, from_time: Option<Timestamp>) -> StoreResult<BTreeSet<DocId>> {
        self.check()?;
        Ok(ids_since(&self.docs.read(), from_time))
    }

    fn get_document_by_id(&self, ids: &[DocId]) -> StoreResult<Vec<Document>> {
        self.check()?;
        Ok(select(&self.docs.read(), ids))
    }

    fn get_all_documents(&self) -> StoreResult<Vec<Document>> {
        self.check()?;
        Ok(self.docs.read().values().cloned().collect())
    }

    fn write_documents(&self, docs: &[Document]) -> StoreResult<usize> {
        self.check()?;
        Ok(insert_new(&mut self.docs.write(), docs))
    }

    fn update_document_meta(&self, id: &DocId, patch: &Metadata) -> StoreResult<()> {
        self.check()?;
        merge_meta(&mut self.docs.write(), id, patch)
    }

    fn delete_all_documents(&self) -> StoreResult<()> {
        self.check()?;
        self.docs.write().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::similarity_annotation;

    fn doc(id: &str, ts: Timestamp) -> Document {
        Document::new(id, format!("content of {id}"), ts)
    }

    #[test]
    fn ids_filter_by_creation_time() {
        let store = InMemoryStore::with_documents("t", [doc("a", 10), doc("b", 20), doc("c", 30)]);
        let ids = store.get_document_ids(Some(20)).unwrap();
        assert_eq!(ids, BTreeSet::from([DocId::from("b"), DocId::from("c")]));
        assert_eq!(store.get_document_ids(None).unwrap().len(), 3);
    }

    #[test]
    fn get_by_id_preserves_request_order_and_skips_unknown() {
        let store = InMemoryStore::with_documents("t", [doc("a", 1), doc("b", 2)]);
        let got = store
            .get_document_by_id(&[DocId::from("b"), DocId::from("zz"), DocId::from("a")])
            .unwrap();
        let ids: Vec<_> = got.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn writes_are_idempotent_by_id() {
        let store = InMemoryStore::new("t");
        assert_eq!(store.write_documents(&[doc("a", 1), doc("b", 2)]).unwrap(), 2);
        assert_eq!(store.write_documents(&[doc("a", 1)]).unwrap(), 0);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn metadata_patch_merges() {
        let store = InMemoryStore::with_documents("t", [doc("a", 1)]);
        let id = DocId::from("a");
        store
            .update_document_meta(&id, &similarity_annotation(0.5, &DocId::from("z")))
            .unwrap();
        let got = store.get(&id).unwrap();
        assert_eq!(got.sim_score(), Some(0.5));
        assert!(matches!(
            store.update_document_meta(&DocId::from("missing"), &Metadata::new()),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn ensure_connected_reconnects_once() {
        let store = InMemoryStore::new("t");
        store.disconnect(true);
        assert!(store.get_document_ids(None).is_err());
        store.ensure_connected().unwrap();
        assert!(store.get_document_ids(None).is_ok());

        store.disconnect(false);
        let err = store.ensure_connected().unwrap_err();
        assert!(err.is_unavailable());
    }
}
