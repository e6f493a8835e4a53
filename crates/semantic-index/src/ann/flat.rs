use crate::{EmbeddingIndex, EmbeddingRecord, IndexError, IndexResult, Neighbor, cosine};
use core_types::DocId;
use core_types::persist::{read_snapshot, write_snapshot};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::Path;

/// Exhaustive cosine index: every query scans all stored embeddings. Exact,
/// so it serves as the reference the HNSW results are checked against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlatIndex {
    dim: usize,
    entries: BTreeMap<DocId, Vec<f32>>,
}

impl FlatIndex {
    pub const fn new(dim: usize) -> Self {
        Self {
            dim,
            entries: BTreeMap::new(),
        }
    }

    fn check_dim(&self, vector: &[f32]) -> IndexResult<()> {
        if vector.len() == self.dim {
            Ok(())
        } else {
            Err(IndexError::DimensionMismatch {
                expected: self.dim,
                found: vector.len(),
            })
        }
    }
}

impl EmbeddingIndex for FlatIndex {
    fn dim(&self) -> usize {
        self.dim
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn contains(&self, id: &DocId) -> bool {
        self.entries.contains_key(id)
    }

    fn get(&self, id: &DocId) -> Option<&[f32]> {
        self.entries.get(id).map(Vec::as_slice)
    }

    fn rebuild(&mut self, records: Vec<EmbeddingRecord>) -> IndexResult<()> {
        for r in &records {
            self.check_dim(&r.vector)?;
        }
        self.entries = records.into_iter().map(|r| (r.doc_id, r.vector)).collect();
        Ok(())
    }

    fn insert(&mut self, records: Vec<EmbeddingRecord>) -> IndexResult<usize> {
        for r in &records {
            self.check_dim(&r.vector)?;
        }
        let mut added = 0;
        for r in records {
            if let std::collections::btree_map::Entry::Vacant(slot) = self.entries.entry(r.doc_id) {
                slot.insert(r.vector);
                added += 1;
            }
        }
        Ok(added)
    }

    fn upsert(&mut self, record: EmbeddingRecord) -> IndexResult<()> {
        self.check_dim(&record.vector)?;
        self.entries.insert(record.doc_id, record.vector);
        Ok(())
    }

    fn query(&self, vector: &[f32], k: usize) -> IndexResult<Vec<Neighbor>> {
        self.check_dim(vector)?;
        if k == 0 {
            return Ok(Vec::new());
        }
        let mut hits: Vec<Neighbor> = self
            .entries
            .iter()
            .map(|(id, stored)| Neighbor {
                doc_id: id.clone(),
                score: cosine(vector, stored),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.doc_id.cmp(&b.doc_id))
        });
        hits.truncate(k);
        Ok(hits)
    }

    fn save(&self, path: &Path) -> IndexResult<()> {
        write_snapshot(path, self)?;
        Ok(())
    }

    fn load(path: &Path) -> IndexResult<Self> {
        Ok(read_snapshot(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn rec(id: &str, v: &[f32]) -> EmbeddingRecord {
        EmbeddingRecord::new(DocId::from(id), v.to_vec())
    }

    #[test]
    fn query_ranks_by_cosine() {
        let mut idx = FlatIndex::new(2);
        idx.rebuild(vec![
            rec("x", &[1.0, 0.0]),
            rec("y", &[0.0, 1.0]),
            rec("xy", &[1.0, 1.0]),
        ])
        .unwrap();
        let hits = idx.query(&[1.0, 0.1], 2).unwrap();
        assert_eq!(hits[0].doc_id, DocId::from("x"));
        assert_eq!(hits[1].doc_id, DocId::from("xy"));
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn insert_skips_existing_ids() {
        let mut idx = FlatIndex::new(2);
        assert_eq!(idx.insert(vec![rec("a", &[1.0, 0.0])]).unwrap(), 1);
        assert_eq!(
            idx.insert(vec![rec("a", &[0.0, 1.0]), rec("b", &[0.0, 1.0])])
                .unwrap(),
            1
        );
        assert_eq!(idx.get(&DocId::from("a")), Some(&[1.0, 0.0][..]));

        idx.upsert(rec("a", &[0.0, 1.0])).unwrap();
        assert_eq!(idx.get(&DocId::from("a")), Some(&[0.0, 1.0][..]));
    }

    #[test]
    fn wrong_dimension_is_rejected_without_partial_insert() {
        let mut idx = FlatIndex::new(3);
        let err = idx
            .insert(vec![rec("a", &[1.0, 0.0, 0.0]), rec("b", &[1.0])])
            .unwrap_err();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch { expected: 3, found: 1 }
        ));
        assert!(idx.is_empty());
    }

    #[test]
    fn rebuild_replaces_entries() {
        let mut idx = FlatIndex::new(1);
        idx.insert(vec![rec("old", &[1.0])]).unwrap();
        idx.rebuild(vec![rec("new", &[1.0])]).unwrap();
        assert!(!idx.contains(&DocId::from("old")));
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("flat.bin");
        let mut idx = FlatIndex::new(2);
        idx.insert(vec![rec("a", &[0.6, 0.8])]).unwrap();
        idx.save(&path).unwrap();
        let back = FlatIndex::load(&path).unwrap();
        assert_eq!(back.dim(), 2);
        assert_eq!(back.get(&DocId::from("a")), Some(&[0.6, 0.8][..]));
    }

    proptest! {
        #[test]
        fn stored_vector_is_its_own_top_hit(
            vectors in proptest::collection::vec(
                proptest::collection::vec(0.01f32..1.0, 4), 1..20)
        ) {
            let mut idx = FlatIndex::new(4);
            let records: Vec<_> = vectors
                .iter()
                .enumerate()
                .map(|(i, v)| EmbeddingRecord::new(DocId::new(format!("d{i:03}")), v.clone()))
                .collect();
            idx.rebuild(records).unwrap();
            for (i, v) in vectors.iter().enumerate() {
                let hits = idx.query(v, vectors.len()).unwrap();
                let own = hits.iter().find(|h| h.doc_id == DocId::new(format!("d{i:03}"))).unwrap();
                prop_assert!((own.score - hits[0].score).abs() < 1e-5);
            }
        }
    }
}
