use crate::{EmbeddingIndex, EmbeddingRecord, IndexError, IndexResult, Neighbor, cosine};
use core_types::DocId;
use core_types::persist::{read_snapshot, write_snapshot};
use hnsw_rs::prelude::*;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

const MAX_NB_CONNECTION: usize = 16;
const MAX_LAYER: usize = 16;
const EF_CONSTRUCTION: usize = 200;
const EF_SEARCH: usize = 64;
const MIN_ELEMENTS_HINT: usize = 1_000;

/// Approximate cosine index over an HNSW graph.
///
/// The graph only yields candidate slots; hits are scored against the stored
/// vectors with exact cosine and ordered by score, then document id. HNSW
/// cannot remove points, so replacing an embedding appends a new slot and the
/// old one goes stale until the next rebuild or reload. All-zero embeddings
/// are kept for [`EmbeddingIndex::get`] but never enter the graph.
///
/// Only the live embeddings are persisted; the graph is rebuilt on load.
pub struct HnswIndex {
    dim: usize,
    /// Slot (`DataId`) to document.
    ids: Vec<DocId>,
    /// Slot to embedding.
    vectors: Vec<Vec<f32>>,
    /// Document to its live slot.
    live: BTreeMap<DocId, usize>,
    graph: Hnsw<'static, f32, DistCosine>,
    graph_points: usize,
}

impl HnswIndex {
    pub fn new(dim: usize) -> Self {
        Self::with_capacity(dim, 0)
    }

    fn with_capacity(dim: usize, expected: usize) -> Self {
        Self {
            dim,
            ids: Vec::with_capacity(expected),
            vectors: Vec::with_capacity(expected),
            live: BTreeMap::new(),
            graph: new_graph(expected),
            graph_points: 0,
        }
    }

    pub fn ids(&self) -> impl Iterator<Item = &DocId> {
        self.live.keys()
    }

    /// Slots that no longer back a live document.
    pub fn stale(&self) -> usize {
        self.ids.len() - self.live.len()
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

    fn push(&mut self, doc_id: DocId, vector: Vec<f32>) {
        let slot = self.ids.len();
        if !is_zero(&vector) {
            self.graph.insert_slice((vector.as_slice(), slot));
            self.graph_points += 1;
        }
        self.live.insert(doc_id.clone(), slot);
        self.ids.push(doc_id);
        self.vectors.push(vector);
    }

    fn from_records(dim: usize, records: Vec<EmbeddingRecord>) -> IndexResult<Self> {
        let mut index = Self::with_capacity(dim, records.len());
        for r in &records {
            index.check_dim(&r.vector)?;
        }
        for r in records {
            index.push(r.doc_id, r.vector);
        }
        Ok(index)
    }
}

fn new_graph(expected: usize) -> Hnsw<'static, f32, DistCosine> {
    Hnsw::new(
        MAX_NB_CONNECTION,
        expected.max(MIN_ELEMENTS_HINT),
        MAX_LAYER,
        EF_CONSTRUCTION,
        DistCosine,
    )
}

fn is_zero(vector: &[f32]) -> bool {
    vector.iter().all(|v| *v == 0.0)
}

impl fmt::Debug for HnswIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HnswIndex")
            .field("dim", &self.dim)
            .field("live", &self.live.len())
            .field("stale", &self.stale())
            .field("graph_points", &self.graph_points)
            .finish_non_exhaustive()
    }
}

impl EmbeddingIndex for HnswIndex {
    fn dim(&self) -> usize {
        self.dim
    }

    fn len(&self) -> usize {
        self.live.len()
    }

    fn contains(&self, id: &DocId) -> bool {
        self.live.contains_key(id)
    }

    fn get(&self, id: &DocId) -> Option<&[f32]> {
        self.live.get(id).map(|&slot| self.vectors[slot].as_slice())
    }

    fn rebuild(&mut self, records: Vec<EmbeddingRecord>) -> IndexResult<()> {
        *self = Self::from_records(self.dim, records)?;
        Ok(())
    }

    fn insert(&mut self, records: Vec<EmbeddingRecord>) -> IndexResult<usize> {
        for r in &records {
            self.check_dim(&r.vector)?;
        }
        let mut added = 0;
        for r in records {
            if !self.live.contains_key(&r.doc_id) {
                self.push(r.doc_id, r.vector);
                added += 1;
            }
        }
        Ok(added)
    }

    fn upsert(&mut self, record: EmbeddingRecord) -> IndexResult<()> {
        self.check_dim(&record.vector)?;
        self.push(record.doc_id, record.vector);
        Ok(())
    }

    fn query(&self, vector: &[f32], k: usize) -> IndexResult<Vec<Neighbor>> {
        self.check_dim(vector)?;
        if k == 0 || self.graph_points == 0 || is_zero(vector) {
            return Ok(Vec::new());
        }
        let knbn = k.saturating_add(self.stale()).min(self.graph_points);
        let ef = EF_SEARCH.max(knbn.saturating_mul(2));

        let mut hits: Vec<Neighbor> = self
            .graph
            .search(vector, knbn, ef)
            .into_iter()
            .filter_map(|n| {
                let doc_id = self.ids.get(n.d_id)?;
                (self.live.get(doc_id) == Some(&n.d_id)).then(|| Neighbor {
                    doc_id: doc_id.clone(),
                    score: cosine(vector, &self.vectors[n.d_id]),
                })
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

#[derive(Serialize)]
struct StoredRef<'a> {
    dim: usize,
    entries: Vec<(&'a DocId, &'a [f32])>,
}

#[derive(Deserialize)]
struct Stored {
    dim: usize,
    entries: Vec<(DocId, Vec<f32>)>,
}

impl Serialize for HnswIndex {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        StoredRef {
            dim: self.dim,
            entries: self
                .live
                .iter()
                .map(|(id, &slot)| (id, self.vectors[slot].as_slice()))
                .collect(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for HnswIndex {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let stored = Stored::deserialize(deserializer)?;
        let records = stored
            .entries
            .into_iter()
            .map(|(id, vector)| EmbeddingRecord::new(id, vector))
            .collect();
        Self::from_records(stored.dim, records).map_err(D::Error::custom)
    }
}
