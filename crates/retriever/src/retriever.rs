use crate::{
    IndexMode, IndexUpdate, RetrieverError, RetrieverResult, SimilarityResult, TrainOutcome,
    UpdateScope,
};
use core_types::Document;
use doc_store::DocumentStore;
use rayon::prelude::*;
use semantic_index::{EmbeddingIndex, EmbeddingRecord, IndexArtifact, Neighbor, cosine};
use std::path::Path;
use vectorizer::Vectorizer;

pub const DEFAULT_CANDIDATE_POOL: usize = 32;

pub struct Retriever<S> {
    store: S,
    candidate: Box<dyn Vectorizer>,
    retriever: Box<dyn Vectorizer>,
    index: Option<IndexArtifact>,
    candidate_pool: usize,
}

impl<S: DocumentStore> Retriever<S> {
    pub fn new(store: S, candidate: Box<dyn Vectorizer>, retriever: Box<dyn Vectorizer>) -> Self {
        Self {
            store,
            candidate,
            retriever,
            index: None,
            candidate_pool: DEFAULT_CANDIDATE_POOL,
        }
    }

    /// Number of candidate neighbours rescored per lookup (at least 1).
    #[must_use]
    pub fn with_candidate_pool(mut self, pool: usize) -> Self {
        self.candidate_pool = pool.max(1);
        self
    }

    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Documents in the active index, or `None` before one is built or loaded.
    pub fn index_len(&self) -> Option<usize> {
        self.index.as_ref().map(IndexArtifact::len)
    }

    pub fn train_candidate_vectorizer(
        &mut self,
        retrain: bool,
        save_path: &Path,
    ) -> RetrieverResult<TrainOutcome> {
        train(&self.store, self.candidate.as_mut(), retrain, save_path)
    }

    pub fn train_retriever_vectorizer(
        &mut self,
        retrain: bool,
        save_path: &Path,
    ) -> RetrieverResult<TrainOutcome> {
        train(&self.store, self.retriever.as_mut(), retrain, save_path)
    }

    /// Maintain the index artifact at `save_path`.
    ///
    /// `retrain = true` rebuilds from the whole corpus. Otherwise the existing
    /// artifact (or an empty one when none exists) gets the documents in
    /// `scope` that it does not hold yet.
    pub fn update_embeddings(
        &mut self,
        retrain: bool,
        save_path: &Path,
        scope: UpdateScope<'_>,
    ) -> RetrieverResult<IndexUpdate> {
        let (candidate_dim, retriever_dim) = (self.candidate.dim(), self.retriever.dim());

        let (artifact, mode, indexed) = if retrain {
            let docs = self.store.get_all_documents()?;
            let (cand, rtrv) = self.embed_all(&docs)?;
            let mut artifact = IndexArtifact::new(candidate_dim, retriever_dim);
            artifact.candidate.rebuild(cand)?;
            artifact.retriever.rebuild(rtrv)?;
            (artifact, IndexMode::Rebuilt, docs.len())
        } else {
            let mut artifact = if save_path.exists() {
                IndexArtifact::load(save_path, candidate_dim, retriever_dim)?
            } else {
                IndexArtifact::new(candidate_dim, retriever_dim)
            };
            let docs = match scope {
                UpdateScope::Corpus => self.store.get_all_documents()?,
                UpdateScope::Ids(ids) => self.store.get_document_by_id(ids)?,
            };
            let pending: Vec<Document> = docs
                .into_iter()
                .filter(|d| !artifact.contains(&d.id))
                .collect();
            let (cand, rtrv) = self.embed_all(&pending)?;
            artifact.candidate.insert(cand)?;
            let added = artifact.retriever.insert(rtrv)?;
            (artifact, IndexMode::Appended, added)
        };

        artifact.save(save_path)?;
        let update = IndexUpdate {
            mode,
            indexed,
            total: artifact.len(),
        };
        tracing::info!(
            store = self.store.name(),
            mode = ?update.mode,
            indexed = update.indexed,
            total = update.total,
            "embedding index updated"
        );
        self.index = Some(artifact);
        Ok(update)
    }

    /// Use an existing index artifact for lookups without modifying it.
    pub fn load_index(&mut self, path: &Path) -> RetrieverResult<usize> {
        let artifact = IndexArtifact::load(path, self.candidate.dim(), self.retriever.dim())?;
        let len = artifact.len();
        self.index = Some(artifact);
        Ok(len)
    }

    /// Best prior match for each document, in input order. A document never
    /// matches itself.
    pub fn batch_retrieve(&self, docs: &[Document]) -> RetrieverResult<Vec<SimilarityResult>> {
        let index = self.index.as_ref().ok_or(RetrieverError::IndexNotReady)?;
        docs.par_iter()
            .map(|doc| self.retrieve_one(index, doc))
            .collect()
    }

    fn retrieve_one(&self, index: &IndexArtifact, doc: &Document) -> RetrieverResult<SimilarityResult> {
        let cand = self.candidate.embed(&doc.content)?;
        let pool: Vec<_> = index
            .candidate
            .query(&cand, self.candidate_pool.saturating_add(1))?
            .into_iter()
            .filter(|n| n.doc_id != doc.id)
            .take(self.candidate_pool)
            .collect();
        if pool.is_empty() {
            return Ok(SimilarityResult::empty(doc.id.clone()));
        }

        let query = self.retriever.embed(&doc.content)?;
        let best = pool
            .iter()
            .filter_map(|n| {
                index
                    .retriever
                    .get(&n.doc_id)
                    .map(|stored| (n, cosine(&query, stored)))
            })
            .fold(None, |best: Option<(&Neighbor, f32)>, cur| match best {
                Some(b) if b.1 >= cur.1 => Some(b),
                _ => Some(cur),
            });

        Ok(match best {
            Some((neighbor, score)) => SimilarityResult {
                doc_id: doc.id.clone(),
                similarity_score: Some(score),
                retrieve_result: Some(neighbor.doc_id.clone()),
            },
            None => SimilarityResult::empty(doc.id.clone()),
        })
    }

    fn embed_all(
        &self,
        docs: &[Document],
    ) -> RetrieverResult<(Vec<EmbeddingRecord>, Vec<EmbeddingRecord>)> {
        let pairs: Vec<(EmbeddingRecord, EmbeddingRecord)> = docs
            .par_iter()
            .map(|doc| -> RetrieverResult<(EmbeddingRecord, EmbeddingRecord)> {
                let cand = self.candidate.embed(&doc.content)?;
                let rtrv = self.retriever.embed(&doc.content)?;
                Ok((
                    EmbeddingRecord::new(doc.id.clone(), cand),
                    EmbeddingRecord::new(doc.id.clone(), rtrv),
                ))
            })
            .collect::<RetrieverResult<_>>()?;
        Ok(pairs.into_iter().unzip())
    }
}

/// Load the model at `save_path` unless `retrain` is set or nothing is there;
/// otherwise fit against the store's corpus and persist the result.
fn train<S: DocumentStore>(
    store: &S,
    vectorizer: &mut dyn Vectorizer,
    retrain: bool,
    save_path: &Path,
) -> RetrieverResult<TrainOutcome> {
    let kind = vectorizer.kind().as_str();
    if !retrain && save_path.exists() {
        vectorizer.load(save_path)?;
        tracing::debug!(kind, path = %save_path.display(), "vectorizer loaded");
        return Ok(TrainOutcome::Loaded);
    }

    let docs = store.get_all_documents()?;
    let corpus: Vec<&str> = docs.iter().map(|d| d.content.as_str()).collect();
    vectorizer
        .fit(&corpus)
        .map_err(|source| RetrieverError::Training { kind, source })?;
    vectorizer.save(save_path)?;
    tracing::info!(kind, documents = docs.len(), path = %save_path.display(), "vectorizer fitted");
    Ok(TrainOutcome::Fitted {
        documents: docs.len(),
    })
}
