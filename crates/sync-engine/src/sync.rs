use crate::{SyncContext, SyncError, SyncResult, SyncSettings, build_retriever, train_vectorizers};
use core_types::{DocId, Document, Timestamp, now_ts, similarity_annotation};
use doc_store::DocumentStore;
use retriever::{SimilarityResult, UpdateScope};
use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Nothing in the window that the local store lacks.
    NoNewDocuments,
    Synced,
}

/// Stage counts for one incremental run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub outcome: SyncOutcome,
    pub window_start: Timestamp,
    /// Remote ids seen in the look-back window.
    pub in_window: usize,
    /// Bodies fetched from the remote store.
    pub retrieved: usize,
    /// Documents newly written to the local store.
    pub stored: usize,
    /// Documents added to the local index.
    pub indexed: usize,
    /// Remote metadata annotations written.
    pub annotated: usize,
    pub remote_index_available: bool,
}

impl SyncReport {
    const fn empty(window_start: Timestamp, in_window: usize) -> Self {
        Self {
            outcome: SyncOutcome::NoNewDocuments,
            window_start,
            in_window,
            retrieved: 0,
            stored: 0,
            indexed: 0,
            annotated: 0,
            remote_index_available: false,
        }
    }
}

/// The incremental job.
///
/// Each run is idempotent by id presence: anything already in the local store
/// is filtered out before work starts, so a run that failed half-way is
/// simply picked up again by the next tick.
pub struct SyncEngine {
    ctx: SyncContext,
    settings: SyncSettings,
}

impl SyncEngine {
    pub const fn new(ctx: SyncContext, settings: SyncSettings) -> Self {
        Self { ctx, settings }
    }

    pub fn run(&self) -> SyncResult<SyncReport> {
        self.run_at(now_ts())
    }

    /// Run with an explicit notion of "now" for the look-back window.
    pub fn run_at(&self, now: Timestamp) -> SyncResult<SyncReport> {
        let SyncContext { local, remote } = &self.ctx;
        self.ctx.ensure_connected()?;

        let lookback = i64::try_from(self.settings.lookback.as_secs()).unwrap_or(i64::MAX);
        let window_start = now.saturating_sub(lookback);
        let recent = remote.get_document_ids(Some(window_start))?;
        if recent.is_empty() {
            tracing::info!(window_start, "no new remote documents");
            return Ok(SyncReport::empty(window_start, 0));
        }

        let new_ids = new_document_ids(&recent, &local.get_document_ids(None)?);
        if new_ids.is_empty() {
            tracing::info!(window_start, in_window = recent.len(), "remote documents already replicated");
            return Ok(SyncReport::empty(window_start, recent.len()));
        }

        // Nothing is written until the similarity pipeline is known to be runnable.
        if let Some(path) = self.settings.missing_vectorizer_artifact() {
            tracing::error!(path = %path.display(), "vectorizer models not found, skipping run");
            return Err(SyncError::ArtifactsMissing { path: path.clone() });
        }

        let docs = remote.get_document_by_id(&new_ids)?;
        tracing::info!(requested = new_ids.len(), retrieved = docs.len(), "fetched new remote documents");
        let stored = local.write_documents(&docs)?;
        tracing::info!(stored, "stored documents to local store");

        let mut local_retriever = build_retriever(local.clone(), &self.settings);
        let mut remote_retriever = build_retriever(remote.clone(), &self.settings);
        train_vectorizers(&mut remote_retriever, &self.settings, false)?;
        train_vectorizers(&mut local_retriever, &self.settings, false)?;
        tracing::debug!("vectorizers loaded");

        let reindex = !self.settings.local_index_path.exists();
        let update = local_retriever.update_embeddings(
            reindex,
            &self.settings.local_index_path,
            UpdateScope::Corpus,
        )?;

        let remote_index_available = self.settings.remote_index_path.exists();
        let local_results = local_retriever.batch_retrieve(&docs)?;
        let remote_results = if remote_index_available {
            remote_retriever.load_index(&self.settings.remote_index_path)?;
            remote_retriever.batch_retrieve(&docs)?
        } else {
            tracing::warn!(
                path = %self.settings.remote_index_path.display(),
                "remote index not built yet, remote scores default to 0"
            );
            docs.iter()
                .map(|d| SimilarityResult::empty(d.id.clone()))
                .collect()
        };

        let annotated = annotate_winners(remote.as_ref(), &docs, &local_results, &remote_results)?;
        tracing::info!(annotated, "similarity scores written to remote metadata");

        Ok(SyncReport {
            outcome: SyncOutcome::Synced,
            window_start,
            in_window: recent.len(),
            retrieved: docs.len(),
            stored,
            indexed: update.indexed,
            annotated,
            remote_index_available,
        })
    }
}

/// Remote ids in the window that the local store does not hold yet.
pub(crate) fn new_document_ids(recent: &BTreeSet<DocId>, local: &BTreeSet<DocId>) -> Vec<DocId> {
    recent.difference(local).cloned().collect()
}

/// Write `{sim_score, similar_to}` to the remote store wherever the local
/// score strictly beats the remote one. Results are paired positionally with
/// `docs`.
fn annotate_winners(
    remote: &dyn DocumentStore,
    docs: &[Document],
    local: &[SimilarityResult],
    remote_results: &[SimilarityResult],
) -> SyncResult<usize> {
    let mut annotated = 0;
    for ((doc, l), r) in docs.iter().zip(local).zip(remote_results) {
        debug_assert_eq!(doc.id, l.doc_id);
        debug_assert_eq!(doc.id, r.doc_id);
        let (local_sim, remote_sim) = (l.score_or_default(), r.score_or_default());
        if local_sim > remote_sim
            && let Some(similar_to) = &l.retrieve_result
        {
            remote.update_document_meta(&doc.id, &similarity_annotation(local_sim, similar_to))?;
            annotated += 1;
        }
    }
    Ok(annotated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use doc_store::InMemoryStore;

    fn ids(items: &[&str]) -> BTreeSet<DocId> {
        items.iter().map(|s| DocId::from(*s)).collect()
    }

    fn result(id: &str, score: Option<f32>, to: Option<&str>) -> SimilarityResult {
        SimilarityResult {
            doc_id: DocId::from(id),
            similarity_score: score,
            retrieve_result: to.map(DocId::from),
        }
    }

    #[test]
    fn new_ids_are_window_minus_local() {
        let got = new_document_ids(&ids(&["a", "b", "c"]), &ids(&["b", "z"]));
        assert_eq!(got, vec![DocId::from("a"), DocId::from("c")]);
    }

    #[test]
    fn empty_window_gives_no_new_ids() {
        assert!(new_document_ids(&BTreeSet::new(), &ids(&["a"])).is_empty());
    }

    #[test]
    fn only_strict_local_wins_are_written() {
        let docs = vec![
            Document::new("a", "x", 1),
            Document::new("b", "y", 1),
            Document::new("c", "z", 1),
            Document::new("d", "w", 1),
        ];
        let remote = InMemoryStore::with_documents("remote", docs.clone());
        let local = vec![
            result("a", Some(0.9), Some("la")),
            result("b", Some(0.3), Some("lb")),
            result("c", Some(0.5), Some("lc")),
            result("d", Some(0.2), Some("ld")),
        ];
        let remote_results = vec![
            result("a", Some(0.4), Some("ra")),
            result("b", Some(0.7), Some("rb")),
            result("c", Some(0.5), Some("rc")),
            result("d", None, None),
        ];

        let n = annotate_winners(&remote, &docs, &local, &remote_results).unwrap();
        assert_eq!(n, 2);

        let a = remote.get(&DocId::from("a")).unwrap();
        assert!((a.sim_score().unwrap() - 0.9).abs() < 1e-6);
        assert_eq!(a.similar_to(), Some(DocId::from("la")));
        assert!(remote.get(&DocId::from("b")).unwrap().sim_score().is_none());
        assert!(remote.get(&DocId::from("c")).unwrap().sim_score().is_none());
        assert_eq!(
            remote.get(&DocId::from("d")).unwrap().similar_to(),
            Some(DocId::from("ld"))
        );
    }
}
