use crate::{SyncContext, SyncResult, SyncSettings, build_retriever, train_vectorizers};
use core_types::persist::remove_snapshot;
use doc_store::DocumentStore;
use retriever::UpdateScope;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResyncReport {
    pub vectorizers_retrained: bool,
    /// Documents in the rebuilt remote index.
    pub remote_indexed: usize,
    pub local_index_removed: bool,
    pub local_cleared: bool,
}

/// The daily job: full remote rebuild, then the local clear.
///
/// The clear is the last action taken and only happens once every earlier
/// step has succeeded, so a failed rebuild never loses local data.
pub struct ResyncEngine {
    ctx: SyncContext,
    settings: SyncSettings,
}

impl ResyncEngine {
    pub const fn new(ctx: SyncContext, settings: SyncSettings) -> Self {
        Self { ctx, settings }
    }

    pub fn run(&self) -> SyncResult<ResyncReport> {
        let SyncContext { local, remote } = &self.ctx;
        self.ctx.ensure_connected()?;

        let retrain = self.settings.retrain_daily;
        let mut remote_retriever = build_retriever(remote.clone(), &self.settings);
        train_vectorizers(&mut remote_retriever, &self.settings, retrain)?;
        if retrain {
            tracing::info!("vectorizers retrained on the remote corpus");
        }

        let update = remote_retriever.update_embeddings(
            true,
            &self.settings.remote_index_path,
            UpdateScope::Corpus,
        )?;
        tracing::info!(indexed = update.total, "remote index rebuilt");

        // The local index was embedded against the previous models and only
        // covers documents about to be cleared.
        let local_index_removed = remove_snapshot(&self.settings.local_index_path)?;
        local.delete_all_documents()?;
        tracing::info!(local_index_removed, store = local.name(), "local store cleared");

        Ok(ResyncReport {
            vectorizers_retrained: retrain,
            remote_indexed: update.total,
            local_index_removed,
            local_cleared: true,
        })
    }
}
