//! Batch orchestration of a clustering run.
//!
//! Stages run in a fixed order, each paging through its staging input in
//! fixed-size batches:
//! 1. ClusterEntities: promote or merge every untransferred staged entity
//! 2. DeriveParentChildren: climb parent chains, `depth` passes
//! 3. TransferRelationshipTypes: move staged types into the catalog
//! 4. TransferRelationships: resolve endpoints, normalize, transfer
//! 5. SyncIndex: push each touched document's graph to the search index
//! 6. PurgeStaging: delete transferred staging rows
//!
//! The coordination lock is checked and renewed before every batch. Losing
//! it aborts the run; every other error is confined to its row or document.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use kgraph_core::error::{KgError, KgResult};
use kgraph_core::types::{AllowedDocuments, StagedRelationship, TenantContext};
use kgraph_core::{CoordinationLock, Embedder, IndexSync, KgConfig};
use kgraph_store::SqliteKgStore;

use crate::parent_child::{ParentChildDeriver, ParentStep};
use crate::relationship_normalizer::RelationshipNormalizer;
use crate::resolver::{EntityOutcome, EntityResolver};

/// Stages of a clustering run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusteringStage {
    ClusterEntities,
    DeriveParentChildren,
    TransferRelationshipTypes,
    TransferRelationships,
    SyncIndex,
    PurgeStaging,
}

impl ClusteringStage {
    pub const ALL: [ClusteringStage; 6] = [
        Self::ClusterEntities,
        Self::DeriveParentChildren,
        Self::TransferRelationshipTypes,
        Self::TransferRelationships,
        Self::SyncIndex,
        Self::PurgeStaging,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClusterEntities => "cluster_entities",
            Self::DeriveParentChildren => "derive_parent_children",
            Self::TransferRelationshipTypes => "transfer_relationship_types",
            Self::TransferRelationships => "transfer_relationships",
            Self::SyncIndex => "sync_index",
            Self::PurgeStaging => "purge_staging",
        }
    }
}

impl fmt::Display for ClusteringStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a clustering run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusteringReport {
    /// Staged entities that became new canonical entities
    pub entities_promoted: usize,
    /// Staged entities merged into an existing canonical entity
    pub entities_merged: usize,
    /// Staged entities another writer transferred first
    pub entities_skipped: usize,
    /// Staged entities left untransferred after an error
    pub entities_failed: usize,
    /// `has_subcomponent` edges upserted
    pub parent_links_created: usize,
    pub relationship_types_transferred: usize,
    pub relationships_transferred: usize,
    /// Relationships left for a later run (unresolved endpoint, no catalog type)
    pub relationships_skipped: usize,
    pub documents_synced: usize,
    pub documents_failed: usize,
    /// Staging rows deleted by the purge
    pub staged_rows_purged: usize,
    /// Stages that ran to completion
    pub stages_completed: Vec<ClusteringStage>,
    /// Any errors encountered (non-fatal, processing continued)
    pub errors: Vec<String>,
    /// Timestamp when the run started
    pub started_at: DateTime<Utc>,
    /// Timestamp when the run completed
    pub completed_at: Option<DateTime<Utc>>,
}

impl ClusteringReport {
    /// Create a new report with start timestamp.
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            ..Default::default()
        }
    }

    /// Mark the report as complete.
    pub fn complete(mut self) -> Self {
        self.completed_at = Some(Utc::now());
        self
    }

    /// Staged entities that reached the canonical graph in this run.
    pub fn entities_transferred(&self) -> usize {
        self.entities_promoted + self.entities_merged
    }

    /// Duration of the run.
    pub fn duration_ms(&self) -> Option<i64> {
        self.completed_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }

    fn record_error(&mut self, context: &str, err: &KgError) {
        self.errors
            .push(format!("{} [{}]: {}", context, err.code().as_str(), err));
    }
}

/// Outcome of one staged relationship.
enum RelationshipOutcome {
    Transferred { source: String, target: String },
    Skipped,
}

/// Drives a full clustering run over the staging backlog.
pub struct ClusteringOrchestrator {
    store: Arc<SqliteKgStore>,
    resolver: EntityResolver,
    deriver: ParentChildDeriver,
    normalizer: RelationshipNormalizer,
    index: Arc<dyn IndexSync>,
    config: KgConfig,
}

impl ClusteringOrchestrator {
    /// Create an orchestrator wired from configuration.
    pub fn new(
        store: Arc<SqliteKgStore>,
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn IndexSync>,
        config: KgConfig,
    ) -> KgResult<Self> {
        config.validate()?;
        Ok(Self {
            resolver: EntityResolver::from_config(store.clone(), &config),
            deriver: ParentChildDeriver::new(store.clone()),
            normalizer: RelationshipNormalizer::new(store.clone(), embedder),
            store,
            index,
            config,
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &KgConfig {
        &self.config
    }

    /// Run every stage once over the staging backlog.
    ///
    /// Returns an error only when the coordination lock is lost; all other
    /// failures are counted and listed in the report.
    pub async fn run(
        &self,
        ctx: &TenantContext,
        lock: &dyn CoordinationLock,
        allowed: &AllowedDocuments,
    ) -> KgResult<ClusteringReport> {
        let mut report = ClusteringReport::new();
        let mut touched_documents = BTreeSet::new();
        info!(tenant_id = ctx.tenant_id(), "Starting clustering run");

        for stage in ClusteringStage::ALL {
            debug!(stage = %stage, "Entering stage");
            match stage {
                ClusteringStage::ClusterEntities => {
                    self.cluster_entities(ctx, lock, allowed, &mut report, &mut touched_documents)
                        .await?
                }
                ClusteringStage::DeriveParentChildren => {
                    self.derive_parent_children(ctx, lock, &mut report, &mut touched_documents)
                        .await?
                }
                ClusteringStage::TransferRelationshipTypes => {
                    self.transfer_relationship_types(ctx, lock, &mut report).await?
                }
                ClusteringStage::TransferRelationships => {
                    self.transfer_relationships(ctx, lock, &mut report, &mut touched_documents)
                        .await?
                }
                ClusteringStage::SyncIndex => {
                    self.sync_index(ctx, lock, &touched_documents, &mut report).await?
                }
                ClusteringStage::PurgeStaging => self.purge_staging(ctx, lock, &mut report).await?,
            }
            report.stages_completed.push(stage);
            info!(stage = %stage, "Finished stage");
        }

        let report = report.complete();
        info!(
            tenant_id = ctx.tenant_id(),
            promoted = report.entities_promoted,
            merged = report.entities_merged,
            relationships = report.relationships_transferred,
            errors = report.errors.len(),
            duration_ms = report.duration_ms().unwrap_or_default(),
            "Finished clustering run"
        );
        Ok(report)
    }

    /// Verify the lock is still held and extend it.
    async fn checkpoint(&self, lock: &dyn CoordinationLock) -> KgResult<()> {
        let owned = lock
            .is_owned()
            .await
            .map_err(|e| KgError::lock_lost(e.to_string()))?;
        if !owned {
            return Err(KgError::lock_lost("coordination lock is no longer owned"));
        }

        match timeout(
            self.config.lock_renew_deadline(),
            lock.renew(self.config.lock_timeout()),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(KgError::lock_renew_failed(e.to_string())),
            Err(_) => Err(KgError::lock_renew_failed("lock renewal timed out")),
        }
    }

    async fn cluster_entities(
        &self,
        ctx: &TenantContext,
        lock: &dyn CoordinationLock,
        allowed: &AllowedDocuments,
        report: &mut ClusteringReport,
        touched_documents: &mut BTreeSet<String>,
    ) -> KgResult<()> {
        let mut cursor = 0;
        loop {
            self.checkpoint(lock).await?;
            let batch = self
                .store
                .untransferred_staged_entities(ctx, cursor, self.config.batch_size)?;
            let Some(last) = batch.last() else {
                break;
            };
            cursor = last.seq;

            // one at a time, so later entities see earlier promotions
            for entity in &batch {
                match self.resolver.resolve(ctx, entity, allowed) {
                    Ok(outcome) => {
                        if let Some(document_id) =
                            outcome.entity().and_then(|e| e.document_id.clone())
                        {
                            touched_documents.insert(document_id);
                        }
                        match outcome {
                            EntityOutcome::Promoted(_) => report.entities_promoted += 1,
                            EntityOutcome::Merged { .. } => report.entities_merged += 1,
                            EntityOutcome::AlreadyTransferred => report.entities_skipped += 1,
                        }
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!(id_name = %entity.id_name, error = %e, "Failed to cluster entity");
                        report.entities_failed += 1;
                        report.record_error(&entity.id_name, &e);
                    }
                }
            }
        }
        Ok(())
    }

    async fn derive_parent_children(
        &self,
        ctx: &TenantContext,
        lock: &dyn CoordinationLock,
        report: &mut ClusteringReport,
        touched_documents: &mut BTreeSet<String>,
    ) -> KgResult<()> {
        let mut linked_entities = Vec::new();
        for pass in 0..self.config.max_parent_recursion_depth {
            let mut cursor = 0;
            loop {
                self.checkpoint(lock).await?;
                let batch = self
                    .store
                    .staged_entities_with_parent(ctx, cursor, self.config.batch_size)?;
                let Some(last) = batch.last() else {
                    break;
                };
                cursor = last.seq;

                // exhausted links stay in the page so the cursor stays stable
                let pending: Vec<_> = batch
                    .into_iter()
                    .filter(|e| e.parent.as_ref().and_then(|p| p.ancestor()).is_some())
                    .collect();

                for (id_name, step) in self.deriver.derive_batch(ctx, pending) {
                    match step {
                        Ok(ParentStep::Linked { parent, child, .. }) => {
                            report.parent_links_created += 1;
                            linked_entities.push(parent);
                            linked_entities.push(child);
                        }
                        Ok(ParentStep::NoParent) | Ok(ParentStep::Pending) => {}
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => {
                            warn!(id_name = %id_name, error = %e, "Failed to derive parent");
                            report.record_error(&id_name, &e);
                        }
                    }
                }
            }
            debug!(pass, "Finished parent-child pass");
        }
        // a new edge changes the graph of both endpoint documents
        touched_documents.extend(self.store.documents_of_entities(ctx, &linked_entities)?);
        Ok(())
    }

    async fn transfer_relationship_types(
        &self,
        ctx: &TenantContext,
        lock: &dyn CoordinationLock,
        report: &mut ClusteringReport,
    ) -> KgResult<()> {
        let mut cursor = 0;
        loop {
            self.checkpoint(lock).await?;
            let batch = self.store.untransferred_staged_relationship_types(
                ctx,
                cursor,
                self.config.batch_size,
            )?;
            let Some(last) = batch.last() else {
                break;
            };
            cursor = last.seq;

            for staged in &batch {
                match self.store.transfer_relationship_type(ctx, staged) {
                    Ok(Some(_)) => report.relationship_types_transferred += 1,
                    Ok(None) => {}
                    Err(e) => {
                        let id_name = &staged.relationship_type.id_name;
                        warn!(id_name = %id_name, error = %e, "Failed to transfer relationship type");
                        report.record_error(id_name, &e);
                    }
                }
            }
        }
        Ok(())
    }

    async fn transfer_one_relationship(
        &self,
        ctx: &TenantContext,
        staged: &StagedRelationship,
        resolved: &HashMap<String, String>,
    ) -> KgResult<RelationshipOutcome> {
        let (Some(source), Some(target)) = (
            resolved.get(&staged.source_node),
            resolved.get(&staged.target_node),
        ) else {
            debug!(id_name = %staged.id_name, "Relationship endpoint not transferred yet");
            return Ok(RelationshipOutcome::Skipped);
        };

        let Some(normalized) = self
            .normalizer
            .normalize(ctx, &staged.relationship, source, target)
            .await?
        else {
            return Ok(RelationshipOutcome::Skipped);
        };

        match self.store.transfer_relationship(ctx, staged, &normalized)? {
            Some(relationship) => Ok(RelationshipOutcome::Transferred {
                source: relationship.source_node,
                target: relationship.target_node,
            }),
            None => Ok(RelationshipOutcome::Skipped),
        }
    }

    async fn transfer_relationships(
        &self,
        ctx: &TenantContext,
        lock: &dyn CoordinationLock,
        report: &mut ClusteringReport,
        touched_documents: &mut BTreeSet<String>,
    ) -> KgResult<()> {
        let mut cursor = 0;
        loop {
            self.checkpoint(lock).await?;
            let batch = self.store.untransferred_staged_relationships(
                ctx,
                cursor,
                self.config.relationship_batch_size,
            )?;
            let Some(last) = batch.last() else {
                break;
            };
            cursor = last.seq;

            let endpoints: Vec<String> = batch
                .iter()
                .flat_map(|r| [r.source_node.clone(), r.target_node.clone()])
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            let resolved = self.store.resolve_transferred_ids(ctx, &endpoints)?;

            let outcomes: Vec<_> = stream::iter(batch.iter())
                .map(|staged| {
                    let resolved = &resolved;
                    async move {
                        let outcome = self.transfer_one_relationship(ctx, staged, resolved).await;
                        (staged, outcome)
                    }
                })
                .buffer_unordered(self.config.worker_concurrency.max(1))
                .collect()
                .await;

            let mut touched_entities = Vec::new();
            for (staged, outcome) in outcomes {
                match outcome {
                    Ok(RelationshipOutcome::Transferred { source, target }) => {
                        report.relationships_transferred += 1;
                        if let Some(document_id) = &staged.source_document {
                            touched_documents.insert(document_id.clone());
                        }
                        touched_entities.push(source);
                        touched_entities.push(target);
                    }
                    Ok(RelationshipOutcome::Skipped) => report.relationships_skipped += 1,
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        warn!(id_name = %staged.id_name, error = %e, "Failed to transfer relationship");
                        report.relationships_skipped += 1;
                        report.record_error(&staged.id_name, &e);
                    }
                }
            }

            touched_documents.extend(self.store.documents_of_entities(ctx, &touched_entities)?);
        }
        Ok(())
    }

    async fn sync_index(
        &self,
        ctx: &TenantContext,
        lock: &dyn CoordinationLock,
        documents: &BTreeSet<String>,
        report: &mut ClusteringReport,
    ) -> KgResult<()> {
        let documents: Vec<&String> = documents.iter().collect();
        for chunk in documents.chunks(self.config.batch_size.max(1)) {
            self.checkpoint(lock).await?;

            let results: Vec<(&String, KgResult<()>)> = stream::iter(chunk.iter().copied())
                .map(|document_id| async move {
                    let result = match self.store.document_graph(ctx, document_id) {
                        Ok(request) => self.index.update_document(request).await,
                        Err(e) => Err(e),
                    };
                    (document_id, result)
                })
                .buffer_unordered(self.config.worker_concurrency.max(1))
                .collect()
                .await;

            for (document_id, result) in results {
                match result {
                    Ok(()) => report.documents_synced += 1,
                    Err(e) => {
                        error!(document_id = %document_id, error = %e, "Failed to sync document");
                        report.documents_failed += 1;
                        report.record_error(document_id, &e);
                    }
                }
            }
        }
        Ok(())
    }

    async fn purge_staging(
        &self,
        ctx: &TenantContext,
        lock: &dyn CoordinationLock,
        report: &mut ClusteringReport,
    ) -> KgResult<()> {
        self.checkpoint(lock).await?;

        let purges: [(&str, KgResult<usize>); 3] = [
            ("relationships", self.store.purge_transferred_relationships(ctx)),
            ("relationship types", self.store.purge_transferred_relationship_types(ctx)),
            ("entities", self.store.purge_transferred_entities(ctx)),
        ];
        for (what, result) in purges {
            match result {
                Ok(purged) => report.staged_rows_purged += purged,
                Err(e) => {
                    error!(error = %e, "Error deleting staged {}", what);
                    report.record_error(&format!("purge {}", what), &e);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;

    struct BrokenLock;

    #[async_trait]
    impl CoordinationLock for BrokenLock {
        async fn renew(&self, _timeout: Duration) -> KgResult<()> {
            Ok(())
        }

        async fn is_owned(&self) -> KgResult<bool> {
            Err(KgError::internal("lock backend unreachable"))
        }
    }

    struct RefusingLock;

    #[async_trait]
    impl CoordinationLock for RefusingLock {
        async fn renew(&self, _timeout: Duration) -> KgResult<()> {
            Err(KgError::internal("lease expired"))
        }

        async fn is_owned(&self) -> KgResult<bool> {
            Ok(true)
        }
    }

    struct NoopIndex;

    #[async_trait]
    impl IndexSync for NoopIndex {
        async fn update_document(&self, _request: kgraph_core::IndexUpdateRequest) -> KgResult<()> {
            Ok(())
        }
    }

    struct NoopEmbedder;

    #[async_trait]
    impl Embedder for NoopEmbedder {
        async fn embed(&self, _text: &str) -> KgResult<Vec<f32>> {
            Ok(vec![0.0])
        }

        fn dimension(&self) -> usize {
            1
        }

        fn model_name(&self) -> &str {
            "noop"
        }
    }

    fn orchestrator() -> ClusteringOrchestrator {
        ClusteringOrchestrator::new(
            Arc::new(SqliteKgStore::in_memory().unwrap()),
            Arc::new(NoopEmbedder),
            Arc::new(NoopIndex),
            KgConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_unreachable_lock_counts_as_lost() {
        let err = tokio_test::block_on(orchestrator().checkpoint(&BrokenLock)).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(err.code(), kgraph_core::ErrorCode::LockNotOwned);
    }

    #[test]
    fn test_renew_error_is_fatal() {
        let err = tokio_test::block_on(orchestrator().checkpoint(&RefusingLock)).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(err.code(), kgraph_core::ErrorCode::LockRenewFailed);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let result = ClusteringOrchestrator::new(
            Arc::new(SqliteKgStore::in_memory().unwrap()),
            Arc::new(NoopEmbedder),
            Arc::new(NoopIndex),
            KgConfig::default().with_ngram_weights([1.0, 1.0, 1.0]),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_stage_order() {
        let names: Vec<&str> = ClusteringStage::ALL.iter().map(|s| s.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "cluster_entities",
                "derive_parent_children",
                "transfer_relationship_types",
                "transfer_relationships",
                "sync_index",
                "purge_staging",
            ]
        );
    }

    #[test]
    fn test_report_timing() {
        let report = ClusteringReport::new();
        assert!(report.duration_ms().is_none());
        let report = report.complete();
        assert!(report.duration_ms().unwrap() >= 0);
        assert_eq!(report.entities_transferred(), 0);
    }
}
