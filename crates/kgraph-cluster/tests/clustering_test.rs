//! Integration tests for full clustering runs.
//!
//! Each test stages extraction output into an in-memory store, runs the
//! orchestrator against mock collaborators and inspects the canonical graph.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use kgraph_cluster::{ClusteringOrchestrator, ClusteringReport, ClusteringStage};
use kgraph_core::{
    AllowedDocuments, Attributes, CoordinationLock, Embedder, ErrorCode, IndexSync,
    IndexUpdateRequest, KgConfig, KgError, KgResult, KgStage, NewStagedEntity, TenantContext,
};
use kgraph_store::SqliteKgStore;

/// Lock that can be told to disappear after a number of ownership checks.
struct TestLock {
    owned: AtomicBool,
    checks: AtomicUsize,
    lose_after: Option<usize>,
    renewals: AtomicUsize,
    slow_renew: bool,
}

impl TestLock {
    fn held() -> Self {
        Self {
            owned: AtomicBool::new(true),
            checks: AtomicUsize::new(0),
            lose_after: None,
            renewals: AtomicUsize::new(0),
            slow_renew: false,
        }
    }

    fn lost_after(checks: usize) -> Self {
        Self {
            lose_after: Some(checks),
            ..Self::held()
        }
    }

    fn slow() -> Self {
        Self {
            slow_renew: true,
            ..Self::held()
        }
    }
}

#[async_trait]
impl CoordinationLock for TestLock {
    async fn renew(&self, _timeout: Duration) -> KgResult<()> {
        if self.slow_renew {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        self.renewals.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn is_owned(&self) -> KgResult<bool> {
        let seen = self.checks.fetch_add(1, Ordering::SeqCst);
        if self.lose_after.is_some_and(|limit| seen >= limit) {
            self.owned.store(false, Ordering::SeqCst);
        }
        Ok(self.owned.load(Ordering::SeqCst))
    }
}

/// Records every update; fails for one chosen document.
#[derive(Default)]
struct RecordingIndex {
    fail_for: Option<String>,
    updates: Mutex<Vec<IndexUpdateRequest>>,
}

impl RecordingIndex {
    fn failing_for(document_id: &str) -> Self {
        Self {
            fail_for: Some(document_id.to_string()),
            ..Default::default()
        }
    }

    fn documents(&self) -> BTreeSet<String> {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .map(|u| u.document_id.clone())
            .collect()
    }

    fn update_for(&self, document_id: &str) -> Option<IndexUpdateRequest> {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.document_id == document_id)
            .cloned()
    }
}

#[async_trait]
impl IndexSync for RecordingIndex {
    async fn update_document(&self, request: IndexUpdateRequest) -> KgResult<()> {
        if self.fail_for.as_deref() == Some(request.document_id.as_str()) {
            return Err(KgError::index_sync(&request.document_id, "index unavailable"));
        }
        self.updates.lock().unwrap().push(request);
        Ok(())
    }
}

/// Embeds a phrase by its letter histogram over `a..=z`.
struct LetterEmbedder;

#[async_trait]
impl Embedder for LetterEmbedder {
    async fn embed(&self, text: &str) -> KgResult<Vec<f32>> {
        let mut vector = vec![0.0; 26];
        for c in text.to_lowercase().chars().filter(|c| c.is_ascii_lowercase()) {
            vector[(c as u8 - b'a') as usize] += 1.0;
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        26
    }

    fn model_name(&self) -> &str {
        "letters"
    }
}

struct Harness {
    store: Arc<SqliteKgStore>,
    index: Arc<RecordingIndex>,
    orchestrator: ClusteringOrchestrator,
    ctx: TenantContext,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

impl Harness {
    fn new(config: KgConfig) -> Self {
        Self::with_index(config, RecordingIndex::default())
    }

    fn with_index(config: KgConfig, index: RecordingIndex) -> Self {
        init_tracing();
        let store = Arc::new(SqliteKgStore::in_memory().unwrap());
        let index = Arc::new(index);
        let orchestrator = ClusteringOrchestrator::new(
            store.clone(),
            Arc::new(LetterEmbedder),
            index.clone(),
            config,
        )
        .unwrap();
        Self {
            store,
            index,
            orchestrator,
            ctx: TenantContext::new("tenant-1"),
        }
    }

    fn stage(&self, entity: NewStagedEntity) {
        self.store.upsert_staged_entity(&self.ctx, &entity).unwrap();
    }

    fn stage_type(&self, source_type: &str, relationship: &str, target_type: &str) {
        self.store
            .upsert_staged_relationship_type(&self.ctx, source_type, relationship, target_type, false, 1)
            .unwrap();
    }

    fn stage_relationship(&self, raw_id: &str, source_document: Option<&str>) {
        self.store
            .upsert_staged_relationship(&self.ctx, raw_id, source_document, 1)
            .unwrap();
    }

    async fn run(&self) -> KgResult<ClusteringReport> {
        self.orchestrator
            .run(&self.ctx, &TestLock::held(), &AllowedDocuments::All)
            .await
    }

    fn entity_names(&self) -> Vec<String> {
        self.store
            .list_entities(&self.ctx)
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect()
    }

    fn relationship_names(&self) -> Vec<String> {
        self.store
            .list_relationships(&self.ctx)
            .unwrap()
            .into_iter()
            .map(|r| r.relationship)
            .collect()
    }
}

fn keyed(name: &str, entity_type: &str, key: &str, parent: Option<&str>) -> NewStagedEntity {
    let mut attributes = Attributes::new().with("key", key);
    if let Some(parent) = parent {
        attributes.insert("parent", parent);
    }
    NewStagedEntity::new(name, entity_type).with_attributes(attributes)
}

/// Two documents, a parent link between them, an employee and an account.
#[tokio::test]
async fn test_full_run_builds_graph_and_clears_staging() {
    let h = Harness::new(KgConfig::default());
    h.store.register_document(&h.ctx, "docA", Some("Design Doc A")).unwrap();
    h.store.register_document(&h.ctx, "docB", Some("Design Doc B")).unwrap();

    h.stage(keyed("DocA", "test", "DocA", Some("DocB")).with_document("docA"));
    h.stage(keyed("DocB", "test", "DocB", None).with_document("docB"));
    h.stage(NewStagedEntity::new("dane@outsider.com", "employee"));
    h.stage(NewStagedEntity::new("outsider.com", "account"));

    h.stage_type("test", "is_parent_of", "test");
    h.stage_type("employee", "is_assignee_of", "test");
    h.stage_type("employee", "is_employee_of", "account");

    h.stage_relationship("TEST::DocB__is_parent_of__TEST::DocA", Some("docA"));
    h.stage_relationship("EMPLOYEE::dane@outsider.com__is_assignee_of__TEST::DocA", Some("docA"));
    h.stage_relationship("EMPLOYEE::dane@outsider.com__is_employee_of__ACCOUNT::outsider.com", None);

    let report = h.run().await.unwrap();

    assert_eq!(report.entities_promoted, 4);
    assert_eq!(report.entities_merged, 0);
    assert_eq!(report.parent_links_created, 1);
    assert_eq!(report.relationship_types_transferred, 3);
    assert_eq!(report.relationships_transferred, 3);
    assert_eq!(report.relationships_skipped, 0);
    assert!(report.errors.is_empty(), "errors: {:?}", report.errors);
    assert_eq!(report.stages_completed, ClusteringStage::ALL.to_vec());
    assert!(report.completed_at.is_some());

    assert_eq!(h.entity_names().len(), 4);
    let mut relationships = h.relationship_names();
    relationships.sort();
    assert_eq!(
        relationships,
        vec!["has_subcomponent", "is_assignee_of", "is_employee_of", "is_parent_of"]
    );

    let entities = h.store.list_entities(&h.ctx).unwrap();
    let doc_a = entities.iter().find(|e| e.name == "doca").unwrap();
    let doc_b = entities.iter().find(|e| e.name == "docb").unwrap();
    let edges = h.store.list_relationships(&h.ctx).unwrap();
    for name in ["has_subcomponent", "is_parent_of"] {
        let edge = edges.iter().find(|r| r.relationship == name).unwrap();
        assert_eq!(edge.source_node, doc_b.id_name);
        assert_eq!(edge.target_node, doc_a.id_name);
    }

    assert!(h.store.staging_counts(&h.ctx).unwrap().is_empty());
    for document_id in ["docA", "docB"] {
        let document = h.store.get_document(&h.ctx, document_id).unwrap().unwrap();
        assert_eq!(document.kg_stage, KgStage::Normalized);
    }

    assert_eq!(
        h.index.documents(),
        ["docA", "docB"].iter().map(|s| s.to_string()).collect()
    );
    let doc_a_update = h.index.update_for("docA").unwrap();
    assert_eq!(doc_a_update.entity_ids(), vec![doc_a.id_name.as_str()]);
    assert_eq!(doc_a_update.relationships.len(), 3);
}

#[tokio::test]
async fn test_similar_names_cluster_together() {
    let h = Harness::new(KgConfig::default());
    h.stage(NewStagedEntity::new("Jonathan Smith", "employee"));
    h.stage(NewStagedEntity::new("Jonathan Smyth", "employee").with_occurrences(2));

    let report = h.run().await.unwrap();

    assert_eq!(report.entities_promoted, 1);
    assert_eq!(report.entities_merged, 1);
    let entities = h.store.list_entities(&h.ctx).unwrap();
    assert_eq!(entities.len(), 1);
    assert_eq!(entities[0].occurrences, 3);
    assert!(entities[0].alternative_names.contains("jonathan smyth"));
}

#[tokio::test]
async fn test_threshold_is_inclusive() {
    // "Acme Corp" and "Acme-Corp" both clean to "acmecorp" and score exactly 1.0
    let h = Harness::new(KgConfig::default().with_rerank_threshold(1.0));
    h.stage(NewStagedEntity::new("Acme Corp", "account"));
    h.stage(NewStagedEntity::new("Acme-Corp", "account"));

    let report = h.run().await.unwrap();
    assert_eq!(report.entities_merged, 1);
    assert_eq!(h.entity_names(), vec!["acme corp"]);

    // near-duplicates stay apart at a threshold they cannot reach
    let h = Harness::new(KgConfig::default().with_rerank_threshold(1.0));
    h.stage(NewStagedEntity::new("Jonathan Smith", "employee"));
    h.stage(NewStagedEntity::new("Jonathan Smyth", "employee"));

    let report = h.run().await.unwrap();
    assert_eq!(report.entities_merged, 0);
    assert_eq!(h.entity_names().len(), 2);
}

#[tokio::test]
async fn test_default_threshold_separates_near_misses() {
    // "anderson" / "andersen" blend to ~0.7502, "margaret" / "margarit" to ~0.7217
    let h = Harness::new(KgConfig::default());
    h.stage(NewStagedEntity::new("Anderson", "employee"));
    h.stage(NewStagedEntity::new("Andersen", "employee"));
    h.stage(NewStagedEntity::new("Margaret", "employee"));
    h.stage(NewStagedEntity::new("Margarit", "employee"));

    let report = h.run().await.unwrap();

    assert_eq!(report.entities_promoted, 3);
    assert_eq!(report.entities_merged, 1);
    let entities = h.store.list_entities(&h.ctx).unwrap();
    let anderson = entities.iter().find(|e| e.name == "anderson").unwrap();
    assert_eq!(anderson.occurrences, 2);
    assert!(anderson.alternative_names.contains("andersen"));
    let mut names = h.entity_names();
    names.sort();
    assert_eq!(names, vec!["anderson", "margaret", "margarit"]);
}

#[tokio::test]
async fn test_names_with_digits_never_merge() {
    let h = Harness::new(KgConfig::default());
    h.stage(NewStagedEntity::new("Version1", "test"));
    h.stage(NewStagedEntity::new("Version2", "test"));

    let report = h.run().await.unwrap();

    assert_eq!(report.entities_promoted, 2);
    assert_eq!(report.entities_merged, 0);
    assert_eq!(h.entity_names().len(), 2);
}

#[tokio::test]
async fn test_parent_chain_respects_depth() {
    for (depth, expected_edges) in [(1, 2), (2, 3)] {
        let h = Harness::new(KgConfig::default().with_max_parent_recursion_depth(depth));
        h.stage(keyed("Initiative Charlie", "ticket", "C", None));
        h.stage(keyed("Epic Bravo", "ticket", "B", Some("C")));
        h.stage(keyed("Story Alpha", "ticket", "A", Some("B")));

        let report = h.run().await.unwrap();

        assert_eq!(report.entities_promoted, 3, "depth {}", depth);
        assert_eq!(report.parent_links_created, expected_edges, "depth {}", depth);
        let edges = h.store.list_relationships(&h.ctx).unwrap();
        assert_eq!(edges.len(), expected_edges, "depth {}", depth);
        assert!(edges.iter().all(|e| e.relationship == "has_subcomponent"));
    }
}

#[tokio::test]
async fn test_relationship_waits_for_its_endpoints() {
    let h = Harness::new(KgConfig::default());
    h.stage(NewStagedEntity::new("Dane", "employee"));
    h.stage_type("employee", "works_at", "account");
    // the account was never staged
    h.stage_relationship("EMPLOYEE::Dane__works_at__ACCOUNT::Ghost Inc", None);

    let report = h.run().await.unwrap();

    assert_eq!(report.relationships_transferred, 0);
    assert_eq!(report.relationships_skipped, 1);
    assert!(h.store.list_relationships(&h.ctx).unwrap().is_empty());

    let counts = h.store.staging_counts(&h.ctx).unwrap();
    assert_eq!(counts.relationships, 1);
    // the transferred endpoint stays staged while the relationship needs it
    assert_eq!(counts.entities, 1);

    // once the account arrives, the next run completes the edge
    h.stage(NewStagedEntity::new("Ghost Inc", "account"));
    let report = h.run().await.unwrap();
    assert_eq!(report.relationships_transferred, 1);
    assert_eq!(h.relationship_names(), vec!["works_at"]);
    assert!(h.store.staging_counts(&h.ctx).unwrap().is_empty());
}

#[tokio::test]
async fn test_reextracted_endpoint_keeps_new_occurrences() {
    let h = Harness::new(KgConfig::default());
    h.stage(NewStagedEntity::new("Dane", "employee"));
    h.stage_type("employee", "works_at", "account");
    h.stage_relationship("EMPLOYEE::Dane__works_at__ACCOUNT::Ghost Inc", None);
    h.run().await.unwrap();

    // Dane is extracted again while the held-back row still sits in staging
    h.stage(NewStagedEntity::new("Dane", "employee").with_occurrences(5));
    h.stage(NewStagedEntity::new("Ghost Inc", "account"));
    let report = h.run().await.unwrap();

    assert_eq!(report.entities_merged, 1);
    assert_eq!(report.relationships_transferred, 1);
    let entities = h.store.list_entities(&h.ctx).unwrap();
    let dane = entities.iter().find(|e| e.name == "dane").unwrap();
    assert_eq!(dane.occurrences, 6);
    assert_eq!(entities.len(), 2);
    assert_eq!(h.relationship_names(), vec!["works_at"]);
    assert!(h.store.staging_counts(&h.ctx).unwrap().is_empty());
}

#[tokio::test]
async fn test_relationship_without_catalog_entry_is_skipped() {
    let h = Harness::new(KgConfig::default());
    h.stage(NewStagedEntity::new("Dane", "employee"));
    h.stage(NewStagedEntity::new("Globex", "account"));
    h.stage_relationship("EMPLOYEE::Dane__works_at__ACCOUNT::Globex", None);

    let report = h.run().await.unwrap();

    assert_eq!(report.relationships_transferred, 0);
    assert_eq!(report.relationships_skipped, 1);
    assert_eq!(h.store.staging_counts(&h.ctx).unwrap().relationships, 1);
}

#[tokio::test]
async fn test_lock_loss_aborts_run() {
    let h = Harness::new(KgConfig::default().with_batch_size(1));
    h.stage(NewStagedEntity::new("Alpha", "project"));
    h.stage(NewStagedEntity::new("Bravo", "project"));
    h.stage(NewStagedEntity::new("Charlie", "project"));

    let lock = TestLock::lost_after(1);
    let err = h
        .orchestrator
        .run(&h.ctx, &lock, &AllowedDocuments::All)
        .await
        .unwrap_err();

    assert!(err.is_fatal());
    assert_eq!(err.code(), ErrorCode::LockNotOwned);
    // only the batch checked in before the loss was processed
    assert_eq!(h.entity_names(), vec!["alpha"]);
    assert_eq!(h.store.staging_counts(&h.ctx).unwrap().entities, 3);
}

#[tokio::test]
async fn test_slow_renewal_aborts_run() {
    let config = KgConfig {
        lock_renew_deadline_secs: 0,
        ..KgConfig::default()
    };
    let h = Harness::new(config);
    h.stage(NewStagedEntity::new("Alpha", "project"));

    let lock = TestLock::slow();
    let err = h
        .orchestrator
        .run(&h.ctx, &lock, &AllowedDocuments::All)
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::LockRenewFailed);
    assert_eq!(lock.renewals.load(Ordering::SeqCst), 0);
    assert!(h.entity_names().is_empty());
}

#[tokio::test]
async fn test_lock_is_renewed_every_batch() {
    let h = Harness::new(KgConfig::default().with_batch_size(1));
    h.stage(NewStagedEntity::new("Alpha", "project"));
    h.stage(NewStagedEntity::new("Bravo", "project"));

    let lock = TestLock::held();
    h.orchestrator
        .run(&h.ctx, &lock, &AllowedDocuments::All)
        .await
        .unwrap();

    // entity stage alone checks in once per batch plus the final empty page
    assert!(lock.renewals.load(Ordering::SeqCst) >= 3);
}

#[tokio::test]
async fn test_parent_link_reindexes_parent_document() {
    let h = Harness::new(KgConfig::default());
    h.store.register_document(&h.ctx, "docA", Some("Design Doc A")).unwrap();
    h.store.register_document(&h.ctx, "docB", Some("Design Doc B")).unwrap();

    h.stage(keyed("DocB", "test", "DocB", None).with_document("docB"));
    h.run().await.unwrap();
    h.index.updates.lock().unwrap().clear();

    // the child arrives later, from a different document
    h.stage(keyed("DocA", "test", "DocA", Some("DocB")).with_document("docA"));
    let report = h.run().await.unwrap();

    assert_eq!(report.parent_links_created, 1);
    assert_eq!(
        h.index.documents(),
        ["docA", "docB"].iter().map(|s| s.to_string()).collect()
    );
    let doc_b_update = h.index.update_for("docB").unwrap();
    assert_eq!(doc_b_update.relationships.len(), 1);
    assert_eq!(doc_b_update.relationships[0].relationship, "has_subcomponent");
}

#[tokio::test]
async fn test_second_run_transfers_nothing_twice() {
    let h = Harness::new(KgConfig::default());
    h.stage(NewStagedEntity::new("Dane", "employee").with_occurrences(2));
    h.stage(NewStagedEntity::new("Globex", "account"));
    h.stage_type("employee", "works_at", "account");
    h.stage_relationship("EMPLOYEE::Dane__works_at__ACCOUNT::Globex", None);

    let first = h.run().await.unwrap();
    assert_eq!(first.entities_promoted, 2);
    assert_eq!(first.relationships_transferred, 1);

    let second = h.run().await.unwrap();
    assert_eq!(second.entities_transferred(), 0);
    assert_eq!(second.relationships_transferred, 0);
    assert_eq!(second.relationship_types_transferred, 0);

    let entities = h.store.list_entities(&h.ctx).unwrap();
    assert_eq!(entities.len(), 2);
    let dane = entities.iter().find(|e| e.name == "dane").unwrap();
    assert_eq!(dane.occurrences, 2);
    let relationships = h.store.list_relationships(&h.ctx).unwrap();
    assert_eq!(relationships.len(), 1);
    assert_eq!(relationships[0].occurrences, 1);
}

#[tokio::test]
async fn test_index_failure_is_isolated_per_document() {
    let h = Harness::with_index(KgConfig::default(), RecordingIndex::failing_for("docA"));
    h.stage(NewStagedEntity::new("Roadmap", "doc").with_document("docA"));
    h.stage(NewStagedEntity::new("Budget", "doc").with_document("docB"));

    let report = h.run().await.unwrap();

    assert_eq!(report.documents_synced, 1);
    assert_eq!(report.documents_failed, 1);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].contains("IDX_001"));
    assert_eq!(
        h.index.documents(),
        std::iter::once("docB".to_string()).collect()
    );
    // the purge still ran
    assert!(h.store.staging_counts(&h.ctx).unwrap().is_empty());
}

#[tokio::test]
async fn test_hidden_documents_are_not_merge_targets() {
    let h = Harness::new(KgConfig::default());
    h.stage(NewStagedEntity::new("Roadmap", "doc").with_document("private"));
    h.orchestrator
        .run(&h.ctx, &TestLock::held(), &AllowedDocuments::All)
        .await
        .unwrap();

    h.stage(NewStagedEntity::new("Roadmap!", "doc"));
    let report = h
        .orchestrator
        .run(&h.ctx, &TestLock::held(), &AllowedDocuments::only(["public"]))
        .await
        .unwrap();

    assert_eq!(report.entities_promoted, 1);
    assert_eq!(h.entity_names().len(), 2);
}

#[tokio::test]
async fn test_embedding_picks_closest_catalog_entry() {
    let h = Harness::new(KgConfig::default());
    h.stage(NewStagedEntity::new("Dane", "employee"));
    h.stage(NewStagedEntity::new("Globex", "account"));
    h.stage_type("employee", "works_at", "account");
    h.stage_type("employee", "manages", "account");
    // "works for" shares more letters with works_at than with manages
    h.stage_relationship("EMPLOYEE::Dane__works for__ACCOUNT::Globex", None);

    let report = h.run().await.unwrap();

    assert_eq!(report.relationships_transferred, 1);
    assert_eq!(h.relationship_names(), vec!["works_at"]);
}

#[tokio::test]
async fn test_file_backed_store_resumes_after_reopen() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("kg.db");
    let ctx = TenantContext::new("tenant-1");
    let open = |path: &std::path::Path| {
        let store = Arc::new(SqliteKgStore::new(path).unwrap());
        let orchestrator = ClusteringOrchestrator::new(
            store.clone(),
            Arc::new(LetterEmbedder),
            Arc::new(RecordingIndex::default()),
            KgConfig::default(),
        )
        .unwrap();
        (store, orchestrator)
    };

    {
        let (store, orchestrator) = open(&path);
        store
            .upsert_staged_entity(&ctx, &NewStagedEntity::new("Jonathan Smith", "employee"))
            .unwrap();
        orchestrator
            .run(&ctx, &TestLock::held(), &AllowedDocuments::All)
            .await
            .unwrap();
    }

    let (store, orchestrator) = open(&path);
    store
        .upsert_staged_entity(&ctx, &NewStagedEntity::new("Jonathan Smyth", "employee"))
        .unwrap();
    let report = orchestrator
        .run(&ctx, &TestLock::held(), &AllowedDocuments::All)
        .await
        .unwrap();

    assert_eq!(report.entities_merged, 1);
    let entities = store.list_entities(&ctx).unwrap();
    assert_eq!(entities.len(), 1);
    assert_eq!(entities[0].occurrences, 2);
}
