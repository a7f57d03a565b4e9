//! Cheap index-backed candidate lookup.

use std::sync::Arc;

use kgraph_core::error::KgResult;
use kgraph_core::types::{AllowedDocuments, TenantContext};
use kgraph_core::KgConfig;
use kgraph_store::{Candidate, CandidateQuery, SqliteKgStore};

/// What to look for: a cleaned name within one entity type.
#[derive(Debug, Clone)]
pub struct EntityQuery<'a> {
    pub cleaned_name: &'a str,
    pub entity_type: &'a str,
    pub subtype: Option<&'a str>,
    /// Only consider canonical entities without a document.
    pub ungrounded_only: bool,
}

/// Retrieves up to `limit` canonical entities sharing trigrams with a name.
pub struct CandidateRetriever {
    store: Arc<SqliteKgStore>,
    limit: usize,
    min_overlap: f64,
}

impl CandidateRetriever {
    pub fn new(store: Arc<SqliteKgStore>, limit: usize, min_overlap: f64) -> Self {
        Self {
            store,
            limit,
            min_overlap,
        }
    }

    pub fn from_config(store: Arc<SqliteKgStore>, config: &KgConfig) -> Self {
        Self::new(store, config.retrieve_limit, config.retrieve_threshold)
    }

    /// Candidates ordered by trigram overlap, best first.
    pub fn retrieve(
        &self,
        ctx: &TenantContext,
        query: &EntityQuery<'_>,
        allowed: &AllowedDocuments,
    ) -> KgResult<Vec<Candidate>> {
        if query.cleaned_name.is_empty() {
            return Ok(Vec::new());
        }
        self.store.find_candidates(
            ctx,
            &CandidateQuery {
                name: query.cleaned_name,
                entity_type: query.entity_type,
                subtype: query.subtype,
                ungrounded_only: query.ungrounded_only,
                allowed,
                min_overlap: self.min_overlap,
                limit: self.limit,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kgraph_core::NewStagedEntity;

    #[test]
    fn test_retrieve_respects_limit() {
        let store = Arc::new(SqliteKgStore::in_memory().unwrap());
        let ctx = TenantContext::default();
        for name in ["acme", "acmes", "acmex", "acmez"] {
            let staged = store
                .upsert_staged_entity(&ctx, &NewStagedEntity::new(name, "account"))
                .unwrap();
            store.transfer_entity(&ctx, &staged).unwrap();
        }

        let retriever = CandidateRetriever::new(store, 2, 0.3);
        let query = EntityQuery {
            cleaned_name: "acme",
            entity_type: "ACCOUNT",
            subtype: None,
            ungrounded_only: false,
        };
        let candidates = retriever.retrieve(&ctx, &query, &AllowedDocuments::All).unwrap();

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].entity.name, "acme");
    }

    #[test]
    fn test_empty_name_finds_nothing() {
        let store = Arc::new(SqliteKgStore::in_memory().unwrap());
        let retriever = CandidateRetriever::from_config(store, &KgConfig::default());
        let query = EntityQuery {
            cleaned_name: "",
            entity_type: "ACCOUNT",
            subtype: None,
            ungrounded_only: false,
        };
        let candidates = retriever
            .retrieve(&TenantContext::default(), &query, &AllowedDocuments::All)
            .unwrap();
        assert!(candidates.is_empty());
    }
}
