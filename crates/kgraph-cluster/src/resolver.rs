//! Per-entity clustering: retrieve, rerank, then promote or merge.

use std::sync::Arc;

use tracing::debug;

use kgraph_core::error::KgResult;
use kgraph_core::text::clean_name;
use kgraph_core::types::{
    AllowedDocuments, CanonicalEntity, StagedEntity, TenantContext, SUBTYPE_ATTRIBUTE,
};
use kgraph_core::KgConfig;
use kgraph_store::SqliteKgStore;

use crate::reranker::SimilarityReranker;
use crate::retriever::{CandidateRetriever, EntityQuery};

/// What happened to one staged entity.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityOutcome {
    /// A new canonical entity was created.
    Promoted(CanonicalEntity),
    /// The staged entity was folded into an existing canonical entity.
    Merged {
        entity: CanonicalEntity,
        score: f64,
    },
    /// Another run transferred it first.
    AlreadyTransferred,
}

impl EntityOutcome {
    pub fn entity(&self) -> Option<&CanonicalEntity> {
        match self {
            Self::Promoted(entity) | Self::Merged { entity, .. } => Some(entity),
            Self::AlreadyTransferred => None,
        }
    }
}

/// Decides, for each staged entity, whether it duplicates an existing
/// canonical entity, and applies the decision.
pub struct EntityResolver {
    store: Arc<SqliteKgStore>,
    retriever: CandidateRetriever,
    reranker: SimilarityReranker,
}

impl EntityResolver {
    pub fn new(
        store: Arc<SqliteKgStore>,
        retriever: CandidateRetriever,
        reranker: SimilarityReranker,
    ) -> Self {
        Self {
            store,
            retriever,
            reranker,
        }
    }

    pub fn from_config(store: Arc<SqliteKgStore>, config: &KgConfig) -> Self {
        let retriever = CandidateRetriever::from_config(store.clone(), config);
        Self::new(store, retriever, SimilarityReranker::from_config(config))
    }

    /// The name a staged entity is matched by.
    ///
    /// Grounded entities are named after their document's semantic id and
    /// may only merge into entities without a document.
    fn match_name(&self, ctx: &TenantContext, entity: &StagedEntity) -> KgResult<(String, bool)> {
        match &entity.document_id {
            Some(document_id) => {
                let name = self
                    .store
                    .document_semantic_id(ctx, document_id)?
                    .unwrap_or_else(|| entity.name.clone());
                Ok((name.to_lowercase(), true))
            }
            None => Ok((entity.name.to_lowercase(), false)),
        }
    }

    /// Id of the canonical entity this staged entity should merge into, if any.
    pub fn find_match(
        &self,
        ctx: &TenantContext,
        entity: &StagedEntity,
        allowed: &AllowedDocuments,
    ) -> KgResult<Option<(String, f64)>> {
        let (name, ungrounded_only) = self.match_name(ctx, entity)?;
        let cleaned = clean_name(&name);
        let subtype = entity
            .attributes
            .get(SUBTYPE_ATTRIBUTE)
            .and_then(|v| v.as_text());

        let query = EntityQuery {
            cleaned_name: &cleaned,
            entity_type: &entity.entity_type,
            subtype,
            ungrounded_only,
        };
        let candidates = self.retriever.retrieve(ctx, &query, allowed)?;

        Ok(self
            .reranker
            .best_match(&cleaned, &candidates)
            .map(|m| (m.candidate.entity.id_name.clone(), m.score)))
    }

    /// Cluster one staged entity: merge it into its best match or promote it.
    pub fn resolve(
        &self,
        ctx: &TenantContext,
        entity: &StagedEntity,
        allowed: &AllowedDocuments,
    ) -> KgResult<EntityOutcome> {
        match self.find_match(ctx, entity, allowed)? {
            Some((parent_id, score)) => {
                match self.store.merge_entity(ctx, &parent_id, entity)? {
                    Some(merged) => {
                        debug!(staged = %entity.id_name, canonical = %merged.id_name, score, "Merged entity");
                        Ok(EntityOutcome::Merged {
                            entity: merged,
                            score,
                        })
                    }
                    None => Ok(EntityOutcome::AlreadyTransferred),
                }
            }
            None => match self.store.transfer_entity(ctx, entity)? {
                Some(promoted) => Ok(EntityOutcome::Promoted(promoted)),
                None => Ok(EntityOutcome::AlreadyTransferred),
            },
        }
    }
}
