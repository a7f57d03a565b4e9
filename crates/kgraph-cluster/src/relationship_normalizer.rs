//! Maps raw relationship phrases onto the relationship-type catalog.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use kgraph_core::error::{KgError, KgResult};
use kgraph_core::types::{
    entity_type_of, format_entity_id, normalize_relationship_name, RelationshipId,
    RelationshipType, TenantContext,
};
use kgraph_core::{dot_product, Embedder};
use kgraph_store::SqliteKgStore;

/// Result of normalizing a list of raw relationships.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedRelationships {
    /// Normalized ids, in input order, for the relationships that resolved.
    pub relationships: Vec<RelationshipId>,
    /// Raw id -> normalized id.
    pub normalization_map: HashMap<String, RelationshipId>,
}

/// Chooses the catalog relationship type closest to a raw phrase.
pub struct RelationshipNormalizer {
    store: Arc<SqliteKgStore>,
    embedder: Arc<dyn Embedder>,
}

impl RelationshipNormalizer {
    pub fn new(store: Arc<SqliteKgStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }

    /// Pick the catalog entry closest to `relationship` by embedding dot
    /// product. An exact name match short-circuits the embedding call. The
    /// first candidate wins on equal similarity.
    async fn choose<'a>(
        &self,
        relationship: &str,
        candidates: &'a [RelationshipType],
    ) -> KgResult<&'a RelationshipType> {
        let wanted = normalize_relationship_name(relationship);
        if let Some(exact) = candidates.iter().find(|c| c.name == wanted) {
            return Ok(exact);
        }

        let mut texts = Vec::with_capacity(candidates.len() + 1);
        texts.push(relationship.to_string());
        texts.extend(candidates.iter().map(|c| c.name.clone()));

        let vectors = self.embedder.embed_batch(&texts).await?;
        if vectors.len() != texts.len() {
            return Err(KgError::embedding(format!(
                "expected {} embeddings from {}, got {}",
                texts.len(),
                self.embedder.model_name(),
                vectors.len()
            )));
        }

        let query = &vectors[0];
        if let Some(bad) = vectors.iter().find(|v| v.len() != query.len()) {
            return Err(KgError::dimension_mismatch(query.len(), bad.len()));
        }
        let mut best = 0;
        let mut best_score = f32::NEG_INFINITY;
        for (i, vector) in vectors[1..].iter().enumerate() {
            let score = dot_product(query, vector);
            if score > best_score {
                best = i;
                best_score = score;
            }
        }
        Ok(&candidates[best])
    }

    /// Normalize one relationship between two canonical entities.
    ///
    /// Returns `None` when the catalog has no active type for the endpoint
    /// types; the relationship is then left for a later run.
    pub async fn normalize(
        &self,
        ctx: &TenantContext,
        relationship: &str,
        source_id: &str,
        target_id: &str,
    ) -> KgResult<Option<RelationshipId>> {
        let source_type = entity_type_of(source_id);
        let target_type = entity_type_of(target_id);
        let candidates = self
            .store
            .active_relationship_types_for_pair(ctx, &source_type, &target_type)?;
        if candidates.is_empty() {
            warn!(
                relationship,
                source_type = %source_type,
                target_type = %target_type,
                "No candidate relationship types"
            );
            return Ok(None);
        }

        let chosen = self.choose(relationship, &candidates).await?;
        debug!(relationship, chosen = %chosen.name, "Normalized relationship");
        Ok(Some(RelationshipId {
            source: format_entity_id(source_id),
            relationship: chosen.name.clone(),
            target: format_entity_id(target_id),
        }))
    }

    /// Normalize raw `source__relationship__target` ids whose endpoints are
    /// translated through `entity_map` (raw entity id -> canonical id).
    ///
    /// Malformed ids, unmapped endpoints and type pairs without catalog
    /// entries are logged and left out of the result.
    pub async fn normalize_relationships(
        &self,
        ctx: &TenantContext,
        raw_relationships: &[String],
        entity_map: &HashMap<String, String>,
    ) -> KgResult<NormalizedRelationships> {
        let mut normalized = NormalizedRelationships::default();

        for raw in raw_relationships {
            let parsed = match RelationshipId::parse(raw) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(raw = %raw, error = %e, "Skipping malformed relationship");
                    continue;
                }
            };
            let (Some(source), Some(target)) =
                (entity_map.get(&parsed.source), entity_map.get(&parsed.target))
            else {
                warn!(raw = %raw, "No normalized entities found for relationship");
                continue;
            };

            if let Some(id) = self
                .normalize(ctx, &parsed.relationship, source, target)
                .await?
            {
                normalized.normalization_map.insert(raw.clone(), id.clone());
                normalized.relationships.push(id);
            }
        }

        Ok(normalized)
    }
}
