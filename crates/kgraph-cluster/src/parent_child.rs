//! Synthesizes `has_subcomponent` edges by climbing declared parent chains.
//!
//! Each staged entity with a parent link is handled once per pass: if a
//! canonical entity carries the linked key, an edge from that ancestor to
//! the entity's canonical node is upserted, and the link moves one step up
//! to the ancestor's own parent. Repeating the pass `depth` times connects
//! an entity to every ancestor up to `depth` levels above it.
//!
//! Steps run one after another: every step is a handful of writes against
//! the same serialized connection.

use std::sync::Arc;

use tracing::debug;

use kgraph_core::error::KgResult;
use kgraph_core::types::{
    make_relationship_id, ParentLink, RelationshipId, StagedEntity, TenantContext,
    HAS_SUBCOMPONENT,
};
use kgraph_store::SqliteKgStore;

/// What one derivation step did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParentStep {
    /// An edge was upserted and the link advanced. `parent` and `child` are
    /// the canonical endpoints, equal when the chain points back at itself.
    Linked {
        relationship_id: String,
        parent: String,
        child: String,
        next: ParentLink,
    },
    /// No canonical entity carries the key; the link is exhausted.
    NoParent,
    /// The entity has not been transferred yet; left for a later run.
    Pending,
}

/// Derives parent-child relationships for staged entities.
pub struct ParentChildDeriver {
    store: Arc<SqliteKgStore>,
}

impl ParentChildDeriver {
    pub fn new(store: Arc<SqliteKgStore>) -> Self {
        Self { store }
    }

    /// Take one step up the parent chain of a staged entity.
    pub fn derive_one(&self, ctx: &TenantContext, entity: &StagedEntity) -> KgResult<ParentStep> {
        let Some(parent_key) = entity.parent.as_ref().and_then(|p| p.ancestor()) else {
            return Ok(ParentStep::NoParent);
        };
        let Some(child_id) = entity.transferred_id_name.as_deref() else {
            return Ok(ParentStep::Pending);
        };

        let Some(parent) = self.store.entity_by_key(ctx, parent_key)? else {
            self.store.set_parent_link(ctx, &entity.id_name, &ParentLink::Exhausted)?;
            return Ok(ParentStep::NoParent);
        };

        let next = ParentLink::next(parent.parent_key.as_deref());
        let relationship_id = make_relationship_id(&parent.id_name, HAS_SUBCOMPONENT, child_id);

        if parent.id_name != child_id {
            self.store.upsert_relationship_type(
                ctx,
                &parent.entity_type,
                HAS_SUBCOMPONENT,
                &entity.entity_type,
                false,
                1,
            )?;
            let id = RelationshipId::parse(&relationship_id)?;
            self.store
                .upsert_relationship(ctx, &id, entity.document_id.as_deref(), 1)?;
        }
        self.store.set_parent_link(ctx, &entity.id_name, &next)?;

        debug!(child = %child_id, parent = %parent.id_name, "Linked parent");
        Ok(ParentStep::Linked {
            relationship_id,
            parent: parent.id_name,
            child: child_id.to_string(),
            next,
        })
    }

    /// Step every entity of a batch, in staging order.
    ///
    /// A failing entity does not stop the rest; results come back paired
    /// with the staged id.
    pub fn derive_batch(
        &self,
        ctx: &TenantContext,
        entities: Vec<StagedEntity>,
    ) -> Vec<(String, KgResult<ParentStep>)> {
        entities
            .into_iter()
            .map(|entity| {
                let step = self.derive_one(ctx, &entity);
                (entity.id_name, step)
            })
            .collect()
    }
}
