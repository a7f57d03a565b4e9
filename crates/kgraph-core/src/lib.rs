//! kgraph-core - Core library for kgraph.
//!
//! Shared types, the error taxonomy, collaborator traits and configuration
//! for the knowledge-graph entity-resolution engine.
//!
//! # Example
//!
//! ```ignore
//! use kgraph_core::{make_relationship_id, RelationshipId};
//!
//! let id = make_relationship_id("TEST::DocB", "is parent of", "TEST::DocA");
//! assert_eq!(id, "TEST::docb__is_parent_of__TEST::doca");
//! let parsed = RelationshipId::parse(&id)?;
//! ```

pub mod config;
pub mod error;
pub mod text;
pub mod traits;
pub mod types;

// Re-export commonly used types
pub use config::KgConfig;
pub use error::{ErrorCode, KgError, KgResult};
pub use traits::{dot_product, CoordinationLock, Embedder, IndexSync};
pub use types::{
    make_entity_id, make_relationship_id, make_relationship_type_id, AllowedDocuments,
    AttributeValue, Attributes, CanonicalEntity, CanonicalRelationship, Document,
    EntityTypeStats, IndexUpdateRequest, KgStage, NewStagedEntity, ParentLink, RelationshipId,
    RelationshipType, StagedEntity, StagedRelationship, StagedRelationshipType, TenantContext,
};
