//! Staged and canonical relationships, and the relationship-type catalog.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A raw extracted relationship waiting for transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedRelationship {
    pub seq: i64,
    /// `source__relationship__target` using staged entity ids.
    pub id_name: String,
    pub source_node: String,
    pub target_node: String,
    pub source_node_type: String,
    pub target_node_type: String,
    /// Normalized relationship phrase.
    pub relationship: String,
    pub relationship_type_id_name: String,
    pub source_document: Option<String>,
    pub occurrences: i64,
    pub transferred: bool,
}

/// A deduplicated graph edge between canonical entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalRelationship {
    pub id_name: String,
    pub source_node: String,
    pub target_node: String,
    pub source_node_type: String,
    pub target_node_type: String,
    pub relationship: String,
    pub relationship_type_id_name: String,
    pub source_document: Option<String>,
    pub occurrences: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Entry of the relationship-type catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipType {
    /// `SOURCE_TYPE__relationship__TARGET_TYPE`.
    pub id_name: String,
    pub name: String,
    pub source_entity_type: String,
    pub target_entity_type: String,
    pub definition: bool,
    pub occurrences: i64,
    pub active: bool,
}

/// A relationship type extracted but not yet in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedRelationshipType {
    pub seq: i64,
    pub relationship_type: RelationshipType,
    pub transferred: bool,
}
