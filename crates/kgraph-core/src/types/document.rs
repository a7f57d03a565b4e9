//! Document-level bookkeeping: processing stage, tenant scope, access filter
//! and index membership.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::entity::CanonicalEntity;
use super::relationship::CanonicalRelationship;
use crate::error::KgError;

/// Knowledge-graph processing stage of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum KgStage {
    #[default]
    NotStarted,
    Extracted,
    Normalized,
    Failed,
}

impl KgStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Extracted => "extracted",
            Self::Normalized => "normalized",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for KgStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KgStage {
    type Err = KgError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_started" => Ok(Self::NotStarted),
            "extracted" => Ok(Self::Extracted),
            "normalized" => Ok(Self::Normalized),
            "failed" => Ok(Self::Failed),
            other => Err(KgError::validation(format!("unknown kg stage '{}'", other))),
        }
    }
}

/// A source document known to the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub semantic_id: Option<String>,
    pub kg_stage: KgStage,
    pub kg_processing_time: Option<DateTime<Utc>>,
}

/// Tenant scope passed explicitly into every store call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantContext {
    pub tenant_id: String,
}

impl TenantContext {
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
        }
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }
}

impl Default for TenantContext {
    fn default() -> Self {
        Self::new("public")
    }
}

/// Which document-scoped canonical entities a run may see.
///
/// Entities without a document are always visible.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AllowedDocuments {
    #[default]
    All,
    Only(HashSet<String>),
}

impl AllowedDocuments {
    pub fn only<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Only(ids.into_iter().map(Into::into).collect())
    }

    pub fn permits(&self, document_id: Option<&str>) -> bool {
        match (self, document_id) {
            (_, None) | (Self::All, _) => true,
            (Self::Only(ids), Some(id)) => ids.contains(id),
        }
    }
}

/// Current entity/relationship membership of one document, pushed to the
/// downstream search index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexUpdateRequest {
    pub document_id: String,
    pub entities: Vec<CanonicalEntity>,
    pub relationships: Vec<CanonicalRelationship>,
}

impl IndexUpdateRequest {
    pub fn entity_ids(&self) -> Vec<&str> {
        self.entities.iter().map(|e| e.id_name.as_str()).collect()
    }

    pub fn relationship_ids(&self) -> Vec<&str> {
        self.relationships.iter().map(|r| r.id_name.as_str()).collect()
    }
}

/// Per entity type counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityTypeStats {
    pub entity_type: String,
    pub count: i64,
    pub last_updated: Option<DateTime<Utc>>,
}
