//! Staged and canonical entity types.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::attributes::Attributes;

/// Progress of a staged entity's climb up its declared parent chain.
///
/// Stored as the staging row's `parent_key` column: a key for
/// [`ParentLink::Ancestor`], the empty string for [`ParentLink::Exhausted`].
/// An entity that never declared a parent has no link at all (`NULL`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParentLink {
    /// The next ancestor still to be resolved, by its `entity_key`.
    Ancestor(String),
    /// No further ancestor.
    Exhausted,
}

impl ParentLink {
    /// Decode the nullable `parent_key` column.
    pub fn from_column(value: Option<String>) -> Option<Self> {
        match value {
            None => None,
            Some(s) if s.is_empty() => Some(Self::Exhausted),
            Some(s) => Some(Self::Ancestor(s)),
        }
    }

    /// Encode for the `parent_key` column.
    pub fn as_column(&self) -> &str {
        match self {
            Self::Ancestor(key) => key.as_str(),
            Self::Exhausted => "",
        }
    }

    pub fn ancestor(&self) -> Option<&str> {
        match self {
            Self::Ancestor(key) => Some(key.as_str()),
            Self::Exhausted => None,
        }
    }

    /// Build the link pointing at `next`, or exhausted when there is none.
    pub fn next(next: Option<&str>) -> Self {
        match next {
            Some(key) if !key.is_empty() => Self::Ancestor(key.to_string()),
            _ => Self::Exhausted,
        }
    }
}

/// A raw extracted entity waiting for promotion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedEntity {
    /// Insertion order, used as the pagination cursor.
    pub seq: i64,
    /// `TYPE::name`, stable for identical (type, name) pairs.
    pub id_name: String,
    pub name: String,
    pub entity_type: String,
    pub entity_key: Option<String>,
    pub parent: Option<ParentLink>,
    /// Set only for grounded entities.
    pub document_id: Option<String>,
    pub occurrences: i64,
    pub attributes: Attributes,
    pub alternative_names: BTreeSet<String>,
    /// Canonical id this row was promoted or merged into. Set at most once.
    pub transferred_id_name: Option<String>,
}

impl StagedEntity {
    pub fn is_grounded(&self) -> bool {
        self.document_id.is_some()
    }

    pub fn is_transferred(&self) -> bool {
        self.transferred_id_name.is_some()
    }
}

/// Input to the staging upsert.
#[derive(Debug, Clone, Default)]
pub struct NewStagedEntity {
    pub name: String,
    pub entity_type: String,
    pub document_id: Option<String>,
    pub occurrences: i64,
    pub attributes: Attributes,
}

impl NewStagedEntity {
    pub fn new(name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entity_type: entity_type.into(),
            document_id: None,
            occurrences: 1,
            attributes: Attributes::new(),
        }
    }

    pub fn with_document(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }

    pub fn with_occurrences(mut self, occurrences: i64) -> Self {
        self.occurrences = occurrences;
        self
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }
}

/// A deduplicated, authoritative graph node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalEntity {
    /// `TYPE::<opaque>`.
    pub id_name: String,
    pub name: String,
    pub entity_type: String,
    /// Immutable once set.
    pub document_id: Option<String>,
    pub entity_key: Option<String>,
    pub parent_key: Option<String>,
    pub alternative_names: BTreeSet<String>,
    pub occurrences: i64,
    pub attributes: Attributes,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
