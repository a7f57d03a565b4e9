//! Id formats for entities, relationships and relationship types.
//!
//! - entity: `TYPE::name` (type upper-cased, name lower-cased)
//! - relationship: `source__relationship__target`
//! - relationship type: `SOURCE_TYPE__relationship__TARGET_TYPE`

use std::fmt;

use crate::error::{KgError, KgResult};

/// Separator between an entity type and its name.
pub const ENTITY_SEPARATOR: &str = "::";

/// Separator between the three parts of a relationship id.
pub const RELATIONSHIP_SEPARATOR: &str = "__";

/// Relationship name used for synthesized parent-child edges.
pub const HAS_SUBCOMPONENT: &str = "has_subcomponent";

/// Build an entity id from its type and name.
pub fn make_entity_id(entity_type: &str, name: &str) -> String {
    format!(
        "{}{}{}",
        entity_type.trim().to_uppercase(),
        ENTITY_SEPARATOR,
        name.trim().to_lowercase()
    )
}

/// Re-format an existing entity id into canonical casing.
pub fn format_entity_id(entity_id: &str) -> String {
    match entity_id.split_once(ENTITY_SEPARATOR) {
        Some((entity_type, name)) => make_entity_id(entity_type, name),
        None => entity_id.trim().to_lowercase(),
    }
}

/// The entity type portion of an entity id, upper-cased.
pub fn entity_type_of(entity_id: &str) -> String {
    entity_id
        .split_once(ENTITY_SEPARATOR)
        .map(|(t, _)| t)
        .unwrap_or(entity_id)
        .to_uppercase()
}

/// Normalize a raw relationship phrase (`"Is Assignee Of"` -> `"is_assignee_of"`).
pub fn normalize_relationship_name(relationship: &str) -> String {
    relationship
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .to_lowercase()
}

/// Build a relationship id from its endpoints and relationship name.
pub fn make_relationship_id(source: &str, relationship: &str, target: &str) -> String {
    format!(
        "{}{sep}{}{sep}{}",
        format_entity_id(source),
        normalize_relationship_name(relationship),
        format_entity_id(target),
        sep = RELATIONSHIP_SEPARATOR
    )
}

/// Build a relationship type id.
pub fn make_relationship_type_id(source_type: &str, relationship: &str, target_type: &str) -> String {
    format!(
        "{}{sep}{}{sep}{}",
        source_type.trim().to_uppercase(),
        normalize_relationship_name(relationship),
        target_type.trim().to_uppercase(),
        sep = RELATIONSHIP_SEPARATOR
    )
}

/// A parsed `source__relationship__target` id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelationshipId {
    pub source: String,
    pub relationship: String,
    pub target: String,
}

impl RelationshipId {
    /// Parse and re-format a raw relationship id.
    ///
    /// Fails with a data error unless the id has exactly three non-empty parts.
    pub fn parse(raw: &str) -> KgResult<Self> {
        let parts: Vec<&str> = raw.split(RELATIONSHIP_SEPARATOR).collect();
        match parts.as_slice() {
            [source, relationship, target]
                if !source.trim().is_empty()
                    && !relationship.trim().is_empty()
                    && !target.trim().is_empty() =>
            {
                Ok(Self {
                    source: format_entity_id(source),
                    relationship: normalize_relationship_name(relationship),
                    target: format_entity_id(target),
                })
            }
            _ => Err(KgError::malformed_id(raw)),
        }
    }

    pub fn source_type(&self) -> String {
        entity_type_of(&self.source)
    }

    pub fn target_type(&self) -> String {
        entity_type_of(&self.target)
    }

    /// The relationship type id this relationship belongs to.
    pub fn type_id(&self) -> String {
        make_relationship_type_id(&self.source_type(), &self.relationship, &self.target_type())
    }
}

impl fmt::Display for RelationshipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{sep}{}{sep}{}",
            self.source,
            self.relationship,
            self.target,
            sep = RELATIONSHIP_SEPARATOR
        )
    }
}

/// Python-style title casing: a letter is upper-cased when it follows a
/// non-letter, lower-cased otherwise.
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_cased = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if prev_cased {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_cased = true;
        } else {
            out.push(c);
            prev_cased = false;
        }
    }
    out
}
