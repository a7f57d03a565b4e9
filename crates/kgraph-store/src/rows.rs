//! Row <-> type mapping shared by the store modules.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rusqlite::Row;

use kgraph_core::error::{KgError, KgResult};
use kgraph_core::types::{
    Attributes, CanonicalEntity, CanonicalRelationship, Document, KgStage, ParentLink,
    RelationshipType, StagedEntity, StagedRelationship, StagedRelationshipType,
};

pub(crate) const STAGED_ENTITY_COLUMNS: &str = "seq, id_name, name, entity_type, entity_key, \
     parent_key, document_id, occurrences, attributes, alternative_names, transferred_id_name";

pub(crate) const CANONICAL_ENTITY_COLUMNS: &str = "id_name, name, entity_type, document_id, \
     entity_key, parent_key, alternative_names, occurrences, attributes, created_at, updated_at";

pub(crate) const STAGED_RELATIONSHIP_COLUMNS: &str = "seq, id_name, source_node, target_node, \
     source_node_type, target_node_type, relationship, relationship_type_id_name, \
     source_document, occurrences, transferred";

pub(crate) const CANONICAL_RELATIONSHIP_COLUMNS: &str = "id_name, source_node, target_node, \
     source_node_type, target_node_type, relationship, relationship_type_id_name, \
     source_document, occurrences, created_at, updated_at";

pub(crate) const RELATIONSHIP_TYPE_COLUMNS: &str =
    "id_name, name, source_entity_type, target_entity_type, definition, occurrences, active";

pub(crate) const DOCUMENT_COLUMNS: &str = "id, semantic_id, kg_stage, kg_processing_time";

pub(crate) fn now() -> String {
    Utc::now().to_rfc3339()
}

pub(crate) fn parse_timestamp(raw: &str) -> KgResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| KgError::database(format!("invalid timestamp '{}': {}", raw, e)))
}

/// Map the `''` sentinel of conflict-key columns back to `None`.
pub(crate) fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

pub(crate) fn names_to_json(names: &BTreeSet<String>) -> KgResult<String> {
    Ok(serde_json::to_string(names)?)
}

fn names_from_json(raw: &str) -> KgResult<BTreeSet<String>> {
    Ok(serde_json::from_str(raw)?)
}

/// Drain a `query_map` iterator whose closure returns `KgResult`.
pub(crate) fn collect_rows<T>(
    rows: impl Iterator<Item = rusqlite::Result<KgResult<T>>>,
) -> KgResult<Vec<T>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row??);
    }
    Ok(out)
}

pub(crate) fn row_to_staged_entity(row: &Row<'_>) -> KgResult<StagedEntity> {
    let attributes: String = row.get(8)?;
    let alternative_names: String = row.get(9)?;
    Ok(StagedEntity {
        seq: row.get(0)?,
        id_name: row.get(1)?,
        name: row.get(2)?,
        entity_type: row.get(3)?,
        entity_key: row.get(4)?,
        parent: ParentLink::from_column(row.get(5)?),
        document_id: row.get(6)?,
        occurrences: row.get(7)?,
        attributes: Attributes::from_json(&attributes),
        alternative_names: names_from_json(&alternative_names)?,
        transferred_id_name: row.get(10)?,
    })
}

pub(crate) fn row_to_canonical_entity(row: &Row<'_>) -> KgResult<CanonicalEntity> {
    let document_id: String = row.get(3)?;
    let alternative_names: String = row.get(6)?;
    let attributes: String = row.get(8)?;
    let created_at: String = row.get(9)?;
    let updated_at: String = row.get(10)?;
    Ok(CanonicalEntity {
        id_name: row.get(0)?,
        name: row.get(1)?,
        entity_type: row.get(2)?,
        document_id: non_empty(document_id),
        entity_key: row.get(4)?,
        parent_key: row.get(5)?,
        alternative_names: names_from_json(&alternative_names)?,
        occurrences: row.get(7)?,
        attributes: Attributes::from_json(&attributes),
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

pub(crate) fn row_to_staged_relationship(row: &Row<'_>) -> KgResult<StagedRelationship> {
    let source_document: String = row.get(8)?;
    let transferred: i64 = row.get(10)?;
    Ok(StagedRelationship {
        seq: row.get(0)?,
        id_name: row.get(1)?,
        source_node: row.get(2)?,
        target_node: row.get(3)?,
        source_node_type: row.get(4)?,
        target_node_type: row.get(5)?,
        relationship: row.get(6)?,
        relationship_type_id_name: row.get(7)?,
        source_document: non_empty(source_document),
        occurrences: row.get(9)?,
        transferred: transferred != 0,
    })
}

pub(crate) fn row_to_canonical_relationship(row: &Row<'_>) -> KgResult<CanonicalRelationship> {
    let source_document: String = row.get(7)?;
    let created_at: String = row.get(9)?;
    let updated_at: String = row.get(10)?;
    Ok(CanonicalRelationship {
        id_name: row.get(0)?,
        source_node: row.get(1)?,
        target_node: row.get(2)?,
        source_node_type: row.get(3)?,
        target_node_type: row.get(4)?,
        relationship: row.get(5)?,
        relationship_type_id_name: row.get(6)?,
        source_document: non_empty(source_document),
        occurrences: row.get(8)?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

pub(crate) fn row_to_relationship_type(row: &Row<'_>) -> KgResult<RelationshipType> {
    let definition: i64 = row.get(4)?;
    let active: i64 = row.get(6)?;
    Ok(RelationshipType {
        id_name: row.get(0)?,
        name: row.get(1)?,
        source_entity_type: row.get(2)?,
        target_entity_type: row.get(3)?,
        definition: definition != 0,
        occurrences: row.get(5)?,
        active: active != 0,
    })
}

/// Expects `seq` followed by the relationship type columns and `transferred`.
pub(crate) fn row_to_staged_relationship_type(row: &Row<'_>) -> KgResult<StagedRelationshipType> {
    let definition: i64 = row.get(5)?;
    let active: i64 = row.get(7)?;
    let transferred: i64 = row.get(8)?;
    Ok(StagedRelationshipType {
        seq: row.get(0)?,
        relationship_type: RelationshipType {
            id_name: row.get(1)?,
            name: row.get(2)?,
            source_entity_type: row.get(3)?,
            target_entity_type: row.get(4)?,
            definition: definition != 0,
            occurrences: row.get(6)?,
            active: active != 0,
        },
        transferred: transferred != 0,
    })
}

pub(crate) fn row_to_document(row: &Row<'_>) -> KgResult<Document> {
    let stage: String = row.get(2)?;
    let processing_time: Option<String> = row.get(3)?;
    Ok(Document {
        id: row.get(0)?,
        semantic_id: row.get(1)?,
        kg_stage: stage.parse::<KgStage>()?,
        kg_processing_time: processing_time
            .map(|s| parse_timestamp(&s))
            .transpose()?,
    })
}
