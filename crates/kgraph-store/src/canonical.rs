//! Canonical graph writes: entity transfer/merge, relationship and
//! relationship-type transfer, and the read paths clustering needs.

use std::collections::BTreeSet;

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use tracing::debug;
use uuid::Uuid;

use kgraph_core::error::{KgError, KgResult};
use kgraph_core::text::{clean_name, name_trigrams};
use kgraph_core::types::{
    make_entity_id, make_relationship_type_id, AllowedDocuments, CanonicalEntity,
    CanonicalRelationship, EntityTypeStats, IndexUpdateRequest, RelationshipId, RelationshipType,
    StagedEntity, StagedRelationship, StagedRelationshipType, TenantContext, SUBTYPE_ATTRIBUTE,
};

use crate::documents::mark_normalized;
use crate::rows::{
    collect_rows, names_to_json, now, parse_timestamp, row_to_canonical_entity,
    row_to_canonical_relationship, row_to_relationship_type, CANONICAL_ENTITY_COLUMNS,
    CANONICAL_RELATIONSHIP_COLUMNS, RELATIONSHIP_TYPE_COLUMNS,
};
use crate::SqliteKgStore;

/// Length of the opaque suffix of a promoted entity's id.
const OPAQUE_ID_LEN: usize = 20;

/// Filters for trigram candidate retrieval.
#[derive(Debug, Clone)]
pub struct CandidateQuery<'a> {
    /// Cleaned query name.
    pub name: &'a str,
    pub entity_type: &'a str,
    /// Restrict to entities whose `subtype` attribute equals this value.
    pub subtype: Option<&'a str>,
    /// Restrict to entities with no document.
    pub ungrounded_only: bool,
    pub allowed: &'a AllowedDocuments,
    /// Minimum `|shared| / min(|Q|, |E|)` trigram overlap.
    pub min_overlap: f64,
    pub limit: usize,
}

/// A retrieved canonical entity and its trigram overlap with the query.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub entity: CanonicalEntity,
    pub overlap: f64,
}

fn get_entity_on(conn: &Connection, ctx: &TenantContext, id_name: &str) -> KgResult<Option<CanonicalEntity>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM kg_entity WHERE tenant_id = ?1 AND id_name = ?2",
        CANONICAL_ENTITY_COLUMNS
    ))?;
    stmt.query_row(params![ctx.tenant_id(), id_name], |row| {
        Ok(row_to_canonical_entity(row))
    })
    .optional()?
    .transpose()
}

fn index_trigrams(conn: &Connection, ctx: &TenantContext, id_name: &str, trigrams: &BTreeSet<String>) -> KgResult<()> {
    let mut stmt = conn.prepare(
        "INSERT OR IGNORE INTO kg_entity_trigram (tenant_id, entity_id_name, trigram) VALUES (?1, ?2, ?3)",
    )?;
    for trigram in trigrams {
        stmt.execute(params![ctx.tenant_id(), id_name, trigram])?;
    }
    Ok(())
}

/// Set the forwarding pointer on a staged entity if it has none yet.
/// Returns false when another writer got there first.
fn claim_staged_entity(conn: &Connection, ctx: &TenantContext, staged_id: &str, canonical_id: &str) -> KgResult<bool> {
    let updated = conn.execute(
        r#"UPDATE kg_entity_staging SET transferred_id_name = ?3, updated_at = ?4
           WHERE tenant_id = ?1 AND id_name = ?2 AND transferred_id_name IS NULL"#,
        params![ctx.tenant_id(), staged_id, canonical_id, now()],
    )?;
    Ok(updated == 1)
}

fn upsert_relationship_type_on(
    conn: &Connection,
    ctx: &TenantContext,
    relationship_type: &RelationshipType,
) -> KgResult<RelationshipType> {
    let timestamp = now();
    let mut stmt = conn.prepare(&format!(
        r#"INSERT INTO kg_relationship_type
           (tenant_id, id_name, name, source_entity_type, target_entity_type, definition,
            occurrences, active, created_at, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)
           ON CONFLICT(tenant_id, id_name) DO UPDATE SET
               occurrences = occurrences + excluded.occurrences,
               updated_at = excluded.updated_at
           RETURNING {}"#,
        RELATIONSHIP_TYPE_COLUMNS
    ))?;
    stmt.query_row(
        params![
            ctx.tenant_id(),
            relationship_type.id_name,
            relationship_type.name,
            relationship_type.source_entity_type,
            relationship_type.target_entity_type,
            relationship_type.definition as i64,
            relationship_type.occurrences,
            relationship_type.active as i64,
            timestamp,
        ],
        |row| Ok(row_to_relationship_type(row)),
    )?
}

fn upsert_relationship_on(
    conn: &Connection,
    ctx: &TenantContext,
    id: &RelationshipId,
    source_document: Option<&str>,
    occurrences: i64,
) -> KgResult<CanonicalRelationship> {
    let timestamp = now();
    let mut stmt = conn.prepare(&format!(
        r#"INSERT INTO kg_relationship
           (tenant_id, id_name, source_node, target_node, source_node_type, target_node_type,
            relationship, relationship_type_id_name, source_document, occurrences,
            created_at, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
           ON CONFLICT(tenant_id, id_name, source_document) DO UPDATE SET
               occurrences = occurrences + excluded.occurrences,
               updated_at = excluded.updated_at
           RETURNING {}"#,
        CANONICAL_RELATIONSHIP_COLUMNS
    ))?;
    stmt.query_row(
        params![
            ctx.tenant_id(),
            id.to_string(),
            id.source,
            id.target,
            id.source_type(),
            id.target_type(),
            id.relationship,
            id.type_id(),
            source_document.unwrap_or(""),
            occurrences,
            timestamp,
        ],
        |row| Ok(row_to_canonical_relationship(row)),
    )?
}

impl SqliteKgStore {
    /// Promote a staged entity to a new canonical entity.
    ///
    /// If a canonical entity with the same (name, type, document) already
    /// exists, the staged row accumulates into it instead: occurrences add,
    /// attributes union with the staged values winning, keys fill in only
    /// when absent. Returns `None` if the staged row was already transferred.
    pub fn transfer_entity(
        &self,
        ctx: &TenantContext,
        staged: &StagedEntity,
    ) -> KgResult<Option<CanonicalEntity>> {
        let name = staged.name.to_lowercase();
        let suffix: String = Uuid::new_v4()
            .simple()
            .to_string()
            .chars()
            .take(OPAQUE_ID_LEN)
            .collect();
        let id_name = make_entity_id(&staged.entity_type, &suffix);
        let trigrams = name_trigrams(&clean_name(&name));
        let parent_key = staged
            .parent
            .as_ref()
            .and_then(|link| link.ancestor())
            .map(str::to_string);
        let timestamp = now();

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let entity = {
            let mut stmt = tx.prepare(&format!(
                r#"INSERT INTO kg_entity
                   (tenant_id, id_name, name, entity_type, document_id, entity_key, parent_key,
                    alternative_names, occurrences, attributes, trigram_count, created_at, updated_at)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)
                   ON CONFLICT(tenant_id, name, entity_type, document_id) DO UPDATE SET
                       occurrences = kg_entity.occurrences + excluded.occurrences,
                       attributes = json_patch(kg_entity.attributes, excluded.attributes),
                       entity_key = COALESCE(kg_entity.entity_key, excluded.entity_key),
                       parent_key = COALESCE(kg_entity.parent_key, excluded.parent_key),
                       updated_at = excluded.updated_at
                   RETURNING {}"#,
                CANONICAL_ENTITY_COLUMNS
            ))?;
            stmt.query_row(
                params![
                    ctx.tenant_id(),
                    id_name,
                    name,
                    staged.entity_type,
                    staged.document_id.as_deref().unwrap_or(""),
                    staged.entity_key,
                    parent_key,
                    names_to_json(&staged.alternative_names)?,
                    staged.occurrences,
                    staged.attributes.to_json()?,
                    trigrams.len() as i64,
                    timestamp,
                ],
                |row| Ok(row_to_canonical_entity(row)),
            )??
        };

        index_trigrams(&tx, ctx, &entity.id_name, &trigrams)?;

        if !claim_staged_entity(&tx, ctx, &staged.id_name, &entity.id_name)? {
            debug!(id_name = %staged.id_name, "Staged entity already transferred");
            return Ok(None);
        }
        if let Some(document_id) = &staged.document_id {
            mark_normalized(&tx, ctx, document_id)?;
        }
        tx.commit()?;

        debug!(staged = %staged.id_name, canonical = %entity.id_name, "Transferred entity");
        Ok(Some(entity))
    }

    /// Merge a staged entity into an existing canonical entity.
    ///
    /// Fails with a conflict error when both carry different documents, or
    /// when adopting the child's document would collide with another
    /// canonical entity of the same name and type in that document.
    /// Returns `None` if the staged row was already transferred.
    pub fn merge_entity(
        &self,
        ctx: &TenantContext,
        parent_id: &str,
        child: &StagedEntity,
    ) -> KgResult<Option<CanonicalEntity>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let parent = get_entity_on(&tx, ctx, parent_id)?
            .ok_or_else(|| KgError::not_found(format!("canonical entity '{}'", parent_id)))?;

        if let (Some(parent_doc), Some(child_doc)) = (&parent.document_id, &child.document_id) {
            if parent_doc != child_doc {
                return Err(KgError::document_conflict(
                    &parent.id_name,
                    format!(
                        "cannot merge '{}' (document {}) into '{}' (document {})",
                        child.id_name, child_doc, parent.id_name, parent_doc
                    ),
                ));
            }
        }

        let document_id = parent.document_id.clone().or_else(|| child.document_id.clone());
        if parent.document_id.is_none() {
            if let Some(adopted) = &child.document_id {
                let taken_by: Option<String> = tx
                    .query_row(
                        r#"SELECT id_name FROM kg_entity
                           WHERE tenant_id = ?1 AND name = ?2 AND entity_type = ?3
                             AND document_id = ?4 AND id_name != ?5"#,
                        params![
                            ctx.tenant_id(),
                            parent.name,
                            parent.entity_type,
                            adopted,
                            parent.id_name
                        ],
                        |row| row.get(0),
                    )
                    .optional()?;
                if let Some(existing) = taken_by {
                    return Err(KgError::document_conflict(
                        &parent.id_name,
                        format!(
                            "cannot move '{}' into document {}: '{}' already holds that name",
                            parent.id_name, adopted, existing
                        ),
                    ));
                }
            }
        }
        let mut alternative_names = parent.alternative_names.clone();
        alternative_names.extend(child.alternative_names.iter().cloned());
        alternative_names.insert(child.name.to_lowercase());
        alternative_names.remove(&parent.name);
        let attributes = parent.attributes.merged(&child.attributes);
        let entity_key = parent.entity_key.clone().or_else(|| child.entity_key.clone());
        let parent_key = parent.parent_key.clone().or_else(|| {
            child
                .parent
                .as_ref()
                .and_then(|link| link.ancestor())
                .map(str::to_string)
        });

        let merged = {
            let mut stmt = tx.prepare(&format!(
                r#"UPDATE kg_entity SET
                       document_id = ?3,
                       alternative_names = ?4,
                       occurrences = occurrences + ?5,
                       attributes = ?6,
                       entity_key = ?7,
                       parent_key = ?8,
                       updated_at = ?9
                   WHERE tenant_id = ?1 AND id_name = ?2
                   RETURNING {}"#,
                CANONICAL_ENTITY_COLUMNS
            ))?;
            stmt.query_row(
                params![
                    ctx.tenant_id(),
                    parent.id_name,
                    document_id.as_deref().unwrap_or(""),
                    names_to_json(&alternative_names)?,
                    child.occurrences,
                    attributes.to_json()?,
                    entity_key,
                    parent_key,
                    now(),
                ],
                |row| Ok(row_to_canonical_entity(row)),
            )??
        };

        if !claim_staged_entity(&tx, ctx, &child.id_name, &merged.id_name)? {
            debug!(id_name = %child.id_name, "Staged entity already transferred");
            return Ok(None);
        }
        if let Some(document_id) = &child.document_id {
            mark_normalized(&tx, ctx, document_id)?;
        }
        tx.commit()?;

        debug!(staged = %child.id_name, canonical = %merged.id_name, "Merged entity");
        Ok(Some(merged))
    }

    /// Get a canonical entity by id.
    pub fn get_entity(&self, ctx: &TenantContext, id_name: &str) -> KgResult<Option<CanonicalEntity>> {
        let conn = self.conn()?;
        get_entity_on(&conn, ctx, id_name)
    }

    /// The oldest canonical entity carrying the given business key.
    pub fn entity_by_key(
        &self,
        ctx: &TenantContext,
        entity_key: &str,
    ) -> KgResult<Option<CanonicalEntity>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"SELECT {} FROM kg_entity
               WHERE tenant_id = ?1 AND entity_key = ?2
               ORDER BY rowid LIMIT 1"#,
            CANONICAL_ENTITY_COLUMNS
        ))?;
        stmt.query_row(params![ctx.tenant_id(), entity_key], |row| {
            Ok(row_to_canonical_entity(row))
        })
        .optional()?
        .transpose()
    }

    /// All canonical entities, oldest first.
    pub fn list_entities(&self, ctx: &TenantContext) -> KgResult<Vec<CanonicalEntity>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM kg_entity WHERE tenant_id = ?1 ORDER BY rowid",
            CANONICAL_ENTITY_COLUMNS
        ))?;
        let rows = stmt.query_map(params![ctx.tenant_id()], |row| {
            Ok(row_to_canonical_entity(row))
        })?;
        collect_rows(rows)
    }

    /// Retrieve canonical entities sharing trigrams with a cleaned name,
    /// best overlap first, older entities first on ties.
    pub fn find_candidates(
        &self,
        ctx: &TenantContext,
        query: &CandidateQuery<'_>,
    ) -> KgResult<Vec<Candidate>> {
        let trigrams = name_trigrams(query.name);
        if trigrams.is_empty() || query.limit == 0 {
            return Ok(Vec::new());
        }
        let trigrams: Vec<&String> = trigrams.iter().collect();

        let mut values: Vec<Value> = vec![
            Value::Text(ctx.tenant_id().to_string()),
            Value::Text(serde_json::to_string(&trigrams)?),
            Value::Integer(trigrams.len() as i64),
            Value::Text(query.entity_type.to_string()),
            Value::Real(query.min_overlap),
        ];
        let mut filters = String::new();

        if query.ungrounded_only {
            filters.push_str(" AND kg_entity.document_id = ''");
        }
        if let AllowedDocuments::Only(ids) = query.allowed {
            let mut ids: Vec<&String> = ids.iter().collect();
            ids.sort();
            values.push(Value::Text(serde_json::to_string(&ids)?));
            filters.push_str(&format!(
                " AND (kg_entity.document_id = '' OR kg_entity.document_id IN (SELECT value FROM json_each(?{})))",
                values.len()
            ));
        }
        if let Some(subtype) = query.subtype {
            values.push(Value::Text(subtype.to_string()));
            filters.push_str(&format!(
                " AND json_extract(kg_entity.attributes, '$.{}') = ?{}",
                SUBTYPE_ATTRIBUTE,
                values.len()
            ));
        }
        values.push(Value::Integer(query.limit as i64));
        let limit_param = values.len();

        let sql = format!(
            r#"SELECT {columns}, CAST(shared.n AS REAL) / MIN(?3, kg_entity.trigram_count) AS overlap
               FROM kg_entity
               JOIN (
                   SELECT entity_id_name, COUNT(*) AS n
                   FROM kg_entity_trigram
                   WHERE tenant_id = ?1 AND trigram IN (SELECT value FROM json_each(?2))
                   GROUP BY entity_id_name
               ) AS shared ON shared.entity_id_name = kg_entity.id_name
               WHERE kg_entity.tenant_id = ?1
                 AND kg_entity.entity_type = ?4
                 AND CAST(shared.n AS REAL) / MIN(?3, kg_entity.trigram_count) >= ?5
                 {filters}
               ORDER BY overlap DESC, kg_entity.rowid ASC
               LIMIT ?{limit}"#,
            columns = CANONICAL_ENTITY_COLUMNS,
            filters = filters,
            limit = limit_param,
        );

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
            let overlap: f64 = row.get(11)?;
            Ok(row_to_canonical_entity(row).map(|entity| Candidate { entity, overlap }))
        })?;
        collect_rows(rows)
    }

    /// Add a relationship type to the catalog or bump its occurrences.
    pub fn upsert_relationship_type(
        &self,
        ctx: &TenantContext,
        source_type: &str,
        relationship: &str,
        target_type: &str,
        definition: bool,
        occurrences: i64,
    ) -> KgResult<RelationshipType> {
        let relationship_type = RelationshipType {
            id_name: make_relationship_type_id(source_type, relationship, target_type),
            name: kgraph_core::types::normalize_relationship_name(relationship),
            source_entity_type: source_type.trim().to_uppercase(),
            target_entity_type: target_type.trim().to_uppercase(),
            definition,
            occurrences,
            active: true,
        };
        let conn = self.conn()?;
        upsert_relationship_type_on(&conn, ctx, &relationship_type)
    }

    /// Move a staged relationship type into the catalog.
    ///
    /// Returns `None` if it was already transferred.
    pub fn transfer_relationship_type(
        &self,
        ctx: &TenantContext,
        staged: &StagedRelationshipType,
    ) -> KgResult<Option<RelationshipType>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let claimed = tx.execute(
            r#"UPDATE kg_relationship_type_staging SET transferred = 1
               WHERE tenant_id = ?1 AND id_name = ?2 AND transferred = 0"#,
            params![ctx.tenant_id(), staged.relationship_type.id_name],
        )?;
        if claimed == 0 {
            return Ok(None);
        }
        let transferred = upsert_relationship_type_on(&tx, ctx, &staged.relationship_type)?;
        tx.commit()?;
        Ok(Some(transferred))
    }

    /// Get a catalog entry by id.
    pub fn get_relationship_type(
        &self,
        ctx: &TenantContext,
        id_name: &str,
    ) -> KgResult<Option<RelationshipType>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM kg_relationship_type WHERE tenant_id = ?1 AND id_name = ?2",
            RELATIONSHIP_TYPE_COLUMNS
        ))?;
        stmt.query_row(params![ctx.tenant_id(), id_name], |row| {
            Ok(row_to_relationship_type(row))
        })
        .optional()?
        .transpose()
    }

    /// Active catalog entries for a (source type, target type) pair.
    pub fn active_relationship_types_for_pair(
        &self,
        ctx: &TenantContext,
        source_type: &str,
        target_type: &str,
    ) -> KgResult<Vec<RelationshipType>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"SELECT {} FROM kg_relationship_type
               WHERE tenant_id = ?1 AND source_entity_type = ?2 AND target_entity_type = ?3
                 AND active = 1
               ORDER BY id_name"#,
            RELATIONSHIP_TYPE_COLUMNS
        ))?;
        let rows = stmt.query_map(
            params![
                ctx.tenant_id(),
                source_type.to_uppercase(),
                target_type.to_uppercase()
            ],
            |row| Ok(row_to_relationship_type(row)),
        )?;
        collect_rows(rows)
    }

    /// The whole catalog, ordered by id.
    pub fn list_relationship_types(&self, ctx: &TenantContext) -> KgResult<Vec<RelationshipType>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM kg_relationship_type WHERE tenant_id = ?1 ORDER BY id_name",
            RELATIONSHIP_TYPE_COLUMNS
        ))?;
        let rows = stmt.query_map(params![ctx.tenant_id()], |row| {
            Ok(row_to_relationship_type(row))
        })?;
        collect_rows(rows)
    }

    /// Upsert a canonical relationship directly, accumulating occurrences.
    pub fn upsert_relationship(
        &self,
        ctx: &TenantContext,
        id: &RelationshipId,
        source_document: Option<&str>,
        occurrences: i64,
    ) -> KgResult<CanonicalRelationship> {
        let conn = self.conn()?;
        upsert_relationship_on(&conn, ctx, id, source_document, occurrences)
    }

    /// Move a staged relationship into the canonical table under its
    /// normalized id. Returns `None` if it was already transferred.
    pub fn transfer_relationship(
        &self,
        ctx: &TenantContext,
        staged: &StagedRelationship,
        normalized: &RelationshipId,
    ) -> KgResult<Option<CanonicalRelationship>> {
        let source_document = staged.source_document.as_deref();

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let claimed = tx.execute(
            r#"UPDATE kg_relationship_staging SET transferred = 1, updated_at = ?4
               WHERE tenant_id = ?1 AND id_name = ?2 AND source_document = ?3 AND transferred = 0"#,
            params![
                ctx.tenant_id(),
                staged.id_name,
                source_document.unwrap_or(""),
                now()
            ],
        )?;
        if claimed == 0 {
            return Ok(None);
        }
        let relationship =
            upsert_relationship_on(&tx, ctx, normalized, source_document, staged.occurrences)?;
        tx.commit()?;

        debug!(staged = %staged.id_name, canonical = %relationship.id_name, "Transferred relationship");
        Ok(Some(relationship))
    }

    /// All canonical relationships, ordered by id.
    pub fn list_relationships(&self, ctx: &TenantContext) -> KgResult<Vec<CanonicalRelationship>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM kg_relationship WHERE tenant_id = ?1 ORDER BY id_name, source_document",
            CANONICAL_RELATIONSHIP_COLUMNS
        ))?;
        let rows = stmt.query_map(params![ctx.tenant_id()], |row| {
            Ok(row_to_canonical_relationship(row))
        })?;
        collect_rows(rows)
    }

    /// Documents owning any of the given canonical entities.
    pub fn documents_of_entities(
        &self,
        ctx: &TenantContext,
        entity_ids: &[String],
    ) -> KgResult<BTreeSet<String>> {
        if entity_ids.is_empty() {
            return Ok(BTreeSet::new());
        }
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT DISTINCT document_id FROM kg_entity
               WHERE tenant_id = ?1 AND document_id != ''
                 AND id_name IN (SELECT value FROM json_each(?2))"#,
        )?;
        let rows = stmt.query_map(
            params![ctx.tenant_id(), serde_json::to_string(entity_ids)?],
            |row| row.get::<_, String>(0),
        )?;
        let mut documents = BTreeSet::new();
        for row in rows {
            documents.insert(row?);
        }
        Ok(documents)
    }

    /// A document's current graph membership: its canonical entities and
    /// every relationship touching them or sourced from it.
    pub fn document_graph(&self, ctx: &TenantContext, document_id: &str) -> KgResult<IndexUpdateRequest> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM kg_entity WHERE tenant_id = ?1 AND document_id = ?2 ORDER BY rowid",
            CANONICAL_ENTITY_COLUMNS
        ))?;
        let rows = stmt.query_map(params![ctx.tenant_id(), document_id], |row| {
            Ok(row_to_canonical_entity(row))
        })?;
        let entities = collect_rows(rows)?;

        let mut stmt = conn.prepare(&format!(
            r#"SELECT {} FROM kg_relationship
               WHERE tenant_id = ?1 AND (
                   source_document = ?2
                   OR source_node IN (SELECT id_name FROM kg_entity WHERE tenant_id = ?1 AND document_id = ?2)
                   OR target_node IN (SELECT id_name FROM kg_entity WHERE tenant_id = ?1 AND document_id = ?2)
               )
               ORDER BY id_name, source_document"#,
            CANONICAL_RELATIONSHIP_COLUMNS
        ))?;
        let rows = stmt.query_map(params![ctx.tenant_id(), document_id], |row| {
            Ok(row_to_canonical_relationship(row))
        })?;
        let relationships = collect_rows(rows)?;

        Ok(IndexUpdateRequest {
            document_id: document_id.to_string(),
            entities,
            relationships,
        })
    }

    /// Per entity type: number of canonical entities and latest update.
    pub fn entity_stats(&self, ctx: &TenantContext) -> KgResult<Vec<EntityTypeStats>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT entity_type, COUNT(*), MAX(updated_at) FROM kg_entity
               WHERE tenant_id = ?1 GROUP BY entity_type ORDER BY entity_type"#,
        )?;
        let rows = stmt.query_map(params![ctx.tenant_id()], |row| {
            let last_updated: Option<String> = row.get(2)?;
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?, last_updated))
        })?;

        let mut stats = Vec::new();
        for row in rows {
            let (entity_type, count, last_updated) = row?;
            stats.push(EntityTypeStats {
                entity_type,
                count,
                last_updated: last_updated.map(|s| parse_timestamp(&s)).transpose()?,
            });
        }
        Ok(stats)
    }
}
