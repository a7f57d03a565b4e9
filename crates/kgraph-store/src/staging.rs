//! Staging write path and the batch selections the clustering stages page through.

use std::collections::HashMap;

use rusqlite::{params, OptionalExtension};
use tracing::debug;

use kgraph_core::error::{KgError, KgResult};
use kgraph_core::types::{
    make_entity_id, make_relationship_type_id, title_case, NewStagedEntity, ParentLink,
    RelationshipId, StagedEntity, StagedRelationship, StagedRelationshipType, TenantContext,
    KEY_ATTRIBUTE, PARENT_ATTRIBUTE,
};

use crate::documents::mark_extracted;
use crate::rows::{
    collect_rows, now, row_to_staged_entity, row_to_staged_relationship,
    row_to_staged_relationship_type, RELATIONSHIP_TYPE_COLUMNS, STAGED_ENTITY_COLUMNS,
    STAGED_RELATIONSHIP_COLUMNS,
};
use crate::SqliteKgStore;

/// Number of rows left in each staging table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StagingCounts {
    pub entities: usize,
    pub relationships: usize,
    pub relationship_types: usize,
}

impl StagingCounts {
    pub fn is_empty(&self) -> bool {
        self.entities == 0 && self.relationships == 0 && self.relationship_types == 0
    }
}

impl SqliteKgStore {
    /// Insert a staged entity or accumulate its occurrence count.
    ///
    /// The type is upper-cased, the name title-cased, and the `key` / `parent`
    /// attributes are lifted into `entity_key` / `parent_key`. When the entity
    /// is grounded, its document is marked extracted unless already further
    /// along.
    ///
    /// Re-staging a row that was already transferred (kept by the purge for a
    /// pending relationship) starts it over: occurrences and attributes hold
    /// only the new extraction and the forwarding pointer is cleared, so the
    /// next run carries the new contribution into the canonical graph.
    pub fn upsert_staged_entity(
        &self,
        ctx: &TenantContext,
        entity: &NewStagedEntity,
    ) -> KgResult<StagedEntity> {
        if entity.name.trim().is_empty() || entity.entity_type.trim().is_empty() {
            return Err(KgError::validation("entity name and type must be non-empty"));
        }
        if entity.occurrences < 1 {
            return Err(KgError::validation("occurrences must be positive"));
        }

        let entity_type = entity.entity_type.trim().to_uppercase();
        let name = title_case(entity.name.trim());
        let id_name = make_entity_id(&entity_type, &name);

        let mut attributes = entity.attributes.clone();
        let entity_key = attributes
            .remove(KEY_ATTRIBUTE)
            .and_then(|v| v.as_text().map(str::to_string));
        let parent_key = attributes
            .remove(PARENT_ATTRIBUTE)
            .and_then(|v| v.as_text().map(str::to_string));
        let attributes_json = attributes.to_json()?;
        let timestamp = now();

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let staged = {
            let mut stmt = tx.prepare(&format!(
                r#"INSERT INTO kg_entity_staging
                   (tenant_id, id_name, name, entity_type, entity_key, parent_key, document_id,
                    occurrences, attributes, alternative_names, created_at, updated_at)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, '[]', ?10, ?10)
                   ON CONFLICT(tenant_id, id_name) DO UPDATE SET
                       occurrences = CASE WHEN transferred_id_name IS NULL
                           THEN occurrences + excluded.occurrences
                           ELSE excluded.occurrences END,
                       attributes = CASE WHEN transferred_id_name IS NULL
                           THEN json_patch(attributes, excluded.attributes)
                           ELSE excluded.attributes END,
                       entity_key = COALESCE(entity_key, excluded.entity_key),
                       transferred_id_name = NULL,
                       updated_at = excluded.updated_at
                   RETURNING {}"#,
                STAGED_ENTITY_COLUMNS
            ))?;
            stmt.query_row(
                params![
                    ctx.tenant_id(),
                    id_name,
                    name,
                    entity_type,
                    entity_key,
                    parent_key,
                    entity.document_id,
                    entity.occurrences,
                    attributes_json,
                    timestamp,
                ],
                |row| Ok(row_to_staged_entity(row)),
            )??
        };

        if let Some(document_id) = &entity.document_id {
            mark_extracted(&tx, ctx, document_id)?;
        }
        tx.commit()?;

        debug!(id_name = %staged.id_name, occurrences = staged.occurrences, "Staged entity");
        Ok(staged)
    }

    /// Insert a staged relationship or accumulate its occurrence count.
    ///
    /// `raw_id` is `source__relationship__target` with `TYPE::name` endpoints.
    pub fn upsert_staged_relationship(
        &self,
        ctx: &TenantContext,
        raw_id: &str,
        source_document: Option<&str>,
        occurrences: i64,
    ) -> KgResult<StagedRelationship> {
        if occurrences < 1 {
            return Err(KgError::validation("occurrences must be positive"));
        }
        let id = RelationshipId::parse(raw_id)?;
        let timestamp = now();

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let staged = {
            let mut stmt = tx.prepare(&format!(
                r#"INSERT INTO kg_relationship_staging
                   (tenant_id, id_name, source_node, target_node, source_node_type,
                    target_node_type, relationship, relationship_type_id_name, source_document,
                    occurrences, created_at, updated_at)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?11)
                   ON CONFLICT(tenant_id, id_name, source_document) DO UPDATE SET
                       occurrences = occurrences + excluded.occurrences,
                       updated_at = excluded.updated_at
                   RETURNING {}"#,
                STAGED_RELATIONSHIP_COLUMNS
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
                |row| Ok(row_to_staged_relationship(row)),
            )??
        };

        if let Some(document_id) = source_document {
            mark_extracted(&tx, ctx, document_id)?;
        }
        tx.commit()?;

        Ok(staged)
    }

    /// Insert a staged relationship type or accumulate its occurrence count.
    pub fn upsert_staged_relationship_type(
        &self,
        ctx: &TenantContext,
        source_type: &str,
        relationship: &str,
        target_type: &str,
        definition: bool,
        occurrences: i64,
    ) -> KgResult<StagedRelationshipType> {
        if occurrences < 1 {
            return Err(KgError::validation("occurrences must be positive"));
        }
        let id_name = make_relationship_type_id(source_type, relationship, target_type);
        let name = kgraph_core::types::normalize_relationship_name(relationship);

        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"INSERT INTO kg_relationship_type_staging
               (tenant_id, id_name, name, source_entity_type, target_entity_type, definition,
                occurrences, active)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1)
               ON CONFLICT(tenant_id, id_name) DO UPDATE SET
                   occurrences = occurrences + excluded.occurrences
               RETURNING seq, {}, transferred"#,
            RELATIONSHIP_TYPE_COLUMNS
        ))?;
        stmt.query_row(
            params![
                ctx.tenant_id(),
                id_name,
                name,
                source_type.trim().to_uppercase(),
                target_type.trim().to_uppercase(),
                definition as i64,
                occurrences,
            ],
            |row| Ok(row_to_staged_relationship_type(row)),
        )?
    }

    /// Get a staged entity by id.
    pub fn get_staged_entity(
        &self,
        ctx: &TenantContext,
        id_name: &str,
    ) -> KgResult<Option<StagedEntity>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM kg_entity_staging WHERE tenant_id = ?1 AND id_name = ?2",
            STAGED_ENTITY_COLUMNS
        ))?;
        stmt.query_row(params![ctx.tenant_id(), id_name], |row| {
            Ok(row_to_staged_entity(row))
        })
        .optional()?
        .transpose()
    }

    /// Next page of staged entities not yet transferred, in staging order.
    pub fn untransferred_staged_entities(
        &self,
        ctx: &TenantContext,
        after_seq: i64,
        limit: usize,
    ) -> KgResult<Vec<StagedEntity>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"SELECT {} FROM kg_entity_staging
               WHERE tenant_id = ?1 AND transferred_id_name IS NULL AND seq > ?2
               ORDER BY seq LIMIT ?3"#,
            STAGED_ENTITY_COLUMNS
        ))?;
        let rows = stmt.query_map(params![ctx.tenant_id(), after_seq, limit as i64], |row| {
            Ok(row_to_staged_entity(row))
        })?;
        collect_rows(rows)
    }

    /// Next page of staged entities that carry any parent link, including
    /// exhausted ones, in staging order.
    pub fn staged_entities_with_parent(
        &self,
        ctx: &TenantContext,
        after_seq: i64,
        limit: usize,
    ) -> KgResult<Vec<StagedEntity>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"SELECT {} FROM kg_entity_staging
               WHERE tenant_id = ?1 AND parent_key IS NOT NULL AND seq > ?2
               ORDER BY seq LIMIT ?3"#,
            STAGED_ENTITY_COLUMNS
        ))?;
        let rows = stmt.query_map(params![ctx.tenant_id(), after_seq, limit as i64], |row| {
            Ok(row_to_staged_entity(row))
        })?;
        collect_rows(rows)
    }

    /// Point a staged entity at its next ancestor.
    pub fn set_parent_link(
        &self,
        ctx: &TenantContext,
        id_name: &str,
        link: &ParentLink,
    ) -> KgResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE kg_entity_staging SET parent_key = ?3, updated_at = ?4
             WHERE tenant_id = ?1 AND id_name = ?2",
            params![ctx.tenant_id(), id_name, link.as_column(), now()],
        )?;
        Ok(())
    }

    /// Next page of staged relationships not yet transferred.
    pub fn untransferred_staged_relationships(
        &self,
        ctx: &TenantContext,
        after_seq: i64,
        limit: usize,
    ) -> KgResult<Vec<StagedRelationship>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"SELECT {} FROM kg_relationship_staging
               WHERE tenant_id = ?1 AND transferred = 0 AND seq > ?2
               ORDER BY seq LIMIT ?3"#,
            STAGED_RELATIONSHIP_COLUMNS
        ))?;
        let rows = stmt.query_map(params![ctx.tenant_id(), after_seq, limit as i64], |row| {
            Ok(row_to_staged_relationship(row))
        })?;
        collect_rows(rows)
    }

    /// Next page of staged relationship types not yet transferred.
    pub fn untransferred_staged_relationship_types(
        &self,
        ctx: &TenantContext,
        after_seq: i64,
        limit: usize,
    ) -> KgResult<Vec<StagedRelationshipType>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"SELECT seq, {}, transferred FROM kg_relationship_type_staging
               WHERE tenant_id = ?1 AND transferred = 0 AND seq > ?2
               ORDER BY seq LIMIT ?3"#,
            RELATIONSHIP_TYPE_COLUMNS
        ))?;
        let rows = stmt.query_map(params![ctx.tenant_id(), after_seq, limit as i64], |row| {
            Ok(row_to_staged_relationship_type(row))
        })?;
        collect_rows(rows)
    }

    /// Forwarding pointers for the given staged entity ids.
    ///
    /// Only entities that have been transferred appear in the result.
    pub fn resolve_transferred_ids(
        &self,
        ctx: &TenantContext,
        staged_ids: &[String],
    ) -> KgResult<HashMap<String, String>> {
        if staged_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let ids_json = serde_json::to_string(staged_ids)?;

        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT id_name, transferred_id_name FROM kg_entity_staging
               WHERE tenant_id = ?1
                 AND transferred_id_name IS NOT NULL
                 AND id_name IN (SELECT value FROM json_each(?2))"#,
        )?;
        let rows = stmt.query_map(params![ctx.tenant_id(), ids_json], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut resolved = HashMap::new();
        for row in rows {
            let (staged, canonical) = row?;
            resolved.insert(staged, canonical);
        }
        Ok(resolved)
    }

    /// Rows left in each staging table.
    pub fn staging_counts(&self, ctx: &TenantContext) -> KgResult<StagingCounts> {
        let conn = self.conn()?;
        let count = |table: &str| -> KgResult<usize> {
            let n: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM {} WHERE tenant_id = ?1", table),
                params![ctx.tenant_id()],
                |row| row.get(0),
            )?;
            Ok(n as usize)
        };
        Ok(StagingCounts {
            entities: count("kg_entity_staging")?,
            relationships: count("kg_relationship_staging")?,
            relationship_types: count("kg_relationship_type_staging")?,
        })
    }
}
