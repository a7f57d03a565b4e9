//! Document registration and kg-stage bookkeeping.

use rusqlite::{params, Connection, OptionalExtension};

use kgraph_core::error::KgResult;
use kgraph_core::types::{Document, KgStage, TenantContext};

use crate::rows::{now, row_to_document, DOCUMENT_COLUMNS};
use crate::SqliteKgStore;

/// Advance a document to `extracted` unless it is already further along.
pub(crate) fn mark_extracted(conn: &Connection, ctx: &TenantContext, document_id: &str) -> KgResult<()> {
    conn.execute(
        r#"INSERT INTO kg_document (tenant_id, id, kg_stage, kg_processing_time)
           VALUES (?1, ?2, 'extracted', ?3)
           ON CONFLICT(tenant_id, id) DO UPDATE SET
               kg_stage = 'extracted',
               kg_processing_time = excluded.kg_processing_time
           WHERE kg_document.kg_stage IN ('not_started', 'failed')"#,
        params![ctx.tenant_id(), document_id, now()],
    )?;
    Ok(())
}

/// Mark a document's graph contribution as normalized.
pub(crate) fn mark_normalized(conn: &Connection, ctx: &TenantContext, document_id: &str) -> KgResult<()> {
    conn.execute(
        r#"INSERT INTO kg_document (tenant_id, id, kg_stage, kg_processing_time)
           VALUES (?1, ?2, 'normalized', ?3)
           ON CONFLICT(tenant_id, id) DO UPDATE SET
               kg_stage = 'normalized',
               kg_processing_time = excluded.kg_processing_time"#,
        params![ctx.tenant_id(), document_id, now()],
    )?;
    Ok(())
}

/// Move every document in `from` to `to`.
pub(crate) fn move_stage(conn: &Connection, ctx: &TenantContext, from: KgStage, to: KgStage) -> KgResult<usize> {
    Ok(conn.execute(
        "UPDATE kg_document SET kg_stage = ?3 WHERE tenant_id = ?1 AND kg_stage = ?2",
        params![ctx.tenant_id(), from.as_str(), to.as_str()],
    )?)
}

impl SqliteKgStore {
    /// Register a document, or update its semantic id if it already exists.
    pub fn register_document(
        &self,
        ctx: &TenantContext,
        document_id: &str,
        semantic_id: Option<&str>,
    ) -> KgResult<Document> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            r#"INSERT INTO kg_document (tenant_id, id, semantic_id)
               VALUES (?1, ?2, ?3)
               ON CONFLICT(tenant_id, id) DO UPDATE SET
                   semantic_id = COALESCE(excluded.semantic_id, kg_document.semantic_id)
               RETURNING {}"#,
            DOCUMENT_COLUMNS
        ))?;
        stmt.query_row(params![ctx.tenant_id(), document_id, semantic_id], |row| {
            Ok(row_to_document(row))
        })?
    }

    /// Get a document by id.
    pub fn get_document(&self, ctx: &TenantContext, document_id: &str) -> KgResult<Option<Document>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM kg_document WHERE tenant_id = ?1 AND id = ?2",
            DOCUMENT_COLUMNS
        ))?;
        stmt.query_row(params![ctx.tenant_id(), document_id], |row| {
            Ok(row_to_document(row))
        })
        .optional()?
        .transpose()
    }

    /// Set a document's stage unconditionally.
    pub fn set_document_stage(
        &self,
        ctx: &TenantContext,
        document_id: &str,
        stage: KgStage,
    ) -> KgResult<()> {
        let conn = self.conn()?;
        conn.execute(
            r#"INSERT INTO kg_document (tenant_id, id, kg_stage, kg_processing_time)
               VALUES (?1, ?2, ?3, ?4)
               ON CONFLICT(tenant_id, id) DO UPDATE SET
                   kg_stage = excluded.kg_stage,
                   kg_processing_time = excluded.kg_processing_time"#,
            params![ctx.tenant_id(), document_id, stage.as_str(), now()],
        )?;
        Ok(())
    }

    /// The display name of a document, used to match grounded entities.
    pub fn document_semantic_id(
        &self,
        ctx: &TenantContext,
        document_id: &str,
    ) -> KgResult<Option<String>> {
        let conn = self.conn()?;
        let semantic_id: Option<Option<String>> = conn
            .query_row(
                "SELECT semantic_id FROM kg_document WHERE tenant_id = ?1 AND id = ?2",
                params![ctx.tenant_id(), document_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(semantic_id.flatten())
    }
}
