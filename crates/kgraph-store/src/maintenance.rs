//! Staging purge, per-document deletion and the reset operations.

use rusqlite::{params, Transaction};
use tracing::info;

use kgraph_core::error::KgResult;
use kgraph_core::types::{KgStage, TenantContext};

use crate::documents::move_stage;
use crate::SqliteKgStore;

fn delete_canonical(tx: &Transaction<'_>, ctx: &TenantContext) -> KgResult<()> {
    tx.execute("DELETE FROM kg_relationship WHERE tenant_id = ?1", params![ctx.tenant_id()])?;
    tx.execute("DELETE FROM kg_relationship_type WHERE tenant_id = ?1", params![ctx.tenant_id()])?;
    tx.execute("DELETE FROM kg_entity WHERE tenant_id = ?1", params![ctx.tenant_id()])?;
    Ok(())
}

fn delete_staging(tx: &Transaction<'_>, ctx: &TenantContext) -> KgResult<()> {
    tx.execute("DELETE FROM kg_relationship_staging WHERE tenant_id = ?1", params![ctx.tenant_id()])?;
    tx.execute("DELETE FROM kg_entity_staging WHERE tenant_id = ?1", params![ctx.tenant_id()])?;
    tx.execute(
        "DELETE FROM kg_relationship_type_staging WHERE tenant_id = ?1",
        params![ctx.tenant_id()],
    )?;
    Ok(())
}

impl SqliteKgStore {
    /// Delete staged relationships that have been transferred.
    pub fn purge_transferred_relationships(&self, ctx: &TenantContext) -> KgResult<usize> {
        let conn = self.conn()?;
        Ok(conn.execute(
            "DELETE FROM kg_relationship_staging WHERE tenant_id = ?1 AND transferred = 1",
            params![ctx.tenant_id()],
        )?)
    }

    /// Delete staged relationship types that have been transferred.
    pub fn purge_transferred_relationship_types(&self, ctx: &TenantContext) -> KgResult<usize> {
        let conn = self.conn()?;
        Ok(conn.execute(
            "DELETE FROM kg_relationship_type_staging WHERE tenant_id = ?1 AND transferred = 1",
            params![ctx.tenant_id()],
        )?)
    }

    /// Delete transferred staged entities.
    ///
    /// A transferred entity is kept while an untransferred staged
    /// relationship still names it as an endpoint, since that relationship
    /// resolves its canonical endpoint through the forwarding pointer.
    pub fn purge_transferred_entities(&self, ctx: &TenantContext) -> KgResult<usize> {
        let conn = self.conn()?;
        Ok(conn.execute(
            r#"DELETE FROM kg_entity_staging
               WHERE tenant_id = ?1 AND transferred_id_name IS NOT NULL
                 AND NOT EXISTS (
                     SELECT 1 FROM kg_relationship_staging r
                     WHERE r.tenant_id = ?1 AND r.transferred = 0
                       AND (r.source_node = kg_entity_staging.id_name
                            OR r.target_node = kg_entity_staging.id_name)
                 )"#,
            params![ctx.tenant_id()],
        )?)
    }

    /// Remove everything a document contributed: its staged and canonical
    /// entities and the staged and canonical relationships it sourced.
    /// Canonical relationships with an endpoint among the removed entities go
    /// too, whatever document sourced them.
    ///
    /// Returns the number of rows removed.
    pub fn delete_document_graph(&self, ctx: &TenantContext, document_id: &str) -> KgResult<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut removed = 0;

        removed += tx.execute(
            "DELETE FROM kg_relationship WHERE tenant_id = ?1 AND source_document = ?2",
            params![ctx.tenant_id(), document_id],
        )?;
        removed += tx.execute(
            "DELETE FROM kg_relationship_staging WHERE tenant_id = ?1 AND source_document = ?2",
            params![ctx.tenant_id(), document_id],
        )?;
        removed += tx.execute(
            r#"DELETE FROM kg_relationship
               WHERE tenant_id = ?1 AND (
                   source_node IN (SELECT id_name FROM kg_entity WHERE tenant_id = ?1 AND document_id = ?2)
                   OR target_node IN (SELECT id_name FROM kg_entity WHERE tenant_id = ?1 AND document_id = ?2)
               )"#,
            params![ctx.tenant_id(), document_id],
        )?;
        removed += tx.execute(
            "DELETE FROM kg_entity WHERE tenant_id = ?1 AND document_id = ?2",
            params![ctx.tenant_id(), document_id],
        )?;
        removed += tx.execute(
            "DELETE FROM kg_entity_staging WHERE tenant_id = ?1 AND document_id = ?2",
            params![ctx.tenant_id(), document_id],
        )?;
        tx.commit()?;

        info!(document_id, removed, "Deleted document graph");
        Ok(removed)
    }

    /// Drop the canonical graph; normalized documents go back to extracted.
    pub fn reset_normalizations(&self, ctx: &TenantContext) -> KgResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        delete_canonical(&tx, ctx)?;
        let moved = move_stage(&tx, ctx, KgStage::Normalized, KgStage::Extracted)?;
        tx.commit()?;

        info!(tenant_id = ctx.tenant_id(), documents = moved, "Reset normalizations");
        Ok(())
    }

    /// Drop staging; extracted documents go back to not started.
    pub fn reset_extractions(&self, ctx: &TenantContext) -> KgResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        delete_staging(&tx, ctx)?;
        let moved = move_stage(&tx, ctx, KgStage::Extracted, KgStage::NotStarted)?;
        tx.commit()?;

        info!(tenant_id = ctx.tenant_id(), documents = moved, "Reset extractions");
        Ok(())
    }

    /// Drop staging and the canonical graph; every document goes back to
    /// not started.
    pub fn reset_all(&self, ctx: &TenantContext) -> KgResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        delete_canonical(&tx, ctx)?;
        delete_staging(&tx, ctx)?;
        tx.execute(
            "UPDATE kg_document SET kg_stage = ?2 WHERE tenant_id = ?1",
            params![ctx.tenant_id(), KgStage::NotStarted.as_str()],
        )?;
        tx.commit()?;

        info!(tenant_id = ctx.tenant_id(), "Reset knowledge graph");
        Ok(())
    }

    /// Drop every staged and canonical entity of one type, and every
    /// relationship and relationship type touching it.
    pub fn reset_entity_type(&self, ctx: &TenantContext, entity_type: &str) -> KgResult<()> {
        let entity_type = entity_type.trim().to_uppercase();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let args = params![ctx.tenant_id(), entity_type];

        tx.execute(
            "DELETE FROM kg_relationship WHERE tenant_id = ?1 AND (source_node_type = ?2 OR target_node_type = ?2)",
            args,
        )?;
        tx.execute(
            "DELETE FROM kg_relationship_type WHERE tenant_id = ?1 AND (source_entity_type = ?2 OR target_entity_type = ?2)",
            args,
        )?;
        tx.execute(
            "DELETE FROM kg_entity WHERE tenant_id = ?1 AND entity_type = ?2",
            args,
        )?;
        tx.execute(
            "DELETE FROM kg_relationship_staging WHERE tenant_id = ?1 AND (source_node_type = ?2 OR target_node_type = ?2)",
            args,
        )?;
        tx.execute(
            "DELETE FROM kg_entity_staging WHERE tenant_id = ?1 AND entity_type = ?2",
            args,
        )?;
        tx.execute(
            "DELETE FROM kg_relationship_type_staging WHERE tenant_id = ?1 AND (source_entity_type = ?2 OR target_entity_type = ?2)",
            args,
        )?;
        tx.commit()?;

        info!(tenant_id = ctx.tenant_id(), entity_type = %entity_type, "Reset entity type");
        Ok(())
    }
}
