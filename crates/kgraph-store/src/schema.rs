//! SQLite schema for the knowledge-graph store.
//!
//! Three groups of tables, all scoped by `tenant_id`:
//! - staging: `kg_entity_staging`, `kg_relationship_staging`,
//!   `kg_relationship_type_staging` (raw extraction output, keyed for
//!   idempotent accumulation and paginated by `seq`)
//! - canonical: `kg_entity`, `kg_entity_trigram`, `kg_relationship`,
//!   `kg_relationship_type`
//! - bookkeeping: `kg_document`
//!
//! Columns that take part in a conflict key and may be absent
//! (`kg_entity.document_id`, `*.source_document`) are stored as `''` rather
//! than `NULL`, since SQLite treats every `NULL` as distinct in a UNIQUE
//! constraint.

use rusqlite::Connection;

use kgraph_core::error::KgResult;

/// Documents known to the graph and their processing stage.
pub const CREATE_DOCUMENT_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS kg_document (
    tenant_id TEXT NOT NULL,
    id TEXT NOT NULL,
    semantic_id TEXT,
    kg_stage TEXT NOT NULL DEFAULT 'not_started',
    kg_processing_time TEXT,
    PRIMARY KEY (tenant_id, id)
)
"#;

/// Raw extracted entities.
pub const CREATE_ENTITY_STAGING_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS kg_entity_staging (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id TEXT NOT NULL,
    id_name TEXT NOT NULL,
    name TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    entity_key TEXT,
    parent_key TEXT,
    document_id TEXT,
    occurrences INTEGER NOT NULL DEFAULT 1,
    attributes TEXT NOT NULL DEFAULT '{}',
    alternative_names TEXT NOT NULL DEFAULT '[]',
    transferred_id_name TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(tenant_id, id_name)
)
"#;

/// Index for selecting untransferred staged entities.
pub const CREATE_ENTITY_STAGING_TRANSFERRED_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_entity_staging_transferred
    ON kg_entity_staging(tenant_id, transferred_id_name)
"#;

/// Index for deleting a document's staged entities.
pub const CREATE_ENTITY_STAGING_DOCUMENT_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_entity_staging_document
    ON kg_entity_staging(tenant_id, document_id)
"#;

/// Raw extracted relationships.
pub const CREATE_RELATIONSHIP_STAGING_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS kg_relationship_staging (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id TEXT NOT NULL,
    id_name TEXT NOT NULL,
    source_node TEXT NOT NULL,
    target_node TEXT NOT NULL,
    source_node_type TEXT NOT NULL,
    target_node_type TEXT NOT NULL,
    relationship TEXT NOT NULL,
    relationship_type_id_name TEXT NOT NULL,
    source_document TEXT NOT NULL DEFAULT '',
    occurrences INTEGER NOT NULL DEFAULT 1,
    transferred INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(tenant_id, id_name, source_document)
)
"#;

/// Index for endpoint lookups during the staging purge.
pub const CREATE_RELATIONSHIP_STAGING_ENDPOINT_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_relationship_staging_endpoints
    ON kg_relationship_staging(tenant_id, transferred, source_node, target_node)
"#;

/// Raw extracted relationship types.
pub const CREATE_RELATIONSHIP_TYPE_STAGING_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS kg_relationship_type_staging (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id TEXT NOT NULL,
    id_name TEXT NOT NULL,
    name TEXT NOT NULL,
    source_entity_type TEXT NOT NULL,
    target_entity_type TEXT NOT NULL,
    definition INTEGER NOT NULL DEFAULT 0,
    occurrences INTEGER NOT NULL DEFAULT 1,
    active INTEGER NOT NULL DEFAULT 1,
    transferred INTEGER NOT NULL DEFAULT 0,
    UNIQUE(tenant_id, id_name)
)
"#;

/// Canonical entities.
pub const CREATE_ENTITY_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS kg_entity (
    tenant_id TEXT NOT NULL,
    id_name TEXT NOT NULL,
    name TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    document_id TEXT NOT NULL DEFAULT '',
    entity_key TEXT,
    parent_key TEXT,
    alternative_names TEXT NOT NULL DEFAULT '[]',
    occurrences INTEGER NOT NULL DEFAULT 1,
    attributes TEXT NOT NULL DEFAULT '{}',
    trigram_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (tenant_id, id_name),
    UNIQUE(tenant_id, name, entity_type, document_id)
)
"#;

/// Index for parent lookups by business key.
pub const CREATE_ENTITY_KEY_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_entity_key ON kg_entity(tenant_id, entity_key)
"#;

/// Index for document membership.
pub const CREATE_ENTITY_DOCUMENT_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_entity_document ON kg_entity(tenant_id, document_id)
"#;

/// Index for type filtering.
pub const CREATE_ENTITY_TYPE_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_entity_type ON kg_entity(tenant_id, entity_type)
"#;

/// Trigrams of each canonical entity's cleaned name.
pub const CREATE_ENTITY_TRIGRAM_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS kg_entity_trigram (
    tenant_id TEXT NOT NULL,
    entity_id_name TEXT NOT NULL,
    trigram TEXT NOT NULL,
    PRIMARY KEY (tenant_id, entity_id_name, trigram),
    FOREIGN KEY (tenant_id, entity_id_name)
        REFERENCES kg_entity(tenant_id, id_name) ON DELETE CASCADE
)
"#;

/// Index backing candidate retrieval.
pub const CREATE_ENTITY_TRIGRAM_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_entity_trigram ON kg_entity_trigram(tenant_id, trigram)
"#;

/// Canonical relationships.
pub const CREATE_RELATIONSHIP_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS kg_relationship (
    tenant_id TEXT NOT NULL,
    id_name TEXT NOT NULL,
    source_node TEXT NOT NULL,
    target_node TEXT NOT NULL,
    source_node_type TEXT NOT NULL,
    target_node_type TEXT NOT NULL,
    relationship TEXT NOT NULL,
    relationship_type_id_name TEXT NOT NULL,
    source_document TEXT NOT NULL DEFAULT '',
    occurrences INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (tenant_id, id_name, source_document)
)
"#;

/// Index for traversal from source.
pub const CREATE_RELATIONSHIP_SOURCE_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_relationship_source ON kg_relationship(tenant_id, source_node)
"#;

/// Index for traversal to target.
pub const CREATE_RELATIONSHIP_TARGET_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_relationship_target ON kg_relationship(tenant_id, target_node)
"#;

/// The relationship-type catalog.
pub const CREATE_RELATIONSHIP_TYPE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS kg_relationship_type (
    tenant_id TEXT NOT NULL,
    id_name TEXT NOT NULL,
    name TEXT NOT NULL,
    source_entity_type TEXT NOT NULL,
    target_entity_type TEXT NOT NULL,
    definition INTEGER NOT NULL DEFAULT 0,
    occurrences INTEGER NOT NULL DEFAULT 1,
    active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (tenant_id, id_name)
)
"#;

/// Index for catalog lookups by entity-type pair.
pub const CREATE_RELATIONSHIP_TYPE_PAIR_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_relationship_type_pair
    ON kg_relationship_type(tenant_id, source_entity_type, target_entity_type)
"#;

/// Initialize the schema in the given database connection.
///
/// Safe to call multiple times (idempotent).
pub fn init_schema(conn: &Connection) -> KgResult<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(CREATE_DOCUMENT_TABLE, [])?;

    // Staging
    conn.execute(CREATE_ENTITY_STAGING_TABLE, [])?;
    conn.execute(CREATE_RELATIONSHIP_STAGING_TABLE, [])?;
    conn.execute(CREATE_RELATIONSHIP_TYPE_STAGING_TABLE, [])?;
    conn.execute(CREATE_ENTITY_STAGING_TRANSFERRED_INDEX, [])?;
    conn.execute(CREATE_ENTITY_STAGING_DOCUMENT_INDEX, [])?;
    conn.execute(CREATE_RELATIONSHIP_STAGING_ENDPOINT_INDEX, [])?;

    // Canonical
    conn.execute(CREATE_ENTITY_TABLE, [])?;
    conn.execute(CREATE_ENTITY_TRIGRAM_TABLE, [])?;
    conn.execute(CREATE_RELATIONSHIP_TABLE, [])?;
    conn.execute(CREATE_RELATIONSHIP_TYPE_TABLE, [])?;
    conn.execute(CREATE_ENTITY_KEY_INDEX, [])?;
    conn.execute(CREATE_ENTITY_DOCUMENT_INDEX, [])?;
    conn.execute(CREATE_ENTITY_TYPE_INDEX, [])?;
    conn.execute(CREATE_ENTITY_TRIGRAM_INDEX, [])?;
    conn.execute(CREATE_RELATIONSHIP_SOURCE_INDEX, [])?;
    conn.execute(CREATE_RELATIONSHIP_TARGET_INDEX, [])?;
    conn.execute(CREATE_RELATIONSHIP_TYPE_PAIR_INDEX, [])?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE 'kg_%' ORDER BY name")
            .unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
    }

    #[test]
    fn test_init_schema_creates_tables() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        assert_eq!(
            table_names(&conn),
            vec![
                "kg_document",
                "kg_entity",
                "kg_entity_staging",
                "kg_entity_trigram",
                "kg_relationship",
                "kg_relationship_staging",
                "kg_relationship_type",
                "kg_relationship_type_staging",
            ]
        );
    }

    #[test]
    fn test_init_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
    }

    #[test]
    fn test_canonical_entity_uniqueness_treats_missing_document_as_one_value() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let insert = "INSERT INTO kg_entity (tenant_id, id_name, name, entity_type, created_at, updated_at)
                      VALUES ('t', ?1, 'acme', 'ACCOUNT', 'now', 'now')";
        conn.execute(insert, ["ACCOUNT::a"]).unwrap();
        assert!(conn.execute(insert, ["ACCOUNT::b"]).is_err());
    }
}
