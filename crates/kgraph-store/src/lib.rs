//! kgraph-store - SQLite persistence for the knowledge graph.
//!
//! [`SqliteKgStore`] owns the staging tables written by extraction, the
//! canonical entity/relationship tables written by clustering, the
//! relationship-type catalog and per-document stage bookkeeping.
//!
//! Every mutation that can race with another writer is a single
//! `INSERT ... ON CONFLICT DO UPDATE` statement, so accumulation of
//! occurrence counts and attributes stays correct without application
//! locking. Multi-statement writes (transfer, merge) run in a transaction.

mod canonical;
mod documents;
mod maintenance;
mod rows;
pub mod schema;
mod staging;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;

use kgraph_core::error::{KgError, KgResult};

pub use canonical::{Candidate, CandidateQuery};
pub use staging::StagingCounts;

/// SQLite-backed knowledge-graph store.
///
/// Thread-safe via Mutex on the connection.
pub struct SqliteKgStore {
    conn: Mutex<Connection>,
}

impl SqliteKgStore {
    /// Create a new store with the given database path.
    pub fn new(db_path: impl AsRef<Path>) -> KgResult<Self> {
        let conn = Connection::open(db_path).map_err(KgError::connection_failed)?;
        schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create a new in-memory store.
    pub fn in_memory() -> KgResult<Self> {
        let conn = Connection::open_in_memory().map_err(KgError::connection_failed)?;
        schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> KgResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| KgError::internal(e.to_string()))
    }
}
