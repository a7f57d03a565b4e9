//! Error types for kgraph operations.
//!
//! Every failure carries a structured [`ErrorCode`] so callers can tell a
//! per-row problem (skip and retry next cycle) from a run-level one (abort).

use std::collections::HashMap;
use thiserror::Error;

/// Result type alias for kgraph operations.
pub type KgResult<T> = Result<T, KgError>;

/// Main error type for all kgraph operations.
#[derive(Error, Debug)]
pub enum KgError {
    /// Input validation failed.
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        code: ErrorCode,
        details: HashMap<String, String>,
    },

    /// A staged row is malformed or references something that does not exist yet.
    #[error("Data error: {message}")]
    Data { message: String, code: ErrorCode },

    /// Two canonical identities cannot be reconciled.
    #[error("Conflict: {message}")]
    Conflict {
        message: String,
        code: ErrorCode,
        entity_id: Option<String>,
    },

    /// The coordination lock was lost or could not be renewed.
    #[error("Coordination lock lost: {message}")]
    LockLost { message: String, code: ErrorCode },

    /// Embedding generation failed.
    #[error("Embedding error: {message}")]
    Embedding {
        message: String,
        code: ErrorCode,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Downstream index update failed.
    #[error("Index sync error for document {document_id}: {message}")]
    IndexSync {
        message: String,
        code: ErrorCode,
        document_id: String,
    },

    /// Database operation failed.
    #[error("Database error: {message}")]
    Database {
        message: String,
        code: ErrorCode,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error codes for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Validation (VAL_xxx)
    ValInvalidInput,
    ValInvalidFormat,

    // Data (DATA_xxx)
    DataMalformedId,
    DataNotFound,

    // Graph (KG_xxx)
    KgDocumentConflict,

    // Coordination (LOCK_xxx)
    LockNotOwned,
    LockRenewFailed,

    // Embedding (EMB_xxx)
    EmbGenerationFailed,
    EmbDimensionMismatch,

    // Index (IDX_xxx)
    IdxUpdateFailed,

    // Database (DB_xxx)
    DbConnectionFailed,
    DbOperationFailed,

    // Internal
    Internal,
}

impl ErrorCode {
    /// Get the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValInvalidInput => "VAL_001",
            ErrorCode::ValInvalidFormat => "VAL_002",
            ErrorCode::DataMalformedId => "DATA_001",
            ErrorCode::DataNotFound => "DATA_004",
            ErrorCode::KgDocumentConflict => "KG_001",
            ErrorCode::LockNotOwned => "LOCK_001",
            ErrorCode::LockRenewFailed => "LOCK_002",
            ErrorCode::EmbGenerationFailed => "EMB_001",
            ErrorCode::EmbDimensionMismatch => "EMB_002",
            ErrorCode::IdxUpdateFailed => "IDX_001",
            ErrorCode::DbConnectionFailed => "DB_001",
            ErrorCode::DbOperationFailed => "DB_002",
            ErrorCode::Internal => "INT_001",
        }
    }
}

impl KgError {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            code: ErrorCode::ValInvalidInput,
            details: HashMap::new(),
        }
    }

    /// Create a data error for a malformed id string.
    pub fn malformed_id(id: impl AsRef<str>) -> Self {
        Self::Data {
            message: format!("malformed id '{}'", id.as_ref()),
            code: ErrorCode::DataMalformedId,
        }
    }

    /// Create a data error with a specific code.
    pub fn data(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Data {
            message: message.into(),
            code,
        }
    }

    /// Create a not-found data error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::Data {
            message: format!("{} not found", what.into()),
            code: ErrorCode::DataNotFound,
        }
    }

    /// Create a conflict error not tied to a single entity.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
            code: ErrorCode::KgDocumentConflict,
            entity_id: None,
        }
    }

    /// Create a document conflict error for a merge.
    pub fn document_conflict(entity_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
            code: ErrorCode::KgDocumentConflict,
            entity_id: Some(entity_id.into()),
        }
    }

    /// Create a lock-not-owned error.
    pub fn lock_lost(message: impl Into<String>) -> Self {
        Self::LockLost {
            message: message.into(),
            code: ErrorCode::LockNotOwned,
        }
    }

    /// Create a lock renewal failure.
    pub fn lock_renew_failed(message: impl Into<String>) -> Self {
        Self::LockLost {
            message: message.into(),
            code: ErrorCode::LockRenewFailed,
        }
    }

    /// Create an embedding error.
    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding {
            message: message.into(),
            code: ErrorCode::EmbGenerationFailed,
            source: None,
        }
    }

    /// Create an error for vectors whose dimension differs from the query's.
    pub fn dimension_mismatch(expected: usize, actual: usize) -> Self {
        Self::Embedding {
            message: format!("expected {} dimensions, got {}", expected, actual),
            code: ErrorCode::EmbDimensionMismatch,
            source: None,
        }
    }

    /// Create an index sync error.
    pub fn index_sync(document_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::IndexSync {
            message: message.into(),
            code: ErrorCode::IdxUpdateFailed,
            document_id: document_id.into(),
        }
    }

    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            code: ErrorCode::DbOperationFailed,
            source: None,
        }
    }

    /// Create an error for a database that could not be opened.
    pub fn connection_failed(err: rusqlite::Error) -> Self {
        Self::Database {
            message: format!("failed to open database: {}", err),
            code: ErrorCode::DbConnectionFailed,
            source: Some(Box::new(err)),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation { code, .. } => *code,
            Self::Data { code, .. } => *code,
            Self::Conflict { code, .. } => *code,
            Self::LockLost { code, .. } => *code,
            Self::Embedding { code, .. } => *code,
            Self::IndexSync { code, .. } => *code,
            Self::Database { code, .. } => *code,
            Self::Serialization(_) => ErrorCode::ValInvalidFormat,
            _ => ErrorCode::Internal,
        }
    }

    /// Whether this error must abort the whole clustering run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::LockLost { .. })
    }
}

impl From<rusqlite::Error> for KgError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database {
            message: err.to_string(),
            code: ErrorCode::DbOperationFailed,
            source: Some(Box::new(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error() {
        let err = KgError::validation("Invalid input");
        assert_eq!(err.code(), ErrorCode::ValInvalidInput);
        assert!(err.to_string().contains("Invalid input"));
    }

    #[test]
    fn test_only_lock_loss_is_fatal() {
        assert!(KgError::lock_lost("gone").is_fatal());
        assert!(KgError::lock_renew_failed("timeout").is_fatal());
        assert!(!KgError::document_conflict("TEST::a", "x").is_fatal());
        assert!(!KgError::malformed_id("a__b").is_fatal());
        assert!(!KgError::index_sync("doc", "down").is_fatal());
    }

    #[test]
    fn test_error_code_as_str() {
        assert_eq!(ErrorCode::KgDocumentConflict.as_str(), "KG_001");
        assert_eq!(ErrorCode::LockRenewFailed.as_str(), "LOCK_002");
        assert_eq!(KgError::malformed_id("x").code().as_str(), "DATA_001");
        assert_eq!(KgError::dimension_mismatch(3, 2).code().as_str(), "EMB_002");
    }
}
