//! Downstream search-index synchronization.

use async_trait::async_trait;

use crate::error::KgResult;
use crate::types::IndexUpdateRequest;

/// Pushes a document's current graph membership to the search index.
#[async_trait]
pub trait IndexSync: Send + Sync {
    async fn update_document(&self, request: IndexUpdateRequest) -> KgResult<()>;
}
