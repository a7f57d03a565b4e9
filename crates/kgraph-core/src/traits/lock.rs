//! Coordination lock held by the external scheduler.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::KgResult;

/// Handle to a lock created and owned by the caller.
///
/// The engine never acquires or releases it; it only keeps it alive between
/// batches and checks that it is still held.
#[async_trait]
pub trait CoordinationLock: Send + Sync {
    /// Extend the lock's lifetime by `timeout`.
    async fn renew(&self, timeout: Duration) -> KgResult<()>;

    /// Whether this process still holds the lock.
    async fn is_owned(&self) -> KgResult<bool>;
}
