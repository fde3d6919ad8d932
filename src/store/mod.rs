// ============================================================================
// Status Store - order identifier -> authoritative order record
// ============================================================================
//
// Per-key atomic put/get. Implementations:
// - RedisStatusStore     (production)
// - InMemoryStatusStore  (tests, standalone mode)
//
// ============================================================================

mod in_memory;
mod redis;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::order::{Order, OrderId};
use crate::utils::IsTransient;

pub use self::in_memory::InMemoryStatusStore;
pub use self::redis::RedisStatusStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("store backend error: {0}")]
    Backend(String),

    #[error("corrupt record under {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

impl IsTransient for StoreError {
    fn is_transient(&self) -> bool {
        !matches!(self, StoreError::Corrupt { .. })
    }
}

#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Insert or overwrite the record under `order.id`.
    async fn put(&self, order: &Order) -> Result<(), StoreError>;

    /// `Ok(None)` when no record exists.
    async fn get(&self, id: &OrderId) -> Result<Option<Order>, StoreError>;

    /// Round trip used by health probes.
    async fn ping(&self) -> Result<(), StoreError>;
}

/// Bound a store call so it can never hang its caller.
pub async fn with_timeout<T, F>(limit: Duration, operation: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, operation).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(limit)),
    }
}
