//! Backing key-value store abstraction.
//!
//! A store is usable for leases only if each of the three mutating
//! operations below is a single indivisible operation on the store side.
//! A separate read followed by a write is not acceptable.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;

pub mod memory;

#[cfg(feature = "redis-backend")]
pub mod redis;

pub use memory::{MemoryLeaseStore, StoreOpCounts};

#[cfg(feature = "redis-backend")]
pub use self::redis::RedisLeaseStore;

/// Atomic primitives a lease lock needs from the store.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// `SET key token NX PX ttl`.
    ///
    /// Returns `true` if the key was created, `false` if it already existed.
    async fn set_if_absent(&self, key: &str, token: &str, ttl: Duration)
    -> Result<bool, StoreError>;

    /// Reset the key's TTL only if its value equals `token`.
    ///
    /// Returns `false` when the key is absent or owned by another token.
    async fn extend_if_owner(&self, key: &str, token: &str, ttl: Duration)
    -> Result<bool, StoreError>;

    /// Delete the key only if its value equals `token`.
    ///
    /// Returns `false` when the key is absent or owned by another token.
    async fn delete_if_owner(&self, key: &str, token: &str) -> Result<bool, StoreError>;

    /// Current value, for inspection only.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Remaining time-to-live, for inspection only.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError>;
}

/// Bound a store round trip; an elapsed deadline becomes `StoreError::Timeout`.
pub(crate) async fn with_timeout<T, F>(limit: Duration, op: F) -> Result<T, StoreError>
where
    F: Future<Output = Result<T, StoreError>>,
{
    match tokio::time::timeout(limit, op).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(limit)),
    }
}
