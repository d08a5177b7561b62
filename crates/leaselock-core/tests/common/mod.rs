// Shared helpers for lease lock integration tests

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use leaselock_core::{LeaseStore, MemoryLeaseStore, StoreError};

const HEALTHY: u8 = 0;
const FAILING: u8 = 1;
const HANGING: u8 = 2;

/// A client's view of a shared store that can be cut off, either failing
/// fast or never answering.
pub struct FaultyStore {
    inner: Arc<MemoryLeaseStore>,
    mode: AtomicU8,
}

impl FaultyStore {
    pub fn new(inner: Arc<MemoryLeaseStore>) -> Self {
        Self {
            inner,
            mode: AtomicU8::new(HEALTHY),
        }
    }

    pub fn heal(&self) {
        self.mode.store(HEALTHY, Ordering::SeqCst);
    }

    pub fn fail(&self) {
        self.mode.store(FAILING, Ordering::SeqCst);
    }

    pub fn hang(&self) {
        self.mode.store(HANGING, Ordering::SeqCst);
    }

    async fn gate(&self) -> Result<(), StoreError> {
        match self.mode.load(Ordering::SeqCst) {
            FAILING => Err(StoreError::Backend("connection refused".to_string())),
            HANGING => std::future::pending().await,
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl LeaseStore for FaultyStore {
    async fn set_if_absent(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.gate().await?;
        self.inner.set_if_absent(key, token, ttl).await
    }

    async fn extend_if_owner(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.gate().await?;
        self.inner.extend_if_owner(key, token, ttl).await
    }

    async fn delete_if_owner(&self, key: &str, token: &str) -> Result<bool, StoreError> {
        self.gate().await?;
        self.inner.delete_if_owner(key, token).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.gate().await?;
        self.inner.get(key).await
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        self.gate().await?;
        self.inner.ttl(key).await
    }
}

/// A store whose next acquire is applied but never answered, as when the
/// connection drops after the write reaches the server.
pub struct LostReplyStore {
    inner: Arc<MemoryLeaseStore>,
    lose_next_reply: AtomicBool,
}

impl LostReplyStore {
    pub fn new(inner: Arc<MemoryLeaseStore>) -> Self {
        Self {
            inner,
            lose_next_reply: AtomicBool::new(true),
        }
    }
}

#[async_trait]
impl LeaseStore for LostReplyStore {
    async fn set_if_absent(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let written = self.inner.set_if_absent(key, token, ttl).await?;
        if self.lose_next_reply.swap(false, Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(written)
    }

    async fn extend_if_owner(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.inner.extend_if_owner(key, token, ttl).await
    }

    async fn delete_if_owner(&self, key: &str, token: &str) -> Result<bool, StoreError> {
        self.inner.delete_if_owner(key, token).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key).await
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        self.inner.ttl(key).await
    }
}

/// Let spawned tasks (e.g. a guard's drop-time release) run to completion.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}
