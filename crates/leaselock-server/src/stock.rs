//! Stock counter and the deduction performed under the lease.
//!
//! Reads and writes are separate round trips on purpose: without the lease
//! two deductions could read the same value and both write `stock - 1`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use leaselock_core::{LeaseGuard, LeaseLost};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum StockError {
    #[error("stock backend error: {0}")]
    Backend(String),

    #[error("stock value under '{key}' is not an integer: {value}")]
    Corrupt { key: String, value: String },

    #[error("lease lost before writing stock: {0}")]
    LeaseLost(#[from] LeaseLost),
}

#[cfg(feature = "redis-backend")]
impl From<redis::RedisError> for StockError {
    fn from(e: redis::RedisError) -> Self {
        StockError::Backend(e.to_string())
    }
}

/// Where the stock counter lives.
#[async_trait]
pub trait StockLedger: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<i64>, StockError>;

    async fn set(&self, key: &str, value: i64) -> Result<(), StockError>;

    /// Seed `key` unless it already holds a value; returns the value in effect.
    async fn init_if_absent(&self, key: &str, value: i64) -> Result<i64, StockError>;
}

/// Stock counter for a single process.
#[derive(Clone, Default)]
pub struct MemoryStockLedger {
    values: Arc<DashMap<String, i64>>,
}

impl MemoryStockLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StockLedger for MemoryStockLedger {
    async fn get(&self, key: &str) -> Result<Option<i64>, StockError> {
        Ok(self.values.get(key).map(|v| *v))
    }

    async fn set(&self, key: &str, value: i64) -> Result<(), StockError> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }

    async fn init_if_absent(&self, key: &str, value: i64) -> Result<i64, StockError> {
        Ok(*self.values.entry(key.to_string()).or_insert(value))
    }
}

#[cfg(feature = "redis-backend")]
pub use self::redis_ledger::RedisStockLedger;

#[cfg(feature = "redis-backend")]
mod redis_ledger {
    use redis::AsyncCommands;
    use redis::aio::ConnectionManager;

    use super::*;

    /// Stock counter shared by every server pointed at the same Redis.
    #[derive(Clone)]
    pub struct RedisStockLedger {
        conn: ConnectionManager,
    }

    impl RedisStockLedger {
        pub fn new(conn: ConnectionManager) -> Self {
            Self { conn }
        }
    }

    #[async_trait]
    impl StockLedger for RedisStockLedger {
        async fn get(&self, key: &str) -> Result<Option<i64>, StockError> {
            let mut conn = self.conn.clone();
            let raw: Option<String> = conn.get(key).await?;
            raw.map(|value| {
                value.trim().parse::<i64>().map_err(|_| StockError::Corrupt {
                    key: key.to_string(),
                    value,
                })
            })
            .transpose()
        }

        async fn set(&self, key: &str, value: i64) -> Result<(), StockError> {
            let mut conn = self.conn.clone();
            let _: () = conn.set(key, value).await?;
            Ok(())
        }

        async fn init_if_absent(&self, key: &str, value: i64) -> Result<i64, StockError> {
            let mut conn = self.conn.clone();
            let created: bool = conn.set_nx(key, value).await?;
            if created {
                return Ok(value);
            }
            Ok(self.get(key).await?.unwrap_or(value))
        }
    }
}

/// Result of one deduction attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deduction {
    pub deducted: bool,
    pub remaining: i64,
}

/// Read, decrement if positive, write back.
///
/// Must run while `guard` holds the lease; ownership is checked right before
/// the write so a lost lease never produces a stale write.
pub async fn deduct_one(
    ledger: &dyn StockLedger,
    key: &str,
    guard: &LeaseGuard,
    work: Duration,
) -> Result<Deduction, StockError> {
    let stock = ledger.get(key).await?.unwrap_or(0);
    if stock <= 0 {
        info!(key, "Deduction failed, insufficient stock");
        return Ok(Deduction {
            deducted: false,
            remaining: stock,
        });
    }

    if !work.is_zero() {
        debug!(key, work_ms = work.as_millis() as u64, "Simulating work under lease");
        tokio::time::sleep(work).await;
    }

    guard.check()?;
    let remaining = stock - 1;
    ledger.set(key, remaining).await?;
    info!(key, remaining, "Deduction succeeded");

    Ok(Deduction {
        deducted: true,
        remaining,
    })
}
