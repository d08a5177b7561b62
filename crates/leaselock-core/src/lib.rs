//! LeaseLock - lease-based distributed locking
//!
//! This crate provides:
//! - Atomic lease acquisition (`SET NX PX` semantics) with bounded waiting
//! - Background lease renewal with compare-and-extend
//! - Ownership-checked release with compare-and-delete
//! - Scoped execution with guaranteed release (`with_lock`, `Drop`)
//! - In-memory and Redis lease stores
//!
//! ## Example
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use leaselock_core::{LeaseLockManager, MemoryLeaseStore};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = LeaseLockManager::new(Arc::new(MemoryLeaseStore::new()));
//!
//! let mut guard = manager
//!     .acquire("stock_key", Duration::from_secs(10), Duration::from_secs(3))
//!     .await?;
//!
//! // critical section; renewal keeps the lease alive meanwhile
//! guard.check()?;
//!
//! guard.release().await?;
//! # Ok(())
//! # }
//! ```

mod backoff;
pub mod error;
pub mod guard;
pub mod manager;
pub mod options;
mod renewal;
pub mod stats;
pub mod store;

pub use error::{AcquireError, LeaseLost, LockError, LockResult, ReleaseError, StoreError};
pub use guard::{LeaseGuard, LeaseStatus};
pub use manager::{Guarded, LeaseLockManager};
pub use options::LeaseOptions;
pub use stats::LockStats;
pub use store::{LeaseStore, MemoryLeaseStore, StoreOpCounts};

#[cfg(feature = "redis-backend")]
pub use store::RedisLeaseStore;
