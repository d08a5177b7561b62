//! Lease guard: one successful acquisition.
//!
//! The guard owns the owner token and the renewal task. Disposal, either
//! explicit [`LeaseGuard::release`] or `Drop`, stops and joins the renewal
//! task before the ownership-checked delete is issued.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{LeaseLost, ReleaseError, StoreError};
use crate::renewal::RenewalTask;
use crate::stats::LockStatsCollector;
use crate::store::{LeaseStore, with_timeout};

/// Ownership state of a guard as last observed by its renewal task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseStatus {
    Held,
    Lost(LeaseLost),
}

/// The (name, token, lease) triple plus the store it lives in.
pub(crate) struct LeaseBinding {
    pub(crate) name: String,
    pub(crate) token: String,
    pub(crate) lease: Duration,
    pub(crate) store_timeout: Duration,
    pub(crate) store: Arc<dyn LeaseStore>,
    pub(crate) stats: Arc<LockStatsCollector>,
}

impl LeaseBinding {
    pub(crate) async fn extend(&self) -> Result<bool, StoreError> {
        with_timeout(
            self.store_timeout,
            self.store.extend_if_owner(&self.name, &self.token, self.lease),
        )
        .await
    }

    pub(crate) async fn release(&self) -> Result<(), ReleaseError> {
        match with_timeout(
            self.store_timeout,
            self.store.delete_if_owner(&self.name, &self.token),
        )
        .await
        {
            Ok(true) => {
                self.stats.record_released();
                debug!(key = %self.name, "Lease released");
                Ok(())
            }
            Ok(false) => {
                self.stats.record_release_not_owner();
                warn!(
                    key = %self.name,
                    "Lease was not owned at release time, nothing deleted"
                );
                Err(ReleaseError::NotOwner {
                    name: self.name.clone(),
                })
            }
            Err(source) => {
                warn!(
                    key = %self.name,
                    error = %source,
                    "Lease release failed, leaving it to expire"
                );
                Err(ReleaseError::StoreUnavailable {
                    name: self.name.clone(),
                    source,
                })
            }
        }
    }
}

/// Exclusive ownership of a named lease.
///
/// Not `Clone`: each critical section acquires its own guard. Dropping an
/// unreleased guard releases it on a spawned task; call
/// [`release`](Self::release) to observe the outcome.
pub struct LeaseGuard {
    binding: Arc<LeaseBinding>,
    acquired_at: Instant,
    renewal: Option<RenewalTask>,
    status: watch::Receiver<LeaseStatus>,
    released: bool,
}

impl LeaseGuard {
    /// Wrap a freshly acquired lease and start renewing it.
    ///
    /// `written_at` is when the acquiring request was sent, the earliest the
    /// store can have started the lease's TTL.
    pub(crate) fn start(
        binding: LeaseBinding,
        written_at: Instant,
        renewal_interval: Duration,
        max_failures: u32,
    ) -> Self {
        let binding = Arc::new(binding);
        let (status_tx, status) = watch::channel(LeaseStatus::Held);
        let renewal = RenewalTask::start(
            binding.clone(),
            written_at,
            renewal_interval,
            max_failures,
            status_tx,
        );
        Self {
            binding,
            acquired_at: Instant::now(),
            renewal: Some(renewal),
            status,
            released: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.binding.name
    }

    /// Owner token stored as the lease value.
    pub fn token(&self) -> &str {
        &self.binding.token
    }

    pub fn lease_duration(&self) -> Duration {
        self.binding.lease
    }

    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    pub fn status(&self) -> LeaseStatus {
        *self.status.borrow()
    }

    pub fn is_lost(&self) -> bool {
        matches!(self.status(), LeaseStatus::Lost(_))
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// `Err` once the renewal task has declared the lease lost.
    ///
    /// Critical sections call this before side effects that must not happen
    /// without ownership.
    pub fn check(&self) -> Result<(), LeaseLost> {
        match self.status() {
            LeaseStatus::Held => Ok(()),
            LeaseStatus::Lost(reason) => Err(reason),
        }
    }

    /// Resolves when the lease is declared lost; pending forever otherwise.
    ///
    /// Meant for `tokio::select!` next to the critical-section future.
    pub async fn lost(&self) -> LeaseLost {
        let mut status = self.status.clone();
        if let Ok(current) = status
            .wait_for(|s| matches!(s, LeaseStatus::Lost(_)))
            .await
            && let LeaseStatus::Lost(reason) = *current
        {
            return reason;
        }
        // Renewal ended without losing the lease
        std::future::pending().await
    }

    /// Stop renewal, then delete the lease if this guard still owns it.
    ///
    /// A second call is a no-op returning `Ok(())`.
    pub async fn release(&mut self) -> Result<(), ReleaseError> {
        if self.released {
            return Ok(());
        }
        if let Some(renewal) = self.renewal.take() {
            renewal.stop().await;
        }
        let result = self.binding.release().await;
        self.released = true;
        result
    }
}

impl fmt::Debug for LeaseGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaseGuard")
            .field("name", &self.binding.name)
            .field("token", &self.binding.token)
            .field("lease", &self.binding.lease)
            .field("status", &self.status())
            .field("released", &self.released)
            .finish()
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let renewal = self.renewal.take();
        let binding = self.binding.clone();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Some(renewal) = renewal {
                        renewal.stop().await;
                    }
                    // Outcome is recorded in the lock stats and logged by release()
                    let _ = binding.release().await;
                });
            }
            Err(_) => {
                if let Some(renewal) = renewal {
                    renewal.abort();
                }
                warn!(
                    key = %binding.name,
                    "Lease guard dropped outside a tokio runtime, lease left to expire"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::runtime::{Builder, Handle};

    use crate::manager::LeaseLockManager;
    use crate::store::{LeaseStore, MemoryLeaseStore};

    #[test]
    fn test_drop_outside_runtime_leaves_lease_to_expire() {
        let store = Arc::new(MemoryLeaseStore::new());
        let manager = LeaseLockManager::new(store.clone());

        let runtime = Builder::new_current_thread().enable_all().build().unwrap();
        let guard = runtime
            .block_on(manager.try_acquire("stock_key", Duration::from_secs(30)))
            .unwrap();
        let token = guard.token().to_string();
        drop(runtime);

        assert!(Handle::try_current().is_err());
        drop(guard);

        // Nothing deleted: the lease stays until its TTL runs out
        let stored = Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(store.get("stock_key"))
            .unwrap();
        assert_eq!(stored, Some(token));
        assert_eq!(store.op_counts().delete_if_owner, 0);
        assert_eq!(manager.stats().releases, 0);
    }
}
