//! Lease lock manager: acquisition protocol and scoped execution.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backoff::Backoff;
use crate::error::{AcquireError, ReleaseError, StoreError};
use crate::guard::{LeaseBinding, LeaseGuard};
use crate::options::LeaseOptions;
use crate::stats::{LockStats, LockStatsCollector};
use crate::store::{LeaseStore, with_timeout};

/// Value produced by a critical section run through
/// [`LeaseLockManager::with_lock`], together with how its release went.
#[derive(Debug)]
pub struct Guarded<T> {
    pub value: T,
    pub release: Result<(), ReleaseError>,
}

impl<T> Guarded<T> {
    /// Collapse into the critical section's value, failing if the release
    /// reported a problem.
    pub fn into_result(self) -> Result<T, ReleaseError> {
        self.release.map(|_| self.value)
    }
}

/// Acquires named leases against a [`LeaseStore`].
///
/// ## Protocol
/// - **Acquire**: one atomic set-if-absent per attempt with a fresh owner
///   token, retried with backoff until the wait budget runs out
/// - **Renew**: compare-and-extend every renewal interval while the guard lives
/// - **Release**: stop renewal, then compare-and-delete
pub struct LeaseLockManager {
    store: Arc<dyn LeaseStore>,
    client_id: String,
    defaults: LeaseOptions,
    stats: Arc<LockStatsCollector>,
}

impl LeaseLockManager {
    /// Manager with default options (30s lease, no waiting).
    pub fn new(store: Arc<dyn LeaseStore>) -> Self {
        Self {
            store,
            client_id: Uuid::new_v4().to_string(),
            defaults: LeaseOptions::default(),
            stats: Arc::new(LockStatsCollector::default()),
        }
    }

    /// Manager with custom default options, validated up front.
    pub fn with_options(
        store: Arc<dyn LeaseStore>,
        defaults: LeaseOptions,
    ) -> Result<Self, AcquireError> {
        defaults.validate()?;
        Ok(Self {
            defaults,
            ..Self::new(store)
        })
    }

    /// Prefix for owner tokens, useful to tell clients apart in the store.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn default_options(&self) -> &LeaseOptions {
        &self.defaults
    }

    pub fn store(&self) -> &Arc<dyn LeaseStore> {
        &self.store
    }

    pub fn stats(&self) -> LockStats {
        self.stats.snapshot()
    }

    /// Acquire `name` for `lease_duration`, waiting up to `wait_timeout`.
    ///
    /// Other options come from the manager defaults.
    pub async fn acquire(
        &self,
        name: &str,
        lease_duration: Duration,
        wait_timeout: Duration,
    ) -> Result<LeaseGuard, AcquireError> {
        let options = LeaseOptions {
            lease_duration,
            wait_timeout,
            ..self.defaults.clone()
        };
        self.acquire_with(name, &options).await
    }

    /// Single attempt, no waiting.
    pub async fn try_acquire(
        &self,
        name: &str,
        lease_duration: Duration,
    ) -> Result<LeaseGuard, AcquireError> {
        self.acquire(name, lease_duration, Duration::ZERO).await
    }

    /// Acquire with the manager's default options.
    pub async fn acquire_default(&self, name: &str) -> Result<LeaseGuard, AcquireError> {
        self.acquire_with(name, &self.defaults).await
    }

    pub async fn acquire_with(
        &self,
        name: &str,
        options: &LeaseOptions,
    ) -> Result<LeaseGuard, AcquireError> {
        if name.is_empty() {
            return Err(AcquireError::InvalidName(
                "lock name must not be empty".to_string(),
            ));
        }
        options.validate()?;

        let started = Instant::now();
        // None means wait without limit
        let deadline = started.checked_add(options.wait_timeout);
        let store_timeout = options.store_timeout();
        let mut backoff = Backoff::new(options.retry_initial, options.retry_max);
        let mut last_store_error: Option<StoreError> = None;

        loop {
            let token = self.next_token();
            self.stats.record_attempt();
            let attempt_started = Instant::now();

            match with_timeout(
                store_timeout,
                self.store
                    .set_if_absent(name, &token, options.lease_duration),
            )
            .await
            {
                Ok(true) => {
                    self.stats.record_acquired();
                    debug!(
                        key = %name,
                        token = %token,
                        lease_ms = options.lease_duration.as_millis() as u64,
                        "Lease acquired"
                    );
                    let binding = LeaseBinding {
                        name: name.to_string(),
                        token,
                        lease: options.lease_duration,
                        store_timeout,
                        store: self.store.clone(),
                        stats: self.stats.clone(),
                    };
                    return Ok(LeaseGuard::start(
                        binding,
                        attempt_started,
                        options.renewal_interval(),
                        options.max_renewal_failures,
                    ));
                }
                Ok(false) => {
                    last_store_error = None;
                }
                Err(e) => {
                    debug!(key = %name, error = %e, "Lease acquire attempt failed");
                    // The write may have landed even though the reply did not
                    self.discard_attempt(name, &token, store_timeout).await;
                    last_store_error = Some(e);
                }
            }

            let now = Instant::now();
            if deadline.is_some_and(|deadline| now >= deadline) {
                self.stats.record_acquire_failed();
                if let Some(e) = last_store_error {
                    warn!(
                        key = %name,
                        error = %e,
                        "Lock wait budget exhausted, last attempt failed against the store"
                    );
                }
                return Err(AcquireError::Timeout {
                    name: name.to_string(),
                    waited: now.duration_since(started),
                });
            }

            let delay = match deadline {
                Some(deadline) => backoff.next_delay().min(deadline - now),
                None => backoff.next_delay(),
            };
            tokio::time::sleep(delay).await;
        }
    }

    /// Run `section` while holding `name`, releasing afterwards on every path.
    ///
    /// The section receives the guard so it can [`check`](LeaseGuard::check)
    /// ownership or `select!` on [`lost`](LeaseGuard::lost). If the section
    /// panics or the returned future is dropped, the guard's `Drop` performs
    /// the release.
    pub async fn with_lock<T>(
        &self,
        name: &str,
        lease_duration: Duration,
        wait_timeout: Duration,
        section: impl AsyncFnOnce(&LeaseGuard) -> T,
    ) -> Result<Guarded<T>, AcquireError> {
        let mut guard = self.acquire(name, lease_duration, wait_timeout).await?;
        let value = section(&guard).await;
        let release = guard.release().await;
        Ok(Guarded { value, release })
    }

    /// Best-effort removal of a lease written by an attempt whose reply was lost.
    async fn discard_attempt(&self, name: &str, token: &str, store_timeout: Duration) {
        match with_timeout(store_timeout, self.store.delete_if_owner(name, token)).await {
            Ok(true) => debug!(key = %name, "Removed lease left by an unanswered acquire attempt"),
            Ok(false) => {}
            Err(e) => warn!(
                key = %name,
                error = %e,
                "Could not clean up after failed acquire attempt, lease left to expire"
            ),
        }
    }

    fn next_token(&self) -> String {
        format!("{}:{}", self.client_id, Uuid::new_v4())
    }
}
