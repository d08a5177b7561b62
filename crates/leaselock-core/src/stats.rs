//! Lock statistics.
//!
//! Counters are kept in-process for `LockStats` snapshots and mirrored to the
//! `metrics` facade so an installed recorder (e.g. Prometheus) can export them.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

pub const METRIC_ACQUIRE_TOTAL: &str = "leaselock_acquire_total";
pub const METRIC_ACQUIRE_FAILED_TOTAL: &str = "leaselock_acquire_failed_total";
pub const METRIC_RENEW_TOTAL: &str = "leaselock_renew_total";
pub const METRIC_RENEW_FAILED_TOTAL: &str = "leaselock_renew_failed_total";
pub const METRIC_RELEASE_TOTAL: &str = "leaselock_release_total";
pub const METRIC_RELEASE_NOT_OWNER_TOTAL: &str = "leaselock_release_not_owner_total";
pub const METRIC_LOST_TOTAL: &str = "leaselock_lost_total";

/// Lock statistics snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockStats {
    /// Successful acquisitions
    pub acquisitions: u64,
    /// Acquire calls that returned an error
    pub failed_acquisitions: u64,
    /// Individual set-if-absent attempts, including retries
    pub acquire_attempts: u64,
    /// Successful compare-and-extend renewals
    pub renewals: u64,
    /// Renewal attempts that failed against the store
    pub renewal_failures: u64,
    /// Releases that deleted the lease
    pub releases: u64,
    /// Releases that found the lease owned by someone else
    pub release_not_owner: u64,
    /// Leases declared lost by the renewal task
    pub leases_lost: u64,
}

#[derive(Default)]
pub(crate) struct LockStatsCollector {
    acquisitions: AtomicU64,
    failed_acquisitions: AtomicU64,
    acquire_attempts: AtomicU64,
    renewals: AtomicU64,
    renewal_failures: AtomicU64,
    releases: AtomicU64,
    release_not_owner: AtomicU64,
    leases_lost: AtomicU64,
}

impl LockStatsCollector {
    pub(crate) fn record_attempt(&self) {
        self.acquire_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_acquired(&self) {
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(METRIC_ACQUIRE_TOTAL).increment(1);
    }

    pub(crate) fn record_acquire_failed(&self) {
        self.failed_acquisitions.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(METRIC_ACQUIRE_FAILED_TOTAL).increment(1);
    }

    pub(crate) fn record_renewed(&self) {
        self.renewals.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(METRIC_RENEW_TOTAL).increment(1);
    }

    pub(crate) fn record_renew_failed(&self) {
        self.renewal_failures.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(METRIC_RENEW_FAILED_TOTAL).increment(1);
    }

    pub(crate) fn record_released(&self) {
        self.releases.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(METRIC_RELEASE_TOTAL).increment(1);
    }

    pub(crate) fn record_release_not_owner(&self) {
        self.release_not_owner.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(METRIC_RELEASE_NOT_OWNER_TOTAL).increment(1);
    }

    pub(crate) fn record_lost(&self) {
        self.leases_lost.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(METRIC_LOST_TOTAL).increment(1);
    }

    pub(crate) fn snapshot(&self) -> LockStats {
        LockStats {
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            failed_acquisitions: self.failed_acquisitions.load(Ordering::Relaxed),
            acquire_attempts: self.acquire_attempts.load(Ordering::Relaxed),
            renewals: self.renewals.load(Ordering::Relaxed),
            renewal_failures: self.renewal_failures.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            release_not_owner: self.release_not_owner.load(Ordering::Relaxed),
            leases_lost: self.leases_lost.load(Ordering::Relaxed),
        }
    }
}
