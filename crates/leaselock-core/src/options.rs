//! Lease configuration.
//!
//! Durations are (de)serialized as milliseconds so the options can be read
//! straight out of an application config file.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AcquireError;

/// Default lease duration, matching the usual watchdog default of 30s
pub const DEFAULT_LEASE: Duration = Duration::from_secs(30);

/// Consecutive failed renewals tolerated before the lease is declared lost
pub const DEFAULT_MAX_RENEWAL_FAILURES: u32 = 3;

/// Upper bound on the derived store timeout
pub const MAX_DERIVED_STORE_TIMEOUT: Duration = Duration::from_secs(2);

const DEFAULT_RETRY_INITIAL: Duration = Duration::from_millis(25);
const DEFAULT_RETRY_MAX: Duration = Duration::from_millis(500);

/// Options for one lease acquisition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseOptions {
    /// Time-to-live written with the lease and restored by every renewal
    #[serde(rename = "lease_ms", with = "duration_ms")]
    pub lease_duration: Duration,
    /// How long `acquire` keeps retrying before giving up (zero = one attempt)
    #[serde(rename = "wait_ms", with = "duration_ms")]
    pub wait_timeout: Duration,
    /// Renewal period; `lease_duration / 3` when unset
    #[serde(rename = "renewal_interval_ms", with = "opt_duration_ms")]
    pub renewal_interval: Option<Duration>,
    /// Consecutive renewal store failures before the lease counts as lost
    pub max_renewal_failures: u32,
    /// Bound on every store round trip; derived from the renewal interval when unset
    #[serde(rename = "store_timeout_ms", with = "opt_duration_ms")]
    pub store_timeout: Option<Duration>,
    /// First retry delay while waiting for a held lock
    #[serde(rename = "retry_initial_ms", with = "duration_ms")]
    pub retry_initial: Duration,
    /// Cap on the exponential retry delay
    #[serde(rename = "retry_max_ms", with = "duration_ms")]
    pub retry_max: Duration,
}

impl Default for LeaseOptions {
    fn default() -> Self {
        Self {
            lease_duration: DEFAULT_LEASE,
            wait_timeout: Duration::ZERO,
            renewal_interval: None,
            max_renewal_failures: DEFAULT_MAX_RENEWAL_FAILURES,
            store_timeout: None,
            retry_initial: DEFAULT_RETRY_INITIAL,
            retry_max: DEFAULT_RETRY_MAX,
        }
    }
}

impl LeaseOptions {
    pub fn new(lease_duration: Duration) -> Self {
        Self {
            lease_duration,
            ..Default::default()
        }
    }

    pub fn with_wait(mut self, wait_timeout: Duration) -> Self {
        self.wait_timeout = wait_timeout;
        self
    }

    pub fn with_renewal_interval(mut self, interval: Duration) -> Self {
        self.renewal_interval = Some(interval);
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = Some(timeout);
        self
    }

    pub fn with_max_renewal_failures(mut self, attempts: u32) -> Self {
        self.max_renewal_failures = attempts;
        self
    }

    pub fn with_retry(mut self, initial: Duration, max: Duration) -> Self {
        self.retry_initial = initial;
        self.retry_max = max;
        self
    }

    /// Effective renewal period.
    pub fn renewal_interval(&self) -> Duration {
        self.renewal_interval
            .unwrap_or_else(|| self.lease_duration / 3)
    }

    /// Effective per-operation store timeout.
    pub fn store_timeout(&self) -> Duration {
        self.store_timeout
            .unwrap_or_else(|| self.renewal_interval().min(MAX_DERIVED_STORE_TIMEOUT))
    }

    /// Check the options before any store call is made.
    ///
    /// The lease must outlive a renewal interval, and a store round trip must
    /// give up before the lease it is protecting could run out.
    pub fn validate(&self) -> Result<(), AcquireError> {
        let lease = self.lease_duration;
        let interval = self.renewal_interval();
        let store_timeout = self.store_timeout();

        if lease < Duration::from_millis(1) {
            return Err(AcquireError::InvalidLease(format!(
                "lease duration {:?} is below the 1ms store resolution",
                lease
            )));
        }
        if interval.is_zero() {
            return Err(AcquireError::InvalidLease(
                "renewal interval must be non-zero".to_string(),
            ));
        }
        if lease <= interval {
            return Err(AcquireError::InvalidLease(format!(
                "lease duration {:?} must be greater than renewal interval {:?}",
                lease, interval
            )));
        }
        if store_timeout.is_zero() || store_timeout >= lease {
            return Err(AcquireError::InvalidLease(format!(
                "store timeout {:?} must be non-zero and shorter than lease duration {:?}",
                store_timeout, lease
            )));
        }
        if self.max_renewal_failures == 0 {
            return Err(AcquireError::InvalidLease(
                "max_renewal_failures must be at least 1".to_string(),
            ));
        }
        if self.retry_initial.is_zero() || self.retry_initial > self.retry_max {
            return Err(AcquireError::InvalidLease(format!(
                "retry delays must satisfy 0 < initial ({:?}) <= max ({:?})",
                self.retry_initial, self.retry_max
            )));
        }
        Ok(())
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod opt_duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|v| v.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = LeaseOptions::default();
        assert_eq!(opts.lease_duration, Duration::from_secs(30));
        assert_eq!(opts.renewal_interval(), Duration::from_secs(10));
        assert_eq!(opts.store_timeout(), Duration::from_secs(2));
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_derived_store_timeout_follows_short_leases() {
        let opts = LeaseOptions::new(Duration::from_millis(300));
        assert_eq!(opts.renewal_interval(), Duration::from_millis(100));
        assert_eq!(opts.store_timeout(), Duration::from_millis(100));
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_lease_must_exceed_renewal_interval() {
        let opts = LeaseOptions::new(Duration::from_secs(3))
            .with_renewal_interval(Duration::from_secs(3));
        assert!(matches!(
            opts.validate(),
            Err(AcquireError::InvalidLease(_))
        ));

        let opts = LeaseOptions::new(Duration::from_secs(3))
            .with_renewal_interval(Duration::from_secs(5));
        assert!(opts.validate().is_err());
    }

    #[test]
    fn test_zero_and_tiny_leases_rejected() {
        assert!(LeaseOptions::new(Duration::ZERO).validate().is_err());
        assert!(LeaseOptions::new(Duration::from_micros(900)).validate().is_err());
        // 2ms lease derives a zero renewal interval
        assert!(LeaseOptions::new(Duration::from_millis(2)).validate().is_err());
    }

    #[test]
    fn test_store_timeout_must_be_shorter_than_lease() {
        let opts = LeaseOptions::new(Duration::from_secs(9))
            .with_store_timeout(Duration::from_secs(9));
        assert!(opts.validate().is_err());

        let opts = LeaseOptions::new(Duration::from_secs(9))
            .with_store_timeout(Duration::from_secs(5));
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_retry_and_failure_bounds() {
        let opts = LeaseOptions::default().with_max_renewal_failures(0);
        assert!(opts.validate().is_err());

        let opts = LeaseOptions::default()
            .with_retry(Duration::from_millis(100), Duration::from_millis(10));
        assert!(opts.validate().is_err());
    }

    #[test]
    fn test_serde_uses_milliseconds() {
        let json = r#"{"lease_ms": 9000, "wait_ms": 15000, "renewal_interval_ms": 3000}"#;
        let opts: LeaseOptions = serde_json::from_str(json).unwrap();
        assert_eq!(opts.lease_duration, Duration::from_secs(9));
        assert_eq!(opts.wait_timeout, Duration::from_secs(15));
        assert_eq!(opts.renewal_interval(), Duration::from_secs(3));
        assert_eq!(opts.max_renewal_failures, DEFAULT_MAX_RENEWAL_FAILURES);
        assert_eq!(opts.store_timeout, None);

        let value = serde_json::to_value(&opts).unwrap();
        assert_eq!(value["lease_ms"], 9000);
        assert!(value["store_timeout_ms"].is_null());
    }
}
