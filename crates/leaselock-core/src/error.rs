//! Error types for lease lock operations.
//!
//! Every protocol failure is returned as a value; nothing is only logged.

use std::time::Duration;

use thiserror::Error;

/// Failure talking to the backing key-value store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The store reported an error (connection, protocol, script failure)
    #[error("store backend error: {0}")]
    Backend(String),

    /// The round trip did not complete within the configured store timeout
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),
}

#[cfg(feature = "redis-backend")]
impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Backend(format!("Redis error: {}", err))
    }
}

/// Errors returned by lock acquisition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AcquireError {
    /// The lock was not obtained within the caller's wait budget
    #[error("timed out after {waited:?} waiting for lock '{name}'")]
    Timeout { name: String, waited: Duration },

    /// Lease duration misconfigured relative to renewal interval or store timeout
    #[error("invalid lease configuration: {0}")]
    InvalidLease(String),

    /// Lock name cannot be mapped to a store key
    #[error("invalid lock name: {0}")]
    InvalidName(String),
}

/// Errors returned by lock release.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReleaseError {
    /// The stored lease is absent or held by a different owner token
    #[error("lease '{name}' is no longer owned by this guard")]
    NotOwner { name: String },

    /// The compare-and-delete could not be performed; the lease expires by TTL
    #[error("store unavailable while releasing '{name}': {source}")]
    StoreUnavailable {
        name: String,
        #[source]
        source: StoreError,
    },
}

/// Asynchronous signal raised by the renewal task when ownership can no
/// longer be guaranteed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseLost {
    /// Compare-and-extend found a different (or no) owner token
    #[error("lease lost: stored owner token no longer matches")]
    NotOwner,

    /// Too many consecutive renewal attempts failed against the store
    #[error("lease lost: {attempts} consecutive renewal failures")]
    RenewalFailures { attempts: u32 },

    /// No renewal was confirmed before the lease could have expired
    #[error("lease lost: expired before a renewal was confirmed")]
    Expired,
}

/// Umbrella error for callers that want a single error type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error(transparent)]
    Acquire(#[from] AcquireError),

    #[error(transparent)]
    Release(#[from] ReleaseError),

    #[error(transparent)]
    Lost(#[from] LeaseLost),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Result type for lock operations.
pub type LockResult<T> = Result<T, LockError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = AcquireError::Timeout {
            name: "stock_key".to_string(),
            waited: Duration::from_secs(1),
        };
        assert_eq!(
            err.to_string(),
            "timed out after 1s waiting for lock 'stock_key'"
        );

        let err = ReleaseError::StoreUnavailable {
            name: "stock_key".to_string(),
            source: StoreError::Timeout(Duration::from_millis(500)),
        };
        assert!(err.to_string().contains("timed out after 500ms"));

        let err = LeaseLost::RenewalFailures { attempts: 3 };
        assert_eq!(err.to_string(), "lease lost: 3 consecutive renewal failures");
    }

    #[test]
    fn test_lock_error_from() {
        let err: LockError = ReleaseError::NotOwner {
            name: "a".to_string(),
        }
        .into();
        assert!(matches!(err, LockError::Release(ReleaseError::NotOwner { .. })));

        let err: LockError = LeaseLost::NotOwner.into();
        assert_eq!(err, LockError::Lost(LeaseLost::NotOwner));
    }
}
