//! In-process lease store backed by `DashMap`.
//!
//! Each operation holds the shard lock for its key for the whole
//! compare-and-act, which gives the same single-key atomicity a scripted
//! Redis call does. Expiry uses `tokio::time::Instant`, so paused-clock tests
//! see leases expire as virtual time advances.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use super::LeaseStore;
use crate::error::StoreError;

struct LeaseEntry {
    token: String,
    expires_at: Instant,
}

impl LeaseEntry {
    fn new(token: &str, ttl: Duration) -> Self {
        Self {
            token: token.to_string(),
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    fn is_owned_by(&self, token: &str) -> bool {
        !self.is_expired() && self.token == token
    }
}

#[derive(Default)]
struct OpCounters {
    set_if_absent: AtomicU64,
    extend_if_owner: AtomicU64,
    extended: AtomicU64,
    delete_if_owner: AtomicU64,
    deleted: AtomicU64,
}

/// Snapshot of how many times each store primitive was invoked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreOpCounts {
    pub set_if_absent: u64,
    pub extend_if_owner: u64,
    /// Compare-and-extend calls that matched the token
    pub extended: u64,
    pub delete_if_owner: u64,
    /// Compare-and-delete calls that actually removed the key
    pub deleted: u64,
}

/// `DashMap`-based lease store for tests and single-process deployments.
pub struct MemoryLeaseStore {
    entries: Arc<DashMap<String, LeaseEntry>>,
    counters: Arc<OpCounters>,
    _cleanup_handle: Option<JoinHandle<()>>,
}

impl Default for MemoryLeaseStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            counters: Arc::new(OpCounters::default()),
            _cleanup_handle: None,
        }
    }

    /// Start a background sweep that drops expired entries.
    ///
    /// Expired entries are already invisible to every operation; the sweep
    /// only bounds memory use. Must be called inside a tokio runtime.
    pub fn with_cleanup(self, interval: Duration) -> Self {
        let entries = self.entries.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                Self::cleanup_expired(&entries);
            }
        });

        Self {
            entries: self.entries.clone(),
            counters: self.counters.clone(),
            _cleanup_handle: Some(handle),
        }
    }

    fn cleanup_expired(entries: &DashMap<String, LeaseEntry>) {
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired());
        let removed = before.saturating_sub(entries.len());
        if removed > 0 {
            debug!(count = removed, "Cleaned up expired lease entries");
        }
    }

    /// Overwrite a key unconditionally (admin operation).
    ///
    /// Simulates another client taking over a key, e.g. after the previous
    /// owner's lease silently expired.
    pub fn force_set(&self, key: &str, token: &str, ttl: Duration) {
        self.entries
            .insert(key.to_string(), LeaseEntry::new(token, ttl));
    }

    /// Remove a key unconditionally (admin operation).
    pub fn force_release(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Number of live (unexpired) leases.
    pub fn active_leases(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_expired()).count()
    }

    pub fn op_counts(&self) -> StoreOpCounts {
        StoreOpCounts {
            set_if_absent: self.counters.set_if_absent.load(Ordering::Relaxed),
            extend_if_owner: self.counters.extend_if_owner.load(Ordering::Relaxed),
            extended: self.counters.extended.load(Ordering::Relaxed),
            delete_if_owner: self.counters.delete_if_owner.load(Ordering::Relaxed),
            deleted: self.counters.deleted.load(Ordering::Relaxed),
        }
    }
}

impl Drop for MemoryLeaseStore {
    fn drop(&mut self) {
        if let Some(handle) = self._cleanup_handle.take() {
            handle.abort();
        }
    }
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn set_if_absent(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.counters.set_if_absent.fetch_add(1, Ordering::Relaxed);

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(LeaseEntry::new(token, ttl));
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(LeaseEntry::new(token, ttl));
                Ok(true)
            }
        }
    }

    async fn extend_if_owner(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.counters
            .extend_if_owner
            .fetch_add(1, Ordering::Relaxed);

        match self.entries.get_mut(key) {
            Some(mut entry) if entry.is_owned_by(token) => {
                entry.expires_at = Instant::now() + ttl;
                self.counters.extended.fetch_add(1, Ordering::Relaxed);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_if_owner(&self, key: &str, token: &str) -> Result<bool, StoreError> {
        self.counters
            .delete_if_owner
            .fetch_add(1, Ordering::Relaxed);

        let removed = self
            .entries
            .remove_if(key, |_, entry| entry.is_owned_by(token))
            .is_some();
        if removed {
            self.counters.deleted.fetch_add(1, Ordering::Relaxed);
        }
        Ok(removed)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.token.clone()))
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        Ok(self
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.expires_at.saturating_duration_since(Instant::now())))
    }
}
