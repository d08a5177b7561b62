// Integration tests against a live Redis server
// Skipped unless REDIS_URL is set, e.g. REDIS_URL=redis://127.0.0.1:6379/

#![cfg(feature = "redis-backend")]

use std::sync::Arc;
use std::time::Duration;

use leaselock_core::{
    AcquireError, LeaseLockManager, LeaseStore, RedisLeaseStore, ReleaseError,
};
use uuid::Uuid;

async fn redis_store() -> Option<Arc<RedisLeaseStore>> {
    let url = std::env::var("REDIS_URL").ok()?;
    Some(Arc::new(
        RedisLeaseStore::new(&url)
            .await
            .expect("Could not connect to REDIS_URL"),
    ))
}

fn unique_key(prefix: &str) -> String {
    format!("leaselock-test:{}:{}", prefix, Uuid::new_v4())
}

#[tokio::test]
async fn test_redis_primitives() {
    let Some(store) = redis_store().await else {
        eprintln!("REDIS_URL not set, skipping");
        return;
    };
    let key = unique_key("primitives");
    let ttl = Duration::from_secs(5);

    assert!(store.set_if_absent(&key, "a", ttl).await.unwrap());
    assert!(!store.set_if_absent(&key, "b", ttl).await.unwrap());
    assert_eq!(store.get(&key).await.unwrap().as_deref(), Some("a"));

    assert!(!store.extend_if_owner(&key, "b", Duration::from_secs(60)).await.unwrap());
    assert!(store.extend_if_owner(&key, "a", Duration::from_secs(60)).await.unwrap());
    let remaining = store.ttl(&key).await.unwrap().unwrap();
    assert!(remaining > Duration::from_secs(30));

    assert!(!store.delete_if_owner(&key, "b").await.unwrap());
    assert!(store.delete_if_owner(&key, "a").await.unwrap());
    assert_eq!(store.get(&key).await.unwrap(), None);
    assert_eq!(store.ttl(&key).await.unwrap(), None);
}

#[tokio::test]
async fn test_redis_lease_lifecycle() {
    let Some(store) = redis_store().await else {
        eprintln!("REDIS_URL not set, skipping");
        return;
    };
    let key = unique_key("lifecycle");
    let manager = LeaseLockManager::new(store.clone());
    let rival = LeaseLockManager::new(store.clone());

    let mut guard = manager
        .acquire(&key, Duration::from_millis(1500), Duration::ZERO)
        .await
        .unwrap();

    // Outlive the original lease; renewal every 500ms keeps it
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(matches!(
        rival.try_acquire(&key, Duration::from_secs(5)).await,
        Err(AcquireError::Timeout { .. })
    ));
    assert_eq!(store.get(&key).await.unwrap().as_deref(), Some(guard.token()));
    assert!(guard.check().is_ok());

    guard.release().await.unwrap();
    assert_eq!(store.get(&key).await.unwrap(), None);
}

#[tokio::test]
async fn test_redis_release_of_reassigned_key() {
    let Some(store) = redis_store().await else {
        eprintln!("REDIS_URL not set, skipping");
        return;
    };
    let key = unique_key("reassigned");
    let manager = LeaseLockManager::new(store.clone());

    let mut guard = manager
        .try_acquire(&key, Duration::from_secs(10))
        .await
        .unwrap();

    // Simulate expiry followed by another client's acquisition
    assert!(store.delete_if_owner(&key, guard.token()).await.unwrap());
    assert!(store.set_if_absent(&key, "someone-else", Duration::from_secs(10)).await.unwrap());

    assert!(matches!(
        guard.release().await,
        Err(ReleaseError::NotOwner { .. })
    ));
    assert_eq!(store.get(&key).await.unwrap().as_deref(), Some("someone-else"));
    assert!(store.delete_if_owner(&key, "someone-else").await.unwrap());
}
