//! Runs against a real Redis. `REDIS_URL=redis://localhost:6379 cargo test -- --ignored`

use std::time::Duration;

use bytes::Bytes;
use clubhouse::cache::{CacheStore, RedisStore};
use uuid::Uuid;

async fn connect() -> RedisStore {
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    RedisStore::connect(&url, Duration::from_secs(5))
        .await
        .expect("redis should be reachable at REDIS_URL")
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn redis_store_round_trip_and_scoped_flush() {
    let store = connect().await;
    let prefix = format!("clubhouse-test-{}:", Uuid::new_v4());
    let list_key = format!("{prefix}/api/v1/club-member");
    let item_key = format!("{prefix}/api/v1/club-member/1");

    for key in [&list_key, &item_key] {
        store
            .set_ex(key, Bytes::from_static(b"[]"), Duration::from_secs(60))
            .await
            .expect("set");
    }

    assert_eq!(
        store.get(&list_key).await.expect("get"),
        Some(Bytes::from_static(b"[]"))
    );
    assert_eq!(
        store.keys(&format!("{prefix}*")).await.expect("keys"),
        vec![list_key.clone(), item_key.clone()]
    );

    assert_eq!(store.delete(&[item_key.clone()]).await.expect("delete"), 1);
    assert_eq!(store.flush(&prefix).await.expect("flush"), 1);
    assert!(store.get(&list_key).await.expect("get").is_none());
}

#[tokio::test]
#[ignore = "requires a running Redis"]
async fn redis_entries_expire() {
    let store = connect().await;
    let key = format!("clubhouse-test-{}:/ttl", Uuid::new_v4());

    store
        .set_ex(&key, Bytes::from_static(b"{}"), Duration::from_secs(1))
        .await
        .expect("set");
    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert!(store.get(&key).await.expect("get").is_none());
}
