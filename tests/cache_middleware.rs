mod common;

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use axum::{
    Json, Router,
    http::{StatusCode, header},
    routing::get,
};
use clubhouse::cache::{
    CacheConfig, CacheOutcome, CachePolicy, CacheState, CacheStore, MemoryStore, StoreClient,
    TtlTier, TtlTiers,
};
use serde_json::json;

use common::{CountingStore, enabled_config, get as get_uri, public_app, send};

/// A cached route whose handler counts its invocations.
fn counting_app(cache: &CacheState, policy: CachePolicy) -> (Router, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let route = cache.route(policy).apply(get(move || {
        let counter = Arc::clone(&counter);
        async move {
            let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Json(json!({ "items": [1, 2, 3], "call": call }))
        }
    }));
    (Router::new().route("/inventory", route), calls)
}

#[tokio::test]
async fn repeated_get_is_served_from_cache() {
    let store = MemoryStore::new();
    let cache = CacheState::new(enabled_config(), StoreClient::from_store(store.clone()));
    let (app, calls) = counting_app(&cache, CachePolicy::new(TtlTier::Long));

    let first = get_uri(&app, "/inventory").await;
    let second = get_uri(&app, "/inventory").await;

    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(second.status, StatusCode::OK);
    assert_eq!(first.body, second.body);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        second.headers.get(header::CONTENT_TYPE).map(|v| v.as_bytes()),
        Some(&b"application/json"[..])
    );

    let stats = cache.stats.snapshot();
    assert_eq!((stats.hits, stats.misses, stats.errors), (1, 1, 0));
    assert_eq!(stats.hit_rate, 0.5);
    assert_eq!(
        store.keys("*").await.expect("keys"),
        vec!["cache:/inventory".to_string()]
    );
}

#[tokio::test]
async fn query_order_and_excluded_params_do_not_change_the_key() {
    let store = MemoryStore::new();
    let cache = CacheState::new(enabled_config(), StoreClient::from_store(store.clone()));
    let (app, calls) = counting_app(&cache, CachePolicy::new(TtlTier::Short));

    get_uri(&app, "/inventory?b=2&a=1").await;
    get_uri(&app, "/inventory?a=1&b=2").await;
    get_uri(&app, "/inventory?a=1&token=secret&b=2").await;
    get_uri(&app, "/inventory?api_key=k&b=2&auth=x&a=1").await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        store.keys("*").await.expect("keys"),
        vec!["cache:/inventory?a=1&b=2".to_string()]
    );
}

#[tokio::test]
async fn club_list_filters_share_keys_across_parameter_order() {
    let store = MemoryStore::new();
    let (app, cache) = public_app(enabled_config(), StoreClient::from_store(store.clone())).await;

    let first = get_uri(&app, "/api/v1/event-management?status=active&page=1").await;
    let second = get_uri(&app, "/api/v1/event-management?page=1&status=active").await;

    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(first.body, second.body);
    assert_eq!(first.json().as_array().map(Vec::len), Some(2));
    assert_eq!(cache.stats.snapshot().hits, 1);
}

#[tokio::test]
async fn error_responses_are_not_cached() {
    let store = MemoryStore::new();
    let (app, cache) = public_app(enabled_config(), StoreClient::from_store(store.clone())).await;

    for _ in 0..2 {
        let response = get_uri(&app, "/api/v1/club-member/999").await;
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(response.json(), json!({ "error": "Resource not found" }));
    }

    assert!(store.is_empty());
    let stats = cache.stats.snapshot();
    assert_eq!((stats.hits, stats.misses), (0, 2));
}

#[tokio::test]
async fn non_json_bodies_are_not_cached() {
    let store = MemoryStore::new();
    let cache = CacheState::new(enabled_config(), StoreClient::from_store(store.clone()));
    let route = cache
        .route(CachePolicy::new(TtlTier::Short))
        .apply(get(|| async { "plain text" }));
    let app = Router::new().route("/motd", route);

    let response = get_uri(&app, "/motd").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(&response.body[..], b"plain text");
    assert!(store.is_empty());
}

#[tokio::test]
async fn credential_vary_separates_callers() {
    let store = MemoryStore::new();
    let cache = CacheState::new(enabled_config(), StoreClient::from_store(store.clone()));
    let (app, calls) = counting_app(
        &cache,
        CachePolicy::new(TtlTier::Short).vary_on_credential(),
    );

    for auth in ["Bearer alice", "Bearer bob", "Bearer alice"] {
        let response = send(
            &app,
            axum::http::Method::GET,
            "/inventory",
            None,
            Some(auth),
        )
        .await;
        assert_eq!(response.status, StatusCode::OK);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    let keys = store.keys("*").await.expect("keys");
    assert_eq!(keys.len(), 2);
    assert!(
        keys.iter()
            .all(|key| key.starts_with("cache:/inventory:auth:") && !key.contains("alice"))
    );
}

#[tokio::test]
async fn unavailable_store_fails_open() {
    let (app, cache) = public_app(enabled_config(), StoreClient::unavailable()).await;

    let list = get_uri(&app, "/api/v1/club-inventory").await;
    assert_eq!(list.status, StatusCode::OK);
    assert_eq!(list.json().as_array().map(Vec::len), Some(3));

    let created = send(
        &app,
        axum::http::Method::POST,
        "/api/v1/club-inventory",
        Some(json!({
            "name": "Racket grip",
            "category": "sports",
            "quantity": 10,
            "unitPrice": 450
        })),
        None,
    )
    .await;
    assert_eq!(created.status, StatusCode::CREATED);
    assert_eq!(created.json()["id"], json!(4));

    let stats = cache.stats.snapshot();
    assert_eq!(stats.hits, 0);
    assert_eq!(stats.misses, 1);
    // One failed read, one failed invalidation key scan.
    assert_eq!(stats.errors, 2);
}

#[tokio::test]
async fn disabled_cache_passes_everything_through() {
    let store = CountingStore::default();
    let cache = CacheState::new(CacheConfig::default(), StoreClient::from_store(store.clone()));
    let (app, calls) = counting_app(&cache, CachePolicy::new(TtlTier::Short));

    let first = get_uri(&app, "/inventory").await;
    get_uri(&app, "/inventory").await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(store.calls(), 0);
    assert_eq!(first.extensions.get::<CacheOutcome>(), None);
    assert_eq!(cache.stats.snapshot().misses, 0);
}

#[tokio::test]
async fn responses_carry_the_cache_outcome() {
    let cache = CacheState::new(enabled_config(), StoreClient::memory());
    let (app, _calls) = counting_app(&cache, CachePolicy::new(TtlTier::Short));

    let first = get_uri(&app, "/inventory").await;
    let second = get_uri(&app, "/inventory").await;
    assert_eq!(first.extensions.get::<CacheOutcome>(), Some(&CacheOutcome::Miss));
    assert_eq!(second.extensions.get::<CacheOutcome>(), Some(&CacheOutcome::Hit));

    let offline = CacheState::new(enabled_config(), StoreClient::unavailable());
    let (app, _calls) = counting_app(&offline, CachePolicy::new(TtlTier::Short));
    let response = get_uri(&app, "/inventory").await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(
        response.extensions.get::<CacheOutcome>(),
        Some(&CacheOutcome::Unavailable)
    );
}

#[tokio::test(start_paused = true)]
async fn entries_expire_after_their_tier() {
    let store = MemoryStore::new();
    let config = CacheConfig {
        ttl: TtlTiers {
            short: 60,
            ..Default::default()
        },
        ..enabled_config()
    };
    let cache = CacheState::new(config, StoreClient::from_store(store.clone()));
    let (app, calls) = counting_app(&cache, CachePolicy::new(TtlTier::Short));

    get_uri(&app, "/inventory").await;
    tokio::time::advance(Duration::from_secs(59)).await;
    get_uri(&app, "/inventory").await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_secs(2)).await;
    let refreshed = get_uri(&app, "/inventory").await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(refreshed.json()["call"], json!(2));
}

#[tokio::test]
async fn bypass_policy_skips_the_cache() {
    let store = MemoryStore::new();
    let cache = CacheState::new(enabled_config(), StoreClient::from_store(store.clone()));
    let (app, calls) = counting_app(&cache, CachePolicy::new(TtlTier::Short).bypass());

    get_uri(&app, "/inventory").await;
    get_uri(&app, "/inventory").await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(store.is_empty());
}
