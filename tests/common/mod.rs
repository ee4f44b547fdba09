#![allow(dead_code)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Extensions, HeaderMap, Method, Request, StatusCode, header},
};
use bytes::Bytes;
use clubhouse::{
    cache::{CacheConfig, CacheState, CacheStore, MemoryStore, StoreClient, StoreError},
    domain::catalog::Catalog,
    infra::http::{HttpState, build_router},
};
use serde_json::Value;
use tower::ServiceExt;

pub fn enabled_config() -> CacheConfig {
    CacheConfig {
        enabled: true,
        stats_enabled: true,
        ..Default::default()
    }
}

pub async fn public_app(config: CacheConfig, store: StoreClient) -> (Router, CacheState) {
    let catalog = Catalog::seeded().await.expect("seed catalog");
    let cache = CacheState::new(config, store);
    let router = build_router(HttpState {
        catalog,
        cache: cache.clone(),
    });
    (router, cache)
}

/// Memory store that counts every call made against it.
#[derive(Clone, Default)]
pub struct CountingStore {
    inner: MemoryStore,
    calls: Arc<AtomicUsize>,
}

impl CountingStore {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn tick(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CacheStore for CountingStore {
    fn backend(&self) -> &'static str {
        "counting"
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        self.tick();
        self.inner.get(key).await
    }

    async fn set_ex(&self, key: &str, value: Bytes, ttl: Duration) -> Result<(), StoreError> {
        self.tick();
        self.inner.set_ex(key, value, ttl).await
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        self.tick();
        self.inner.delete(keys).await
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        self.tick();
        self.inner.keys(pattern).await
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub extensions: Extensions,
    pub body: Bytes,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("response body should be JSON")
    }
}

pub async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
    authorization: Option<&str>,
) -> TestResponse {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(value) = authorization {
        builder = builder.header(header::AUTHORIZATION, value);
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string())),
        None => builder.body(Body::empty()),
    }
    .expect("request should build");

    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("router should respond");
    let (parts, body) = response.into_parts();
    let body = to_bytes(body, usize::MAX).await.expect("body should read");

    TestResponse {
        status: parts.status,
        headers: parts.headers,
        extensions: parts.extensions,
        body,
    }
}

pub async fn get(app: &Router, uri: &str) -> TestResponse {
    send(app, Method::GET, uri, None, None).await
}
