//! Read-through response cache middleware.
//!
//! Serves cached JSON bodies for GET requests and, on a miss, attaches a
//! [`CacheTicket`] so [`super::capture::write_capture`] can persist the
//! handler's response.

use std::{sync::Arc, time::Duration};

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Method, Request, StatusCode, header},
    middleware::{self, Next},
    response::Response,
    routing::MethodRouter,
};
use bytes::Bytes;
use serde::de::IgnoredAny;
use tracing::{debug, instrument, warn};

use super::{
    CacheConfig, TtlTier,
    capture::write_capture,
    client::StoreClient,
    keys::{KeyBuilder, RequestDescriptor},
    stats::CacheStats,
};

/// Shared cache state handed to every cache layer.
#[derive(Clone)]
pub struct CacheState {
    pub config: Arc<CacheConfig>,
    pub store: StoreClient,
    pub stats: Arc<CacheStats>,
}

impl CacheState {
    pub fn new(config: CacheConfig, store: StoreClient) -> Self {
        let stats = Arc::new(CacheStats::new(config.stats_enabled));
        Self {
            config: Arc::new(config),
            store,
            stats,
        }
    }

    pub fn key_builder(&self) -> KeyBuilder {
        KeyBuilder::from_config(&self.config)
    }

    pub fn route(&self, policy: CachePolicy) -> CachedRoute {
        CachedRoute {
            cache: self.clone(),
            policy,
        }
    }
}

/// Per-route caching options.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    pub ttl: TtlTier,
    pub bypass: bool,
    pub vary_on_credential: bool,
    /// Replaces the configured excluded parameters for this route.
    pub excluded_params: Option<Vec<String>>,
}

impl CachePolicy {
    pub fn new(ttl: TtlTier) -> Self {
        Self {
            ttl,
            bypass: false,
            vary_on_credential: false,
            excluded_params: None,
        }
    }

    pub fn bypass(mut self) -> Self {
        self.bypass = true;
        self
    }

    pub fn vary_on_credential(mut self) -> Self {
        self.vary_on_credential = true;
        self
    }

    pub fn excluding<I, S>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.excluded_params = Some(params.into_iter().map(Into::into).collect());
        self
    }
}

/// State of the read-through layer for one route.
#[derive(Clone)]
pub struct CachedRoute {
    pub cache: CacheState,
    pub policy: CachePolicy,
}

impl CachedRoute {
    pub fn key_builder(&self) -> KeyBuilder {
        let builder = self.cache.key_builder();
        let builder = match &self.policy.excluded_params {
            Some(excluded) => builder.with_excluded_params(excluded.clone()),
            None => builder,
        };
        builder.vary_on_credential(self.policy.vary_on_credential)
    }

    pub fn ttl(&self) -> Duration {
        self.cache.config.ttl.duration(self.policy.ttl)
    }

    /// Wrap `router` in the read-through and write-capture layers.
    pub fn apply<S>(self, router: MethodRouter<S>) -> MethodRouter<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        router
            .layer(middleware::from_fn_with_state(
                self.cache.clone(),
                write_capture,
            ))
            .layer(middleware::from_fn_with_state(self, read_through))
    }
}

/// Key and expiry for the response of a request that missed the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheTicket {
    pub key: String,
    pub ttl: Duration,
}

/// How the read-through layer handled a request. Inserted into the response
/// extensions for the access log; absent when the cache was not consulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Miss,
    /// The store failed and the handler ran uncached.
    Unavailable,
}

impl CacheOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
            Self::Unavailable => "unavailable",
        }
    }
}

#[instrument(skip_all, fields(path = %request.uri().path()))]
pub async fn read_through(
    State(route): State<CachedRoute>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let cache = &route.cache;

    if !cache.config.enabled || route.policy.bypass || request.method() != Method::GET {
        return next.run(request).await;
    }

    let key = route
        .key_builder()
        .build(&RequestDescriptor::from_request(&request));

    match cache.store.get(&key).await {
        Ok(Some(body)) if is_json(&body) => {
            cache.stats.record_hit();
            debug!(key = %key, "serving cached response");
            return with_outcome(json_response(body), CacheOutcome::Hit);
        }
        Ok(Some(_)) => {
            warn!(
                target: "clubhouse::cache::middleware",
                key = %key,
                "cached value is not valid JSON, treating as miss"
            );
            cache.stats.record_miss();
        }
        Ok(None) => {
            debug!(key = %key, "cache miss, executing handler");
            cache.stats.record_miss();
        }
        Err(_) => {
            // Already logged by the client. Fall through without a ticket.
            cache.stats.record_error();
            cache.stats.record_miss();
            return with_outcome(next.run(request).await, CacheOutcome::Unavailable);
        }
    }

    request.extensions_mut().insert(CacheTicket {
        key,
        ttl: route.ttl(),
    });
    with_outcome(next.run(request).await, CacheOutcome::Miss)
}

fn with_outcome(mut response: Response, outcome: CacheOutcome) -> Response {
    response.extensions_mut().insert(outcome);
    response
}

pub(crate) fn is_json(body: &[u8]) -> bool {
    serde_json::from_slice::<IgnoredAny>(body).is_ok()
}

fn json_response(body: Bytes) -> Response {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = StatusCode::OK;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}

#[cfg(test)]
mod tests {
    use axum::http::header::AUTHORIZATION;

    use super::*;

    fn enabled_state() -> CacheState {
        CacheState::new(
            CacheConfig {
                enabled: true,
                stats_enabled: true,
                ..Default::default()
            },
            StoreClient::memory(),
        )
    }

    #[test]
    fn policy_builders() {
        let policy = CachePolicy::new(TtlTier::Medium)
            .vary_on_credential()
            .excluding(["page"]);
        assert_eq!(policy.ttl, TtlTier::Medium);
        assert!(policy.vary_on_credential);
        assert!(!policy.bypass);
        assert_eq!(policy.excluded_params, Some(vec!["page".to_string()]));
        assert!(CachePolicy::new(TtlTier::Short).bypass().bypass);
    }

    #[test]
    fn route_ttl_follows_tier() {
        let route = enabled_state().route(CachePolicy::new(TtlTier::Short));
        assert_eq!(route.ttl(), Duration::from_secs(300));
    }

    #[test]
    fn route_key_builder_applies_policy() {
        let route = enabled_state().route(
            CachePolicy::new(TtlTier::Long)
                .excluding(["page"])
                .vary_on_credential(),
        );
        let request = Request::builder()
            .uri("/members?page=2&token=t")
            .header(AUTHORIZATION, "Bearer abc")
            .body(Body::empty())
            .expect("request should build");
        let key = route
            .key_builder()
            .build(&RequestDescriptor::from_request(&request));

        assert!(key.starts_with("cache:/members?token=t:auth:"));
    }

    #[test]
    fn json_detection() {
        assert!(is_json(b"{\"a\":1}"));
        assert!(is_json(b"[]"));
        assert!(!is_json(b"<html></html>"));
        assert!(!is_json(b""));
    }
}
