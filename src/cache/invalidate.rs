//! Post-write cache invalidation.
//!
//! [`invalidate_writes`] wraps mutating routes. Once the handler has produced a
//! successful response, the route's patterns are resolved, namespaced, expanded
//! against the store and deleted in a single call before the response is
//! returned.

use std::{collections::BTreeSet, sync::Arc};

use axum::{
    body::Body,
    extract::{RawPathParams, State, rejection::RawPathParamsRejection},
    http::{Method, Request},
    middleware::Next,
    response::Response,
};
use futures::future::join_all;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use super::{keys::RequestDescriptor, middleware::CacheState};

#[derive(Debug, Error)]
#[error("failed to resolve invalidation patterns: {0}")]
pub struct ResolveError(pub String);

type DeriveFn = dyn Fn(&RequestDescriptor) -> Result<Vec<String>, ResolveError> + Send + Sync;

/// Source of the patterns a mutating route invalidates.
///
/// Patterns are route-relative (`/api/v1/club-member*`); the cache prefix is
/// added when they are applied.
#[derive(Clone)]
pub enum PatternResolver {
    Static(Arc<[String]>),
    Derived(Arc<DeriveFn>),
}

impl PatternResolver {
    pub fn fixed<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Static(patterns.into_iter().map(Into::into).collect())
    }

    pub fn derived<F>(derive: F) -> Self
    where
        F: Fn(&RequestDescriptor) -> Result<Vec<String>, ResolveError> + Send + Sync + 'static,
    {
        Self::Derived(Arc::new(derive))
    }

    pub fn resolve(&self, request: &RequestDescriptor) -> Result<Vec<String>, ResolveError> {
        match self {
            Self::Static(patterns) => Ok(patterns.to_vec()),
            Self::Derived(derive) => derive(request),
        }
    }
}

/// Outcome of one invalidation pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InvalidationReport {
    pub patterns: usize,
    pub deleted: u64,
    pub failures: usize,
}

#[derive(Clone)]
pub struct Invalidation {
    pub cache: CacheState,
    pub resolver: PatternResolver,
}

impl Invalidation {
    pub fn new(cache: CacheState, resolver: PatternResolver) -> Self {
        Self { cache, resolver }
    }

    /// Resolve and delete the entries affected by `request`.
    ///
    /// Failures are logged and counted; a failing pattern does not stop keys
    /// resolved from the others being deleted.
    pub async fn run(&self, request: &RequestDescriptor) -> InvalidationReport {
        let cache = &self.cache;
        let mut report = InvalidationReport::default();

        let patterns = match self.resolver.resolve(request) {
            Ok(patterns) => patterns,
            Err(err) => {
                warn!(
                    target: "clubhouse::cache::invalidate",
                    path = %request.path,
                    error = %err,
                    "invalidation skipped"
                );
                cache.stats.record_error();
                report.failures += 1;
                return report;
            }
        };

        // Literals are keys and take the raw prefix; globs get it escaped.
        let mut globs = BTreeSet::new();
        let mut keys = BTreeSet::new();
        for pattern in &patterns {
            if pattern.contains('*') {
                globs.insert(cache.config.namespaced_pattern(pattern));
            } else {
                keys.insert(cache.config.namespaced(pattern));
            }
        }
        report.patterns = globs.len() + keys.len();

        let expansions = join_all(globs.iter().map(|pattern| cache.store.keys(pattern))).await;
        for expansion in expansions {
            match expansion {
                Ok(found) => keys.extend(found),
                Err(_) => {
                    cache.stats.record_error();
                    report.failures += 1;
                }
            }
        }

        if keys.is_empty() {
            return report;
        }

        let keys: Vec<String> = keys.into_iter().collect();
        match cache.store.delete(&keys).await {
            Ok(deleted) => {
                report.deleted = deleted;
                info!(
                    target: "clubhouse::cache::invalidate",
                    path = %request.path,
                    keys = keys.len(),
                    deleted,
                    "cache entries invalidated"
                );
            }
            Err(_) => {
                cache.stats.record_error();
                report.failures += 1;
            }
        }

        report
    }
}

fn is_mutating(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

/// Invalidation layer. Must run after routing (method router or
/// `route_layer`) so matched path parameters are visible.
#[instrument(skip_all, fields(method = %request.method(), path = %request.uri().path()))]
pub async fn invalidate_writes(
    State(invalidation): State<Invalidation>,
    params: Result<RawPathParams, RawPathParamsRejection>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !invalidation.cache.config.enabled || !is_mutating(request.method()) {
        return next.run(request).await;
    }

    let descriptor = {
        let descriptor = RequestDescriptor::from_request(&request);
        match &params {
            Ok(params) => descriptor.with_params(params.iter()),
            Err(_) => descriptor,
        }
    };

    let response = next.run(request).await;
    if !response.status().is_success() {
        debug!(
            status = response.status().as_u16(),
            "write did not succeed, keeping cache entries"
        );
        return response;
    }

    invalidation.run(&descriptor).await;
    response
}
