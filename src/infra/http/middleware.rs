//! Request ids and the access log shared by the public and admin routers.

use std::time::Instant;

use axum::{body::Body, http::Request, middleware::Next, response::Response};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::{application::error::ErrorReport, cache::CacheOutcome};

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
}

pub async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    let context = RequestContext {
        request_id: Uuid::new_v4().to_string(),
    };
    request.extensions_mut().insert(context.clone());

    let mut response = next.run(request).await;
    response.extensions_mut().insert(context);
    response
}

/// One line per request. Successful requests log at debug with the cache
/// outcome; failures log the [`ErrorReport`] chain left by the handler.
pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let request_id = request
        .extensions()
        .get::<RequestContext>()
        .map(|context| context.request_id.clone())
        .unwrap_or_default();
    let started = Instant::now();

    let mut response = next.run(request).await;
    let status = response.status().as_u16();
    let elapsed_ms = started.elapsed().as_millis();
    let cache = response
        .extensions()
        .get::<CacheOutcome>()
        .map_or("none", |outcome| outcome.as_str());

    if !response.status().is_client_error() && !response.status().is_server_error() {
        debug!(
            target: "clubhouse::http::access",
            status, %method, %path, cache, elapsed_ms, %request_id,
            "request served"
        );
        return response;
    }

    let (source, chain) = match response.extensions_mut().remove::<ErrorReport>() {
        Some(report) => (report.source, report.messages),
        None => ("router", Vec::new()),
    };

    if response.status().is_server_error() {
        error!(
            target: "clubhouse::http::access",
            status, %method, %path, cache, elapsed_ms, %request_id, source, ?chain,
            "request failed"
        );
    } else {
        warn!(
            target: "clubhouse::http::access",
            status, %method, %path, elapsed_ms, %request_id, source, ?chain,
            "request rejected"
        );
    }

    response
}
