//! Write-capture middleware.
//!
//! Runs inside [`super::middleware::read_through`]. When the request carries a
//! [`CacheTicket`], the handler's response is buffered and persisted under the
//! ticket's key. Capture is best-effort: the client always receives the
//! handler's response unchanged.

use axum::{
    body::{Body, HttpBody},
    extract::State,
    http::{Request, header},
    middleware::Next,
    response::Response,
};
use bytes::Bytes;
use http_body_util::BodyExt;
use thiserror::Error;
use tracing::{debug, warn};

use super::middleware::{CacheState, CacheTicket, is_json};

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to buffer response body: {0}")]
    Buffer(String),
    #[error("response body of {size} bytes exceeds the {limit} byte limit")]
    TooLarge { size: u64, limit: usize },
    #[error("response body is not JSON")]
    NotJson,
}

pub async fn write_capture(
    State(cache): State<CacheState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let ticket = request.extensions().get::<CacheTicket>().cloned();
    let response = next.run(request).await;

    let Some(ticket) = ticket else {
        return response;
    };

    if !should_store_response(&response) {
        debug!(
            cache = "response",
            key = %ticket.key,
            status = response.status().as_u16(),
            "response not cacheable"
        );
        return response;
    }

    match capture_body(response, cache.config.max_body_bytes).await {
        Ok((response, body)) => {
            if cache
                .store
                .set_ex(&ticket.key, ticket.ttl, body)
                .await
                .is_err()
            {
                cache.stats.record_error();
            } else {
                debug!(
                    cache = "response",
                    key = %ticket.key,
                    ttl_secs = ticket.ttl.as_secs(),
                    "response cached"
                );
            }
            response
        }
        Err((response, CaptureError::Buffer(message))) => {
            warn!(
                target: "clubhouse::cache::capture",
                key = %ticket.key,
                error = %message,
                "failed to buffer response for caching"
            );
            response
        }
        Err((response, err)) => {
            debug!(cache = "response", key = %ticket.key, reason = %err, "response not cached");
            response
        }
    }
}

/// Only successful responses without cookies or streaming bodies are stored.
pub fn should_store_response(response: &Response) -> bool {
    if !response.status().is_success() {
        return false;
    }

    if response.headers().contains_key(header::SET_COOKIE) {
        return false;
    }

    if response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("text/event-stream"))
    {
        return false;
    }

    true
}

/// Buffer a response body, returning the rebuilt response alongside it.
pub async fn buffer_response(
    response: Response,
) -> Result<(Response, Bytes), (Response, CaptureError)> {
    let (parts, body) = response.into_parts();
    match BodyExt::collect(body).await {
        Ok(collected) => {
            let bytes = collected.to_bytes();
            let rebuilt = Response::from_parts(parts, Body::from(bytes.clone()));
            Ok((rebuilt, bytes))
        }
        Err(error) => {
            let rebuilt = Response::from_parts(parts, Body::empty());
            Err((rebuilt, CaptureError::Buffer(error.to_string())))
        }
    }
}

/// Buffer and validate a body for storage.
///
/// Bodies whose size hint already exceeds `limit` are passed through without
/// being read.
async fn capture_body(
    response: Response,
    limit: usize,
) -> Result<(Response, Bytes), (Response, CaptureError)> {
    let hinted = response.body().size_hint().lower();
    if hinted > limit as u64 {
        return Err((response, CaptureError::TooLarge { size: hinted, limit }));
    }

    let (response, body) = buffer_response(response).await?;
    if body.len() > limit {
        let size = body.len() as u64;
        return Err((response, CaptureError::TooLarge { size, limit }));
    }
    if !is_json(&body) {
        return Err((response, CaptureError::NotJson));
    }
    Ok((response, body))
}
