//! Operator endpoints, served only on the admin listener.

use axum::{
    Json, Router,
    extract::{Query, State},
    middleware,
    routing::{delete, get},
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{application::error::HttpError, cache::CacheState};

use super::middleware::{log_responses, set_request_context};

#[derive(Clone)]
pub struct AdminState {
    pub cache: CacheState,
}

pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/api/v1/cache/flush", delete(flush_cache))
        .route("/api/v1/cache/keys", get(list_keys))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

#[derive(Debug, Serialize)]
struct FlushResponse {
    success: bool,
    deleted: u64,
}

async fn flush_cache(State(state): State<AdminState>) -> Result<Json<FlushResponse>, HttpError> {
    let prefix = &state.cache.config.prefix;
    let deleted = state.cache.store.flush(prefix).await?;
    info!(
        target: "clubhouse::http::admin",
        prefix = %prefix,
        deleted,
        "cache flushed"
    );
    Ok(Json(FlushResponse {
        success: true,
        deleted,
    }))
}

#[derive(Debug, Deserialize)]
struct KeysQuery {
    pattern: Option<String>,
}

#[derive(Debug, Serialize)]
struct KeysResponse {
    keys: Vec<String>,
}

async fn list_keys(
    State(state): State<AdminState>,
    Query(query): Query<KeysQuery>,
) -> Result<Json<KeysResponse>, HttpError> {
    let pattern = query.pattern.as_deref().unwrap_or("*");
    let keys = state
        .cache
        .store
        .keys(&state.cache.config.namespaced_pattern(pattern))
        .await?;
    Ok(Json(KeysResponse { keys }))
}
