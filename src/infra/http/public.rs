use axum::{
    Json, Router,
    extract::State,
    middleware,
    routing::get,
};
use serde::Serialize;
use time::OffsetDateTime;

use crate::{
    cache::{CacheState, StatsSnapshot, StoreStatus},
    domain::catalog::Catalog,
};

use super::{
    club::build_club_router,
    middleware::{log_responses, set_request_context},
};

#[derive(Clone)]
pub struct HttpState {
    pub catalog: Catalog,
    pub cache: CacheState,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub store: StoreStatus,
}

pub fn build_router(state: HttpState) -> Router {
    let club = build_club_router(&state.catalog, &state.cache);

    Router::new()
        .route("/health", get(health))
        .route("/api/v1/cache/stats", get(cache_stats))
        .with_state(state)
        .merge(club)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

/// Liveness only: a degraded store does not make the service unhealthy.
async fn health(State(state): State<HttpState>) -> Json<HealthReport> {
    Json(HealthReport {
        status: "ok",
        timestamp: OffsetDateTime::now_utc(),
        store: state.cache.store.status(),
    })
}

async fn cache_stats(State(state): State<HttpState>) -> Json<StatsSnapshot> {
    Json(state.cache.stats.snapshot())
}
