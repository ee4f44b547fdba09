//! Catalog routes, each wrapped in the response cache and invalidated on
//! writes.

use std::{convert::Infallible, sync::Arc};

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    routing::get,
};
use serde::de::DeserializeOwned;

use crate::{
    application::error::AppError,
    cache::{
        CachePolicy, CacheState, Invalidation, PatternResolver, RequestDescriptor, ResolveError,
        TtlTier, WarmingDescriptor, invalidate_writes, query_source,
    },
    domain::{
        catalog::{Catalog, Collection},
        entities::{EventFilter, EventStatus, MemberFilter, Record},
    },
};

pub const INVENTORY_ROUTE: &str = "/api/v1/club-inventory";
pub const EVENTS_ROUTE: &str = "/api/v1/event-management";
pub const MEMBERS_ROUTE: &str = "/api/v1/club-member";

/// Mount the three collections under their route prefixes.
pub fn build_club_router<S>(catalog: &Catalog, cache: &CacheState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .merge(collection_router(
            INVENTORY_ROUTE,
            catalog.inventory.clone(),
            cache,
            TtlTier::Long,
            PatternResolver::fixed([format!("{INVENTORY_ROUTE}*")]),
        ))
        .merge(collection_router(
            EVENTS_ROUTE,
            catalog.events.clone(),
            cache,
            TtlTier::Medium,
            record_patterns(EVENTS_ROUTE),
        ))
        .merge(collection_router(
            MEMBERS_ROUTE,
            catalog.members.clone(),
            cache,
            TtlTier::Long,
            record_patterns(MEMBERS_ROUTE),
        ))
}

/// Entries a write under `base` can change: every list variant, plus the
/// touched record when the route names one. `?` is escaped so it only
/// matches a query separator.
fn record_patterns(base: &'static str) -> PatternResolver {
    PatternResolver::derived(move |request: &RequestDescriptor| {
        let mut patterns = vec![
            base.to_string(),
            format!("{base}\\?*"),
            format!("{base}:*"),
        ];
        if let Some(id) = request.param("id") {
            if id.parse::<u64>().is_err() {
                return Err(ResolveError(format!("record id `{id}` is not numeric")));
            }
            patterns.extend([
                format!("{base}/{id}"),
                format!("{base}/{id}\\?*"),
                format!("{base}/{id}:*"),
            ]);
        }
        Ok(patterns)
    })
}

fn collection_router<T, S>(
    base: &'static str,
    collection: Arc<Collection<T>>,
    cache: &CacheState,
    ttl: TtlTier,
    resolver: PatternResolver,
) -> Router<S>
where
    T: Record + DeserializeOwned,
    S: Clone + Send + Sync + 'static,
{
    let cached = cache.route(CachePolicy::new(ttl));
    let invalidation = middleware::from_fn_with_state(
        Invalidation::new(cache.clone(), resolver),
        invalidate_writes,
    );

    Router::new()
        .route(
            base,
            cached
                .clone()
                .apply(get(list::<T>))
                .post(create::<T>)
                .layer(invalidation.clone()),
        )
        .route(
            &format!("{base}/{{id}}"),
            cached
                .apply(get(show::<T>))
                .put(update::<T>)
                .delete(remove::<T>)
                .layer(invalidation),
        )
        .with_state(collection)
}

async fn list<T: Record>(
    State(collection): State<Arc<Collection<T>>>,
    Query(filter): Query<T::Filter>,
) -> Json<Vec<T>> {
    Json(collection.list_where(&filter).await)
}

async fn show<T: Record>(
    State(collection): State<Arc<Collection<T>>>,
    Path(id): Path<u64>,
) -> Result<Json<T>, AppError> {
    Ok(Json(collection.get(id).await?))
}

async fn create<T: Record + DeserializeOwned>(
    State(collection): State<Arc<Collection<T>>>,
    Json(record): Json<T>,
) -> Result<(StatusCode, Json<T>), AppError> {
    let created = collection.create(record).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn update<T: Record + DeserializeOwned>(
    State(collection): State<Arc<Collection<T>>>,
    Path(id): Path<u64>,
    Json(record): Json<T>,
) -> Result<Json<T>, AppError> {
    Ok(Json(collection.update(id, record).await?))
}

async fn remove<T: Record>(
    State(collection): State<Arc<Collection<T>>>,
    Path(id): Path<u64>,
) -> Result<Json<T>, AppError> {
    Ok(Json(collection.delete(id).await?))
}

/// Entries refreshed by the warming scheduler. Each target is a list
/// request the public router serves, so warmed keys match request keys.
pub fn warming_descriptors(catalog: &Catalog) -> Vec<WarmingDescriptor> {
    let inventory = catalog.inventory.clone();
    let events = catalog.events.clone();
    let members = catalog.members.clone();

    vec![
        WarmingDescriptor::new(
            INVENTORY_ROUTE,
            TtlTier::Long,
            query_source(move || {
                let inventory = inventory.clone();
                async move { Ok::<_, Infallible>(inventory.list().await) }
            }),
        ),
        WarmingDescriptor::new(
            format!("{EVENTS_ROUTE}?status=active"),
            TtlTier::Medium,
            query_source(move || {
                let events = events.clone();
                async move {
                    let filter = EventFilter {
                        status: Some(EventStatus::Active),
                    };
                    Ok::<_, Infallible>(events.list_where(&filter).await)
                }
            }),
        ),
        WarmingDescriptor::new(
            format!("{MEMBERS_ROUTE}?active=true"),
            TtlTier::Long,
            query_source(move || {
                let members = members.clone();
                async move {
                    let filter = MemberFilter { active: Some(true) };
                    Ok::<_, Infallible>(members.list_where(&filter).await)
                }
            }),
        ),
    ]
}
