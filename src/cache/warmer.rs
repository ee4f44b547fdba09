//! Proactive cache population.
//!
//! A [`CacheWarmer`] owns a static list of [`WarmingDescriptor`]s. Each pass
//! loads every descriptor's data source concurrently and writes the JSON under
//! the same key a GET for the descriptor's target would use.

use std::{future::Future, sync::Arc, time::Instant};

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use metrics::histogram;
use serde::Serialize;
use thiserror::Error;
use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{
    TtlTier, keys::RequestDescriptor, middleware::CacheState, stats::METRIC_CACHE_WARM_MS,
    store::StoreError,
};

pub type SourceError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum CacheWarmError {
    #[error("data source for `{target}` failed: {source}")]
    Source {
        target: String,
        #[source]
        source: SourceError,
    },
    #[error("failed to store warmed entry `{key}`: {source}")]
    Store {
        key: String,
        #[source]
        source: StoreError,
    },
}

/// Produces the JSON body cached for a warming target.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn load(&self) -> Result<Bytes, SourceError>;
}

struct QuerySource<F>(F);

#[async_trait]
impl<F, Fut, T, E> DataSource for QuerySource<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, E>> + Send,
    T: Serialize + Send,
    E: Into<SourceError> + Send,
{
    async fn load(&self) -> Result<Bytes, SourceError> {
        let rows = (self.0)().await.map_err(Into::into)?;
        // Straight to bytes so field order matches what the handler emits.
        Ok(Bytes::from(serde_json::to_vec(&rows)?))
    }
}

/// Adapt an async query into a [`DataSource`].
pub fn query_source<F, Fut, T, E>(query: F) -> Arc<dyn DataSource>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Serialize + Send + 'static,
    E: Into<SourceError> + Send + 'static,
{
    Arc::new(QuerySource(query))
}

#[derive(Clone)]
pub struct WarmingDescriptor {
    /// Request target the entry serves, e.g. `/api/v1/club-member?active=true`.
    pub target: String,
    pub ttl: TtlTier,
    pub source: Arc<dyn DataSource>,
}

impl WarmingDescriptor {
    pub fn new(target: impl Into<String>, ttl: TtlTier, source: Arc<dyn DataSource>) -> Self {
        Self {
            target: target.into(),
            ttl,
            source,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WarmReport {
    pub warmed: usize,
    pub failed: usize,
}

#[derive(Clone)]
pub struct CacheWarmer {
    cache: CacheState,
    descriptors: Arc<[WarmingDescriptor]>,
}

impl CacheWarmer {
    pub fn new(cache: CacheState, descriptors: Vec<WarmingDescriptor>) -> Self {
        Self {
            cache,
            descriptors: descriptors.into(),
        }
    }

    /// Key a GET for the descriptor's target reads.
    pub fn key_for(&self, descriptor: &WarmingDescriptor) -> String {
        self.cache
            .key_builder()
            .build(&RequestDescriptor::from_target(&descriptor.target))
    }

    pub async fn warm_one(&self, descriptor: &WarmingDescriptor) -> Result<String, CacheWarmError> {
        let body = descriptor
            .source
            .load()
            .await
            .map_err(|source| CacheWarmError::Source {
                target: descriptor.target.clone(),
                source,
            })?;

        let key = self.key_for(descriptor);
        let ttl = self.cache.config.ttl.duration(descriptor.ttl);
        self.cache
            .store
            .set_ex(&key, ttl, body)
            .await
            .map_err(|source| CacheWarmError::Store {
                key: key.clone(),
                source,
            })?;

        debug!(
            target: "clubhouse::cache::warmer",
            key = %key,
            ttl_secs = ttl.as_secs(),
            "cache entry warmed"
        );
        Ok(key)
    }

    /// Run every descriptor once. Failures are isolated per descriptor.
    pub async fn warm_all(&self) -> WarmReport {
        let started_at = Instant::now();
        info!(
            target: "clubhouse::cache::warmer",
            descriptors = self.descriptors.len(),
            "warming cache"
        );

        let results = join_all(
            self.descriptors
                .iter()
                .map(|descriptor| self.warm_one(descriptor)),
        )
        .await;

        let mut report = WarmReport::default();
        for result in results {
            match result {
                Ok(_) => report.warmed += 1,
                Err(err) => {
                    if matches!(err, CacheWarmError::Store { .. }) {
                        self.cache.stats.record_error();
                    }
                    warn!(
                        target: "clubhouse::cache::warmer",
                        error = %err,
                        "cache warm failed"
                    );
                    report.failed += 1;
                }
            }
        }

        histogram!(METRIC_CACHE_WARM_MS).record(started_at.elapsed().as_secs_f64() * 1000.0);
        info!(
            target: "clubhouse::cache::warmer",
            warmed = report.warmed,
            failed = report.failed,
            "cache warm pass finished"
        );
        report
    }

    /// Start the periodic scheduler, or return `None` when warming is off.
    ///
    /// The first pass runs after the configured initial delay, then once per
    /// interval.
    pub fn spawn(self) -> Option<JoinHandle<()>> {
        let config = Arc::clone(&self.cache.config);
        if !config.should_warm() {
            info!(
                target: "clubhouse::cache::warmer",
                cache_enabled = config.enabled,
                warming_enabled = config.warming_enabled,
                "cache warming disabled"
            );
            return None;
        }

        Some(tokio::spawn(async move {
            let start = tokio::time::Instant::now() + config.warm_initial_delay;
            let mut ticks = tokio::time::interval_at(start, config.warm_interval);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticks.tick().await;
                self.warm_all().await;
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use serde_json::json;

    use super::*;
    use crate::cache::{CacheConfig, StoreClient};

    fn cache(enabled: bool, warming: bool) -> CacheState {
        CacheState::new(
            CacheConfig {
                enabled,
                warming_enabled: warming,
                stats_enabled: true,
                ..Default::default()
            },
            StoreClient::memory(),
        )
    }

    fn fixed(value: serde_json::Value) -> Arc<dyn DataSource> {
        query_source(move || {
            let value = value.clone();
            async move { Ok::<_, io::Error>(value) }
        })
    }

    #[tokio::test]
    async fn warmed_key_matches_request_key() {
        let cache = cache(true, true);
        let warmer = CacheWarmer::new(
            cache.clone(),
            vec![WarmingDescriptor::new(
                "/api/v1/club-member?active=true",
                TtlTier::Long,
                fixed(json!([{"id": 1}])),
            )],
        );

        let report = warmer.warm_all().await;
        assert_eq!(report, WarmReport { warmed: 1, failed: 0 });

        let key = cache
            .key_builder()
            .build(&RequestDescriptor::from_target("/api/v1/club-member?active=true"));
        assert_eq!(key, "cache:/api/v1/club-member?active=true");
        let stored = cache.store.get(&key).await.expect("get");
        assert_eq!(stored, Some(Bytes::from_static(b"[{\"id\":1}]")));
    }

    #[tokio::test]
    async fn query_source_keeps_field_order() {
        #[derive(Serialize)]
        struct Row {
            name: &'static str,
            id: u64,
        }

        let source = query_source(|| async {
            Ok::<_, io::Error>(vec![Row { name: "Ada", id: 1 }])
        });
        let body = source.load().await.expect("load");
        assert_eq!(body, Bytes::from_static(br#"[{"name":"Ada","id":1}]"#));
    }

    #[tokio::test]
    async fn failing_source_is_isolated() {
        let cache = cache(true, true);
        let broken = query_source(|| async {
            Err::<Vec<u8>, _>(io::Error::other("database down"))
        });
        let warmer = CacheWarmer::new(
            cache.clone(),
            vec![
                WarmingDescriptor::new("/broken", TtlTier::Short, broken),
                WarmingDescriptor::new("/ok", TtlTier::Short, fixed(json!({"ok": true}))),
            ],
        );

        let report = warmer.warm_all().await;
        assert_eq!(report, WarmReport { warmed: 1, failed: 1 });
        assert!(cache.store.get("cache:/ok").await.expect("get").is_some());
        assert!(cache.store.get("cache:/broken").await.expect("get").is_none());
    }

    #[tokio::test]
    async fn store_failure_is_counted() {
        let cache = CacheState::new(
            CacheConfig {
                enabled: true,
                stats_enabled: true,
                ..Default::default()
            },
            StoreClient::unavailable(),
        );
        let warmer = CacheWarmer::new(
            cache.clone(),
            vec![WarmingDescriptor::new("/ok", TtlTier::Short, fixed(json!([])))],
        );

        assert_eq!(warmer.warm_all().await.failed, 1);
        assert_eq!(cache.stats.snapshot().errors, 1);
    }

    #[tokio::test]
    async fn disabled_warming_does_not_spawn() {
        assert!(CacheWarmer::new(cache(true, false), Vec::new()).spawn().is_none());
        assert!(CacheWarmer::new(cache(false, true), Vec::new()).spawn().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn scheduler_runs_after_delay_then_every_interval() {
        let cache = cache(true, true);
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&loads);
        let source = query_source(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, io::Error>(json!([])) }
        });
        let handle = CacheWarmer::new(
            cache.clone(),
            vec![WarmingDescriptor::new("/inventory", TtlTier::Long, source)],
        )
        .spawn()
        .expect("warming enabled");

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert_eq!(loads.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(cache.store.get("cache:/inventory").await.expect("get").is_some());

        tokio::time::sleep(Duration::from_secs(30 * 60)).await;
        assert_eq!(loads.load(Ordering::SeqCst), 2);

        handle.abort();
    }
}
