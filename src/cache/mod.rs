//! Clubhouse response cache.
//!
//! A cache-aside layer in front of the JSON handlers, backed by Redis:
//!
//! - [`read_through`] serves stored bodies for GET requests,
//! - [`write_capture`] persists handler responses after a miss,
//! - [`invalidate_writes`] deletes affected entries after successful writes,
//! - [`CacheWarmer`] pre-populates entries on a timer,
//! - [`CacheStats`] counts hits, misses and errors.
//!
//! Every layer goes through [`StoreClient`], which fails open: when the store
//! is unreachable, requests are served by the handlers as if nothing was
//! cached.
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! enabled = true
//! warming_enabled = true
//! stats_enabled = true
//! prefix = "cache:"
//!
//! [cache.ttl]
//! short = 300
//! medium = 1800
//! long = 3600
//! very_long = 86400
//! ```

mod capture;
mod client;
pub(crate) mod config;
mod invalidate;
mod keys;
mod lock;
mod middleware;
mod redis_store;
mod stats;
pub mod store;
mod warmer;

pub use capture::{CaptureError, buffer_response, should_store_response, write_capture};
pub use client::{RetryPolicy, StoreClient, StoreStatus};
pub use config::{CacheConfig, TtlTier, TtlTiers};
pub use invalidate::{
    Invalidation, InvalidationReport, PatternResolver, ResolveError, invalidate_writes,
};
pub use keys::{KeyBuilder, RequestDescriptor};
pub use middleware::{
    CacheOutcome, CachePolicy, CacheState, CacheTicket, CachedRoute, read_through,
};
pub use redis_store::RedisStore;
pub use stats::{
    CacheStats, METRIC_CACHE_ERROR_TOTAL, METRIC_CACHE_HIT_TOTAL, METRIC_CACHE_MISS_TOTAL,
    METRIC_CACHE_WARM_MS, StatsSnapshot,
};
pub use store::{CacheStore, MemoryStore, StoreError};
pub use warmer::{
    CacheWarmError, CacheWarmer, DataSource, SourceError, WarmReport, WarmingDescriptor,
    query_source,
};
