//! Resilient handle over the configured [`CacheStore`].
//!
//! The client owns connection establishment. While it is connecting, or after
//! it has given up, every call fails fast with [`StoreError::Unavailable`]
//! and the cache layers fall through to the handlers.

use std::{
    future::Future,
    sync::{Arc, RwLock},
    time::Duration,
};

use bytes::Bytes;
use futures::{FutureExt, future::BoxFuture};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::StoreSettings;

use super::{
    lock::{rw_read, rw_write},
    redis_store::RedisStore,
    store::{CacheStore, MemoryStore, StoreError},
};

const SOURCE: &str = "cache::client";
const RETRY_STEP: Duration = Duration::from_millis(100);
const RETRY_CAP: Duration = Duration::from_millis(5000);

/// Capped linear backoff for connection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub step: Duration,
    pub cap: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            step: RETRY_STEP,
            cap: RETRY_CAP,
        }
    }

    /// Delay before attempt `retry + 1`.
    pub fn delay(&self, retry: u32) -> Duration {
        self.step.saturating_mul(retry).min(self.cap)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreStatus {
    Connecting,
    Ready,
    Unavailable,
}

enum BackendState {
    Connecting,
    Ready(Arc<dyn CacheStore>),
    Unavailable,
}

/// Cloneable, shared store handle. See the module docs.
#[derive(Clone)]
pub struct StoreClient {
    state: Arc<RwLock<BackendState>>,
}

impl StoreClient {
    fn with_state(state: BackendState) -> Self {
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    pub fn from_store(store: impl CacheStore + 'static) -> Self {
        Self::with_state(BackendState::Ready(Arc::new(store)))
    }

    pub fn memory() -> Self {
        Self::from_store(MemoryStore::new())
    }

    /// A client whose every call fails with [`StoreError::Unavailable`].
    pub fn unavailable() -> Self {
        Self::with_state(BackendState::Unavailable)
    }

    /// Connect using `settings`, retrying per [`RetryPolicy`]. Always returns
    /// a client; it is unavailable if every attempt failed.
    pub async fn connect(settings: &StoreSettings) -> Self {
        let client = Self::with_state(BackendState::Connecting);
        client
            .establish(connector(settings), RetryPolicy::new(settings.max_retries))
            .await;
        client
    }

    /// Return immediately and connect on a spawned task.
    pub fn connect_in_background(settings: &StoreSettings) -> (Self, JoinHandle<()>) {
        Self::spawn_with(connector(settings), RetryPolicy::new(settings.max_retries))
    }

    /// Background connection through a custom connector.
    pub fn spawn_with<F, Fut>(connect: F, policy: RetryPolicy) -> (Self, JoinHandle<()>)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Arc<dyn CacheStore>, StoreError>> + Send,
    {
        let client = Self::with_state(BackendState::Connecting);
        let task_client = client.clone();
        let handle = tokio::spawn(async move { task_client.establish(connect, policy).await });
        (client, handle)
    }

    async fn establish<F, Fut>(&self, connect: F, policy: RetryPolicy)
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Arc<dyn CacheStore>, StoreError>>,
    {
        let mut retry = 0_u32;
        info!(target: "clubhouse::cache::client", "connecting to cache store");

        loop {
            match connect().await {
                Ok(store) => {
                    info!(
                        target: "clubhouse::cache::client",
                        backend = store.backend(),
                        retries = retry,
                        "cache store connected"
                    );
                    *rw_write(&self.state, SOURCE, "establish") = BackendState::Ready(store);
                    return;
                }
                Err(err) => {
                    retry += 1;
                    if retry > policy.max_retries {
                        error!(
                            target: "clubhouse::cache::client",
                            retries = retry - 1,
                            error = %err,
                            "cache store unreachable, continuing without cache"
                        );
                        *rw_write(&self.state, SOURCE, "establish") = BackendState::Unavailable;
                        return;
                    }

                    let delay = policy.delay(retry);
                    warn!(
                        target: "clubhouse::cache::client",
                        retry,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "cache store connection failed, reconnecting"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    pub fn status(&self) -> StoreStatus {
        match &*rw_read(&self.state, SOURCE, "status") {
            BackendState::Connecting => StoreStatus::Connecting,
            BackendState::Ready(_) => StoreStatus::Ready,
            BackendState::Unavailable => StoreStatus::Unavailable,
        }
    }

    fn store(&self) -> Result<Arc<dyn CacheStore>, StoreError> {
        match &*rw_read(&self.state, SOURCE, "store") {
            BackendState::Ready(store) => Ok(Arc::clone(store)),
            BackendState::Connecting | BackendState::Unavailable => Err(StoreError::Unavailable),
        }
    }

    pub async fn get(&self, key: &str) -> Result<Option<Bytes>, StoreError> {
        let result = match self.store() {
            Ok(store) => store.get(key).await,
            Err(err) => Err(err),
        };
        result.inspect_err(|err| {
            error!(target: "clubhouse::cache::client", key, error = %err, "cache get failed")
        })
    }

    pub async fn set_ex(&self, key: &str, ttl: Duration, value: Bytes) -> Result<(), StoreError> {
        let result = match self.store() {
            Ok(store) => store.set_ex(key, value, ttl).await,
            Err(err) => Err(err),
        };
        result.inspect_err(|err| {
            error!(
                target: "clubhouse::cache::client",
                key,
                ttl_secs = ttl.as_secs(),
                error = %err,
                "cache set failed"
            )
        })
    }

    pub async fn delete(&self, keys: &[String]) -> Result<u64, StoreError> {
        let result = match self.store() {
            Ok(store) => store.delete(keys).await,
            Err(err) => Err(err),
        };
        result.inspect_err(|err| {
            error!(
                target: "clubhouse::cache::client",
                keys = keys.len(),
                error = %err,
                "cache delete failed"
            )
        })
    }

    pub async fn keys(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let result = match self.store() {
            Ok(store) => store.keys(pattern).await,
            Err(err) => Err(err),
        };
        result.inspect_err(|err| {
            error!(target: "clubhouse::cache::client", pattern, error = %err, "cache keys failed")
        })
    }

    pub async fn flush(&self, prefix: &str) -> Result<u64, StoreError> {
        let result = match self.store() {
            Ok(store) => store.flush(prefix).await,
            Err(err) => Err(err),
        };
        result.inspect_err(|err| {
            error!(target: "clubhouse::cache::client", prefix, error = %err, "cache flush failed")
        })
    }
}

type PendingStore = BoxFuture<'static, Result<Arc<dyn CacheStore>, StoreError>>;

fn connector(settings: &StoreSettings) -> impl Fn() -> PendingStore + Send + Sync + 'static {
    let url = settings.url.clone();
    let timeout = settings.timeout;
    // One memory store per client, so retries do not discard entries.
    let memory = MemoryStore::new();

    move || {
        let url = url.clone();
        let memory = memory.clone();
        async move { open_backend(&url, timeout, memory).await }.boxed()
    }
}

async fn open_backend(
    url: &str,
    timeout: Duration,
    memory: MemoryStore,
) -> Result<Arc<dyn CacheStore>, StoreError> {
    if url.starts_with("memory://") {
        return Ok(Arc::new(memory));
    }
    if url.starts_with("redis://") || url.starts_with("rediss://") {
        let store = RedisStore::connect(url, timeout).await?;
        return Ok(Arc::new(store));
    }
    Err(StoreError::Connection(format!(
        "unsupported cache store url scheme: {url}"
    )))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[test]
    fn backoff_is_linear_and_capped() {
        let policy = RetryPolicy::new(10);
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(7), Duration::from_millis(700));
        assert_eq!(policy.delay(50), Duration::from_millis(5000));
        assert_eq!(policy.delay(u32::MAX), Duration::from_millis(5000));
    }

    #[tokio::test]
    async fn unavailable_client_fails_fast() {
        let client = StoreClient::unavailable();
        assert_eq!(client.status(), StoreStatus::Unavailable);
        assert!(matches!(
            client.get("cache:/a").await,
            Err(StoreError::Unavailable)
        ));
        assert!(matches!(
            client.delete(&["cache:/a".to_string()]).await,
            Err(StoreError::Unavailable)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let (client, handle) = StoreClient::spawn_with(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<Arc<dyn CacheStore>, _>(StoreError::Connection("refused".to_string())) }
            },
            RetryPolicy::new(3),
        );

        assert_eq!(client.status(), StoreStatus::Connecting);
        handle.await.expect("connect task");

        assert_eq!(attempts.load(Ordering::SeqCst), 4);
        assert_eq!(client.status(), StoreStatus::Unavailable);
    }

    #[tokio::test(start_paused = true)]
    async fn connects_after_transient_failures() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        let (client, handle) = StoreClient::spawn_with(
            move || {
                let attempt = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(StoreError::Connection("refused".to_string()))
                    } else {
                        Ok(Arc::new(MemoryStore::new()) as Arc<dyn CacheStore>)
                    }
                }
            },
            RetryPolicy::new(10),
        );

        assert!(matches!(
            client.get("cache:/a").await,
            Err(StoreError::Unavailable)
        ));
        handle.await.expect("connect task");

        assert_eq!(client.status(), StoreStatus::Ready);
        client
            .set_ex("cache:/a", Duration::from_secs(5), Bytes::from_static(b"1"))
            .await
            .expect("set");
        assert!(client.get("cache:/a").await.expect("get").is_some());
    }

    #[tokio::test]
    async fn memory_url_selects_memory_backend() {
        let settings = StoreSettings {
            url: "memory://".to_string(),
            max_retries: 0,
            timeout: Duration::from_secs(1),
        };
        let client = StoreClient::connect(&settings).await;
        assert_eq!(client.status(), StoreStatus::Ready);
    }

    #[tokio::test]
    async fn unknown_scheme_is_unavailable() {
        let settings = StoreSettings {
            url: "ftp://localhost".to_string(),
            max_retries: 0,
            timeout: Duration::from_secs(1),
        };
        let client = StoreClient::connect(&settings).await;
        assert_eq!(client.status(), StoreStatus::Unavailable);
    }
}
