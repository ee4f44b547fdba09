//! Configuration layer: typed settings with layered precedence
//! (file → `CLUBHOUSE__*` env → flat `CACHE_*`/`REDIS_URL` env → CLI).

use std::{net::SocketAddr, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::{
    TtlTiers,
    config::{
        DEFAULT_EXCLUDED_PARAMS, DEFAULT_MAX_BODY_BYTES, DEFAULT_PREFIX,
        DEFAULT_WARM_INITIAL_DELAY_SECS, DEFAULT_WARM_INTERVAL_SECS,
    },
};

mod cli;

pub use cli::{
    CacheArgs, CacheCommand, CacheKeysArgs, CliArgs, Command, ServeArgs, ServeOverrides,
    StoreOverride,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "clubhouse";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_ADMIN_HOST: &str = "127.0.0.1";
const DEFAULT_PUBLIC_PORT: u16 = 3000;
const DEFAULT_ADMIN_PORT: u16 = 3001;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";
const DEFAULT_STORE_MAX_RETRIES: u32 = 10;
const DEFAULT_STORE_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub store: StoreSettings,
    pub cache: CacheSettings,
    /// Unprefixed variables that were set but could not be parsed.
    pub ignored_env: Vec<IgnoredEnv>,
}

/// A malformed `CACHE_*` variable. The setting keeps its file or default
/// value and the variable is reported once logging is up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoredEnv {
    pub name: &'static str,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub public_addr: SocketAddr,
    /// Admin routes (cache flush, key listing) are only served here.
    pub admin_addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub url: String,
    /// Connection attempts after the first before the store is given up on.
    pub max_retries: u32,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub warming_enabled: bool,
    pub stats_enabled: bool,
    pub ttl: TtlTiers,
    pub prefix: String,
    pub excluded_params: Vec<String>,
    pub max_body_bytes: usize,
    pub warm_initial_delay: Duration,
    pub warm_interval: Duration,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix("CLUBHOUSE")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("cache.excluded_params")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    let ignored_env = raw.apply_flat_env(read_flat_env(None)?);

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Cache(args)) => raw.apply_store_override(&args.store),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    let mut settings = Settings::from_raw(raw)?;
    settings.ignored_env = ignored_env;
    Ok(settings)
}

pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

/// The unprefixed variables operators already use for the cache.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawFlatEnv {
    cache_ttl_short: Option<String>,
    cache_ttl_medium: Option<String>,
    cache_ttl_long: Option<String>,
    cache_ttl_very_long: Option<String>,
    cache_prefix: Option<String>,
    cache_enabled: Option<String>,
    cache_warming_enabled: Option<String>,
    cache_stats_enabled: Option<String>,
    redis_url: Option<String>,
}

/// Parse a flat variable, recording it in `ignored` when malformed.
fn parse_flat<T: FromStr>(
    name: &'static str,
    value: Option<String>,
    ignored: &mut Vec<IgnoredEnv>,
) -> Option<T> {
    let value = value?;
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            ignored.push(IgnoredEnv { name, value });
            None
        }
    }
}

fn parse_flat_ttl(
    name: &'static str,
    value: Option<String>,
    ignored: &mut Vec<IgnoredEnv>,
) -> Option<u64> {
    match parse_flat(name, value, ignored) {
        Some(0) => {
            ignored.push(IgnoredEnv {
                name,
                value: "0".to_string(),
            });
            None
        }
        ttl => ttl,
    }
}

/// Read `CACHE_*` and `REDIS_URL`. `source` replaces the process environment.
fn read_flat_env(source: Option<config::Map<String, String>>) -> Result<RawFlatEnv, LoadError> {
    let flat = Config::builder()
        .add_source(Environment::default().source(source))
        .build()?
        .try_deserialize()?;
    Ok(flat)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    store: RawStoreSettings,
    cache: RawCacheSettings,
}

impl RawSettings {
    /// Layer the flat variables over file values. Malformed ones are
    /// skipped and returned.
    fn apply_flat_env(&mut self, flat: RawFlatEnv) -> Vec<IgnoredEnv> {
        let mut ignored = Vec::new();

        let ttl = &mut self.cache.ttl;
        ttl.short = parse_flat_ttl("CACHE_TTL_SHORT", flat.cache_ttl_short, &mut ignored)
            .or(ttl.short);
        ttl.medium = parse_flat_ttl("CACHE_TTL_MEDIUM", flat.cache_ttl_medium, &mut ignored)
            .or(ttl.medium);
        ttl.long =
            parse_flat_ttl("CACHE_TTL_LONG", flat.cache_ttl_long, &mut ignored).or(ttl.long);
        ttl.very_long =
            parse_flat_ttl("CACHE_TTL_VERY_LONG", flat.cache_ttl_very_long, &mut ignored)
                .or(ttl.very_long);

        let cache = &mut self.cache;
        cache.prefix = flat.cache_prefix.or(cache.prefix.take());
        cache.enabled =
            parse_flat("CACHE_ENABLED", flat.cache_enabled, &mut ignored).or(cache.enabled);
        cache.warming_enabled =
            parse_flat("CACHE_WARMING_ENABLED", flat.cache_warming_enabled, &mut ignored)
                .or(cache.warming_enabled);
        cache.stats_enabled =
            parse_flat("CACHE_STATS_ENABLED", flat.cache_stats_enabled, &mut ignored)
                .or(cache.stats_enabled);

        self.store.url = flat.redis_url.or(self.store.url.take());
        ignored
    }

    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(host) = overrides.server_admin_host.as_ref() {
            self.server.admin_host = Some(host.clone());
        }
        if let Some(port) = overrides.public_port {
            self.server.public_port = Some(port);
        }
        if let Some(port) = overrides.admin_port {
            self.server.admin_port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
        if let Some(enabled) = overrides.cache_warming_enabled {
            self.cache.warming_enabled = Some(enabled);
        }
        if let Some(enabled) = overrides.cache_stats_enabled {
            self.cache.stats_enabled = Some(enabled);
        }

        self.apply_store_override(&overrides.store);
    }

    fn apply_store_override(&mut self, overrides: &StoreOverride) {
        if let Some(url) = overrides.redis_url.as_ref() {
            self.store.url = Some(url.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            store,
            cache,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            store: build_store_settings(store)?,
            cache: build_cache_settings(cache)?,
            ignored_env: Vec::new(),
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let admin_host = server
        .admin_host
        .unwrap_or_else(|| DEFAULT_ADMIN_HOST.to_string());

    let public_port = non_zero_port(server.public_port, DEFAULT_PUBLIC_PORT, "server.public_port")?;
    let admin_port = non_zero_port(server.admin_port, DEFAULT_ADMIN_PORT, "server.admin_port")?;

    let public_addr = parse_socket_addr(&host, public_port)
        .map_err(|reason| LoadError::invalid("server.public_addr", reason))?;
    let admin_addr = parse_socket_addr(&admin_host, admin_port)
        .map_err(|reason| LoadError::invalid("server.admin_addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    let graceful_shutdown = non_zero_secs(graceful_secs, "server.graceful_shutdown_seconds")?;

    Ok(ServerSettings {
        public_addr,
        admin_addr,
        graceful_shutdown,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_store_settings(store: RawStoreSettings) -> Result<StoreSettings, LoadError> {
    let url = store
        .url
        .map(|value| value.trim().to_string())
        .unwrap_or_else(|| DEFAULT_REDIS_URL.to_string());
    if url.is_empty() {
        return Err(LoadError::invalid("store.url", "url must not be empty"));
    }

    let timeout_ms = store.timeout_ms.unwrap_or(DEFAULT_STORE_TIMEOUT_MS);
    if timeout_ms == 0 {
        return Err(LoadError::invalid(
            "store.timeout_ms",
            "must be greater than zero",
        ));
    }

    Ok(StoreSettings {
        url,
        max_retries: store.max_retries.unwrap_or(DEFAULT_STORE_MAX_RETRIES),
        timeout: Duration::from_millis(timeout_ms),
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let defaults = TtlTiers::default();
    let ttl = TtlTiers {
        short: non_zero_ttl(cache.ttl.short, defaults.short, "cache.ttl.short")?,
        medium: non_zero_ttl(cache.ttl.medium, defaults.medium, "cache.ttl.medium")?,
        long: non_zero_ttl(cache.ttl.long, defaults.long, "cache.ttl.long")?,
        very_long: non_zero_ttl(cache.ttl.very_long, defaults.very_long, "cache.ttl.very_long")?,
    };

    let prefix = cache.prefix.unwrap_or_else(|| DEFAULT_PREFIX.to_string());
    if prefix.is_empty() {
        return Err(LoadError::invalid(
            "cache.prefix",
            "prefix must not be empty",
        ));
    }

    let excluded_params = cache
        .excluded_params
        .unwrap_or_else(|| {
            DEFAULT_EXCLUDED_PARAMS
                .iter()
                .map(|param| param.to_string())
                .collect()
        })
        .into_iter()
        .map(|param| param.trim().to_string())
        .filter(|param| !param.is_empty())
        .collect();

    let max_body_bytes = cache.max_body_bytes.unwrap_or(DEFAULT_MAX_BODY_BYTES);
    if max_body_bytes == 0 {
        return Err(LoadError::invalid(
            "cache.max_body_bytes",
            "must be greater than zero",
        ));
    }

    let warm_initial_delay = Duration::from_secs(
        cache
            .warm_initial_delay_seconds
            .unwrap_or(DEFAULT_WARM_INITIAL_DELAY_SECS),
    );
    let warm_interval = non_zero_secs(
        cache
            .warm_interval_seconds
            .unwrap_or(DEFAULT_WARM_INTERVAL_SECS),
        "cache.warm_interval_seconds",
    )?;

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(false),
        warming_enabled: cache.warming_enabled.unwrap_or(false),
        stats_enabled: cache.stats_enabled.unwrap_or(false),
        ttl,
        prefix,
        excluded_params,
        max_body_bytes,
        warm_initial_delay,
        warm_interval,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    admin_host: Option<String>,
    public_port: Option<u16>,
    admin_port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStoreSettings {
    url: Option<String>,
    max_retries: Option<u32>,
    timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    warming_enabled: Option<bool>,
    stats_enabled: Option<bool>,
    ttl: RawTtlSettings,
    prefix: Option<String>,
    excluded_params: Option<Vec<String>>,
    max_body_bytes: Option<usize>,
    warm_initial_delay_seconds: Option<u64>,
    warm_interval_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawTtlSettings {
    short: Option<u64>,
    medium: Option<u64>,
    long: Option<u64>,
    very_long: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_port(value: Option<u16>, default: u16, key: &'static str) -> Result<u16, LoadError> {
    match value.unwrap_or(default) {
        0 => Err(LoadError::invalid(key, "port must be greater than zero")),
        port => Ok(port),
    }
}

fn non_zero_secs(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(value))
}

fn non_zero_ttl(value: Option<u64>, default: u64, key: &'static str) -> Result<u64, LoadError> {
    match value.unwrap_or(default) {
        0 => Err(LoadError::invalid(key, "ttl must be greater than zero")),
        seconds => Ok(seconds),
    }
}
