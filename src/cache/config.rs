//! Cache configuration.
//!
//! Controls TTL tiers, key namespace and feature toggles of the response
//! cache. Values are resolved once at startup (see `crate::config`) and never
//! change afterwards.

use std::time::Duration;

use super::store::escape_glob;

// Default values for cache configuration
pub const DEFAULT_TTL_SHORT_SECS: u64 = 300;
pub const DEFAULT_TTL_MEDIUM_SECS: u64 = 1800;
pub const DEFAULT_TTL_LONG_SECS: u64 = 3600;
pub const DEFAULT_TTL_VERY_LONG_SECS: u64 = 86_400;
pub const DEFAULT_PREFIX: &str = "cache:";
pub const DEFAULT_EXCLUDED_PARAMS: [&str; 3] = ["auth", "token", "api_key"];
pub const DEFAULT_WARM_INITIAL_DELAY_SECS: u64 = 10;
pub const DEFAULT_WARM_INTERVAL_SECS: u64 = 30 * 60;
pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// Named expiration tiers. Routes pick a tier; the tier's length comes from
/// configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TtlTier {
    Short,
    Medium,
    Long,
    VeryLong,
}

/// Seconds for each [`TtlTier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlTiers {
    pub short: u64,
    pub medium: u64,
    pub long: u64,
    pub very_long: u64,
}

impl Default for TtlTiers {
    fn default() -> Self {
        Self {
            short: DEFAULT_TTL_SHORT_SECS,
            medium: DEFAULT_TTL_MEDIUM_SECS,
            long: DEFAULT_TTL_LONG_SECS,
            very_long: DEFAULT_TTL_VERY_LONG_SECS,
        }
    }
}

impl TtlTiers {
    pub fn seconds(&self, tier: TtlTier) -> u64 {
        match tier {
            TtlTier::Short => self.short,
            TtlTier::Medium => self.medium,
            TtlTier::Long => self.long,
            TtlTier::VeryLong => self.very_long,
        }
    }

    pub fn duration(&self, tier: TtlTier) -> Duration {
        Duration::from_secs(self.seconds(tier))
    }
}

/// Response cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Master switch. When off, no middleware touches the store.
    pub enabled: bool,
    /// Run the warming scheduler.
    pub warming_enabled: bool,
    /// Count hits, misses and errors.
    pub stats_enabled: bool,
    pub ttl: TtlTiers,
    /// Namespace prepended to every key written by the cache.
    pub prefix: String,
    /// Query parameters ignored when deriving keys.
    pub excluded_params: Vec<String>,
    /// Responses with larger bodies are passed through uncached.
    pub max_body_bytes: usize,
    pub warm_initial_delay: Duration,
    pub warm_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            warming_enabled: false,
            stats_enabled: false,
            ttl: TtlTiers::default(),
            prefix: DEFAULT_PREFIX.to_string(),
            excluded_params: DEFAULT_EXCLUDED_PARAMS
                .iter()
                .map(|param| param.to_string())
                .collect(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            warm_initial_delay: Duration::from_secs(DEFAULT_WARM_INITIAL_DELAY_SECS),
            warm_interval: Duration::from_secs(DEFAULT_WARM_INTERVAL_SECS),
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            warming_enabled: settings.warming_enabled,
            stats_enabled: settings.stats_enabled,
            ttl: settings.ttl,
            prefix: settings.prefix.clone(),
            excluded_params: settings.excluded_params.clone(),
            max_body_bytes: settings.max_body_bytes,
            warm_initial_delay: settings.warm_initial_delay,
            warm_interval: settings.warm_interval,
        }
    }
}

impl CacheConfig {
    /// Returns true when the warming scheduler should run.
    ///
    /// Warming feeds entries that only the read path consumes, so it is
    /// skipped while the cache itself is disabled.
    pub fn should_warm(&self) -> bool {
        self.enabled && self.warming_enabled
    }

    /// Prepend the namespace unless `key` already carries it.
    pub fn namespaced(&self, key: &str) -> String {
        if key.starts_with(&self.prefix) {
            key.to_string()
        } else {
            format!("{}{}", self.prefix, key)
        }
    }

    /// Prepend the namespace to a glob `pattern`. The prefix is escaped so
    /// its own metacharacters only match themselves.
    pub fn namespaced_pattern(&self, pattern: &str) -> String {
        let pattern = pattern.strip_prefix(self.prefix.as_str()).unwrap_or(pattern);
        format!("{}{}", escape_glob(&self.prefix), pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CacheConfig::default();
        assert!(!config.enabled);
        assert!(!config.warming_enabled);
        assert!(!config.stats_enabled);
        assert_eq!(config.ttl.short, 300);
        assert_eq!(config.ttl.medium, 1800);
        assert_eq!(config.ttl.long, 3600);
        assert_eq!(config.ttl.very_long, 86_400);
        assert_eq!(config.prefix, "cache:");
        assert_eq!(config.excluded_params, vec!["auth", "token", "api_key"]);
        assert_eq!(config.warm_initial_delay, Duration::from_secs(10));
        assert_eq!(config.warm_interval, Duration::from_secs(1800));
    }

    #[test]
    fn tiers_resolve_to_configured_seconds() {
        let tiers = TtlTiers {
            short: 1,
            medium: 2,
            long: 3,
            very_long: 4,
        };
        assert_eq!(tiers.seconds(TtlTier::Short), 1);
        assert_eq!(tiers.seconds(TtlTier::Medium), 2);
        assert_eq!(tiers.seconds(TtlTier::Long), 3);
        assert_eq!(tiers.duration(TtlTier::VeryLong), Duration::from_secs(4));
    }

    #[test]
    fn warming_requires_cache_enabled() {
        let config = CacheConfig {
            warming_enabled: true,
            ..Default::default()
        };
        assert!(!config.should_warm());

        let config = CacheConfig {
            enabled: true,
            warming_enabled: true,
            ..Default::default()
        };
        assert!(config.should_warm());
    }

    #[test]
    fn namespaced_does_not_double_prefix() {
        let config = CacheConfig::default();
        assert_eq!(config.namespaced("/inventory"), "cache:/inventory");
        assert_eq!(config.namespaced("cache:/inventory"), "cache:/inventory");
    }

    #[test]
    fn namespaced_pattern_escapes_prefix() {
        let config = CacheConfig {
            prefix: "app?:".to_string(),
            ..Default::default()
        };
        assert_eq!(config.namespaced_pattern("/events*"), "app\\?:/events*");
        assert_eq!(config.namespaced_pattern("app?:/events*"), "app\\?:/events*");
        assert_eq!(
            CacheConfig::default().namespaced_pattern("/events*"),
            "cache:/events*"
        );
    }
}
