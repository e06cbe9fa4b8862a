//! Configuration for the cache system

use crate::error::{CacheError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Configuration for the cache manager
///
/// Lock timings bound how long a caller can block: at most
/// `(lock_max_retries + 1)` attempts spaced by `lock_retry_delay`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Prefix applied to every key written to the backing store
    pub key_prefix: String,

    /// Time-to-live for entries set without an explicit TTL
    pub default_ttl: Duration,

    /// TTL jitter factor (0.0 - 1.0) applied to `default_ttl`
    /// Spreads out expiry of entries written together
    pub ttl_jitter: f64,

    /// Lifetime of a lock record before the store expires it
    pub lock_ttl: Duration,

    /// Delay between lock acquisition attempts
    pub lock_retry_delay: Duration,

    /// Number of retries after the first failed attempt
    pub lock_max_retries: u32,

    /// Keys deleted per pipeline during tag invalidation
    pub batch_size: usize,

    /// Dependency graph is reset wholesale beyond this many sources
    pub max_dependency_entries: usize,

    /// Pending-operation map is cleared by `cleanup()` beyond this size
    pub max_pending_operations: usize,

    /// Enable the periodic cleanup task
    pub enable_auto_cleanup: bool,

    /// Interval for automatic cleanup
    pub cleanup_interval: Duration,

    /// Upper bound on how long `shutdown()` waits for in-flight operations
    pub shutdown_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            key_prefix: "cache:".to_string(),
            // 1 hour default TTL
            default_ttl: Duration::from_secs(3600),
            ttl_jitter: 0.0,
            lock_ttl: Duration::from_secs(30),
            lock_retry_delay: Duration::from_millis(100),
            // ~5 seconds of blocking at most
            lock_max_retries: 50,
            batch_size: 100,
            max_dependency_entries: 10_000,
            max_pending_operations: 1_000,
            enable_auto_cleanup: false,
            // Cleanup every 5 minutes
            cleanup_interval: Duration::from_secs(300),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl CacheConfig {
    /// Create a new builder for cache configuration
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Load configuration from `CACHE_*` environment variables
    ///
    /// A `.env` file in the working directory is read first if present.
    /// Unset or unparsable variables fall back to defaults.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        let defaults = Self::default();

        Self {
            key_prefix: std::env::var("CACHE_KEY_PREFIX").unwrap_or(defaults.key_prefix),
            default_ttl: env_secs("CACHE_DEFAULT_TTL_SECS").unwrap_or(defaults.default_ttl),
            ttl_jitter: env_parse("CACHE_TTL_JITTER").unwrap_or(defaults.ttl_jitter),
            lock_ttl: env_millis("CACHE_LOCK_TTL_MS").unwrap_or(defaults.lock_ttl),
            lock_retry_delay: env_millis("CACHE_LOCK_RETRY_DELAY_MS")
                .unwrap_or(defaults.lock_retry_delay),
            lock_max_retries: env_parse("CACHE_LOCK_MAX_RETRIES")
                .unwrap_or(defaults.lock_max_retries),
            batch_size: env_parse("CACHE_BATCH_SIZE").unwrap_or(defaults.batch_size),
            max_dependency_entries: env_parse("CACHE_MAX_DEPENDENCY_ENTRIES")
                .unwrap_or(defaults.max_dependency_entries),
            max_pending_operations: env_parse("CACHE_MAX_PENDING_OPERATIONS")
                .unwrap_or(defaults.max_pending_operations),
            enable_auto_cleanup: env_parse("CACHE_ENABLE_AUTO_CLEANUP")
                .unwrap_or(defaults.enable_auto_cleanup),
            cleanup_interval: env_secs("CACHE_CLEANUP_INTERVAL_SECS")
                .unwrap_or(defaults.cleanup_interval),
            shutdown_timeout: env_secs("CACHE_SHUTDOWN_TIMEOUT_SECS")
                .unwrap_or(defaults.shutdown_timeout),
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.default_ttl.is_zero() {
            return Err(CacheError::Config("default_ttl must be greater than 0".to_string()));
        }

        // NaN fails the range check too
        if !(0.0..=1.0).contains(&self.ttl_jitter) {
            return Err(CacheError::Config(
                "ttl_jitter must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.lock_ttl.is_zero() {
            return Err(CacheError::Config("lock_ttl must be greater than 0".to_string()));
        }

        if self.batch_size == 0 {
            return Err(CacheError::Config("batch_size must be greater than 0".to_string()));
        }

        if self.max_dependency_entries == 0 {
            return Err(CacheError::Config(
                "max_dependency_entries must be greater than 0".to_string(),
            ));
        }

        if self.enable_auto_cleanup && self.cleanup_interval.is_zero() {
            return Err(CacheError::Config(
                "cleanup_interval must be greater than 0 when auto cleanup is enabled".to_string(),
            ));
        }

        Ok(())
    }

    /// Calculate the default TTL with jitter applied
    pub fn ttl_with_jitter(&self) -> Duration {
        if self.ttl_jitter == 0.0 {
            return self.default_ttl;
        }

        let base_secs = self.default_ttl.as_secs_f64();
        let jitter_range = base_secs * self.ttl_jitter;
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter_range;
        let final_secs = (base_secs + jitter).max(1.0);

        Duration::from_secs_f64(final_secs)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring invalid value for {}: {}", name, raw);
            None
        }
    }
}

fn env_secs(name: &str) -> Option<Duration> {
    env_parse::<u64>(name).map(Duration::from_secs)
}

fn env_millis(name: &str) -> Option<Duration> {
    env_parse::<u64>(name).map(Duration::from_millis)
}

/// Builder for cache configuration
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    key_prefix: Option<String>,
    default_ttl: Option<Duration>,
    ttl_jitter: Option<f64>,
    lock_ttl: Option<Duration>,
    lock_retry_delay: Option<Duration>,
    lock_max_retries: Option<u32>,
    batch_size: Option<usize>,
    max_dependency_entries: Option<usize>,
    max_pending_operations: Option<usize>,
    enable_auto_cleanup: Option<bool>,
    cleanup_interval: Option<Duration>,
    shutdown_timeout: Option<Duration>,
}

impl CacheConfigBuilder {
    /// Set the key prefix
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// Set default TTL for cache entries
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Set TTL jitter factor (0.0 - 1.0)
    pub fn ttl_jitter(mut self, jitter: f64) -> Self {
        self.ttl_jitter = Some(jitter);
        self
    }

    /// Set lock record TTL
    pub fn lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock_ttl = Some(ttl);
        self
    }

    /// Set delay between lock attempts
    pub fn lock_retry_delay(mut self, delay: Duration) -> Self {
        self.lock_retry_delay = Some(delay);
        self
    }

    /// Set number of lock retries
    pub fn lock_max_retries(mut self, retries: u32) -> Self {
        self.lock_max_retries = Some(retries);
        self
    }

    /// Set invalidation batch size
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }

    /// Set dependency graph bound
    pub fn max_dependency_entries(mut self, max: usize) -> Self {
        self.max_dependency_entries = Some(max);
        self
    }

    /// Set pending-operation threshold for cleanup
    pub fn max_pending_operations(mut self, max: usize) -> Self {
        self.max_pending_operations = Some(max);
        self
    }

    /// Enable or disable automatic cleanup
    pub fn enable_auto_cleanup(mut self, enable: bool) -> Self {
        self.enable_auto_cleanup = Some(enable);
        self
    }

    /// Set cleanup interval
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = Some(interval);
        self
    }

    /// Set shutdown wait bound
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = Some(timeout);
        self
    }

    /// Build the cache configuration
    pub fn build(self) -> CacheConfig {
        let defaults = CacheConfig::default();

        CacheConfig {
            key_prefix: self.key_prefix.unwrap_or(defaults.key_prefix),
            default_ttl: self.default_ttl.unwrap_or(defaults.default_ttl),
            ttl_jitter: self.ttl_jitter.unwrap_or(defaults.ttl_jitter),
            lock_ttl: self.lock_ttl.unwrap_or(defaults.lock_ttl),
            lock_retry_delay: self.lock_retry_delay.unwrap_or(defaults.lock_retry_delay),
            lock_max_retries: self.lock_max_retries.unwrap_or(defaults.lock_max_retries),
            batch_size: self.batch_size.unwrap_or(defaults.batch_size),
            max_dependency_entries: self
                .max_dependency_entries
                .unwrap_or(defaults.max_dependency_entries),
            max_pending_operations: self
                .max_pending_operations
                .unwrap_or(defaults.max_pending_operations),
            enable_auto_cleanup: self
                .enable_auto_cleanup
                .unwrap_or(defaults.enable_auto_cleanup),
            cleanup_interval: self.cleanup_interval.unwrap_or(defaults.cleanup_interval),
            shutdown_timeout: self.shutdown_timeout.unwrap_or(defaults.shutdown_timeout),
        }
    }
}
