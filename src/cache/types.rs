//! Core type definitions for the cache system

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Cache key type
pub type CacheKey = String;

/// Options for `set`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetOptions {
    /// Entry TTL; the configured default (with jitter) when `None`
    pub ttl: Option<Duration>,

    /// Tags used for bulk invalidation
    pub tags: Vec<String>,

    /// Keys this entry depends on
    pub dependencies: Vec<String>,
}

impl SetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn dependency(mut self, key: impl Into<String>) -> Self {
        self.dependencies.push(key.into());
        self
    }

    pub fn dependencies<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(keys.into_iter().map(Into::into));
        self
    }
}

/// Options for `get`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GetOptions {
    /// Recompute and compare the checksum (default on)
    pub validate_integrity: bool,

    /// Only return the entry if it carries this version
    pub expected_version: Option<u64>,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self {
            validate_integrity: true,
            expected_version: None,
        }
    }
}

impl GetOptions {
    pub fn skip_integrity(mut self) -> Self {
        self.validate_integrity = false;
        self
    }

    pub fn expected_version(mut self, version: u64) -> Self {
        self.expected_version = Some(version);
        self
    }
}

/// Options for `invalidate_by_tags`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvalidateOptions {
    /// Also remove direct dependents of the invalidated keys
    pub cascade_dependencies: bool,

    /// Keys per delete pipeline; the configured batch size when `None`
    pub batch_size: Option<usize>,
}

impl Default for InvalidateOptions {
    fn default() -> Self {
        Self {
            cascade_dependencies: true,
            batch_size: None,
        }
    }
}

impl InvalidateOptions {
    pub fn cascade(mut self, cascade: bool) -> Self {
        self.cascade_dependencies = cascade;
        self
    }

    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = Some(size);
        self
    }
}

/// One operation inside a `batch` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BatchOperation {
    Set {
        key: CacheKey,
        value: serde_json::Value,
        #[serde(default)]
        options: SetOptions,
    },
    Get {
        key: CacheKey,
        #[serde(default)]
        options: GetOptions,
    },
    Delete {
        key: CacheKey,
    },
}

impl BatchOperation {
    /// Key the operation targets
    pub fn key(&self) -> &str {
        match self {
            BatchOperation::Set { key, .. }
            | BatchOperation::Get { key, .. }
            | BatchOperation::Delete { key } => key,
        }
    }
}

/// Outcome of one batch operation, in the order submitted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BatchResult {
    Set(bool),
    Get(Option<serde_json::Value>),
    Delete(bool),
    /// The operation could not run (lock not obtained)
    Failed(String),
}

impl BatchResult {
    /// Whether the operation ran and reported success (a miss counts as success)
    pub fn is_ok(&self) -> bool {
        match self {
            BatchResult::Set(ok) | BatchResult::Delete(ok) => *ok,
            BatchResult::Get(_) => true,
            BatchResult::Failed(_) => false,
        }
    }
}

/// Statistics combining backing-store introspection and in-process state
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CacheStats {
    /// Number of keys in the backing store
    pub total_keys: u64,

    /// Number of tag index sets
    pub total_tags: u64,

    /// Number of dependency sources tracked in memory
    pub total_dependencies: usize,

    /// Memory usage as reported by the store
    pub memory_usage: String,

    /// Operations currently in flight in this process
    pub pending_operations: usize,

    /// Current value of the local version counter
    pub version_counter: u64,

    /// Total number of cache hits
    pub hits: u64,

    /// Total number of cache misses
    pub misses: u64,

    /// Number of keys removed by delete or invalidation
    pub invalidations: u64,

    /// Number of corrupted entries removed on read
    pub self_heals: u64,
}

impl CacheStats {
    /// Calculate cache hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }

    /// Calculate miss rate as a percentage
    pub fn miss_rate(&self) -> f64 {
        100.0 - self.hit_rate()
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ keys: {}, tags: {}, dependencies: {}, memory: {}, pending: {}, version: {}, hits: {}, misses: {}, hit_rate: {:.2}%, self_heals: {} }}",
            self.total_keys,
            self.total_tags,
            self.total_dependencies,
            self.memory_usage,
            self.pending_operations,
            self.version_counter,
            self.hits,
            self.misses,
            self.hit_rate(),
            self.self_heals
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };

        assert_eq!(stats.hit_rate(), 80.0);
        assert_eq!(stats.miss_rate(), 20.0);
    }

    #[test]
    fn test_cache_stats_zero_requests() {
        let stats = CacheStats::default();
        assert_eq!(stats.hit_rate(), 0.0);
        assert_eq!(stats.miss_rate(), 100.0);
    }

    #[test]
    fn test_cache_stats_display() {
        let stats = CacheStats {
            total_keys: 12,
            memory_usage: "1.00K".to_string(),
            hits: 100,
            misses: 50,
            ..Default::default()
        };

        let display = format!("{}", stats);
        assert!(display.contains("keys: 12"));
        assert!(display.contains("hits: 100"));
        assert!(display.contains("memory: 1.00K"));
    }

    #[test]
    fn test_set_options_builder() {
        let options = SetOptions::new()
            .ttl(Duration::from_secs(60))
            .tag("jobs")
            .tags(["featured", "remote"])
            .dependency("company:1");

        assert_eq!(options.ttl, Some(Duration::from_secs(60)));
        assert_eq!(options.tags, vec!["jobs", "featured", "remote"]);
        assert_eq!(options.dependencies, vec!["company:1"]);
    }

    #[test]
    fn test_option_defaults() {
        assert!(GetOptions::default().validate_integrity);
        assert!(!GetOptions::default().skip_integrity().validate_integrity);
        assert_eq!(
            GetOptions::default().expected_version(3).expected_version,
            Some(3)
        );
        assert!(InvalidateOptions::default().cascade_dependencies);
        assert_eq!(InvalidateOptions::default().batch_size(10).batch_size, Some(10));
    }

    #[test]
    fn test_batch_operation_from_json() {
        let op: BatchOperation =
            serde_json::from_value(json!({"type": "set", "key": "a", "value": 1})).unwrap();
        assert_eq!(op.key(), "a");
        assert!(matches!(op, BatchOperation::Set { .. }));

        let op: BatchOperation =
            serde_json::from_value(json!({"type": "delete", "key": "b"})).unwrap();
        assert!(matches!(op, BatchOperation::Delete { .. }));
    }

    #[test]
    fn test_batch_result_is_ok() {
        assert!(BatchResult::Set(true).is_ok());
        assert!(!BatchResult::Delete(false).is_ok());
        assert!(BatchResult::Get(None).is_ok());
        assert!(!BatchResult::Failed("lock".to_string()).is_ok());
    }
}
