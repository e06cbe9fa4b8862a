//! # Ouroboros Cache (ouroboros-cache)
//!
//! A consistency layer for a cache shared by several processes through a
//! Redis-like key-value store.
//!
//! ## Features
//!
//! - Distributed locking with owner tokens and bounded retries
//! - In-process single-flight coordination
//! - Versioned, checksummed entries with self-healing reads
//! - Tag and dependency driven invalidation
//! - Cache-aside helper
//! - Statistics and three-state health reporting
//! - Async-first design using tokio
//!
//! ## Basic Usage
//!
//! ```no_run
//! use ouroboros_cache::{CacheConfig, CacheManager, InMemoryStore, SetOptions};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cache = CacheManager::initialize(
//!         Arc::new(InMemoryStore::new()),
//!         CacheConfig::from_env(),
//!     ).await?;
//!
//!     cache.set("job:42", &"payload", SetOptions::new().tag("jobs")).await?;
//!     let value: Option<String> = cache.get("job:42").await?;
//!     println!("Cached: {:?}", value);
//!     Ok(())
//! }
//! ```
//!
//! ## Cache-Aside
//!
//! ```no_run
//! use ouroboros_cache::{CacheConfig, CacheManager, InMemoryStore, SetOptions};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cache = CacheManager::initialize(
//!         Arc::new(InMemoryStore::new()),
//!         CacheConfig::default(),
//!     ).await?;
//!
//!     let report = cache
//!         .get_or_execute("report:daily", || async { Some(vec![1u32, 2, 3]) }, SetOptions::new())
//!         .await?;
//!     println!("Report: {:?}", report);
//!     Ok(())
//! }
//! ```
//!
//! ## Health Check with Retry
//!
//! ```no_run
//! use ouroboros_cache::{CacheConfig, CacheManager, InMemoryStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cache = CacheManager::initialize(
//!         Arc::new(InMemoryStore::new()),
//!         CacheConfig::default(),
//!     ).await?;
//!
//!     let result = cache.health_check_with_retry().await;
//!     if result.status.is_operational() {
//!         println!("Cache store is operational");
//!     }
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod cache;
pub mod error;
pub mod health;

// Re-export main types for convenience
pub use backend::{BackingStore, Command, InMemoryStore, KeyTtl, Reply};
pub use cache::{
    BatchOperation, BatchResult, CacheConfig, CacheConfigBuilder, CacheEntry, CacheKey,
    CacheManager, CacheMetadata, CacheStats, CleanupReport, GetOptions, InvalidateOptions,
    InvalidationReason, SetOptions,
};
pub use error::{CacheError, Result};
pub use health::{
    HealthCheckConfig, HealthCheckMetadata, HealthCheckMethod, HealthStatus, HealthCheckResult,
};
