//! # Distributed Cache Consistency Layer
//!
//! Keeps a cache shared by many processes consistent under concurrent
//! reads, writes and invalidations.
//!
//! ## Features
//!
//! - **Distributed Locks**: token-owned, TTL-bounded locks in the backing store
//! - **Single-Flight**: concurrent same-key operations in one process share one execution
//! - **Versioned Entries**: every write gets a fresh version and a SHA-256 checksum
//! - **Self-Healing**: entries failing their checksum are deleted on read
//! - **Tag Invalidation**: remove every entry carrying a tag, optionally with its dependents
//! - **Cache-Aside**: `get_or_execute` computes and caches a missing value once
//!
//! ## Store Layout
//!
//! With the default prefix `cache:`:
//! - `cache:entry:{key}`: JSON document with payload and metadata
//! - `cache:version:{key}`: decimal version of the current entry
//! - `cache:tag:{tag}`: set of keys carrying the tag
//! - `cache:lock:key:{key}`: lock record holding the owner token
//!
//! ## Example
//!
//! ```rust
//! use ouroboros_cache::cache::{CacheConfig, CacheManager, InvalidateOptions, SetOptions};
//! use ouroboros_cache::backend::InMemoryStore;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = CacheConfig::builder()
//!     .default_ttl(Duration::from_secs(3600)) // 1 hour
//!     .build();
//!
//! let cache = CacheManager::initialize(Arc::new(InMemoryStore::new()), config).await?;
//!
//! cache
//!     .set("user:1", &"Ada", SetOptions::new().tag("users"))
//!     .await?;
//!
//! if let Some(name) = cache.get::<String>("user:1").await? {
//!     println!("Cache hit: {}", name);
//! }
//!
//! cache
//!     .invalidate_by_tags(["users"], InvalidateOptions::default())
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod coordinator;
pub mod dependency;
pub mod entry;
pub mod invalidation;
pub mod keys;
pub mod lock;
pub mod manager;
pub mod types;

pub use config::{CacheConfig, CacheConfigBuilder};
pub use coordinator::OperationCoordinator;
pub use dependency::DependencyGraph;
pub use entry::{checksum, CacheEntry, CacheMetadata};
pub use invalidation::{InvalidationEngine, InvalidationEvent, InvalidationOutcome, InvalidationReason};
pub use keys::KeyLayout;
pub use lock::{LockGuard, LockManager, LockOptions};
pub use manager::{CacheManager, CleanupReport};
pub use types::{
    BatchOperation, BatchResult, CacheKey, CacheStats, GetOptions, InvalidateOptions, SetOptions,
};
