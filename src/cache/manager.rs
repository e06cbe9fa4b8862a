//! Cache manager: the public entry point of the consistency layer
//!
//! Every operation goes through two layers of coordination:
//! 1. the in-process [`OperationCoordinator`], which folds concurrent calls
//!    with the same coordination key into one execution
//! 2. the distributed [`LockManager`], which serializes writers across
//!    processes sharing the backing store
//!
//! All methods fail soft. Store, serialization and integrity problems are
//! logged and reported as `false` / `None`. Only a lock that could not be
//! acquired within the retry budget is returned as an error.

use crate::backend::{BackingStore, Command};
use crate::cache::config::CacheConfig;
use crate::cache::coordinator::OperationCoordinator;
use crate::cache::dependency::DependencyGraph;
use crate::cache::entry::{checksum, CacheEntry};
use crate::cache::invalidation::{InvalidationEngine, InvalidationEvent, InvalidationReason};
use crate::cache::keys::KeyLayout;
use crate::cache::lock::{LockManager, LockOptions};
use crate::cache::types::{
    BatchOperation, BatchResult, CacheStats, GetOptions, InvalidateOptions, SetOptions,
};
use crate::error::{CacheError, Result};
use crate::health::HealthCheckConfig;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
    self_heals: AtomicU64,
}

pub(crate) struct Inner {
    pub(crate) config: CacheConfig,
    pub(crate) store: Arc<dyn BackingStore>,
    pub(crate) health_config: HealthCheckConfig,
    layout: KeyLayout,
    locks: LockManager,
    pub(crate) coordinator: OperationCoordinator,
    graph: Arc<DependencyGraph>,
    invalidation: InvalidationEngine,
    version: AtomicU64,
    counters: Counters,
    shutting_down: AtomicBool,
    cleanup_task: Mutex<Option<JoinHandle<()>>>,
}

/// What a `cleanup()` pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Lock records without an expiry that were deleted
    pub stale_locks_removed: usize,

    /// Whether the dependency graph was reset
    pub dependency_graph_reset: bool,

    /// Whether the pending-operation map was cleared
    pub pending_operations_cleared: bool,
}

/// Handle to a cache instance
///
/// Cloning is cheap and every clone shares the same version counter,
/// dependency graph and pending-operation map.
#[derive(Clone)]
pub struct CacheManager {
    pub(crate) inner: Arc<Inner>,
}

impl CacheManager {
    /// Build a cache instance over `store`
    ///
    /// Validates the configuration and pings the store. Starts the periodic
    /// cleanup task when `enable_auto_cleanup` is set.
    pub async fn initialize(store: Arc<dyn BackingStore>, config: CacheConfig) -> Result<Self> {
        Self::initialize_with(store, config, HealthCheckConfig::default()).await
    }

    /// Build a cache instance with a custom health check configuration
    pub async fn initialize_with(
        store: Arc<dyn BackingStore>,
        config: CacheConfig,
        health_config: HealthCheckConfig,
    ) -> Result<Self> {
        config.validate()?;
        store.ping().await?;

        info!(
            "Initializing cache manager (prefix: {}, default ttl: {:?})",
            config.key_prefix, config.default_ttl
        );

        let layout = KeyLayout::new(config.key_prefix.clone());
        let graph = Arc::new(DependencyGraph::new(config.max_dependency_entries));
        let locks = LockManager::new(
            store.clone(),
            LockOptions {
                ttl: config.lock_ttl,
                retry_delay: config.lock_retry_delay,
                max_retries: config.lock_max_retries,
            },
        );
        let invalidation = InvalidationEngine::new(store.clone(), layout.clone(), graph.clone());

        let inner = Arc::new(Inner {
            config,
            store,
            health_config,
            layout,
            locks,
            coordinator: OperationCoordinator::new(),
            graph,
            invalidation,
            version: AtomicU64::new(0),
            counters: Counters::default(),
            shutting_down: AtomicBool::new(false),
            cleanup_task: Mutex::new(None),
        });

        if inner.config.enable_auto_cleanup {
            let handle = start_auto_cleanup(&inner);
            if let Ok(mut slot) = inner.cleanup_task.lock() {
                *slot = Some(handle);
            }
        }

        Ok(Self { inner })
    }

    /// Cache configuration
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Current value of this process's version counter
    pub fn current_version(&self) -> u64 {
        self.inner.version.load(Ordering::SeqCst)
    }

    /// Whether `shutdown()` has been called
    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    /// Store `value` under `key`
    ///
    /// Returns `Ok(false)` if the value cannot be serialized or any store
    /// command fails.
    ///
    /// Concurrent sets of the same key in this process share one write: a
    /// caller that joins an in-flight set receives that write's result and
    /// its own value is not stored.
    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        options: SetOptions,
    ) -> Result<bool> {
        if self.rejecting("set", key) {
            return Ok(false);
        }

        let payload = match serde_json::to_string(value) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Not caching {}: {}", key, CacheError::from(e));
                return Ok(false);
            }
        };

        let inner = self.inner.clone();
        let owned_key = key.to_string();
        let result = self
            .inner
            .coordinator
            .run(&format!("set:{}", key), async move {
                inner.set_locked(&owned_key, payload, options).await
            })
            .await;

        fail_soft("set", key, result, false)
    }

    /// Read `key` with integrity validation
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        self.get_with(key, GetOptions::default()).await
    }

    /// Read `key`
    ///
    /// Misses, version mismatches, corrupted entries and payloads that do not
    /// decode into `T` all return `Ok(None)`.
    pub async fn get_with<T: DeserializeOwned>(
        &self,
        key: &str,
        options: GetOptions,
    ) -> Result<Option<T>> {
        if self.rejecting("get", key) {
            return Ok(None);
        }

        let coordination_key = format!(
            "get:{}?integrity={}&version={:?}",
            key, options.validate_integrity, options.expected_version
        );
        let inner = self.inner.clone();
        let owned_key = key.to_string();
        let result = self
            .inner
            .coordinator
            .run(&coordination_key, async move {
                inner.read_locked(&owned_key, &options).await
            })
            .await;

        let payload = match fail_soft("get", key, result, None)? {
            Some(payload) => payload,
            None => return Ok(None),
        };

        match serde_json::from_str(&payload) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!("Cached value for {} does not decode: {}", key, e);
                Ok(None)
            }
        }
    }

    /// Remove `key`, its version record and its tag memberships
    pub async fn delete(&self, key: &str) -> Result<bool> {
        if self.rejecting("delete", key) {
            return Ok(false);
        }

        let inner = self.inner.clone();
        let owned_key = key.to_string();
        let result = self
            .inner
            .coordinator
            .run(&format!("delete:{}", key), async move {
                inner.delete_locked(&owned_key).await
            })
            .await;

        fail_soft("delete", key, result, false)
    }

    /// Remove every entry carrying any of `tags`
    ///
    /// Returns `Ok(true)` when every store command succeeded.
    pub async fn invalidate_by_tags<I, S>(&self, tags: I, options: InvalidateOptions) -> Result<bool>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut tags: Vec<String> = tags.into_iter().map(Into::into).collect();
        tags.sort_unstable();
        tags.dedup();

        let label = tags.join(",");
        if self.rejecting("invalidate", &label) {
            return Ok(false);
        }
        if tags.is_empty() {
            return Ok(true);
        }

        let inner = self.inner.clone();
        let result = self
            .inner
            .coordinator
            .run(&format!("invalidate:{}", label), async move {
                inner.invalidate_locked(&tags, &options).await
            })
            .await;

        fail_soft("invalidate", &label, result, false)
    }

    /// Run several operations sequentially under one composite lock
    ///
    /// Results come back in submission order. An operation whose own key lock
    /// cannot be acquired yields [`BatchResult::Failed`] without stopping the
    /// rest of the batch.
    pub async fn batch(&self, operations: Vec<BatchOperation>) -> Result<Vec<BatchResult>> {
        if operations.is_empty() {
            return Ok(Vec::new());
        }
        if self.rejecting("batch", &format!("{} operations", operations.len())) {
            return Ok(operations
                .iter()
                .map(|_| BatchResult::Failed(CacheError::ShuttingDown.to_string()))
                .collect());
        }

        let fingerprint = match serde_json::to_string(&operations) {
            Ok(encoded) => checksum(&encoded),
            Err(_) => uuid::Uuid::new_v4().to_string(),
        };
        let size = operations.len();
        let inner = self.inner.clone();
        let result = self
            .inner
            .coordinator
            .run(&format!("batch:{}", fingerprint), async move {
                inner.batch_locked(operations).await
            })
            .await;

        match result {
            Ok(results) => Ok(results),
            Err(e) if e.is_lock_error() => Err(e),
            Err(e) => {
                error!("Cache batch failed: {}", e);
                Ok((0..size).map(|_| BatchResult::Failed(e.to_string())).collect())
            }
        }
    }

    /// Cache-aside read
    ///
    /// Concurrent calls for the same key and value type in this process
    /// share one `producer` invocation. The produced value is returned even
    /// when writing it to the cache fails.
    pub async fn get_or_execute<T, F, Fut>(
        &self,
        key: &str,
        producer: F,
        options: SetOptions,
    ) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Option<T>> + Send + 'static,
    {
        let this = self.clone();
        let owned_key = key.to_string();
        // joiners must expect the same value type
        let coordination_key = format!("get_or_execute:{}:{}", key, std::any::type_name::<T>());

        self.inner
            .coordinator
            .run(&coordination_key, async move {
                match this.get::<T>(&owned_key).await {
                    Ok(Some(value)) => return Ok(Some(value)),
                    Ok(None) => {}
                    Err(e) => warn!("Cache read for {} failed, computing value: {}", owned_key, e),
                }

                let produced = producer().await;
                if let Some(value) = &produced {
                    match this.set(&owned_key, value, options).await {
                        Ok(true) => debug!("Cached computed value for {}", owned_key),
                        Ok(false) => warn!("Computed value for {} was not cached", owned_key),
                        Err(e) => warn!("Computed value for {} was not cached: {}", owned_key, e),
                    }
                }
                Ok(produced)
            })
            .await
    }

    /// Key counts, memory usage and in-process sizes
    ///
    /// Store failures degrade to zero counts and `"unknown"` memory usage.
    pub async fn stats(&self) -> CacheStats {
        let inner = &self.inner;

        let total_keys = inner.store.dbsize().await.unwrap_or_else(|e| {
            warn!("DBSIZE failed while collecting stats: {}", e);
            0
        });
        let total_tags = match inner.store.keys(&inner.layout.tag_pattern()).await {
            Ok(keys) => keys.len() as u64,
            Err(e) => {
                warn!("Tag scan failed while collecting stats: {}", e);
                0
            }
        };
        let memory_usage = match inner.store.memory_usage().await {
            Ok(Some(usage)) => usage,
            Ok(None) => "unknown".to_string(),
            Err(e) => {
                warn!("Memory info failed while collecting stats: {}", e);
                "unknown".to_string()
            }
        };

        CacheStats {
            total_keys,
            total_tags,
            total_dependencies: inner.graph.len().await,
            memory_usage,
            pending_operations: inner.coordinator.pending_count(),
            version_counter: inner.version.load(Ordering::SeqCst),
            hits: inner.counters.hits.load(Ordering::Relaxed),
            misses: inner.counters.misses.load(Ordering::Relaxed),
            invalidations: inner.counters.invalidations.load(Ordering::Relaxed),
            self_heals: inner.counters.self_heals.load(Ordering::Relaxed),
        }
    }

    /// Remove stale lock records and trim oversized in-memory maps
    pub async fn cleanup(&self) -> CleanupReport {
        let inner = &self.inner;
        let mut report = CleanupReport::default();

        match inner.store.keys(&inner.layout.lock_pattern()).await {
            Ok(lock_keys) => {
                for lock_key in lock_keys {
                    match inner.store.ttl(&lock_key).await {
                        Ok(crate::backend::KeyTtl::Persistent) => {
                            match inner.store.del(std::slice::from_ref(&lock_key)).await {
                                Ok(removed) => report.stale_locks_removed += removed as usize,
                                Err(e) => error!("Failed to remove stale lock {}: {}", lock_key, e),
                            }
                        }
                        Ok(_) => {}
                        Err(e) => warn!("TTL lookup for {} failed: {}", lock_key, e),
                    }
                }
            }
            Err(e) => warn!("Lock scan failed during cleanup: {}", e),
        }

        let graph_size = inner.graph.len().await;
        if graph_size > inner.config.max_dependency_entries {
            inner.graph.clear().await;
            report.dependency_graph_reset = true;
            info!("Reset dependency graph ({} sources)", graph_size);
        }

        let pending = inner.coordinator.pending_count();
        if pending > inner.config.max_pending_operations {
            inner.coordinator.clear();
            report.pending_operations_cleared = true;
            info!("Cleared pending-operation map ({} entries)", pending);
        }

        if report.stale_locks_removed > 0 {
            info!("Removed {} stale locks", report.stale_locks_removed);
        }
        report
    }

    /// Stop accepting operations, wait for in-flight ones, release resources
    ///
    /// Waits at most `shutdown_timeout`. Returns `true` if every in-flight
    /// operation finished in time.
    pub async fn shutdown(&self) -> bool {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            debug!("Cache manager already shut down");
            return true;
        }
        info!("Shutting down cache manager");

        let cleanup_task = self
            .inner
            .cleanup_task
            .lock()
            .ok()
            .and_then(|mut slot| slot.take());
        if let Some(handle) = cleanup_task {
            handle.abort();
        }

        let drained = self
            .inner
            .coordinator
            .wait_idle(self.inner.config.shutdown_timeout)
            .await;
        if !drained {
            warn!(
                "Shutdown proceeding with {} operations still in flight",
                self.inner.coordinator.pending_count()
            );
        }

        self.inner.coordinator.clear();
        self.inner.graph.clear().await;
        info!("Cache manager shut down");
        drained
    }

    fn rejecting(&self, operation: &str, key: &str) -> bool {
        if self.is_shutting_down() {
            warn!("Rejecting {} for {}: {}", operation, key, CacheError::ShuttingDown);
            true
        } else {
            false
        }
    }
}

impl Inner {
    async fn set_locked(&self, key: &str, payload: String, options: SetOptions) -> Result<bool> {
        self.locks
            .with_lock(&self.layout.lock(key), || self.write_entry(key, payload, options))
            .await
    }

    async fn write_entry(&self, key: &str, payload: String, options: SetOptions) -> bool {
        let ttl = options.ttl.unwrap_or_else(|| self.config.ttl_with_jitter());
        if ttl.is_zero() {
            warn!("Not caching {}: TTL must be greater than zero", key);
            return false;
        }

        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        let entry = CacheEntry::new(
            key.to_string(),
            payload,
            version,
            options.tags,
            options.dependencies,
        );
        let document = match entry.to_document() {
            Ok(document) => document,
            Err(e) => {
                error!("Failed to encode entry {}: {}", key, e);
                return false;
            }
        };

        self.graph.register(key, &entry.metadata.dependencies).await;

        let mut commands = vec![
            Command::SetEx {
                key: self.layout.entry(key),
                value: document,
                ttl,
            },
            Command::SetEx {
                key: self.layout.version(key),
                value: version.to_string(),
                ttl,
            },
        ];
        for tag in &entry.metadata.tags {
            let tag_key = self.layout.tag(tag);
            commands.push(Command::SAdd {
                key: tag_key.clone(),
                members: vec![key.to_string()],
            });
            commands.push(Command::Expire { key: tag_key, ttl });
        }

        let failures = self.run_pipeline(key, commands).await;
        if failures == 0 {
            debug!("Cached {} (version {}, ttl {:?})", key, version, ttl);
        }
        failures == 0
    }

    async fn read_locked(&self, key: &str, options: &GetOptions) -> Result<Option<String>> {
        self.locks
            .with_lock(&self.layout.lock(key), || self.read_entry(key, options))
            .await?
    }

    async fn read_entry(&self, key: &str, options: &GetOptions) -> Result<Option<String>> {
        let document = match self.store.get(&self.layout.entry(key)).await? {
            Some(document) => document,
            None => {
                debug!("Cache miss: {}", key);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
        };

        let entry = match CacheEntry::from_document(&document) {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Unreadable cache entry {}: {}", key, e);
                self.heal(key).await;
                return Ok(None);
            }
        };

        if let Some(expected) = options.expected_version {
            if entry.metadata.version != expected {
                debug!(
                    "Version mismatch for {}: expected {}, found {}",
                    key, expected, entry.metadata.version
                );
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
        }

        if options.validate_integrity {
            if let Err(e) = entry.ensure_integrity() {
                warn!("{}", e);
                self.heal(key).await;
                return Ok(None);
            }
        }

        debug!("Cache hit: {}", key);
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        Ok(Some(entry.payload))
    }

    /// Drop a corrupted entry so the next read is a clean miss
    async fn heal(&self, key: &str) {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        let store_keys = [self.layout.entry(key), self.layout.version(key)];
        match self.store.del(&store_keys).await {
            Ok(_) => {
                self.counters.self_heals.fetch_add(1, Ordering::Relaxed);
                let event = InvalidationEvent::new(InvalidationReason::Integrity, vec![key.to_string()]);
                info!("Removed corrupted entry {} ({})", key, event.reason);
            }
            Err(e) => error!("Failed to remove corrupted entry {}: {}", key, e),
        }
    }

    async fn delete_locked(&self, key: &str) -> Result<bool> {
        self.locks
            .with_lock(&self.layout.lock(key), || self.delete_entry(key))
            .await?
    }

    async fn delete_entry(&self, key: &str) -> Result<bool> {
        let tags = match self.store.get(&self.layout.entry(key)).await? {
            Some(document) => match CacheEntry::from_document(&document) {
                Ok(entry) => entry.metadata.tags,
                Err(e) => {
                    warn!("Deleting unreadable entry {}: {}", key, e);
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        let mut commands: Vec<Command> = tags
            .iter()
            .map(|tag| Command::SRem {
                key: self.layout.tag(tag),
                members: vec![key.to_string()],
            })
            .collect();
        commands.push(Command::Del {
            keys: vec![self.layout.entry(key), self.layout.version(key)],
        });

        let failures = self.run_pipeline(key, commands).await;
        self.graph.remove(key).await;
        self.counters.invalidations.fetch_add(1, Ordering::Relaxed);

        let event = InvalidationEvent::new(InvalidationReason::Manual, vec![key.to_string()]);
        debug!("Deleted {} ({})", key, event.reason);
        Ok(failures == 0)
    }

    async fn invalidate_locked(&self, tags: &[String], options: &InvalidateOptions) -> Result<bool> {
        let batch_size = options.batch_size.unwrap_or(self.config.batch_size);
        let outcome = self
            .locks
            .with_lock(&self.layout.tags_lock(tags), || {
                self.invalidation
                    .invalidate(tags, options.cascade_dependencies, batch_size)
            })
            .await?;

        self.counters
            .invalidations
            .fetch_add(outcome.event.keys.len() as u64, Ordering::Relaxed);
        if !outcome.is_complete() {
            warn!(
                "Invalidation of [{}] finished with {} failed commands",
                tags.join(","),
                outcome.failed_commands
            );
        }
        Ok(outcome.is_complete())
    }

    async fn batch_locked(&self, operations: Vec<BatchOperation>) -> Result<Vec<BatchResult>> {
        let mut keys: Vec<&str> = operations.iter().map(BatchOperation::key).collect();
        keys.sort_unstable();
        keys.dedup();
        let lock_key = self.layout.batch_lock(&checksum(&keys.join("\n")));

        self.locks
            .with_lock(&lock_key, || self.run_batch(operations))
            .await
    }

    async fn run_batch(&self, operations: Vec<BatchOperation>) -> Vec<BatchResult> {
        let mut results = Vec::with_capacity(operations.len());

        for operation in operations {
            let result = match operation {
                BatchOperation::Set {
                    key,
                    value,
                    options,
                } => match serde_json::to_string(&value) {
                    Ok(payload) => batch_result(
                        "set",
                        &key,
                        self.set_locked(&key, payload, options).await,
                        BatchResult::Set,
                    ),
                    Err(e) => {
                        warn!("Not caching {}: {}", key, e);
                        BatchResult::Set(false)
                    }
                },
                BatchOperation::Get { key, options } => {
                    let read = self.read_locked(&key, &options).await.map(|payload| {
                        payload.and_then(|payload| {
                            serde_json::from_str::<serde_json::Value>(&payload).ok()
                        })
                    });
                    batch_result("get", &key, read, BatchResult::Get)
                }
                BatchOperation::Delete { key } => batch_result(
                    "delete",
                    &key,
                    self.delete_locked(&key).await,
                    BatchResult::Delete,
                ),
            };
            results.push(result);
        }

        results
    }

    /// Execute a pipeline, log failures, return how many commands failed
    async fn run_pipeline(&self, key: &str, commands: Vec<Command>) -> usize {
        let names: Vec<&'static str> = commands.iter().map(Command::name).collect();
        let results = self.store.pipeline(commands).await;

        let mut failures = 0;
        for (name, result) in names.iter().zip(results) {
            if let Err(e) = result {
                error!("{} failed for {}: {}", name, key, e);
                failures += 1;
            }
        }
        failures
    }
}

fn fail_soft<T>(operation: &str, key: &str, result: Result<T>, fallback: T) -> Result<T> {
    match result {
        Ok(value) => Ok(value),
        Err(e) if e.is_lock_error() => Err(e),
        Err(e) => {
            error!("Cache {} failed for {}: {}", operation, key, e);
            Ok(fallback)
        }
    }
}

fn batch_result<T, F>(operation: &str, key: &str, result: Result<T>, wrap: F) -> BatchResult
where
    T: Default,
    F: FnOnce(T) -> BatchResult,
{
    match result {
        Ok(value) => wrap(value),
        Err(e) if e.is_lock_error() => BatchResult::Failed(e.to_string()),
        Err(e) => {
            error!("Batch {} failed for {}: {}", operation, key, e);
            wrap(T::default())
        }
    }
}

/// Background task running `cleanup()` every `cleanup_interval`
///
/// Holds only a weak reference, so it ends once the last manager handle is
/// dropped.
fn start_auto_cleanup(inner: &Arc<Inner>) -> JoinHandle<()> {
    let interval = inner.config.cleanup_interval;
    let weak = Arc::downgrade(inner);

    info!("Starting automatic cache cleanup task (interval: {:?})", interval);

    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;

            let Some(inner) = weak.upgrade() else {
                debug!("Cache manager dropped, stopping cleanup task");
                break;
            };
            let report = CacheManager { inner }.cleanup().await;
            debug!("Auto cleanup: {:?}", report);
        }
    })
}
