//! Distributed per-key locks on top of the backing store
//!
//! A lock is a single key created with `SET key token PX ttl NX`. The token is
//! a fresh UUID per acquisition and release is a compare-and-delete, so a
//! holder whose lock expired can never remove a lock that someone else has
//! since acquired. Expiry is left entirely to the store's native TTL.
//!
//! There is no fencing and no fairness: waiters poll blindly until the retry
//! budget is spent.

use crate::backend::BackingStore;
use crate::error::{CacheError, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Retry and lifetime parameters for one acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    pub ttl: Duration,
    pub retry_delay: Duration,
    pub max_retries: u32,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            retry_delay: Duration::from_millis(100),
            max_retries: 50,
        }
    }
}

/// Proof of lock ownership returned by [`LockManager::acquire`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockGuard {
    pub lock_key: String,
    pub token: String,
}

/// Acquires and releases per-key locks
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn BackingStore>,
    options: LockOptions,
}

impl LockManager {
    pub fn new(store: Arc<dyn BackingStore>, options: LockOptions) -> Self {
        Self { store, options }
    }

    /// Default acquisition options
    pub fn options(&self) -> LockOptions {
        self.options
    }

    /// Acquire `lock_key` using the default options
    pub async fn acquire(&self, lock_key: &str) -> Result<LockGuard> {
        self.acquire_with(lock_key, self.options).await
    }

    /// Acquire `lock_key`, retrying up to `options.max_retries` times
    pub async fn acquire_with(&self, lock_key: &str, options: LockOptions) -> Result<LockGuard> {
        let token = Uuid::new_v4().to_string();
        let attempts = options.max_retries.saturating_add(1);

        for attempt in 1..=attempts {
            match self.store.set_nx_px(lock_key, &token, options.ttl).await {
                Ok(true) => {
                    debug!("Acquired lock {} (attempt {})", lock_key, attempt);
                    return Ok(LockGuard {
                        lock_key: lock_key.to_string(),
                        token,
                    });
                }
                Ok(false) => {}
                Err(e) => {
                    warn!("Lock attempt {} on {} failed: {}", attempt, lock_key, e);
                }
            }

            if attempt < attempts {
                tokio::time::sleep(options.retry_delay).await;
            }
        }

        warn!("Giving up on lock {} after {} attempts", lock_key, attempts);
        Err(CacheError::LockAcquisition {
            key: lock_key.to_string(),
            attempts,
        })
    }

    /// Release a lock only if `token` still owns it
    ///
    /// Returns `false` if the lock is held by another token, already expired,
    /// or the store could not be reached.
    pub async fn release(&self, lock_key: &str, token: &str) -> bool {
        match self.store.compare_and_delete(lock_key, token).await {
            Ok(true) => {
                debug!("Released lock {}", lock_key);
                true
            }
            Ok(false) => {
                warn!("Lock {} not released: token does not own it", lock_key);
                false
            }
            Err(e) => {
                error!("Failed to release lock {}: {}", lock_key, e);
                false
            }
        }
    }

    /// Run `operation` while holding `lock_key`
    ///
    /// The lock is released whatever the operation returns.
    pub async fn with_lock<F, Fut, T>(&self, lock_key: &str, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let guard = self.acquire(lock_key).await?;
        let result = operation().await;
        self.release(&guard.lock_key, &guard.token).await;
        Ok(result)
    }
}
