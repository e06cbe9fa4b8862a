//! In-process operation coordination (single-flight)
//!
//! Concurrent calls for the same coordination key inside one process share a
//! single execution. The first caller registers the operation and it is
//! spawned onto the runtime, so it runs to completion even if that caller is
//! dropped. Later callers await the same shared result. The entry leaves the
//! pending map as soon as the operation finishes, successfully or not.
//!
//! This only saves redundant work. Cross-process correctness comes from the
//! lock manager.

use crate::error::{CacheError, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use std::any::Any;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

type SharedOutput = Result<Arc<dyn Any + Send + Sync>>;
type SharedOperation = Shared<BoxFuture<'static, SharedOutput>>;

struct PendingOperation {
    id: u64,
    future: SharedOperation,
}

/// Folds concurrent same-key operations into one
#[derive(Clone, Default)]
pub struct OperationCoordinator {
    pending: Arc<DashMap<String, PendingOperation>>,
    next_id: Arc<AtomicU64>,
}

impl OperationCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `operation` unless one is already pending for `key`
    ///
    /// Callers that join an in-flight operation receive a clone of its result.
    pub async fn run<T, Fut>(&self, key: &str, operation: Fut) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let shared = match self.pending.entry(key.to_string()) {
            Entry::Occupied(entry) => {
                debug!("Joining in-flight operation: {}", key);
                entry.get().future.clone()
            }
            Entry::Vacant(entry) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let pending = self.pending.clone();
                let owned_key = key.to_string();

                let handle = tokio::spawn(async move {
                    let result = operation
                        .await
                        .map(|value| Arc::new(value) as Arc<dyn Any + Send + Sync>);
                    pending.remove_if(&owned_key, |_, op| op.id == id);
                    result
                });

                let future = async move {
                    handle.await.unwrap_or_else(|e| {
                        Err(CacheError::Internal(format!("Operation task failed: {}", e)))
                    })
                }
                .boxed()
                .shared();

                entry.insert(PendingOperation {
                    id,
                    future: future.clone(),
                });
                future
            }
        };

        let output = shared.await?;
        match output.downcast::<T>() {
            Ok(value) => Ok(Arc::try_unwrap(value).unwrap_or_else(|shared| (*shared).clone())),
            Err(_) => Err(CacheError::Internal(format!(
                "Coordinated operation '{}' produced an unexpected result type",
                key
            ))),
        }
    }

    /// Number of operations currently in flight
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Whether an operation is pending for `key`
    pub fn is_pending(&self, key: &str) -> bool {
        self.pending.contains_key(key)
    }

    /// Wait for every pending operation, up to `timeout`
    ///
    /// Returns `true` if all of them finished in time.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let in_flight: Vec<SharedOperation> = self
            .pending
            .iter()
            .map(|entry| entry.value().future.clone())
            .collect();

        if in_flight.is_empty() {
            return true;
        }

        debug!("Waiting for {} in-flight operations", in_flight.len());
        match tokio::time::timeout(timeout, join_all(in_flight)).await {
            Ok(_) => true,
            Err(_) => {
                warn!(
                    "{} operations still pending after {:?}",
                    self.pending.len(),
                    timeout
                );
                false
            }
        }
    }

    /// Forget all pending registrations
    ///
    /// Running operations still complete; new callers simply stop joining them.
    pub fn clear(&self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_single_execution_for_concurrent_calls() {
        let coordinator = OperationCoordinator::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let make_op = |calls: Arc<AtomicUsize>| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<_, CacheError>("value".to_string())
        };

        let (a, b) = tokio::join!(
            coordinator.run("k", make_op(calls.clone())),
            coordinator.run("k", make_op(calls.clone()))
        );

        assert_eq!(a.unwrap(), "value");
        assert_eq!(b.unwrap(), "value");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(coordinator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_different_keys_run_independently() {
        let coordinator = OperationCoordinator::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let op = |calls: Arc<AtomicUsize>, n: u32| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, CacheError>(n)
        };

        let (a, b) = tokio::join!(
            coordinator.run("a", op(calls.clone(), 1)),
            coordinator.run("b", op(calls.clone(), 2))
        );

        assert_eq!(a.unwrap(), 1);
        assert_eq!(b.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_errors_are_shared_and_cleared() {
        let coordinator = OperationCoordinator::new();

        let result: Result<u32> = coordinator
            .run("k", async { Err(CacheError::Store("down".to_string())) })
            .await;
        assert_eq!(result, Err(CacheError::Store("down".to_string())));
        assert!(!coordinator.is_pending("k"));

        // next call starts a fresh operation
        let result = coordinator.run("k", async { Ok::<_, CacheError>(5u32) }).await;
        assert_eq!(result.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_operation_survives_dropped_caller() {
        let coordinator = OperationCoordinator::new();
        let done = Arc::new(AtomicUsize::new(0));

        let op = {
            let done = done.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                done.fetch_add(1, Ordering::SeqCst);
                Ok::<_, CacheError>(())
            }
        };

        let dropped = tokio::time::timeout(Duration::from_millis(1), coordinator.run("k", op)).await;
        assert!(dropped.is_err());

        assert!(coordinator.wait_idle(Duration::from_secs(1)).await);
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_wait_idle_times_out() {
        let coordinator = OperationCoordinator::new();
        let runner = coordinator.clone();
        let _slow = tokio::spawn(async move {
            runner
                .run("slow", async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok::<_, CacheError>(())
                })
                .await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(coordinator.pending_count(), 1);
        assert!(!coordinator.wait_idle(Duration::from_millis(20)).await);
    }

    #[tokio::test]
    async fn test_mismatched_result_type() {
        let coordinator = OperationCoordinator::new();
        let slow = coordinator.clone();

        let first = tokio::spawn(async move {
            slow.run("k", async {
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok::<_, CacheError>(1u32)
            })
            .await
        });
        tokio::time::sleep(Duration::from_millis(5)).await;

        let second: Result<String> = coordinator
            .run("k", async { Ok("x".to_string()) })
            .await;
        assert!(matches!(second, Err(CacheError::Internal(_))));
        assert_eq!(first.await.unwrap().unwrap(), 1);
    }
}
