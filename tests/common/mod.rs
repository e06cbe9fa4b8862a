//! Shared helpers for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use ouroboros_cache::{BackingStore, CacheError, InMemoryStore, KeyTtl, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Once;
use std::time::Duration;
use tokio::sync::Mutex;

static TRACING: Once = Once::new();

/// Install a tracing subscriber honoring `RUST_LOG`
pub fn init_tracing() {
    TRACING.call_once(|| {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

        let _ = tracing_subscriber::registry()
            .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .try_init();
    });
}

/// Observed store event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Acquire(String),
    Release(String),
    Write(String),
}

/// In-memory store that records lock traffic and can inject failures
#[derive(Default)]
pub struct InstrumentedStore {
    inner: InMemoryStore,
    events: Mutex<Vec<StoreEvent>>,
    offline: AtomicBool,
    fail_dbsize: AtomicBool,
    delay_ms: AtomicU64,
    fail_del: std::sync::Mutex<Option<String>>,
}

impl InstrumentedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<StoreEvent> {
        self.events.lock().await.clone()
    }

    /// Make every command fail with a store error
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_fail_dbsize(&self, fail: bool) {
        self.fail_dbsize.store(fail, Ordering::SeqCst);
    }

    /// Delay added to every PING
    pub fn set_ping_delay(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Make every DEL naming `key` fail
    pub fn fail_del_for(&self, key: &str) {
        if let Ok(mut fail_del) = self.fail_del.lock() {
            *fail_del = Some(key.to_string());
        }
    }

    fn check(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(CacheError::Store("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BackingStore for InstrumentedStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.check()?;
        self.inner.set(key, value).await
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        self.check()?;
        let mut events = self.events.lock().await;
        self.inner.set_ex(key, value, ttl).await?;
        events.push(StoreEvent::Write(key.to_string()));
        Ok(())
    }

    async fn set_nx_px(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        self.check()?;
        let mut events = self.events.lock().await;
        let acquired = self.inner.set_nx_px(key, value, ttl).await?;
        if acquired {
            events.push(StoreEvent::Acquire(key.to_string()));
        }
        Ok(acquired)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool> {
        self.check()?;
        let mut events = self.events.lock().await;
        let released = self.inner.compare_and_delete(key, expected).await?;
        if released {
            events.push(StoreEvent::Release(key.to_string()));
        }
        Ok(released)
    }

    async fn del(&self, keys: &[String]) -> Result<u64> {
        self.check()?;
        let failing = self.fail_del.lock().ok().and_then(|f| f.clone());
        if let Some(failing) = failing {
            if keys.contains(&failing) {
                return Err(CacheError::Store(format!("DEL {} rejected", failing)));
            }
        }
        self.inner.del(keys).await
    }

    async fn sadd(&self, key: &str, members: &[String]) -> Result<u64> {
        self.check()?;
        self.inner.sadd(key, members).await
    }

    async fn srem(&self, key: &str, members: &[String]) -> Result<u64> {
        self.check()?;
        self.inner.srem(key, members).await
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        self.check()?;
        self.inner.smembers(key).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool> {
        self.check()?;
        self.inner.expire(key, ttl).await
    }

    async fn ttl(&self, key: &str) -> Result<KeyTtl> {
        self.check()?;
        self.inner.ttl(key).await
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.check()?;
        self.inner.keys(pattern).await
    }

    async fn dbsize(&self) -> Result<u64> {
        self.check()?;
        if self.fail_dbsize.load(Ordering::SeqCst) {
            return Err(CacheError::Store("DBSIZE not permitted".to_string()));
        }
        self.inner.dbsize().await
    }

    async fn memory_usage(&self) -> Result<Option<String>> {
        self.check()?;
        self.inner.memory_usage().await
    }

    async fn ping(&self) -> Result<()> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.check()?;
        self.inner.ping().await
    }
}
