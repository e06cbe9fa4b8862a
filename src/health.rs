//! Health reporting for the cache and its backing store
//!
//! Two check methods are available:
//! - `Ping`: a single PING round trip, suitable for load balancers
//! - `Detailed`: PING plus key count, memory usage and in-process load
//!
//! `health_check_with_retry` runs the configured method with retries, falls
//! back from `Detailed` to `Ping` when diagnostics cannot be collected, and
//! reports `Degraded` when the store answers slower than the threshold.

use crate::cache::CacheManager;
use crate::error::{CacheError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Configuration for health check behavior
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    /// Health check method to use
    pub method: HealthCheckMethod,
    /// Timeout for each store round trip
    pub timeout: Duration,
    /// Whether to enable retry logic
    pub enable_retries: bool,
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Delay between retry attempts
    pub retry_delay: Duration,
    /// Whether to fall back from detailed to ping
    pub enable_fallback: bool,
    /// Response time threshold for degraded state (in milliseconds)
    pub degraded_threshold_ms: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            method: HealthCheckMethod::Ping,
            timeout: Duration::from_secs(5),
            enable_retries: true,
            max_retries: 3,
            retry_delay: Duration::from_millis(500),
            enable_fallback: true,
            degraded_threshold_ms: 1000,
        }
    }
}

/// Health check method variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthCheckMethod {
    /// PING only
    Ping,
    /// PING, DBSIZE and memory info
    Detailed,
}

/// Health status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// Store is responsive
    Healthy,
    /// Store is responsive but slow (above degraded threshold)
    Degraded,
    /// Store is not responsive or erroring
    Unhealthy,
}

impl HealthStatus {
    /// Convert to HTTP status code equivalent
    pub fn to_http_status_code(&self) -> u16 {
        match self {
            HealthStatus::Healthy => 200,
            HealthStatus::Degraded => 200,
            HealthStatus::Unhealthy => 503,
        }
    }

    /// Check if status is healthy or degraded (operational)
    pub fn is_operational(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
    }
}

/// Detailed health check result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    pub response_time_ms: u64,
    /// Keys in the backing store (detailed checks only)
    pub total_keys: Option<u64>,
    /// Store-reported memory usage (detailed checks only)
    pub memory_usage: Option<String>,
    /// Coordinated operations in flight in this process
    pub pending_operations: usize,
    pub timestamp: DateTime<Utc>,
    pub error: Option<String>,
    pub metadata: HealthCheckMetadata,
}

/// Additional metadata for health check results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckMetadata {
    pub check_method: HealthCheckMethod,
    pub was_retry: bool,
    pub retry_count: u32,
    pub used_fallback: bool,
}

impl HealthCheckResult {
    fn healthy(
        response_time: Duration,
        method: HealthCheckMethod,
        pending_operations: usize,
        degraded_threshold_ms: u64,
    ) -> Self {
        let response_time_ms = response_time.as_millis() as u64;
        let status = if response_time_ms > degraded_threshold_ms {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        Self {
            status,
            response_time_ms,
            total_keys: None,
            memory_usage: None,
            pending_operations,
            timestamp: Utc::now(),
            error: None,
            metadata: HealthCheckMetadata {
                check_method: method,
                was_retry: false,
                retry_count: 0,
                used_fallback: false,
            },
        }
    }

    fn unhealthy(response_time: Duration, error: &str, method: HealthCheckMethod) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            response_time_ms: response_time.as_millis() as u64,
            total_keys: None,
            memory_usage: None,
            pending_operations: 0,
            timestamp: Utc::now(),
            error: Some(error.to_string()),
            metadata: HealthCheckMetadata {
                check_method: method,
                was_retry: false,
                retry_count: 0,
                used_fallback: false,
            },
        }
    }

    fn with_metadata_update(mut self, retry_count: u32, used_fallback: bool) -> Self {
        self.metadata.was_retry = retry_count > 0;
        self.metadata.retry_count = retry_count;
        self.metadata.used_fallback = used_fallback;
        self
    }
}

async fn with_timeout<T, F>(timeout: Duration, context: &str, future: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    tokio::time::timeout(timeout, future)
        .await
        .unwrap_or_else(|_| {
            Err(CacheError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
                context: context.to_string(),
            })
        })
}

impl CacheManager {
    /// Simple health check: one PING round trip
    ///
    /// # Example
    /// ```no_run
    /// # use std::sync::Arc;
    /// # use ouroboros_cache::{CacheConfig, CacheManager, InMemoryStore};
    /// # #[tokio::main]
    /// # async fn main() -> anyhow::Result<()> {
    /// let cache = CacheManager::initialize(Arc::new(InMemoryStore::new()), CacheConfig::default()).await?;
    /// let is_healthy = cache.health_check().await?;
    /// println!("Store healthy: {}", is_healthy);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn health_check(&self) -> Result<bool> {
        debug!("Executing simple health check (PING)");
        let config = &self.inner.health_config;

        with_timeout(config.timeout, "PING", self.inner.store.ping()).await?;

        debug!("Simple health check passed");
        Ok(true)
    }

    /// Detailed health check with store diagnostics
    ///
    /// Never fails: every error is captured in the returned result.
    pub async fn health_check_detailed(&self) -> HealthCheckResult {
        debug!("Executing detailed health check (PING, DBSIZE, INFO memory)");
        let config = &self.inner.health_config;
        let store = &self.inner.store;
        let start = Instant::now();

        if let Err(e) = with_timeout(config.timeout, "PING", store.ping()).await {
            error!("Detailed health check ping failed: {}", e);
            return HealthCheckResult::unhealthy(
                start.elapsed(),
                &e.to_string(),
                HealthCheckMethod::Detailed,
            );
        }

        let total_keys = match with_timeout(config.timeout, "DBSIZE", store.dbsize()).await {
            Ok(total) => total,
            Err(e) => {
                error!("Detailed health check failed to read key count: {}", e);
                return HealthCheckResult::unhealthy(
                    start.elapsed(),
                    &format!("Failed to read key count: {}", e),
                    HealthCheckMethod::Detailed,
                );
            }
        };
        let memory_usage = with_timeout(config.timeout, "INFO memory", store.memory_usage())
            .await
            .unwrap_or_else(|e| {
                warn!("Memory info unavailable: {}", e);
                None
            });

        let elapsed = start.elapsed();
        debug!("Detailed health check passed ({}ms)", elapsed.as_millis());

        let mut result = HealthCheckResult::healthy(
            elapsed,
            HealthCheckMethod::Detailed,
            self.inner.coordinator.pending_count(),
            config.degraded_threshold_ms,
        );
        result.total_keys = Some(total_keys);
        result.memory_usage = memory_usage;
        result
    }

    /// Run the configured check with retries and fallback
    pub async fn health_check_with_retry(&self) -> HealthCheckResult {
        let config = &self.inner.health_config;
        let mut retry_count = 0;
        let mut used_fallback = false;
        let max_retries = if config.enable_retries {
            config.max_retries
        } else {
            0
        };

        loop {
            let result = match config.method {
                HealthCheckMethod::Ping => self.ping_result().await,
                HealthCheckMethod::Detailed => {
                    let detailed = self.health_check_detailed().await;
                    if !detailed.status.is_operational() && config.enable_fallback && !used_fallback {
                        warn!(
                            "Detailed health check failed, falling back to PING: {}",
                            detailed.error.as_deref().unwrap_or("unknown error")
                        );
                        used_fallback = true;
                        self.ping_result().await
                    } else {
                        detailed
                    }
                }
            };

            if result.status.is_operational() || retry_count >= max_retries {
                return result.with_metadata_update(retry_count, used_fallback);
            }

            retry_count += 1;
            warn!(
                "Health check failed (attempt {}/{}), retrying after {:?}",
                retry_count,
                max_retries + 1,
                config.retry_delay
            );
            tokio::time::sleep(config.retry_delay).await;
        }
    }

    async fn ping_result(&self) -> HealthCheckResult {
        let start = Instant::now();
        match self.health_check().await {
            Ok(_) => HealthCheckResult::healthy(
                start.elapsed(),
                HealthCheckMethod::Ping,
                self.inner.coordinator.pending_count(),
                self.inner.health_config.degraded_threshold_ms,
            ),
            Err(e) => {
                HealthCheckResult::unhealthy(start.elapsed(), &e.to_string(), HealthCheckMethod::Ping)
            }
        }
    }
}
