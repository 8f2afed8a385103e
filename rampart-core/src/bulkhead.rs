//! Bulkhead pattern for bounding concurrent calls.
//!
//! The bulkhead limits how many calls may be in flight at once. With a zero
//! `max_wait` it rejects immediately when saturated; otherwise callers queue
//! for up to `max_wait` (optionally bounded by `queue_size`) before being
//! rejected.
//!
//! ## Example
//!
//! ```
//! use rampart_core::bulkhead::{Bulkhead, BulkheadConfig};
//!
//! # tokio_test::block_on(async {
//! let bulkhead = Bulkhead::new(BulkheadConfig::new("externalWs", 1));
//!
//! let permit = bulkhead.acquire().await.unwrap();
//! assert!(bulkhead.try_acquire().is_err());
//!
//! permit.release();
//! assert!(bulkhead.has_capacity());
//! # });
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, trace, warn};

/// Bulkhead configuration.
#[derive(Debug, Clone)]
pub struct BulkheadConfig {
    /// Name of the bulkhead (for logging).
    pub name: String,
    /// Maximum concurrent executions.
    pub max_concurrent: u32,
    /// Maximum time to wait for a permit. Zero rejects immediately.
    pub max_wait: Duration,
    /// Maximum number of callers waiting for a permit.
    pub queue_size: Option<u32>,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            max_concurrent: 25,
            max_wait: Duration::ZERO,
            queue_size: None,
        }
    }
}

impl BulkheadConfig {
    /// Create a new configuration.
    pub fn new(name: impl Into<String>, max_concurrent: u32) -> Self {
        Self {
            name: name.into(),
            max_concurrent,
            ..Default::default()
        }
    }

    /// Set the maximum wait time.
    pub fn max_wait(mut self, duration: Duration) -> Self {
        self.max_wait = duration;
        self
    }

    /// Set the queue size.
    pub fn queue_size(mut self, size: u32) -> Self {
        self.queue_size = Some(size);
        self
    }

    /// Whether saturated calls are rejected without waiting.
    pub fn is_non_blocking(&self) -> bool {
        self.max_wait.is_zero()
    }
}

/// Rejection raised when no permit could be obtained.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Bulkhead '{name}' is full")]
pub struct BulkheadFull {
    /// Bulkhead name.
    pub name: String,
}

/// Bulkhead error for the scoped `call` helpers.
#[derive(Debug)]
pub enum BulkheadError<E> {
    /// Bulkhead is full, request rejected.
    Full,
    /// Execution failed.
    Execution(E),
}

impl<E: fmt::Display> fmt::Display for BulkheadError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full => write!(f, "Bulkhead is full"),
            Self::Execution(e) => write!(f, "Execution failed: {}", e),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for BulkheadError<E> {}

/// One unit of bulkhead capacity.
///
/// Released when dropped. `release` consumes the permit, so a permit can
/// never be handed back twice.
pub struct BulkheadPermit {
    _permit: OwnedSemaphorePermit,
}

impl BulkheadPermit {
    /// Give the capacity back.
    pub fn release(self) {
        drop(self);
    }
}

impl fmt::Debug for BulkheadPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BulkheadPermit").finish()
    }
}

/// Decrements the waiting count even if the acquiring future is dropped.
struct WaitingGuard<'a>(&'a AtomicU32);

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Bulkhead for limiting concurrent access.
pub struct Bulkhead {
    config: BulkheadConfig,
    semaphore: Arc<Semaphore>,
    waiting_count: AtomicU32,
    total_calls: AtomicU64,
    total_rejections: AtomicU64,
    total_timeouts: AtomicU64,
}

impl Bulkhead {
    /// Create a new bulkhead.
    pub fn new(config: BulkheadConfig) -> Arc<Self> {
        tracing::info!(
            name = %config.name,
            max_concurrent = config.max_concurrent,
            max_wait = ?config.max_wait,
            "Bulkhead initialized"
        );

        Arc::new(Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent as usize)),
            config,
            waiting_count: AtomicU32::new(0),
            total_calls: AtomicU64::new(0),
            total_rejections: AtomicU64::new(0),
            total_timeouts: AtomicU64::new(0),
        })
    }

    /// Get the bulkhead name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Get the configuration.
    pub fn config(&self) -> &BulkheadConfig {
        &self.config
    }

    /// Get current number of calls holding a permit.
    pub fn active_count(&self) -> u32 {
        self.config.max_concurrent - self.available_permits()
    }

    /// Get current number of waiting callers.
    pub fn waiting_count(&self) -> u32 {
        self.waiting_count.load(Ordering::SeqCst)
    }

    /// Get available permits.
    pub fn available_permits(&self) -> u32 {
        self.semaphore.available_permits() as u32
    }

    /// Check if the bulkhead has capacity.
    pub fn has_capacity(&self) -> bool {
        self.semaphore.available_permits() > 0
    }

    /// Obtain a permit, waiting up to `max_wait` when configured to.
    pub async fn acquire(&self) -> Result<BulkheadPermit, BulkheadFull> {
        if self.config.is_non_blocking() {
            return self.try_acquire();
        }

        self.total_calls.fetch_add(1, Ordering::Relaxed);

        // Fast path: no need to queue.
        if let Ok(permit) = Arc::clone(&self.semaphore).try_acquire_owned() {
            return Ok(BulkheadPermit { _permit: permit });
        }

        let queue_limit = self.config.queue_size.unwrap_or(u32::MAX);
        let joined = self
            .waiting_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |waiting| {
                (waiting < queue_limit).then_some(waiting + 1)
            });
        if joined.is_err() {
            self.total_rejections.fetch_add(1, Ordering::Relaxed);
            debug!(name = %self.config.name, "Bulkhead queue full, rejecting call");
            return Err(self.full());
        }
        let _waiting = WaitingGuard(&self.waiting_count);

        match tokio::time::timeout(
            self.config.max_wait,
            Arc::clone(&self.semaphore).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => Ok(BulkheadPermit { _permit: permit }),
            Ok(Err(_)) => {
                self.total_rejections.fetch_add(1, Ordering::Relaxed);
                Err(self.full())
            }
            Err(_) => {
                self.total_timeouts.fetch_add(1, Ordering::Relaxed);
                self.total_rejections.fetch_add(1, Ordering::Relaxed);
                warn!(
                    name = %self.config.name,
                    max_wait = ?self.config.max_wait,
                    "Bulkhead timeout waiting for permit"
                );
                Err(self.full())
            }
        }
    }

    /// Obtain a permit without waiting.
    pub fn try_acquire(&self) -> Result<BulkheadPermit, BulkheadFull> {
        self.total_calls.fetch_add(1, Ordering::Relaxed);

        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => {
                trace!(name = %self.config.name, "Bulkhead permit acquired");
                Ok(BulkheadPermit { _permit: permit })
            }
            Err(_) => {
                self.total_rejections.fetch_add(1, Ordering::Relaxed);
                debug!(
                    name = %self.config.name,
                    max_concurrent = self.config.max_concurrent,
                    "Bulkhead full, rejecting call"
                );
                Err(self.full())
            }
        }
    }

    /// Execute with bulkhead protection.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, BulkheadError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.acquire().await.map_err(|_| BulkheadError::Full)?;
        let result = f().await;
        permit.release();
        result.map_err(BulkheadError::Execution)
    }

    /// Try to execute immediately without waiting.
    pub async fn try_call<F, Fut, T, E>(&self, f: F) -> Result<T, BulkheadError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = self.try_acquire().map_err(|_| BulkheadError::Full)?;
        let result = f().await;
        permit.release();
        result.map_err(BulkheadError::Execution)
    }

    /// Get bulkhead statistics.
    pub fn stats(&self) -> BulkheadStats {
        BulkheadStats {
            name: self.config.name.clone(),
            max_concurrent: self.config.max_concurrent,
            active_count: self.active_count(),
            waiting_count: self.waiting_count(),
            available_permits: self.available_permits(),
            total_calls: self.total_calls.load(Ordering::Relaxed),
            total_rejections: self.total_rejections.load(Ordering::Relaxed),
            total_timeouts: self.total_timeouts.load(Ordering::Relaxed),
        }
    }

    fn full(&self) -> BulkheadFull {
        BulkheadFull {
            name: self.config.name.clone(),
        }
    }
}

/// Bulkhead statistics.
#[derive(Debug, Clone)]
pub struct BulkheadStats {
    /// Bulkhead name.
    pub name: String,
    /// Maximum concurrent executions.
    pub max_concurrent: u32,
    /// Current active executions.
    pub active_count: u32,
    /// Current waiting callers.
    pub waiting_count: u32,
    /// Available permits.
    pub available_permits: u32,
    /// Total acquisition attempts.
    pub total_calls: u64,
    /// Total rejections.
    pub total_rejections: u64,
    /// Rejections caused by waiting longer than `max_wait`.
    pub total_timeouts: u64,
}

impl BulkheadStats {
    /// Calculate utilization (0.0 - 1.0).
    pub fn utilization(&self) -> f64 {
        if self.max_concurrent == 0 {
            return 1.0;
        }
        self.active_count as f64 / self.max_concurrent as f64
    }
}
