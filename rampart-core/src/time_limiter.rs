//! Time limiter for a single call attempt.
//!
//! The limit is enforced by a timer registered with the [`Scheduler`] when
//! the attempt starts. Whichever finishes first wins: if the attempt
//! completes, the timer registration is cancelled; if the timer fires, the
//! attempt is abandoned (it keeps running, its outcome is discarded) and the
//! caller receives [`Failure::Timeout`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use rampart_core::time_limiter::{TimeLimiter, TimeLimiterConfig};
//! use std::time::Duration;
//!
//! let limiter = TimeLimiter::new(
//!     TimeLimiterConfig::new("externalWs").timeout_duration(Duration::from_secs(1)),
//!     Scheduler::current()?,
//! );
//!
//! let outcome = limiter.with_timeout(dispatcher.dispatch(call())).await;
//! ```

use crate::clock::Scheduler;
use crate::error::Failure;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{info, warn};

/// Time limiter configuration.
#[derive(Debug, Clone)]
pub struct TimeLimiterConfig {
    /// Name for logging.
    pub name: String,
    /// Upper bound on the wait for one attempt.
    pub timeout_duration: Duration,
}

impl Default for TimeLimiterConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            timeout_duration: Duration::from_secs(1),
        }
    }
}

impl TimeLimiterConfig {
    /// Create a new configuration with a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the per-attempt timeout.
    pub fn timeout_duration(mut self, duration: Duration) -> Self {
        self.timeout_duration = duration;
        self
    }
}

/// Bounds the wait for one attempt.
pub struct TimeLimiter {
    config: TimeLimiterConfig,
    scheduler: Scheduler,
    completed: AtomicU64,
    timed_out: AtomicU64,
}

impl TimeLimiter {
    /// Create a time limiter whose timers run on `scheduler`.
    pub fn new(config: TimeLimiterConfig, scheduler: Scheduler) -> Arc<Self> {
        info!(
            name = %config.name,
            timeout = ?config.timeout_duration,
            "Time limiter initialized"
        );

        Arc::new(Self {
            config,
            scheduler,
            completed: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
        })
    }

    /// Get the time limiter name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Get the configured timeout.
    pub fn timeout_duration(&self) -> Duration {
        self.config.timeout_duration
    }

    /// Wait for `attempt`, or fail with [`Failure::Timeout`] once the limit elapses.
    pub async fn with_timeout<T, E, Fut>(&self, attempt: Fut) -> Result<T, Failure<E>>
    where
        Fut: Future<Output = Result<T, Failure<E>>>,
    {
        let (tx, mut rx) = oneshot::channel();
        let registration = self.scheduler.schedule(self.config.timeout_duration, move || {
            let _ = tx.send(());
        });

        tokio::pin!(attempt);

        tokio::select! {
            biased;

            outcome = &mut attempt => {
                registration.cancel();
                self.completed.fetch_add(1, Ordering::Relaxed);
                outcome
            }
            Ok(()) = &mut rx => {
                self.timed_out.fetch_add(1, Ordering::Relaxed);
                warn!(
                    name = %self.config.name,
                    timeout = ?self.config.timeout_duration,
                    "Attempt timed out"
                );
                Err(Failure::Timeout {
                    name: self.config.name.clone(),
                    after: self.config.timeout_duration,
                })
            }
        }
    }

    /// Get time limiter statistics.
    pub fn stats(&self) -> TimeLimiterStats {
        TimeLimiterStats {
            name: self.config.name.clone(),
            timeout_duration: self.config.timeout_duration,
            completed: self.completed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
        }
    }
}

/// Time limiter statistics.
#[derive(Debug, Clone)]
pub struct TimeLimiterStats {
    /// Time limiter name.
    pub name: String,
    /// Configured timeout.
    pub timeout_duration: Duration,
    /// Attempts that finished within the limit.
    pub completed: u64,
    /// Attempts that were abandoned on timeout.
    pub timed_out: u64,
}
