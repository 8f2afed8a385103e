//! Retry pattern with configurable backoff strategies.
//!
//! Each attempt is a fresh call: the closure passed to [`Retry::call`] is
//! expected to re-acquire every permission it needs. When attempts run out
//! on a retryable failure, the last failure is wrapped in
//! [`Failure::RetriesExhausted`]. Failures whose kind is ignored surface
//! immediately and unwrapped.
//!
//! ## Example
//!
//! ```rust,ignore
//! use rampart_core::retry::{BackoffStrategy, Retry, RetryConfig};
//! use std::time::Duration;
//!
//! let retry = Retry::new(
//!     RetryConfig::new("externalWs")
//!         .max_attempts(3)
//!         .backoff(BackoffStrategy::exponential(Duration::from_millis(100))),
//!     Scheduler::current()?,
//! );
//!
//! let result = retry.call(|attempt| {
//!     let seq = attempt.seq();
//!     async move { fetch(seq).await.map_err(Failure::Operation) }
//! }).await;
//! ```

use crate::clock::{Instant, Scheduler};
use crate::error::{Failure, FailureKind};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Predicate deciding whether a raw operation error is worth retrying.
pub type RetryPredicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Backoff strategy for retries.
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffStrategy {
    /// No delay between retries.
    None,
    /// Constant delay between retries.
    Constant(Duration),
    /// Linear backoff: delay increases by a fixed amount.
    Linear {
        /// Initial delay.
        initial: Duration,
        /// Increment per retry.
        increment: Duration,
        /// Maximum delay.
        max: Duration,
    },
    /// Exponential backoff: delay is multiplied each retry.
    Exponential {
        /// Initial delay.
        initial: Duration,
        /// Multiplier (typically 2.0).
        multiplier: f64,
        /// Maximum delay.
        max: Duration,
    },
    /// Exponential backoff with up to 50% random jitter added.
    ExponentialWithJitter {
        /// Initial delay.
        initial: Duration,
        /// Multiplier (typically 2.0).
        multiplier: f64,
        /// Maximum delay.
        max: Duration,
    },
}

impl BackoffStrategy {
    /// Create constant backoff.
    pub fn constant(delay: Duration) -> Self {
        Self::Constant(delay)
    }

    /// Create linear backoff.
    pub fn linear(initial: Duration, increment: Duration) -> Self {
        Self::Linear {
            initial,
            increment,
            max: Duration::from_secs(60),
        }
    }

    /// Create exponential backoff.
    pub fn exponential(initial: Duration) -> Self {
        Self::Exponential {
            initial,
            multiplier: 2.0,
            max: Duration::from_secs(60),
        }
    }

    /// Create exponential backoff with jitter.
    pub fn exponential_with_jitter(initial: Duration) -> Self {
        Self::ExponentialWithJitter {
            initial,
            multiplier: 2.0,
            max: Duration::from_secs(60),
        }
    }

    /// Set the multiplier of an exponential strategy.
    pub fn with_multiplier(self, multiplier: f64) -> Self {
        match self {
            Self::Exponential { initial, max, .. } => Self::Exponential {
                initial,
                multiplier,
                max,
            },
            Self::ExponentialWithJitter { initial, max, .. } => Self::ExponentialWithJitter {
                initial,
                multiplier,
                max,
            },
            other => other,
        }
    }

    /// Set maximum delay.
    pub fn with_max(self, max: Duration) -> Self {
        match self {
            Self::Linear {
                initial, increment, ..
            } => Self::Linear {
                initial,
                increment,
                max,
            },
            Self::Exponential {
                initial,
                multiplier,
                ..
            } => Self::Exponential {
                initial,
                multiplier,
                max,
            },
            Self::ExponentialWithJitter {
                initial,
                multiplier,
                ..
            } => Self::ExponentialWithJitter {
                initial,
                multiplier,
                max,
            },
            other => other,
        }
    }

    /// Calculate the delay after a failed attempt (0-indexed retry number).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self {
            Self::None => Duration::ZERO,
            Self::Constant(d) => *d,
            Self::Linear {
                initial,
                increment,
                max,
            } => {
                let delay = initial.saturating_add(increment.saturating_mul(attempt));
                delay.min(*max)
            }
            Self::Exponential {
                initial,
                multiplier,
                max,
            } => scaled(*initial, *multiplier, attempt).min(*max),
            Self::ExponentialWithJitter {
                initial,
                multiplier,
                max,
            } => {
                let base = scaled(*initial, *multiplier, attempt).min(*max);
                let jitter = base.mul_f64(rand::random::<f64>() * 0.5);
                base.saturating_add(jitter).min(*max)
            }
        }
    }
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        Self::Constant(Duration::from_millis(500))
    }
}

fn scaled(initial: Duration, multiplier: f64, attempt: u32) -> Duration {
    let factor = multiplier.powi(attempt.min(i32::MAX as u32) as i32);
    let millis = initial.as_millis() as f64 * factor;
    if !millis.is_finite() || millis >= u64::MAX as f64 {
        return Duration::MAX;
    }
    Duration::from_millis(millis as u64)
}

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Name for logging.
    pub name: String,
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Backoff strategy.
    pub backoff: BackoffStrategy,
    /// Failure kinds that are never retried.
    pub ignored: BTreeSet<FailureKind>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            max_attempts: 3,
            backoff: BackoffStrategy::default(),
            ignored: FailureKind::ALL
                .into_iter()
                .filter(|kind| !kind.is_retryable_by_default())
                .collect(),
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration with a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the maximum number of attempts.
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the backoff strategy.
    pub fn backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Never retry failures of this kind.
    pub fn ignore(mut self, kind: FailureKind) -> Self {
        self.ignored.insert(kind);
        self
    }

    /// Retry failures of this kind.
    pub fn retry_on(mut self, kind: FailureKind) -> Self {
        self.ignored.remove(&kind);
        self
    }

    /// Whether failures of `kind` are retried.
    pub fn is_retryable(&self, kind: FailureKind) -> bool {
        kind != FailureKind::RetriesExhausted && !self.ignored.contains(&kind)
    }
}

/// Outcome of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Still running.
    Pending,
    /// Produced a value.
    Success,
    /// Failed with the given kind.
    Failure(FailureKind),
}

/// One invocation of the protected operation.
#[derive(Debug, Clone)]
pub struct Attempt {
    seq: u32,
    started_at: Instant,
    ended_at: Option<Instant>,
    outcome: AttemptOutcome,
}

impl Attempt {
    fn start(seq: u32) -> Self {
        Self {
            seq,
            started_at: Instant::now(),
            ended_at: None,
            outcome: AttemptOutcome::Pending,
        }
    }

    fn finish(&mut self, outcome: AttemptOutcome) {
        self.ended_at = Some(Instant::now());
        self.outcome = outcome;
    }

    /// Sequence number, starting at 1.
    pub fn seq(&self) -> u32 {
        self.seq
    }

    /// Whether this is a retry rather than the first attempt.
    pub fn is_retry(&self) -> bool {
        self.seq > 1
    }

    /// When the attempt started.
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// When the attempt ended, if it has.
    pub fn ended_at(&self) -> Option<Instant> {
        self.ended_at
    }

    /// Current outcome.
    pub fn outcome(&self) -> AttemptOutcome {
        self.outcome
    }

    /// Time spent so far, or in total once ended.
    pub fn elapsed(&self) -> Duration {
        let end = self.ended_at.unwrap_or_else(Instant::now);
        end.saturating_duration_since(self.started_at)
    }
}

/// Retry executor.
pub struct Retry {
    config: RetryConfig,
    scheduler: Scheduler,
    successful_without_retry: AtomicU64,
    successful_with_retry: AtomicU64,
    failed_without_retry: AtomicU64,
    failed_with_retry: AtomicU64,
    total_attempts: AtomicU64,
}

impl Retry {
    /// Create a retry executor whose backoff delays run on `scheduler`.
    pub fn new(config: RetryConfig, scheduler: Scheduler) -> Arc<Self> {
        info!(
            name = %config.name,
            max_attempts = config.max_attempts,
            backoff = ?config.backoff,
            "Retry initialized"
        );

        Arc::new(Self {
            config,
            scheduler,
            successful_without_retry: AtomicU64::new(0),
            successful_with_retry: AtomicU64::new(0),
            failed_without_retry: AtomicU64::new(0),
            failed_with_retry: AtomicU64::new(0),
            total_attempts: AtomicU64::new(0),
        })
    }

    /// Get the retry name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Get the configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Execute with retry logic.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, Failure<E>>
    where
        F: FnMut(&Attempt) -> Fut,
        Fut: Future<Output = Result<T, Failure<E>>>,
    {
        self.call_if(f, |_: &E| true).await
    }

    /// Execute with retry logic, retrying operation errors only when
    /// `should_retry` accepts them.
    pub async fn call_if<F, Fut, T, E, P>(&self, mut f: F, should_retry: P) -> Result<T, Failure<E>>
    where
        F: FnMut(&Attempt) -> Fut,
        Fut: Future<Output = Result<T, Failure<E>>>,
        P: Fn(&E) -> bool,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut seq = 1;

        loop {
            let mut attempt = Attempt::start(seq);
            self.total_attempts.fetch_add(1, Ordering::Relaxed);
            let result = f(&attempt).await;

            let failure = match result {
                Ok(value) => {
                    attempt.finish(AttemptOutcome::Success);
                    if attempt.is_retry() {
                        debug!(name = %self.config.name, attempt = seq, "Retry succeeded");
                        self.successful_with_retry.fetch_add(1, Ordering::Relaxed);
                    } else {
                        self.successful_without_retry.fetch_add(1, Ordering::Relaxed);
                    }
                    return Ok(value);
                }
                Err(failure) => failure,
            };

            attempt.finish(AttemptOutcome::Failure(failure.kind()));

            if !self.should_retry(&failure, &should_retry) {
                debug!(
                    name = %self.config.name,
                    attempt = seq,
                    kind = %failure.kind(),
                    "Failure is not retryable"
                );
                self.record_failed(&attempt);
                return Err(failure);
            }

            if seq >= max_attempts {
                warn!(
                    name = %self.config.name,
                    attempts = seq,
                    kind = %failure.kind(),
                    elapsed = ?attempt.elapsed(),
                    "Retries exhausted"
                );
                self.record_failed(&attempt);
                return Err(Failure::RetriesExhausted {
                    attempts: seq,
                    last: Box::new(failure),
                });
            }

            let delay = self.config.backoff.delay_for_attempt(seq - 1);
            debug!(
                name = %self.config.name,
                attempt = seq,
                kind = %failure.kind(),
                delay = ?delay,
                "Attempt failed, waiting before retry"
            );

            self.scheduler.sleep(delay).await;
            seq += 1;
        }
    }

    fn should_retry<E, P>(&self, failure: &Failure<E>, should_retry: &P) -> bool
    where
        P: Fn(&E) -> bool,
    {
        if !self.config.is_retryable(failure.kind()) {
            return false;
        }
        match failure {
            Failure::Operation(e) => should_retry(e),
            _ => true,
        }
    }

    fn record_failed(&self, attempt: &Attempt) {
        if attempt.is_retry() {
            self.failed_with_retry.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_without_retry.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Get retry statistics.
    pub fn stats(&self) -> RetryStats {
        RetryStats {
            name: self.config.name.clone(),
            successful_without_retry: self.successful_without_retry.load(Ordering::Relaxed),
            successful_with_retry: self.successful_with_retry.load(Ordering::Relaxed),
            failed_without_retry: self.failed_without_retry.load(Ordering::Relaxed),
            failed_with_retry: self.failed_with_retry.load(Ordering::Relaxed),
            total_attempts: self.total_attempts.load(Ordering::Relaxed),
        }
    }
}

/// Retry statistics.
#[derive(Debug, Clone)]
pub struct RetryStats {
    /// Retry name.
    pub name: String,
    /// Calls that succeeded on the first attempt.
    pub successful_without_retry: u64,
    /// Calls that succeeded after at least one retry.
    pub successful_with_retry: u64,
    /// Calls that failed on the first attempt without retrying.
    pub failed_without_retry: u64,
    /// Calls that failed after at least one retry.
    pub failed_with_retry: u64,
    /// Attempts made across all calls.
    pub total_attempts: u64,
}
