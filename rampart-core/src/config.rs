//! Per-call-site pipeline configuration.
//!
//! A [`PipelineConfig`] is built once per protected call-site and handed to
//! [`PipelineBuilder`](crate::pipeline::PipelineBuilder). It is not changed
//! afterwards.
//!
//! ## Example
//!
//! ```rust,ignore
//! use rampart_core::config::PipelineConfig;
//! use rampart_core::error::FailureKind;
//! use std::time::Duration;
//!
//! let config = PipelineConfig::new("externalWs")
//!     .max_concurrent_calls(10)
//!     .timeout(Duration::from_millis(500))
//!     .fallback_on(FailureKind::BulkheadFull, "degraded".to_string());
//!
//! config.validate()?;
//! ```

use crate::bulkhead::BulkheadConfig;
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::{FailureKind, PipelineError, Result};
use crate::fallback::FallbackConfig;
use crate::retry::{BackoffStrategy, RetryConfig};
use crate::time_limiter::TimeLimiterConfig;
use std::time::Duration;

/// Configuration of every layer of one pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig<T = String> {
    /// Name of the protected call-site.
    pub name: String,
    /// Bulkhead settings.
    pub bulkhead: BulkheadConfig,
    /// Circuit breaker settings.
    pub circuit_breaker: CircuitBreakerConfig,
    /// Retry settings.
    pub retry: RetryConfig,
    /// Per-attempt timeout settings.
    pub time_limiter: TimeLimiterConfig,
    /// Fallback substitutes.
    pub fallback: FallbackConfig<T>,
}

impl<T> Default for PipelineConfig<T> {
    fn default() -> Self {
        Self::new("default")
    }
}

impl<T> PipelineConfig<T> {
    /// Create a configuration with default settings, naming every layer `name`.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            bulkhead: BulkheadConfig {
                name: name.clone(),
                ..Default::default()
            },
            circuit_breaker: CircuitBreakerConfig::new(name.clone()),
            retry: RetryConfig::new(name.clone()),
            time_limiter: TimeLimiterConfig::new(name.clone()),
            fallback: FallbackConfig::new(name.clone()),
            name,
        }
    }

    /// Replace the bulkhead settings.
    pub fn bulkhead(mut self, config: BulkheadConfig) -> Self {
        self.bulkhead = config;
        self
    }

    /// Replace the circuit breaker settings.
    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }

    /// Replace the retry settings.
    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.retry = config;
        self
    }

    /// Replace the time limiter settings.
    pub fn time_limiter(mut self, config: TimeLimiterConfig) -> Self {
        self.time_limiter = config;
        self
    }

    /// Replace the fallback settings.
    pub fn fallback(mut self, config: FallbackConfig<T>) -> Self {
        self.fallback = config;
        self
    }

    /// Set the maximum number of concurrent calls.
    pub fn max_concurrent_calls(mut self, max: u32) -> Self {
        self.bulkhead.max_concurrent = max;
        self
    }

    /// Set how long a saturated call waits for capacity. Zero rejects immediately.
    pub fn max_wait(mut self, wait: Duration) -> Self {
        self.bulkhead.max_wait = wait;
        self
    }

    /// Set the maximum number of attempts, including the first.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.retry.max_attempts = attempts;
        self
    }

    /// Set the wait between attempts.
    pub fn backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.retry.backoff = backoff;
        self
    }

    /// Set the per-attempt timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.time_limiter.timeout_duration = timeout;
        self
    }

    /// Substitute `value` for failures of `kind`.
    pub fn fallback_on(mut self, kind: FailureKind, value: T) -> Self {
        self.fallback.substitutes.insert(kind, value);
        self
    }

    /// Check that every setting is usable.
    pub fn validate(&self) -> Result<()> {
        let cb = &self.circuit_breaker;

        if self.bulkhead.max_concurrent == 0 {
            return invalid("bulkhead max_concurrent must be at least 1");
        }
        if self.bulkhead.queue_size == Some(0) && !self.bulkhead.is_non_blocking() {
            return invalid("bulkhead queue_size must be at least 1 when max_wait is set");
        }
        if !(cb.failure_rate_threshold > 0.0 && cb.failure_rate_threshold <= 100.0) {
            return invalid("failure_rate_threshold must be in (0, 100]");
        }
        if cb.sliding_window_size == 0 {
            return invalid("sliding_window_size must be at least 1");
        }
        if cb.minimum_number_of_calls == 0 {
            return invalid("minimum_number_of_calls must be at least 1");
        }
        if cb.minimum_number_of_calls > cb.sliding_window_size {
            return invalid("minimum_number_of_calls must not exceed sliding_window_size");
        }
        if cb.permitted_calls_in_half_open_state == 0 {
            return invalid("permitted_calls_in_half_open_state must be at least 1");
        }
        if self.retry.max_attempts == 0 {
            return invalid("max_attempts must be at least 1");
        }
        if let BackoffStrategy::Exponential { multiplier, .. }
        | BackoffStrategy::ExponentialWithJitter { multiplier, .. } = self.retry.backoff
            && multiplier < 1.0
        {
            return invalid("backoff multiplier must be at least 1.0");
        }
        if self.time_limiter.timeout_duration.is_zero() {
            return invalid("timeout_duration must be greater than zero");
        }

        Ok(())
    }
}

fn invalid(message: &str) -> Result<()> {
    Err(PipelineError::InvalidConfig(message.to_string()))
}
