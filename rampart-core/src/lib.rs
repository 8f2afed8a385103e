//! # Rampart Core
//!
//! A resilience execution pipeline wrapping one fallible, latency-variable
//! call with concurrency limiting, failure isolation, bounded retries,
//! time-bounded attempts and fallback substitution.
//!
//! ## Layers
//!
//! - **Bulkhead**: bounds concurrent in-flight attempts
//! - **Circuit Breaker**: fails fast once the recent failure rate is too high
//! - **Time Limiter**: bounds the wait for each attempt
//! - **Retry**: re-issues retryable failures with configurable backoff
//! - **Fallback**: substitutes values for designated terminal failures
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rampart_core::prelude::*;
//! use std::time::Duration;
//!
//! let pipeline: Pipeline<String, String> = Pipeline::new(
//!     PipelineConfig::new("externalWs")
//!         .timeout(Duration::from_millis(500))
//!         .fallback_on(FailureKind::BulkheadFull, "degraded".to_string()),
//! )?;
//!
//! let result = pipeline.execute(|| async { call_external().await }).await;
//! ```

pub mod bulkhead;
pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod fallback;
pub mod logging;
pub mod pipeline;
pub mod retry;
pub mod sliding_window;
pub mod time_limiter;

pub use bulkhead::{Bulkhead, BulkheadConfig, BulkheadError, BulkheadPermit, BulkheadStats};
pub use circuit_breaker::{
    CallNotPermitted, CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError,
    CircuitBreakerStats, CircuitState,
};
pub use clock::{Clock, Instant, ManualClock, Scheduler, SystemClock, TimerRegistration};
pub use config::PipelineConfig;
pub use dispatcher::{DispatchHandle, Dispatcher};
pub use error::{Failure, FailureKind, PipelineError};
pub use fallback::{Fallback, FallbackConfig, FallbackStats};
pub use pipeline::{Pipeline, PipelineBuilder, PipelineHandle, PipelineStats};
pub use retry::{
    Attempt, AttemptOutcome, BackoffStrategy, Retry, RetryConfig, RetryPredicate, RetryStats,
};
pub use sliding_window::SlidingWindow;
pub use time_limiter::{TimeLimiter, TimeLimiterConfig, TimeLimiterStats};

/// Commonly used types.
pub mod prelude {
    pub use crate::bulkhead::BulkheadConfig;
    pub use crate::circuit_breaker::{CircuitBreakerConfig, CircuitState};
    pub use crate::config::PipelineConfig;
    pub use crate::error::{Failure, FailureKind, PipelineError};
    pub use crate::fallback::FallbackConfig;
    pub use crate::pipeline::{Pipeline, PipelineBuilder, PipelineHandle};
    pub use crate::retry::{BackoffStrategy, RetryConfig};
    pub use crate::time_limiter::TimeLimiterConfig;
}
