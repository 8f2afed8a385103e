//! Circuit Breaker pattern implementation.
//!
//! The circuit breaker tracks the outcomes of recent calls in a count-based
//! sliding window and "opens" to reject calls once the failure rate crosses a
//! threshold.
//!
//! ## States
//!
//! - **Closed**: Normal operation, calls pass through and are recorded
//! - **Open**: Calls are rejected immediately until the wait duration elapses
//! - **Half-Open**: A fixed batch of trial calls checks for recovery
//!
//! ## State Transitions
//!
//! ```text
//! Closed    → Open:      samples >= minimum AND failure rate >= threshold
//! Open      → Half-Open: wait duration elapsed since opening
//! Half-Open → Closed:    trial batch failure rate < threshold (window cleared)
//! Half-Open → Open:      trial batch failure rate >= threshold (wait restarts)
//! ```
//!
//! Every permission decision and every transition happens inside one mutex
//! critical section, so two racing callers can never take the same half-open
//! trial slot.
//!
//! ## Example
//!
//! ```rust,ignore
//! use rampart_core::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! let breaker = CircuitBreaker::new(
//!     CircuitBreakerConfig::new("externalWs")
//!         .failure_rate_threshold(50.0)
//!         .sliding_window_size(10)
//!         .minimum_number_of_calls(5)
//!         .wait_duration_in_open_state(Duration::from_secs(30)),
//! );
//!
//! let permit = breaker.try_acquire_permission()?;
//! match external_call().await {
//!     Ok(v) => { permit.on_success(); Ok(v) }
//!     Err(e) => { permit.on_failure(); Err(e) }
//! }
//! ```

use crate::clock::{Clock, Instant, SystemClock};
use crate::sliding_window::SlidingWindow;
use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, requests pass through normally.
    Closed,
    /// Circuit is open, requests are rejected.
    Open,
    /// Circuit is half-open, testing recovery.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Name of the circuit breaker (for logging).
    pub name: String,
    /// Failure rate, in percent, at which the circuit opens.
    pub failure_rate_threshold: f64,
    /// Number of most recent outcomes kept while closed.
    pub sliding_window_size: u32,
    /// Outcomes required before the failure rate is evaluated.
    pub minimum_number_of_calls: u32,
    /// Time to stay open before admitting trial calls.
    pub wait_duration_in_open_state: Duration,
    /// Size of the half-open trial batch.
    pub permitted_calls_in_half_open_state: u32,
    /// Move from open to half-open automatically once the wait has elapsed.
    pub automatic_transitions: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            failure_rate_threshold: 50.0,
            sliding_window_size: 100,
            minimum_number_of_calls: 100,
            wait_duration_in_open_state: Duration::from_secs(60),
            permitted_calls_in_half_open_state: 10,
            automatic_transitions: true,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new configuration with a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set the failure rate threshold (percent).
    pub fn failure_rate_threshold(mut self, percent: f64) -> Self {
        self.failure_rate_threshold = percent;
        self
    }

    /// Set the sliding window size.
    pub fn sliding_window_size(mut self, size: u32) -> Self {
        self.sliding_window_size = size;
        self
    }

    /// Set the minimum number of calls before evaluating the failure rate.
    pub fn minimum_number_of_calls(mut self, count: u32) -> Self {
        self.minimum_number_of_calls = count;
        self
    }

    /// Set the open-state wait duration.
    pub fn wait_duration_in_open_state(mut self, wait: Duration) -> Self {
        self.wait_duration_in_open_state = wait;
        self
    }

    /// Set the half-open trial batch size.
    pub fn permitted_calls_in_half_open_state(mut self, count: u32) -> Self {
        self.permitted_calls_in_half_open_state = count;
        self
    }

    /// Enable or disable the automatic open to half-open transition.
    pub fn automatic_transitions(mut self, enabled: bool) -> Self {
        self.automatic_transitions = enabled;
        self
    }
}

/// Rejection raised when the breaker refuses a call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("CircuitBreaker '{name}' is {state} and does not permit further calls")]
pub struct CallNotPermitted {
    /// Circuit breaker name.
    pub name: String,
    /// State at the time of rejection.
    pub state: CircuitState,
}

/// Circuit breaker error for the `call` helper.
#[derive(Debug)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open, request was rejected.
    Open,
    /// Circuit rejected due to half-open limit.
    HalfOpenLimitReached,
    /// Request was executed but failed.
    Execution(E),
}

impl<E: fmt::Display> fmt::Display for CircuitBreakerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "Circuit breaker is open"),
            Self::HalfOpenLimitReached => write!(f, "Half-open request limit reached"),
            Self::Execution(e) => write!(f, "Execution failed: {}", e),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for CircuitBreakerError<E> {}

/// Mutable breaker state; only touched under the breaker's mutex.
struct BreakerInner {
    state: CircuitState,
    /// Bumped on every transition; outcomes of calls permitted under an
    /// older epoch are discarded.
    epoch: u64,
    window: SlidingWindow,
    opened_at: Option<Instant>,
    trial_remaining: u32,
    trial_completed: u32,
    trial_failures: u32,
}

/// Circuit breaker shared by every caller of one protected call-site.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<BreakerInner>,
    total_requests: AtomicU64,
    total_successes: AtomicU64,
    total_failures: AtomicU64,
    total_rejections: AtomicU64,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given configuration.
    pub fn new(config: CircuitBreakerConfig) -> Arc<Self> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a circuit breaker reading time from `clock`.
    pub fn with_clock(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Arc<Self> {
        info!(
            name = %config.name,
            failure_rate_threshold = config.failure_rate_threshold,
            sliding_window_size = config.sliding_window_size,
            minimum_number_of_calls = config.minimum_number_of_calls,
            wait_duration = ?config.wait_duration_in_open_state,
            "Circuit breaker initialized"
        );

        let window = SlidingWindow::new(
            config.sliding_window_size as usize,
            config.minimum_number_of_calls as usize,
        );

        Arc::new(Self {
            config,
            clock,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                epoch: 0,
                window,
                opened_at: None,
                trial_remaining: 0,
                trial_completed: 0,
                trial_failures: 0,
            }),
            total_requests: AtomicU64::new(0),
            total_successes: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            total_rejections: AtomicU64::new(0),
        })
    }

    /// Get the circuit breaker name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Get the configuration.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Get the current circuit state.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.maybe_transition_to_half_open(&mut inner);
        inner.state
    }

    /// Check whether a call would currently be permitted, without taking a slot.
    pub fn is_call_permitted(&self) -> bool {
        let mut inner = self.inner.lock();
        self.maybe_transition_to_half_open(&mut inner);
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => inner.trial_remaining > 0,
        }
    }

    /// Ask for permission to make one call.
    ///
    /// In half-open state the check and the decrement of the trial counter
    /// happen in the same critical section.
    pub fn try_acquire_permission(self: &Arc<Self>) -> Result<CallPermit, CallNotPermitted> {
        self.total_requests.fetch_add(1, Ordering::Relaxed);

        let mut inner = self.inner.lock();
        self.maybe_transition_to_half_open(&mut inner);

        let permitted = match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if inner.trial_remaining > 0 {
                    inner.trial_remaining -= 1;
                    true
                } else {
                    false
                }
            }
        };

        if !permitted {
            let state = inner.state;
            drop(inner);
            self.total_rejections.fetch_add(1, Ordering::Relaxed);
            debug!(name = %self.config.name, state = %state, "Circuit breaker rejected call");
            return Err(CallNotPermitted {
                name: self.config.name.clone(),
                state,
            });
        }

        Ok(CallPermit {
            breaker: Arc::clone(self),
            epoch: inner.epoch,
            settled: false,
        })
    }

    /// Execute a function with circuit breaker protection.
    pub async fn call<F, Fut, T, E>(self: &Arc<Self>, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = match self.try_acquire_permission() {
            Ok(permit) => permit,
            Err(rejection) if rejection.state == CircuitState::HalfOpen => {
                return Err(CircuitBreakerError::HalfOpenLimitReached);
            }
            Err(_) => return Err(CircuitBreakerError::Open),
        };

        match f().await {
            Ok(result) => {
                permit.on_success();
                Ok(result)
            }
            Err(e) => {
                permit.on_failure();
                Err(CircuitBreakerError::Execution(e))
            }
        }
    }

    /// Record a successful call made without a permit.
    ///
    /// Only counts while closed. The half-open batch is judged on the
    /// outcomes of its trial permits alone.
    pub fn record_success(&self) {
        self.record_outcome(None, true);
    }

    /// Record a failed call made without a permit.
    ///
    /// Only counts while closed, like [`record_success`](Self::record_success).
    pub fn record_failure(&self) {
        self.record_outcome(None, false);
    }

    /// Manually reset the circuit breaker to closed state.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        self.transition_to_closed(&mut inner);
    }

    /// Manually force the circuit open.
    pub fn force_open(&self) {
        let mut inner = self.inner.lock();
        let now = self.clock.now();
        self.transition_to_open(&mut inner, now);
    }

    // `epoch` is `None` for outcomes recorded without a permit.
    fn record_outcome(&self, epoch: Option<u64>, success: bool) {
        let mut inner = self.inner.lock();
        if epoch.is_none() && inner.state != CircuitState::Closed {
            debug!(
                name = %self.config.name,
                state = %inner.state,
                success,
                "Ignoring outcome recorded without a permit"
            );
            return;
        }

        if success {
            self.total_successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.total_failures.fetch_add(1, Ordering::Relaxed);
        }

        if let Some(epoch) = epoch
            && epoch != inner.epoch
        {
            trace!(
                name = %self.config.name,
                state = %inner.state,
                "Discarding outcome of a call permitted before the last transition"
            );
            return;
        }

        match inner.state {
            CircuitState::Closed => {
                inner.window.record(success);
                if let Some(rate) = inner.window.failure_rate()
                    && rate >= self.config.failure_rate_threshold
                {
                    let now = self.clock.now();
                    self.transition_to_open(&mut inner, now);
                }
            }
            CircuitState::HalfOpen => {
                inner.trial_completed += 1;
                if !success {
                    inner.trial_failures += 1;
                }

                let batch = self.config.permitted_calls_in_half_open_state.max(1);
                if inner.trial_completed >= batch {
                    let rate = inner.trial_failures as f64 * 100.0 / inner.trial_completed as f64;
                    if rate >= self.config.failure_rate_threshold {
                        let now = self.clock.now();
                        self.transition_to_open(&mut inner, now);
                    } else {
                        self.transition_to_closed(&mut inner);
                    }
                }
            }
            CircuitState::Open => {
                debug!(name = %self.config.name, "Outcome recorded while circuit open");
            }
        }
    }

    /// Give back a half-open trial slot whose call never reported an outcome.
    fn release_unresolved(&self, epoch: u64) {
        let mut inner = self.inner.lock();
        if inner.epoch == epoch && inner.state == CircuitState::HalfOpen {
            inner.trial_remaining += 1;
        }
    }

    fn transition_to_open(&self, inner: &mut BreakerInner, now: Instant) {
        warn!(
            name = %self.config.name,
            from = %inner.state,
            failure_rate = inner.window.failure_rate_or_zero(),
            trial_failures = inner.trial_failures,
            "Circuit breaker OPENED"
        );
        inner.state = CircuitState::Open;
        inner.epoch += 1;
        inner.opened_at = Some(now);
        inner.trial_remaining = 0;
        inner.trial_completed = 0;
        inner.trial_failures = 0;
    }

    fn transition_to_closed(&self, inner: &mut BreakerInner) {
        if inner.state != CircuitState::Closed {
            info!(name = %self.config.name, from = %inner.state, "Circuit breaker CLOSED");
        }
        inner.state = CircuitState::Closed;
        inner.epoch += 1;
        inner.opened_at = None;
        inner.window.clear();
        inner.trial_remaining = 0;
        inner.trial_completed = 0;
        inner.trial_failures = 0;
    }

    /// Transition to half-open state if the open wait has elapsed.
    fn maybe_transition_to_half_open(&self, inner: &mut BreakerInner) {
        if !self.config.automatic_transitions || inner.state != CircuitState::Open {
            return;
        }

        if let Some(opened_at) = inner.opened_at
            && self.clock.now().saturating_duration_since(opened_at)
                >= self.config.wait_duration_in_open_state
        {
            debug!(name = %self.config.name, "Circuit breaker transitioning to HALF_OPEN");
            inner.state = CircuitState::HalfOpen;
            inner.epoch += 1;
            inner.trial_remaining = self.config.permitted_calls_in_half_open_state.max(1);
            inner.trial_completed = 0;
            inner.trial_failures = 0;
        }
    }

    // Metrics

    /// Get total permission requests.
    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    /// Get total successful outcomes.
    pub fn total_successes(&self) -> u64 {
        self.total_successes.load(Ordering::Relaxed)
    }

    /// Get total failed outcomes.
    pub fn total_failures(&self) -> u64 {
        self.total_failures.load(Ordering::Relaxed)
    }

    /// Get total rejected calls.
    pub fn total_rejections(&self) -> u64 {
        self.total_rejections.load(Ordering::Relaxed)
    }

    /// Get circuit breaker statistics.
    pub fn stats(&self) -> CircuitBreakerStats {
        let (state, buffered_calls, failure_rate) = {
            let mut inner = self.inner.lock();
            self.maybe_transition_to_half_open(&mut inner);
            (inner.state, inner.window.len(), inner.window.failure_rate())
        };

        CircuitBreakerStats {
            name: self.config.name.clone(),
            state,
            total_requests: self.total_requests(),
            total_successes: self.total_successes(),
            total_failures: self.total_failures(),
            total_rejections: self.total_rejections(),
            buffered_calls,
            failure_rate,
        }
    }
}

/// Permission to make one call through the breaker.
///
/// Report the outcome with [`on_success`](Self::on_success) or
/// [`on_failure`](Self::on_failure). A permit dropped without an outcome
/// hands its half-open trial slot back.
pub struct CallPermit {
    breaker: Arc<CircuitBreaker>,
    epoch: u64,
    settled: bool,
}

impl CallPermit {
    /// Record a successful call.
    pub fn on_success(self) {
        self.record(true);
    }

    /// Record a failed call.
    pub fn on_failure(mut self) {
        self.settled = true;
        self.breaker.record_outcome(Some(self.epoch), false);
    }

    /// Record the outcome of the call.
    pub fn record(mut self, success: bool) {
        self.settled = true;
        self.breaker.record_outcome(Some(self.epoch), success);
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.release_unresolved(self.epoch);
        }
    }
}

impl fmt::Debug for CallPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallPermit")
            .field("breaker", &self.breaker.name())
            .field("epoch", &self.epoch)
            .finish()
    }
}

/// Circuit breaker statistics.
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    /// Circuit breaker name.
    pub name: String,
    /// Current state.
    pub state: CircuitState,
    /// Total permission requests.
    pub total_requests: u64,
    /// Total successes.
    pub total_successes: u64,
    /// Total failures.
    pub total_failures: u64,
    /// Total rejections.
    pub total_rejections: u64,
    /// Outcomes currently held in the sliding window.
    pub buffered_calls: usize,
    /// Window failure rate in percent, if enough samples were recorded.
    pub failure_rate: Option<f64>,
}

impl CircuitBreakerStats {
    /// Calculate lifetime success rate (0.0 - 1.0).
    pub fn success_rate(&self) -> f64 {
        let outcomes = self.total_successes + self.total_failures;
        if outcomes == 0 {
            1.0
        } else {
            self.total_successes as f64 / outcomes as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn breaker(config: CircuitBreakerConfig) -> (Arc<CircuitBreaker>, Arc<ManualClock>) {
        let clock = ManualClock::new();
        let cb = CircuitBreaker::with_clock(config, clock.clone());
        (cb, clock)
    }

    fn small_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig::new("test")
            .failure_rate_threshold(50.0)
            .sliding_window_size(4)
            .minimum_number_of_calls(4)
            .wait_duration_in_open_state(Duration::from_secs(10))
            .permitted_calls_in_half_open_state(2)
    }

    fn trip(cb: &CircuitBreaker) {
        for _ in 0..4 {
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_opens_once_minimum_reached() {
        let (cb, _) = breaker(small_config());

        cb.record_failure();
        cb.record_failure();
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);

        cb.record_failure();
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[test]
    fn test_no_trip_before_minimum_samples() {
        let (cb, _) = breaker(small_config());

        for _ in 0..3 {
            cb.record_failure();
        }

        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.stats().failure_rate, None);
    }

    #[test]
    fn test_stays_closed_below_threshold() {
        let (cb, _) = breaker(small_config());

        cb.record_failure();
        cb.record_success();
        cb.record_success();
        cb.record_success();

        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.stats().failure_rate, Some(25.0));
    }

    #[test]
    fn test_rejects_when_open() {
        let (cb, _) = breaker(small_config());
        trip(&cb);

        let err = cb.try_acquire_permission().unwrap_err();

        assert_eq!(err.state, CircuitState::Open);
        assert_eq!(err.name, "test");
        assert_eq!(cb.total_rejections(), 1);
    }

    #[test]
    fn test_half_open_after_wait() {
        let (cb, clock) = breaker(small_config());
        trip(&cb);

        clock.advance(Duration::from_secs(9));
        assert_eq!(cb.state(), CircuitState::Open);

        clock.advance(Duration::from_secs(1));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_admits_trial_batch_only() {
        let (cb, clock) = breaker(small_config());
        trip(&cb);
        clock.advance(Duration::from_secs(10));

        let first = cb.try_acquire_permission().unwrap();
        let second = cb.try_acquire_permission().unwrap();
        let third = cb.try_acquire_permission().unwrap_err();

        assert_eq!(third.state, CircuitState::HalfOpen);
        assert!(!cb.is_call_permitted());

        first.on_success();
        second.on_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.stats().buffered_calls, 0);
    }

    #[test]
    fn test_failed_trial_batch_reopens() {
        let (cb, clock) = breaker(small_config());
        trip(&cb);
        clock.advance(Duration::from_secs(10));

        let first = cb.try_acquire_permission().unwrap();
        let second = cb.try_acquire_permission().unwrap();
        first.on_success();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        second.on_failure();

        // 1 of 2 trials failed: 50% >= 50%
        assert_eq!(cb.state(), CircuitState::Open);

        // The wait restarts from the moment of reopening.
        clock.advance(Duration::from_secs(5));
        assert_eq!(cb.state(), CircuitState::Open);
        clock.advance(Duration::from_secs(5));
        assert_eq!(cb.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_dropped_trial_permit_returns_slot() {
        let (cb, clock) = breaker(small_config());
        trip(&cb);
        clock.advance(Duration::from_secs(10));

        let first = cb.try_acquire_permission().unwrap();
        let _second = cb.try_acquire_permission().unwrap();
        assert!(cb.try_acquire_permission().is_err());

        drop(first);
        assert!(cb.try_acquire_permission().is_ok());
    }

    #[test]
    fn test_stale_outcome_is_discarded() {
        let (cb, _) = breaker(small_config());

        let permit = cb.try_acquire_permission().unwrap();
        cb.force_open();
        cb.reset();

        permit.on_failure();

        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.stats().buffered_calls, 0);
    }

    #[test]
    fn test_manual_transitions_disabled() {
        let config = small_config().automatic_transitions(false);
        let (cb, clock) = breaker(config);
        trip(&cb);

        clock.advance(Duration::from_secs(60));
        assert_eq!(cb.state(), CircuitState::Open);

        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_racing_callers_share_trial_slots() {
        let config = small_config().permitted_calls_in_half_open_state(5);
        let (cb, clock) = breaker(config);
        trip(&cb);
        clock.advance(Duration::from_secs(10));

        let barrier = Arc::new(std::sync::Barrier::new(16));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cb = Arc::clone(&cb);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    // Keep granted permits alive so slots are not handed back.
                    cb.try_acquire_permission().ok()
                })
            })
            .collect();

        let permits: Vec<CallPermit> = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .collect();

        assert_eq!(permits.len(), 5);
    }

    #[tokio::test]
    async fn test_call_helper_records_outcomes() {
        let (cb, _) = breaker(small_config());

        for _ in 0..4 {
            let _: Result<(), CircuitBreakerError<&str>> = cb.call(|| async { Err("error") }).await;
        }

        let result: Result<(), CircuitBreakerError<&str>> = cb.call(|| async { Ok(()) }).await;
        assert!(matches!(result, Err(CircuitBreakerError::Open)));
        assert_eq!(cb.stats().total_failures, 4);
    }

    #[test]
    fn test_stats_success_rate() {
        let (cb, _) = breaker(small_config());
        cb.record_success();
        cb.record_failure();

        assert_eq!(cb.stats().success_rate(), 0.5);
    }

    #[test]
    fn test_unpermitted_outcomes_ignored_while_half_open() {
        let (cb, clock) = breaker(small_config());
        trip(&cb);
        clock.advance(Duration::from_secs(10));
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        for _ in 0..3 {
            cb.record_failure();
        }
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.stats().total_failures, 4);

        let first = cb.try_acquire_permission().unwrap();
        let second = cb.try_acquire_permission().unwrap();
        first.on_success();
        second.on_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }
}
