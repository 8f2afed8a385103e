//! Monotonic time and timer scheduling.
//!
//! The circuit breaker reads time through a [`Clock`], and the time limiter
//! and retry layers register delayed callbacks with a [`Scheduler`]. Timers
//! run on the tokio timer driver, not on the tasks executing raw operations,
//! so a timeout firing never waits for a free worker.
//!
//! ## Example
//!
//! ```rust,ignore
//! use rampart_core::clock::Scheduler;
//! use std::time::Duration;
//!
//! let scheduler = Scheduler::current()?;
//! let timer = scheduler.schedule(Duration::from_secs(1), || println!("fired"));
//!
//! // Changed our mind: the callback will never run.
//! timer.cancel();
//! ```

use crate::error::{PipelineError, Result};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;

pub use tokio::time::Instant;

/// Source of monotonic time.
pub trait Clock: Send + Sync + 'static {
    /// Current instant.
    fn now(&self) -> Instant;
}

/// Clock backed by the tokio time driver.
///
/// Follows paused/advanced time inside tokio tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    /// Create a clock frozen at the current instant.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        })
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }

    /// Total time advanced since creation.
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock()
    }
}

impl fmt::Debug for ManualClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualClock")
            .field("elapsed", &self.elapsed())
            .finish()
    }
}

/// Shared bookkeeping for one timer: settles exactly once.
struct TimerState {
    settled: AtomicBool,
    pending: Arc<AtomicUsize>,
}

impl TimerState {
    /// Returns true for the single caller that settles the timer.
    fn settle(&self) -> bool {
        if self.settled.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.pending.fetch_sub(1, Ordering::AcqRel);
        true
    }
}

/// Handle to a scheduled callback.
///
/// Exactly one of {firing, cancellation} wins. Dropping the registration
/// cancels the timer if it has not fired yet.
pub struct TimerRegistration {
    state: Arc<TimerState>,
    abort: AbortHandle,
}

impl TimerRegistration {
    /// Cancel the timer. Returns false if it already fired or was cancelled.
    pub fn cancel(&self) -> bool {
        if self.state.settle() {
            self.abort.abort();
            true
        } else {
            false
        }
    }

    /// Whether the timer has fired or been cancelled.
    pub fn is_settled(&self) -> bool {
        self.state.settled.load(Ordering::Acquire)
    }
}

impl Drop for TimerRegistration {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for TimerRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerRegistration")
            .field("settled", &self.is_settled())
            .finish()
    }
}

/// Timer service for delayed, cancellable callbacks.
#[derive(Clone)]
pub struct Scheduler {
    runtime: Handle,
    pending: Arc<AtomicUsize>,
}

impl Scheduler {
    /// Create a scheduler on the given runtime.
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Create a scheduler on the runtime of the calling context.
    pub fn current() -> Result<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| PipelineError::NoRuntime(e.to_string()))
    }

    /// Runtime handle timers are spawned on.
    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    /// Run `callback` once `delay` has elapsed, unless cancelled first.
    pub fn schedule<F>(&self, delay: Duration, callback: F) -> TimerRegistration
    where
        F: FnOnce() + Send + 'static,
    {
        self.pending.fetch_add(1, Ordering::AcqRel);
        let state = Arc::new(TimerState {
            settled: AtomicBool::new(false),
            pending: Arc::clone(&self.pending),
        });

        let timer_state = Arc::clone(&state);
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if timer_state.settle() {
                callback();
            }
        });

        TimerRegistration {
            state,
            abort: task.abort_handle(),
        }
    }

    /// Wait for `delay` through a scheduled timer.
    ///
    /// Dropping the returned future cancels the timer.
    pub async fn sleep(&self, delay: Duration) {
        if delay.is_zero() {
            return;
        }

        let (tx, rx) = oneshot::channel();
        let _registration = self.schedule(delay, move || {
            let _ = tx.send(());
        });
        let _ = rx.await;
    }

    /// Number of timers that have neither fired nor been cancelled.
    pub fn pending_timers(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("pending_timers", &self.pending_timers())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new();
        let start = clock.now();

        clock.advance(Duration::from_secs(5));

        assert_eq!(clock.now() - start, Duration::from_secs(5));
        assert_eq!(clock.elapsed(), Duration::from_secs(5));
    }

    #[test]
    fn test_scheduler_requires_runtime() {
        assert!(matches!(Scheduler::current(), Err(PipelineError::NoRuntime(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_once() {
        let scheduler = Scheduler::current().unwrap();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        let timer = scheduler.schedule(Duration::from_millis(100), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(scheduler.pending_timers(), 1);

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(timer.is_settled());
        assert!(!timer.cancel());
        assert_eq!(scheduler.pending_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let scheduler = Scheduler::current().unwrap();
        let fired = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&fired);
        let timer = scheduler.schedule(Duration::from_millis(100), move || {
            flag.store(true, Ordering::SeqCst);
        });

        assert!(timer.cancel());
        assert_eq!(scheduler.pending_timers(), 0);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_registration_cancels() {
        let scheduler = Scheduler::current().unwrap();
        let fired = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&fired);
        drop(scheduler.schedule(Duration::from_millis(10), move || {
            flag.store(true, Ordering::SeqCst);
        }));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!fired.load(Ordering::SeqCst));
        assert_eq!(scheduler.pending_timers(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_waits_for_delay() {
        let scheduler = Scheduler::current().unwrap();
        let start = Instant::now();

        scheduler.sleep(Duration::from_millis(250)).await;

        assert!(start.elapsed() >= Duration::from_millis(250));
        assert_eq!(scheduler.pending_timers(), 0);
    }
}
