//! The resilience pipeline: every protection layer composed around one call.
//!
//! Each attempt runs through the layers in this order:
//!
//! ```text
//! Retry ─┐
//!        └─ Bulkhead.acquire          (BulkheadFull)
//!           └─ CircuitBreaker         (CallNotPermitted, outcome recorded)
//!              └─ TimeLimiter         (Timeout)
//!                 └─ Dispatcher       (Operation, Panicked)
//! Fallback (final outcome only)
//! ```
//!
//! Every retry is a brand-new call for the bulkhead and the breaker. The
//! fallback sees the final failure only, after retries are exhausted.
//!
//! ## Example
//!
//! ```rust,ignore
//! use rampart_core::prelude::*;
//!
//! let pipeline: Pipeline<String, std::io::Error> = Pipeline::builder(
//!     PipelineConfig::new("externalWs")
//!         .fallback_on(FailureKind::BulkheadFull, "degraded".to_string()),
//! )
//! .build()?;
//!
//! let body = pipeline.execute(|| async { fetch().await }).await?;
//! ```

use crate::bulkhead::{Bulkhead, BulkheadStats};
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerStats};
use crate::clock::{Clock, Scheduler, SystemClock};
use crate::config::PipelineConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{Failure, PipelineError, Result};
use crate::fallback::{Fallback, FallbackStats};
use crate::retry::{Retry, RetryPredicate, RetryStats};
use crate::time_limiter::{TimeLimiter, TimeLimiterStats};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Builder for a [`Pipeline`].
pub struct PipelineBuilder<T, E> {
    config: PipelineConfig<T>,
    runtime: Option<Handle>,
    clock: Option<Arc<dyn Clock>>,
    retry_predicate: Option<RetryPredicate<E>>,
}

impl<T, E> PipelineBuilder<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Send + 'static,
{
    /// Create a builder from a configuration.
    pub fn new(config: PipelineConfig<T>) -> Self {
        Self {
            config,
            runtime: None,
            clock: None,
            retry_predicate: None,
        }
    }

    /// Run dispatched calls and timers on `runtime` instead of the current one.
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Read circuit breaker time from `clock`.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Only retry operation errors accepted by `predicate`.
    pub fn retry_on_error<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&E) -> bool + Send + Sync + 'static,
    {
        self.retry_predicate = Some(Arc::new(predicate));
        self
    }

    /// Validate the configuration and assemble the pipeline.
    pub fn build(self) -> Result<Pipeline<T, E>> {
        self.config.validate()?;

        let runtime = match self.runtime {
            Some(runtime) => runtime,
            None => Handle::try_current().map_err(|e| PipelineError::NoRuntime(e.to_string()))?,
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let scheduler = Scheduler::new(runtime.clone());

        let PipelineConfig {
            name,
            bulkhead,
            circuit_breaker,
            retry,
            time_limiter,
            fallback,
        } = self.config;

        info!(name = %name, "Pipeline initialized");

        Ok(Pipeline {
            inner: Arc::new(PipelineInner {
                dispatcher: Dispatcher::new(name.clone(), runtime.clone()),
                bulkhead: Bulkhead::new(bulkhead),
                circuit_breaker: CircuitBreaker::with_clock(circuit_breaker, clock),
                time_limiter: TimeLimiter::new(time_limiter, scheduler.clone()),
                retry: Retry::new(retry, scheduler.clone()),
                fallback: Fallback::new(fallback),
                retry_predicate: self.retry_predicate,
                executions: AtomicU64::new(0),
                name,
                runtime,
                scheduler,
            }),
        })
    }
}

struct PipelineInner<T, E> {
    name: String,
    runtime: Handle,
    scheduler: Scheduler,
    dispatcher: Dispatcher,
    bulkhead: Arc<Bulkhead>,
    circuit_breaker: Arc<CircuitBreaker>,
    time_limiter: Arc<TimeLimiter>,
    retry: Arc<Retry>,
    fallback: Arc<Fallback<T>>,
    retry_predicate: Option<RetryPredicate<E>>,
    executions: AtomicU64,
}

impl<T, E> PipelineInner<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Send + 'static,
{
    async fn run<F, Fut>(&self, op: &F) -> std::result::Result<T, Failure<E>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    {
        let execution = self.executions.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(name = %self.name, execution, "Executing protected call");

        let result = self
            .retry
            .call_if(
                |attempt| self.attempt(op, attempt.seq()),
                |e: &E| self.retry_predicate.as_ref().is_none_or(|p| p(e)),
            )
            .await;

        self.fallback.recover(result)
    }

    /// One attempt: admission, permission, then the timed dispatch.
    async fn attempt<F, Fut>(&self, op: &F, seq: u32) -> std::result::Result<T, Failure<E>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    {
        let bulkhead_permit = self
            .bulkhead
            .acquire()
            .await
            .map_err(|rejection| Failure::BulkheadFull {
                name: rejection.name,
            })?;

        let call_permit = self
            .circuit_breaker
            .try_acquire_permission()
            .map_err(|rejection| Failure::CallNotPermitted {
                name: rejection.name,
                state: rejection.state,
            })?;

        debug!(name = %self.name, attempt = seq, "Dispatching attempt");
        let outcome = self
            .time_limiter
            .with_timeout(self.dispatcher.dispatch(op()))
            .await;

        match &outcome {
            Ok(_) => call_permit.on_success(),
            // No outcome to record; the permit hands its slot back.
            Err(Failure::Cancelled) => drop(call_permit),
            Err(_) => call_permit.on_failure(),
        }
        bulkhead_permit.release();

        outcome
    }
}

/// A composed resilience pipeline for one protected call-site.
///
/// Cloning is cheap; clones share every layer's state.
pub struct Pipeline<T, E> {
    inner: Arc<PipelineInner<T, E>>,
}

impl<T, E> Clone for Pipeline<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, E> Pipeline<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Send + 'static,
{
    /// Start building a pipeline from `config`.
    pub fn builder(config: PipelineConfig<T>) -> PipelineBuilder<T, E> {
        PipelineBuilder::new(config)
    }

    /// Build a pipeline on the current runtime with default collaborators.
    pub fn new(config: PipelineConfig<T>) -> Result<Self> {
        PipelineBuilder::new(config).build()
    }

    /// Execute `op` through every protection layer.
    ///
    /// `op` is invoked once per attempt.
    pub async fn execute<F, Fut>(&self, op: F) -> std::result::Result<T, Failure<E>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    {
        self.inner.run(&op).await
    }

    /// Execute `op` on a runtime task and return a handle to the final outcome.
    ///
    /// Cancelling the handle releases any held bulkhead permit and cancels
    /// pending timers. A raw operation already dispatched keeps running.
    pub fn execute_async<F, Fut>(&self, op: F) -> PipelineHandle<T, E>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let task = self.inner.runtime.spawn(async move { inner.run(&op).await });
        PipelineHandle { task }
    }

    /// Execute `op` and block the calling thread until the final outcome.
    ///
    /// The pipeline's runtime must be multi-threaded so that it makes
    /// progress while this thread is blocked. Calling from within an
    /// asynchronous execution context, or on a current-thread runtime, is
    /// refused with [`PipelineError::BlockingUnsupported`].
    pub fn execute_blocking<F, Fut>(&self, op: F) -> Result<std::result::Result<T, Failure<E>>>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
    {
        if Handle::try_current().is_ok() {
            warn!(name = %self.inner.name, "execute_blocking called from an async context");
            return Err(PipelineError::BlockingUnsupported(
                "called from within an asynchronous execution context".to_string(),
            ));
        }
        if self.inner.runtime.runtime_flavor() == RuntimeFlavor::CurrentThread {
            return Err(PipelineError::BlockingUnsupported(
                "the pipeline runtime is single-threaded".to_string(),
            ));
        }

        let handle = self.execute_async(op);
        Ok(self.inner.runtime.block_on(handle))
    }

    /// Name of the protected call-site.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The bulkhead gating every attempt.
    pub fn bulkhead(&self) -> &Arc<Bulkhead> {
        &self.inner.bulkhead
    }

    /// The circuit breaker shared by every call.
    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.inner.circuit_breaker
    }

    /// The per-attempt time limiter.
    pub fn time_limiter(&self) -> &Arc<TimeLimiter> {
        &self.inner.time_limiter
    }

    /// The retry executor.
    pub fn retry(&self) -> &Arc<Retry> {
        &self.inner.retry
    }

    /// The fallback handler.
    pub fn fallback(&self) -> &Arc<Fallback<T>> {
        &self.inner.fallback
    }

    /// The dispatcher running raw operations.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    /// The scheduler running timeouts and retry delays.
    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    /// Snapshot of every layer's statistics.
    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            name: self.inner.name.clone(),
            executions: self.inner.executions.load(Ordering::Relaxed),
            dispatched: self.inner.dispatcher.total_dispatched(),
            in_flight: self.inner.dispatcher.in_flight(),
            pending_timers: self.inner.scheduler.pending_timers(),
            bulkhead: self.inner.bulkhead.stats(),
            circuit_breaker: self.inner.circuit_breaker.stats(),
            time_limiter: self.inner.time_limiter.stats(),
            retry: self.inner.retry.stats(),
            fallback: self.inner.fallback.stats(),
        }
    }
}

impl<T, E> fmt::Debug for Pipeline<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.inner.name)
            .field("executions", &self.inner.executions.load(Ordering::Relaxed))
            .finish()
    }
}

/// Handle to a pipeline execution started with [`Pipeline::execute_async`].
pub struct PipelineHandle<T, E> {
    task: JoinHandle<std::result::Result<T, Failure<E>>>,
}

impl<T, E> PipelineHandle<T, E> {
    /// Cancel the execution. Awaiting the handle afterwards yields
    /// [`Failure::Cancelled`] unless the execution already finished.
    pub fn cancel(&self) {
        self.task.abort();
    }

    /// Whether the execution has finished.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl<T, E> Future for PipelineHandle<T, E> {
    type Output = std::result::Result<T, Failure<E>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.task).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(join_error)) if join_error.is_panic() => {
                Poll::Ready(Err(Failure::Panicked(join_error.to_string())))
            }
            Poll::Ready(Err(_)) => Poll::Ready(Err(Failure::Cancelled)),
        }
    }
}

/// Statistics of every layer of a pipeline.
#[derive(Debug, Clone)]
pub struct PipelineStats {
    /// Pipeline name.
    pub name: String,
    /// Calls to execute, of any flavour.
    pub executions: u64,
    /// Raw operations dispatched.
    pub dispatched: u64,
    /// Raw operations still running, abandoned ones included.
    pub in_flight: usize,
    /// Timers neither fired nor cancelled.
    pub pending_timers: usize,
    /// Bulkhead statistics.
    pub bulkhead: BulkheadStats,
    /// Circuit breaker statistics.
    pub circuit_breaker: CircuitBreakerStats,
    /// Time limiter statistics.
    pub time_limiter: TimeLimiterStats,
    /// Retry statistics.
    pub retry: RetryStats,
    /// Fallback statistics.
    pub fallback: FallbackStats,
}
