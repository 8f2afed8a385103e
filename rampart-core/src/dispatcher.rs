//! Call dispatcher: runs the raw operation on a runtime task.
//!
//! Dispatching never blocks the submitting context. The returned
//! [`DispatchHandle`] resolves with the value or a tagged [`Failure`].
//! Dropping the handle abandons the result but does not stop the task;
//! the operation keeps running to completion and its outcome is discarded.

use crate::error::Failure;
use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::task::{Context, Poll};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::trace;

/// Decrements the in-flight counter when the task finishes, however it finishes.
struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Spawns raw operations as lightweight tasks.
pub struct Dispatcher {
    name: String,
    runtime: Handle,
    in_flight: Arc<AtomicUsize>,
    total_dispatched: AtomicU64,
}

impl Dispatcher {
    /// Create a dispatcher spawning onto `runtime`.
    pub fn new(name: impl Into<String>, runtime: Handle) -> Self {
        Self {
            name: name.into(),
            runtime,
            in_flight: Arc::new(AtomicUsize::new(0)),
            total_dispatched: AtomicU64::new(0),
        }
    }

    /// Start `call` on a worker and return a handle to its outcome.
    pub fn dispatch<T, E, Fut>(&self, call: Fut) -> DispatchHandle<T, E>
    where
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let seq = self.total_dispatched.fetch_add(1, Ordering::Relaxed) + 1;
        trace!(name = %self.name, seq, "Dispatching call");

        let guard = InFlightGuard(Arc::clone(&self.in_flight));
        let task = self.runtime.spawn(async move {
            let _guard = guard;
            call.await
        });

        DispatchHandle { task }
    }

    /// Operations currently running, abandoned ones included.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Operations dispatched since creation.
    pub fn total_dispatched(&self) -> u64 {
        self.total_dispatched.load(Ordering::Relaxed)
    }

    /// Dispatcher name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Completion handle for one dispatched operation.
pub struct DispatchHandle<T, E> {
    task: JoinHandle<Result<T, E>>,
}

impl<T, E> DispatchHandle<T, E> {
    /// Whether the underlying task has finished.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl<T, E> Future for DispatchHandle<T, E> {
    type Output = Result<T, Failure<E>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.task).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(Ok(value))) => Poll::Ready(Ok(value)),
            Poll::Ready(Ok(Err(e))) => Poll::Ready(Err(Failure::Operation(e))),
            Poll::Ready(Err(join_error)) => {
                if join_error.is_panic() {
                    let msg = panic_message(join_error.into_panic());
                    Poll::Ready(Err(Failure::Panicked(msg)))
                } else {
                    Poll::Ready(Err(Failure::Cancelled))
                }
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
