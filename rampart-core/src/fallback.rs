//! Fallback substitution for terminal failures.
//!
//! A fallback maps failure kinds to substitute values. It only ever sees
//! the final failure of a call, after retries are exhausted. Kinds without
//! a mapping (and no default) propagate unchanged.
//!
//! A [`Failure::RetriesExhausted`] is looked up under its own kind first and
//! then under the kind of the failure it wraps, so mapping `Timeout` also
//! covers "every attempt timed out".
//!
//! ## Example
//!
//! ```rust,ignore
//! use rampart_core::error::FailureKind;
//! use rampart_core::fallback::{Fallback, FallbackConfig};
//!
//! let fallback = Fallback::new(
//!     FallbackConfig::new("externalWs")
//!         .on(FailureKind::BulkheadFull, "degraded".to_string())
//!         .on(FailureKind::Timeout, "throwable".to_string()),
//! );
//!
//! let result = fallback.recover(pipeline_result);
//! ```

use crate::error::{Failure, FailureKind};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Fallback configuration: which failure kinds get which substitute.
#[derive(Debug, Clone)]
pub struct FallbackConfig<T> {
    /// Name for logging.
    pub name: String,
    /// Substitute values keyed by failure kind.
    pub substitutes: BTreeMap<FailureKind, T>,
    /// Substitute for every kind without its own entry.
    pub default: Option<T>,
}

impl<T> Default for FallbackConfig<T> {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            substitutes: BTreeMap::new(),
            default: None,
        }
    }
}

impl<T> FallbackConfig<T> {
    /// Create an empty configuration with a name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Substitute `value` for failures of `kind`.
    pub fn on(mut self, kind: FailureKind, value: T) -> Self {
        self.substitutes.insert(kind, value);
        self
    }

    /// Substitute `value` for every failure without a specific entry.
    pub fn on_any(mut self, value: T) -> Self {
        self.default = Some(value);
        self
    }

    /// Whether no failure would ever be substituted.
    pub fn is_empty(&self) -> bool {
        self.substitutes.is_empty() && self.default.is_none()
    }

    /// Substitute configured for `failure`, if any.
    pub fn lookup<E>(&self, failure: &Failure<E>) -> Option<&T> {
        let kind = failure.kind();
        self.substitutes
            .get(&kind)
            .or_else(|| {
                if kind == FailureKind::RetriesExhausted {
                    self.substitutes.get(&failure.root_kind())
                } else {
                    None
                }
            })
            .or(self.default.as_ref())
    }
}

/// Fallback handler applied to the final outcome of a call.
pub struct Fallback<T> {
    config: FallbackConfig<T>,
    substitutions: AtomicU64,
    propagated: AtomicU64,
}

impl<T: Clone> Fallback<T> {
    /// Create a fallback handler.
    pub fn new(config: FallbackConfig<T>) -> Arc<Self> {
        Arc::new(Self {
            config,
            substitutions: AtomicU64::new(0),
            propagated: AtomicU64::new(0),
        })
    }

    /// Get the fallback name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Get the configuration.
    pub fn config(&self) -> &FallbackConfig<T> {
        &self.config
    }

    /// Replace a mapped failure with its substitute; pass anything else through.
    pub fn recover<E>(&self, result: Result<T, Failure<E>>) -> Result<T, Failure<E>> {
        let failure = match result {
            Ok(value) => return Ok(value),
            Err(failure) => failure,
        };

        match self.config.lookup(&failure) {
            Some(substitute) => {
                self.substitutions.fetch_add(1, Ordering::Relaxed);
                debug!(
                    name = %self.config.name,
                    kind = %failure.kind(),
                    root_kind = %failure.root_kind(),
                    "Call failed, using fallback value"
                );
                Ok(substitute.clone())
            }
            None => {
                self.propagated.fetch_add(1, Ordering::Relaxed);
                Err(failure)
            }
        }
    }

    /// Execute the primary operation, falling back on a mapped failure.
    pub async fn call<F, Fut, E>(&self, primary: F) -> Result<T, Failure<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, Failure<E>>>,
    {
        self.recover(primary().await)
    }

    /// Get fallback statistics.
    pub fn stats(&self) -> FallbackStats {
        FallbackStats {
            name: self.config.name.clone(),
            substitutions: self.substitutions.load(Ordering::Relaxed),
            propagated: self.propagated.load(Ordering::Relaxed),
        }
    }
}

/// Fallback statistics.
#[derive(Debug, Clone)]
pub struct FallbackStats {
    /// Fallback name.
    pub name: String,
    /// Failures replaced with a substitute.
    pub substitutions: u64,
    /// Failures passed through to the caller.
    pub propagated: u64,
}
