// Failure taxonomy for the resilience pipeline

use crate::circuit_breaker::CircuitState;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Failure produced by a protected call.
///
/// Every protection layer reports through this type, so the caller can tell
/// exactly which layer intervened. `E` is the raw operation's error type.
#[derive(Debug)]
pub enum Failure<E> {
    /// The raw operation failed.
    Operation(E),
    /// The circuit breaker refused the call.
    CallNotPermitted {
        /// Circuit breaker name.
        name: String,
        /// State that caused the rejection.
        state: CircuitState,
    },
    /// The bulkhead had no capacity left.
    BulkheadFull {
        /// Bulkhead name.
        name: String,
    },
    /// The attempt did not complete in time.
    Timeout {
        /// Time limiter name.
        name: String,
        /// Configured per-attempt limit.
        after: Duration,
    },
    /// The call was cancelled before it produced an outcome.
    Cancelled,
    /// The raw operation panicked.
    Panicked(String),
    /// All attempts were used up; carries the failure of the last one.
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Failure of the final attempt.
        last: Box<Failure<E>>,
    },
}

impl<E> Failure<E> {
    /// Payload-free discriminant of this failure.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Operation(_) => FailureKind::Operation,
            Self::CallNotPermitted { .. } => FailureKind::CallNotPermitted,
            Self::BulkheadFull { .. } => FailureKind::BulkheadFull,
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::Cancelled => FailureKind::Cancelled,
            Self::Panicked(_) => FailureKind::Panicked,
            Self::RetriesExhausted { .. } => FailureKind::RetriesExhausted,
        }
    }

    /// Kind of the innermost failure, looking through `RetriesExhausted`.
    pub fn root_kind(&self) -> FailureKind {
        match self {
            Self::RetriesExhausted { last, .. } => last.root_kind(),
            other => other.kind(),
        }
    }

    /// Whether the retry layer re-issues this failure when nothing else is configured.
    pub fn is_retryable_by_default(&self) -> bool {
        self.kind().is_retryable_by_default()
    }

    /// The raw operation error, if this failure (or the one it wraps) carries one.
    pub fn operation_error(&self) -> Option<&E> {
        match self {
            Self::Operation(e) => Some(e),
            Self::RetriesExhausted { last, .. } => last.operation_error(),
            _ => None,
        }
    }

    /// Consume the failure and return the raw operation error, if any.
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            Self::Operation(e) => Some(e),
            Self::RetriesExhausted { last, .. } => last.into_operation_error(),
            _ => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for Failure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Operation(e) => write!(f, "Operation failed: {}", e),
            Self::CallNotPermitted { name, state } => {
                write!(f, "CircuitBreaker '{}' is {} and does not permit further calls", name, state)
            }
            Self::BulkheadFull { name } => {
                write!(f, "Bulkhead '{}' is full and does not permit further calls", name)
            }
            Self::Timeout { name, after } => {
                write!(f, "TimeLimiter '{}' recorded a timeout after {:?}", name, after)
            }
            Self::Cancelled => write!(f, "Call was cancelled"),
            Self::Panicked(msg) => write!(f, "Operation panicked: {}", msg),
            Self::RetriesExhausted { attempts, last } => {
                write!(f, "Retries exhausted after {} attempts: {}", attempts, last)
            }
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for Failure<E> {}

/// Discriminant of a [`Failure`], used as the key for retry and fallback rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FailureKind {
    Operation,
    CallNotPermitted,
    BulkheadFull,
    Timeout,
    Cancelled,
    Panicked,
    RetriesExhausted,
}

impl FailureKind {
    /// All kinds, in declaration order.
    pub const ALL: [FailureKind; 7] = [
        FailureKind::Operation,
        FailureKind::CallNotPermitted,
        FailureKind::BulkheadFull,
        FailureKind::Timeout,
        FailureKind::Cancelled,
        FailureKind::Panicked,
        FailureKind::RetriesExhausted,
    ];

    /// Snake-case name, as used in configuration files.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Operation => "operation",
            Self::CallNotPermitted => "call_not_permitted",
            Self::BulkheadFull => "bulkhead_full",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Panicked => "panicked",
            Self::RetriesExhausted => "retries_exhausted",
        }
    }

    /// Operation errors, panics and timeouts are retried; admission
    /// rejections and cancellations are not.
    pub fn is_retryable_by_default(&self) -> bool {
        matches!(self, Self::Operation | Self::Timeout | Self::Panicked)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        match normalized.as_str() {
            "operation" | "operation_error" => Ok(Self::Operation),
            "call_not_permitted" => Ok(Self::CallNotPermitted),
            "bulkhead_full" => Ok(Self::BulkheadFull),
            "timeout" => Ok(Self::Timeout),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            "panicked" => Ok(Self::Panicked),
            "retries_exhausted" => Ok(Self::RetriesExhausted),
            _ => Err(PipelineError::UnknownFailureKind(s.to_string())),
        }
    }
}

/// Errors raised while constructing or driving a pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("No tokio runtime available: {0}")]
    NoRuntime(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown failure kind: {0}")]
    UnknownFailureKind(String),

    #[error("Blocking execution unsupported: {0}")]
    BlockingUnsupported(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
