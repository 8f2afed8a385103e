// Rampart - A resilience execution pipeline for Rust
//
// This library wraps one fallible, latency-variable call with a bulkhead,
// a circuit breaker, per-attempt time limits, retries and fallbacks.

// Re-export core functionality
pub use rampart_core::*;

pub mod external;

// Re-export optional crates
#[cfg(feature = "config")]
pub use rampart_config;

// Prelude for common imports
pub mod prelude {
    pub use crate::external::{ExternalError, ExternalService, SimulatedCall, render};
    pub use rampart_core::prelude::*;

    #[cfg(feature = "config")]
    pub use rampart_config::{ConfigService, PipelineSettings};
}
