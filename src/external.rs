//! The outbound collaborator: one protected external call per request.
//!
//! [`SimulatedCall`] stands in for a remote web service with a fixed latency.
//! [`ExternalService`] runs it through a [`Pipeline`] once per inbound
//! request and [`render`] turns the outcome into the text shown to the user.

use rampart_core::{Failure, Pipeline, PipelineConfig, PipelineError};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

/// Latency of the simulated remote call.
pub const DEFAULT_LATENCY: Duration = Duration::from_millis(100);

/// Body returned by a successful simulated call.
pub const SUCCESS_BODY: &str = "Call succeeded";

/// Error raised by the remote service itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExternalError {
    #[error("service unavailable: {0}")]
    Unavailable(String),
}

/// A latency-simulating remote call.
#[derive(Debug, Clone)]
pub struct SimulatedCall {
    latency: Duration,
    outcome: Result<String, ExternalError>,
}

impl SimulatedCall {
    /// Succeed with `"Call succeeded"` after [`DEFAULT_LATENCY`].
    pub fn new() -> Self {
        Self::succeeding(DEFAULT_LATENCY, SUCCESS_BODY)
    }

    /// Succeed with `body` after `latency`.
    pub fn succeeding(latency: Duration, body: impl Into<String>) -> Self {
        Self {
            latency,
            outcome: Ok(body.into()),
        }
    }

    /// Fail with `reason` after `latency`.
    pub fn failing(latency: Duration, reason: impl Into<String>) -> Self {
        Self {
            latency,
            outcome: Err(ExternalError::Unavailable(reason.into())),
        }
    }

    pub fn latency(&self) -> Duration {
        self.latency
    }

    /// Perform the call once.
    pub fn invoke(&self) -> impl Future<Output = Result<String, ExternalError>> + Send + use<> {
        let latency = self.latency;
        let outcome = self.outcome.clone();
        async move {
            tokio::time::sleep(latency).await;
            outcome
        }
    }
}

impl Default for SimulatedCall {
    fn default() -> Self {
        Self::new()
    }
}

/// Issues the simulated call through a resilience pipeline.
#[derive(Clone)]
pub struct ExternalService {
    pipeline: Pipeline<String, ExternalError>,
    call: SimulatedCall,
}

impl ExternalService {
    /// Build a service and its pipeline on the current runtime.
    pub fn new(config: PipelineConfig<String>, call: SimulatedCall) -> Result<Self, PipelineError> {
        Ok(Self::with_pipeline(Pipeline::new(config)?, call))
    }

    /// Use an already constructed pipeline.
    pub fn with_pipeline(pipeline: Pipeline<String, ExternalError>, call: SimulatedCall) -> Self {
        info!(name = %pipeline.name(), latency = ?call.latency(), "External service ready");
        Self { pipeline, call }
    }

    pub fn pipeline(&self) -> &Pipeline<String, ExternalError> {
        &self.pipeline
    }

    /// Execute the protected call once.
    pub async fn call(&self) -> Result<String, Failure<ExternalError>> {
        let call = self.call.clone();
        self.pipeline.execute(move || call.invoke()).await
    }

    /// Serve one request: execute the protected call and render its outcome.
    ///
    /// ```
    /// use rampart::PipelineConfig;
    /// use rampart::external::{ExternalService, SimulatedCall};
    ///
    /// # tokio_test::block_on(async {
    /// let service =
    ///     ExternalService::new(PipelineConfig::new("externalWs"), SimulatedCall::new()).unwrap();
    ///
    /// assert_eq!(service.handle().await, "Call succeeded");
    /// # });
    /// ```
    pub async fn handle(&self) -> String {
        let result = self.call().await;
        if let Err(failure) = &result {
            debug!(name = %self.pipeline.name(), kind = %failure.kind(), "Protected call failed");
        }
        render(&result)
    }
}

impl fmt::Debug for ExternalService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalService")
            .field("pipeline", &self.pipeline)
            .field("call", &self.call)
            .finish()
    }
}

/// Text shown to the end user for a call outcome.
pub fn render<E: fmt::Display>(result: &Result<String, Failure<E>>) -> String {
    match result {
        Ok(body) => body.clone(),
        Err(failure) => format!("Call failed: {}", failure),
    }
}
