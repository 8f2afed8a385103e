//! Serializable pipeline settings.
//!
//! [`PipelineSettings`] is the flat, file- and environment-friendly form of
//! [`PipelineConfig`]. Durations are given in milliseconds and failure kinds
//! by their snake_case names.
//!
//! ```toml
//! name = "externalWs"
//! max_concurrent_calls = 25
//! failure_rate_threshold = 50.0
//! max_attempts = 3
//! backoff = "exponential"
//! wait_duration_ms = 100
//! timeout_ms = 1000
//!
//! [fallback]
//! bulkhead_full = "degraded"
//! timeout = "throwable"
//! ```

use crate::{ConfigError, ConfigValidator, Result, Validate};
use rampart_core::{
    BackoffStrategy, BulkheadConfig, CircuitBreakerConfig, FailureKind, FallbackConfig,
    PipelineConfig, RetryConfig, TimeLimiterConfig,
};
use serde::{Deserialize, Deserializer, Serialize, de};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Wait strategy between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    /// Same wait after every failed attempt.
    Fixed,
    /// Wait multiplied after every failed attempt, up to a cap.
    Exponential,
}

/// Flat settings for one protected call-site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    #[serde(deserialize_with = "lenient_string")]
    pub name: String,

    // Bulkhead
    pub max_concurrent_calls: u32,
    pub max_wait_ms: u64,
    pub queue_size: Option<u32>,

    // Circuit breaker
    pub failure_rate_threshold: f64,
    pub sliding_window_size: u32,
    pub minimum_number_of_calls: u32,
    pub wait_duration_in_open_state_ms: u64,
    pub permitted_calls_in_half_open_state: u32,
    pub automatic_transitions: bool,

    // Retry
    pub max_attempts: u32,
    pub backoff: BackoffKind,
    pub wait_duration_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_ms: u64,
    pub jitter: bool,
    /// Kinds never retried; the built-in set when absent.
    pub retry_ignored: Option<Vec<String>>,

    // Time limiter
    pub timeout_ms: u64,

    // Fallback
    /// Substitute values keyed by failure kind name.
    #[serde(deserialize_with = "lenient_string_map")]
    pub fallback: BTreeMap<String, String>,
    /// Substitute for every kind without its own entry.
    #[serde(deserialize_with = "lenient_optional_string")]
    pub fallback_default: Option<String>,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            max_concurrent_calls: 25,
            max_wait_ms: 0,
            queue_size: None,
            failure_rate_threshold: 50.0,
            sliding_window_size: 100,
            minimum_number_of_calls: 100,
            wait_duration_in_open_state_ms: 60_000,
            permitted_calls_in_half_open_state: 10,
            automatic_transitions: true,
            max_attempts: 3,
            backoff: BackoffKind::Fixed,
            wait_duration_ms: 500,
            backoff_multiplier: 2.0,
            max_backoff_ms: 60_000,
            jitter: false,
            retry_ignored: None,
            timeout_ms: 1_000,
            fallback: BTreeMap::new(),
            fallback_default: None,
        }
    }
}

impl PipelineSettings {
    /// Backoff strategy described by these settings.
    pub fn backoff_strategy(&self) -> BackoffStrategy {
        let wait = Duration::from_millis(self.wait_duration_ms);
        let max = Duration::from_millis(self.max_backoff_ms);

        match (self.backoff, self.jitter) {
            (BackoffKind::Fixed, _) if self.wait_duration_ms == 0 => BackoffStrategy::None,
            (BackoffKind::Fixed, _) => BackoffStrategy::Constant(wait),
            (BackoffKind::Exponential, false) => BackoffStrategy::exponential(wait),
            (BackoffKind::Exponential, true) => BackoffStrategy::exponential_with_jitter(wait),
        }
        .with_multiplier(self.backoff_multiplier)
        .with_max(max)
    }

    /// Convert into a validated [`PipelineConfig`].
    pub fn into_pipeline_config(self) -> Result<PipelineConfig<String>> {
        self.validate()?;

        let backoff = self.backoff_strategy();

        let mut retry = RetryConfig::new(self.name.clone())
            .max_attempts(self.max_attempts)
            .backoff(backoff);
        if let Some(ignored) = &self.retry_ignored {
            retry.ignored = ignored
                .iter()
                .map(|name| name.parse::<FailureKind>())
                .collect::<std::result::Result<BTreeSet<_>, _>>()?;
        }

        let mut fallback = FallbackConfig::new(self.name.clone());
        for (kind, value) in self.fallback {
            fallback = fallback.on(kind.parse::<FailureKind>()?, value);
        }
        if let Some(default) = self.fallback_default {
            fallback = fallback.on_any(default);
        }

        let mut bulkhead = BulkheadConfig::new(self.name.clone(), self.max_concurrent_calls)
            .max_wait(Duration::from_millis(self.max_wait_ms));
        bulkhead.queue_size = self.queue_size;

        let config = PipelineConfig::new(self.name.clone())
            .bulkhead(bulkhead)
            .circuit_breaker(
                CircuitBreakerConfig::new(self.name.clone())
                    .failure_rate_threshold(self.failure_rate_threshold)
                    .sliding_window_size(self.sliding_window_size)
                    .minimum_number_of_calls(self.minimum_number_of_calls)
                    .wait_duration_in_open_state(Duration::from_millis(
                        self.wait_duration_in_open_state_ms,
                    ))
                    .permitted_calls_in_half_open_state(self.permitted_calls_in_half_open_state)
                    .automatic_transitions(self.automatic_transitions),
            )
            .retry(retry)
            .time_limiter(
                TimeLimiterConfig::new(self.name.clone())
                    .timeout_duration(Duration::from_millis(self.timeout_ms)),
            )
            .fallback(fallback);

        config.validate()?;
        Ok(config)
    }
}

impl Validate for PipelineSettings {
    fn validate(&self) -> Result<()> {
        ConfigValidator::not_empty(&self.name, "name")?;
        ConfigValidator::at_least(self.max_concurrent_calls, 1, "max_concurrent_calls")?;
        ConfigValidator::in_range(
            self.failure_rate_threshold,
            0.0,
            100.0,
            "failure_rate_threshold",
        )?;
        if self.failure_rate_threshold == 0.0 {
            return Err(ConfigError::ValidationError(
                "failure_rate_threshold must be greater than 0".to_string(),
            ));
        }
        ConfigValidator::at_least(self.sliding_window_size, 1, "sliding_window_size")?;
        ConfigValidator::in_range(
            self.minimum_number_of_calls,
            1,
            self.sliding_window_size,
            "minimum_number_of_calls",
        )?;
        ConfigValidator::at_least(
            self.permitted_calls_in_half_open_state,
            1,
            "permitted_calls_in_half_open_state",
        )?;
        ConfigValidator::at_least(self.max_attempts, 1, "max_attempts")?;
        ConfigValidator::at_least(self.backoff_multiplier, 1.0, "backoff_multiplier")?;
        ConfigValidator::at_least(self.timeout_ms, 1, "timeout_ms")?;

        for kind in self.fallback.keys().chain(self.retry_ignored.iter().flatten()) {
            kind.parse::<FailureKind>()
                .map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        }

        Ok(())
    }
}

// Environment values that look like numbers or booleans arrive typed; text
// fields take them back as written.
fn scalar_text<E: de::Error>(value: Value) -> std::result::Result<String, E> {
    match value {
        Value::String(text) => Ok(text),
        Value::Number(number) => Ok(number.to_string()),
        Value::Bool(flag) => Ok(flag.to_string()),
        other => Err(E::custom(format!("expected a string, found {}", other))),
    }
}

fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    scalar_text(Value::deserialize(deserializer)?)
}

fn lenient_optional_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        value => scalar_text(value).map(Some),
    }
}

fn lenient_string_map<'de, D>(
    deserializer: D,
) -> std::result::Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    BTreeMap::<String, Value>::deserialize(deserializer)?
        .into_iter()
        .map(|(key, value)| Ok((key, scalar_text(value)?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_core_defaults() {
        let config = PipelineSettings::default().into_pipeline_config().unwrap();
        let core: PipelineConfig<String> = PipelineConfig::new("default");

        assert_eq!(config.bulkhead.max_concurrent, core.bulkhead.max_concurrent);
        assert_eq!(config.bulkhead.max_wait, core.bulkhead.max_wait);
        assert_eq!(
            config.circuit_breaker.minimum_number_of_calls,
            core.circuit_breaker.minimum_number_of_calls
        );
        assert_eq!(
            config.circuit_breaker.wait_duration_in_open_state,
            core.circuit_breaker.wait_duration_in_open_state
        );
        assert_eq!(config.retry.backoff, core.retry.backoff);
        assert_eq!(config.retry.ignored, core.retry.ignored);
        assert_eq!(
            config.time_limiter.timeout_duration,
            core.time_limiter.timeout_duration
        );
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let settings: PipelineSettings = serde_json::from_str(
            r#"{"name": "externalWs", "max_attempts": 2, "fallback": {"bulkhead_full": "degraded"}}"#,
        )
        .unwrap();

        assert_eq!(settings.max_attempts, 2);
        assert_eq!(settings.max_concurrent_calls, 25);

        let config = settings.into_pipeline_config().unwrap();
        assert_eq!(config.name, "externalWs");
        assert_eq!(
            config.fallback.substitutes.get(&FailureKind::BulkheadFull),
            Some(&"degraded".to_string())
        );
    }

    #[test]
    fn test_exponential_backoff() {
        let settings = PipelineSettings {
            backoff: BackoffKind::Exponential,
            wait_duration_ms: 100,
            backoff_multiplier: 3.0,
            max_backoff_ms: 500,
            ..Default::default()
        };

        let backoff = settings.backoff_strategy();
        assert_eq!(backoff.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(backoff.delay_for_attempt(1), Duration::from_millis(300));
        assert_eq!(backoff.delay_for_attempt(2), Duration::from_millis(500));
    }

    #[test]
    fn test_zero_fixed_wait_means_no_backoff() {
        let settings = PipelineSettings {
            wait_duration_ms: 0,
            ..Default::default()
        };

        assert_eq!(settings.backoff_strategy(), BackoffStrategy::None);
    }

    #[test]
    fn test_rejects_unknown_fallback_kind() {
        let mut settings = PipelineSettings::default();
        settings.fallback.insert("meltdown".to_string(), "x".to_string());

        assert!(matches!(
            settings.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_rejects_minimum_above_window() {
        let settings = PipelineSettings {
            sliding_window_size: 10,
            minimum_number_of_calls: 20,
            ..Default::default()
        };

        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_custom_ignored_kinds() {
        let settings = PipelineSettings {
            retry_ignored: Some(vec!["timeout".to_string()]),
            ..Default::default()
        };

        let config = settings.into_pipeline_config().unwrap();
        assert!(!config.retry.is_retryable(FailureKind::Timeout));
        assert!(config.retry.is_retryable(FailureKind::BulkheadFull));
    }

    #[test]
    fn test_numeric_text_values_are_kept_as_text() {
        let settings: PipelineSettings = serde_json::from_str(
            r#"{"name": 123, "fallback": {"timeout": 0, "bulkhead_full": true}, "fallback_default": 4.5}"#,
        )
        .unwrap();

        assert_eq!(settings.name, "123");
        assert_eq!(settings.fallback["timeout"], "0");
        assert_eq!(settings.fallback["bulkhead_full"], "true");
        assert_eq!(settings.fallback_default.as_deref(), Some("4.5"));
    }

    #[test]
    fn test_nested_value_for_text_field_is_rejected() {
        let result: std::result::Result<PipelineSettings, _> =
            serde_json::from_str(r#"{"fallback": {"timeout": {"nested": 1}}}"#);

        assert!(result.is_err());
    }
}
