// Configuration validation

use crate::{ConfigError, Result};
use std::fmt::Display;

/// Trait for validating configuration
pub trait Validate {
    fn validate(&self) -> Result<()>;
}

/// Reusable validation rules
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate that a value is not empty
    pub fn not_empty(value: &str, field: &str) -> Result<()> {
        if value.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!("{} cannot be empty", field)));
        }
        Ok(())
    }

    /// Validate that a number is within `[min, max]`
    pub fn in_range<T: PartialOrd + Display>(value: T, min: T, max: T, field: &str) -> Result<()> {
        if !(value >= min && value <= max) {
            return Err(ConfigError::ValidationError(format!(
                "{} must be between {} and {}, got {}",
                field, min, max, value
            )));
        }
        Ok(())
    }

    /// Validate that a number is at least `min`
    pub fn at_least<T: PartialOrd + Display>(value: T, min: T, field: &str) -> Result<()> {
        if !(value >= min) {
            return Err(ConfigError::ValidationError(format!(
                "{} must be at least {}, got {}",
                field, min, value
            )));
        }
        Ok(())
    }

    /// Validate that a value is in a list of allowed values
    pub fn one_of<T: PartialEq + Display>(value: &T, allowed: &[T], field: &str) -> Result<()> {
        if !allowed.contains(value) {
            let allowed = allowed
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            return Err(ConfigError::ValidationError(format!(
                "{} must be one of [{}], got {}",
                field, allowed, value
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_empty_validation() {
        assert!(ConfigValidator::not_empty("value", "field").is_ok());
        assert!(ConfigValidator::not_empty("  ", "field").is_err());
    }

    #[test]
    fn test_range_validation() {
        assert!(ConfigValidator::in_range(50.0, 0.0, 100.0, "threshold").is_ok());
        assert!(ConfigValidator::in_range(100.5, 0.0, 100.0, "threshold").is_err());
        assert!(ConfigValidator::in_range(f64::NAN, 0.0, 100.0, "threshold").is_err());
    }

    #[test]
    fn test_at_least_validation() {
        assert!(ConfigValidator::at_least(1, 1, "max_attempts").is_ok());

        let err = ConfigValidator::at_least(0, 1, "max_attempts").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Validation error: max_attempts must be at least 1, got 0"
        );
    }

    #[test]
    fn test_one_of_validation() {
        let allowed = ["fixed", "exponential"];
        assert!(ConfigValidator::one_of(&"fixed", &allowed, "backoff").is_ok());
        assert!(ConfigValidator::one_of(&"linear", &allowed, "backoff").is_err());
    }
}
