// Environment variable loading

use crate::{ConfigError, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::env;

/// Prefix used when none is given.
pub const DEFAULT_PREFIX: &str = "RAMPART";

/// Reads prefixed environment variables into typed JSON values.
///
/// `RAMPART_MAX_ATTEMPTS=5` becomes the key `max_attempts` with the number
/// `5`. A double underscore nests: `RAMPART_FALLBACK__TIMEOUT=slow` becomes
/// the key `fallback.timeout`.
#[derive(Debug, Clone)]
pub struct EnvLoader {
    prefix: Option<String>,
}

impl EnvLoader {
    /// Create a loader; `None` reads every variable.
    pub fn new(prefix: Option<String>) -> Self {
        Self { prefix }
    }

    /// Prefix this loader matches, if any.
    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    /// Load matching variables from the process environment.
    pub fn load(&self) -> Result<BTreeMap<String, Value>> {
        Ok(self.collect(env::vars()))
    }

    /// Load matching variables from an explicit set of pairs.
    pub fn collect<I>(&self, vars: I) -> BTreeMap<String, Value>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        vars.into_iter()
            .filter_map(|(key, value)| {
                let key = self.strip_prefix(&key)?;
                Some((key.to_lowercase().replace("__", "."), coerce(&value)))
            })
            .collect()
    }

    /// Load a specific environment variable
    pub fn load_var(&self, key: &str) -> Result<String> {
        env::var(self.full_key(key)).map_err(ConfigError::EnvError)
    }

    /// Load with default value
    pub fn load_var_or(&self, key: &str, default: &str) -> String {
        self.load_var(key).unwrap_or_else(|_| default.to_string())
    }

    fn full_key(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}_{}", prefix, key.to_uppercase()),
            None => key.to_uppercase(),
        }
    }

    fn strip_prefix<'a>(&self, key: &'a str) -> Option<&'a str> {
        match &self.prefix {
            Some(prefix) => key
                .strip_prefix(prefix.as_str())?
                .strip_prefix('_')
                .filter(|rest| !rest.is_empty()),
            None => Some(key),
        }
    }
}

impl Default for EnvLoader {
    fn default() -> Self {
        Self::new(Some(DEFAULT_PREFIX.to_string()))
    }
}

/// Numbers and booleans become typed values; everything else stays a string.
pub fn coerce(raw: &str) -> Value {
    let trimmed = raw.trim();
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value @ (Value::Number(_) | Value::Bool(_))) => value,
        _ => Value::String(raw.to_string()),
    }
}
