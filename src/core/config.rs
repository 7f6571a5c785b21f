//! Engine configuration
//!
//! Passed explicitly to the engine constructor. Every field has a default so
//! a partial JSON document is enough to override a single setting.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::error::EvalError;

/// Evaluation engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Period of the monitor tick that debounces submissions (milliseconds).
    pub monitor_interval_ms: u64,
    /// Silence after which a watchdog considers the engine wedged (milliseconds).
    pub watchdog_timeout_ms: u64,
    /// Host URI used by zones that do not name one.
    pub default_host_uri: String,
    /// Process name used by zones that do not name one.
    pub default_process_name: String,
    /// Zone whose blocks live inside the editor process.
    pub gui_zone: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            monitor_interval_ms: 25,
            watchdog_timeout_ms: 3_000,
            default_host_uri: "tcp://localhost".into(),
            default_process_name: String::new(),
            gui_zone: "gui".into(),
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from a JSON document
    pub fn from_json(document: &str) -> Result<Self, EvalError> {
        let config: EngineConfig = serde_json::from_str(document)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the values are usable
    pub fn validate(&self) -> Result<(), EvalError> {
        if self.monitor_interval_ms == 0 {
            return Err(EvalError::InvalidConfig(
                "monitor_interval_ms must be greater than zero".into(),
            ));
        }
        if self.watchdog_timeout_ms <= self.monitor_interval_ms {
            return Err(EvalError::InvalidConfig(
                "watchdog_timeout_ms must exceed monitor_interval_ms".into(),
            ));
        }
        if self.default_host_uri.is_empty() {
            return Err(EvalError::InvalidConfig("default_host_uri cannot be empty".into()));
        }
        Ok(())
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_millis(self.watchdog_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config = EngineConfig::from_json(r#"{"monitor_interval_ms": 50}"#).unwrap();
        assert_eq!(config.monitor_interval(), Duration::from_millis(50));
        assert_eq!(config.gui_zone, "gui");
        assert_eq!(config.default_host_uri, "tcp://localhost");
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(EngineConfig::from_json(r#"{"monitor_interval_ms": 0}"#).is_err());
        assert!(EngineConfig::from_json(r#"{"watchdog_timeout_ms": 10}"#).is_err());
        assert!(matches!(
            EngineConfig::from_json("not json"),
            Err(EvalError::InvalidConfig(_))
        ));
    }
}
