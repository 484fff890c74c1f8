//! Execute operation configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Behavior switches for [`ExecuteOp`](crate::ExecuteOp).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecuteConfig {
    /// Reject connections the provider hands out already flagged unusable
    pub validate_on_acquire: bool,
    /// Log a warning when an exchange takes longer than this
    pub slow_exchange_threshold: Option<Duration>,
}

impl Default for ExecuteConfig {
    fn default() -> Self {
        Self {
            validate_on_acquire: true,
            slow_exchange_threshold: None,
        }
    }
}

impl ExecuteConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable/disable validation of acquired connections.
    pub fn validate_on_acquire(mut self, enabled: bool) -> Self {
        self.validate_on_acquire = enabled;
        self
    }

    /// Set the slow exchange warning threshold.
    pub fn slow_exchange_threshold(mut self, threshold: Duration) -> Self {
        self.slow_exchange_threshold = Some(threshold);
        self
    }
}
