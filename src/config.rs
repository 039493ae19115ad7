//! Saga configuration
//!
//! Defaults match the production profile: 3 attempts with exponential
//! backoff (1s initial, coefficient 2, capped at 30s) and a 30 second
//! per-activity timeout.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::saga::retry::RetryConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaConfig {
    /// Retry policy applied around every activity except status writes.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Per-call activity timeout; an elapsed timeout counts as a transient
    /// failure.
    #[serde(default = "default_activity_timeout", with = "humantime_serde")]
    pub activity_timeout: Duration,

    /// How often callers polling `get_run_status` are expected to check.
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            activity_timeout: default_activity_timeout(),
            poll_interval: default_poll_interval(),
        }
    }
}

fn default_activity_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(500)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_production_profile() {
        let config = SagaConfig::default();
        assert_eq!(config.activity_timeout, Duration::from_secs(30));
        assert_eq!(config.retry.attempts, 3);
        assert_eq!(config.retry.initial_delay, Duration::from_secs(1));
        assert_eq!(config.retry.max_delay, Duration::from_secs(30));
    }

    #[test]
    fn deserializes_from_partial_input() {
        let config: SagaConfig =
            serde_json::from_str(r#"{"activity_timeout": "5s", "retry": {"attempts": 2}}"#)
                .unwrap();
        assert_eq!(config.activity_timeout, Duration::from_secs(5));
        assert_eq!(config.retry.attempts, 2);
        assert_eq!(config.retry.initial_delay, Duration::from_secs(1));
    }
}
