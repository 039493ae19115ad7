//! Retry policy for step activities
//!
//! Bounded exponential backoff with optional jitter. Only transient
//! failures are retried; a business failure means the collaborator already
//! decided the operation cannot succeed, so repeating it is pointless.

use rand::Rng as _;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::ActivityError;

/// Retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts, including the first.
    #[serde(default = "default_attempts")]
    pub attempts: u32,

    /// Delay before the second attempt.
    #[serde(default = "default_initial_delay", with = "humantime_serde")]
    pub initial_delay: Duration,

    /// Multiplier applied to the delay after each failed attempt.
    #[serde(default = "default_backoff_coefficient")]
    pub backoff_coefficient: f64,

    /// Upper bound on the inter-attempt delay.
    #[serde(default = "default_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,

    /// Spread delays by up to `jitter_factor` of their value.
    #[serde(default)]
    pub jitter: bool,

    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            initial_delay: default_initial_delay(),
            backoff_coefficient: default_backoff_coefficient(),
            max_delay: default_max_delay(),
            jitter: false,
            jitter_factor: default_jitter_factor(),
        }
    }
}

impl RetryConfig {
    /// Delay to sleep after the given failed attempt (1-based), before
    /// jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let multiplier = self.backoff_coefficient.powi(attempt.saturating_sub(1) as i32);
        let delay = Duration::from_secs_f64(self.initial_delay.as_secs_f64() * multiplier);
        delay.min(self.max_delay)
    }

    /// Apply jitter to a computed delay.
    pub fn apply_jitter(&self, delay: Duration) -> Duration {
        if !self.jitter {
            return delay;
        }
        let mut rng = rand::rng();
        let range = delay.as_secs_f64() * self.jitter_factor;
        let offset = rng.random_range(-range / 2.0..=range / 2.0);
        Duration::from_secs_f64((delay.as_secs_f64() + offset).max(0.0))
    }
}

/// Outcome of a retried activity, with the number of attempts made. The
/// executor persists the attempt count in the run's checkpoint.
#[derive(Debug)]
pub struct Attempted<T> {
    pub outcome: Result<T, ActivityError>,
    pub attempts: u32,
}

/// Run `operation` under the retry policy.
///
/// Transient failures are retried up to `config.attempts` total attempts,
/// sleeping the backoff delay in between; any other failure returns
/// immediately. The backoff sleep is cancellable: if `cancel` fires while
/// waiting, the activity reports [`ActivityError::Cancelled`]. An in-flight
/// operation is never interrupted, only the wait between attempts is.
pub async fn retry_activity<F, Fut, T>(
    config: &RetryConfig,
    cancel: &CancellationToken,
    step: &str,
    operation: F,
) -> Attempted<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ActivityError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => {
                return Attempted {
                    outcome: Ok(value),
                    attempts: attempt,
                }
            }
            Err(err) => {
                if !err.is_retryable() || attempt >= config.attempts {
                    return Attempted {
                        outcome: Err(err),
                        attempts: attempt,
                    };
                }

                let delay = config.apply_jitter(config.delay_for(attempt));
                warn!(
                    step,
                    attempt,
                    max_attempts = config.attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, retrying"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        return Attempted {
                            outcome: Err(ActivityError::Cancelled),
                            attempts: attempt,
                        };
                    }
                }
            }
        }
    }
}

fn default_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_backoff_coefficient() -> f64 {
    2.0
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_jitter_factor() -> f64 {
    0.3
}
