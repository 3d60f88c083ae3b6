//! Reconnect backoff

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Delay between scans that found no instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffPolicy {
    /// Same delay before every rescan
    Fixed {
        /// Delay in milliseconds
        delay_ms: u64,
    },
    /// Delay grows by `factor` per failed scan up to `max_ms`
    Exponential {
        /// First rescan delay in milliseconds
        initial_ms: u64,
        /// Growth per failed scan
        factor: f64,
        /// Upper bound in milliseconds
        max_ms: u64,
    },
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Fixed { delay_ms: 5000 }
    }
}

impl BackoffPolicy {
    /// Delay before rescan number `failures` (1 = first rescan after a miss)
    pub fn delay_for(&self, failures: u32) -> Duration {
        match *self {
            BackoffPolicy::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            BackoffPolicy::Exponential {
                initial_ms,
                factor,
                max_ms,
            } => {
                let exponent = failures.saturating_sub(1).min(64) as i32;
                let ms = (initial_ms as f64 * factor.powi(exponent)).min(max_ms as f64);
                Duration::from_millis(ms as u64)
            }
        }
    }

    /// Check the policy parameters
    pub fn validate(&self) -> Result<(), String> {
        match *self {
            BackoffPolicy::Fixed { .. } => Ok(()),
            BackoffPolicy::Exponential {
                initial_ms,
                factor,
                max_ms,
            } => {
                if !(factor.is_finite() && factor >= 1.0) {
                    return Err(format!("backoff factor must be >= 1, got {factor}"));
                }
                if initial_ms > max_ms {
                    return Err(format!(
                        "backoff initial_ms ({initial_ms}) exceeds max_ms ({max_ms})"
                    ));
                }
                Ok(())
            }
        }
    }
}

/// Backoff state for one outage
///
/// The first wait after startup or link loss is the short `after_loss`
/// delay; every wait after a failed scan follows the policy.
#[derive(Debug, Clone)]
pub struct Backoff {
    after_loss: Duration,
    policy: BackoffPolicy,
    attempt: u32,
}

impl Backoff {
    /// Create backoff state
    pub fn new(after_loss: Duration, policy: BackoffPolicy) -> Self {
        Self {
            after_loss,
            policy,
            attempt: 0,
        }
    }

    /// Delay to wait before the next scan
    pub fn next_delay(&mut self) -> Duration {
        let delay = if self.attempt == 0 {
            self.after_loss
        } else {
            self.policy.delay_for(self.attempt)
        };
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    /// Start a new outage
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Scans attempted in the current outage
    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}
