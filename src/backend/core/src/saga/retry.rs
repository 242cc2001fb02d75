//! Per-step retry and timeout policy.

use serde::{Deserialize, Serialize};
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// Retry Policy
// ═══════════════════════════════════════════════════════════════════════════════

/// Exponential retry policy for one saga step.
///
/// Attempts are numbered from 1. The delay after attempt `n` is
/// `initial_interval * backoff_coefficient^(n-1)`, capped at
/// `maximum_interval` (100 × `initial_interval` when unset).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay before the second attempt
    #[serde(with = "humantime_serde")]
    pub initial_interval: Duration,
    /// Growth factor applied to each further delay
    pub backoff_coefficient: f64,
    /// Upper bound for any single delay
    #[serde(with = "humantime_serde")]
    pub maximum_interval: Option<Duration>,
    /// Total attempts allowed, including the first (0 = unlimited)
    pub maximum_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            backoff_coefficient: 2.0,
            maximum_interval: None,
            maximum_attempts: 2,
        }
    }
}

impl RetryPolicy {
    /// A policy that runs the step exactly once.
    pub fn no_retry() -> Self {
        Self {
            maximum_attempts: 1,
            ..Default::default()
        }
    }

    /// Default backoff with a specific attempt bound.
    pub fn with_attempts(maximum_attempts: u32) -> Self {
        Self {
            maximum_attempts,
            ..Default::default()
        }
    }

    /// Retry forever.
    pub fn unlimited() -> Self {
        Self::with_attempts(0)
    }

    /// Set the initial interval.
    pub fn initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    /// Whether attempt number `attempt` (1-based) may run.
    pub fn allows_attempt(&self, attempt: u32) -> bool {
        self.maximum_attempts == 0 || attempt <= self.maximum_attempts
    }

    /// Delay to wait after attempt number `attempt` (1-based) failed.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let cap = self
            .maximum_interval
            .unwrap_or_else(|| self.initial_interval.saturating_mul(100));
        let secs = self.initial_interval.as_secs_f64() * self.backoff_coefficient.max(1.0).powi(exponent);

        if !secs.is_finite() || secs >= cap.as_secs_f64() {
            cap
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Step Options
// ═══════════════════════════════════════════════════════════════════════════════

/// Timeout and retry settings for one step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepOptions {
    /// Limit for a single attempt; exceeding it counts as a retryable failure
    #[serde(with = "humantime_serde")]
    pub start_to_close: Duration,
    pub retry: RetryPolicy,
}

impl Default for StepOptions {
    fn default() -> Self {
        Self {
            start_to_close: Duration::from_secs(60),
            retry: RetryPolicy::default(),
        }
    }
}

impl StepOptions {
    pub fn new(start_to_close: Duration, retry: RetryPolicy) -> Self {
        Self {
            start_to_close,
            retry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_invite_workflow_options() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.initial_interval, Duration::from_secs(1));
        assert!(policy.allows_attempt(2));
        assert!(!policy.allows_attempt(3));
        assert_eq!(StepOptions::default().start_to_close, Duration::from_secs(60));
    }

    #[test]
    fn test_exponential_delays_are_capped() {
        let policy = RetryPolicy {
            maximum_interval: Some(Duration::from_secs(5)),
            ..RetryPolicy::unlimited()
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(500), Duration::from_secs(5));
    }

    #[test]
    fn test_unlimited_and_single_attempt() {
        assert!(RetryPolicy::unlimited().allows_attempt(10_000));
        let once = RetryPolicy::no_retry();
        assert!(once.allows_attempt(1));
        assert!(!once.allows_attempt(2));
    }

    #[test]
    fn test_humantime_deserialization() {
        let options: StepOptions = serde_json::from_str(
            r#"{"start_to_close":"30s","retry":{"initial_interval":"250ms","maximum_attempts":5}}"#,
        )
        .unwrap();
        assert_eq!(options.start_to_close, Duration::from_secs(30));
        assert_eq!(options.retry.initial_interval, Duration::from_millis(250));
        assert_eq!(options.retry.backoff_coefficient, 2.0);
        assert_eq!(options.retry.maximum_attempts, 5);
    }
}
