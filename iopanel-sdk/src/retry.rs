use backoff::ExponentialBackoff;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reconnect policy with exponential backoff and an optional attempt limit.
///
/// The client and poller never retry on their own; this policy is consumed
/// by callers that explicitly ask for a reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt (0 = no retries, None = unlimited)
    #[serde(default = "RetryPolicy::default_max_attempts")]
    pub max_attempts: Option<u32>,

    /// Initial retry interval in milliseconds
    #[serde(default = "RetryPolicy::default_initial_interval_ms")]
    pub initial_interval_ms: u64,

    /// Maximum retry interval cap in milliseconds
    #[serde(default = "RetryPolicy::default_max_interval_ms")]
    pub max_interval_ms: u64,

    /// Randomization factor in range [0.0, 1.0]. Example: 0.2 means ±20% jitter
    #[serde(default = "RetryPolicy::default_randomization_factor")]
    pub randomization_factor: f64,

    /// Multiplicative factor for each retry step
    #[serde(default = "RetryPolicy::default_multiplier")]
    pub multiplier: f64,

    /// Optional maximum total elapsed time in milliseconds (None = no time limit)
    #[serde(default)]
    pub max_elapsed_time_ms: Option<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Self::default_max_attempts(),
            initial_interval_ms: Self::default_initial_interval_ms(),
            max_interval_ms: Self::default_max_interval_ms(),
            randomization_factor: Self::default_randomization_factor(),
            multiplier: Self::default_multiplier(),
            max_elapsed_time_ms: None,
        }
    }
}

impl RetryPolicy {
    fn default_max_attempts() -> Option<u32> {
        Some(3)
    }

    fn default_initial_interval_ms() -> u64 {
        1_000
    }

    fn default_max_interval_ms() -> u64 {
        30_000
    }

    fn default_randomization_factor() -> f64 {
        0.2
    }

    fn default_multiplier() -> f64 {
        2.0
    }

    /// Fail on the first error.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: Some(0),
            ..Default::default()
        }
    }

    pub fn unlimited() -> Self {
        Self {
            max_attempts: None,
            max_elapsed_time_ms: None,
            ..Default::default()
        }
    }

    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            ..Default::default()
        }
    }

    /// Whether another retry is allowed after `failures` failed attempts.
    #[inline]
    pub fn allows_retry(&self, failures: u32) -> bool {
        self.max_attempts.map_or(true, |max| failures <= max)
    }
}

/// Build an `ExponentialBackoff` from a [`RetryPolicy`].
///
/// `max_elapsed_time` bounds the loop by time; callers check
/// `max_attempts` separately via [`RetryPolicy::allows_retry`].
pub fn build_exponential_backoff(policy: &RetryPolicy) -> ExponentialBackoff {
    let initial = Duration::from_millis(policy.initial_interval_ms.max(1));
    ExponentialBackoff {
        current_interval: initial,
        initial_interval: initial,
        max_interval: Duration::from_millis(policy.max_interval_ms.max(policy.initial_interval_ms)),
        randomization_factor: policy.randomization_factor.clamp(0.0, 1.0),
        multiplier: policy.multiplier.max(1.0),
        max_elapsed_time: policy.max_elapsed_time_ms.map(Duration::from_millis),
        ..ExponentialBackoff::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backoff::backoff::Backoff;

    #[test]
    fn test_backoff_is_clamped_and_deterministic_without_jitter() {
        let policy = RetryPolicy {
            initial_interval_ms: 100,
            max_interval_ms: 250,
            randomization_factor: 0.0,
            multiplier: 2.0,
            ..Default::default()
        };
        let mut bo = build_exponential_backoff(&policy);
        // zero jitter still adds sub-millisecond noise
        let mut next_ms = || bo.next_backoff().map(|d| d.as_millis());
        assert_eq!(next_ms(), Some(100));
        assert_eq!(next_ms(), Some(200));
        assert_eq!(next_ms(), Some(250));
    }

    #[test]
    fn test_attempt_limits() {
        assert!(!RetryPolicy::no_retry().allows_retry(1));
        let three = RetryPolicy::with_max_attempts(3);
        assert!(three.allows_retry(3));
        assert!(!three.allows_retry(4));
        assert!(RetryPolicy::unlimited().allows_retry(u32::MAX));
    }
}
