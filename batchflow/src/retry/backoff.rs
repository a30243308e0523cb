//! Back-off policies applied between retry attempts.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Delay computation between attempts.
///
/// Delays are computed from the number of failures registered so far
/// (1 for the pause before the second attempt).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackOffPolicy {
    /// Retry immediately.
    #[default]
    None,
    /// Constant delay.
    Fixed {
        /// Delay in milliseconds.
        period_ms: u64,
    },
    /// delay = initial * multiplier^(n-1), capped at max.
    Exponential {
        /// First delay in milliseconds.
        initial_ms: u64,
        /// Growth factor.
        multiplier: f64,
        /// Cap in milliseconds.
        max_ms: u64,
    },
    /// Exponential delay stretched by a random factor in `[1, multiplier)`.
    ExponentialRandom {
        /// First delay in milliseconds.
        initial_ms: u64,
        /// Growth factor.
        multiplier: f64,
        /// Cap in milliseconds.
        max_ms: u64,
    },
}

/// Whole milliseconds of `duration`, saturating at `u64::MAX`.
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl BackOffPolicy {
    /// Fixed delay.
    #[must_use]
    pub fn fixed(period: Duration) -> Self {
        Self::Fixed {
            period_ms: millis(period),
        }
    }

    /// Exponential delay.
    #[must_use]
    pub fn exponential(initial: Duration, multiplier: f64, max: Duration) -> Self {
        Self::Exponential {
            initial_ms: millis(initial),
            multiplier,
            max_ms: millis(max),
        }
    }

    /// Exponential delay with random stretch.
    #[must_use]
    pub fn exponential_random(initial: Duration, multiplier: f64, max: Duration) -> Self {
        Self::ExponentialRandom {
            initial_ms: millis(initial),
            multiplier,
            max_ms: millis(max),
        }
    }

    /// Delay to wait after the `failures`-th failure.
    #[must_use]
    pub fn delay_for(&self, failures: usize) -> Duration {
        let delay_ms = match *self {
            Self::None => 0,
            Self::Fixed { period_ms } => period_ms,
            Self::Exponential {
                initial_ms,
                multiplier,
                max_ms,
            } => exponential_ms(initial_ms, multiplier, max_ms, failures),
            Self::ExponentialRandom {
                initial_ms,
                multiplier,
                max_ms,
            } => {
                let base = exponential_ms(initial_ms, multiplier, max_ms, failures);
                if multiplier <= 1.0 || base == 0 {
                    base
                } else {
                    let stretch = rand::thread_rng().gen_range(1.0..multiplier);
                    scale(base, stretch).min(max_ms)
                }
            }
        };
        Duration::from_millis(delay_ms)
    }
}

fn exponential_ms(initial_ms: u64, multiplier: f64, max_ms: u64, failures: usize) -> u64 {
    let exponent = i32::try_from(failures.saturating_sub(1)).unwrap_or(i32::MAX);
    scale(initial_ms, multiplier.max(1.0).powi(exponent)).min(max_ms)
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
fn scale(value: u64, factor: f64) -> u64 {
    let scaled = value as f64 * factor;
    if scaled >= u64::MAX as f64 {
        u64::MAX
    } else {
        scaled as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_backoff() {
        assert_eq!(BackOffPolicy::None.delay_for(3), Duration::ZERO);
    }

    #[test]
    fn test_oversized_duration_saturates() {
        assert_eq!(
            BackOffPolicy::fixed(Duration::MAX),
            BackOffPolicy::Fixed { period_ms: u64::MAX }
        );
        assert_eq!(millis(Duration::from_secs(2)), 2000);
    }

    #[test]
    fn test_fixed_backoff() {
        let policy = BackOffPolicy::fixed(Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(7), Duration::from_millis(100));
    }

    #[test]
    fn test_exponential_backoff_capped() {
        let policy = BackOffPolicy::exponential(
            Duration::from_millis(100),
            2.0,
            Duration::from_millis(500),
        );
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(4), Duration::from_millis(500));
        assert_eq!(policy.delay_for(60), Duration::from_millis(500));
    }

    #[test]
    fn test_exponential_random_within_bounds() {
        let policy = BackOffPolicy::exponential_random(
            Duration::from_millis(100),
            2.0,
            Duration::from_secs(10),
        );
        for _ in 0..50 {
            let delay = policy.delay_for(2);
            assert!(delay >= Duration::from_millis(200));
            assert!(delay < Duration::from_millis(400));
        }
    }

    #[test]
    fn test_serde_shape() {
        let policy = BackOffPolicy::fixed(Duration::from_millis(250));
        let json = serde_json::to_value(policy).unwrap();
        assert_eq!(json, serde_json::json!({"type": "fixed", "period_ms": 250}));
    }
}
