//! Retry policy: decides backoff delays.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Backoff for handler-reported failures.
///
/// delay(n) = scale * base^n, clamped to `max_delay`, then multiplied by a jitter factor drawn
/// from `[1 - jitter, 1 + jitter]` and clamped again.
///
/// Example with scale=10s, base=2.0, jitter=0:
/// - retry_count 0 (first failure): 10s
/// - retry_count 1: 20s
/// - retry_count 2: 40s
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Exponent base.
    pub base: f64,

    /// Delay for retry_count = 0.
    pub scale_ms: u64,

    /// Ceiling applied before and after jitter.
    pub max_delay_ms: u64,

    /// Half-width of the multiplicative jitter band, in `[0, 1)`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: 2.0,
            scale_ms: 10_000,
            max_delay_ms: 3_600_000,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Deterministic part of the delay. Non-decreasing in `retry_count`, never above `max_delay`.
    pub fn base_delay(&self, retry_count: u32) -> Duration {
        let max_ms = self.max_delay_ms as f64;
        let exponent = i32::try_from(retry_count).unwrap_or(i32::MAX);
        let raw = self.scale_ms as f64 * self.base.powi(exponent);
        let ms = if raw.is_finite() { raw.min(max_ms) } else { max_ms };
        Duration::from_secs_f64(ms.max(0.0) / 1000.0)
    }

    /// Delay before the next attempt.
    ///
    /// `sample` is a uniform draw in `[0, 1)` (see [`RetryPolicy::sample`]); taking it as an
    /// argument keeps this function pure.
    pub fn next_delay(&self, retry_count: u32, sample: f64) -> Duration {
        let base = self.base_delay(retry_count).as_secs_f64();
        let factor = 1.0 + self.jitter * (2.0 * sample.clamp(0.0, 1.0) - 1.0);
        let secs = (base * factor).min(self.max_delay().as_secs_f64()).max(0.0);
        Duration::from_secs_f64(secs)
    }

    pub fn sample<R: Rng + ?Sized>(rng: &mut R) -> f64 {
        rng.gen_range(0.0..1.0)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.base.is_finite() || self.base < 1.0 {
            return Err(format!("retry.base must be >= 1.0 (got {})", self.base));
        }
        if !(0.0..1.0).contains(&self.jitter) {
            return Err(format!("retry.jitter must be in [0, 1) (got {})", self.jitter));
        }
        if self.scale_ms > self.max_delay_ms {
            return Err("retry.scale_ms must not exceed retry.max_delay_ms".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn no_jitter() -> RetryPolicy {
        RetryPolicy {
            jitter: 0.0,
            ..RetryPolicy::default()
        }
    }

    #[test]
    fn default_policy_has_reasonable_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.base, 2.0);
        assert_eq!(policy.scale_ms, 10_000);
        assert!(policy.validate().is_ok());
    }

    #[rstest]
    #[case(0, 10)]
    #[case(1, 20)]
    #[case(2, 40)]
    #[case(3, 80)]
    fn exponential_backoff(#[case] retry_count: u32, #[case] secs: u64) {
        assert_eq!(no_jitter().next_delay(retry_count, 0.5), Duration::from_secs(secs));
    }

    #[test]
    fn delay_is_capped_even_for_huge_retry_counts() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.base_delay(1_000), policy.max_delay());
        assert_eq!(policy.base_delay(u32::MAX), policy.max_delay());
        assert!(policy.next_delay(u32::MAX, 0.999) <= policy.max_delay());
    }

    #[test]
    fn base_delay_never_decreases() {
        let policy = RetryPolicy::default();
        let delays: Vec<_> = (0..30).map(|n| policy.base_delay(n)).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }

    #[rstest]
    #[case(0.0)]
    #[case(0.25)]
    #[case(0.999)]
    fn jitter_stays_inside_band(#[case] sample: f64) {
        let policy = RetryPolicy::default();
        let base = policy.base_delay(2).as_secs_f64();
        let d = policy.next_delay(2, sample).as_secs_f64();
        assert!(d >= base * 0.9 - 1e-6);
        assert!(d <= base * 1.1 + 1e-6);
    }

    #[rstest]
    #[case::base_below_one(RetryPolicy { base: 0.5, ..RetryPolicy::default() })]
    #[case::jitter_too_wide(RetryPolicy { jitter: 1.0, ..RetryPolicy::default() })]
    #[case::scale_above_ceiling(RetryPolicy { scale_ms: 10, max_delay_ms: 5, ..RetryPolicy::default() })]
    fn invalid_policies_are_rejected(#[case] policy: RetryPolicy) {
        assert!(policy.validate().is_err());
    }
}
