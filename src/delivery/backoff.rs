//! Retry schedule for failed deliveries

use std::time::Duration;

use rand::Rng;

use crate::config::DeliveryConfig;

/// Exponential backoff with jitter and a retry budget
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Failed attempts tolerated before dead-lettering
    pub max_attempts: u32,
    /// Relative jitter, e.g. 0.2 for ±20%
    pub jitter: f64,
}

impl RetryPolicy {
    pub fn from_config(config: &DeliveryConfig) -> Self {
        Self {
            base_delay: Duration::from_secs(config.base_delay_secs),
            max_delay: Duration::from_secs(config.max_delay_secs),
            max_attempts: config.max_attempts,
            jitter: config.jitter.clamp(0.0, 0.99),
        }
    }

    /// Delay after the `attempts`-th failure before jitter:
    /// `min(base * 2^(attempts - 1), max)`
    ///
    /// `attempts` counts failures from 1, so the first retry waits `base`.
    /// Written as `base * 2^n`, `n` is the zero-based retry index.
    pub fn nominal_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1);
        2u32.checked_pow(exponent)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Nominal delay scaled by a random factor in `[1 - jitter, 1 + jitter]`
    pub fn delay<R: Rng + ?Sized>(&self, attempts: u32, rng: &mut R) -> Duration {
        let nominal = self.nominal_delay(attempts);
        if self.jitter <= 0.0 {
            return nominal;
        }
        nominal.mul_f64(1.0 + rng.gen_range(-self.jitter..=self.jitter))
    }

    /// Whether `attempts` failures use up the budget
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts > self.max_attempts
    }
}
