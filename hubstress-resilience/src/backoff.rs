//! Backoff strategies for retry policies

use hubstress_config::BackoffKind;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Spread applied to jittered delays, in percent
pub const JITTER_PERCENT: u32 = 20;

fn shrink(delay: Duration) -> Duration {
    delay.saturating_mul(100 - JITTER_PERCENT) / 100
}

fn grow(delay: Duration) -> Duration {
    delay.saturating_mul(100 + JITTER_PERCENT) / 100
}

/// Backoff strategy for retries
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Fixed delay between retries
    Fixed,

    /// Linear increase: delay = initial_delay * attempt
    Linear,

    /// Exponential increase: delay = initial_delay * base^(attempt-1)
    Exponential {
        /// Base for exponential calculation (e.g., 2.0 for doubling)
        base: f64,
    },
}

impl From<BackoffKind> for BackoffStrategy {
    fn from(kind: BackoffKind) -> Self {
        match kind {
            BackoffKind::Fixed => BackoffStrategy::Fixed,
            BackoffKind::Linear => BackoffStrategy::Linear,
            BackoffKind::Exponential { base } => BackoffStrategy::Exponential { base },
        }
    }
}

/// Backoff delay calculator
#[derive(Debug, Clone)]
pub struct BackoffCalculator {
    strategy: BackoffStrategy,
    initial_delay: Duration,
    max_delay: Duration,
    jitter: bool,
}

impl BackoffCalculator {
    /// Create a new backoff calculator
    pub fn new(
        strategy: BackoffStrategy,
        initial_delay: Duration,
        max_delay: Duration,
        jitter: bool,
    ) -> Self {
        Self {
            strategy,
            initial_delay,
            max_delay,
            jitter,
        }
    }

    /// Calculate delay for a specific retry (1-indexed). Never exceeds `max_delay`.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let (low, high) = self.delay_bounds(attempt);
        self.sample(low, high)
    }

    /// Delay for a retry without jitter, capped at `max_delay`
    pub fn base_delay(&self, attempt: u32) -> Duration {
        self.calculate_base_delay(attempt).min(self.max_delay)
    }

    /// Range a retry delay is drawn from: ±20% around the capped base,
    /// clipped to `max_delay`. At the cap delays still spread below it.
    pub fn delay_bounds(&self, attempt: u32) -> (Duration, Duration) {
        let base = self.base_delay(attempt);
        if self.jitter {
            (
                shrink(base),
                grow(base).min(self.max_delay),
            )
        } else {
            (base, base)
        }
    }

    /// Cap a server-provided retry hint. With jitter the hint is capped at
    /// the bottom of the jitter window so capped hints still spread.
    pub fn cap_hint(&self, hint: Duration) -> Duration {
        if self.jitter {
            hint.min(shrink(self.max_delay))
        } else {
            hint.min(self.max_delay)
        }
    }

    /// Upper end of the window for a delay that must not fall below `floor`
    pub fn spread_above(&self, floor: Duration) -> Duration {
        if self.jitter {
            grow(floor).min(self.max_delay)
        } else {
            floor
        }
    }

    /// Uniform draw from `[low, high]`; `low` when the range is empty
    pub fn sample(&self, low: Duration, high: Duration) -> Duration {
        if high <= low {
            return low;
        }
        let (low, high) = (low.as_nanos() as u64, high.as_nanos() as u64);
        Duration::from_nanos(rand::thread_rng().gen_range(low..=high))
    }

    fn calculate_base_delay(&self, attempt: u32) -> Duration {
        match &self.strategy {
            BackoffStrategy::Fixed => self.initial_delay,

            BackoffStrategy::Linear => self.initial_delay.saturating_mul(attempt),

            BackoffStrategy::Exponential { base } => {
                if attempt == 0 {
                    return Duration::ZERO;
                }
                let multiplier = base.powi(attempt.min(64) as i32 - 1);
                let nanos = self.initial_delay.as_nanos() as f64 * multiplier;
                if nanos >= u64::MAX as f64 {
                    self.max_delay
                } else {
                    Duration::from_nanos(nanos as u64)
                }
            }
        }
    }
}
