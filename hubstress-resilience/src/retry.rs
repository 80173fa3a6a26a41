//! Retry policy and per-attempt retry decisions

use hubstress_config::RetryConfig;
use log::debug;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::backoff::{BackoffCalculator, BackoffStrategy};

/// Retry policy configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,

    /// Initial delay between retries
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    /// Backoff strategy
    pub backoff_strategy: BackoffStrategy,

    /// Whether to add jitter to retry delays
    pub jitter: bool,

    /// Whether rate limiting should pause fresh dispatches batch-wide
    pub coordinate_throttling: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(RetryConfig::default())
    }
}

impl From<RetryConfig> for RetryPolicy {
    fn from(config: RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_delay: config.initial_delay,
            max_delay: config.max_delay,
            backoff_strategy: config.backoff_strategy.into(),
            jitter: config.jitter,
            coordinate_throttling: config.coordinate_throttling,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Unjittered delay for a specific retry
    pub fn base_delay_for_attempt(&self, attempt: u32) -> Duration {
        self.calculator().base_delay(attempt)
    }

    /// Decide what to do after `attempts_made` attempts ended in `error`.
    ///
    /// The delay is drawn from the jitter window and never falls below
    /// `previous_delay` or a capped server-provided retry hint. When one of
    /// those floors lies above the window the delay is drawn from up to 20%
    /// above the floor, still capped at `max_delay`.
    pub fn decide<E>(&self, attempts_made: u32, error: &E, previous_delay: Duration) -> RetryDecision
    where
        E: Retryable,
    {
        if !error.is_retryable() {
            return RetryDecision::Fail;
        }

        if attempts_made >= self.max_attempts {
            return RetryDecision::Exhausted;
        }

        let calculator = self.calculator();
        let (low, high) = calculator.delay_bounds(attempts_made);
        let mut floor = previous_delay;
        if let Some(hint) = error.retry_delay() {
            floor = floor.max(calculator.cap_hint(hint));
        }
        let delay = if floor > low {
            calculator.sample(floor, high.max(calculator.spread_above(floor)))
        } else {
            calculator.calculate_delay(attempts_made)
        };

        debug!(
            "Retry {} of {} scheduled in {:?}",
            attempts_made,
            self.max_attempts - 1,
            delay
        );
        RetryDecision::Retry { delay }
    }

    fn calculator(&self) -> BackoffCalculator {
        BackoffCalculator::new(
            self.backoff_strategy,
            self.initial_delay,
            self.max_delay,
            self.jitter,
        )
    }
}

/// Outcome of consulting the retry policy after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after waiting `delay`
    Retry { delay: Duration },
    /// The error is retryable but the attempt ceiling was reached
    Exhausted,
    /// The error must not be retried
    Fail,
}

/// Trait for errors that can be retried
pub trait Retryable {
    /// Whether this error is retryable
    fn is_retryable(&self) -> bool;

    /// Whether the remote side explicitly asked us to slow down
    fn is_rate_limited(&self) -> bool {
        false
    }

    /// Custom retry delay for this error type
    fn retry_delay(&self) -> Option<Duration> {
        None
    }
}
