//! Batch-wide throttle gate
//!
//! When the hub answers with a rate-limit signal every worker should back off,
//! not only the one that happened to receive it. The gate records those
//! signals and exposes a shared pause that fresh dispatches wait out before
//! acquiring a concurrency slot.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Throttle gate metrics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ThrottleMetrics {
    /// Rate-limit signals recorded
    pub rate_limited: u64,
    /// Times the gate moved its pause deadline forward
    pub pauses: u64,
    /// Largest run of rate limits without an intervening success
    pub max_consecutive: u32,
}

/// Thread-safe throttle gate shared by all dispatchers of a batch
#[derive(Clone)]
pub struct ThrottleGate {
    enabled: bool,
    state: Arc<Mutex<ThrottleState>>,
}

struct ThrottleState {
    paused_until: Option<Instant>,
    consecutive: u32,
    /// Highest per-item attempt number among the current run of rate limits
    burst_attempt: u32,
    metrics: ThrottleMetrics,
}

impl ThrottleGate {
    /// Create a gate; a disabled gate records metrics but never pauses
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            state: Arc::new(Mutex::new(ThrottleState {
                paused_until: None,
                consecutive: 0,
                burst_attempt: 0,
                metrics: ThrottleMetrics::default(),
            })),
        }
    }

    pub fn disabled() -> Self {
        Self::new(false)
    }

    /// Record a rate-limit signal received on an item's `attempt`-th call.
    /// `pause_for` maps the highest attempt number seen in the current run
    /// of rate limits to the pause length; the resulting pause is returned.
    /// Many items limited on the same attempt count as one burst.
    pub fn record_rate_limited<F>(&self, attempt: u32, pause_for: F) -> Duration
    where
        F: FnOnce(u32) -> Duration,
    {
        let mut state = self.state.lock();
        state.consecutive = state.consecutive.saturating_add(1);
        state.burst_attempt = state.burst_attempt.max(attempt);
        state.metrics.rate_limited += 1;
        state.metrics.max_consecutive = state.metrics.max_consecutive.max(state.consecutive);

        if !self.enabled {
            return Duration::ZERO;
        }

        let pause = pause_for(state.burst_attempt);
        let until = Instant::now() + pause;
        if state.paused_until.map_or(true, |current| until > current) {
            state.paused_until = Some(until);
            state.metrics.pauses += 1;
            log::debug!(
                "Hub rate limited {} time(s) in a row, pausing new dispatches for {:?}",
                state.consecutive,
                pause
            );
        }
        pause
    }

    /// Record a successful call; ends the current run of rate limits
    pub fn record_success(&self) {
        let mut state = self.state.lock();
        state.consecutive = 0;
        state.burst_attempt = 0;
    }

    /// Time left before fresh dispatches may proceed
    pub fn pause_remaining(&self) -> Option<Duration> {
        let mut state = self.state.lock();
        match state.paused_until {
            Some(until) => {
                let now = Instant::now();
                if until > now {
                    Some(until - now)
                } else {
                    state.paused_until = None;
                    None
                }
            }
            None => None,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.pause_remaining().is_some()
    }

    pub fn consecutive_rate_limits(&self) -> u32 {
        self.state.lock().consecutive
    }

    pub fn metrics(&self) -> ThrottleMetrics {
        self.state.lock().metrics.clone()
    }
}

impl std::fmt::Debug for ThrottleGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThrottleGate")
            .field("enabled", &self.enabled)
            .field("metrics", &self.metrics())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_pauses_gate() {
        let gate = ThrottleGate::new(true);
        assert!(!gate.is_paused());

        let pause = gate.record_rate_limited(1, |n| Duration::from_millis(100) * n);
        assert_eq!(pause, Duration::from_millis(100));
        assert!(gate.is_paused());

        tokio::time::advance(Duration::from_millis(150)).await;
        assert!(!gate.is_paused());
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_attempts_extend_pause() {
        let gate = ThrottleGate::new(true);
        gate.record_rate_limited(1, |n| Duration::from_millis(100) * n);
        let second = gate.record_rate_limited(2, |n| Duration::from_millis(100) * n);
        assert_eq!(second, Duration::from_millis(200));
        assert_eq!(gate.consecutive_rate_limits(), 2);

        gate.record_success();
        assert_eq!(gate.consecutive_rate_limits(), 0);
        tokio::time::advance(Duration::from_millis(250)).await;
        let after_success = gate.record_rate_limited(1, |n| Duration::from_millis(100) * n);
        assert_eq!(after_success, Duration::from_millis(100));

        let metrics = gate.metrics();
        assert_eq!(metrics.rate_limited, 3);
        assert_eq!(metrics.pauses, 3);
        assert_eq!(metrics.max_consecutive, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_on_first_attempt_pauses_once() {
        let gate = ThrottleGate::new(true);
        for _ in 0..10 {
            let pause = gate.record_rate_limited(1, |n| Duration::from_millis(500) * n);
            assert_eq!(pause, Duration::from_millis(500));
        }

        assert_eq!(gate.consecutive_rate_limits(), 10);
        assert!(gate.pause_remaining().unwrap() <= Duration::from_millis(500));
        assert_eq!(gate.metrics().pauses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shorter_pause_does_not_shrink_deadline() {
        let gate = ThrottleGate::new(true);
        gate.record_rate_limited(1, |_| Duration::from_secs(5));
        gate.record_rate_limited(1, |_| Duration::from_millis(10));

        let remaining = gate.pause_remaining().unwrap();
        assert!(remaining > Duration::from_secs(4));
        assert_eq!(gate.metrics().pauses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_gate_never_pauses() {
        let gate = ThrottleGate::disabled();
        let pause = gate.record_rate_limited(1, |_| Duration::from_secs(5));
        assert_eq!(pause, Duration::ZERO);
        assert!(!gate.is_paused());
        assert_eq!(gate.metrics().rate_limited, 1);
    }
}
