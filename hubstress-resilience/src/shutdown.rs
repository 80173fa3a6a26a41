//! Shutdown coordination and run deadlines
//!
//! A run has one root cancellation token. Ctrl-C cancels it, and every phase
//! derives a [`Deadline`] from it that also fires when its own time budget
//! is spent.

use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Shutdown coordinator owning the root cancellation token
#[derive(Debug, Clone, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    interrupted: Arc<AtomicBool>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled when shutdown begins
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// A child token; cancelling it does not affect the root
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Check if shutdown is in progress
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Whether shutdown was triggered by an interrupt signal
    pub fn was_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Begin shutdown. Calling this twice is an error the caller may ignore.
    pub fn shutdown(&self) -> Result<(), ShutdownError> {
        if self.token.is_cancelled() {
            return Err(ShutdownError::AlreadyShuttingDown);
        }
        info!("Shutting down, in-flight requests will be abandoned");
        self.token.cancel();
        Ok(())
    }

    /// Spawn a task that triggers shutdown on Ctrl-C
    pub fn listen_for_ctrl_c(&self) -> tokio::task::JoinHandle<()> {
        let coordinator = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    match result {
                        Ok(()) => {
                            warn!("Interrupt received");
                            coordinator.interrupted.store(true, Ordering::SeqCst);
                            let _ = coordinator.shutdown();
                        }
                        Err(e) => warn!("Failed to listen for interrupt signal: {}", e),
                    }
                }
                _ = coordinator.token.cancelled() => {}
            }
        })
    }
}

/// A time budget tied to a cancellation token.
///
/// The deadline counts as reached when either the instant passes or the
/// token is cancelled.
#[derive(Debug, Clone)]
pub struct Deadline {
    token: CancellationToken,
    at: Option<Instant>,
}

impl Deadline {
    /// Deadline `timeout` from now, cancelled early with `parent`
    pub fn after(parent: &CancellationToken, timeout: Duration) -> Self {
        Self {
            token: parent.child_token(),
            at: Some(Instant::now() + timeout),
        }
    }

    /// Deadline that only ends through cancellation
    pub fn unbounded(token: CancellationToken) -> Self {
        Self { token, at: None }
    }

    /// A nested deadline ending at the earlier of `timeout` from now and this one
    pub fn within(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        Self {
            token: self.token.child_token(),
            at: Some(self.at.map_or(candidate, |at| at.min(candidate))),
        }
    }

    /// Resolves once the deadline is reached or the token is cancelled
    pub async fn cancelled(&self) {
        match self.at {
            Some(at) => {
                tokio::select! {
                    _ = self.token.cancelled() => {}
                    _ = tokio::time::sleep_until(at) => {}
                }
            }
            None => self.token.cancelled().await,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.token.is_cancelled() || self.at.is_some_and(|at| Instant::now() >= at)
    }

    /// Time left, `None` when unbounded
    pub fn remaining(&self) -> Option<Duration> {
        if self.token.is_cancelled() {
            return Some(Duration::ZERO);
        }
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Whether the token, not the clock, ended this deadline
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Shutdown errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShutdownError {
    #[error("Shutdown already in progress")]
    AlreadyShuttingDown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expires_after_timeout() {
        let root = CancellationToken::new();
        let deadline = Deadline::after(&root, Duration::from_secs(10));
        assert!(!deadline.is_expired());
        assert_eq!(deadline.remaining(), Some(Duration::from_secs(10)));

        deadline.cancelled().await;
        assert!(deadline.is_expired());
        assert!(!deadline.is_cancelled());
        assert_eq!(deadline.remaining(), Some(Duration::ZERO));
        assert!(!root.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_root_cancellation_ends_deadline() {
        let coordinator = ShutdownCoordinator::new();
        let deadline = Deadline::after(&coordinator.token(), Duration::from_secs(3600));

        coordinator.shutdown().unwrap();
        deadline.cancelled().await;
        assert!(deadline.is_expired());
        assert!(deadline.is_cancelled());
        assert!(coordinator.is_shutting_down());
        assert!(!coordinator.was_interrupted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_nested_deadline_never_outlives_parent() {
        let root = CancellationToken::new();
        let parent = Deadline::after(&root, Duration::from_secs(5));
        assert_eq!(
            parent.within(Duration::from_secs(60)).remaining(),
            Some(Duration::from_secs(5))
        );
        assert_eq!(
            parent.within(Duration::from_secs(2)).remaining(),
            Some(Duration::from_secs(2))
        );

        root.cancel();
        assert!(parent.within(Duration::from_secs(2)).is_expired());
    }

    #[test]
    fn test_double_shutdown_is_reported() {
        let coordinator = ShutdownCoordinator::new();
        assert!(coordinator.shutdown().is_ok());
        assert_eq!(
            coordinator.shutdown(),
            Err(ShutdownError::AlreadyShuttingDown)
        );
    }

    #[test]
    fn test_child_token_does_not_cancel_root() {
        let coordinator = ShutdownCoordinator::new();
        let child = coordinator.child_token();
        child.cancel();
        assert!(!coordinator.is_shutting_down());
    }

    #[test]
    fn test_unbounded_deadline_has_no_remaining() {
        let deadline = Deadline::unbounded(CancellationToken::new());
        assert_eq!(deadline.remaining(), None);
        assert!(!deadline.is_expired());
    }
}
