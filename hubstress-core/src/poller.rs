//! Polling sessions until they settle

use crate::identity::{Identity, IdentityState};
use crate::report::FailureKind;
use futures::stream::{self, StreamExt};
use hubstress_http::{ApiError, HubApi, SessionStatus};
use hubstress_resilience::Deadline;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Result of waiting for sessions to become ready
#[derive(Debug, Clone, Default)]
pub struct PollOutcome {
    pub ready: Vec<Identity>,
    pub failed: Vec<(Identity, FailureKind, String)>,
    pub rounds: u32,
    pub elapsed: Duration,
}

/// Result of waiting for sessions to stop
#[derive(Debug, Clone, Default)]
pub struct StopOutcome {
    pub stopped: Vec<Identity>,
    pub lingering: Vec<Identity>,
    pub rounds: u32,
    pub elapsed: Duration,
}

/// Polls `session_status` in rounds, at most `concurrency` queries at a time
pub struct ReadinessPoller {
    hub: Arc<dyn HubApi>,
    interval: Duration,
    concurrency: usize,
}

enum RoundEnd {
    Settled,
    Expired,
}

impl ReadinessPoller {
    pub fn new(hub: Arc<dyn HubApi>, interval: Duration, concurrency: usize) -> Self {
        Self {
            hub,
            interval,
            concurrency: concurrency.max(1),
        }
    }

    /// Wait until every identity's session is ready, has failed, or `timeout`
    /// (bounded by `deadline`) runs out.
    pub async fn await_ready(
        &self,
        identities: Vec<Identity>,
        timeout: Duration,
        deadline: &Deadline,
    ) -> PollOutcome {
        let started = Instant::now();
        let window = deadline.within(timeout);
        let mut outcome = PollOutcome::default();
        let mut pending = identities;
        if !pending.is_empty() {
            info!("Waiting for {} sessions to become ready", pending.len());
        }

        let end = loop {
            if pending.is_empty() {
                break RoundEnd::Settled;
            }
            outcome.rounds += 1;
            let Some(mut statuses) = self.poll_round(&pending, &window).await else {
                break RoundEnd::Expired;
            };

            let mut still_pending = Vec::with_capacity(pending.len());
            for mut identity in pending.drain(..) {
                match statuses.remove(&identity.name) {
                    Some(Ok(SessionStatus::Ready)) => {
                        identity.state = IdentityState::Ready;
                        outcome.ready.push(identity);
                    }
                    Some(Ok(status @ (SessionStatus::Failed | SessionStatus::Absent))) => {
                        warn!("Session of {} failed to spawn (status {})", identity, status);
                        identity.state = IdentityState::Failed;
                        outcome.failed.push((
                            identity,
                            FailureKind::Terminal,
                            format!("spawn failed: session {}", status),
                        ));
                    }
                    Some(Err(e)) => {
                        debug!("Status query for {} failed, still waiting: {}", identity, e);
                        still_pending.push(identity);
                    }
                    Some(Ok(SessionStatus::Pending)) | None => still_pending.push(identity),
                }
            }
            pending = still_pending;
            debug!(
                "Readiness round {}: {} ready, {} failed, {} pending",
                outcome.rounds,
                outcome.ready.len(),
                outcome.failed.len(),
                pending.len()
            );

            if pending.is_empty() {
                break RoundEnd::Settled;
            }
            if !self.pause(&window).await {
                break RoundEnd::Expired;
            }
        };

        if matches!(end, RoundEnd::Expired) && !pending.is_empty() {
            let reason = if window.is_cancelled() {
                "cancelled while waiting for session".to_string()
            } else {
                format!("session still pending after {:?}", timeout)
            };
            warn!("{} sessions did not become ready: {}", pending.len(), reason);
            for mut identity in pending {
                identity.state = IdentityState::Failed;
                outcome
                    .failed
                    .push((identity, FailureKind::Timeout, reason.clone()));
            }
        }

        outcome.elapsed = started.elapsed();
        outcome
    }

    /// Best-effort wait for stopping sessions to disappear. Sessions still
    /// present when `timeout` runs out are only logged.
    pub async fn await_stopped(
        &self,
        identities: Vec<Identity>,
        timeout: Duration,
        deadline: &Deadline,
    ) -> StopOutcome {
        let started = Instant::now();
        let window = deadline.within(timeout);
        let mut outcome = StopOutcome::default();
        let mut pending = identities;
        if !pending.is_empty() {
            info!("Waiting for {} sessions to stop", pending.len());
        }

        while !pending.is_empty() {
            outcome.rounds += 1;
            let Some(mut statuses) = self.poll_round(&pending, &window).await else {
                break;
            };

            let mut still_pending = Vec::with_capacity(pending.len());
            for mut identity in pending.drain(..) {
                match statuses.remove(&identity.name) {
                    Some(Ok(SessionStatus::Absent)) => {
                        identity.state = IdentityState::Requested;
                        outcome.stopped.push(identity);
                    }
                    _ => still_pending.push(identity),
                }
            }
            pending = still_pending;

            if pending.is_empty() || !self.pause(&window).await {
                break;
            }
        }

        if !pending.is_empty() {
            let names: Vec<&str> = pending.iter().map(|i| i.name.as_str()).collect();
            warn!(
                "{} sessions still stopping after {:?}: {}",
                pending.len(),
                timeout,
                names.join(", ")
            );
        }
        outcome.lingering = pending;
        outcome.elapsed = started.elapsed();
        outcome
    }

    /// One status query per identity; `None` when the window closes first
    async fn poll_round(
        &self,
        identities: &[Identity],
        window: &Deadline,
    ) -> Option<HashMap<String, Result<SessionStatus, ApiError>>> {
        if window.is_expired() {
            return None;
        }

        let round = stream::iter(identities.iter().map(|identity| identity.name.clone()))
            .map(|name| {
                let hub = self.hub.clone();
                async move {
                    let status = hub.session_status(&name).await;
                    (name, status)
                }
            })
            .buffer_unordered(self.concurrency)
            .collect::<HashMap<_, _>>();

        tokio::select! {
            biased;
            _ = window.cancelled() => None,
            statuses = round => Some(statuses),
        }
    }

    /// Sleep one interval; `false` when the window closes first
    async fn pause(&self, window: &Deadline) -> bool {
        tokio::select! {
            biased;
            _ = window.cancelled() => false,
            _ = tokio::time::sleep(self.interval) => true,
        }
    }
}
