//! Concurrency-bounded dispatch of hub calls with per-item retries

use crate::identity::{Identity, IdentityState};
use crate::report::FailureKind;
use hubstress_http::{ApiError, HubApi, HubOperation, SessionStatus};
use hubstress_resilience::{Deadline, RetryDecision, RetryPolicy, Retryable, ThrottleGate, ThrottleMetrics};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// A hub call applied to one identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    CreateUser,
    CreateSession,
    DeleteSession,
    DeleteUser,
}

impl Operation {
    pub fn hub_operation(&self) -> HubOperation {
        match self {
            Operation::CreateUser => HubOperation::CreateUser,
            Operation::CreateSession => HubOperation::CreateSession,
            Operation::DeleteSession => HubOperation::DeleteSession,
            Operation::DeleteUser => HubOperation::DeleteUser,
        }
    }

    /// One attempt; session-level calls report the resulting session status
    async fn invoke(&self, hub: &dyn HubApi, name: &str) -> Result<Option<SessionStatus>, ApiError> {
        match self {
            Operation::CreateUser => hub.create_user(name).await.map(|_| None),
            Operation::CreateSession => hub.create_session(name).await.map(Some),
            Operation::DeleteSession => hub.delete_session(name).await.map(Some),
            Operation::DeleteUser => hub.delete_user(name).await.map(|_| None),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.hub_operation(), f)
    }
}

/// Where an item stands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ItemOutcome {
    Pending,
    Success {
        session: Option<SessionStatus>,
    },
    Retrying {
        #[serde(with = "humantime_serde")]
        delay: Duration,
    },
    Failed {
        kind: FailureKind,
        reason: String,
    },
}

/// One identity's call with its retry bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchItem {
    pub identity: Identity,
    pub op: Operation,
    pub outcome: ItemOutcome,
    pub attempts: u32,
    /// Backoff delays waited before each retry
    pub backoff_history: Vec<Duration>,
}

impl BatchItem {
    pub fn new(identity: Identity, op: Operation) -> Self {
        Self {
            identity,
            op,
            outcome: ItemOutcome::Pending,
            attempts: 0,
            backoff_history: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ItemOutcome::Success { .. })
    }

    /// Failure class and reason, when failed
    pub fn failure(&self) -> Option<(FailureKind, &str)> {
        match &self.outcome {
            ItemOutcome::Failed { kind, reason } => Some((*kind, reason.as_str())),
            _ => None,
        }
    }

    /// Session status reported by a successful session call
    pub fn session(&self) -> Option<SessionStatus> {
        match self.outcome {
            ItemOutcome::Success { session } => session,
            _ => None,
        }
    }

    fn succeed(&mut self, session: Option<SessionStatus>) {
        self.identity.state = match (self.op, session) {
            (Operation::CreateUser, _) => IdentityState::Requested,
            (Operation::DeleteUser, _) => IdentityState::Absent,
            (_, Some(status)) => status.into(),
            (_, None) => self.identity.state,
        };
        self.outcome = ItemOutcome::Success { session };
    }

    fn fail(&mut self, kind: FailureKind, reason: impl Into<String>) {
        if matches!(self.op, Operation::CreateUser | Operation::CreateSession) {
            self.identity.state = IdentityState::Failed;
        }
        self.outcome = ItemOutcome::Failed {
            kind,
            reason: reason.into(),
        };
    }
}

/// Result of one scheduler run; items keep their submission order
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub items: Vec<BatchItem>,
    pub elapsed: Duration,
    pub throttle: ThrottleMetrics,
}

impl BatchOutcome {
    pub fn succeeded(&self) -> impl Iterator<Item = &BatchItem> {
        self.items.iter().filter(|item| item.is_success())
    }

    pub fn failed(&self) -> impl Iterator<Item = &BatchItem> {
        self.items.iter().filter(|item| !item.is_success())
    }

    pub fn succeeded_count(&self) -> usize {
        self.succeeded().count()
    }

    pub fn failed_count(&self) -> usize {
        self.items.len() - self.succeeded_count()
    }
}

/// Dispatches one [`Operation`] per item with at most `concurrency` calls in
/// flight. Items are admitted in submission order; a retry competes for a
/// slot exactly like a fresh dispatch and holds none while backing off.
pub struct BatchScheduler {
    hub: Arc<dyn HubApi>,
    policy: RetryPolicy,
    concurrency: usize,
    throttle: ThrottleGate,
}

struct ItemContext {
    hub: Arc<dyn HubApi>,
    policy: RetryPolicy,
    throttle: ThrottleGate,
    semaphore: Arc<Semaphore>,
    deadline: Deadline,
}

impl BatchScheduler {
    pub fn new(hub: Arc<dyn HubApi>, policy: RetryPolicy, concurrency: usize) -> Self {
        let throttle = ThrottleGate::new(policy.coordinate_throttling);
        Self {
            hub,
            policy,
            concurrency: concurrency.max(1),
            throttle,
        }
    }

    /// Run every item to a terminal outcome. Once `deadline` is reached no
    /// new attempt starts; calls already in flight complete.
    pub async fn run(&self, items: Vec<BatchItem>, deadline: &Deadline) -> BatchOutcome {
        let started = Instant::now();
        let total = items.len();
        let op = items.first().map(|item| item.op);
        if let Some(op) = op {
            info!(
                "Dispatching {} {} calls with concurrency {}",
                total, op, self.concurrency
            );
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut handles = Vec::with_capacity(total);
        let mut undispatched = Vec::new();
        let mut queue = items.into_iter();

        while let Some(item) = queue.next() {
            match self.admit(&semaphore, deadline).await {
                Some(permit) => {
                    let context = ItemContext {
                        hub: self.hub.clone(),
                        policy: self.policy.clone(),
                        throttle: self.throttle.clone(),
                        semaphore: semaphore.clone(),
                        deadline: deadline.clone(),
                    };
                    let fallback = (item.identity.clone(), item.op);
                    handles.push((fallback, tokio::spawn(drive(context, item, permit))));
                }
                None => {
                    undispatched.push(item);
                    break;
                }
            }
        }
        undispatched.extend(queue);

        let mut finished = Vec::with_capacity(total);
        for ((identity, op), handle) in handles {
            match handle.await {
                Ok(item) => finished.push(item),
                Err(e) => {
                    error!("Batch task for {} failed: {}", identity, e);
                    let mut item = BatchItem::new(identity, op);
                    item.fail(FailureKind::Terminal, format!("task failed: {}", e));
                    finished.push(item);
                }
            }
        }

        if !undispatched.is_empty() {
            warn!(
                "Deadline reached with {} of {} items not dispatched",
                undispatched.len(),
                total
            );
        }
        for mut item in undispatched {
            item.fail(FailureKind::Timeout, "deadline reached before dispatch");
            finished.push(item);
        }

        let outcome = BatchOutcome {
            items: finished,
            elapsed: started.elapsed(),
            throttle: self.throttle.metrics(),
        };
        if let Some(op) = op {
            info!(
                "{} batch finished: {} succeeded, {} failed in {:.3}s",
                op,
                outcome.succeeded_count(),
                outcome.failed_count(),
                outcome.elapsed.as_secs_f64()
            );
        }
        outcome
    }

    /// Wait out any throttle pause, then take a slot. `None` once the deadline is reached.
    async fn admit(&self, semaphore: &Arc<Semaphore>, deadline: &Deadline) -> Option<OwnedSemaphorePermit> {
        loop {
            while let Some(pause) = self.throttle.pause_remaining() {
                debug!("Throttle gate closed, holding new dispatches for {:?}", pause);
                tokio::select! {
                    biased;
                    _ = deadline.cancelled() => return None,
                    _ = tokio::time::sleep(pause) => {}
                }
            }

            let permit = tokio::select! {
                biased;
                _ = deadline.cancelled() => None,
                permit = semaphore.clone().acquire_owned() => permit.ok(),
            }?;

            // The gate may have closed while we queued for the slot
            if !self.throttle.is_paused() {
                return Some(permit);
            }
        }
    }
}

async fn drive(context: ItemContext, mut item: BatchItem, first: OwnedSemaphorePermit) -> BatchItem {
    let mut permit = Some(first);
    let mut previous_delay = Duration::ZERO;

    loop {
        let held = match permit.take() {
            Some(held) => held,
            None => {
                let acquired = tokio::select! {
                    biased;
                    _ = context.deadline.cancelled() => None,
                    acquired = context.semaphore.clone().acquire_owned() => acquired.ok(),
                };
                match acquired {
                    Some(held) => held,
                    None => {
                        item.fail(FailureKind::Timeout, "deadline reached before retry");
                        return item;
                    }
                }
            }
        };

        item.attempts += 1;
        let result = item.op.invoke(context.hub.as_ref(), &item.identity.name).await;

        let error = match result {
            Ok(session) => {
                context.throttle.record_success();
                item.succeed(session);
                return item;
            }
            Err(error) => error,
        };

        // Close the gate before the slot frees up for a queued dispatch
        if error.is_rate_limited() {
            let policy = &context.policy;
            context.throttle.record_rate_limited(item.attempts, |attempt| {
                policy.base_delay_for_attempt(attempt)
            });
        }
        drop(held);

        match context.policy.decide(item.attempts, &error, previous_delay) {
            RetryDecision::Retry { delay } => {
                debug!(
                    "{} {} attempt {} failed ({}), retrying in {:?}",
                    item.op, item.identity, item.attempts, error, delay
                );
                item.outcome = ItemOutcome::Retrying { delay };
                item.backoff_history.push(delay);
                previous_delay = delay;

                tokio::select! {
                    biased;
                    _ = context.deadline.cancelled() => {
                        item.fail(
                            FailureKind::Timeout,
                            format!("deadline reached while backing off after: {}", error),
                        );
                        return item;
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            RetryDecision::Exhausted => {
                warn!(
                    "{} {} gave up after {} attempts: {}",
                    item.op, item.identity, item.attempts, error
                );
                item.fail(
                    FailureKind::Retryable,
                    format!("gave up after {} attempts: {}", item.attempts, error),
                );
                return item;
            }
            RetryDecision::Fail => {
                warn!("{} {} failed: {}", item.op, item.identity, error);
                item.fail(FailureKind::Terminal, error.to_string());
                return item;
            }
        }
    }
}
