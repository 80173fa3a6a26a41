//! Run sequencing: scale-up, keep and purge

use crate::batch::{BatchItem, BatchOutcome, BatchScheduler, Operation};
use crate::error::{CoreError, Result};
use crate::identity::{Identity, IdentityAllocator, Namespace};
use crate::poller::ReadinessPoller;
use crate::report::{NamespaceSummary, Phase, RunMode, RunReport};
use hubstress_config::{HubStressConfig, PollConfig, RunConfig};
use hubstress_http::{HubApi, SessionStatus};
use hubstress_resilience::{Deadline, RetryPolicy};
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Drives the phases of a run against a hub and reports the outcome.
///
/// Phases run strictly one after another. Creation and readiness share one
/// run deadline; teardown gets a fresh deadline of the same length so a run
/// that timed out still cleans up after itself. Cancelling the shutdown
/// token ends both.
pub struct RunController {
    hub: Arc<dyn HubApi>,
    namespace: Namespace,
    policy: RetryPolicy,
    poll: PollConfig,
    purge_timeout: Duration,
    shutdown: CancellationToken,
}

impl RunController {
    pub fn new(hub: Arc<dyn HubApi>, namespace: Namespace, policy: RetryPolicy, poll: PollConfig) -> Self {
        Self {
            hub,
            namespace,
            policy,
            poll,
            purge_timeout: RunConfig::default().timeout,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn from_config(hub: Arc<dyn HubApi>, config: &HubStressConfig) -> Self {
        Self::new(
            hub,
            Namespace::new(config.run.prefix.clone()),
            RetryPolicy::from(config.retry.clone()),
            config.poll.clone(),
        )
        .with_purge_timeout(config.run.timeout)
    }

    /// Tie the run to a shutdown token, typically the coordinator's root token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn with_purge_timeout(mut self, timeout: Duration) -> Self {
        self.purge_timeout = timeout;
        self
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Create `count` identities with sessions, wait for them to become ready
    /// and, unless `keep` is set, tear everything down again.
    pub async fn run_scale_up(
        &self,
        count: usize,
        concurrency: usize,
        keep: bool,
        timeout: Duration,
    ) -> Result<RunReport> {
        if count == 0 {
            return Err(CoreError::InvalidRun("count must be at least 1".to_string()));
        }
        Self::check_concurrency(concurrency)?;

        let started = Instant::now();
        let mode = if keep { RunMode::Keep } else { RunMode::ScaleUp };
        let mut report = RunReport::new(mode, self.namespace.prefix(), count);
        info!(
            "Starting {} run of {} sessions under {} with concurrency {}",
            mode, count, self.namespace, concurrency
        );

        let allocation_started = Instant::now();
        let identities = self.allocator().next_indices(count as u64).await?;
        Self::record_phase(
            &mut report,
            Phase::Allocate,
            allocation_started.elapsed(),
            identities.len(),
            0,
        );

        let deadline = Deadline::after(&self.shutdown, timeout);
        let scheduler = self.scheduler(concurrency);

        let users = self
            .dispatch(
                &mut report,
                &scheduler,
                Phase::CreateUsers,
                &identities,
                Operation::CreateUser,
                &deadline,
            )
            .await;
        let created: Vec<Identity> = users.succeeded().map(|item| item.identity.clone()).collect();
        if created.len() < identities.len() {
            info!(
                "Skipping session creation for {} identities without a user",
                identities.len() - created.len()
            );
        }

        let sessions = self
            .dispatch(
                &mut report,
                &scheduler,
                Phase::CreateSessions,
                &created,
                Operation::CreateSession,
                &deadline,
            )
            .await;
        let spawning: Vec<Identity> = sessions
            .succeeded()
            .filter(|item| item.session() == Some(SessionStatus::Pending))
            .map(|item| item.identity.clone())
            .collect();

        let poller = ReadinessPoller::new(self.hub.clone(), self.poll.interval, concurrency);
        let polled = spawning.len();
        let readiness = poller
            .await_ready(spawning, self.poll.ready_timeout, &deadline)
            .await;
        for (identity, kind, reason) in &readiness.failed {
            report.record_failure(identity, Phase::AwaitReady, *kind, reason.clone());
        }
        Self::record_phase(
            &mut report,
            Phase::AwaitReady,
            readiness.elapsed,
            polled,
            readiness.failed.len(),
        );

        if keep {
            info!(
                "Keeping sessions running; remove them later with `hubstress purge --prefix {}`",
                self.namespace.prefix()
            );
        } else {
            self.teardown(&mut report, &identities, concurrency, timeout)
                .await;
        }

        let report = report.finish(started.elapsed(), self.shutdown.is_cancelled());
        info!(
            "{} run finished: {} succeeded, {} failed in {:.3}s",
            mode,
            report.succeeded,
            report.failed,
            report.elapsed.as_secs_f64()
        );
        Ok(report)
    }

    /// Remove every identity under the prefix, optionally only those with an
    /// index inside `range`.
    pub async fn run_purge(
        &self,
        concurrency: usize,
        range: Option<RangeInclusive<u64>>,
    ) -> Result<RunReport> {
        Self::check_concurrency(concurrency)?;
        if let Some(range) = &range {
            if range.is_empty() {
                return Err(CoreError::InvalidRun(format!(
                    "empty index range {}..={}",
                    range.start(),
                    range.end()
                )));
            }
        }

        let started = Instant::now();
        let allocation_started = Instant::now();
        let identities = self.allocator().purge_set(range).await?;
        let mut report = RunReport::new(RunMode::Purge, self.namespace.prefix(), identities.len());
        Self::record_phase(
            &mut report,
            Phase::Allocate,
            allocation_started.elapsed(),
            identities.len(),
            0,
        );

        if identities.is_empty() {
            info!("Nothing to purge under {}", self.namespace);
        } else {
            self.teardown(&mut report, &identities, concurrency, self.purge_timeout)
                .await;
        }

        let report = report.finish(started.elapsed(), self.shutdown.is_cancelled());
        info!(
            "purge finished: {} removed, {} failed in {:.3}s",
            report.succeeded,
            report.failed,
            report.elapsed.as_secs_f64()
        );
        Ok(report)
    }

    /// Count the identities under the prefix by session state
    pub async fn inspect(&self) -> Result<NamespaceSummary> {
        let existing = self.allocator().existing().await?;
        let mut summary = NamespaceSummary {
            prefix: self.namespace.prefix().to_string(),
            identities: existing.len(),
            lowest_index: existing.first().map(|(identity, _)| identity.index),
            highest_index: existing.last().map(|(identity, _)| identity.index),
            ..NamespaceSummary::default()
        };
        for (_, status) in &existing {
            match status {
                SessionStatus::Ready => summary.ready += 1,
                SessionStatus::Pending => summary.pending += 1,
                SessionStatus::Failed => summary.failed += 1,
                SessionStatus::Absent => summary.idle += 1,
            }
        }
        Ok(summary)
    }

    /// Stop sessions, wait for them to go away, then delete the users
    async fn teardown(
        &self,
        report: &mut RunReport,
        identities: &[Identity],
        concurrency: usize,
        timeout: Duration,
    ) {
        let deadline = Deadline::after(&self.shutdown, timeout);
        let scheduler = self.scheduler(concurrency);

        let sessions = self
            .dispatch(
                report,
                &scheduler,
                Phase::DeleteSessions,
                identities,
                Operation::DeleteSession,
                &deadline,
            )
            .await;
        let stopping: Vec<Identity> = sessions
            .succeeded()
            .filter(|item| item.session() == Some(SessionStatus::Pending))
            .map(|item| item.identity.clone())
            .collect();

        let poller = ReadinessPoller::new(self.hub.clone(), self.poll.interval, concurrency);
        let waited = stopping.len();
        let stopped = poller
            .await_stopped(stopping, self.poll.stop_timeout, &deadline)
            .await;
        Self::record_phase(
            report,
            Phase::AwaitStopped,
            stopped.elapsed,
            waited,
            stopped.lingering.len(),
        );

        let users = self
            .dispatch(
                report,
                &scheduler,
                Phase::DeleteUsers,
                identities,
                Operation::DeleteUser,
                &deadline,
            )
            .await;
        if users.failed_count() > 0 {
            warn!(
                "{} users could not be deleted; run `hubstress purge --prefix {}` to retry",
                users.failed_count(),
                self.namespace.prefix()
            );
        }
    }

    async fn dispatch(
        &self,
        report: &mut RunReport,
        scheduler: &BatchScheduler,
        phase: Phase,
        identities: &[Identity],
        op: Operation,
        deadline: &Deadline,
    ) -> BatchOutcome {
        let items = identities
            .iter()
            .cloned()
            .map(|identity| BatchItem::new(identity, op))
            .collect();
        let outcome = scheduler.run(items, deadline).await;

        for item in outcome.failed() {
            if let Some((kind, reason)) = item.failure() {
                report.record_failure(&item.identity, phase, kind, reason);
            }
        }
        Self::record_phase(
            report,
            phase,
            outcome.elapsed,
            outcome.items.len(),
            outcome.failed_count(),
        );
        outcome
    }

    fn record_phase(
        report: &mut RunReport,
        phase: Phase,
        elapsed: Duration,
        items: usize,
        failed: usize,
    ) {
        info!(
            "took {:.3} seconds to {} ({} items, {} failed)",
            elapsed.as_secs_f64(),
            phase.description(),
            items,
            failed
        );
        report.record_phase(phase, elapsed, items, failed);
    }

    fn allocator(&self) -> IdentityAllocator {
        IdentityAllocator::new(self.hub.clone(), self.namespace.clone())
    }

    fn scheduler(&self, concurrency: usize) -> BatchScheduler {
        BatchScheduler::new(self.hub.clone(), self.policy.clone(), concurrency)
    }

    fn check_concurrency(concurrency: usize) -> Result<()> {
        if concurrency == 0 {
            return Err(CoreError::InvalidRun(
                "concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
