//! Run reports and process exit status

use crate::identity::Identity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

/// No identity failed
pub const EXIT_OK: i32 = 0;
/// At least one identity failed, or the configuration was rejected
pub const EXIT_FAILURES: i32 = 1;
/// The run aborted before producing a report
pub const EXIT_FATAL: i32 = 128;

/// What a run was asked to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    /// Create sessions, wait for them, tear everything down
    ScaleUp,
    /// Create sessions and leave them running
    Keep,
    /// Remove every identity of the namespace
    Purge,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunMode::ScaleUp => "scale-up",
            RunMode::Keep => "keep",
            RunMode::Purge => "purge",
        })
    }
}

/// Terminal failure classes of an identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// Retryable errors outlasted the attempt ceiling
    #[serde(rename = "Failed-Retryable")]
    Retryable,
    /// The hub rejected the call or answered with something unusable
    #[serde(rename = "Failed-Terminal")]
    Terminal,
    /// The deadline passed first
    #[serde(rename = "Failed-Timeout")]
    Timeout,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureKind::Retryable => "Failed-Retryable",
            FailureKind::Terminal => "Failed-Terminal",
            FailureKind::Timeout => "Failed-Timeout",
        })
    }
}

/// Phases of a run, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Allocate,
    CreateUsers,
    CreateSessions,
    AwaitReady,
    DeleteSessions,
    AwaitStopped,
    DeleteUsers,
}

impl Phase {
    /// Phrase used in timing log lines
    pub fn description(&self) -> &'static str {
        match self {
            Phase::Allocate => "allocate identities",
            Phase::CreateUsers => "create users",
            Phase::CreateSessions => "create sessions",
            Phase::AwaitReady => "wait for sessions to be ready",
            Phase::DeleteSessions => "stop sessions",
            Phase::AwaitStopped => "wait for sessions to stop",
            Phase::DeleteUsers => "delete users",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Allocate => "allocate",
            Phase::CreateUsers => "create-users",
            Phase::CreateSessions => "create-sessions",
            Phase::AwaitReady => "await-ready",
            Phase::DeleteSessions => "delete-sessions",
            Phase::AwaitStopped => "await-stopped",
            Phase::DeleteUsers => "delete-users",
        })
    }
}

/// One failed identity in one phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub identity: String,
    pub index: u64,
    pub phase: Phase,
    pub kind: FailureKind,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTiming {
    pub phase: Phase,
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
    pub items: usize,
    pub failed: usize,
}

/// Outcome of a run. Counts are per identity: an identity that failed in any
/// phase counts once as failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub mode: RunMode,
    pub prefix: String,
    pub started_at: DateTime<Utc>,
    pub requested: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<Failure>,
    pub phases: Vec<PhaseTiming>,
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
    /// Shutdown was requested while the run was in progress
    pub interrupted: bool,
}

impl RunReport {
    pub fn new(mode: RunMode, prefix: impl Into<String>, requested: usize) -> Self {
        Self {
            mode,
            prefix: prefix.into(),
            started_at: Utc::now(),
            requested,
            succeeded: requested,
            failed: 0,
            failures: Vec::new(),
            phases: Vec::new(),
            elapsed: Duration::ZERO,
            interrupted: false,
        }
    }

    pub fn record_failure(
        &mut self,
        identity: &Identity,
        phase: Phase,
        kind: FailureKind,
        reason: impl Into<String>,
    ) {
        self.failures.push(Failure {
            identity: identity.name.clone(),
            index: identity.index,
            phase,
            kind,
            reason: reason.into(),
        });
        self.recount();
    }

    pub fn record_phase(&mut self, phase: Phase, elapsed: Duration, items: usize, failed: usize) {
        self.phases.push(PhaseTiming {
            phase,
            elapsed,
            items,
            failed,
        });
    }

    /// Seal the report with the total run time
    pub fn finish(mut self, elapsed: Duration, interrupted: bool) -> Self {
        self.elapsed = elapsed;
        self.interrupted = interrupted;
        self.recount();
        self
    }

    /// First recorded failure per failed identity
    pub fn first_failures(&self) -> Vec<&Failure> {
        let mut seen = HashSet::new();
        self.failures
            .iter()
            .filter(|f| seen.insert(f.identity.as_str()))
            .collect()
    }

    pub fn count_of(&self, kind: FailureKind) -> usize {
        self.first_failures()
            .into_iter()
            .filter(|f| f.kind == kind)
            .count()
    }

    pub fn phase_timing(&self, phase: Phase) -> Option<&PhaseTiming> {
        self.phases.iter().find(|t| t.phase == phase)
    }

    pub fn exit_code(&self) -> i32 {
        if self.failed == 0 {
            EXIT_OK
        } else {
            EXIT_FAILURES
        }
    }

    fn recount(&mut self) {
        let failed: HashSet<&str> = self.failures.iter().map(|f| f.identity.as_str()).collect();
        self.failed = failed.len();
        self.succeeded = self.requested.saturating_sub(self.failed);
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Run report ({}, prefix '{}')", self.mode, self.prefix)?;
        writeln!(f, "  started:   {}", self.started_at.format("%Y-%m-%d %H:%M:%S UTC"))?;
        writeln!(f, "  requested: {}", self.requested)?;
        writeln!(f, "  succeeded: {}", self.succeeded)?;
        writeln!(f, "  failed:    {}", self.failed)?;
        for kind in [FailureKind::Retryable, FailureKind::Terminal, FailureKind::Timeout] {
            let count = self.count_of(kind);
            if count > 0 {
                writeln!(f, "    {:<17} {}", kind.to_string(), count)?;
            }
        }
        writeln!(f, "  elapsed:   {:.3}s", self.elapsed.as_secs_f64())?;
        if self.interrupted {
            writeln!(f, "  interrupted before completion")?;
        }

        if !self.phases.is_empty() {
            writeln!(f, "  phases:")?;
            for timing in &self.phases {
                writeln!(
                    f,
                    "    {:<16} {:>9.3}s  {} items, {} failed",
                    timing.phase.to_string(),
                    timing.elapsed.as_secs_f64(),
                    timing.items,
                    timing.failed
                )?;
            }
        }

        if !self.failures.is_empty() {
            writeln!(f, "  failures:")?;
            for failure in &self.failures {
                writeln!(
                    f,
                    "    {}  {}  {}  {}",
                    failure.identity, failure.phase, failure.kind, failure.reason
                )?;
            }
        }
        Ok(())
    }
}

/// Snapshot of a namespace on the hub
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceSummary {
    pub prefix: String,
    pub identities: usize,
    pub ready: usize,
    pub pending: usize,
    pub failed: usize,
    /// Users without a session
    pub idle: usize,
    pub lowest_index: Option<u64>,
    pub highest_index: Option<u64>,
}

impl fmt::Display for NamespaceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Namespace '{}'", self.prefix)?;
        writeln!(f, "  identities: {}", self.identities)?;
        if let (Some(low), Some(high)) = (self.lowest_index, self.highest_index) {
            writeln!(f, "  indices:    {}..={}", low, high)?;
        }
        writeln!(f, "  ready:      {}", self.ready)?;
        writeln!(f, "  pending:    {}", self.pending)?;
        writeln!(f, "  failed:     {}", self.failed)?;
        writeln!(f, "  idle:       {}", self.idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(index: u64) -> Identity {
        Identity::new(format!("hub-stress-test-{}", index), index)
    }

    #[test]
    fn test_clean_report_exits_zero() {
        let report = RunReport::new(RunMode::ScaleUp, "hub-stress-test", 10)
            .finish(Duration::from_secs(3), false);
        assert_eq!(report.succeeded, 10);
        assert_eq!(report.failed, 0);
        assert_eq!(report.exit_code(), EXIT_OK);
    }

    #[test]
    fn test_failures_count_once_per_identity() {
        let mut report = RunReport::new(RunMode::ScaleUp, "hub-stress-test", 5);
        report.record_failure(&identity(2), Phase::CreateUsers, FailureKind::Terminal, "403");
        report.record_failure(&identity(2), Phase::DeleteUsers, FailureKind::Retryable, "503");
        report.record_failure(&identity(4), Phase::AwaitReady, FailureKind::Timeout, "pending");
        let report = report.finish(Duration::from_secs(1), false);

        assert_eq!(report.failed, 2);
        assert_eq!(report.succeeded, 3);
        assert_eq!(report.failures.len(), 3);
        assert_eq!(report.count_of(FailureKind::Terminal), 1);
        assert_eq!(report.count_of(FailureKind::Retryable), 0);
        assert_eq!(report.exit_code(), EXIT_FAILURES);
    }

    #[test]
    fn test_json_uses_failure_labels() {
        let mut report = RunReport::new(RunMode::Purge, "hub-stress-test", 1);
        report.record_failure(&identity(0), Phase::DeleteUsers, FailureKind::Timeout, "deadline");
        report.record_phase(Phase::DeleteUsers, Duration::from_millis(1500), 1, 1);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["mode"], "purge");
        assert_eq!(json["failures"][0]["kind"], "Failed-Timeout");
        assert_eq!(json["failures"][0]["phase"], "delete-users");
        assert_eq!(json["phases"][0]["elapsed"], "1s 500ms");
    }

    #[test]
    fn test_display_lists_failures() {
        let mut report = RunReport::new(RunMode::Keep, "hub-stress-test", 2);
        report.record_failure(&identity(1), Phase::CreateSessions, FailureKind::Terminal, "boom");
        let text = report.finish(Duration::from_secs(2), true).to_string();
        assert!(text.contains("failed:    1"));
        assert!(text.contains("hub-stress-test-1  create-sessions  Failed-Terminal  boom"));
        assert!(text.contains("interrupted"));
    }
}
