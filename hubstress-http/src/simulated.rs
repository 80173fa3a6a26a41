//! In-memory hub used for dry runs and tests
//!
//! [`SimulatedHub`] implements [`HubApi`] against a map of users. Session
//! spawn and stop can be made to take a number of status polls, individual
//! calls can be scripted to fail, and the number of concurrently executing
//! calls is tracked so callers can check their concurrency bound.

use crate::client::HubApi;
use crate::errors::ApiError;
use crate::types::{HubOperation, HubServer, HubUser, SessionStatus};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionPhase {
    Starting { polls_left: Option<u32> },
    Running,
    Broken,
    Stopping { polls_left: u32 },
}

#[derive(Debug, Default)]
struct SimUser {
    session: Option<SessionPhase>,
}

#[derive(Debug, Default)]
struct Fault {
    /// Errors returned by the next calls, in order
    queued: VecDeque<ApiError>,
    /// Error returned once the queue is drained
    persistent: Option<ApiError>,
}

#[derive(Debug)]
struct HubState {
    users: BTreeMap<String, SimUser>,
    faults: HashMap<(String, HubOperation), Fault>,
    list_fault: Option<ApiError>,
    /// `None` keeps spawned sessions pending forever
    ready_after_polls: Option<u32>,
    stop_after_polls: u32,
    broken_spawns: Vec<String>,
    calls: Vec<(HubOperation, String)>,
    /// When each call was entered, before latency
    call_starts: Vec<(HubOperation, String, Instant)>,
}

/// In-memory [`HubApi`] implementation
#[derive(Debug)]
pub struct SimulatedHub {
    state: Mutex<HubState>,
    latency: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for SimulatedHub {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedHub {
    /// Empty hub; sessions become ready immediately and stop immediately
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HubState {
                users: BTreeMap::new(),
                faults: HashMap::new(),
                list_fault: None,
                ready_after_polls: Some(0),
                stop_after_polls: 0,
                broken_spawns: Vec::new(),
                calls: Vec::new(),
                call_starts: Vec::new(),
            }),
            latency: Duration::ZERO,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Every call takes `latency` before answering
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Spawned sessions stay pending for `polls` status queries. Zero makes
    /// `create_session` answer ready directly.
    pub fn ready_after_polls(self, polls: u32) -> Self {
        self.state.lock().ready_after_polls = Some(polls);
        self
    }

    /// Spawned sessions never become ready
    pub fn never_ready(self) -> Self {
        self.state.lock().ready_after_polls = None;
        self
    }

    /// Stopping sessions linger for `polls` status queries
    pub fn stop_after_polls(self, polls: u32) -> Self {
        self.state.lock().stop_after_polls = polls;
        self
    }

    /// Pre-existing users without sessions
    pub fn with_users<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        {
            let mut state = self.state.lock();
            for name in names {
                state.users.entry(name.into()).or_default();
            }
        }
        self
    }

    /// Pre-existing user with a running session
    pub fn with_running_session(self, name: impl Into<String>) -> Self {
        self.state
            .lock()
            .users
            .entry(name.into())
            .or_default()
            .session = Some(SessionPhase::Running);
        self
    }

    /// The session of `name` fails to start: it ends up neither ready nor pending
    pub fn fail_spawn(self, name: impl Into<String>) -> Self {
        self.state.lock().broken_spawns.push(name.into());
        self
    }

    /// Every `operation` on `name` fails with `error`
    pub fn fail_always(self, name: impl Into<String>, operation: HubOperation, error: ApiError) -> Self {
        self.state
            .lock()
            .faults
            .entry((name.into(), operation))
            .or_default()
            .persistent = Some(error);
        self
    }

    /// The next `times` calls of `operation` on `name` fail with `error`
    pub fn fail_times(
        self,
        name: impl Into<String>,
        operation: HubOperation,
        times: usize,
        error: ApiError,
    ) -> Self {
        {
            let mut state = self.state.lock();
            let fault = state.faults.entry((name.into(), operation)).or_default();
            fault.queued.extend(std::iter::repeat(error).take(times));
        }
        self
    }

    /// `list_users` fails with `error`
    pub fn fail_listing(self, error: ApiError) -> Self {
        self.state.lock().list_fault = Some(error);
        self
    }

    /// Highest number of calls observed executing at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Number of calls made for `operation`, failed ones included
    pub fn call_count(&self, operation: HubOperation) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|(op, _)| *op == operation)
            .count()
    }

    /// Number of calls made for `operation` on `name`
    pub fn calls_for(&self, name: &str, operation: HubOperation) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|(op, user)| *op == operation && user == name)
            .count()
    }

    /// When the first `operation` call on `name` was made
    pub fn first_call_at(&self, name: &str, operation: HubOperation) -> Option<Instant> {
        self.state
            .lock()
            .call_starts
            .iter()
            .find(|(op, user, _)| *op == operation && user == name)
            .map(|(_, _, at)| *at)
    }

    /// Names of all users currently on the hub, sorted
    pub fn user_names(&self) -> Vec<String> {
        self.state.lock().users.keys().cloned().collect()
    }

    pub fn has_user(&self, name: &str) -> bool {
        self.state.lock().users.contains_key(name)
    }

    pub fn has_session(&self, name: &str) -> bool {
        self.state
            .lock()
            .users
            .get(name)
            .is_some_and(|user| user.session.is_some())
    }

    async fn enter(&self, operation: HubOperation, name: &str) -> Result<InFlight<'_>, ApiError> {
        let guard = InFlight::new(self);
        self.state
            .lock()
            .call_starts
            .push((operation, name.to_string(), Instant::now()));
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut state = self.state.lock();
        state.calls.push((operation, name.to_string()));
        if let Some(fault) = state.faults.get_mut(&(name.to_string(), operation)) {
            if let Some(error) = fault.queued.pop_front() {
                return Err(error);
            }
            if let Some(error) = &fault.persistent {
                return Err(error.clone());
            }
        }
        Ok(guard)
    }

    fn phase_status(phase: Option<SessionPhase>) -> SessionStatus {
        match phase {
            None => SessionStatus::Absent,
            Some(SessionPhase::Running) => SessionStatus::Ready,
            Some(SessionPhase::Broken) => SessionStatus::Failed,
            Some(SessionPhase::Starting { .. }) | Some(SessionPhase::Stopping { .. }) => {
                SessionStatus::Pending
            }
        }
    }

    fn to_hub_user(name: &str, user: &SimUser) -> HubUser {
        let mut hub_user = HubUser::named(name);
        if let Some(phase) = user.session {
            let server = HubServer {
                ready: phase == SessionPhase::Running,
                pending: match phase {
                    SessionPhase::Starting { .. } => Some("spawn".to_string()),
                    SessionPhase::Stopping { .. } => Some("stop".to_string()),
                    _ => None,
                },
                ..HubServer::default()
            };
            hub_user.servers.insert(String::new(), server);
        }
        hub_user
    }

    fn not_found(name: &str) -> ApiError {
        ApiError::Permanent {
            status: 404,
            message: format!("No such user: {}", name),
        }
    }
}

/// Tracks one executing call; released on drop so cancelled calls are counted out
struct InFlight<'a> {
    hub: &'a SimulatedHub,
}

impl<'a> InFlight<'a> {
    fn new(hub: &'a SimulatedHub) -> Self {
        let current = hub.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        hub.max_in_flight.fetch_max(current, Ordering::SeqCst);
        Self { hub }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.hub.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl HubApi for SimulatedHub {
    async fn list_users(&self) -> Result<Vec<HubUser>, ApiError> {
        let _guard = self.enter(HubOperation::ListUsers, "").await?;
        let state = self.state.lock();
        if let Some(error) = &state.list_fault {
            return Err(error.clone());
        }
        Ok(state
            .users
            .iter()
            .map(|(name, user)| Self::to_hub_user(name, user))
            .collect())
    }

    async fn create_user(&self, name: &str) -> Result<(), ApiError> {
        let _guard = self.enter(HubOperation::CreateUser, name).await?;
        let mut state = self.state.lock();
        if state.users.contains_key(name) {
            return Err(ApiError::Permanent {
                status: 409,
                message: format!("User {} already exists", name),
            });
        }
        state.users.insert(name.to_string(), SimUser::default());
        Ok(())
    }

    async fn create_session(&self, name: &str) -> Result<SessionStatus, ApiError> {
        let _guard = self.enter(HubOperation::CreateSession, name).await?;
        let mut state = self.state.lock();
        let ready_after = state.ready_after_polls;
        let broken = state.broken_spawns.iter().any(|n| n == name);
        let user = state.users.get_mut(name).ok_or_else(|| Self::not_found(name))?;

        if user.session.is_some() {
            return Err(ApiError::Permanent {
                status: 400,
                message: format!("{} is already running", name),
            });
        }

        let phase = if broken {
            SessionPhase::Starting { polls_left: Some(0) }
        } else {
            match ready_after {
                Some(0) => SessionPhase::Running,
                polls_left => SessionPhase::Starting { polls_left },
            }
        };
        user.session = Some(phase);
        Ok(match phase {
            SessionPhase::Running => SessionStatus::Ready,
            _ => SessionStatus::Pending,
        })
    }

    async fn session_status(&self, name: &str) -> Result<SessionStatus, ApiError> {
        let _guard = self.enter(HubOperation::SessionStatus, name).await?;
        let mut state = self.state.lock();
        let broken = state.broken_spawns.iter().any(|n| n == name);
        let Some(user) = state.users.get_mut(name) else {
            return Ok(SessionStatus::Absent);
        };

        let observed = Self::phase_status(user.session);
        user.session = match user.session {
            Some(SessionPhase::Starting { polls_left: Some(0) }) if broken => {
                Some(SessionPhase::Broken)
            }
            Some(SessionPhase::Starting { polls_left: Some(n) }) if n <= 1 => {
                Some(SessionPhase::Running)
            }
            Some(SessionPhase::Starting { polls_left: Some(n) }) => Some(SessionPhase::Starting {
                polls_left: Some(n - 1),
            }),
            Some(SessionPhase::Stopping { polls_left }) if polls_left <= 1 => None,
            Some(SessionPhase::Stopping { polls_left }) => Some(SessionPhase::Stopping {
                polls_left: polls_left - 1,
            }),
            other => other,
        };
        Ok(observed)
    }

    async fn delete_session(&self, name: &str) -> Result<SessionStatus, ApiError> {
        let _guard = self.enter(HubOperation::DeleteSession, name).await?;
        let mut state = self.state.lock();
        let stop_after = state.stop_after_polls;
        let Some(user) = state.users.get_mut(name) else {
            return Ok(SessionStatus::Absent);
        };

        match user.session {
            None => Ok(SessionStatus::Absent),
            Some(SessionPhase::Stopping { .. }) => Ok(SessionStatus::Pending),
            Some(_) if stop_after > 0 => {
                user.session = Some(SessionPhase::Stopping {
                    polls_left: stop_after,
                });
                Ok(SessionStatus::Pending)
            }
            Some(_) => {
                user.session = None;
                Ok(SessionStatus::Absent)
            }
        }
    }

    async fn delete_user(&self, name: &str) -> Result<(), ApiError> {
        let _guard = self.enter(HubOperation::DeleteUser, name).await?;
        self.state.lock().users.remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_session_becomes_ready_after_polls() {
        let hub = SimulatedHub::new().ready_after_polls(2);
        hub.create_user("u-0").await.unwrap();
        assert_eq!(hub.create_session("u-0").await.unwrap(), SessionStatus::Pending);

        assert_eq!(hub.session_status("u-0").await.unwrap(), SessionStatus::Pending);
        assert_eq!(hub.session_status("u-0").await.unwrap(), SessionStatus::Pending);
        assert_eq!(hub.session_status("u-0").await.unwrap(), SessionStatus::Ready);
    }

    #[tokio::test]
    async fn test_immediate_ready_and_stop() {
        let hub = SimulatedHub::new();
        hub.create_user("u-0").await.unwrap();
        assert_eq!(hub.create_session("u-0").await.unwrap(), SessionStatus::Ready);
        assert_eq!(hub.delete_session("u-0").await.unwrap(), SessionStatus::Absent);
        assert!(!hub.has_session("u-0"));
        hub.delete_user("u-0").await.unwrap();
        assert!(!hub.has_user("u-0"));
    }

    #[tokio::test]
    async fn test_slow_stop_reports_pending() {
        let hub = SimulatedHub::new().stop_after_polls(1).with_running_session("u-0");
        assert_eq!(hub.delete_session("u-0").await.unwrap(), SessionStatus::Pending);
        assert_eq!(hub.session_status("u-0").await.unwrap(), SessionStatus::Pending);
        assert_eq!(hub.session_status("u-0").await.unwrap(), SessionStatus::Absent);
    }

    #[tokio::test]
    async fn test_broken_spawn_reports_failed() {
        let hub = SimulatedHub::new().ready_after_polls(3).fail_spawn("u-0");
        hub.create_user("u-0").await.unwrap();
        hub.create_session("u-0").await.unwrap();
        assert_eq!(hub.session_status("u-0").await.unwrap(), SessionStatus::Pending);
        assert_eq!(hub.session_status("u-0").await.unwrap(), SessionStatus::Failed);
    }

    #[tokio::test]
    async fn test_scripted_faults_then_success() {
        let hub = SimulatedHub::new().fail_times(
            "u-0",
            HubOperation::CreateUser,
            2,
            ApiError::RateLimited { retry_after: None },
        );
        assert!(hub.create_user("u-0").await.is_err());
        assert!(hub.create_user("u-0").await.is_err());
        assert!(hub.create_user("u-0").await.is_ok());
        assert_eq!(hub.calls_for("u-0", HubOperation::CreateUser), 3);
    }

    #[tokio::test]
    async fn test_duplicate_user_conflicts() {
        let hub = SimulatedHub::new().with_users(["u-0"]);
        assert!(matches!(
            hub.create_user("u-0").await,
            Err(ApiError::Permanent { status: 409, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_is_tracked() {
        let hub = Arc::new(SimulatedHub::new().with_latency(Duration::from_millis(50)));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let hub = hub.clone();
                tokio::spawn(async move { hub.create_user(&format!("u-{}", i)).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(hub.max_in_flight(), 4);
        assert_eq!(hub.in_flight(), 0);
        assert_eq!(hub.user_names().len(), 4);
    }
}
