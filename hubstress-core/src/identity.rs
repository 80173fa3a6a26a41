//! Synthetic identity naming and discovery

use crate::error::{CoreError, Result};
use hubstress_http::{HubApi, HubUser, SessionStatus};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use std::sync::Arc;
use tracing::{debug, info};

/// Naming convention `<prefix>-<index>` for the identities of one namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    prefix: String,
}

impl Namespace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn name_for(&self, index: u64) -> String {
        format!("{}-{}", self.prefix, index)
    }

    /// Index of `name` when it is exactly `<prefix>-<digits>`
    pub fn parse(&self, name: &str) -> Option<u64> {
        let digits = name.strip_prefix(self.prefix.as_str())?.strip_prefix('-')?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        digits.parse().ok()
    }

    pub fn identity(&self, index: u64) -> Identity {
        Identity::new(self.name_for(index), index)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-*", self.prefix)
    }
}

/// Lifecycle of an identity as far as this run knows it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityState {
    /// No user on the hub
    Absent,
    /// User exists, no session requested yet
    Requested,
    /// Session spawn or stop in progress
    Pending,
    Ready,
    Failed,
}

impl From<SessionStatus> for IdentityState {
    fn from(status: SessionStatus) -> Self {
        match status {
            SessionStatus::Pending => IdentityState::Pending,
            SessionStatus::Ready => IdentityState::Ready,
            SessionStatus::Failed => IdentityState::Failed,
            SessionStatus::Absent => IdentityState::Requested,
        }
    }
}

/// A synthetic hub user owned by a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub index: u64,
    pub state: IdentityState,
}

impl Identity {
    pub fn new(name: impl Into<String>, index: u64) -> Self {
        Self {
            name: name.into(),
            index,
            state: IdentityState::Absent,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Derives the identities of a namespace from a live query of the hub
pub struct IdentityAllocator {
    hub: Arc<dyn HubApi>,
    namespace: Namespace,
}

impl IdentityAllocator {
    pub fn new(hub: Arc<dyn HubApi>, namespace: Namespace) -> Self {
        Self { hub, namespace }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Existing identities under the prefix with their session status, sorted by index
    pub async fn existing(&self) -> Result<Vec<(Identity, SessionStatus)>> {
        let users = self.hub.list_users().await.map_err(CoreError::Allocation)?;
        let mut owned: Vec<(Identity, SessionStatus)> = users
            .iter()
            .filter_map(|user| self.own(user))
            .collect();
        owned.sort_by_key(|(identity, _)| identity.index);
        debug!(
            "{} of {} hub users belong to {}",
            owned.len(),
            users.len(),
            self.namespace
        );
        Ok(owned)
    }

    /// `count` fresh identities continuing after the highest existing index
    pub async fn next_indices(&self, count: u64) -> Result<Vec<Identity>> {
        let existing = self.existing().await?;
        let start = match existing.last() {
            Some((highest, _)) => highest
                .index
                .checked_add(1)
                .ok_or_else(|| CoreError::IndexExhausted(self.namespace.prefix().to_string()))?,
            None => 0,
        };
        if count > 0 && start.checked_add(count - 1).is_none() {
            return Err(CoreError::IndexExhausted(
                self.namespace.prefix().to_string(),
            ));
        }

        let identities: Vec<Identity> = (0..count)
            .map(|offset| self.namespace.identity(start + offset))
            .collect();
        if let (Some(first), Some(last)) = (identities.first(), identities.last()) {
            info!(
                "Allocated {} identities {} through {} ({} already exist)",
                identities.len(),
                first,
                last,
                existing.len()
            );
        }
        Ok(identities)
    }

    /// Every existing identity under the prefix, optionally limited to an
    /// inclusive index range, sorted by index
    pub async fn purge_set(&self, range: Option<RangeInclusive<u64>>) -> Result<Vec<Identity>> {
        let identities: Vec<Identity> = self
            .existing()
            .await?
            .into_iter()
            .map(|(identity, _)| identity)
            .filter(|identity| range.as_ref().map_or(true, |r| r.contains(&identity.index)))
            .collect();
        info!(
            "Found {} identities to purge under {}",
            identities.len(),
            self.namespace
        );
        Ok(identities)
    }

    fn own(&self, user: &HubUser) -> Option<(Identity, SessionStatus)> {
        let index = self.namespace.parse(&user.name)?;
        let status = user.session_status();
        let mut identity = Identity::new(user.name.clone(), index);
        identity.state = status.into();
        Some((identity, status))
    }
}
