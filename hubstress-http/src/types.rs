//! Hub API models

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A user as returned by `GET /users` and `GET /users/{name}`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HubUser {
    pub name: String,

    #[serde(default)]
    pub admin: bool,

    /// Named servers keyed by server name; the default server uses `""`
    #[serde(default)]
    pub servers: HashMap<String, HubServer>,

    /// URL of the default server when running (older hubs)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,

    /// Pending action on the default server: "spawn", "stop" or null
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<String>,
}

/// A server entry of a [`HubUser`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HubServer {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub ready: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<String>,
}

impl HubUser {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// The user's default (unnamed) server
    pub fn default_server(&self) -> Option<&HubServer> {
        self.servers.get("")
    }

    /// Status of the default session derived from this model
    pub fn session_status(&self) -> SessionStatus {
        if let Some(server) = self.default_server() {
            return if server.ready {
                SessionStatus::Ready
            } else if server.pending.is_some() {
                SessionStatus::Pending
            } else {
                SessionStatus::Failed
            };
        }

        // Without the servers map fall back to the flat user fields
        if self.pending.is_some() {
            SessionStatus::Pending
        } else if self.server.is_some() {
            SessionStatus::Ready
        } else {
            SessionStatus::Absent
        }
    }
}

/// Observed state of a user's default session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Spawn or stop still in progress
    Pending,
    /// Running and reachable
    Ready,
    /// Present but neither ready nor pending
    Failed,
    /// No session, or no such user
    Absent,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Pending => "pending",
            SessionStatus::Ready => "ready",
            SessionStatus::Failed => "failed",
            SessionStatus::Absent => "absent",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The hub control-plane calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HubOperation {
    ListUsers,
    CreateUser,
    CreateSession,
    SessionStatus,
    DeleteSession,
    DeleteUser,
}

impl HubOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            HubOperation::ListUsers => "list_users",
            HubOperation::CreateUser => "create_user",
            HubOperation::CreateSession => "create_session",
            HubOperation::SessionStatus => "session_status",
            HubOperation::DeleteSession => "delete_session",
            HubOperation::DeleteUser => "delete_user",
        }
    }
}

impl fmt::Display for HubOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Paginated `GET /users` response (JupyterHub 2.0+)
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct UserPage {
    pub items: Vec<HubUser>,
    #[serde(rename = "_pagination")]
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Pagination {
    #[serde(default)]
    pub next: Option<NextPage>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct NextPage {
    pub offset: u64,
}

/// `GET /users` answers with a bare list on hubs without pagination support
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum UserListing {
    Page(UserPage),
    List(Vec<HubUser>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user_with_server(server: serde_json::Value) -> HubUser {
        serde_json::from_value(json!({
            "name": "hub-stress-test-0",
            "servers": { "": server }
        }))
        .unwrap()
    }

    #[test]
    fn test_status_from_servers_map() {
        let ready = user_with_server(json!({"name": "", "ready": true, "pending": null}));
        assert_eq!(ready.session_status(), SessionStatus::Ready);

        let pending = user_with_server(json!({"name": "", "ready": false, "pending": "spawn"}));
        assert_eq!(pending.session_status(), SessionStatus::Pending);

        let failed = user_with_server(json!({"name": "", "ready": false, "pending": null}));
        assert_eq!(failed.session_status(), SessionStatus::Failed);

        let absent: HubUser =
            serde_json::from_value(json!({"name": "hub-stress-test-0", "servers": {}})).unwrap();
        assert_eq!(absent.session_status(), SessionStatus::Absent);
    }

    #[test]
    fn test_status_from_flat_fields() {
        let user: HubUser = serde_json::from_value(json!({
            "name": "hub-stress-test-0",
            "server": "/user/hub-stress-test-0/",
            "pending": null
        }))
        .unwrap();
        assert_eq!(user.session_status(), SessionStatus::Ready);

        let user: HubUser = serde_json::from_value(json!({
            "name": "hub-stress-test-0",
            "server": null,
            "pending": "spawn"
        }))
        .unwrap();
        assert_eq!(user.session_status(), SessionStatus::Pending);
    }

    #[test]
    fn test_user_listing_accepts_both_shapes() {
        let list: UserListing = serde_json::from_value(json!([{"name": "a"}])).unwrap();
        assert!(matches!(list, UserListing::List(users) if users.len() == 1));

        let page: UserListing = serde_json::from_value(json!({
            "items": [{"name": "a"}, {"name": "b"}],
            "_pagination": {"offset": 0, "limit": 2, "total": 3, "next": {"offset": 2, "limit": 2, "url": "/hub/api/users?offset=2&limit=2"}}
        }))
        .unwrap();
        match page {
            UserListing::Page(page) => {
                assert_eq!(page.items.len(), 2);
                assert_eq!(page.pagination.next.map(|n| n.offset), Some(2));
            }
            UserListing::List(_) => panic!("expected a paginated response"),
        }
    }
}
