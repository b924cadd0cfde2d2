//! Interface to the remote network exchange store.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use cxsync_core::RemoteUuid;

#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    #[error("network {0} does not exist on the server")]
    NotFound(RemoteUuid),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("server rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },
}

/// Server, account and password a request runs against. An empty
/// `server_url` stands for the configured default server.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTarget {
    pub server_url: String,
    pub username: String,
    pub password: String,
    /// Sent as the `User-Agent` of every request made for this target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl RemoteTarget {
    pub fn new(
        server_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            server_url: server_url.into(),
            username: username.into(),
            password: password.into(),
            user_agent: None,
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    /// True if both targets name the same server, ignoring a trailing slash.
    pub fn same_server(&self, server_url: &str) -> bool {
        self.server_url.trim_end_matches('/') == server_url.trim_end_matches('/')
    }
}

impl fmt::Debug for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTarget")
            .field("server_url", &self.server_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

/// What the server reports about one stored network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSummary {
    pub uuid: RemoteUuid,
    pub name: String,
    pub owner: String,
    /// Epoch milliseconds.
    pub modified_at: i64,
    pub is_read_only: bool,
    /// Write grant for the requesting account when it is not the owner.
    pub can_write: bool,
}

/// A session against one server and account.
pub trait RemoteStore: Send + Sync {
    fn create_network(&self, payload: &[u8]) -> Result<RemoteUuid, RemoteError>;

    fn update_network(&self, uuid: RemoteUuid, payload: &[u8]) -> Result<(), RemoteError>;

    fn get_network_summary(&self, uuid: RemoteUuid) -> Result<NetworkSummary, RemoteError>;

    fn fetch_network(&self, uuid: RemoteUuid) -> Result<Vec<u8>, RemoteError>;
}

pub trait RemoteConnector: Send + Sync {
    fn connect(&self, target: &RemoteTarget) -> Result<Arc<dyn RemoteStore>, RemoteError>;
}

/// Source of the currently selected server and account.
pub trait TargetProvider: Send + Sync {
    fn current_target(&self) -> Option<RemoteTarget>;
}

/// A [`TargetProvider`] holding one selectable target.
#[derive(Debug, Default)]
pub struct StaticTarget {
    target: RwLock<Option<RemoteTarget>>,
}

impl StaticTarget {
    pub fn new(target: Option<RemoteTarget>) -> Self {
        Self {
            target: RwLock::new(target),
        }
    }

    pub fn select(&self, target: RemoteTarget) {
        *self.target.write() = Some(target);
    }

    pub fn clear(&self) {
        *self.target.write() = None;
    }
}

impl TargetProvider for StaticTarget {
    fn current_target(&self) -> Option<RemoteTarget> {
        self.target.read().clone()
    }
}
