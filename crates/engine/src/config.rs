use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::remote::RemoteTarget;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 3_000;
pub const DEFAULT_SERVER_URL: &str = "https://www.ndexbio.org/v2";

/// Fixed-delay retry bound for remote updates. No backoff, no jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay_ms: delay.as_millis() as u64,
        }
    }

    /// Total attempts, initial one included. Never less than one.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server used by targets that name none.
    pub default_url: String,
    pub user_agent: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            default_url: DEFAULT_SERVER_URL.to_string(),
            user_agent: format!("cxsync/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ServerConfig {
    /// Fills in the default server and the user agent where `target` leaves
    /// them unset.
    pub fn resolve(&self, target: &RemoteTarget) -> RemoteTarget {
        let mut resolved = target.clone();
        if resolved.server_url.trim().is_empty() {
            resolved.server_url = self.default_url.clone();
        }
        if resolved.user_agent.is_none() {
            resolved.user_agent = Some(self.user_agent.clone());
        }
        resolved
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub retry: RetryPolicy,
    pub server: ServerConfig,
}

impl SyncConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, EngineError> {
        toml::from_str(raw).map_err(|e| EngineError::Config(e.to_string()))
    }

    /// Reads a TOML config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Self::from_toml_str(&raw),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(EngineError::Config(format!(
                "cannot read {}: {e}",
                path.display()
            ))),
        }
    }
}
