use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::{CoreError, RemoteUuid};

/// Returns the current wall-clock time as milliseconds since Unix epoch.
pub fn physical_now() -> Result<i64, CoreError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .map_err(|_| CoreError::InvalidData("system clock before epoch".into()))
}

/// Identity of the remote copy of a local network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteNetworkRecord {
    pub uuid: RemoteUuid,
    pub server_url: String,
    /// Server-reported modification time, epoch milliseconds.
    pub modified_at: i64,
}

impl RemoteNetworkRecord {
    pub fn new(uuid: RemoteUuid, server_url: impl Into<String>, modified_at: i64) -> Self {
        Self {
            uuid,
            server_url: server_url.into(),
            modified_at,
        }
    }

    /// True if the remote copy changed after this record was taken.
    pub fn is_stale(&self, server_modified_at: i64) -> bool {
        server_modified_at > self.modified_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staleness_compares_server_time() {
        let record = RemoteNetworkRecord::new(RemoteUuid::new(), "https://example.org", 1_000);
        assert!(!record.is_stale(1_000));
        assert!(!record.is_stale(999));
        assert!(record.is_stale(1_001));
    }

    #[test]
    fn physical_now_is_after_2020() {
        assert!(physical_now().unwrap() > 1_577_836_800_000);
    }
}
