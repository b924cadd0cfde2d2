//! Create-versus-update decision for saving a local network remotely, the
//! checks made before overwriting a remote copy, and the bounded retry of
//! updates.
//!
//! ```text
//! start ─ remote record? ─ no ──> create (one attempt) ─────────────┐
//!                        └ yes ─> validate ─ fails ─> RemoteValidation
//!                                          └ ok ───> update attempts ┤
//!                                                                    ├─ ok ─> replace record
//!                                                                    └─ exhausted ─> RemoteFatal
//! ```
//!
//! The record is only written after a successful attempt, so a failed save
//! leaves the local identity exactly as it was.

use std::sync::Arc;
use std::thread;

use tracing::{debug, error, info, warn};

use cxsync_core::record::physical_now;
use cxsync_core::{AspectRead, ElementHandle, RemoteNetworkRecord, RemoteUuid};
use cxsync_storage::GraphDocument;

use crate::SharedDocument;
use crate::aspect_cache::AspectCache;
use crate::bridge::SyncBridge;
use crate::config::RetryPolicy;
use crate::error::EngineError;
use crate::export::{ExportFailure, ExportSlot, UploadMode, UploadOutcome, UploadTask, WriteCxTask};
use crate::remote::{NetworkSummary, RemoteError, RemoteStore, RemoteTarget};
use crate::task::{FinishStatus, TaskIterator};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncPlan {
    CreateNew,
    Update(RemoteNetworkRecord),
}

/// Outcome of one failed export attempt.
#[derive(Debug)]
enum AttemptError {
    /// Failed before anything reached the server; retrying cannot help.
    Local(EngineError),
    Remote(RemoteError),
}

pub struct UpdateProtocol<D> {
    document: SharedDocument<D>,
    bridge: SyncBridge,
    cache: AspectCache,
    retry: RetryPolicy,
    rename: Option<String>,
}

impl<D: GraphDocument + Send + 'static> UpdateProtocol<D> {
    pub fn new(
        document: SharedDocument<D>,
        bridge: SyncBridge,
        cache: AspectCache,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            document,
            bridge,
            cache,
            retry,
            rename: None,
        }
    }

    /// Exports under `name` and renames the local network once the save
    /// succeeds.
    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.rename = name;
        self
    }

    /// An unreadable record counts as no record.
    pub fn plan(&self, network: ElementHandle) -> Result<SyncPlan, EngineError> {
        let doc = self.document.lock();
        if doc.network(network)?.is_none() {
            return Err(EngineError::NetworkNotFound(network.to_string()));
        }
        match self.cache.remote_record(&*doc, network)? {
            AspectRead::Present(record) => Ok(SyncPlan::Update(record)),
            AspectRead::Absent => Ok(SyncPlan::CreateNew),
            AspectRead::Unreadable { reason } => {
                warn!(network = %network, reason = %reason, "ignoring unreadable remote record");
                Ok(SyncPlan::CreateNew)
            }
        }
    }

    /// Checks that the remote copy named by `record` may be overwritten by
    /// `target`'s account.
    pub fn validate(
        &self,
        remote: &dyn RemoteStore,
        record: &RemoteNetworkRecord,
        target: &RemoteTarget,
        overwrite_remote_changes: bool,
    ) -> Result<NetworkSummary, EngineError> {
        let rejected = |reason: String| {
            error!(uuid = %record.uuid, reason = %reason, "remote copy failed validation");
            EngineError::RemoteValidation {
                uuid: Some(record.uuid),
                reason,
            }
        };

        if !target.same_server(&record.server_url) {
            return Err(rejected(format!(
                "network was saved to {}, not {}",
                record.server_url, target.server_url
            )));
        }
        let summary = remote
            .get_network_summary(record.uuid)
            .map_err(|e| rejected(e.to_string()))?;
        check_access(&summary, target).map_err(rejected)?;
        if record.is_stale(summary.modified_at) && !overwrite_remote_changes {
            return Err(rejected(format!(
                "network {} was modified on the server after it was last synchronized",
                record.uuid
            )));
        }

        debug!(uuid = %record.uuid, "remote copy validated");
        Ok(summary)
    }

    /// Saves the network as a new remote network. Never retried.
    pub fn create(
        &self,
        network: ElementHandle,
        remote: Arc<dyn RemoteStore>,
        target: &RemoteTarget,
    ) -> Result<RemoteNetworkRecord, EngineError> {
        info!(network = %network, server = %target.server_url, "saving network as new remote network");
        let outcome = match self.attempt(network, remote, UploadMode::Create) {
            Ok(outcome) => outcome,
            Err(AttemptError::Local(e)) => return Err(e),
            Err(AttemptError::Remote(e)) => {
                error!(network = %network, error = %e, "create failed");
                return Err(EngineError::RemoteFatal {
                    attempts: 1,
                    last_error: e.to_string(),
                });
            }
        };

        let modified_at = match outcome.modified_at {
            Some(modified_at) => modified_at,
            None => {
                warn!(uuid = %outcome.uuid, "server did not report a modification time, using local clock");
                physical_now()?
            }
        };
        self.persist(network, outcome.uuid, target, modified_at)
    }

    /// Validates the remote copy, then updates it with up to
    /// `RetryPolicy::max_attempts` attempts.
    pub fn update(
        &self,
        network: ElementHandle,
        remote: Arc<dyn RemoteStore>,
        record: &RemoteNetworkRecord,
        target: &RemoteTarget,
        overwrite_remote_changes: bool,
    ) -> Result<RemoteNetworkRecord, EngineError> {
        self.validate(remote.as_ref(), record, target, overwrite_remote_changes)?;

        let max_attempts = self.retry.max_attempts();
        let mut last_error = None;
        for attempt in 1..=max_attempts {
            if attempt > 1 {
                thread::sleep(self.retry.delay());
            }
            match self.attempt(network, Arc::clone(&remote), UploadMode::Update(record.uuid)) {
                Ok(outcome) => {
                    info!(network = %network, uuid = %record.uuid, attempt, "updated remote network");
                    let modified_at = match outcome.modified_at {
                        Some(modified_at) => modified_at,
                        None => physical_now()?,
                    };
                    return self.persist(network, record.uuid, target, modified_at);
                }
                Err(AttemptError::Local(e)) => return Err(e),
                Err(AttemptError::Remote(e)) => {
                    warn!(network = %network, uuid = %record.uuid, attempt, max_attempts, error = %e, "update attempt failed");
                    last_error = Some(e);
                }
            }
        }

        let last_error = last_error.map(|e| e.to_string()).unwrap_or_default();
        error!(network = %network, uuid = %record.uuid, attempts = max_attempts, error = %last_error, "giving up on update");
        Err(EngineError::RemoteFatal {
            attempts: max_attempts,
            last_error,
        })
    }

    fn attempt(
        &self,
        network: ElementHandle,
        remote: Arc<dyn RemoteStore>,
        mode: UploadMode,
    ) -> Result<UploadOutcome, AttemptError> {
        let slot = ExportSlot::default();
        let mut tasks = TaskIterator::new();
        tasks.push(
            WriteCxTask::new(
                Arc::clone(&self.document),
                self.cache.clone(),
                network,
                Arc::clone(&slot),
            )
            .with_name(self.rename.clone()),
        );
        tasks.push(UploadTask::new(remote, mode, Arc::clone(&slot)));

        let status = self
            .bridge
            .execute(tasks)
            .map_err(|e| AttemptError::Local(e.into()))?;

        let mut state = slot.lock();
        match status {
            FinishStatus::Succeeded => state.outcome.take().ok_or_else(|| {
                AttemptError::Local(EngineError::Incomplete("upload reported no result".into()))
            }),
            FinishStatus::Failed { title, message, .. } => Err(match state.failure.take() {
                Some(ExportFailure::Remote(e)) => AttemptError::Remote(e),
                Some(ExportFailure::Local(e)) => AttemptError::Local(e),
                None => AttemptError::Local(EngineError::Incomplete(format!("{title}: {message}"))),
            }),
            FinishStatus::Cancelled { step } => Err(AttemptError::Local(EngineError::Incomplete(
                format!("cancelled after {step} step(s)"),
            ))),
        }
    }

    fn persist(
        &self,
        network: ElementHandle,
        uuid: RemoteUuid,
        target: &RemoteTarget,
        modified_at: i64,
    ) -> Result<RemoteNetworkRecord, EngineError> {
        let record = RemoteNetworkRecord::new(uuid, target.server_url.clone(), modified_at);
        let mut doc = self.document.lock();
        self.cache.set_remote_record(&mut *doc, network, &record)?;
        if let Some(name) = &self.rename {
            doc.rename_network(network, name)?;
            debug!(network = %network, name = %name, "renamed network after save");
        }
        Ok(record)
    }
}

/// Read-only networks, and networks of another owner without a write grant,
/// cannot be overwritten.
pub fn check_access(summary: &NetworkSummary, target: &RemoteTarget) -> Result<(), String> {
    if summary.is_read_only {
        return Err(format!("network {} is read-only", summary.uuid));
    }
    if !summary.owner.eq_ignore_ascii_case(&target.username) && !summary.can_write {
        return Err(format!(
            "{} does not have permission to modify network {}",
            target.username, summary.uuid
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(owner: &str, read_only: bool, can_write: bool) -> NetworkSummary {
        NetworkSummary {
            uuid: RemoteUuid::new(),
            name: "net".into(),
            owner: owner.into(),
            modified_at: 0,
            is_read_only: read_only,
            can_write,
        }
    }

    #[test]
    fn owner_may_write() {
        let target = RemoteTarget::new("https://example.org", "Alice", "pw");
        assert!(check_access(&summary("alice", false, false), &target).is_ok());
    }

    #[test]
    fn read_only_is_rejected_even_for_owner() {
        let target = RemoteTarget::new("https://example.org", "alice", "pw");
        assert!(check_access(&summary("alice", true, true), &target).is_err());
    }

    #[test]
    fn foreign_network_needs_write_grant() {
        let target = RemoteTarget::new("https://example.org", "bob", "pw");
        assert!(check_access(&summary("alice", false, false), &target).is_err());
        assert!(check_access(&summary("alice", false, true), &target).is_ok());
    }
}
