//! Caller-facing operations: import from CX or from the remote store, save,
//! update and synchronize, identity reconciliation, and summaries.
//!
//! Every operation that touches the document from the engine thread blocks
//! the caller through the [`SyncBridge`]. The document lock is never held
//! across a bridge call.

use std::io::{Cursor, Read};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use cxsync_core::cx::ElementCodec;
use cxsync_core::{ElementHandle, RemoteNetworkRecord, RemoteUuid};
use cxsync_storage::GraphDocument;

use crate::SharedDocument;
use crate::aspect_cache::AspectCache;
use crate::bridge::SyncBridge;
use crate::config::SyncConfig;
use crate::error::EngineError;
use crate::import::{BuildNetworkTask, ImportSlot, ReadCxTask};
use crate::protocol::{self, SyncPlan, UpdateProtocol};
use crate::remote::{RemoteConnector, RemoteStore, RemoteTarget, TargetProvider};
use crate::summary::{self, CollectionSummary};
use crate::task::{FinishStatus, TaskIterator};

pub const APP_NAME: &str = "cxsync";
pub const API_VERSION: &str = "2";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveParams {
    pub target: RemoteTarget,
    /// Name the network is saved under. The local network takes it once the
    /// save succeeds.
    pub name: Option<String>,
    /// Overwrite the remote copy even if it changed since the last sync.
    pub overwrite_remote_changes: bool,
}

impl SaveParams {
    pub fn new(target: RemoteTarget) -> Self {
        Self {
            target,
            name: None,
            overwrite_remote_changes: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportParams {
    pub target: RemoteTarget,
    pub uuid: RemoteUuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppInfo {
    pub app_name: String,
    pub app_version: String,
    pub api_version: String,
    pub description: String,
}

pub struct NetworkService<D> {
    document: SharedDocument<D>,
    bridge: SyncBridge,
    connector: Arc<dyn RemoteConnector>,
    targets: Arc<dyn TargetProvider>,
    cache: AspectCache,
    config: SyncConfig,
}

impl<D: GraphDocument + Send + 'static> NetworkService<D> {
    pub fn new(
        document: SharedDocument<D>,
        bridge: SyncBridge,
        connector: Arc<dyn RemoteConnector>,
        targets: Arc<dyn TargetProvider>,
        config: SyncConfig,
    ) -> Self {
        Self {
            document,
            bridge,
            connector,
            targets,
            cache: AspectCache::default(),
            config,
        }
    }

    pub fn with_codec(mut self, codec: Arc<dyn ElementCodec>) -> Self {
        self.cache = AspectCache::new(codec);
        self
    }

    pub fn document(&self) -> &SharedDocument<D> {
        &self.document
    }

    pub fn cache(&self) -> &AspectCache {
        &self.cache
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    fn protocol(&self) -> UpdateProtocol<D> {
        UpdateProtocol::new(
            Arc::clone(&self.document),
            self.bridge.clone(),
            self.cache.clone(),
            self.config.retry,
        )
    }

    /// Reads a CX stream into a new collection and network.
    pub fn import_from_cx(
        &self,
        source: impl Read + Send + 'static,
    ) -> Result<ElementHandle, EngineError> {
        let slot = ImportSlot::default();
        let mut tasks = TaskIterator::new();
        tasks.push(ReadCxTask::new(Box::new(source), Arc::clone(&slot)));
        tasks.push(BuildNetworkTask::new(
            Arc::clone(&self.document),
            self.cache.clone(),
            Arc::clone(&slot),
        ));

        let status = self.bridge.execute(tasks)?;
        let mut state = slot.lock();
        match status {
            FinishStatus::Succeeded => state
                .network
                .take()
                .ok_or_else(|| EngineError::Incomplete("import produced no network".into())),
            FinishStatus::Failed { title, message, .. } => Err(state
                .failure
                .take()
                .unwrap_or_else(|| EngineError::Incomplete(format!("{title}: {message}")))),
            FinishStatus::Cancelled { step } => Err(EngineError::Incomplete(format!(
                "import cancelled after {step} step(s)"
            ))),
        }
    }

    /// Downloads a remote network, imports it and links the new local
    /// network to its remote copy.
    pub fn import_from_remote(&self, params: &ImportParams) -> Result<ElementHandle, EngineError> {
        let target = self.resolve_target(&params.target)?;
        let remote = self.connector.connect(&target)?;
        let summary = remote.get_network_summary(params.uuid)?;
        let payload = remote.fetch_network(params.uuid)?;
        debug!(uuid = %params.uuid, bytes = payload.len(), "fetched remote network");

        let network = self.import_from_cx(Cursor::new(payload))?;
        let record = RemoteNetworkRecord::new(params.uuid, target.server_url, summary.modified_at);
        self.cache
            .set_remote_record(&mut *self.document.lock(), network, &record)?;
        info!(network = %network, uuid = %params.uuid, "imported remote network");
        Ok(network)
    }

    /// Saves the network as a new remote network, whether or not it already
    /// has a remote copy.
    pub fn save_to_remote(
        &self,
        network: ElementHandle,
        params: &SaveParams,
    ) -> Result<RemoteUuid, EngineError> {
        let (target, name) = self.prepare(network, params)?;
        let remote = self.connect_for_create(&target)?;
        Ok(self.protocol().with_name(name).create(network, remote, &target)?.uuid)
    }

    /// Overwrites the network's existing remote copy.
    pub fn update_in_remote(
        &self,
        network: ElementHandle,
        params: &SaveParams,
    ) -> Result<RemoteUuid, EngineError> {
        let (target, name) = self.prepare(network, params)?;
        let protocol = self.protocol().with_name(name);
        let SyncPlan::Update(record) = protocol.plan(network)? else {
            return Err(EngineError::RemoteValidation {
                uuid: None,
                reason: format!("network {network} has no remote copy"),
            });
        };
        let remote = self.connect_for_update(&target, record.uuid)?;
        Ok(protocol
            .update(network, remote, &record, &target, params.overwrite_remote_changes)?
            .uuid)
    }

    /// Creates the remote copy if there is none, otherwise updates it.
    pub fn sync_to_remote(
        &self,
        network: ElementHandle,
        params: &SaveParams,
    ) -> Result<RemoteUuid, EngineError> {
        let (target, name) = self.prepare(network, params)?;
        let protocol = self.protocol().with_name(name);
        let record = match protocol.plan(network)? {
            SyncPlan::CreateNew => {
                let remote = self.connect_for_create(&target)?;
                protocol.create(network, remote, &target)?
            }
            SyncPlan::Update(record) => {
                let remote = self.connect_for_update(&target, record.uuid)?;
                protocol.update(network, remote, &record, &target, params.overwrite_remote_changes)?
            }
        };
        Ok(record.uuid)
    }

    /// Links `network` to `candidate` on the currently selected server after
    /// checking the candidate exists and is writable there.
    pub fn reconcile_remote_identity(
        &self,
        network: ElementHandle,
        candidate: RemoteUuid,
    ) -> Result<RemoteUuid, EngineError> {
        self.require_network(network)?;
        let selected = self
            .targets
            .current_target()
            .ok_or_else(|| EngineError::InvalidParameters("no remote server selected".into()))?;
        let target = self.resolve_target(&selected)?;

        let remote = self.connect_for_update(&target, candidate)?;
        let summary = remote
            .get_network_summary(candidate)
            .map_err(|e| EngineError::RemoteValidation {
                uuid: Some(candidate),
                reason: e.to_string(),
            })?;
        protocol::check_access(&summary, &target).map_err(|reason| {
            EngineError::RemoteValidation {
                uuid: Some(candidate),
                reason,
            }
        })?;

        let record = RemoteNetworkRecord::new(candidate, target.server_url.clone(), summary.modified_at);
        self.cache
            .set_remote_record(&mut *self.document.lock(), network, &record)?;
        info!(network = %network, uuid = %candidate, "remote identity reconciled");
        Ok(candidate)
    }

    pub fn summary(&self, handle: ElementHandle) -> Result<CollectionSummary, EngineError> {
        let doc = self.document.lock();
        summary::build_summary(&*doc, &self.cache, handle)
    }

    pub fn app_info(&self) -> AppInfo {
        AppInfo {
            app_name: APP_NAME.to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            api_version: API_VERSION.to_string(),
            description: "Synchronizes local networks with a remote CX network store".to_string(),
        }
    }

    fn require_network(&self, network: ElementHandle) -> Result<(), EngineError> {
        match self.document.lock().network(network)? {
            Some(_) => Ok(()),
            None => Err(EngineError::NetworkNotFound(network.to_string())),
        }
    }

    /// Resolves the target and normalizes the requested name. Nothing in the
    /// document changes here.
    fn prepare(
        &self,
        network: ElementHandle,
        params: &SaveParams,
    ) -> Result<(RemoteTarget, Option<String>), EngineError> {
        let target = self.resolve_target(&params.target)?;
        self.require_network(network)?;
        let name = match params.name.as_deref().map(str::trim) {
            Some("") => {
                return Err(EngineError::InvalidParameters("network name is empty".into()));
            }
            Some(name) => Some(name.to_string()),
            None => None,
        };
        Ok((target, name))
    }

    fn resolve_target(&self, target: &RemoteTarget) -> Result<RemoteTarget, EngineError> {
        let resolved = self.config.server.resolve(target);
        check_target(&resolved)?;
        Ok(resolved)
    }

    fn connect_for_create(&self, target: &RemoteTarget) -> Result<Arc<dyn RemoteStore>, EngineError> {
        self.connector
            .connect(target)
            .map_err(|e| EngineError::RemoteFatal {
                attempts: 1,
                last_error: e.to_string(),
            })
    }

    fn connect_for_update(
        &self,
        target: &RemoteTarget,
        uuid: RemoteUuid,
    ) -> Result<Arc<dyn RemoteStore>, EngineError> {
        self.connector
            .connect(target)
            .map_err(|e| EngineError::RemoteValidation {
                uuid: Some(uuid),
                reason: e.to_string(),
            })
    }
}

fn check_target(target: &RemoteTarget) -> Result<(), EngineError> {
    if target.server_url.trim().is_empty() {
        return Err(EngineError::InvalidParameters("server url is empty".into()));
    }
    if target.username.trim().is_empty() {
        return Err(EngineError::InvalidParameters("username is empty".into()));
    }
    Ok(())
}
