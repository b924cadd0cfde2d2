pub mod aspect_cache;
pub mod bridge;
pub mod config;
pub mod error;
pub mod export;
pub mod id_mapping;
pub mod import;
pub mod protocol;
pub mod remote;
pub mod service;
pub mod summary;
pub mod task;

pub use aspect_cache::AspectCache;
pub use bridge::{BridgeError, SyncBridge};
pub use config::{RetryPolicy, ServerConfig, SyncConfig};
pub use error::EngineError;
pub use protocol::{SyncPlan, UpdateProtocol};
pub use remote::{
    NetworkSummary, RemoteConnector, RemoteError, RemoteStore, RemoteTarget, StaticTarget,
    TargetProvider,
};
pub use service::{AppInfo, ImportParams, NetworkService, SaveParams};
pub use summary::{CollectionSummary, LocalNetworkSummary};
pub use task::{DedicatedThreadEngine, Dispatcher, FinishStatus, Task, TaskEngine, TaskIterator};

use std::sync::Arc;

use parking_lot::Mutex;

/// A graph document shared between callers and the engine thread.
pub type SharedDocument<D> = Arc<Mutex<D>>;

pub fn shared_document<D>(document: D) -> SharedDocument<D> {
    Arc::new(Mutex::new(document))
}
