use cxsync_core::{CoreError, RemoteUuid};
use cxsync_storage::StorageError;
use thiserror::Error;

use crate::bridge::BridgeError;
use crate::remote::RemoteError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// The remote copy cannot be updated. `uuid` is `None` when the network
    /// has no remote copy at all.
    #[error("unable to update the network in the remote store: {reason}. Try saving as a new network")]
    RemoteValidation {
        uuid: Option<RemoteUuid>,
        reason: String,
    },

    #[error("remote store did not accept the request after {attempts} attempt(s): {last_error}")]
    RemoteFatal { attempts: u32, last_error: String },

    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("bridge error: {0}")]
    Bridge(#[from] BridgeError),

    #[error("step sequence did not complete: {0}")]
    Incomplete(String),

    #[error("network/collection {0} does not exist")]
    NetworkNotFound(String),

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
