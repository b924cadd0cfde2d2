//! Per-network storage of the aspects the CX layer carries alongside the
//! topology: the three singleton aspects, the archive of opaque aspects, and
//! the remote identity record.
//!
//! Everything lives in the network's hidden table. Reads degrade instead of
//! failing: text that no longer parses comes back as
//! [`AspectRead::Unreadable`] so one damaged aspect does not hide the rest.
//! Storage failures are still reported as errors.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use cxsync_core::aspects::{MetaDataCollection, NamespacesElement, Provenance};
use cxsync_core::cx::{ElementCodec, JsonElementCodec};
use cxsync_core::{
    AspectRead, ColumnType, ElementHandle, FieldValue, OpaqueAspectArchive, RemoteNetworkRecord,
    RemoteUuid, columns,
};
use cxsync_storage::{AttributeStore, StorageError, TableRef};

use crate::error::EngineError;

#[derive(Clone)]
pub struct AspectCache {
    codec: Arc<dyn ElementCodec>,
}

impl Default for AspectCache {
    fn default() -> Self {
        Self::new(Arc::new(JsonElementCodec))
    }
}

impl AspectCache {
    pub fn new(codec: Arc<dyn ElementCodec>) -> Self {
        Self { codec }
    }

    pub fn set_metadata<S: AttributeStore + ?Sized>(
        &self,
        store: &mut S,
        network: ElementHandle,
        metadata: &MetaDataCollection,
    ) -> Result<(), EngineError> {
        store_json(store, network, columns::METADATA, metadata)
    }

    pub fn metadata<S: AttributeStore + ?Sized>(
        &self,
        store: &S,
        network: ElementHandle,
    ) -> Result<AspectRead<MetaDataCollection>, StorageError> {
        load_json(store, network, columns::METADATA)
    }

    pub fn set_namespaces<S: AttributeStore + ?Sized>(
        &self,
        store: &mut S,
        network: ElementHandle,
        namespaces: &NamespacesElement,
    ) -> Result<(), EngineError> {
        store_json(store, network, columns::NAMESPACES, namespaces)
    }

    pub fn namespaces<S: AttributeStore + ?Sized>(
        &self,
        store: &S,
        network: ElementHandle,
    ) -> Result<AspectRead<NamespacesElement>, StorageError> {
        load_json(store, network, columns::NAMESPACES)
    }

    pub fn set_provenance<S: AttributeStore + ?Sized>(
        &self,
        store: &mut S,
        network: ElementHandle,
        provenance: &Provenance,
    ) -> Result<(), EngineError> {
        store_json(store, network, columns::PROVENANCE, provenance)
    }

    pub fn provenance<S: AttributeStore + ?Sized>(
        &self,
        store: &S,
        network: ElementHandle,
    ) -> Result<AspectRead<Provenance>, StorageError> {
        load_json(store, network, columns::PROVENANCE)
    }

    /// Writes one blob per aspect name. Elements the codec cannot encode are
    /// dropped from the blob; the rest of the aspect is still stored.
    pub fn set_opaque_aspects<S: AttributeStore + ?Sized>(
        &self,
        store: &mut S,
        network: ElementHandle,
        archive: &OpaqueAspectArchive,
    ) -> Result<(), EngineError> {
        let table = TableRef::network(network);
        for (name, elements) in archive {
            let mut units = Vec::with_capacity(elements.len());
            for (index, element) in elements.iter().enumerate() {
                match self.codec.encode(element) {
                    Ok(unit) => units.push(unit),
                    Err(e) => {
                        warn!(network = %network, aspect = %name, index, error = %e, "skipping opaque element that failed to encode");
                    }
                }
            }

            let column = columns::opaque_aspect_column(name);
            store.get_or_create_column(table, &column, ColumnType::Text)?;
            store.set(table, network, &column, FieldValue::Text(units.join("\n")))?;
            debug!(network = %network, aspect = %name, elements = units.len(), "stored opaque aspect");
        }
        Ok(())
    }

    /// Decodes every archived aspect. An aspect whose blob does not decode is
    /// left out of the result.
    pub fn opaque_aspects<S: AttributeStore + ?Sized>(
        &self,
        store: &S,
        network: ElementHandle,
    ) -> Result<OpaqueAspectArchive, StorageError> {
        let table = TableRef::network(network);
        let mut archive = OpaqueAspectArchive::new();
        for column in store.columns(table)? {
            let Some(name) = columns::opaque_aspect_name(&column.name) else {
                continue;
            };
            let blob = match store.get(table, network, &column.name, ColumnType::Text) {
                Ok(Some(value)) => value.into_text().unwrap_or_default(),
                Ok(None) => continue,
                Err(StorageError::TypeMismatch { .. } | StorageError::Serialization(_)) => {
                    warn!(network = %network, aspect = name, "opaque aspect column holds foreign data, dropping");
                    continue;
                }
                Err(e) => return Err(e),
            };
            match self.codec.decode_all(name, &blob) {
                Ok(elements) => {
                    archive.insert(name.to_string(), elements);
                }
                Err(e) => {
                    warn!(network = %network, aspect = name, error = %e, "dropping opaque aspect that failed to decode");
                }
            }
        }
        Ok(archive)
    }

    pub fn remote_record<S: AttributeStore + ?Sized>(
        &self,
        store: &S,
        network: ElementHandle,
    ) -> Result<AspectRead<RemoteNetworkRecord>, StorageError> {
        let uuid = match read_cell(store, network, columns::REMOTE_UUID, ColumnType::Text)? {
            AspectRead::Present(value) => value.into_text().unwrap_or_default(),
            AspectRead::Absent => return Ok(AspectRead::Absent),
            AspectRead::Unreadable { reason } => return Ok(AspectRead::Unreadable { reason }),
        };
        let uuid: RemoteUuid = match uuid.parse() {
            Ok(uuid) => uuid,
            Err(e) => {
                return Ok(AspectRead::Unreadable {
                    reason: e.to_string(),
                });
            }
        };

        let server_url =
            match read_cell(store, network, columns::REMOTE_SERVER_URL, ColumnType::Text)? {
                AspectRead::Present(value) => value.into_text().unwrap_or_default(),
                _ => String::new(),
            };
        let modified_at =
            match read_cell(store, network, columns::REMOTE_MODIFIED_AT, ColumnType::Timestamp)? {
                AspectRead::Present(value) => value.as_timestamp(),
                _ => None,
            };
        let Some(modified_at) = modified_at else {
            return Ok(AspectRead::Unreadable {
                reason: format!("remote record for {uuid} has no modification time"),
            });
        };

        Ok(AspectRead::Present(RemoteNetworkRecord {
            uuid,
            server_url,
            modified_at,
        }))
    }

    /// Replaces the whole record in one write.
    pub fn set_remote_record<S: AttributeStore + ?Sized>(
        &self,
        store: &mut S,
        network: ElementHandle,
        record: &RemoteNetworkRecord,
    ) -> Result<(), StorageError> {
        let table = TableRef::network(network);
        store.get_or_create_column(table, columns::REMOTE_UUID, ColumnType::Text)?;
        store.get_or_create_column(table, columns::REMOTE_SERVER_URL, ColumnType::Text)?;
        store.get_or_create_column(table, columns::REMOTE_MODIFIED_AT, ColumnType::Timestamp)?;
        store.set_all(
            table,
            network,
            &[
                (columns::REMOTE_UUID, FieldValue::Text(record.uuid.to_string())),
                (columns::REMOTE_SERVER_URL, FieldValue::Text(record.server_url.clone())),
                (columns::REMOTE_MODIFIED_AT, FieldValue::Timestamp(record.modified_at)),
            ],
        )?;
        debug!(network = %network, uuid = %record.uuid, modified_at = record.modified_at, "stored remote record");
        Ok(())
    }

    pub fn has_remote_identity<S: AttributeStore + ?Sized>(
        &self,
        store: &S,
        network: ElementHandle,
    ) -> Result<bool, StorageError> {
        Ok(self.remote_record(store, network)?.is_present())
    }
}

fn store_json<S: AttributeStore + ?Sized, T: Serialize>(
    store: &mut S,
    network: ElementHandle,
    column: &str,
    value: &T,
) -> Result<(), EngineError> {
    let text = serde_json::to_string(value)?;
    let table = TableRef::network(network);
    store.get_or_create_column(table, column, ColumnType::Text)?;
    store.set(table, network, column, FieldValue::Text(text))?;
    Ok(())
}

fn load_json<S: AttributeStore + ?Sized, T: DeserializeOwned>(
    store: &S,
    network: ElementHandle,
    column: &str,
) -> Result<AspectRead<T>, StorageError> {
    let text = match read_cell(store, network, column, ColumnType::Text)? {
        AspectRead::Present(value) => value.into_text().unwrap_or_default(),
        AspectRead::Absent => return Ok(AspectRead::Absent),
        AspectRead::Unreadable { reason } => return Ok(AspectRead::Unreadable { reason }),
    };
    match serde_json::from_str(&text) {
        Ok(value) => Ok(AspectRead::Present(value)),
        Err(e) => {
            warn!(network = %network, column, error = %e, "stored aspect is unreadable");
            Ok(AspectRead::Unreadable {
                reason: e.to_string(),
            })
        }
    }
}

/// Missing column or cell reads as absent; a cell of the wrong type as
/// unreadable.
fn read_cell<S: AttributeStore + ?Sized>(
    store: &S,
    network: ElementHandle,
    column: &str,
    column_type: ColumnType,
) -> Result<AspectRead<FieldValue>, StorageError> {
    let table = TableRef::network(network);
    if store.column(table, column)?.is_none() {
        return Ok(AspectRead::Absent);
    }
    match store.get(table, network, column, column_type) {
        Ok(Some(value)) => Ok(AspectRead::Present(value)),
        Ok(None) => Ok(AspectRead::Absent),
        Err(e @ (StorageError::TypeMismatch { .. } | StorageError::Serialization(_))) => {
            warn!(network = %network, column, error = %e, "hidden column holds foreign data");
            Ok(AspectRead::Unreadable {
                reason: e.to_string(),
            })
        }
        Err(e) => Err(e),
    }
}
