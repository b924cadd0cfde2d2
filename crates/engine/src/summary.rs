use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

use cxsync_core::{ElementHandle, FieldValue, RemoteUuid, columns};
use cxsync_storage::{GraphDocument, NetworkKind, StorageError, TableRef};

use crate::aspect_cache::AspectCache;
use crate::error::EngineError;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalNetworkSummary {
    pub handle: ElementHandle,
    pub name: String,
    pub remote_uuid: Option<RemoteUuid>,
    pub remote_modified_at: Option<i64>,
    pub node_count: usize,
    pub edge_count: usize,
    pub props: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSummary {
    pub handle: ElementHandle,
    pub name: String,
    pub remote_uuid: Option<RemoteUuid>,
    pub props: BTreeMap<String, Value>,
    pub members: Vec<LocalNetworkSummary>,
    /// Set when the summary was requested for a member network.
    pub current_network: Option<ElementHandle>,
}

/// Summarizes the collection of `handle`, which may name the collection or
/// one of its networks.
pub fn build_summary<D: GraphDocument + ?Sized>(
    doc: &D,
    cache: &AspectCache,
    handle: ElementHandle,
) -> Result<CollectionSummary, EngineError> {
    let record = doc
        .network(handle)?
        .ok_or_else(|| EngineError::NetworkNotFound(handle.to_string()))?;
    let (collection, current_network) = match record.kind {
        NetworkKind::Collection => (record, None),
        NetworkKind::Network => {
            let parent = record.collection.unwrap_or(handle);
            let collection = doc
                .network(parent)?
                .ok_or_else(|| EngineError::NetworkNotFound(parent.to_string()))?;
            (collection, Some(handle))
        }
    };

    let mut members = Vec::new();
    for member in doc.subnetworks(collection.handle)? {
        let remote = cache.remote_record(doc, member.handle)?.ok();
        members.push(LocalNetworkSummary {
            handle: member.handle,
            name: member.name,
            remote_uuid: remote.as_ref().map(|r| r.uuid),
            remote_modified_at: remote.as_ref().map(|r| r.modified_at),
            node_count: doc.nodes(member.handle)?.len(),
            edge_count: doc.edges(member.handle)?.len(),
            props: hidden_props(doc, member.handle)?,
        });
    }

    Ok(CollectionSummary {
        handle: collection.handle,
        remote_uuid: cache.remote_record(doc, collection.handle)?.ok().map(|r| r.uuid),
        props: hidden_props(doc, collection.handle)?,
        name: collection.name,
        members,
        current_network,
    })
}

/// Every set cell of the network row, except the serialized aspect blobs.
fn hidden_props<D: GraphDocument + ?Sized>(
    doc: &D,
    network: ElementHandle,
) -> Result<BTreeMap<String, Value>, StorageError> {
    let table = TableRef::network(network);
    let mut props = BTreeMap::new();
    for column in doc.columns(table)? {
        if is_aspect_blob(&column.name) {
            continue;
        }
        match doc.get(table, network, &column.name, column.column_type) {
            Ok(Some(value)) => {
                props.insert(column.name, to_json(value));
            }
            Ok(None) => {}
            Err(StorageError::TypeMismatch { .. } | StorageError::Serialization(_)) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(props)
}

fn is_aspect_blob(column: &str) -> bool {
    column == columns::METADATA
        || column == columns::NAMESPACES
        || column == columns::PROVENANCE
        || columns::opaque_aspect_name(column).is_some()
}

fn to_json(value: FieldValue) -> Value {
    match value {
        FieldValue::Null => Value::Null,
        FieldValue::Text(s) => Value::String(s),
        FieldValue::Integer(n) | FieldValue::Timestamp(n) => Value::from(n),
        FieldValue::Float(f) => Value::from(f),
        FieldValue::Boolean(b) => Value::Bool(b),
        FieldValue::Bytes(bytes) => Value::from(bytes),
    }
}
