//! Export of a local network to CX and upload of the result.
//!
//! An export runs as two steps on the task engine: [`WriteCxTask`] turns the
//! network into a CX payload, [`UploadTask`] sends it. Both publish into a
//! shared [`ExportSlot`] that the caller inspects once the sequence ends.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use cxsync_core::aspects::MetaDataCollection;
use cxsync_core::cx::{self, CxDocument, CxEdge, CxNetworkAttribute, CxNode};
use cxsync_core::{
    ColumnType, CoreError, ElementHandle, ElementKind, ExternalAspectId, RemoteUuid, columns,
};
use cxsync_storage::{GraphDocument, StorageError, TableRef};

use crate::SharedDocument;
use crate::aspect_cache::AspectCache;
use crate::error::EngineError;
use crate::id_mapping;
use crate::remote::{RemoteError, RemoteStore};
use crate::task::{Task, TaskError, TaskMonitor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadMode {
    Create,
    Update(RemoteUuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadOutcome {
    pub uuid: RemoteUuid,
    /// Server modification time after the write, when the server reported it.
    pub modified_at: Option<i64>,
}

/// Why an export sequence stopped.
#[derive(Debug)]
pub enum ExportFailure {
    /// Building the payload failed; nothing was sent.
    Local(EngineError),
    Remote(RemoteError),
}

#[derive(Debug, Default)]
pub struct ExportState {
    pub payload: Option<Vec<u8>>,
    pub outcome: Option<UploadOutcome>,
    pub failure: Option<ExportFailure>,
}

pub type ExportSlot = Arc<Mutex<ExportState>>;

/// Builds the CX form of `network`. Nodes and edges without an external id
/// get the next free one, and the new ids are recorded.
pub fn build_cx_document<D: GraphDocument + ?Sized>(
    doc: &mut D,
    cache: &AspectCache,
    network: ElementHandle,
) -> Result<CxDocument, EngineError> {
    let record = doc
        .network(network)?
        .ok_or_else(|| EngineError::NetworkNotFound(network.to_string()))?;

    let nodes = doc.nodes(network)?;
    let edges = doc.edges(network)?;
    let node_ids = assign_ids(doc, network, ElementKind::Node, &nodes)?;
    let edge_handles: Vec<ElementHandle> = edges.iter().map(|e| e.handle).collect();
    let edge_ids = assign_ids(doc, network, ElementKind::Edge, &edge_handles)?;

    let mut out = CxDocument::default();
    let node_table = TableRef::elements(network, ElementKind::Node);
    for node in &nodes {
        out.nodes.push(CxNode {
            id: node_ids[node],
            name: text_cell(&*doc, node_table, *node, columns::NODE_NAME)?,
            represents: text_cell(&*doc, node_table, *node, columns::NODE_REPRESENTS)?,
        });
    }

    let edge_table = TableRef::elements(network, ElementKind::Edge);
    for edge in &edges {
        let endpoint = |handle: ElementHandle| {
            node_ids.get(&handle).copied().ok_or_else(|| {
                StorageError::NotFound(format!("edge {} endpoint {handle}", edge.handle))
            })
        };
        out.edges.push(CxEdge {
            id: edge_ids[&edge.handle],
            source: endpoint(edge.source)?,
            target: endpoint(edge.target)?,
            interaction: text_cell(&*doc, edge_table, edge.handle, columns::EDGE_INTERACTION)?,
        });
    }

    out.set_network_name(&record.name);
    let mut opaque = cache.opaque_aspects(&*doc, network)?;
    if let Some(attributes) = opaque.remove(cx::NETWORK_ATTRIBUTES) {
        for element in attributes {
            match serde_json::from_value::<CxNetworkAttribute>(element.data) {
                Ok(attribute) if attribute.name != "name" => out.network_attributes.push(attribute),
                Ok(_) => {}
                Err(e) => {
                    warn!(network = %network, error = %e, "dropping archived network attribute");
                }
            }
        }
    }

    out.metadata = cache.metadata(&*doc, network)?.ok().map(|mut metadata| {
        refresh_counts(&mut metadata, cx::NODES, &node_ids);
        refresh_counts(&mut metadata, cx::EDGES, &edge_ids);
        metadata
    });
    out.namespaces = cache.namespaces(&*doc, network)?.ok();
    out.provenance = cache.provenance(&*doc, network)?.ok();
    out.opaque = opaque;

    debug!(network = %network, nodes = out.nodes.len(), edges = out.edges.len(), "built CX document");
    Ok(out)
}

fn assign_ids<D: GraphDocument + ?Sized>(
    doc: &mut D,
    network: ElementHandle,
    kind: ElementKind,
    handles: &[ElementHandle],
) -> Result<BTreeMap<ElementHandle, ExternalAspectId>, EngineError> {
    let mut assigned: BTreeMap<ElementHandle, ExternalAspectId> =
        id_mapping::mappings(&*doc, network, kind)?.into_iter().collect();
    let unmapped: Vec<ElementHandle> = handles
        .iter()
        .copied()
        .filter(|handle| !assigned.contains_key(handle))
        .collect();
    if unmapped.is_empty() {
        return Ok(assigned);
    }

    let mut last = assigned.values().map(|id| id.get()).max().unwrap_or(0);
    for handle in unmapped {
        let next = last.checked_add(1).ok_or_else(|| {
            CoreError::InvalidData(format!("no {} id left above {last} in network {network}", kind.as_str()))
        })?;
        let id = ExternalAspectId::new(next);
        id_mapping::record_unused_mapping(doc, network, kind, handle, id)?;
        assigned.insert(handle, id);
        last = next;
    }
    Ok(assigned)
}

/// Updates the count and id counter of an existing metadata entry.
fn refresh_counts(
    metadata: &mut MetaDataCollection,
    aspect: &str,
    ids: &BTreeMap<ElementHandle, ExternalAspectId>,
) {
    if let Some(element) = metadata.elements.iter_mut().find(|e| e.name == aspect) {
        element.element_count = Some(ids.len() as i64);
        element.id_counter = ids.values().map(|id| id.get()).max();
    }
}

fn text_cell<D: GraphDocument + ?Sized>(
    doc: &D,
    table: TableRef,
    row: ElementHandle,
    column: &str,
) -> Result<Option<String>, StorageError> {
    if doc.column(table, column)?.is_none() {
        return Ok(None);
    }
    Ok(doc
        .get(table, row, column, ColumnType::Text)?
        .and_then(|value| value.into_text()))
}

pub struct WriteCxTask<D> {
    document: SharedDocument<D>,
    cache: AspectCache,
    network: ElementHandle,
    name: Option<String>,
    slot: ExportSlot,
}

impl<D> WriteCxTask<D> {
    pub fn new(
        document: SharedDocument<D>,
        cache: AspectCache,
        network: ElementHandle,
        slot: ExportSlot,
    ) -> Self {
        Self {
            document,
            cache,
            network,
            name: None,
            slot,
        }
    }

    /// Exports under `name` instead of the stored network name.
    pub fn with_name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }
}

impl<D: GraphDocument + Send + 'static> Task for WriteCxTask<D> {
    fn title(&self) -> &str {
        "Writing network as CX"
    }

    fn run(&mut self, monitor: &TaskMonitor) -> Result<(), TaskError> {
        monitor.set_status("collecting network");
        let built = {
            let mut doc = self.document.lock();
            build_cx_document(&mut *doc, &self.cache, self.network)
        };
        let built = built.map(|mut document| {
            if let Some(name) = &self.name {
                document.set_network_name(name);
            }
            document
        });
        let payload = built.and_then(|document| Ok(cx::write_document_to_vec(&document)?));

        let mut state = self.slot.lock();
        match payload {
            Ok(bytes) => {
                state.payload = Some(bytes);
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                state.failure = Some(ExportFailure::Local(e));
                Err(TaskError::Failed(message))
            }
        }
    }
}

pub struct UploadTask {
    remote: Arc<dyn RemoteStore>,
    mode: UploadMode,
    slot: ExportSlot,
}

impl UploadTask {
    pub fn new(remote: Arc<dyn RemoteStore>, mode: UploadMode, slot: ExportSlot) -> Self {
        Self { remote, mode, slot }
    }

    fn upload(&self, payload: &[u8]) -> Result<UploadOutcome, RemoteError> {
        match self.mode {
            UploadMode::Create => {
                let uuid = self.remote.create_network(payload)?;
                info!(uuid = %uuid, bytes = payload.len(), "created remote network");
                // The network exists remotely now; a missing timestamp is not
                // worth failing the create over.
                let modified_at = match self.remote.get_network_summary(uuid) {
                    Ok(summary) => Some(summary.modified_at),
                    Err(e) => {
                        warn!(uuid = %uuid, error = %e, "no summary for newly created network");
                        None
                    }
                };
                Ok(UploadOutcome { uuid, modified_at })
            }
            UploadMode::Update(uuid) => {
                self.remote.update_network(uuid, payload)?;
                let summary = self.remote.get_network_summary(uuid)?;
                debug!(uuid = %uuid, modified_at = summary.modified_at, "updated remote network");
                Ok(UploadOutcome {
                    uuid,
                    modified_at: Some(summary.modified_at),
                })
            }
        }
    }
}

impl Task for UploadTask {
    fn title(&self) -> &str {
        match self.mode {
            UploadMode::Create => "Saving network to the remote store",
            UploadMode::Update(_) => "Updating network in the remote store",
        }
    }

    fn run(&mut self, monitor: &TaskMonitor) -> Result<(), TaskError> {
        let Some(payload) = self.slot.lock().payload.take() else {
            return Err(TaskError::Failed("no CX payload to upload".into()));
        };
        monitor.set_status("uploading");

        let result = self.upload(&payload);
        let mut state = self.slot.lock();
        match result {
            Ok(outcome) => {
                state.outcome = Some(outcome);
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                state.failure = Some(ExportFailure::Remote(e));
                Err(TaskError::Failed(message))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cxsync_core::aspects::MetaDataElement;
    use cxsync_core::{FieldValue, OpaqueAspectArchive, OpaqueAspectElement};
    use cxsync_storage::{AttributeStore, SqliteDocument};
    use serde_json::json;

    #[test]
    fn unmapped_elements_get_fresh_ids_that_stick() {
        let mut doc = SqliteDocument::open_in_memory().unwrap();
        let cache = AspectCache::default();
        let network = doc.create_network(None, "fresh").unwrap();
        let a = doc.add_node(network).unwrap();
        let b = doc.add_node(network).unwrap();
        doc.add_edge(network, a, b).unwrap();
        id_mapping::record_mapping(&mut doc, network, ElementKind::Node, a, ExternalAspectId::new(40))
            .unwrap();

        let first = build_cx_document(&mut doc, &cache, network).unwrap();
        let ids: Vec<i64> = first.nodes.iter().map(|n| n.id.get()).collect();
        assert_eq!(ids, vec![40, 41]);
        assert_eq!(first.edges[0].source, ExternalAspectId::new(40));
        assert_eq!(first.edges[0].target, ExternalAspectId::new(41));

        let second = build_cx_document(&mut doc, &cache, network).unwrap();
        assert_eq!(second.nodes, first.nodes);
        assert_eq!(second.edges, first.edges);
    }

    #[test]
    fn fully_mapped_network_exports_at_the_top_of_the_id_space() {
        let mut doc = SqliteDocument::open_in_memory().unwrap();
        let cache = AspectCache::default();
        let network = doc.create_network(None, "edge of range").unwrap();
        let node = doc.add_node(network).unwrap();
        id_mapping::record_mapping(&mut doc, network, ElementKind::Node, node, ExternalAspectId::new(i64::MAX))
            .unwrap();

        let document = build_cx_document(&mut doc, &cache, network).unwrap();
        assert_eq!(document.nodes[0].id, ExternalAspectId::new(i64::MAX));

        doc.add_node(network).unwrap();
        assert!(matches!(
            build_cx_document(&mut doc, &cache, network),
            Err(EngineError::Core(CoreError::InvalidData(_)))
        ));
    }

    #[test]
    fn carries_names_and_cached_aspects() {
        let mut doc = SqliteDocument::open_in_memory().unwrap();
        let cache = AspectCache::default();
        let network = doc.create_network(None, "named").unwrap();
        let node = doc.add_node(network).unwrap();
        let table = TableRef::elements(network, ElementKind::Node);
        doc.get_or_create_column(table, columns::NODE_NAME, ColumnType::Text).unwrap();
        doc.set(table, node, columns::NODE_NAME, FieldValue::Text("TP53".into())).unwrap();

        let mut metadata = MetaDataCollection::default();
        metadata.upsert(MetaDataElement::new(cx::NODES));
        cache.set_metadata(&mut doc, network, &metadata).unwrap();

        let mut archive = OpaqueAspectArchive::new();
        archive.insert(
            cx::NETWORK_ATTRIBUTES.into(),
            vec![
                OpaqueAspectElement::new(cx::NETWORK_ATTRIBUTES, json!({"n": "description", "v": "demo"})),
                OpaqueAspectElement::new(cx::NETWORK_ATTRIBUTES, json!({"n": "name", "v": "stale"})),
            ],
        );
        archive.insert("cartesianLayout".into(), vec![OpaqueAspectElement::new("cartesianLayout", json!({"x": 1}))]);
        cache.set_opaque_aspects(&mut doc, network, &archive).unwrap();

        let out = build_cx_document(&mut doc, &cache, network).unwrap();
        assert_eq!(out.nodes[0].name.as_deref(), Some("TP53"));
        assert_eq!(out.network_name(), Some("named"));
        assert_eq!(out.network_attributes.len(), 2);
        assert_eq!(out.network_attributes[1].value, json!("demo"));
        let nodes_meta = out.metadata.as_ref().and_then(|m| m.get(cx::NODES)).unwrap();
        assert_eq!(nodes_meta.element_count, Some(1));
        assert_eq!(nodes_meta.id_counter, Some(1));
        assert!(out.opaque.contains_key("cartesianLayout"));
        assert!(!out.opaque.contains_key(cx::NETWORK_ATTRIBUTES));
    }

    #[test]
    fn unknown_network_is_not_found() {
        let mut doc = SqliteDocument::open_in_memory().unwrap();
        let result = build_cx_document(&mut doc, &AspectCache::default(), ElementHandle::new(999));
        assert!(matches!(result, Err(EngineError::NetworkNotFound(_))));
    }
}
