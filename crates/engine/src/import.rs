//! Import of a CX stream into a new local network.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use cxsync_core::cx::{self, CxDocument};
use cxsync_core::{
    ColumnType, CoreError, ElementHandle, ElementKind, ExternalAspectId, FieldValue,
    OpaqueAspectElement, columns,
};
use cxsync_storage::{AttributeStore, GraphDocument, TableRef};

use crate::SharedDocument;
use crate::aspect_cache::AspectCache;
use crate::error::EngineError;
use crate::id_mapping;
use crate::task::{Task, TaskError, TaskMonitor};

pub const DEFAULT_NETWORK_NAME: &str = "Imported network";

#[derive(Debug, Default)]
pub struct ImportState {
    pub document: Option<CxDocument>,
    pub network: Option<ElementHandle>,
    pub failure: Option<EngineError>,
}

pub type ImportSlot = Arc<Mutex<ImportState>>;

/// Creates a collection and network for `parsed` and fills it. On failure the
/// partly built collection is removed again.
pub fn build_network<D: GraphDocument + ?Sized>(
    doc: &mut D,
    cache: &AspectCache,
    parsed: CxDocument,
) -> Result<ElementHandle, EngineError> {
    let name = parsed.network_name().unwrap_or(DEFAULT_NETWORK_NAME).to_string();
    let network = doc.create_network(None, &name)?;

    match populate(doc, cache, network, parsed) {
        Ok(()) => {
            info!(network = %network, name = %name, "imported network");
            Ok(network)
        }
        Err(e) => {
            let collection = doc.network(network).ok().flatten().and_then(|r| r.collection);
            if let Err(cleanup) = doc.delete_network(collection.unwrap_or(network)) {
                error!(network = %network, error = %cleanup, "could not remove partly imported network");
            }
            warn!(network = %network, error = %e, "import failed");
            Err(e)
        }
    }
}

fn populate<D: GraphDocument + ?Sized>(
    doc: &mut D,
    cache: &AspectCache,
    network: ElementHandle,
    parsed: CxDocument,
) -> Result<(), EngineError> {
    let node_table = TableRef::elements(network, ElementKind::Node);
    let edge_table = TableRef::elements(network, ElementKind::Edge);
    doc.get_or_create_column(node_table, columns::NODE_NAME, ColumnType::Text)?;
    doc.get_or_create_column(node_table, columns::NODE_REPRESENTS, ColumnType::Text)?;
    doc.get_or_create_column(edge_table, columns::EDGE_INTERACTION, ColumnType::Text)?;

    let mut nodes: BTreeMap<ExternalAspectId, ElementHandle> = BTreeMap::new();
    for node in parsed.nodes {
        if nodes.contains_key(&node.id) {
            return Err(CoreError::InvalidData(format!("duplicate node id {}", node.id)).into());
        }
        let handle = doc.add_node(network)?;
        id_mapping::record_unused_mapping(doc, network, ElementKind::Node, handle, node.id)?;
        set_text(doc, node_table, handle, columns::NODE_NAME, node.name)?;
        set_text(doc, node_table, handle, columns::NODE_REPRESENTS, node.represents)?;
        nodes.insert(node.id, handle);
    }

    let mut edge_ids = BTreeSet::new();
    for edge in parsed.edges {
        if !edge_ids.insert(edge.id) {
            return Err(CoreError::InvalidData(format!("duplicate edge id {}", edge.id)).into());
        }
        let endpoint = |id: ExternalAspectId| {
            nodes.get(&id).copied().ok_or_else(|| {
                CoreError::InvalidData(format!("edge {} references unknown node {id}", edge.id))
            })
        };
        let (source, target) = (endpoint(edge.source)?, endpoint(edge.target)?);
        let handle = doc.add_edge(network, source, target)?;
        id_mapping::record_unused_mapping(doc, network, ElementKind::Edge, handle, edge.id)?;
        set_text(doc, edge_table, handle, columns::EDGE_INTERACTION, edge.interaction)?;
    }

    let mut opaque = parsed.opaque;
    let attributes = parsed
        .network_attributes
        .iter()
        .filter(|a| a.name != "name")
        .map(|a| Ok(OpaqueAspectElement::new(cx::NETWORK_ATTRIBUTES, serde_json::to_value(a)?)))
        .collect::<Result<Vec<_>, EngineError>>()?;
    if !attributes.is_empty() {
        opaque.insert(cx::NETWORK_ATTRIBUTES.to_string(), attributes);
    }

    if let Some(metadata) = &parsed.metadata {
        cache.set_metadata(doc, network, metadata)?;
    }
    if let Some(namespaces) = &parsed.namespaces {
        cache.set_namespaces(doc, network, namespaces)?;
    }
    if let Some(provenance) = &parsed.provenance {
        cache.set_provenance(doc, network, provenance)?;
    }
    cache.set_opaque_aspects(doc, network, &opaque)?;

    debug!(network = %network, nodes = nodes.len(), aspects = opaque.len(), "populated network");
    Ok(())
}

fn set_text<D: AttributeStore + ?Sized>(
    doc: &mut D,
    table: TableRef,
    row: ElementHandle,
    column: &str,
    value: Option<String>,
) -> Result<(), EngineError> {
    if let Some(text) = value {
        doc.set(table, row, column, FieldValue::Text(text))?;
    }
    Ok(())
}

/// Parses a CX stream into the slot.
pub struct ReadCxTask {
    source: Option<Box<dyn Read + Send>>,
    slot: ImportSlot,
}

impl ReadCxTask {
    pub fn new(source: Box<dyn Read + Send>, slot: ImportSlot) -> Self {
        Self {
            source: Some(source),
            slot,
        }
    }
}

impl Task for ReadCxTask {
    fn title(&self) -> &str {
        "Reading CX"
    }

    fn run(&mut self, _monitor: &TaskMonitor) -> Result<(), TaskError> {
        let Some(source) = self.source.take() else {
            return Err(TaskError::Failed("CX source already consumed".into()));
        };
        let mut state = self.slot.lock();
        match cx::read_document(source) {
            Ok(document) => {
                state.document = Some(document);
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                state.failure = Some(e.into());
                Err(TaskError::Failed(message))
            }
        }
    }
}

/// Builds the network from the document the read step left in the slot.
pub struct BuildNetworkTask<D> {
    document: SharedDocument<D>,
    cache: AspectCache,
    slot: ImportSlot,
}

impl<D> BuildNetworkTask<D> {
    pub fn new(document: SharedDocument<D>, cache: AspectCache, slot: ImportSlot) -> Self {
        Self {
            document,
            cache,
            slot,
        }
    }
}

impl<D: GraphDocument + Send + 'static> Task for BuildNetworkTask<D> {
    fn title(&self) -> &str {
        "Building network"
    }

    fn run(&mut self, monitor: &TaskMonitor) -> Result<(), TaskError> {
        let mut state = self.slot.lock();
        let Some(parsed) = state.document.take() else {
            return Err(TaskError::Failed("no CX document to build from".into()));
        };
        monitor.set_status("creating nodes and edges");

        let result = {
            let mut doc = self.document.lock();
            build_network(&mut *doc, &self.cache, parsed)
        };
        match result {
            Ok(network) => {
                state.network = Some(network);
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                state.failure = Some(e);
                Err(TaskError::Failed(message))
            }
        }
    }
}
