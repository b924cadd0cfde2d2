use cxsync_core::{ColumnType, ElementHandle, ElementKind, FieldValue};

use crate::error::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableKind {
    Network,
    Node,
    Edge,
}

impl TableKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Node => "node",
            Self::Edge => "edge",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StorageError> {
        match s {
            "network" => Ok(Self::Network),
            "node" => Ok(Self::Node),
            "edge" => Ok(Self::Edge),
            _ => Err(StorageError::Serialization(format!("unknown table kind: {s}"))),
        }
    }
}

impl From<ElementKind> for TableKind {
    fn from(kind: ElementKind) -> Self {
        match kind {
            ElementKind::Node => Self::Node,
            ElementKind::Edge => Self::Edge,
        }
    }
}

/// One hidden attribute table: the network row table, or the node/edge table
/// of a given network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub network: ElementHandle,
    pub kind: TableKind,
}

impl TableRef {
    pub fn network(network: ElementHandle) -> Self {
        Self {
            network,
            kind: TableKind::Network,
        }
    }

    pub fn elements(network: ElementHandle, kind: ElementKind) -> Self {
        Self {
            network,
            kind: kind.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub column_type: ColumnType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkKind {
    /// Root grouping of one or more networks.
    Collection,
    Network,
}

impl NetworkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Collection => "collection",
            Self::Network => "network",
        }
    }

    pub fn parse(s: &str) -> Result<Self, StorageError> {
        match s {
            "collection" => Ok(Self::Collection),
            "network" => Ok(Self::Network),
            _ => Err(StorageError::Serialization(format!("unknown network kind: {s}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkRecord {
    pub handle: ElementHandle,
    pub kind: NetworkKind,
    /// Owning collection; `None` for collections themselves.
    pub collection: Option<ElementHandle>,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeRecord {
    pub handle: ElementHandle,
    pub source: ElementHandle,
    pub target: ElementHandle,
}

/// Typed key/value rows scoped to a network, or to the nodes or edges of a
/// network. Columns are created on demand and persist with the document.
pub trait AttributeStore {
    fn column(&self, table: TableRef, name: &str) -> Result<Option<ColumnInfo>, StorageError>;

    /// All columns of a table in creation order.
    fn columns(&self, table: TableRef) -> Result<Vec<ColumnInfo>, StorageError>;

    /// Creates the column if absent. Asking for an existing column with a
    /// different type is a `TypeMismatch`.
    fn get_or_create_column(
        &mut self,
        table: TableRef,
        name: &str,
        column_type: ColumnType,
    ) -> Result<ColumnInfo, StorageError>;

    fn get(
        &self,
        table: TableRef,
        row: ElementHandle,
        name: &str,
        column_type: ColumnType,
    ) -> Result<Option<FieldValue>, StorageError>;

    /// Writes one cell. `FieldValue::Null` clears it.
    fn set(
        &mut self,
        table: TableRef,
        row: ElementHandle,
        name: &str,
        value: FieldValue,
    ) -> Result<(), StorageError>;

    /// Writes several cells of one row; either all are written or none.
    fn set_all(
        &mut self,
        table: TableRef,
        row: ElementHandle,
        values: &[(&str, FieldValue)],
    ) -> Result<(), StorageError>;

    /// Every non-empty cell of a column.
    fn scan(
        &self,
        table: TableRef,
        name: &str,
    ) -> Result<Vec<(ElementHandle, FieldValue)>, StorageError>;
}

/// The element-level surface of a graph document.
pub trait GraphDocument: AttributeStore {
    fn create_collection(&mut self, name: &str) -> Result<ElementHandle, StorageError>;

    /// Creates a network inside `collection`, or inside a fresh collection of
    /// the same name when `None`.
    fn create_network(
        &mut self,
        collection: Option<ElementHandle>,
        name: &str,
    ) -> Result<ElementHandle, StorageError>;

    fn network(&self, handle: ElementHandle) -> Result<Option<NetworkRecord>, StorageError>;

    fn networks(&self) -> Result<Vec<NetworkRecord>, StorageError>;

    fn subnetworks(&self, collection: ElementHandle) -> Result<Vec<NetworkRecord>, StorageError>;

    fn rename_network(&mut self, handle: ElementHandle, name: &str) -> Result<(), StorageError>;

    /// Removes a network with its elements, columns and cells. Removing a
    /// collection removes its member networks too.
    fn delete_network(&mut self, handle: ElementHandle) -> Result<(), StorageError>;

    fn add_node(&mut self, network: ElementHandle) -> Result<ElementHandle, StorageError>;

    fn add_edge(
        &mut self,
        network: ElementHandle,
        source: ElementHandle,
        target: ElementHandle,
    ) -> Result<ElementHandle, StorageError>;

    fn nodes(&self, network: ElementHandle) -> Result<Vec<ElementHandle>, StorageError>;

    fn edges(&self, network: ElementHandle) -> Result<Vec<EdgeRecord>, StorageError>;
}
