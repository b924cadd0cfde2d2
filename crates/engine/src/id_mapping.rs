//! Local element handle ↔ CX `@id` mapping, kept in the `cx.id` column of a
//! network's hidden node and edge tables.

use tracing::debug;

use cxsync_core::{ColumnType, ElementHandle, ElementKind, ExternalAspectId, FieldValue, columns};
use cxsync_storage::{AttributeStore, StorageError, TableRef};

/// Stores `handle ↔ external_id`, replacing any earlier id of the handle.
/// Another element of the same kind holding `external_id` loses it.
pub fn record_mapping<S: AttributeStore + ?Sized>(
    store: &mut S,
    network: ElementHandle,
    kind: ElementKind,
    handle: ElementHandle,
    external_id: ExternalAspectId,
) -> Result<(), StorageError> {
    let table = TableRef::elements(network, kind);
    store.get_or_create_column(table, columns::CX_ID, ColumnType::Integer)?;
    let holders: Vec<ElementHandle> = mappings(&*store, network, kind)?
        .into_iter()
        .filter(|(other, id)| *id == external_id && *other != handle)
        .map(|(other, _)| other)
        .collect();
    for other in holders {
        debug!(network = %network, element = %other, id = %external_id, "external id moved to another element");
        store.set(table, other, columns::CX_ID, FieldValue::Null)?;
    }
    store.set(table, handle, columns::CX_ID, FieldValue::Integer(external_id.get()))
}

/// [`record_mapping`] for an `external_id` no element of the kind holds yet.
pub(crate) fn record_unused_mapping<S: AttributeStore + ?Sized>(
    store: &mut S,
    network: ElementHandle,
    kind: ElementKind,
    handle: ElementHandle,
    external_id: ExternalAspectId,
) -> Result<(), StorageError> {
    let table = TableRef::elements(network, kind);
    store.get_or_create_column(table, columns::CX_ID, ColumnType::Integer)?;
    store.set(table, handle, columns::CX_ID, FieldValue::Integer(external_id.get()))
}

pub fn lookup_external_id<S: AttributeStore + ?Sized>(
    store: &S,
    network: ElementHandle,
    kind: ElementKind,
    handle: ElementHandle,
) -> Result<Option<ExternalAspectId>, StorageError> {
    let table = TableRef::elements(network, kind);
    if store.column(table, columns::CX_ID)?.is_none() {
        return Ok(None);
    }
    let value = store.get(table, handle, columns::CX_ID, ColumnType::Integer)?;
    Ok(value
        .and_then(|v| v.as_integer())
        .map(ExternalAspectId::new))
}

/// Linear scan over the mapping column.
pub fn lookup_by_external_id<S: AttributeStore + ?Sized>(
    store: &S,
    network: ElementHandle,
    kind: ElementKind,
    external_id: ExternalAspectId,
) -> Result<Option<ElementHandle>, StorageError> {
    Ok(mappings(store, network, kind)?
        .into_iter()
        .find(|(_, id)| *id == external_id)
        .map(|(handle, _)| handle))
}

/// Every mapped element of one kind, in handle order.
pub fn mappings<S: AttributeStore + ?Sized>(
    store: &S,
    network: ElementHandle,
    kind: ElementKind,
) -> Result<Vec<(ElementHandle, ExternalAspectId)>, StorageError> {
    let table = TableRef::elements(network, kind);
    if store.column(table, columns::CX_ID)?.is_none() {
        return Ok(Vec::new());
    }
    Ok(store
        .scan(table, columns::CX_ID)?
        .into_iter()
        .filter_map(|(handle, value)| value.as_integer().map(|id| (handle, ExternalAspectId::new(id))))
        .collect())
}
