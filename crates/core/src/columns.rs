//! Names of the hidden columns the synchronization layer keeps inside a
//! document's attribute tables.

/// External CX id of a node or edge (node/edge hidden tables, Integer).
pub const CX_ID: &str = "cx.id";

/// Serialized metadata collection (network hidden table, Text).
pub const METADATA: &str = "cx.metadata";

/// Serialized namespace declarations (network hidden table, Text).
pub const NAMESPACES: &str = "cx.namespaces";

/// Serialized provenance (network hidden table, Text).
pub const PROVENANCE: &str = "cx.provenance";

/// Prefix of the per-aspect opaque archive columns, followed by one space and
/// the aspect name.
pub const OPAQUE_ASPECT_PREFIX: &str = "cx.opaque";

/// Display name of a node (node hidden table, Text).
pub const NODE_NAME: &str = "name";

/// Identifier the node stands for, e.g. a gene symbol (node hidden table, Text).
pub const NODE_REPRESENTS: &str = "represents";

/// Interaction label of an edge (edge hidden table, Text).
pub const EDGE_INTERACTION: &str = "interaction";

pub const REMOTE_UUID: &str = "remote.uuid";
pub const REMOTE_SERVER_URL: &str = "remote.server_url";
pub const REMOTE_MODIFIED_AT: &str = "remote.modified_at";

pub fn opaque_aspect_column(aspect_name: &str) -> String {
    format!("{OPAQUE_ASPECT_PREFIX} {aspect_name}")
}

/// Inverse of [`opaque_aspect_column`]; `None` for any other column.
pub fn opaque_aspect_name(column: &str) -> Option<&str> {
    column
        .strip_prefix(OPAQUE_ASPECT_PREFIX)
        .and_then(|rest| rest.strip_prefix(' '))
        .filter(|name| !name.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opaque_column_name_round_trips() {
        let column = opaque_aspect_column("cyVisualProperties");
        assert_eq!(column, "cx.opaque cyVisualProperties");
        assert_eq!(opaque_aspect_name(&column), Some("cyVisualProperties"));
    }

    #[test]
    fn unrelated_columns_are_not_opaque() {
        assert_eq!(opaque_aspect_name(METADATA), None);
        assert_eq!(opaque_aspect_name("cx.opaque"), None);
        assert_eq!(opaque_aspect_name("cx.opaquex"), None);
    }
}
