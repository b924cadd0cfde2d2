use cxsync_core::cx;
use cxsync_core::{ElementKind, ExternalAspectId};
use cxsync_engine::id_mapping;
use cxsync_harness::TestContext;
use cxsync_storage::GraphDocument;

const TWO_NODES: &str = r#"[
    {"nodes": [{"@id": 7, "n": "x"}, {"@id": 40, "n": "y"}]},
    {"edges": [{"@id": 3, "s": 7, "t": 40}]}
]"#;

#[test]
fn imported_ids_resolve_both_ways() -> Result<(), Box<dyn std::error::Error>> {
    let ctx = TestContext::new()?;
    let network = ctx.service.import_from_cx(TWO_NODES.as_bytes())?;

    ctx.with_doc(|doc| -> Result<(), Box<dyn std::error::Error>> {
        let nodes = doc.nodes(network)?;
        let mapped = id_mapping::mappings(&*doc, network, ElementKind::Node)?;
        assert_eq!(
            mapped,
            vec![(nodes[0], ExternalAspectId::new(7)), (nodes[1], ExternalAspectId::new(40))]
        );

        let edge = doc.edges(network)?[0].handle;
        assert_eq!(
            id_mapping::lookup_external_id(&*doc, network, ElementKind::Edge, edge)?,
            Some(ExternalAspectId::new(3))
        );
        // Node and edge ids live in separate spaces.
        assert_eq!(
            id_mapping::lookup_by_external_id(&*doc, network, ElementKind::Node, ExternalAspectId::new(3))?,
            None
        );
        Ok(())
    })?;
    Ok(())
}

#[test]
fn ids_stay_stable_across_exports() -> Result<(), Box<dyn std::error::Error>> {
    let ctx = TestContext::new()?;
    let network = ctx.service.import_from_cx(TWO_NODES.as_bytes())?;

    let uuid = ctx.service.save_to_remote(network, &ctx.save_params())?;
    let first = cx::read_document(ctx.remote.payload(uuid).ok_or("nothing uploaded")?.as_slice())?;

    let (a, b) = ctx.with_doc(|doc| -> Result<_, Box<dyn std::error::Error>> {
        let nodes = doc.nodes(network)?;
        let added = doc.add_node(network)?;
        let edge = doc.add_edge(network, nodes[1], added)?;
        Ok((added, edge))
    })?;
    ctx.service.sync_to_remote(network, &ctx.save_params())?;
    let second = cx::read_document(ctx.remote.payload(uuid).ok_or("nothing uploaded")?.as_slice())?;

    assert_eq!(second.nodes[..2], first.nodes[..]);
    assert_eq!(second.nodes[2].id, ExternalAspectId::new(41));
    assert_eq!(second.edges[1].id, ExternalAspectId::new(4));
    assert_eq!(second.edges[1].source, ExternalAspectId::new(40));

    ctx.with_doc(|doc| -> Result<(), Box<dyn std::error::Error>> {
        assert_eq!(
            id_mapping::lookup_external_id(&*doc, network, ElementKind::Node, a)?,
            Some(ExternalAspectId::new(41))
        );
        assert_eq!(
            id_mapping::lookup_external_id(&*doc, network, ElementKind::Edge, b)?,
            Some(ExternalAspectId::new(4))
        );
        Ok(())
    })?;
    Ok(())
}

#[test]
fn network_without_mappings_is_numbered_from_one() -> Result<(), Box<dyn std::error::Error>> {
    let ctx = TestContext::new()?;
    let network = ctx.create_sample_network("fresh")?;

    let uuid = ctx.service.save_to_remote(network, &ctx.save_params())?;
    let exported = cx::read_document(ctx.remote.payload(uuid).ok_or("nothing uploaded")?.as_slice())?;

    let node_ids: Vec<i64> = exported.nodes.iter().map(|n| n.id.get()).collect();
    let edge_ids: Vec<i64> = exported.edges.iter().map(|e| e.id.get()).collect();
    assert_eq!(node_ids, vec![1, 2, 3]);
    assert_eq!(edge_ids, vec![1, 2]);
    assert_eq!(exported.edges[0].interaction.as_deref(), Some("links"));
    Ok(())
}

#[test]
fn deleting_a_network_drops_its_mappings() -> Result<(), Box<dyn std::error::Error>> {
    let ctx = TestContext::new()?;
    let network = ctx.service.import_from_cx(TWO_NODES.as_bytes())?;

    ctx.with_doc(|doc| -> Result<(), Box<dyn std::error::Error>> {
        doc.delete_network(network)?;
        assert!(id_mapping::mappings(&*doc, network, ElementKind::Node)?.is_empty());
        assert!(id_mapping::mappings(&*doc, network, ElementKind::Edge)?.is_empty());
        Ok(())
    })?;
    Ok(())
}
