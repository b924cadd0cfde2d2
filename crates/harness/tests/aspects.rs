use cxsync_core::cx;
use cxsync_core::{AspectRead, FieldValue, OpaqueAspectArchive, OpaqueAspectElement, columns};
use cxsync_harness::TestContext;
use cxsync_storage::{AttributeStore, TableRef};
use serde_json::json;

const ANNOTATED: &str = r#"[
    {"metaData": [{"name": "nodes", "version": "1.0", "elementCount": 1}]},
    {"@context": [{"ncbi": "http://identifiers.org/ncbigene/"}]},
    {"nodes": [{"@id": 1, "n": "TP53"}]},
    {"nodeAttributes": [{"po": 1, "n": "score", "v": "0.9"}]},
    {"nodeAttributes": [{"po": 1, "n": "rank", "v": "2"}]}
]"#;

#[test]
fn network_without_aspects_reports_them_absent() -> Result<(), Box<dyn std::error::Error>> {
    let ctx = TestContext::new()?;
    let network = ctx.create_sample_network("bare")?;
    let cache = ctx.service.cache();

    ctx.with_doc(|doc| -> Result<(), Box<dyn std::error::Error>> {
        assert_eq!(cache.metadata(&*doc, network)?, AspectRead::Absent);
        assert_eq!(cache.namespaces(&*doc, network)?, AspectRead::Absent);
        assert_eq!(cache.provenance(&*doc, network)?, AspectRead::Absent);
        assert!(cache.opaque_aspects(&*doc, network)?.is_empty());
        Ok(())
    })?;
    Ok(())
}

#[test]
fn corrupt_aspect_is_skipped_on_export() -> Result<(), Box<dyn std::error::Error>> {
    let ctx = TestContext::new()?;
    let network = ctx.service.import_from_cx(ANNOTATED.as_bytes())?;
    let cache = ctx.service.cache();

    ctx.with_doc(|doc| -> Result<(), Box<dyn std::error::Error>> {
        doc.set(
            TableRef::network(network),
            network,
            columns::NAMESPACES,
            FieldValue::Text("{\"ncbi\": ".into()),
        )?;
        assert!(cache.namespaces(&*doc, network)?.is_unreadable());
        assert!(cache.metadata(&*doc, network)?.is_present());
        Ok(())
    })?;

    let uuid = ctx.service.save_to_remote(network, &ctx.save_params())?;
    let exported = cx::read_document(ctx.remote.payload(uuid).ok_or("nothing uploaded")?.as_slice())?;

    assert_eq!(exported.namespaces, None);
    assert!(exported.metadata.is_some());
    assert_eq!(exported.opaque["nodeAttributes"].len(), 2);
    Ok(())
}

#[test]
fn repeated_fragments_keep_stream_order() -> Result<(), Box<dyn std::error::Error>> {
    let ctx = TestContext::new()?;
    let network = ctx.service.import_from_cx(ANNOTATED.as_bytes())?;
    let cache = ctx.service.cache();

    let archive = ctx.with_doc(|doc| cache.opaque_aspects(&*doc, network))?;
    let names: Vec<&str> = archive["nodeAttributes"]
        .iter()
        .filter_map(|e| e.data["n"].as_str())
        .collect();
    assert_eq!(names, vec!["score", "rank"]);
    Ok(())
}

#[test]
fn opaque_archive_replaces_per_aspect() -> Result<(), Box<dyn std::error::Error>> {
    let ctx = TestContext::new()?;
    let network = ctx.create_sample_network("layout")?;
    let cache = ctx.service.cache();

    let mut archive = OpaqueAspectArchive::new();
    archive.insert(
        "cartesianLayout".into(),
        vec![
            OpaqueAspectElement::new("cartesianLayout", json!({"node": 1, "x": 0.0})),
            OpaqueAspectElement::new("cartesianLayout", json!({"node": 2, "x": "multi\nline"})),
        ],
    );
    archive.insert(
        "cyGroups".into(),
        vec![OpaqueAspectElement::new("cyGroups", json!({"@id": 9}))],
    );

    ctx.with_doc(|doc| -> Result<(), Box<dyn std::error::Error>> {
        cache.set_opaque_aspects(doc, network, &archive)?;
        assert_eq!(cache.opaque_aspects(&*doc, network)?, archive);

        let mut layout_only = OpaqueAspectArchive::new();
        layout_only.insert("cartesianLayout".into(), archive["cartesianLayout"][..1].to_vec());
        cache.set_opaque_aspects(doc, network, &layout_only)?;

        let stored = cache.opaque_aspects(&*doc, network)?;
        assert_eq!(stored["cartesianLayout"].len(), 1);
        assert_eq!(stored["cyGroups"], archive["cyGroups"]);
        Ok(())
    })?;
    Ok(())
}
