//! Reader and writer for the CX aspect-list JSON shape, plus the per-element
//! codec used to archive aspects the local model does not understand.
//!
//! A CX stream is a JSON array of single-key objects, each naming an aspect
//! and carrying a list of its elements:
//!
//! ```text
//! [ {"numberVerification": [{"longNumber": 281474976710655}]},
//!   {"metaData": [...]}, {"nodes": [...]}, {"edges": [...]},
//!   {"someOtherAspect": [...]}, {"status": [{"error": "", "success": true}]} ]
//! ```
//!
//! Fragments of the same aspect may repeat; their elements are concatenated
//! in stream order.

use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::aspects::{
    MetaDataCollection, MetaDataElement, NamespacesElement, OpaqueAspectArchive,
    OpaqueAspectElement, Provenance,
};
use crate::{CoreError, ExternalAspectId};

pub const NODES: &str = "nodes";
pub const EDGES: &str = "edges";
pub const NETWORK_ATTRIBUTES: &str = "networkAttributes";
pub const METADATA: &str = "metaData";
pub const PRE_METADATA: &str = "preMetaData";
pub const POST_METADATA: &str = "postMetaData";
pub const NAMESPACES: &str = "@context";
pub const PROVENANCE: &str = "provenanceHistory";
pub const NUMBER_VERIFICATION: &str = "numberVerification";
pub const STATUS: &str = "status";

const LONG_NUMBER_CHECK: i64 = 281_474_976_710_655;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CxNode {
    #[serde(rename = "@id")]
    pub id: ExternalAspectId,
    #[serde(rename = "n", default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "r", default, skip_serializing_if = "Option::is_none")]
    pub represents: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CxEdge {
    #[serde(rename = "@id")]
    pub id: ExternalAspectId,
    #[serde(rename = "s")]
    pub source: ExternalAspectId,
    #[serde(rename = "t")]
    pub target: ExternalAspectId,
    #[serde(rename = "i", default, skip_serializing_if = "Option::is_none")]
    pub interaction: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CxNetworkAttribute {
    #[serde(rename = "n")]
    pub name: String,
    #[serde(rename = "v")]
    pub value: Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CxDocument {
    pub nodes: Vec<CxNode>,
    pub edges: Vec<CxEdge>,
    pub network_attributes: Vec<CxNetworkAttribute>,
    pub metadata: Option<MetaDataCollection>,
    pub namespaces: Option<NamespacesElement>,
    pub provenance: Option<Provenance>,
    pub opaque: OpaqueAspectArchive,
}

impl CxDocument {
    /// Value of the `name` network attribute, if it is a string.
    pub fn network_name(&self) -> Option<&str> {
        self.network_attributes
            .iter()
            .find(|a| a.name == "name")
            .and_then(|a| a.value.as_str())
    }

    pub fn set_network_name(&mut self, name: &str) {
        let value = Value::String(name.to_string());
        match self.network_attributes.iter_mut().find(|a| a.name == "name") {
            Some(attr) => attr.value = value,
            None => self.network_attributes.insert(
                0,
                CxNetworkAttribute {
                    name: "name".into(),
                    value,
                },
            ),
        }
    }
}

fn elements_of<T: for<'de> Deserialize<'de>>(
    aspect: &str,
    elements: Vec<Value>,
) -> Result<Vec<T>, CoreError> {
    elements
        .into_iter()
        .map(|v| {
            serde_json::from_value(v)
                .map_err(|e| CoreError::Serialization(format!("bad {aspect} element: {e}")))
        })
        .collect()
}

fn merge_metadata(doc: &mut CxDocument, elements: Vec<MetaDataElement>) {
    let collection = doc.metadata.get_or_insert_with(MetaDataCollection::default);
    for element in elements {
        collection.merge(element);
    }
}

pub fn read_document<R: Read>(reader: R) -> Result<CxDocument, CoreError> {
    let fragments: Vec<Map<String, Value>> = serde_json::from_reader(reader)
        .map_err(|e| CoreError::Serialization(format!("not a CX aspect list: {e}")))?;

    let mut doc = CxDocument::default();
    for fragment in fragments {
        for (aspect, payload) in fragment {
            let elements = match payload {
                Value::Array(items) => items,
                other => vec![other],
            };
            match aspect.as_str() {
                NODES => doc.nodes.extend(elements_of::<CxNode>(NODES, elements)?),
                EDGES => doc.edges.extend(elements_of::<CxEdge>(EDGES, elements)?),
                NETWORK_ATTRIBUTES => doc
                    .network_attributes
                    .extend(elements_of::<CxNetworkAttribute>(NETWORK_ATTRIBUTES, elements)?),
                METADATA | PRE_METADATA | POST_METADATA => {
                    let parsed = elements_of::<MetaDataElement>(METADATA, elements)?;
                    merge_metadata(&mut doc, parsed);
                }
                NAMESPACES => {
                    let parsed = elements_of::<NamespacesElement>(NAMESPACES, elements)?;
                    let namespaces = doc.namespaces.get_or_insert_with(NamespacesElement::default);
                    for element in parsed {
                        namespaces.prefixes.extend(element.prefixes);
                    }
                }
                PROVENANCE => {
                    // Only the latest provenance entry is meaningful.
                    let parsed = elements_of::<Provenance>(PROVENANCE, elements)?;
                    if let Some(last) = parsed.into_iter().last() {
                        doc.provenance = Some(last);
                    }
                }
                NUMBER_VERIFICATION | STATUS => {}
                _ => {
                    let archived = doc.opaque.entry(aspect.clone()).or_default();
                    archived.extend(
                        elements
                            .into_iter()
                            .map(|data| OpaqueAspectElement::new(aspect.clone(), data)),
                    );
                }
            }
        }
    }
    Ok(doc)
}

fn fragment<T: Serialize>(aspect: &str, elements: &[T]) -> Result<Value, CoreError> {
    let mut map = Map::new();
    map.insert(aspect.to_string(), serde_json::to_value(elements)?);
    Ok(Value::Object(map))
}

pub fn write_document<W: Write>(doc: &CxDocument, writer: W) -> Result<(), CoreError> {
    let mut fragments = vec![fragment(
        NUMBER_VERIFICATION,
        &[serde_json::json!({ "longNumber": LONG_NUMBER_CHECK })],
    )?];

    if let Some(metadata) = &doc.metadata {
        fragments.push(fragment(METADATA, &metadata.elements)?);
    }
    if let Some(namespaces) = &doc.namespaces {
        fragments.push(fragment(NAMESPACES, std::slice::from_ref(namespaces))?);
    }
    if !doc.network_attributes.is_empty() {
        fragments.push(fragment(NETWORK_ATTRIBUTES, &doc.network_attributes)?);
    }
    if !doc.nodes.is_empty() {
        fragments.push(fragment(NODES, &doc.nodes)?);
    }
    if !doc.edges.is_empty() {
        fragments.push(fragment(EDGES, &doc.edges)?);
    }
    if let Some(provenance) = &doc.provenance {
        fragments.push(fragment(PROVENANCE, std::slice::from_ref(provenance))?);
    }
    for (aspect, elements) in &doc.opaque {
        let data: Vec<&Value> = elements.iter().map(|e| &e.data).collect();
        fragments.push(fragment(aspect, &data)?);
    }
    fragments.push(fragment(
        STATUS,
        &[serde_json::json!({ "error": "", "success": true })],
    )?);

    serde_json::to_writer(writer, &fragments)?;
    Ok(())
}

pub fn write_document_to_vec(doc: &CxDocument) -> Result<Vec<u8>, CoreError> {
    let mut buf = Vec::new();
    write_document(doc, &mut buf)?;
    Ok(buf)
}

/// Encodes opaque aspect elements one at a time into self-delimiting text
/// units, and decodes a concatenation of such units back.
pub trait ElementCodec: Send + Sync {
    fn encode(&self, element: &OpaqueAspectElement) -> Result<String, CoreError>;

    fn decode_all(
        &self,
        aspect_name: &str,
        blob: &str,
    ) -> Result<Vec<OpaqueAspectElement>, CoreError>;
}

/// One JSON value per element, newline separated.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonElementCodec;

impl ElementCodec for JsonElementCodec {
    fn encode(&self, element: &OpaqueAspectElement) -> Result<String, CoreError> {
        Ok(serde_json::to_string(&element.data)?)
    }

    fn decode_all(
        &self,
        aspect_name: &str,
        blob: &str,
    ) -> Result<Vec<OpaqueAspectElement>, CoreError> {
        serde_json::Deserializer::from_str(blob)
            .into_iter::<Value>()
            .map(|item| {
                item.map(|data| OpaqueAspectElement::new(aspect_name, data))
                    .map_err(CoreError::from)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SAMPLE: &str = r#"[
        {"numberVerification": [{"longNumber": 281474976710655}]},
        {"metaData": [{"name": "nodes", "idCounter": 2}]},
        {"@context": [{"ncbigene": "http://identifiers.org/ncbigene/"}]},
        {"networkAttributes": [{"n": "name", "v": "Tiny"}]},
        {"nodes": [{"@id": 1, "n": "A"}, {"@id": 2, "n": "B"}]},
        {"edges": [{"@id": 5, "s": 1, "t": 2, "i": "binds"}]},
        {"cyVisualProperties": [{"properties_of": "network"}]},
        {"cyVisualProperties": [{"properties_of": "nodes:default"}]},
        {"postMetaData": [{"name": "edges", "idCounter": 5}]},
        {"status": [{"error": "", "success": true}]}
    ]"#;

    #[test]
    fn reads_known_and_unknown_aspects() {
        let doc = read_document(SAMPLE.as_bytes()).unwrap();
        assert_eq!(doc.nodes.len(), 2);
        assert_eq!(doc.edges[0].source, ExternalAspectId::new(1));
        assert_eq!(doc.network_name(), Some("Tiny"));
        let metadata = doc.metadata.as_ref().unwrap();
        assert!(metadata.get("nodes").is_some());
        assert!(metadata.get("edges").is_some());
        assert_eq!(
            doc.namespaces.as_ref().unwrap().prefixes.get("ncbigene").map(String::as_str),
            Some("http://identifiers.org/ncbigene/")
        );

        let visual = &doc.opaque["cyVisualProperties"];
        assert_eq!(visual.len(), 2);
        assert_eq!(visual[1].data, json!({"properties_of": "nodes:default"}));
        assert!(!doc.opaque.contains_key(STATUS));
    }

    #[test]
    fn post_metadata_completes_earlier_entry() {
        let stream = r#"[
            {"metaData": [{"name": "nodes", "version": "1.0", "consistencyGroup": 1,
                           "properties": [{"name": "source", "value": "import"}],
                           "checksum": "abc"}]},
            {"nodes": [{"@id": 1}]},
            {"postMetaData": [{"name": "nodes", "idCounter": 1, "elementCount": 1}]}
        ]"#;
        let doc = read_document(stream.as_bytes()).unwrap();

        let nodes = doc.metadata.as_ref().unwrap().get("nodes").unwrap();
        assert_eq!(nodes.version.as_deref(), Some("1.0"));
        assert_eq!(nodes.consistency_group, Some(1));
        assert_eq!(nodes.id_counter, Some(1));
        assert_eq!(nodes.element_count, Some(1));
        assert_eq!(nodes.properties.len(), 1);
        assert_eq!(nodes.extra.get("checksum"), Some(&json!("abc")));

        let written = read_document(write_document_to_vec(&doc).unwrap().as_slice()).unwrap();
        assert_eq!(written.metadata, doc.metadata);
    }

    #[test]
    fn written_document_reads_back() {
        let doc = read_document(SAMPLE.as_bytes()).unwrap();
        let bytes = write_document_to_vec(&doc).unwrap();
        let again = read_document(bytes.as_slice()).unwrap();
        assert_eq!(again, doc);
    }

    #[test]
    fn rejects_non_array_input() {
        let result = read_document(r#"{"nodes": []}"#.as_bytes());
        assert!(matches!(result, Err(CoreError::Serialization(_))));
    }

    #[test]
    fn set_network_name_replaces_existing() {
        let mut doc = CxDocument::default();
        doc.set_network_name("first");
        doc.set_network_name("second");
        assert_eq!(doc.network_attributes.len(), 1);
        assert_eq!(doc.network_name(), Some("second"));
    }

    #[test]
    fn element_codec_concatenates_independent_units() {
        let codec = JsonElementCodec;
        let elements = vec![
            OpaqueAspectElement::new("x", json!({"a": 1})),
            OpaqueAspectElement::new("x", json!("text\nwith newline")),
            OpaqueAspectElement::new("x", json!([1, 2, 3])),
        ];
        let blob = elements
            .iter()
            .map(|e| codec.encode(e).unwrap())
            .collect::<Vec<_>>()
            .join("\n");
        assert_eq!(codec.decode_all("x", &blob).unwrap(), elements);
    }

    #[test]
    fn element_codec_rejects_truncated_blob() {
        let result = JsonElementCodec.decode_all("x", r#"{"a": 1}
{"b": "#);
        assert!(result.is_err());
    }

    #[test]
    fn empty_blob_decodes_to_no_elements() {
        assert!(JsonElementCodec.decode_all("x", "").unwrap().is_empty());
    }
}
