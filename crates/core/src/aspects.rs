use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Property pair used by several CX aspects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NameValue {
    pub name: String,
    pub value: String,
}

/// One entry of the CX `metaData` aspect: what an aspect is, its version and
/// its id bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaDataElement {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_counter: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consistency_group: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<NameValue>,
    /// Keys this model does not name, kept for the round trip.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MetaDataElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            id_counter: None,
            element_count: None,
            consistency_group: None,
            last_update: None,
            properties: Vec::new(),
            extra: Map::new(),
        }
    }

    /// Folds a later description of the same aspect into this one. Fields the
    /// later entry sets win; the rest keep their earlier values.
    pub fn merge(&mut self, later: MetaDataElement) {
        self.version = later.version.or(self.version.take());
        self.id_counter = later.id_counter.or(self.id_counter);
        self.element_count = later.element_count.or(self.element_count);
        self.consistency_group = later.consistency_group.or(self.consistency_group);
        self.last_update = later.last_update.or(self.last_update);
        for property in later.properties {
            match self.properties.iter_mut().find(|p| p.name == property.name) {
                Some(existing) => existing.value = property.value,
                None => self.properties.push(property),
            }
        }
        self.extra.extend(later.extra);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetaDataCollection {
    pub elements: Vec<MetaDataElement>,
}

impl MetaDataCollection {
    pub fn get(&self, name: &str) -> Option<&MetaDataElement> {
        self.elements.iter().find(|e| e.name == name)
    }

    /// Replaces the entry with the same name, or appends.
    pub fn upsert(&mut self, element: MetaDataElement) {
        match self.elements.iter_mut().find(|e| e.name == element.name) {
            Some(existing) => *existing = element,
            None => self.elements.push(element),
        }
    }

    /// Merges into the entry with the same name, or appends.
    pub fn merge(&mut self, element: MetaDataElement) {
        match self.elements.iter_mut().find(|e| e.name == element.name) {
            Some(existing) => existing.merge(element),
            None => self.elements.push(element),
        }
    }
}

/// CX `@context`: prefix → namespace URI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NamespacesElement {
    pub prefixes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvenanceEvent {
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<ProvenanceEntity>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<NameValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvenanceEntity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_event: Option<Box<ProvenanceEvent>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<NameValue>,
}

/// CX `provenanceHistory`: the chain of events that produced the network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub entity: ProvenanceEntity,
}

/// A fragment of an aspect this system does not interpret. Kept verbatim so
/// it can be written back out unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpaqueAspectElement {
    pub aspect_name: String,
    pub data: serde_json::Value,
}

impl OpaqueAspectElement {
    pub fn new(aspect_name: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            aspect_name: aspect_name.into(),
            data,
        }
    }
}

/// Aspect name → elements in their original order.
pub type OpaqueAspectArchive = BTreeMap<String, Vec<OpaqueAspectElement>>;

/// Outcome of reading a stored singleton aspect.
#[derive(Debug, Clone, PartialEq)]
pub enum AspectRead<T> {
    /// Never stored for this network.
    Absent,
    Present(T),
    /// Stored, but the text could not be parsed back.
    Unreadable { reason: String },
}

impl<T> AspectRead<T> {
    /// Collapses `Absent` and `Unreadable` into `None`.
    pub fn ok(self) -> Option<T> {
        match self {
            Self::Present(value) => Some(value),
            Self::Absent | Self::Unreadable { .. } => None,
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, Self::Present(_))
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Self::Absent)
    }

    pub fn is_unreadable(&self) -> bool {
        matches!(self, Self::Unreadable { .. })
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> AspectRead<U> {
        match self {
            Self::Present(value) => AspectRead::Present(f(value)),
            Self::Absent => AspectRead::Absent,
            Self::Unreadable { reason } => AspectRead::Unreadable { reason },
        }
    }
}
