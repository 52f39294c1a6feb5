//! State snapshot model
//!
//! A snapshot is the full serialized state document for a stack: a versioned
//! resource list plus whatever else the engine stores alongside it. Fields
//! this crate does not model are captured and round-tripped untouched so a
//! mutated snapshot can be re-imported without losing engine data.

use crate::urn::{TypeToken, Urn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The full state document for a stack
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    #[serde(default = "default_version")]
    pub version: u64,

    #[serde(default)]
    pub resources: Vec<ResourceRecord>,

    /// Engine-owned fields preserved across deserialize/serialize
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_version() -> u64 {
    3
}

impl Default for StateSnapshot {
    fn default() -> Self {
        Self {
            version: default_version(),
            resources: Vec::new(),
            extra: Map::new(),
        }
    }
}

/// A single managed resource within a snapshot
///
/// URNs are unique within a snapshot; a record's parent, when present,
/// must itself be addressable by URN.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub urn: Urn,

    #[serde(rename = "type")]
    pub ty: TypeToken,

    /// Provider-assigned identifier
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,

    /// Ownership edge to the parent resource
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Urn>,

    /// Whether the resource is externally managed (adopted)
    #[serde(default)]
    pub custom: bool,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub outputs: Map<String, Value>,

    /// Engine-owned fields preserved across deserialize/serialize
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StateSnapshot {
    /// Find the index of the resource with the given URN
    pub fn resource_index(&self, urn: &Urn) -> Option<usize> {
        self.resources.iter().position(|r| &r.urn == urn)
    }

    /// Insert or update the record for `urn`, keeping URNs unique
    ///
    /// When a record with the same URN already exists it is rewritten in
    /// place (its engine-owned fields are kept); otherwise a new record is
    /// appended. Either way the record ends up marked `custom`, which is
    /// what adoption requires.
    pub fn upsert_resource(&mut self, urn: Urn, parent: Option<Urn>, id: &str, ty: TypeToken) {
        match self.resource_index(&urn) {
            Some(index) => {
                let record = &mut self.resources[index];
                record.parent = parent;
                record.custom = true;
                record.id = id.to_string();
                record.ty = ty;
            }
            None => self.resources.push(ResourceRecord {
                urn,
                ty,
                id: id.to_string(),
                parent,
                custom: true,
                outputs: Map::new(),
                extra: Map::new(),
            }),
        }
    }
}
