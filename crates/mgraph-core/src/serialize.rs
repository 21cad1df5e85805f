//! Canonical, history-independent serialization of a [`MetaGraph`].
//!
//! Two graphs holding the same elements must serialize to the same bytes
//! no matter how they were built, so the form never mentions node ids:
//!
//! - Path-addressable nodes are listed once, keyed by path, in sorted order.
//! - Edges to path-addressable nodes serialize as `{"ref": path}`.
//! - Anonymous nodes are inlined under the edge that reaches them.
//! - Derived back-reference slots have set semantics and are sorted by
//!   their rendered form.
//!
//! The node and usage counts are included so that a leaked anonymous node
//! or a stale index entry still shows up as a difference.
//!
//! The fingerprint is a blake3 hash of the serialized bytes.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;

use crate::graph::MetaGraph;
use crate::id::NodeId;
use crate::node::{slot, NodeKind};
use crate::source::SourceInformation;

/// The canonical form of a whole graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SerializedGraph {
    pub nodes: usize,
    pub usages: usize,
    pub elements: BTreeMap<String, SerializedNode>,
}

/// The canonical form of one node and everything inlined under it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SerializedNode {
    pub kind: NodeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceInformation>,
    #[serde(skip_serializing_if = "is_false")]
    pub synthetic: bool,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub slots: BTreeMap<String, Vec<SlotValue>>,
}

/// One slot entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SlotValue {
    Ref {
        #[serde(rename = "ref")]
        path: String,
    },
    Node(Box<SerializedNode>),
    /// An anonymous node reached again while it is being inlined.
    Cycle { cycle: &'static str },
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl MetaGraph {
    /// Builds the canonical form.
    pub fn snapshot(&self) -> SerializedGraph {
        let mut elements = BTreeMap::new();
        for (path, id) in self.paths() {
            let mut visiting = HashSet::new();
            if let Some(node) = self.serialize_node(id, &mut visiting) {
                elements.insert(path.to_string(), node);
            }
        }
        SerializedGraph {
            nodes: self.node_count(),
            usages: self.usages().len(),
            elements,
        }
    }

    /// Canonical JSON bytes.
    pub fn serialize(&self) -> Vec<u8> {
        // No map in the canonical form has non-string keys.
        serde_json::to_vec(&self.snapshot()).expect("canonical graph serialization should never fail")
    }

    /// blake3 hash of [`serialize`](Self::serialize).
    pub fn fingerprint(&self) -> blake3::Hash {
        blake3::hash(&self.serialize())
    }

    fn serialize_node(&self, id: NodeId, visiting: &mut HashSet<NodeId>) -> Option<SerializedNode> {
        let node = self.node(id)?;
        visiting.insert(id);

        let mut slots: BTreeMap<String, Vec<SlotValue>> = BTreeMap::new();
        for edge in self.outgoing(id) {
            let value = self.slot_value(edge.target, visiting);
            slots.entry(edge.slot).or_default().push(value);
        }
        for name in slot::DERIVED {
            if let Some(values) = slots.get_mut(name) {
                values.sort_by_cached_key(|v| serde_json::to_string(v).unwrap_or_default());
            }
        }

        visiting.remove(&id);
        Some(SerializedNode {
            kind: node.kind.clone(),
            source: node.source.clone(),
            synthetic: node.synthetic,
            slots,
        })
    }

    fn slot_value(&self, target: NodeId, visiting: &mut HashSet<NodeId>) -> SlotValue {
        match self.node(target) {
            Some(node) => match &node.path {
                Some(path) => SlotValue::Ref { path: path.clone() },
                None if visiting.contains(&target) => SlotValue::Cycle {
                    cycle: node.kind.label(),
                },
                None => match self.serialize_node(target, visiting) {
                    Some(inner) => SlotValue::Node(Box::new(inner)),
                    None => SlotValue::Cycle { cycle: "missing" },
                },
            },
            None => SlotValue::Cycle { cycle: "missing" },
        }
    }
}
