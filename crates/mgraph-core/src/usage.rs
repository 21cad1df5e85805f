//! Reference-Usage Index: the inverse of the live edge set.
//!
//! Every edge `owner.slot[offset] -> target` is recorded as a
//! [`ReferenceUsage`] under `target`. The index is maintained by
//! [`MetaGraph`](crate::graph::MetaGraph) on every edge insertion, removal
//! and offset shift; it is never rebuilt by scanning the graph.
//!
//! Edges owned by synthetic nodes go to a separate bucket so that
//! user-visible usage queries only count source-attributable edges.

use std::collections::HashMap;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::id::NodeId;

/// One edge seen from its target: `owner` points at the target through
/// `slot` at position `offset`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReferenceUsage {
    pub owner: NodeId,
    pub slot: String,
    pub offset: u32,
}

impl ReferenceUsage {
    pub fn new(owner: NodeId, slot: impl Into<String>, offset: u32) -> Self {
        ReferenceUsage {
            owner,
            slot: slot.into(),
            offset,
        }
    }
}

/// Target -> usages, split into source-attributable and synthetic buckets.
#[derive(Debug, Clone, Default)]
pub struct ReferenceIndex {
    source: HashMap<NodeId, IndexSet<ReferenceUsage>>,
    synthetic: HashMap<NodeId, IndexSet<ReferenceUsage>>,
    len: usize,
}

impl ReferenceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new edge.
    pub fn on_edge_added(&mut self, usage: ReferenceUsage, target: NodeId, synthetic: bool) {
        let bucket = if synthetic {
            &mut self.synthetic
        } else {
            &mut self.source
        };
        if bucket.entry(target).or_default().insert(usage) {
            self.len += 1;
        }
    }

    /// Forgets a removed edge. Empty entries are dropped so that a target
    /// with no remaining usages leaves no trace.
    pub fn on_edge_removed(&mut self, usage: &ReferenceUsage, target: NodeId, synthetic: bool) {
        let bucket = if synthetic {
            &mut self.synthetic
        } else {
            &mut self.source
        };
        if let Some(set) = bucket.get_mut(&target) {
            if set.shift_remove(usage) {
                self.len -= 1;
            }
            if set.is_empty() {
                bucket.remove(&target);
            }
        }
    }

    /// Source-attributable usages of `target`, sorted for determinism.
    pub fn usages_of(&self, target: NodeId) -> Vec<ReferenceUsage> {
        sorted(self.source.get(&target))
    }

    /// Usages created by synthetic nodes (inferred types and the like).
    pub fn synthetic_usages_of(&self, target: NodeId) -> Vec<ReferenceUsage> {
        sorted(self.synthetic.get(&target))
    }

    /// Number of usages of `target` across both buckets.
    pub fn usage_count(&self, target: NodeId) -> usize {
        self.source.get(&target).map_or(0, IndexSet::len)
            + self.synthetic.get(&target).map_or(0, IndexSet::len)
    }

    /// Total number of recorded usages.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

fn sorted(set: Option<&IndexSet<ReferenceUsage>>) -> Vec<ReferenceUsage> {
    let mut usages: Vec<ReferenceUsage> = set.map(|s| s.iter().cloned().collect()).unwrap_or_default();
    usages.sort();
    usages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_remove_are_inverse() {
        let mut index = ReferenceIndex::new();
        let usage = ReferenceUsage::new(NodeId(1), "rawType", 0);
        index.on_edge_added(usage.clone(), NodeId(5), false);
        assert_eq!(index.usages_of(NodeId(5)), vec![usage.clone()]);
        assert_eq!(index.len(), 1);

        index.on_edge_removed(&usage, NodeId(5), false);
        assert!(index.usages_of(NodeId(5)).is_empty());
        assert!(index.is_empty());
    }

    #[test]
    fn synthetic_usages_are_kept_apart() {
        let mut index = ReferenceIndex::new();
        index.on_edge_added(ReferenceUsage::new(NodeId(1), "rawType", 0), NodeId(5), false);
        index.on_edge_added(ReferenceUsage::new(NodeId(2), "rawType", 0), NodeId(5), true);

        assert_eq!(index.usages_of(NodeId(5)).len(), 1);
        assert_eq!(index.synthetic_usages_of(NodeId(5)).len(), 1);
        assert_eq!(index.usage_count(NodeId(5)), 2);
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn duplicate_add_is_not_double_counted() {
        let mut index = ReferenceIndex::new();
        let usage = ReferenceUsage::new(NodeId(1), "values", 3);
        index.on_edge_added(usage.clone(), NodeId(2), false);
        index.on_edge_added(usage, NodeId(2), false);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn usages_are_sorted() {
        let mut index = ReferenceIndex::new();
        index.on_edge_added(ReferenceUsage::new(NodeId(9), "values", 1), NodeId(2), false);
        index.on_edge_added(ReferenceUsage::new(NodeId(3), "values", 0), NodeId(2), false);
        let owners: Vec<NodeId> = index.usages_of(NodeId(2)).into_iter().map(|u| u.owner).collect();
        assert_eq!(owners, vec![NodeId(3), NodeId(9)]);
    }
}
