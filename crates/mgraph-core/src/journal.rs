//! Append-only mutation journal backing compilation rollback.
//!
//! While a transaction is open, every primitive graph mutation appends one
//! [`Mutation`] carrying enough state to undo it exactly. Rollback replays
//! the journal in reverse; commit simply discards it.

use serde::{Deserialize, Serialize};

use crate::id::NodeId;
use crate::node::NodeKind;

/// A recorded primitive mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Mutation {
    /// A node was created (undo discards it).
    NodeCreated { node: NodeId },
    /// A node was removed; it stays tombstoned until commit so undo can
    /// revive it under the same id.
    NodeRemoved { node: NodeId },
    /// A node payload was replaced.
    KindReplaced { node: NodeId, before: NodeKind },
    /// An edge was inserted at `offset`, shifting later edges up.
    EdgeInserted {
        owner: NodeId,
        slot: String,
        offset: u32,
        target: NodeId,
        containment: bool,
    },
    /// An edge was removed from `offset`, shifting later edges down.
    EdgeRemoved {
        owner: NodeId,
        slot: String,
        offset: u32,
        target: NodeId,
        containment: bool,
    },
}

impl Mutation {
    /// The edge counterpart that undoes this edge mutation. Node mutations
    /// have no forward counterpart and return `None`.
    pub fn inverse_edge(&self) -> Option<Mutation> {
        match self {
            Mutation::EdgeInserted {
                owner,
                slot,
                offset,
                target,
                containment,
            } => Some(Mutation::EdgeRemoved {
                owner: *owner,
                slot: slot.clone(),
                offset: *offset,
                target: *target,
                containment: *containment,
            }),
            Mutation::EdgeRemoved {
                owner,
                slot,
                offset,
                target,
                containment,
            } => Some(Mutation::EdgeInserted {
                owner: *owner,
                slot: slot.clone(),
                offset: *offset,
                target: *target,
                containment: *containment,
            }),
            _ => None,
        }
    }
}

/// The mutation log of one open transaction.
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Vec<Mutation>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, mutation: Mutation) {
        self.entries.push(mutation);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Mutation] {
        &self.entries
    }

    /// Nodes created during the transaction.
    pub fn created_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.entries.iter().filter_map(|m| match m {
            Mutation::NodeCreated { node } => Some(*node),
            _ => None,
        })
    }

    /// Consumes the journal, yielding entries newest first.
    pub fn into_reversed(self) -> impl Iterator<Item = Mutation> {
        self.entries.into_iter().rev()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_inverse_swaps_direction() {
        let inserted = Mutation::EdgeInserted {
            owner: NodeId(1),
            slot: "properties".into(),
            offset: 2,
            target: NodeId(4),
            containment: true,
        };
        let removed = inserted.inverse_edge().unwrap();
        assert!(matches!(removed, Mutation::EdgeRemoved { offset: 2, .. }));
        assert_eq!(removed.inverse_edge().unwrap(), inserted);
    }

    #[test]
    fn node_mutations_have_no_edge_inverse() {
        assert!(Mutation::NodeCreated { node: NodeId(0) }.inverse_edge().is_none());
    }

    #[test]
    fn reversed_iteration() {
        let mut journal = Journal::new();
        journal.record(Mutation::NodeCreated { node: NodeId(1) });
        journal.record(Mutation::NodeCreated { node: NodeId(2) });
        assert_eq!(journal.created_nodes().collect::<Vec<_>>(), vec![NodeId(1), NodeId(2)]);
        let order: Vec<Mutation> = journal.into_reversed().collect();
        assert_eq!(order[0], Mutation::NodeCreated { node: NodeId(2) });
    }

    #[test]
    fn serialized_with_type_tag() {
        let json = serde_json::to_string(&Mutation::NodeRemoved { node: NodeId(3) }).unwrap();
        assert_eq!(json, r#"{"type":"NodeRemoved","node":3}"#);
    }
}
