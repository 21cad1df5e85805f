//! Core error types for mgraph-core.
//!
//! Uses `thiserror` for structured, matchable error variants covering
//! the failure modes of the arena graph and its bookkeeping.

use crate::id::NodeId;
use thiserror::Error;

/// Core errors produced by the mgraph-core crate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A node id does not denote a live node.
    #[error("node not found: NodeId({id})", id = id.0)]
    NodeNotFound { id: NodeId },

    /// A path is already registered to another node.
    #[error("{path} has already been defined!")]
    DuplicatePath { path: String },

    /// A node cannot be removed while other nodes still point at it.
    #[error("node {id} is still referenced by {usages} edge(s)")]
    NodeInUse { id: NodeId, usages: usize },

    /// No edge exists at the given slot and offset.
    #[error("no edge at {owner}.{slot}[{offset}]")]
    EdgeNotFound {
        owner: NodeId,
        slot: String,
        offset: usize,
    },

    /// An insertion offset lies beyond the end of a slot.
    #[error("offset {offset} out of range for {owner}.{slot} (length {len})")]
    OffsetOutOfRange {
        owner: NodeId,
        slot: String,
        offset: usize,
        len: usize,
    },

    /// A multiplicity with lower bound above upper bound.
    #[error("invalid multiplicity: lower bound {lower} exceeds upper bound {upper}")]
    InvalidMultiplicity { lower: u32, upper: u32 },

    /// A transaction is already open on the graph.
    #[error("a transaction is already in progress")]
    TransactionInProgress,

    /// Commit or rollback requested without an open transaction.
    #[error("no transaction in progress")]
    NoTransaction,
}
