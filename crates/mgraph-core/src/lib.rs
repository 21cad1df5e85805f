//! Metamodel graph core: node payloads, the arena graph, the reference
//! usage index, the mutation journal and canonical serialization.

pub mod error;
pub mod graph;
pub mod id;
pub mod journal;
pub mod multiplicity;
pub mod node;
pub mod query;
pub mod serialize;
pub mod source;
pub mod usage;

// Re-export commonly used types
pub use error::CoreError;
pub use graph::{EdgeView, MetaGraph, SlotEdge};
pub use id::NodeId;
pub use journal::{Journal, Mutation};
pub use multiplicity::Multiplicity;
pub use node::{
    package_of, simple_name, slot, strip_signature, ConstraintNode, EnforcementLevel,
    ExpressionNode, FunctionNode, GenericTypeNode, GraphNode, ImportGroup, Literal, NodeKind,
    Operator, PrimitiveKind, StubNode, StubTarget,
};
pub use serialize::{SerializedGraph, SerializedNode, SlotValue};
pub use source::SourceInformation;
pub use usage::{ReferenceIndex, ReferenceUsage};
