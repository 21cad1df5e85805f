//! Runtime over a compiled metamodel graph.
//!
//! Evaluates compiled function bodies and constructs instances the way the
//! language's `new`, copy and `dynamicNew` do: default values, multiplicity
//! checks, reverse association wiring and constraint evaluation. The graph
//! is borrowed read-only; instances live in a [`Heap`].

pub mod construct;
pub mod error;
mod eval;
pub mod heap;
pub mod options;
pub mod runtime;
pub mod value;

pub use construct::{ConstraintOutcome, ConstraintsOverride, DynamicNewOverrides, KeyValues};
pub use error::RuntimeError;
pub use heap::{GetterOverride, Heap, HeapMark, Instance};
pub use options::RuntimeOptions;
pub use runtime::Runtime;
pub use value::{InstanceId, Value, Values};
