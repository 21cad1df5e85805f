//! Runtime error types.
//!
//! Runtime failures never touch the metamodel graph. A failed construction
//! is undone on the heap before the error is returned.

use mgraph_core::NodeId;
use serde::{Deserialize, Serialize};

use crate::value::InstanceId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
pub enum RuntimeError {
    #[error("class '{path}' is not defined")]
    UnknownClass { path: String },

    #[error("function '{signature}' is not defined")]
    UnknownFunction { signature: String },

    #[error("The property '{property}' can't be found in the type '{class}' or in its hierarchy.")]
    UnknownProperty { property: String, class: String },

    #[error("instance {id} does not exist")]
    UnknownInstance { id: InstanceId },

    #[error("The variable '{name}' is unknown!")]
    UnknownVariable { name: String },

    #[error("Type Error: '{found}' not a subtype of '{expected}' ({context})")]
    TypeMismatch {
        context: String,
        expected: String,
        found: String,
    },

    #[error(
        "Error instantiating the type '{class}'. The property '{property}' has a multiplicity range of {expected} when the given list has a cardinality equal to {given}"
    )]
    Multiplicity {
        property: String,
        class: String,
        expected: String,
        given: usize,
    },

    #[error("function '{function}' expects {expected} argument(s), {given} given")]
    ArgumentCount {
        function: String,
        expected: usize,
        given: usize,
    },

    #[error("Constraint :[{constraint}] violated in the Class {class}{}", render_message(.message))]
    ConstraintViolation {
        constraint: String,
        class: String,
        message: Option<String>,
    },

    #[error("evaluation depth limit ({limit}) exceeded in '{function}'")]
    RecursionLimitExceeded { function: String, limit: usize },

    #[error("integer overflow in '{operator}'")]
    IntegerOverflow { operator: String },

    #[error("operator '{operator}' cannot be applied to {found}")]
    InvalidOperand { operator: String, found: String },

    #[error("malformed graph: node {node} has no {slot}")]
    Malformed { node: NodeId, slot: String },
}

fn render_message(message: &Option<String>) -> String {
    match message {
        Some(message) => format!(", Message: {}", message),
        None => String::new(),
    }
}

impl RuntimeError {
    pub(crate) fn malformed(node: NodeId, slot: &str) -> Self {
        RuntimeError::Malformed {
            node,
            slot: slot.to_string(),
        }
    }

    /// Whether this is a constraint violation, which callers may recover
    /// from without any consistency concern.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, RuntimeError::ConstraintViolation { .. })
    }
}
