//! Runtime value representation.
//!
//! Every expression evaluates to [`Values`]: an ordered collection whose
//! size is the value's multiplicity. To-one results are a single element,
//! which is why the collection is a `SmallVec` with one inline slot.

use std::fmt;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Identity of an instance in the [`Heap`](crate::heap::Heap).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceId(pub u32);

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// A single runtime value. Instances compare by identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    Enum { enumeration: String, value: String },
    Instance(InstanceId),
}

/// An evaluated collection.
pub type Values = SmallVec<[Value; 1]>;

impl Value {
    /// Name of the runtime type, as used in error messages. Instances report
    /// `Instance`; their class is known to the heap only.
    pub fn type_name(&self) -> &str {
        match self {
            Value::Boolean(_) => "Boolean",
            Value::Integer(_) => "Integer",
            Value::Float(_) => "Float",
            Value::String(_) => "String",
            Value::Enum { enumeration, .. } => enumeration,
            Value::Instance(_) => "Instance",
        }
    }

    pub fn as_instance(&self) -> Option<InstanceId> {
        match self {
            Value::Instance(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<InstanceId> for Value {
    fn from(id: InstanceId) -> Self {
        Value::Instance(id)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "{}", s),
            Value::Enum { enumeration, value } => write!(f, "{}.{}", enumeration, value),
            Value::Instance(id) => write!(f, "{}", id),
        }
    }
}
