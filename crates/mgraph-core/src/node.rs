//! Node payloads of the metamodel graph.
//!
//! Every language element is a [`GraphNode`]: a closed [`NodeKind`] tag with
//! a per-kind payload, an optional dotted path, and optional source
//! information. Children hang off named *slots* (see [`slot`]); slot edges
//! live in the arena, not in the payload.
//!
//! The kind set is fixed, so the resolution and validation passes dispatch
//! on it with exhaustive `match`es.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::multiplicity::Multiplicity;
use crate::source::SourceInformation;
use crate::usage::ReferenceUsage;

// ---------------------------------------------------------------------------
// Slot vocabulary
// ---------------------------------------------------------------------------

/// Names of the child slots used by the compiler.
pub mod slot {
    pub const PROPERTIES: &str = "properties";
    pub const PROPERTIES_FROM_ASSOCIATIONS: &str = "propertiesFromAssociations";
    pub const GENERALIZATIONS: &str = "generalizations";
    pub const SPECIALIZATIONS: &str = "specializations";
    pub const CONSTRAINTS: &str = "constraints";
    pub const VALUES: &str = "values";
    pub const OWNER: &str = "owner";
    pub const GENERIC_TYPE: &str = "genericType";
    pub const MULTIPLICITY: &str = "multiplicity";
    pub const DEFAULT_VALUE: &str = "defaultValue";
    pub const RAW_TYPE: &str = "rawType";
    pub const TYPE_ARGUMENTS: &str = "typeArguments";
    pub const MULTIPLICITY_ARGUMENTS: &str = "multiplicityArguments";
    pub const PARAMETERS: &str = "parameters";
    pub const RETURN_TYPE: &str = "returnType";
    pub const RETURN_MULTIPLICITY: &str = "returnMultiplicity";
    pub const EXPRESSION_SEQUENCE: &str = "expressionSequence";
    pub const FUNCTION_DEFINITION: &str = "functionDefinition";
    pub const MESSAGE_FUNCTION: &str = "messageFunction";
    pub const ENUMERATION: &str = "enumeration";
    pub const CLASS: &str = "class";
    pub const SOURCE: &str = "source";
    pub const KEY_VALUES: &str = "keyValues";
    pub const VALUE: &str = "value";
    pub const RECEIVER: &str = "receiver";
    pub const FUNCTION: &str = "function";
    /// Same-arity functions a call may denote until argument types pick one.
    pub const OVERLOADS: &str = "overloads";
    pub const ARGUMENTS: &str = "arguments";
    pub const OPERANDS: &str = "operands";
    /// Property bound to a property access or key-value expression.
    pub const PROPERTY: &str = "property";
    pub const INFERRED_TYPE: &str = "inferredType";
    pub const INFERRED_MULTIPLICITY: &str = "inferredMultiplicity";

    /// Back-reference slots maintained by the compiler rather than written
    /// in source. They have set semantics and do not make their owner
    /// depend on the target.
    pub const DERIVED: [&str; 2] = [PROPERTIES_FROM_ASSOCIATIONS, SPECIALIZATIONS];

    pub fn is_derived(slot: &str) -> bool {
        DERIVED.contains(&slot)
    }
}

// ---------------------------------------------------------------------------
// Graph node
// ---------------------------------------------------------------------------

/// A unit of the metamodel graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub kind: NodeKind,
    /// Globally unique dotted path; `None` for anonymous structural nodes.
    pub path: Option<String>,
    pub source: Option<SourceInformation>,
    /// Generated internally (e.g. inferred types) rather than from source
    /// text. Edges owned by synthetic nodes are kept out of source-level
    /// usage counts.
    pub synthetic: bool,
}

impl GraphNode {
    pub fn new(kind: NodeKind, path: Option<String>, source: Option<SourceInformation>) -> Self {
        GraphNode {
            kind,
            path,
            source,
            synthetic: false,
        }
    }

    pub fn synthetic(kind: NodeKind, source: Option<SourceInformation>) -> Self {
        GraphNode {
            kind,
            path: None,
            source,
            synthetic: true,
        }
    }

    /// Last `::` segment of the path (the element name), if any.
    pub fn name(&self) -> Option<&str> {
        self.path.as_deref().map(simple_name)
    }
}

/// The closed set of element kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NodeKind {
    PrimitiveType(PrimitiveKind),
    Class,
    Association,
    Enumeration,
    EnumValue { name: String },
    Property { name: String },
    Function(FunctionNode),
    Parameter { name: String },
    /// Zero-argument function body: `expressionSequence` holds the
    /// expressions, the last one producing the result.
    Lambda,
    /// Wraps the lambda computing a property's default value.
    DefaultValue,
    Constraint(ConstraintNode),
    GenericType(GenericTypeNode),
    Multiplicity(Multiplicity),
    Stub(StubNode),
    Expression(ExpressionNode),
}

impl NodeKind {
    /// Short label used in diagnostics.
    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::PrimitiveType(_) => "PrimitiveType",
            NodeKind::Class => "Class",
            NodeKind::Association => "Association",
            NodeKind::Enumeration => "Enumeration",
            NodeKind::EnumValue { .. } => "EnumValue",
            NodeKind::Property { .. } => "Property",
            NodeKind::Function(_) => "Function",
            NodeKind::Parameter { .. } => "Parameter",
            NodeKind::Lambda => "LambdaFunction",
            NodeKind::DefaultValue => "DefaultValue",
            NodeKind::Constraint(_) => "Constraint",
            NodeKind::GenericType(_) => "GenericType",
            NodeKind::Multiplicity(_) => "Multiplicity",
            NodeKind::Stub(_) => "Stub",
            NodeKind::Expression(_) => "Expression",
        }
    }

    /// Kinds that may appear as the raw type of a generic type.
    pub fn is_type(&self) -> bool {
        matches!(
            self,
            NodeKind::PrimitiveType(_) | NodeKind::Class | NodeKind::Enumeration
        )
    }
}

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Built-in primitive types. Each is a graph node whose path is its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrimitiveKind {
    Any,
    Nil,
    Boolean,
    String,
    Number,
    Integer,
    Float,
    Date,
}

impl PrimitiveKind {
    pub const ALL: [PrimitiveKind; 8] = [
        PrimitiveKind::Any,
        PrimitiveKind::Nil,
        PrimitiveKind::Boolean,
        PrimitiveKind::String,
        PrimitiveKind::Number,
        PrimitiveKind::Integer,
        PrimitiveKind::Float,
        PrimitiveKind::Date,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            PrimitiveKind::Any => "Any",
            PrimitiveKind::Nil => "Nil",
            PrimitiveKind::Boolean => "Boolean",
            PrimitiveKind::String => "String",
            PrimitiveKind::Number => "Number",
            PrimitiveKind::Integer => "Integer",
            PrimitiveKind::Float => "Float",
            PrimitiveKind::Date => "Date",
        }
    }

    pub fn from_name(name: &str) -> Option<PrimitiveKind> {
        PrimitiveKind::ALL.iter().copied().find(|p| p.name() == name)
    }

    /// Primitive subtyping: Integer and Float under Number, Nil under
    /// everything, everything under Any.
    pub fn is_subtype_of(&self, other: &PrimitiveKind) -> bool {
        self == other
            || *other == PrimitiveKind::Any
            || *self == PrimitiveKind::Nil
            || (*other == PrimitiveKind::Number
                && matches!(self, PrimitiveKind::Integer | PrimitiveKind::Float))
    }
}

/// A concrete function definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionNode {
    pub name: String,
    /// Qualified name without the signature, e.g. `model::isBig`.
    pub qualified_name: String,
    pub arity: usize,
}

/// Constraint metadata. Owner, external id, level and message are optional
/// sub-records of a single constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstraintNode {
    pub name: String,
    pub owner: Option<String>,
    pub external_id: Option<String>,
    pub enforcement_level: EnforcementLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EnforcementLevel {
    #[default]
    Error,
    Warn,
}

/// Generic type payload. Raw type, type arguments and multiplicity
/// arguments are slots; an inferred type also records the expression slot
/// it was inferred for.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GenericTypeNode {
    pub inferred: bool,
    /// Back-pointer to the expression edge this type was inferred for.
    /// Identity-based, so it is left out of the serialized form.
    #[serde(skip)]
    pub inferred_for: Option<ReferenceUsage>,
}

impl GenericTypeNode {
    pub fn declared() -> Self {
        GenericTypeNode::default()
    }

    pub fn inferred(usage: ReferenceUsage) -> Self {
        GenericTypeNode {
            inferred: true,
            inferred_for: Some(usage),
        }
    }
}

/// An unresolved reference: textual path, the import context at the point
/// of use, and what kind of element it must denote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StubNode {
    pub reference: String,
    pub imports: ImportGroup,
    pub expects: StubTarget,
}

/// Import context of one source: the package of the referencing element and
/// the packages imported with `import pkg::*;`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ImportGroup {
    pub package: String,
    pub imports: Vec<String>,
}

/// Category a stub must resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StubTarget {
    /// Class, enumeration or primitive type.
    Type,
    Class,
    Enumeration,
    Function { arity: usize },
}

impl StubTarget {
    pub fn label(&self) -> &'static str {
        match self {
            StubTarget::Type => "Type",
            StubTarget::Class => "Class",
            StubTarget::Enumeration => "Enumeration",
            StubTarget::Function { .. } => "Function",
        }
    }
}

/// Expression nodes found in function bodies, default values and
/// constraints. Operands hang off slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExpressionNode {
    Literal(Literal),
    /// `[a, b, ...]`; elements in `values`.
    Collection,
    /// `Enum.VALUE`; the enumeration in slot `enumeration`.
    EnumValue { value: String },
    /// `^Class(k=v, ...)`; class in `class`, pairs in `keyValues`.
    New,
    /// `^$x(k=v, ...)`; copied instance in `source`, overrides in `keyValues`.
    Copy,
    /// `k = v`; value expression in `value`.
    KeyValue { key: String },
    Variable { name: String },
    /// `receiver.property`.
    PropertyAccess { property: String },
    /// Call to a user function in slot `function`, arguments in `arguments`.
    Call,
    Operator(Operator),
}

/// Primitive-valued leaves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
}

impl Literal {
    pub fn primitive(&self) -> PrimitiveKind {
        match self {
            Literal::String(_) => PrimitiveKind::String,
            Literal::Integer(_) => PrimitiveKind::Integer,
            Literal::Float(_) => PrimitiveKind::Float,
            Literal::Boolean(_) => PrimitiveKind::Boolean,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::String(s) => write!(f, "'{}'", s),
            Literal::Integer(i) => write!(f, "{}", i),
            Literal::Float(x) => write!(f, "{}", x),
            Literal::Boolean(b) => write!(f, "{}", b),
        }
    }
}

/// Built-in operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
    Not,
    Add,
    Sub,
    Mul,
    Size,
    IsEmpty,
    IsNotEmpty,
}

impl Operator {
    pub fn symbol(&self) -> &'static str {
        match self {
            Operator::Eq => "==",
            Operator::NotEq => "!=",
            Operator::Lt => "<",
            Operator::LtEq => "<=",
            Operator::Gt => ">",
            Operator::GtEq => ">=",
            Operator::And => "&&",
            Operator::Or => "||",
            Operator::Not => "!",
            Operator::Add => "+",
            Operator::Sub => "-",
            Operator::Mul => "*",
            Operator::Size => "size",
            Operator::IsEmpty => "isEmpty",
            Operator::IsNotEmpty => "isNotEmpty",
        }
    }

    pub fn arity(&self) -> usize {
        match self {
            Operator::Not | Operator::Size | Operator::IsEmpty | Operator::IsNotEmpty => 1,
            _ => 2,
        }
    }
}

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

/// Strips a function signature suffix (`(...)...`) from a path.
pub fn strip_signature(path: &str) -> &str {
    match path.find('(') {
        Some(idx) => &path[..idx],
        None => path,
    }
}

/// The element name: the last `::` segment, signature removed.
pub fn simple_name(path: &str) -> &str {
    let path = strip_signature(path);
    match path.rfind("::") {
        Some(idx) => &path[idx + 2..],
        None => path,
    }
}

/// The package part of a qualified path (`""` for root elements).
pub fn package_of(path: &str) -> &str {
    let path = strip_signature(path);
    match path.rfind("::") {
        Some(idx) => &path[..idx],
        None => "",
    }
}
