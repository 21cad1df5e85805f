//! Declaration tree produced by a parser and consumed by the graph builder.
//!
//! Every declaration and expression carries the exact
//! [`SourceInformation`] of the text it came from. References to other
//! elements stay textual ([`TypeRef`]); binding them is the compiler's job.

use std::fmt;

use mgraph_core::{EnforcementLevel, Literal, Multiplicity, Operator, SourceInformation};

/// The parse result for one source.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSource {
    pub source_id: String,
    pub imports: Vec<Import>,
    pub declarations: Vec<Declaration>,
}

impl ParsedSource {
    /// Packages imported with `import pkg::*;`, in order.
    pub fn import_packages(&self) -> Vec<String> {
        self.imports.iter().map(|i| i.package.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Import {
    pub package: String,
    pub source: SourceInformation,
}

/// A top-level declaration.
#[derive(Debug, Clone, PartialEq)]
pub enum Declaration {
    Class(ClassDecl),
    Association(AssociationDecl),
    Enumeration(EnumerationDecl),
    Function(FunctionDecl),
}

impl Declaration {
    /// The path the declaration is registered under. Functions use their
    /// full signature path.
    pub fn path(&self) -> String {
        match self {
            Declaration::Class(c) => c.path.clone(),
            Declaration::Association(a) => a.path.clone(),
            Declaration::Enumeration(e) => e.path.clone(),
            Declaration::Function(f) => f.signature(),
        }
    }

    pub fn source(&self) -> &SourceInformation {
        match self {
            Declaration::Class(c) => &c.source,
            Declaration::Association(a) => &a.source,
            Declaration::Enumeration(e) => &e.source,
            Declaration::Function(f) => &f.source,
        }
    }
}

/// A textual reference to a type, class, enumeration or function.
///
/// Declared types may carry arguments: `Pair<String, Integer|1, *>` has two
/// type arguments and two multiplicity arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeRef {
    pub path: String,
    pub type_arguments: Vec<TypeRef>,
    pub multiplicity_arguments: Vec<Multiplicity>,
    pub source: SourceInformation,
}

impl TypeRef {
    pub fn new(path: impl Into<String>, source: SourceInformation) -> Self {
        TypeRef {
            path: path.into(),
            type_arguments: Vec::new(),
            multiplicity_arguments: Vec::new(),
            source,
        }
    }

    pub fn has_arguments(&self) -> bool {
        !self.type_arguments.is_empty() || !self.multiplicity_arguments.is_empty()
    }
}

/// Renders the reference as written, arguments included.
impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)?;
        if !self.has_arguments() {
            return Ok(());
        }
        f.write_str("<")?;
        for (i, argument) in self.type_arguments.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", argument)?;
        }
        if !self.multiplicity_arguments.is_empty() {
            f.write_str("|")?;
            for (i, multiplicity) in self.multiplicity_arguments.iter().enumerate() {
                if i > 0 {
                    f.write_str(",")?;
                }
                let bracketed = multiplicity.to_string();
                f.write_str(bracketed.trim_start_matches('[').trim_end_matches(']'))?;
            }
        }
        f.write_str(">")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDecl {
    pub path: String,
    pub generalizations: Vec<TypeRef>,
    pub constraints: Vec<ConstraintDecl>,
    pub properties: Vec<PropertyDecl>,
    pub source: SourceInformation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDecl {
    pub name: String,
    pub ty: TypeRef,
    pub multiplicity: Multiplicity,
    pub default: Option<Expr>,
    pub source: SourceInformation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintDecl {
    pub name: String,
    pub owner: Option<String>,
    pub external_id: Option<String>,
    pub enforcement_level: EnforcementLevel,
    pub function: Expr,
    pub message: Option<Expr>,
    pub source: SourceInformation,
}

/// An association with exactly two ends. Each end names the property
/// added to the class on the *other* end.
#[derive(Debug, Clone, PartialEq)]
pub struct AssociationDecl {
    pub path: String,
    pub ends: Vec<PropertyDecl>,
    pub source: SourceInformation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumerationDecl {
    pub path: String,
    pub values: Vec<EnumValueDecl>,
    pub source: SourceInformation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumValueDecl {
    pub name: String,
    pub source: SourceInformation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    /// Qualified name without signature.
    pub path: String,
    pub parameters: Vec<ParameterDecl>,
    pub return_type: TypeRef,
    pub return_multiplicity: Multiplicity,
    pub body: Vec<Expr>,
    pub source: SourceInformation,
}

impl FunctionDecl {
    /// `pkg::name(T1[m1],...):R[m]` using type names as written.
    pub fn signature(&self) -> String {
        let params: Vec<String> = self
            .parameters
            .iter()
            .map(|p| format!("{}{}", p.ty, p.multiplicity))
            .collect();
        format!(
            "{}({}):{}{}",
            self.path,
            params.join(","),
            self.return_type,
            self.return_multiplicity
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDecl {
    pub name: String,
    pub ty: TypeRef,
    pub multiplicity: Multiplicity,
    pub source: SourceInformation,
}

/// An expression with its position.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub source: SourceInformation,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Literal),
    Collection(Vec<Expr>),
    EnumValue { enumeration: TypeRef, value: String },
    New { class: TypeRef, key_values: Vec<KeyValue> },
    Copy { source: Box<Expr>, key_values: Vec<KeyValue> },
    Variable(String),
    PropertyAccess { receiver: Box<Expr>, property: String },
    Call { function: TypeRef, arguments: Vec<Expr> },
    Operator { op: Operator, operands: Vec<Expr> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeyValue {
    pub key: String,
    pub value: Expr,
    pub source: SourceInformation,
}
