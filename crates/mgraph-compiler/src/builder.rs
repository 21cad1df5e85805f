//! Parse phase: turns a [`ParsedSource`] into graph nodes.
//!
//! Every textual reference becomes a contained [`StubNode`] carrying the
//! import context of its declaration. Stubs and associations are collected
//! into worklists for the resolver; nothing is bound here.

use std::collections::HashSet;

use mgraph_core::{
    package_of, simple_name, slot, ConstraintNode, CoreError, ExpressionNode, FunctionNode,
    GenericTypeNode, ImportGroup, MetaGraph, Multiplicity, NodeId, NodeKind, SourceInformation,
    StubNode, StubTarget,
};
use mgraph_syntax::{
    AssociationDecl, ClassDecl, ConstraintDecl, Declaration, EnumerationDecl, Expr, ExprKind,
    FunctionDecl, KeyValue, ParsedSource, PropertyDecl, TypeRef,
};
use tracing::debug;

use crate::error::CompilationError;

/// Worklists produced by the parse phase.
#[derive(Debug, Default)]
pub(crate) struct BuildOutput {
    /// Every stub created, in creation order.
    pub stubs: Vec<NodeId>,
    /// Associations awaiting end wiring.
    pub associations: Vec<NodeId>,
    /// Top-level elements created.
    pub elements: Vec<NodeId>,
}

pub(crate) struct GraphBuilder<'g> {
    graph: &'g mut MetaGraph,
    /// Import context of the declaration being built.
    imports: ImportGroup,
    out: BuildOutput,
}

impl<'g> GraphBuilder<'g> {
    pub fn new(graph: &'g mut MetaGraph) -> Self {
        GraphBuilder {
            graph,
            imports: ImportGroup::default(),
            out: BuildOutput::default(),
        }
    }

    pub fn finish(self) -> BuildOutput {
        self.out
    }

    /// Builds every declaration of one source. Returns the paths of the
    /// top-level elements created, in declaration order.
    pub fn build_source(&mut self, parsed: &ParsedSource) -> Result<Vec<String>, CompilationError> {
        let imports = parsed.import_packages();
        let mut paths = Vec::with_capacity(parsed.declarations.len());
        for declaration in &parsed.declarations {
            let path = declaration.path();
            self.imports = ImportGroup {
                package: package_of(&path).to_string(),
                imports: imports.clone(),
            };
            let element = match declaration {
                Declaration::Class(decl) => self.class(decl)?,
                Declaration::Association(decl) => self.association(decl)?,
                Declaration::Enumeration(decl) => self.enumeration(decl)?,
                Declaration::Function(decl) => self.function(decl)?,
            };
            self.out.elements.push(element);
            paths.push(path);
        }
        debug!(
            source = %parsed.source_id,
            elements = paths.len(),
            stubs = self.out.stubs.len(),
            "built source"
        );
        Ok(paths)
    }

    // -----------------------------------------------------------------------
    // Declarations
    // -----------------------------------------------------------------------

    fn class(&mut self, decl: &ClassDecl) -> Result<NodeId, CompilationError> {
        let mut seen = HashSet::new();
        for property in &decl.properties {
            if !seen.insert(property.name.as_str()) {
                return Err(CompilationError::type_error(
                    format!(
                        "Property conflict on class {}: property '{}' defined more than once.",
                        decl.path, property.name
                    ),
                    Some(property.source.clone()),
                ));
            }
        }

        let class = self.create(NodeKind::Class, Some(decl.path.clone()), &decl.source)?;
        for generalization in &decl.generalizations {
            self.stub(class, slot::GENERALIZATIONS, generalization, StubTarget::Class)?;
        }
        for property in &decl.properties {
            self.property(class, &decl.path, property)?;
        }
        for constraint in &decl.constraints {
            self.constraint(class, constraint)?;
        }
        Ok(class)
    }

    fn property(
        &mut self,
        owner: NodeId,
        owner_path: &str,
        decl: &PropertyDecl,
    ) -> Result<NodeId, CompilationError> {
        let property = self.create(
            NodeKind::Property {
                name: decl.name.clone(),
            },
            Some(format!("{}.{}", owner_path, decl.name)),
            &decl.source,
        )?;
        self.graph.add_child(owner, slot::PROPERTIES, property)?;
        self.graph.add_edge(property, slot::OWNER, owner)?;
        self.generic_type(property, slot::GENERIC_TYPE, &decl.ty)?;
        self.multiplicity(property, slot::MULTIPLICITY, decl.multiplicity, &decl.source)?;
        if let Some(default) = &decl.default {
            let holder = self.child(property, slot::DEFAULT_VALUE, NodeKind::DefaultValue, &default.source)?;
            self.lambda(holder, slot::FUNCTION_DEFINITION, std::slice::from_ref(default), &default.source)?;
        }
        Ok(property)
    }

    fn constraint(&mut self, class: NodeId, decl: &ConstraintDecl) -> Result<NodeId, CompilationError> {
        let payload = ConstraintNode {
            name: decl.name.clone(),
            owner: decl.owner.clone(),
            external_id: decl.external_id.clone(),
            enforcement_level: decl.enforcement_level,
        };
        let constraint = self.child(class, slot::CONSTRAINTS, NodeKind::Constraint(payload), &decl.source)?;
        self.lambda(
            constraint,
            slot::FUNCTION_DEFINITION,
            std::slice::from_ref(&decl.function),
            &decl.function.source,
        )?;
        if let Some(message) = &decl.message {
            self.lambda(
                constraint,
                slot::MESSAGE_FUNCTION,
                std::slice::from_ref(message),
                &message.source,
            )?;
        }
        Ok(constraint)
    }

    fn association(&mut self, decl: &AssociationDecl) -> Result<NodeId, CompilationError> {
        let association = self.create(NodeKind::Association, Some(decl.path.clone()), &decl.source)?;
        for end in &decl.ends {
            self.property(association, &decl.path, end)?;
        }
        self.out.associations.push(association);
        Ok(association)
    }

    fn enumeration(&mut self, decl: &EnumerationDecl) -> Result<NodeId, CompilationError> {
        let enumeration = self.create(NodeKind::Enumeration, Some(decl.path.clone()), &decl.source)?;
        for value in &decl.values {
            let node = self.create(
                NodeKind::EnumValue {
                    name: value.name.clone(),
                },
                Some(format!("{}.{}", decl.path, value.name)),
                &value.source,
            )?;
            self.graph.add_child(enumeration, slot::VALUES, node)?;
        }
        Ok(enumeration)
    }

    fn function(&mut self, decl: &FunctionDecl) -> Result<NodeId, CompilationError> {
        let mut seen = HashSet::new();
        for parameter in &decl.parameters {
            if !seen.insert(parameter.name.as_str()) {
                return Err(CompilationError::resolution(
                    format!(
                        "The parameter '{}' is defined more than once in {}",
                        parameter.name, decl.path
                    ),
                    Some(parameter.source.clone()),
                ));
            }
        }

        let payload = FunctionNode {
            name: simple_name(&decl.path).to_string(),
            qualified_name: decl.path.clone(),
            arity: decl.parameters.len(),
        };
        let function = self.create(NodeKind::Function(payload), Some(decl.signature()), &decl.source)?;
        for parameter in &decl.parameters {
            let node = self.child(
                function,
                slot::PARAMETERS,
                NodeKind::Parameter {
                    name: parameter.name.clone(),
                },
                &parameter.source,
            )?;
            self.generic_type(node, slot::GENERIC_TYPE, &parameter.ty)?;
            self.multiplicity(node, slot::MULTIPLICITY, parameter.multiplicity, &parameter.source)?;
        }
        self.generic_type(function, slot::RETURN_TYPE, &decl.return_type)?;
        self.multiplicity(
            function,
            slot::RETURN_MULTIPLICITY,
            decl.return_multiplicity,
            &decl.return_type.source,
        )?;
        for expr in &decl.body {
            self.expression(function, slot::EXPRESSION_SEQUENCE, expr)?;
        }
        Ok(function)
    }

    // -----------------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------------

    fn lambda(
        &mut self,
        owner: NodeId,
        slot_name: &str,
        body: &[Expr],
        source: &SourceInformation,
    ) -> Result<NodeId, CompilationError> {
        let lambda = self.child(owner, slot_name, NodeKind::Lambda, source)?;
        for expr in body {
            self.expression(lambda, slot::EXPRESSION_SEQUENCE, expr)?;
        }
        Ok(lambda)
    }

    fn expression(&mut self, owner: NodeId, slot_name: &str, expr: &Expr) -> Result<NodeId, CompilationError> {
        let payload = match &expr.kind {
            ExprKind::Literal(literal) => ExpressionNode::Literal(literal.clone()),
            ExprKind::Collection(_) => ExpressionNode::Collection,
            ExprKind::EnumValue { value, .. } => ExpressionNode::EnumValue {
                value: value.clone(),
            },
            ExprKind::New { .. } => ExpressionNode::New,
            ExprKind::Copy { .. } => ExpressionNode::Copy,
            ExprKind::Variable(name) => ExpressionNode::Variable { name: name.clone() },
            ExprKind::PropertyAccess { property, .. } => ExpressionNode::PropertyAccess {
                property: property.clone(),
            },
            ExprKind::Call { .. } => ExpressionNode::Call,
            ExprKind::Operator { op, .. } => ExpressionNode::Operator(*op),
        };
        let node = self.child(owner, slot_name, NodeKind::Expression(payload), &expr.source)?;

        match &expr.kind {
            ExprKind::Literal(_) | ExprKind::Variable(_) => {}
            ExprKind::Collection(values) => {
                for value in values {
                    self.expression(node, slot::VALUES, value)?;
                }
            }
            ExprKind::EnumValue { enumeration, .. } => {
                self.stub(node, slot::ENUMERATION, enumeration, StubTarget::Enumeration)?;
            }
            ExprKind::New { class, key_values } => {
                self.stub(node, slot::CLASS, class, StubTarget::Class)?;
                self.key_values(node, key_values)?;
            }
            ExprKind::Copy { source, key_values } => {
                self.expression(node, slot::SOURCE, source)?;
                self.key_values(node, key_values)?;
            }
            ExprKind::PropertyAccess { receiver, .. } => {
                self.expression(node, slot::RECEIVER, receiver)?;
            }
            ExprKind::Call { function, arguments } => {
                let target = StubTarget::Function {
                    arity: arguments.len(),
                };
                self.stub(node, slot::FUNCTION, function, target)?;
                for argument in arguments {
                    self.expression(node, slot::ARGUMENTS, argument)?;
                }
            }
            ExprKind::Operator { operands, .. } => {
                for operand in operands {
                    self.expression(node, slot::OPERANDS, operand)?;
                }
            }
        }
        Ok(node)
    }

    fn key_values(&mut self, owner: NodeId, key_values: &[KeyValue]) -> Result<(), CompilationError> {
        for kv in key_values {
            let node = self.child(
                owner,
                slot::KEY_VALUES,
                NodeKind::Expression(ExpressionNode::KeyValue { key: kv.key.clone() }),
                &kv.source,
            )?;
            self.expression(node, slot::VALUE, &kv.value)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Structural helpers
    // -----------------------------------------------------------------------

    fn create(
        &mut self,
        kind: NodeKind,
        path: Option<String>,
        source: &SourceInformation,
    ) -> Result<NodeId, CompilationError> {
        self.graph
            .create_node(kind, path, Some(source.clone()))
            .map_err(|err| match err {
                CoreError::DuplicatePath { .. } => {
                    CompilationError::resolution(err.to_string(), Some(source.clone()))
                }
                other => CompilationError::from(other).at(Some(source)),
            })
    }

    /// Creates an anonymous node contained in `owner.slot`.
    fn child(
        &mut self,
        owner: NodeId,
        slot_name: &str,
        kind: NodeKind,
        source: &SourceInformation,
    ) -> Result<NodeId, CompilationError> {
        let node = self.create(kind, None, source)?;
        self.graph.add_child(owner, slot_name, node)?;
        Ok(node)
    }

    fn stub(
        &mut self,
        owner: NodeId,
        slot_name: &str,
        reference: &TypeRef,
        expects: StubTarget,
    ) -> Result<NodeId, CompilationError> {
        let payload = StubNode {
            reference: reference.path.clone(),
            imports: self.imports.clone(),
            expects,
        };
        let stub = self.child(owner, slot_name, NodeKind::Stub(payload), &reference.source)?;
        self.out.stubs.push(stub);
        Ok(stub)
    }

    /// `owner.slot -> GenericType -> rawType -> stub`. Each type argument is
    /// a nested GenericType under `typeArguments`; multiplicity arguments
    /// hang off `multiplicityArguments`.
    fn generic_type(&mut self, owner: NodeId, slot_name: &str, ty: &TypeRef) -> Result<NodeId, CompilationError> {
        let generic = self.child(
            owner,
            slot_name,
            NodeKind::GenericType(GenericTypeNode::declared()),
            &ty.source,
        )?;
        self.stub(generic, slot::RAW_TYPE, ty, StubTarget::Type)?;
        for argument in &ty.type_arguments {
            self.generic_type(generic, slot::TYPE_ARGUMENTS, argument)?;
        }
        for multiplicity in &ty.multiplicity_arguments {
            self.multiplicity(generic, slot::MULTIPLICITY_ARGUMENTS, *multiplicity, &ty.source)?;
        }
        Ok(generic)
    }

    fn multiplicity(
        &mut self,
        owner: NodeId,
        slot_name: &str,
        multiplicity: Multiplicity,
        source: &SourceInformation,
    ) -> Result<NodeId, CompilationError> {
        self.child(owner, slot_name, NodeKind::Multiplicity(multiplicity), source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mgraph_syntax::{Parser, TextParser};

    fn build(text: &str) -> (MetaGraph, BuildOutput) {
        let parsed = TextParser.parse("test.pure", text).unwrap();
        let mut graph = MetaGraph::new();
        let mut builder = GraphBuilder::new(&mut graph);
        builder.build_source(&parsed).unwrap();
        let out = builder.finish();
        (graph, out)
    }

    #[test]
    fn class_members_hang_off_slots() {
        let (graph, out) = build("Class model::Car { name: String[1]; wheels: Integer[0..1]; }");
        let car = graph.lookup("model::Car").unwrap();
        assert_eq!(out.elements, vec![car]);
        assert_eq!(graph.slot_len(car, slot::PROPERTIES), 2);

        let name = graph.lookup("model::Car.name").unwrap();
        assert_eq!(graph.first(name, slot::OWNER), Some(car));
        assert_eq!(out.stubs.len(), 2);

        let generic = graph.first(name, slot::GENERIC_TYPE).unwrap();
        let stub = graph.first(generic, slot::RAW_TYPE).unwrap();
        match graph.kind(stub) {
            Some(NodeKind::Stub(s)) => {
                assert_eq!(s.reference, "String");
                assert_eq!(s.imports.package, "model");
                assert_eq!(s.expects, StubTarget::Type);
            }
            other => panic!("expected stub, got {:?}", other),
        }
    }

    #[test]
    fn type_arguments_are_nested_generic_types() {
        let (graph, out) = build("Class m::Box { items: Pair<Car, List<Owner>|0..1>[1]; }");
        let items = graph.lookup("m::Box.items").unwrap();
        let generic = graph.first(items, slot::GENERIC_TYPE).unwrap();

        let arguments = graph.get_edge(generic, slot::TYPE_ARGUMENTS);
        assert_eq!(arguments.len(), 2);
        let nested = graph.get_edge(arguments[1], slot::TYPE_ARGUMENTS);
        assert_eq!(nested.len(), 1);
        let references: Vec<String> = [generic, arguments[0], arguments[1], nested[0]]
            .iter()
            .filter_map(|g| graph.first(*g, slot::RAW_TYPE))
            .filter_map(|stub| match graph.kind(stub) {
                Some(NodeKind::Stub(s)) => Some(s.reference.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(references, vec!["Pair", "Car", "List", "Owner"]);
        assert_eq!(out.stubs.len(), 4);

        let multiplicities = graph.get_edge(generic, slot::MULTIPLICITY_ARGUMENTS);
        assert!(matches!(
            multiplicities.as_slice(),
            [m] if graph.kind(*m) == Some(&NodeKind::Multiplicity(Multiplicity::ZERO_ONE))
        ));
    }

    #[test]
    fn stubs_carry_imports() {
        let (graph, out) = build("import other::*;\nClass a::B extends C {}");
        let b = graph.lookup("a::B").unwrap();
        let stub = graph.first(b, slot::GENERALIZATIONS).unwrap();
        assert_eq!(out.stubs, vec![stub]);
        match graph.kind(stub) {
            Some(NodeKind::Stub(s)) => {
                assert_eq!(s.imports.imports, vec!["other".to_string()]);
                assert_eq!(s.expects, StubTarget::Class);
            }
            other => panic!("expected stub, got {:?}", other),
        }
    }

    #[test]
    fn function_is_registered_under_its_signature() {
        let (graph, out) = build("function m::twice(s: String[1]): String[1] { $s + $s; }");
        let f = graph.lookup("m::twice(String[1]):String[1]").unwrap();
        assert_eq!(graph.slot_len(f, slot::PARAMETERS), 1);
        assert_eq!(graph.slot_len(f, slot::EXPRESSION_SEQUENCE), 1);
        // parameter type and return type
        assert_eq!(out.stubs.len(), 2);
    }

    #[test]
    fn associations_are_queued() {
        let (graph, out) = build(
            "Class m::Car {}\nClass m::Owner {}\nAssociation m::Ownership { owner: Owner[1]; car: Car[0..1]; }",
        );
        let association = graph.lookup("m::Ownership").unwrap();
        assert_eq!(out.associations, vec![association]);
        assert!(graph.lookup("m::Ownership.owner").is_some());
        assert!(graph.lookup("m::Ownership.car").is_some());
    }

    #[test]
    fn duplicate_property_is_a_type_error() {
        let parsed = TextParser
            .parse("test.pure", "Class m::A { x: String[1]; x: Integer[1]; }")
            .unwrap();
        let mut graph = MetaGraph::new();
        let err = GraphBuilder::new(&mut graph).build_source(&parsed).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Type);
        assert!(err.message.contains("'x'"));
    }

    #[test]
    fn duplicate_element_is_reported_at_the_second_declaration() {
        let parsed = TextParser
            .parse("test.pure", "Class m::A {}\nClass m::A {}")
            .unwrap();
        let mut graph = MetaGraph::new();
        let err = GraphBuilder::new(&mut graph).build_source(&parsed).unwrap_err();
        assert_eq!(err.message, "m::A has already been defined!");
        assert_eq!(err.start_line(), Some(2));
    }
}
