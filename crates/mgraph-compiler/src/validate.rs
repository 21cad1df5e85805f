//! Validation phase: type and multiplicity inference plus semantic checks.
//!
//! Runs after resolution over the elements built by the current compile.
//! Every expression gets synthetic `inferredType` / `inferredMultiplicity`
//! children; property access and key-value expressions get a reference to
//! the property they denote so that dependents are tracked by the usage
//! index.
//!
//! Checks performed:
//! - generalization cycles
//! - property name conflicts (own, inherited and association ends)
//! - default values: legality (mandatory properties only), type, size
//! - instantiation key values: property existence, type, size
//! - call arguments and function return values
//! - constraints return `Boolean[1]`, messages return `String`

use std::collections::{HashMap, HashSet};

use indexmap::IndexSet;
use mgraph_core::query::{
    all_properties, class_descendants, declared_multiplicity, declared_type, declaring_owner,
    display_name, enum_value, find_property, is_class, is_subtype, member_name, multiplicity_at,
    raw_type,
};
use mgraph_core::{
    simple_name, slot, strip_signature, ExpressionNode, GenericTypeNode, MetaGraph, Multiplicity,
    NodeId, NodeKind, Operator, PrimitiveKind, ReferenceUsage, SourceInformation,
};
use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;
use tracing::debug;

use crate::error::CompilationError;

/// An inferred (or declared) type: raw type plus multiplicity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Typed {
    pub raw: NodeId,
    pub multiplicity: Multiplicity,
}

impl Typed {
    fn one(raw: NodeId) -> Self {
        Typed {
            raw,
            multiplicity: Multiplicity::PURE_ONE,
        }
    }
}

type Env = HashMap<String, Typed>;

/// Whether a value of multiplicity `given` may be assigned to a slot of
/// multiplicity `declared`. Exact sizes must lie in the range; ranges must
/// overlap.
pub fn multiplicity_fits(declared: Multiplicity, given: Multiplicity) -> bool {
    if given.upper() == Some(given.lower()) {
        return declared.contains(given.lower() as usize);
    }
    let lower_ok = declared.upper().map_or(true, |upper| given.lower() <= upper);
    let upper_ok = given.upper().map_or(true, |upper| declared.lower() <= upper);
    lower_ok && upper_ok
}

struct Primitives {
    nil: NodeId,
    boolean: NodeId,
    string: NodeId,
    number: NodeId,
    integer: NodeId,
    float: NodeId,
    date: NodeId,
}

impl Primitives {
    fn load(graph: &MetaGraph) -> Result<Self, CompilationError> {
        let get = |kind: PrimitiveKind| {
            graph.lookup(kind.name()).ok_or_else(|| {
                CompilationError::resolution(format!("{} has not been defined!", kind.name()), None)
            })
        };
        Ok(Primitives {
            nil: get(PrimitiveKind::Nil)?,
            boolean: get(PrimitiveKind::Boolean)?,
            string: get(PrimitiveKind::String)?,
            number: get(PrimitiveKind::Number)?,
            integer: get(PrimitiveKind::Integer)?,
            float: get(PrimitiveKind::Float)?,
            date: get(PrimitiveKind::Date)?,
        })
    }

    fn of(&self, kind: PrimitiveKind, any: NodeId) -> NodeId {
        match kind {
            PrimitiveKind::Nil => self.nil,
            PrimitiveKind::Boolean => self.boolean,
            PrimitiveKind::String => self.string,
            PrimitiveKind::Number => self.number,
            PrimitiveKind::Integer => self.integer,
            PrimitiveKind::Float => self.float,
            PrimitiveKind::Date => self.date,
            PrimitiveKind::Any => any,
        }
    }
}

/// Counters reported by a validation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ValidateStats {
    pub expressions: usize,
}

pub(crate) struct Validator<'g> {
    graph: &'g mut MetaGraph,
    prims: Primitives,
    any: NodeId,
    stats: ValidateStats,
}

impl<'g> Validator<'g> {
    pub fn new(graph: &'g mut MetaGraph) -> Result<Self, CompilationError> {
        let prims = Primitives::load(graph)?;
        let any = graph.lookup(PrimitiveKind::Any.name()).ok_or_else(|| {
            CompilationError::resolution("Any has not been defined!", None)
        })?;
        Ok(Validator {
            graph,
            prims,
            any,
            stats: ValidateStats::default(),
        })
    }

    /// Validates the given top-level elements.
    pub fn run(mut self, elements: &[NodeId]) -> Result<ValidateStats, CompilationError> {
        let classes: Vec<NodeId> = elements
            .iter()
            .copied()
            .filter(|e| is_class(self.graph, *e))
            .collect();
        self.check_generalization_cycles(&classes)?;

        // Classes whose visible property set may have changed, together with
        // everything that inherits from them.
        let mut roots: Vec<NodeId> = classes.clone();
        for &element in elements {
            if matches!(self.graph.kind(element), Some(NodeKind::Association)) {
                for end in self.graph.get_edge(element, slot::PROPERTIES) {
                    if let Some(ty) = declared_type(self.graph, end).filter(|t| is_class(self.graph, *t)) {
                        roots.push(ty);
                    }
                }
            }
        }
        let affected: IndexSet<NodeId> = roots
            .into_iter()
            .flat_map(|root| class_descendants(self.graph, root))
            .collect();
        for class in affected {
            self.check_property_conflicts(class)?;
        }

        for &element in elements {
            let kind = self.graph.kind(element).cloned();
            match kind {
                Some(NodeKind::Class) => self.check_class(element)?,
                Some(NodeKind::Association) => {
                    let owner = self.name(element);
                    for end in self.graph.get_edge(element, slot::PROPERTIES) {
                        self.check_default(end, &owner)?;
                    }
                }
                Some(NodeKind::Function(_)) => self.check_function(element)?,
                _ => {}
            }
        }
        debug!(expressions = self.stats.expressions, "validation passed");
        Ok(self.stats)
    }

    // -----------------------------------------------------------------------
    // Structural checks
    // -----------------------------------------------------------------------

    fn check_generalization_cycles(&self, classes: &[NodeId]) -> Result<(), CompilationError> {
        let mut hierarchy: DiGraphMap<NodeId, ()> = DiGraphMap::new();
        let mut seen = HashSet::new();
        let mut stack: Vec<NodeId> = classes.to_vec();
        while let Some(class) = stack.pop() {
            if !seen.insert(class) {
                continue;
            }
            hierarchy.add_node(class);
            for parent in self.graph.get_edge(class, slot::GENERALIZATIONS) {
                hierarchy.add_edge(class, parent, ());
                stack.push(parent);
            }
        }

        for component in tarjan_scc(&hierarchy) {
            let cyclic = component.len() > 1
                || component
                    .first()
                    .is_some_and(|c| hierarchy.contains_edge(*c, *c));
            if !cyclic {
                continue;
            }
            let class = component
                .iter()
                .copied()
                .min_by_key(|c| self.name(*c))
                .unwrap_or(component[0]);
            return Err(CompilationError::type_error(
                format!("Class {} is involved in a generalization cycle", self.name(class)),
                self.source_of(class),
            ));
        }
        Ok(())
    }

    fn check_property_conflicts(&self, class: NodeId) -> Result<(), CompilationError> {
        let mut seen: HashMap<String, NodeId> = HashMap::new();
        for property in all_properties(self.graph, class) {
            let Some(name) = member_name(self.graph, property) else {
                continue;
            };
            match seen.get(name) {
                Some(previous) if *previous != property => {
                    return Err(CompilationError::type_error(
                        format!(
                            "Property conflict on class {}: property '{}' defined more than once.",
                            self.name(class),
                            name
                        ),
                        self.source_of(property),
                    ));
                }
                Some(_) => {}
                None => {
                    seen.insert(name.to_string(), property);
                }
            }
        }
        Ok(())
    }

    fn check_class(&mut self, class: NodeId) -> Result<(), CompilationError> {
        let owner = self.name(class);
        for property in self.graph.get_edge(class, slot::PROPERTIES) {
            self.check_default(property, &owner)?;
        }
        for constraint in self.graph.get_edge(class, slot::CONSTRAINTS) {
            self.check_constraint(class, constraint)?;
        }
        Ok(())
    }

    fn check_default(&mut self, property: NodeId, owner: &str) -> Result<(), CompilationError> {
        let Some(holder) = self.graph.first(property, slot::DEFAULT_VALUE) else {
            return Ok(());
        };
        let declared = self.declared(property)?;
        if declared.multiplicity.is_optional() {
            return Err(CompilationError::multiplicity(
                format!(
                    "Default values are supported only for mandatory fields, and property '{}' is optional.",
                    self.member(property)
                ),
                self.source_of(holder),
            ));
        }
        let lambda = self.require(holder, slot::FUNCTION_DEFINITION)?;
        let (value, typed) = self.infer_sequence(lambda, &Env::new())?;
        self.check_value(value, typed, property, owner)
    }

    fn check_constraint(&mut self, class: NodeId, constraint: NodeId) -> Result<(), CompilationError> {
        let name = match self.graph.kind(constraint) {
            Some(NodeKind::Constraint(c)) => c.name.clone(),
            _ => String::new(),
        };
        let env = Env::from([("this".to_string(), Typed::one(class))]);

        let function = self.require(constraint, slot::FUNCTION_DEFINITION)?;
        let (expr, typed) = self.infer_sequence(function, &env)?;
        if typed.raw != self.prims.boolean || !typed.multiplicity.is_to_one() {
            return Err(CompilationError::type_error(
                format!(
                    "Constraint '{}' of class {} must return Boolean[1], found {}{}",
                    name,
                    self.name(class),
                    self.name(typed.raw),
                    typed.multiplicity
                ),
                self.source_of(expr),
            ));
        }

        if let Some(message) = self.graph.first(constraint, slot::MESSAGE_FUNCTION) {
            let (expr, typed) = self.infer_sequence(message, &env)?;
            if !is_subtype(self.graph, typed.raw, self.prims.string) {
                return Err(CompilationError::type_error(
                    format!(
                        "The message of constraint '{}' must be a String, found {}",
                        name,
                        self.name(typed.raw)
                    ),
                    self.source_of(expr),
                ));
            }
        }
        Ok(())
    }

    fn check_function(&mut self, function: NodeId) -> Result<(), CompilationError> {
        let mut env = Env::new();
        for parameter in self.graph.get_edge(function, slot::PARAMETERS) {
            let declared = self.declared(parameter)?;
            env.insert(self.member(parameter), declared);
        }
        let (expr, typed) = self.infer_sequence(function, &env)?;

        let return_type = self
            .graph
            .first(function, slot::RETURN_TYPE)
            .and_then(|gt| raw_type(self.graph, gt));
        let return_multiplicity = multiplicity_at(self.graph, function, slot::RETURN_MULTIPLICITY);
        let (Some(return_type), Some(return_multiplicity)) = (return_type, return_multiplicity) else {
            return Err(self.malformed(function, slot::RETURN_TYPE));
        };

        if !is_subtype(self.graph, typed.raw, return_type) {
            return Err(CompilationError::type_error(
                format!(
                    "Return type error in function '{}'; found: {}; expected: {}",
                    self.name(function),
                    self.name(typed.raw),
                    self.name(return_type)
                ),
                self.source_of(expr),
            ));
        }
        if !multiplicity_fits(return_multiplicity, typed.multiplicity) {
            return Err(CompilationError::multiplicity(
                format!(
                    "Return multiplicity error in function '{}'; found: {}; expected: {}",
                    self.name(function),
                    typed.multiplicity,
                    return_multiplicity
                ),
                self.source_of(expr),
            ));
        }
        Ok(())
    }

    /// Checks a value against a property: element-wise subtyping, then size.
    fn check_value(
        &self,
        value: NodeId,
        typed: Typed,
        property: NodeId,
        owner: &str,
    ) -> Result<(), CompilationError> {
        let expected = self.declared(property)?;
        for (element, element_type) in self.elements_of(value, typed) {
            if !is_subtype(self.graph, element_type.raw, expected.raw) {
                return Err(CompilationError::type_error(
                    format!(
                        "Type Error: '{}' not a subtype of '{}'",
                        self.name(element_type.raw),
                        self.name(expected.raw)
                    ),
                    self.source_of(element),
                ));
            }
        }
        if !multiplicity_fits(expected.multiplicity, typed.multiplicity) {
            return Err(CompilationError::multiplicity(
                format!(
                    "Multiplicity Error: The property '{}' of class '{}' has a multiplicity range of {} when the given value has a multiplicity of {}",
                    self.member(property),
                    owner,
                    expected.multiplicity,
                    typed.multiplicity
                ),
                self.source_of(value),
            ));
        }
        Ok(())
    }

    /// Leaves of a (possibly nested) collection literal with their types.
    fn elements_of(&self, expr: NodeId, typed: Typed) -> Vec<(NodeId, Typed)> {
        match self.graph.kind(expr) {
            Some(NodeKind::Expression(ExpressionNode::Collection)) => self
                .graph
                .get_edge(expr, slot::VALUES)
                .into_iter()
                .filter_map(|v| self.inferred(v).map(|t| (v, t)))
                .flat_map(|(v, t)| self.elements_of(v, t))
                .collect(),
            _ => vec![(expr, typed)],
        }
    }

    // -----------------------------------------------------------------------
    // Inference
    // -----------------------------------------------------------------------

    /// Infers every expression of `owner.expressionSequence`; returns the
    /// last one with its type.
    fn infer_sequence(&mut self, owner: NodeId, env: &Env) -> Result<(NodeId, Typed), CompilationError> {
        let mut last = None;
        for expr in self.graph.get_edge(owner, slot::EXPRESSION_SEQUENCE) {
            last = Some((expr, self.infer(expr, env)?));
        }
        last.ok_or_else(|| self.malformed(owner, slot::EXPRESSION_SEQUENCE))
    }

    fn infer(&mut self, expr: NodeId, env: &Env) -> Result<Typed, CompilationError> {
        let source = self.source_of(expr);
        let payload = match self.graph.kind(expr) {
            Some(NodeKind::Expression(payload)) => payload.clone(),
            _ => return Err(self.malformed(expr, "expression")),
        };

        let typed = match payload {
            ExpressionNode::Literal(literal) => Typed::one(self.prims.of(literal.primitive(), self.any)),
            ExpressionNode::Collection => self.infer_collection(expr, env)?,
            ExpressionNode::EnumValue { value } => {
                let enumeration = self.require(expr, slot::ENUMERATION)?;
                if enum_value(self.graph, enumeration, &value).is_none() {
                    return Err(CompilationError::resolution(
                        format!(
                            "The enum value '{}' can't be found in the enumeration {}",
                            value,
                            self.name(enumeration)
                        ),
                        source,
                    ));
                }
                Typed::one(enumeration)
            }
            ExpressionNode::New => {
                let class = self.require(expr, slot::CLASS)?;
                self.check_key_values(expr, class, env)?;
                Typed::one(class)
            }
            ExpressionNode::Copy => {
                let original = self.require(expr, slot::SOURCE)?;
                let typed = self.infer(original, env)?;
                if !is_class(self.graph, typed.raw) {
                    return Err(CompilationError::type_error(
                        format!("Only class instances can be copied, found {}", self.name(typed.raw)),
                        source,
                    ));
                }
                self.check_key_values(expr, typed.raw, env)?;
                Typed::one(typed.raw)
            }
            ExpressionNode::KeyValue { .. } => {
                let value = self.require(expr, slot::VALUE)?;
                self.infer(value, env)?
            }
            ExpressionNode::Variable { name } => env.get(&name).copied().ok_or_else(|| {
                CompilationError::resolution(format!("The variable '{}' is unknown!", name), source.clone())
            })?,
            ExpressionNode::PropertyAccess { property } => {
                let receiver = self.require(expr, slot::RECEIVER)?;
                let typed = self.infer(receiver, env)?;
                let found = if is_class(self.graph, typed.raw) {
                    find_property(self.graph, typed.raw, &property)
                } else {
                    None
                };
                let Some(found) = found else {
                    return Err(CompilationError::resolution(
                        format!(
                            "Can't find the property '{}' in the class {}",
                            property,
                            self.name(typed.raw)
                        ),
                        source,
                    ));
                };
                self.graph.add_edge(expr, slot::PROPERTY, found)?;
                let declared = self.declared(found)?;
                Typed {
                    raw: declared.raw,
                    multiplicity: if typed.multiplicity.is_to_one() {
                        declared.multiplicity
                    } else {
                        Multiplicity::ZERO_MANY
                    },
                }
            }
            ExpressionNode::Call => self.infer_call(expr, env)?,
            ExpressionNode::Operator(op) => self.infer_operator(expr, op, env)?,
        };

        self.attach(expr, typed)?;
        self.stats.expressions += 1;
        Ok(typed)
    }

    fn infer_collection(&mut self, expr: NodeId, env: &Env) -> Result<Typed, CompilationError> {
        let mut raw: Option<NodeId> = None;
        let mut lower = 0u32;
        let mut upper = Some(0u32);
        for value in self.graph.get_edge(expr, slot::VALUES) {
            let typed = self.infer(value, env)?;
            raw = Some(match raw {
                None => typed.raw,
                Some(current) => self.join(current, typed.raw),
            });
            lower = lower.saturating_add(typed.multiplicity.lower());
            upper = match (upper, typed.multiplicity.upper()) {
                (Some(a), Some(b)) => Some(a.saturating_add(b)),
                _ => None,
            };
        }
        Ok(Typed {
            raw: raw.unwrap_or(self.prims.nil),
            multiplicity: Multiplicity::new(lower, upper)?,
        })
    }

    fn infer_call(&mut self, expr: NodeId, env: &Env) -> Result<Typed, CompilationError> {
        let mut arguments = Vec::new();
        for argument in self.graph.get_edge(expr, slot::ARGUMENTS) {
            arguments.push((argument, self.infer(argument, env)?));
        }
        let function = self.select_overload(expr, &arguments)?;
        let parameters = self.graph.get_edge(function, slot::PARAMETERS);
        for ((argument, typed), parameter) in arguments.into_iter().zip(parameters) {
            let expected = self.declared(parameter)?;
            if !is_subtype(self.graph, typed.raw, expected.raw) {
                return Err(CompilationError::type_error(
                    format!(
                        "Type Error: '{}' not a subtype of '{}'",
                        self.name(typed.raw),
                        self.name(expected.raw)
                    ),
                    self.source_of(argument),
                ));
            }
            if !multiplicity_fits(expected.multiplicity, typed.multiplicity) {
                return Err(CompilationError::multiplicity(
                    format!(
                        "Multiplicity Error: The parameter '{}' of function '{}' has a multiplicity range of {} when the given value has a multiplicity of {}",
                        self.member(parameter),
                        self.name(function),
                        expected.multiplicity,
                        typed.multiplicity
                    ),
                    self.source_of(argument),
                ));
            }
        }

        let raw = self
            .graph
            .first(function, slot::RETURN_TYPE)
            .and_then(|gt| raw_type(self.graph, gt));
        let multiplicity = multiplicity_at(self.graph, function, slot::RETURN_MULTIPLICITY);
        match (raw, multiplicity) {
            (Some(raw), Some(multiplicity)) => Ok(Typed { raw, multiplicity }),
            _ => Err(self.malformed(function, slot::RETURN_TYPE)),
        }
    }

    /// The function a call denotes. A call left with several same-arity
    /// candidates keeps those accepting its argument types; the most
    /// specific of them is bound. With no accepting candidate the first one
    /// stays bound and reports the mismatch.
    fn select_overload(&mut self, expr: NodeId, arguments: &[(NodeId, Typed)]) -> Result<NodeId, CompilationError> {
        let overloads = self.graph.get_edge(expr, slot::OVERLOADS);
        if overloads.is_empty() {
            return self.require(expr, slot::FUNCTION);
        }
        let accepting: Vec<NodeId> = overloads
            .iter()
            .copied()
            .filter(|f| self.accepts(*f, arguments))
            .collect();
        let chosen = match accepting.as_slice() {
            [] => self.require(expr, slot::FUNCTION)?,
            [single] => *single,
            many => {
                let specific: Vec<NodeId> = many
                    .iter()
                    .copied()
                    .filter(|f| many.iter().all(|other| self.at_least_as_specific(*f, *other)))
                    .collect();
                match specific.as_slice() {
                    [single] => *single,
                    _ => {
                        let mut paths: Vec<String> = many.iter().map(|f| self.name(*f)).collect();
                        paths.sort();
                        let name = self
                            .graph
                            .node(many[0])
                            .and_then(|n| n.path.as_deref())
                            .map(|path| simple_name(strip_signature(path)).to_string())
                            .unwrap_or_default();
                        return Err(CompilationError::resolution(
                            format!(
                                "{} has been found more than one time in the imports: [{}]",
                                name,
                                paths.join(", ")
                            ),
                            self.source_of(expr),
                        ));
                    }
                }
            }
        };
        self.graph.clear_slot(expr, slot::OVERLOADS)?;
        if self.graph.first(expr, slot::FUNCTION) != Some(chosen) {
            self.graph.retarget_edge(expr, slot::FUNCTION, 0, chosen, false)?;
        }
        debug!(call = %expr, function = %self.name(chosen), "selected overload");
        Ok(chosen)
    }

    fn accepts(&self, function: NodeId, arguments: &[(NodeId, Typed)]) -> bool {
        let parameters = self.graph.get_edge(function, slot::PARAMETERS);
        parameters.len() == arguments.len()
            && parameters.iter().zip(arguments).all(|(parameter, (_, typed))| {
                self.declared(*parameter).is_ok_and(|expected| {
                    is_subtype(self.graph, typed.raw, expected.raw)
                        && multiplicity_fits(expected.multiplicity, typed.multiplicity)
                })
            })
    }

    /// Whether every parameter type of `function` is a subtype of the
    /// matching parameter type of `other`.
    fn at_least_as_specific(&self, function: NodeId, other: NodeId) -> bool {
        let ours = self.graph.get_edge(function, slot::PARAMETERS);
        let theirs = self.graph.get_edge(other, slot::PARAMETERS);
        ours.iter().zip(theirs.iter()).all(|(a, b)| {
            match (self.declared(*a), self.declared(*b)) {
                (Ok(a), Ok(b)) => is_subtype(self.graph, a.raw, b.raw),
                _ => false,
            }
        })
    }

    fn infer_operator(&mut self, expr: NodeId, op: Operator, env: &Env) -> Result<Typed, CompilationError> {
        let mut operands = Vec::new();
        for operand in self.graph.get_edge(expr, slot::OPERANDS) {
            operands.push((operand, self.infer(operand, env)?));
        }

        let raw = match op {
            Operator::Eq | Operator::NotEq | Operator::IsEmpty | Operator::IsNotEmpty => self.prims.boolean,
            Operator::Size => self.prims.integer,
            Operator::And | Operator::Or | Operator::Not => {
                self.expect_operands(&operands, self.prims.boolean)?;
                self.prims.boolean
            }
            Operator::Lt | Operator::LtEq | Operator::Gt | Operator::GtEq => {
                for (operand, typed) in &operands {
                    let comparable = [self.prims.number, self.prims.string, self.prims.date]
                        .into_iter()
                        .any(|t| is_subtype(self.graph, typed.raw, t));
                    if !comparable {
                        return Err(self.not_a_subtype(*operand, typed.raw, self.prims.number));
                    }
                }
                self.prims.boolean
            }
            Operator::Add
                if operands
                    .first()
                    .is_some_and(|(_, t)| t.raw == self.prims.string) =>
            {
                self.expect_operands(&operands, self.prims.string)?;
                self.prims.string
            }
            Operator::Add | Operator::Sub | Operator::Mul => {
                self.expect_operands(&operands, self.prims.number)?;
                self.arithmetic_result(&operands)
            }
        };
        Ok(Typed::one(raw))
    }

    fn expect_operands(&self, operands: &[(NodeId, Typed)], expected: NodeId) -> Result<(), CompilationError> {
        for (operand, typed) in operands {
            if !is_subtype(self.graph, typed.raw, expected) {
                return Err(self.not_a_subtype(*operand, typed.raw, expected));
            }
        }
        Ok(())
    }

    fn arithmetic_result(&self, operands: &[(NodeId, Typed)]) -> NodeId {
        if operands.iter().all(|(_, t)| t.raw == self.prims.integer) {
            self.prims.integer
        } else if operands
            .iter()
            .all(|(_, t)| t.raw == self.prims.integer || t.raw == self.prims.float)
        {
            self.prims.float
        } else {
            self.prims.number
        }
    }

    /// Least common supertype of two types, as far as this type system
    /// can tell: one of them, `Number` for mixed numerics, otherwise `Any`.
    fn join(&self, a: NodeId, b: NodeId) -> NodeId {
        if is_subtype(self.graph, b, a) {
            a
        } else if is_subtype(self.graph, a, b) {
            b
        } else if is_subtype(self.graph, a, self.prims.number) && is_subtype(self.graph, b, self.prims.number) {
            self.prims.number
        } else {
            self.any
        }
    }

    fn check_key_values(&mut self, expr: NodeId, class: NodeId, env: &Env) -> Result<(), CompilationError> {
        let class_name = self.name(class);
        for kv in self.graph.get_edge(expr, slot::KEY_VALUES) {
            let key = match self.graph.kind(kv) {
                Some(NodeKind::Expression(ExpressionNode::KeyValue { key })) => key.clone(),
                _ => return Err(self.malformed(kv, slot::KEY_VALUES)),
            };
            let Some(property) = find_property(self.graph, class, &key) else {
                return Err(CompilationError::resolution(
                    format!(
                        "The property '{}' can't be found in the type '{}' or in its hierarchy.",
                        key, class_name
                    ),
                    self.source_of(kv),
                ));
            };
            self.graph.add_edge(kv, slot::PROPERTY, property)?;
            let typed = self.infer(kv, env)?;
            let value = self.require(kv, slot::VALUE)?;
            let owner = declaring_owner(self.graph, property)
                .map(|owner| self.name(owner))
                .unwrap_or_else(|| class_name.clone());
            self.check_value(value, typed, property, &owner)?;
        }
        Ok(())
    }

    /// Hangs synthetic inferred type and multiplicity nodes off `expr`.
    fn attach(&mut self, expr: NodeId, typed: Typed) -> Result<(), CompilationError> {
        let usage = self
            .graph
            .incoming(expr)
            .into_iter()
            .find(|e| e.containment)
            .map(|e| ReferenceUsage::new(e.owner, e.slot, e.offset));
        let source = self.source_of(expr);
        let generic = self.graph.create_synthetic_node(
            NodeKind::GenericType(GenericTypeNode {
                inferred: true,
                inferred_for: usage,
            }),
            source.clone(),
        );
        self.graph.add_child(expr, slot::INFERRED_TYPE, generic)?;
        self.graph.add_edge(generic, slot::RAW_TYPE, typed.raw)?;
        let multiplicity = self
            .graph
            .create_synthetic_node(NodeKind::Multiplicity(typed.multiplicity), source);
        self.graph.add_child(expr, slot::INFERRED_MULTIPLICITY, multiplicity)?;
        Ok(())
    }

    /// The type previously attached to `expr`.
    fn inferred(&self, expr: NodeId) -> Option<Typed> {
        let raw = self
            .graph
            .first(expr, slot::INFERRED_TYPE)
            .and_then(|gt| raw_type(self.graph, gt))?;
        let multiplicity = multiplicity_at(self.graph, expr, slot::INFERRED_MULTIPLICITY)?;
        Some(Typed { raw, multiplicity })
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn declared(&self, typed: NodeId) -> Result<Typed, CompilationError> {
        match (
            declared_type(self.graph, typed),
            declared_multiplicity(self.graph, typed),
        ) {
            (Some(raw), Some(multiplicity)) => Ok(Typed { raw, multiplicity }),
            _ => Err(self.malformed(typed, slot::GENERIC_TYPE)),
        }
    }

    fn require(&self, owner: NodeId, slot_name: &str) -> Result<NodeId, CompilationError> {
        self.graph
            .first(owner, slot_name)
            .ok_or_else(|| self.malformed(owner, slot_name))
    }

    fn malformed(&self, node: NodeId, slot_name: &str) -> CompilationError {
        CompilationError::resolution(
            format!("{} has no {}", self.name(node), slot_name),
            self.source_of(node),
        )
    }

    fn not_a_subtype(&self, at: NodeId, found: NodeId, expected: NodeId) -> CompilationError {
        CompilationError::type_error(
            format!(
                "Type Error: '{}' not a subtype of '{}'",
                self.name(found),
                self.name(expected)
            ),
            self.source_of(at),
        )
    }

    fn name(&self, node: NodeId) -> String {
        display_name(self.graph, node)
    }

    fn member(&self, node: NodeId) -> String {
        member_name(self.graph, node).unwrap_or_default().to_string()
    }

    fn source_of(&self, node: NodeId) -> Option<SourceInformation> {
        self.graph.node(node).and_then(|n| n.source.clone())
    }
}
