//! Instance construction shared by `new`, copy and `dynamic_new`.
//!
//! 1. apply the given key values (type-checked against the declared
//!    property types); an explicit empty collection counts as given
//! 2. evaluate the default of every visible property still unset, freshly
//!    for each construction
//! 3. check every visible property's multiplicity
//! 4. allocate and wire reverse association ends: a to-one reverse end is
//!    replaced, a to-many reverse end is appended to unless the instance is
//!    already there
//! 5. evaluate constraints (own class first, then ancestors), failing on
//!    the first violation unless a constraints override takes the outcomes
//!
//! Everything runs under a heap checkpoint; any failure leaves the heap as
//! it was.

use indexmap::IndexMap;
use mgraph_core::query::{
    all_constraints, all_properties, declared_multiplicity, declared_type, display_name, find_property,
    is_subtype, member_name, opposite_end,
};
use mgraph_core::{simple_name, slot, EnforcementLevel, Multiplicity, NodeId, NodeKind, PrimitiveKind};
use serde::{Deserialize, Serialize};
use smallvec::smallvec;
use tracing::{debug, warn};

use crate::error::RuntimeError;
use crate::eval::Env;
use crate::heap::GetterOverride;
use crate::runtime::Runtime;
use crate::value::{InstanceId, Value, Values};

/// Property values supplied to a construction, by property name.
pub type KeyValues = Vec<(String, Values)>;

/// Receives the new instance and every constraint outcome; its result is
/// returned in place of the instance.
pub type ConstraintsOverride = Box<dyn FnOnce(InstanceId, &[ConstraintOutcome]) -> Values>;

/// Optional hooks for [`Runtime::dynamic_new`].
#[derive(Default)]
pub struct DynamicNewOverrides {
    pub getter_override: Option<GetterOverride>,
    pub constraints_override: Option<ConstraintsOverride>,
}

/// Result of evaluating one constraint against a new instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintOutcome {
    pub constraint: String,
    /// Class declaring the constraint.
    pub class: String,
    pub level: EnforcementLevel,
    pub passed: bool,
    /// Rendered message, for failed constraints that declare one.
    pub message: Option<String>,
}

impl<'g> Runtime<'g> {
    /// Constructs an instance of `class` from `base` values (empty for `new`,
    /// the source's values for a copy) overlaid with `key_values`.
    ///
    /// Returns the instance and, when a constraints override ran, its result.
    pub(crate) fn construct(
        &mut self,
        class: NodeId,
        base: IndexMap<String, Values>,
        key_values: KeyValues,
        overrides: DynamicNewOverrides,
    ) -> Result<(InstanceId, Option<Values>), RuntimeError> {
        let graph = self.graph;
        self.enter(move || display_name(graph, class))?;
        let mark = self.heap.mark();
        let result = self.construct_marked(class, base, key_values, overrides);
        match &result {
            Ok(_) => self.heap.release(mark),
            Err(err) => {
                debug!(class = %display_name(self.graph, class), error = %err, "construction undone");
                self.heap.restore(mark);
            }
        }
        self.leave();
        result
    }

    fn construct_marked(
        &mut self,
        class: NodeId,
        mut values: IndexMap<String, Values>,
        key_values: KeyValues,
        overrides: DynamicNewOverrides,
    ) -> Result<(InstanceId, Option<Values>), RuntimeError> {
        let graph = self.graph;
        let class_path = display_name(graph, class);
        let class_name = simple_name(&class_path).to_string();

        for (key, given) in key_values {
            let property = find_property(graph, class, &key).ok_or_else(|| RuntimeError::UnknownProperty {
                property: key.clone(),
                class: class_name.clone(),
            })?;
            self.check_types(property, &given, &class_name)?;
            values.insert(key, given);
        }

        let properties = all_properties(graph, class);
        for &property in &properties {
            let Some(name) = member_name(graph, property) else {
                continue;
            };
            if values.contains_key(name) {
                continue;
            }
            if let Some(holder) = graph.first(property, slot::DEFAULT_VALUE) {
                let lambda = self.require(holder, slot::FUNCTION_DEFINITION)?;
                let default = self.eval_sequence(lambda, &Env::new())?;
                values.insert(name.to_string(), default);
            }
        }

        for &property in &properties {
            let (Some(name), Some(multiplicity)) = (
                member_name(graph, property),
                declared_multiplicity(graph, property),
            ) else {
                continue;
            };
            let given = values.get(name).map_or(0, |v| v.len());
            if !multiplicity.contains(given) {
                return Err(RuntimeError::Multiplicity {
                    property: name.to_string(),
                    class: class_name,
                    expected: multiplicity.to_string(),
                    given,
                });
            }
        }

        let id = self.heap.alloc(class, class_path, values);
        self.wire_reverse_ends(id, class)?;
        if let Some(getter) = overrides.getter_override {
            self.heap.set_getter(id, getter);
        }

        match overrides.constraints_override {
            Some(handler) => {
                let outcomes = self.constraint_outcomes(id, class, false)?;
                Ok((id, Some(handler(id, &outcomes))))
            }
            None => {
                if self.options.check_constraints {
                    self.constraint_outcomes(id, class, true)?;
                }
                Ok((id, None))
            }
        }
    }

    /// Checks each supplied value against the property's declared type.
    fn check_types(&self, property: NodeId, given: &Values, class_name: &str) -> Result<(), RuntimeError> {
        let Some(expected) = declared_type(self.graph, property) else {
            return Err(RuntimeError::malformed(property, slot::GENERIC_TYPE));
        };
        for value in given {
            if !self.conforms(value, expected) {
                return Err(RuntimeError::TypeMismatch {
                    context: format!(
                        "property '{}' of '{}'",
                        member_name(self.graph, property).unwrap_or_default(),
                        class_name
                    ),
                    expected: display_name(self.graph, expected),
                    found: self.runtime_type_name(value),
                });
            }
        }
        Ok(())
    }

    fn conforms(&self, value: &Value, expected: NodeId) -> bool {
        let actual = match value {
            Value::Instance(id) => self.heap.get(*id).map(|i| i.class),
            Value::Enum { enumeration, .. } => self.graph.lookup(enumeration),
            Value::Boolean(_) => self.graph.lookup(PrimitiveKind::Boolean.name()),
            Value::Integer(_) => self.graph.lookup(PrimitiveKind::Integer.name()),
            Value::Float(_) => self.graph.lookup(PrimitiveKind::Float.name()),
            Value::String(_) => self.graph.lookup(PrimitiveKind::String.name()),
        };
        actual.is_some_and(|actual| is_subtype(self.graph, actual, expected))
    }

    fn runtime_type_name(&self, value: &Value) -> String {
        match value {
            Value::Instance(id) => self
                .heap
                .get(*id)
                .map_or_else(|| value.type_name().to_string(), |i| i.class_path.clone()),
            other => other.type_name().to_string(),
        }
    }

    // -----------------------------------------------------------------------
    // Reverse association ends
    // -----------------------------------------------------------------------

    /// For every association end set on `id`, links `id` into the opposite
    /// end of each referenced instance.
    fn wire_reverse_ends(&mut self, id: InstanceId, class: NodeId) -> Result<(), RuntimeError> {
        let graph = self.graph;
        let set: Vec<(String, Values)> = match self.heap.get(id) {
            Some(instance) => instance
                .value_map()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            None => return Err(RuntimeError::UnknownInstance { id }),
        };

        for (name, targets) in set {
            let Some(end) = find_property(graph, class, &name) else {
                continue;
            };
            let Some(reverse) = opposite_end(graph, end) else {
                continue;
            };
            let (Some(reverse_name), Some(reverse_multiplicity)) = (
                member_name(graph, reverse),
                declared_multiplicity(graph, reverse),
            ) else {
                continue;
            };
            for target in targets.iter().filter_map(Value::as_instance) {
                self.link(target, reverse_name, id, reverse_multiplicity, &name)?;
            }
        }
        Ok(())
    }

    /// Adds `source` to the `property` end of `target`. A to-one end is
    /// replaced and the displaced partner loses its `forward` link to
    /// `target`; a to-many end may not grow past its upper bound.
    fn link(
        &mut self,
        target: InstanceId,
        property: &str,
        source: InstanceId,
        multiplicity: Multiplicity,
        forward: &str,
    ) -> Result<(), RuntimeError> {
        let instance = self
            .heap
            .get(target)
            .ok_or(RuntimeError::UnknownInstance { id: target })?;
        let class = simple_name(&instance.class_path).to_string();
        let current: Values = instance.get(property).iter().cloned().collect();
        let source_value = Value::Instance(source);

        if multiplicity.upper().is_some_and(|upper| upper <= 1) {
            for displaced in current.iter().filter_map(Value::as_instance) {
                if displaced != source {
                    self.unlink(displaced, forward, target)?;
                }
            }
            return self.heap.set(target, property, smallvec![source_value]);
        }
        if current.contains(&source_value) {
            return Ok(());
        }
        let next: Values = current.into_iter().chain(std::iter::once(source_value)).collect();
        if multiplicity.upper().is_some_and(|upper| next.len() > upper as usize) {
            return Err(RuntimeError::Multiplicity {
                property: property.to_string(),
                class,
                expected: multiplicity.to_string(),
                given: next.len(),
            });
        }
        self.heap.set(target, property, next)
    }

    fn unlink(&mut self, owner: InstanceId, property: &str, partner: InstanceId) -> Result<(), RuntimeError> {
        let Some(instance) = self.heap.get(owner) else {
            return Ok(());
        };
        let partner = Value::Instance(partner);
        if !instance.get(property).contains(&partner) {
            return Ok(());
        }
        let remaining: Values = instance
            .get(property)
            .iter()
            .filter(|v| **v != partner)
            .cloned()
            .collect();
        debug!(instance = %owner, property, "detached displaced association partner");
        self.heap.set(owner, property, remaining)
    }

    // -----------------------------------------------------------------------
    // Constraints
    // -----------------------------------------------------------------------

    /// Evaluates the constraints of `class` against `id` in order. With
    /// `fail_fast`, the first violated error-level constraint is returned as
    /// an error; warn-level violations are logged.
    fn constraint_outcomes(
        &mut self,
        id: InstanceId,
        class: NodeId,
        fail_fast: bool,
    ) -> Result<Vec<ConstraintOutcome>, RuntimeError> {
        let env = Env::from([("this".to_string(), smallvec![Value::Instance(id)])]);
        let mut outcomes = Vec::new();

        for (owner, constraint) in all_constraints(self.graph, class) {
            let (name, level) = match self.graph.kind(constraint) {
                Some(NodeKind::Constraint(c)) => (c.name.clone(), c.enforcement_level),
                _ => return Err(RuntimeError::malformed(constraint, slot::CONSTRAINTS)),
            };
            let function = self.require(constraint, slot::FUNCTION_DEFINITION)?;
            let result = self.eval_sequence(function, &env)?;
            let passed = matches!(result.as_slice(), [Value::Boolean(true)]);

            let message = match self.graph.first(constraint, slot::MESSAGE_FUNCTION) {
                Some(message) if !passed => {
                    let rendered = self.eval_sequence(message, &env)?;
                    Some(rendered.iter().map(Value::to_string).collect::<Vec<_>>().join(""))
                }
                _ => None,
            };
            let outcome = ConstraintOutcome {
                constraint: name,
                class: simple_name(&display_name(self.graph, owner)).to_string(),
                level,
                passed,
                message,
            };

            if fail_fast && !outcome.passed {
                match outcome.level {
                    EnforcementLevel::Warn => {
                        warn!(
                            constraint = %outcome.constraint,
                            class = %outcome.class,
                            message = ?outcome.message,
                            "constraint violated"
                        );
                    }
                    EnforcementLevel::Error => {
                        return Err(RuntimeError::ConstraintViolation {
                            constraint: outcome.constraint,
                            class: outcome.class,
                            message: outcome.message,
                        });
                    }
                }
            }
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }
}
