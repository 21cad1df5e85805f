//! Expression evaluation over compiled expression nodes.
//!
//! Evaluation walks the expression subtrees the compiler built and
//! validated. Every expression yields a [`Values`] collection; operators
//! that need a single operand reject collections of any other size.

use std::cmp::Ordering;
use std::collections::HashMap;

use mgraph_core::query::{display_name, find_property, member_name};
use mgraph_core::{simple_name, slot, ExpressionNode, Literal, NodeId, NodeKind, Operator};
use smallvec::smallvec;

use crate::construct::{DynamicNewOverrides, KeyValues};
use crate::error::RuntimeError;
use crate::runtime::Runtime;
use crate::value::{InstanceId, Value, Values};

/// Variable bindings: parameters, or `this` inside constraints.
pub(crate) type Env = HashMap<String, Values>;

impl<'g> Runtime<'g> {
    /// Evaluates `owner.expressionSequence` and returns the last result.
    pub(crate) fn eval_sequence(&mut self, owner: NodeId, env: &Env) -> Result<Values, RuntimeError> {
        let mut last = None;
        for expr in self.graph.get_edge(owner, slot::EXPRESSION_SEQUENCE) {
            last = Some(self.eval(expr, env)?);
        }
        last.ok_or_else(|| RuntimeError::malformed(owner, slot::EXPRESSION_SEQUENCE))
    }

    pub(crate) fn eval(&mut self, expr: NodeId, env: &Env) -> Result<Values, RuntimeError> {
        let payload = match self.graph.kind(expr) {
            Some(NodeKind::Expression(payload)) => payload.clone(),
            _ => return Err(RuntimeError::malformed(expr, "expression")),
        };

        match payload {
            ExpressionNode::Literal(literal) => Ok(smallvec![literal_value(literal)]),
            ExpressionNode::Collection => {
                let mut out = Values::new();
                for value in self.graph.get_edge(expr, slot::VALUES) {
                    out.extend(self.eval(value, env)?);
                }
                Ok(out)
            }
            ExpressionNode::EnumValue { value } => {
                let enumeration = self.require(expr, slot::ENUMERATION)?;
                Ok(smallvec![Value::Enum {
                    enumeration: display_name(self.graph, enumeration),
                    value,
                }])
            }
            ExpressionNode::New => {
                let class = self.require(expr, slot::CLASS)?;
                let key_values = self.eval_key_values(expr, env)?;
                let (id, _) = self.construct(class, Default::default(), key_values, DynamicNewOverrides::default())?;
                Ok(smallvec![Value::Instance(id)])
            }
            ExpressionNode::Copy => {
                let source = self.require(expr, slot::SOURCE)?;
                let original = self.eval(source, env)?;
                let original = single_instance(&original, "copy")?;
                let key_values = self.eval_key_values(expr, env)?;
                let id = self.copy_instance(original, key_values)?;
                Ok(smallvec![Value::Instance(id)])
            }
            ExpressionNode::KeyValue { .. } => {
                let value = self.require(expr, slot::VALUE)?;
                self.eval(value, env)
            }
            ExpressionNode::Variable { name } => env
                .get(&name)
                .cloned()
                .ok_or(RuntimeError::UnknownVariable { name }),
            ExpressionNode::PropertyAccess { property } => {
                let receiver = self.require(expr, slot::RECEIVER)?;
                let mut out = Values::new();
                for value in self.eval(receiver, env)? {
                    let id = value.as_instance().ok_or_else(|| RuntimeError::InvalidOperand {
                        operator: format!(".{}", property),
                        found: value.type_name().to_string(),
                    })?;
                    out.extend(self.read(id, &property)?);
                }
                Ok(out)
            }
            ExpressionNode::Call => {
                let function = self.require(expr, slot::FUNCTION)?;
                let mut args = Vec::new();
                for argument in self.graph.get_edge(expr, slot::ARGUMENTS) {
                    args.push(self.eval(argument, env)?);
                }
                self.invoke(function, args)
            }
            ExpressionNode::Operator(op) => self.eval_operator(expr, op, env),
        }
    }

    /// Calls `function` with one collection per parameter.
    pub(crate) fn invoke(&mut self, function: NodeId, args: Vec<Values>) -> Result<Values, RuntimeError> {
        let parameters = self.graph.get_edge(function, slot::PARAMETERS);
        if parameters.len() != args.len() {
            return Err(RuntimeError::ArgumentCount {
                function: display_name(self.graph, function),
                expected: parameters.len(),
                given: args.len(),
            });
        }
        let env: Env = parameters
            .into_iter()
            .zip(args)
            .map(|(parameter, values)| {
                let name = member_name(self.graph, parameter).unwrap_or_default().to_string();
                (name, values)
            })
            .collect();

        let graph = self.graph;
        self.enter(move || display_name(graph, function))?;
        let result = self.eval_sequence(function, &env);
        self.leave();
        result
    }

    /// Reads a property of an instance. A getter override sees the read
    /// first; unset properties read as empty.
    pub(crate) fn read(&self, id: InstanceId, property: &str) -> Result<Values, RuntimeError> {
        let instance = self.heap.get(id).ok_or(RuntimeError::UnknownInstance { id })?;
        if find_property(self.graph, instance.class, property).is_none() {
            return Err(RuntimeError::UnknownProperty {
                property: property.to_string(),
                class: simple_name(&instance.class_path).to_string(),
            });
        }
        if let Some(getter) = self.heap.getter(id) {
            if let Some(values) = getter(instance, property) {
                return Ok(values);
            }
        }
        Ok(instance.get(property).iter().cloned().collect())
    }

    fn eval_key_values(&mut self, expr: NodeId, env: &Env) -> Result<KeyValues, RuntimeError> {
        let mut key_values = Vec::new();
        for kv in self.graph.get_edge(expr, slot::KEY_VALUES) {
            let key = match self.graph.kind(kv) {
                Some(NodeKind::Expression(ExpressionNode::KeyValue { key })) => key.clone(),
                _ => return Err(RuntimeError::malformed(kv, slot::KEY_VALUES)),
            };
            let values = self.eval(kv, env)?;
            key_values.push((key, values));
        }
        Ok(key_values)
    }

    // -----------------------------------------------------------------------
    // Operators
    // -----------------------------------------------------------------------

    fn eval_operator(&mut self, expr: NodeId, op: Operator, env: &Env) -> Result<Values, RuntimeError> {
        let operands = self.graph.get_edge(expr, slot::OPERANDS);
        if operands.len() != op.arity() {
            return Err(RuntimeError::malformed(expr, slot::OPERANDS));
        }

        // Short-circuit before evaluating the right-hand side.
        if matches!(op, Operator::And | Operator::Or) {
            let left = self.eval(operands[0], env)?;
            let left = boolean(op, &left)?;
            if (op == Operator::And) != left {
                return Ok(smallvec![Value::Boolean(left)]);
            }
            let right = self.eval(operands[1], env)?;
            return Ok(smallvec![Value::Boolean(boolean(op, &right)?)]);
        }

        let mut values = Vec::with_capacity(operands.len());
        for operand in operands {
            values.push(self.eval(operand, env)?);
        }
        let result = match (op, values.as_slice()) {
            (Operator::Size, [v]) => Value::Integer(v.len() as i64),
            (Operator::IsEmpty, [v]) => Value::Boolean(v.is_empty()),
            (Operator::IsNotEmpty, [v]) => Value::Boolean(!v.is_empty()),
            (Operator::Not, [v]) => Value::Boolean(!boolean(op, v)?),
            (Operator::Eq, [a, b]) => Value::Boolean(a == b),
            (Operator::NotEq, [a, b]) => Value::Boolean(a != b),
            (Operator::Lt | Operator::LtEq | Operator::Gt | Operator::GtEq, [a, b]) => {
                let ordering = compare(op, single(op, a)?, single(op, b)?)?;
                Value::Boolean(match op {
                    Operator::Lt => ordering == Some(Ordering::Less),
                    Operator::LtEq => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
                    Operator::Gt => ordering == Some(Ordering::Greater),
                    _ => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
                })
            }
            (Operator::Add | Operator::Sub | Operator::Mul, [a, b]) => {
                arithmetic(op, single(op, a)?, single(op, b)?)?
            }
            _ => return Err(RuntimeError::malformed(expr, slot::OPERANDS)),
        };
        Ok(smallvec![result])
    }

    pub(crate) fn require(&self, owner: NodeId, slot_name: &str) -> Result<NodeId, RuntimeError> {
        self.graph
            .first(owner, slot_name)
            .ok_or_else(|| RuntimeError::malformed(owner, slot_name))
    }
}

fn literal_value(literal: Literal) -> Value {
    match literal {
        Literal::String(s) => Value::String(s),
        Literal::Integer(i) => Value::Integer(i),
        Literal::Float(x) => Value::Float(x),
        Literal::Boolean(b) => Value::Boolean(b),
    }
}

fn single(op: Operator, values: &Values) -> Result<&Value, RuntimeError> {
    match values.as_slice() {
        [value] => Ok(value),
        _ => Err(RuntimeError::InvalidOperand {
            operator: op.symbol().to_string(),
            found: format!("a collection of size {}", values.len()),
        }),
    }
}

fn single_instance(values: &Values, operator: &str) -> Result<InstanceId, RuntimeError> {
    match values.as_slice() {
        [Value::Instance(id)] => Ok(*id),
        [other] => Err(RuntimeError::InvalidOperand {
            operator: operator.to_string(),
            found: other.type_name().to_string(),
        }),
        _ => Err(RuntimeError::InvalidOperand {
            operator: operator.to_string(),
            found: format!("a collection of size {}", values.len()),
        }),
    }
}

fn boolean(op: Operator, values: &Values) -> Result<bool, RuntimeError> {
    let value = single(op, values)?;
    value.as_bool().ok_or_else(|| RuntimeError::InvalidOperand {
        operator: op.symbol().to_string(),
        found: value.type_name().to_string(),
    })
}

fn as_float(value: &Value) -> Option<f64> {
    match value {
        Value::Integer(i) => Some(*i as f64),
        Value::Float(x) => Some(*x),
        _ => None,
    }
}

fn invalid(op: Operator, a: &Value, b: &Value) -> RuntimeError {
    RuntimeError::InvalidOperand {
        operator: op.symbol().to_string(),
        found: format!("{} and {}", a.type_name(), b.type_name()),
    }
}

fn compare(op: Operator, a: &Value, b: &Value) -> Result<Option<Ordering>, RuntimeError> {
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => Ok(Some(x.cmp(y))),
        (Value::String(x), Value::String(y)) => Ok(Some(x.cmp(y))),
        _ => match (as_float(a), as_float(b)) {
            (Some(x), Some(y)) => Ok(x.partial_cmp(&y)),
            _ => Err(invalid(op, a, b)),
        },
    }
}

fn arithmetic(op: Operator, a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    match (op, a, b) {
        (Operator::Add, Value::String(x), Value::String(y)) => Ok(Value::String(format!("{}{}", x, y))),
        (_, Value::Integer(x), Value::Integer(y)) => {
            let result = match op {
                Operator::Add => x.checked_add(*y),
                Operator::Sub => x.checked_sub(*y),
                _ => x.checked_mul(*y),
            };
            result.map(Value::Integer).ok_or_else(|| RuntimeError::IntegerOverflow {
                operator: op.symbol().to_string(),
            })
        }
        _ => match (as_float(a), as_float(b)) {
            (Some(x), Some(y)) => Ok(Value::Float(match op {
                Operator::Add => x + y,
                Operator::Sub => x - y,
                _ => x * y,
            })),
            _ => Err(invalid(op, a, b)),
        },
    }
}
