//! The `Runtime`: evaluates compiled functions and constructs instances
//! against a committed metamodel graph.
//!
//! The graph is only read. All mutable state lives in the [`Heap`].

use mgraph_core::query::is_class;
use mgraph_core::{simple_name, strip_signature, MetaGraph, NodeId, NodeKind};
use smallvec::smallvec;
use tracing::debug;

use crate::construct::{DynamicNewOverrides, KeyValues};
use crate::error::RuntimeError;
use crate::heap::{Heap, Instance};
use crate::options::RuntimeOptions;
use crate::value::{InstanceId, Value, Values};

pub struct Runtime<'g> {
    pub(crate) graph: &'g MetaGraph,
    pub(crate) heap: Heap,
    pub(crate) options: RuntimeOptions,
    pub(crate) depth: usize,
}

impl<'g> Runtime<'g> {
    pub fn new(graph: &'g MetaGraph) -> Self {
        Self::with_options(graph, RuntimeOptions::default())
    }

    pub fn with_options(graph: &'g MetaGraph, options: RuntimeOptions) -> Self {
        Runtime {
            graph,
            heap: Heap::new(),
            options,
            depth: 0,
        }
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn instance(&self, id: InstanceId) -> Option<&Instance> {
        self.heap.get(id)
    }

    // -----------------------------------------------------------------------
    // Construction
    // -----------------------------------------------------------------------

    /// `^Class(key=value, ...)`: defaults fill unset properties, reverse
    /// association ends are wired and constraints are checked.
    pub fn new_instance(&mut self, class_path: &str, key_values: KeyValues) -> Result<InstanceId, RuntimeError> {
        let class = self.class(class_path)?;
        let (id, _) = self.construct(class, Default::default(), key_values, DynamicNewOverrides::default())?;
        debug!(class = class_path, instance = %id, "instance created");
        Ok(id)
    }

    /// `^$source(key=value, ...)`: a new instance starting from the values of
    /// `source`. Reverse association ends are derived again for the copy.
    pub fn copy_instance(&mut self, source: InstanceId, key_values: KeyValues) -> Result<InstanceId, RuntimeError> {
        let original = self
            .heap
            .get(source)
            .ok_or(RuntimeError::UnknownInstance { id: source })?;
        let class = original.class;
        let values = original.value_map().clone();
        let (id, _) = self.construct(class, values, key_values, DynamicNewOverrides::default())?;
        debug!(source = %source, instance = %id, "instance copied");
        Ok(id)
    }

    /// Construction with caller-supplied overrides. Returns the new instance,
    /// or whatever the constraints override returns in its place.
    pub fn dynamic_new(
        &mut self,
        class_path: &str,
        key_values: KeyValues,
        overrides: DynamicNewOverrides,
    ) -> Result<Values, RuntimeError> {
        let class = self.class(class_path)?;
        let (id, replaced) = self.construct(class, Default::default(), key_values, overrides)?;
        Ok(replaced.unwrap_or_else(|| smallvec![Value::Instance(id)]))
    }

    // -----------------------------------------------------------------------
    // Evaluation
    // -----------------------------------------------------------------------

    /// Calls a function by full signature path, or by qualified name when
    /// exactly one function carries it.
    pub fn evaluate_function(&mut self, signature: &str, args: Vec<Values>) -> Result<Values, RuntimeError> {
        let function = self
            .function(signature)
            .ok_or_else(|| RuntimeError::UnknownFunction {
                signature: signature.to_string(),
            })?;
        self.invoke(function, args)
    }

    /// Reads a property, honoring a getter override on the instance.
    pub fn get(&self, instance: InstanceId, property: &str) -> Result<Values, RuntimeError> {
        self.read(instance, property)
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    fn class(&self, path: &str) -> Result<NodeId, RuntimeError> {
        self.graph
            .lookup(path)
            .filter(|c| is_class(self.graph, *c))
            .ok_or_else(|| RuntimeError::UnknownClass {
                path: path.to_string(),
            })
    }

    fn function(&self, signature: &str) -> Option<NodeId> {
        let is_function = |id: NodeId| matches!(self.graph.kind(id), Some(NodeKind::Function(_)));
        if let Some(id) = self.graph.lookup(signature).filter(|id| is_function(*id)) {
            return Some(id);
        }
        if signature.contains('(') {
            return None;
        }
        let mut matches = self
            .graph
            .paths_named(simple_name(signature))
            .into_iter()
            .filter(|path| strip_signature(path) == signature)
            .filter_map(|path| self.graph.lookup(&path))
            .filter(|id| is_function(*id));
        match (matches.next(), matches.next()) {
            (Some(single), None) => Some(single),
            _ => None,
        }
    }

    /// Bounds nesting of calls and constructions.
    pub(crate) fn enter(&mut self, what: impl FnOnce() -> String) -> Result<(), RuntimeError> {
        if self.depth >= self.options.max_eval_depth {
            return Err(RuntimeError::RecursionLimitExceeded {
                function: what(),
                limit: self.options.max_eval_depth,
            });
        }
        self.depth += 1;
        Ok(())
    }

    pub(crate) fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }
}
