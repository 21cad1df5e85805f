//! The `Repository`: one metamodel graph, its sources and the incremental
//! compile loop.
//!
//! Staging calls (`add_source`, `update_source`, `delete_source`) only touch
//! the registry. `compile` processes every pending source in one
//! transaction:
//!
//! 1. compute the recompilation closure: pending sources plus every source
//!    whose elements reference their elements, transitively
//! 2. unlink and remove the closure's committed elements
//! 3. parse and build the closure's sources (stubs for every reference)
//! 4. resolve stubs and wire associations to a fixed point
//! 5. validate the rebuilt elements
//! 6. commit, or roll back everything on the first failure

use std::collections::{HashSet, VecDeque};

use mgraph_core::query::{declaring_owner, display_name, find_property, is_class};
use mgraph_core::{
    simple_name, slot, strip_signature, MetaGraph, NodeId, NodeKind, PrimitiveKind,
    ReferenceUsage, SourceInformation,
};
use mgraph_syntax::{Parser, TextParser};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::builder::GraphBuilder;
use crate::error::{CompilationError, RegistryError};
use crate::options::CompilerOptions;
use crate::registry::{SourceRegistry, SourceState, SourceUnit};
use crate::resolve::Resolver;
use crate::transaction::CompilationTransaction;
use crate::validate::Validator;

/// Summary of a successful compile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileReport {
    /// Sources rebuilt and now compiled, in registry order.
    pub compiled_sources: Vec<String>,
    /// Sources whose deletion was committed.
    pub removed_sources: Vec<String>,
    /// Nodes created by the compile, stubs included.
    pub created_nodes: usize,
    pub resolved_stubs: usize,
    pub inferred_expressions: usize,
}

impl CompileReport {
    /// Whether the compile had nothing to do.
    pub fn is_empty(&self) -> bool {
        self.compiled_sources.is_empty() && self.removed_sources.is_empty()
    }
}

/// Where a property is declared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyLocation {
    /// Path of the declaring property node, e.g. `model::A.prop1`.
    pub path: String,
    /// Path of the declaring class or association.
    pub owner: String,
    pub source: Option<SourceInformation>,
}

#[derive(Debug, Default)]
struct PhaseStats {
    resolved_stubs: usize,
    inferred_expressions: usize,
}

/// The metamodel graph together with the sources compiled into it.
pub struct Repository {
    graph: MetaGraph,
    registry: SourceRegistry,
    parser: Box<dyn Parser>,
    options: CompilerOptions,
}

impl Default for Repository {
    fn default() -> Self {
        Self::new()
    }
}

impl Repository {
    /// A repository holding only the primitive types, using [`TextParser`].
    pub fn new() -> Self {
        Self::with_parser(TextParser)
    }

    pub fn with_parser(parser: impl Parser + 'static) -> Self {
        let mut graph = MetaGraph::new();
        for kind in PrimitiveKind::ALL {
            graph
                .create_node(NodeKind::PrimitiveType(kind), Some(kind.name().to_string()), None)
                .expect("primitive paths are unique in a fresh graph");
        }
        Repository {
            graph,
            registry: SourceRegistry::new(),
            parser: Box::new(parser),
            options: CompilerOptions::default(),
        }
    }

    pub fn with_options(mut self, options: CompilerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &CompilerOptions {
        &self.options
    }

    /// The committed graph.
    pub fn graph(&self) -> &MetaGraph {
        &self.graph
    }

    // -----------------------------------------------------------------------
    // Staging
    // -----------------------------------------------------------------------

    pub fn add_source(&mut self, path: &str, text: &str) -> Result<(), RegistryError> {
        self.registry.add(path, text)?;
        debug!(source = path, "source staged");
        Ok(())
    }

    /// Stages new text. Returns `false` when the update was skipped because
    /// the text is what is already compiled.
    pub fn update_source(&mut self, path: &str, text: &str) -> Result<bool, RegistryError> {
        let staged = self
            .registry
            .update(path, text, self.options.skip_unchanged_updates)?;
        debug!(source = path, staged, "source update");
        Ok(staged)
    }

    pub fn delete_source(&mut self, path: &str) -> Result<(), RegistryError> {
        self.registry.delete(path)?;
        debug!(source = path, "source staged for deletion");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Compile
    // -----------------------------------------------------------------------

    /// Compiles every pending source atomically.
    pub fn compile(&mut self) -> Result<CompileReport, CompilationError> {
        let pending = self.registry.pending();
        if pending.is_empty() {
            debug!("nothing to compile");
            return Ok(CompileReport::default());
        }
        let closure = self.recompilation_closure(&pending);
        debug!(pending = ?pending, closure = ?closure, "recompilation closure");

        let mut tx = CompilationTransaction::begin(&mut self.graph, &self.registry, closure.clone())?;
        let result = self.run_phases(&closure);
        match result {
            Ok(stats) => {
                let created_nodes = self
                    .graph
                    .journal()
                    .map_or(0, |journal| journal.created_nodes().count());
                let outcome = tx.commit(&mut self.graph, &mut self.registry)?;
                let report = CompileReport {
                    compiled_sources: outcome.compiled,
                    removed_sources: outcome.removed,
                    created_nodes,
                    resolved_stubs: stats.resolved_stubs,
                    inferred_expressions: stats.inferred_expressions,
                };
                info!(
                    compiled = report.compiled_sources.len(),
                    removed = report.removed_sources.len(),
                    nodes = self.graph.node_count(),
                    "repository compiled"
                );
                Ok(report)
            }
            Err(err) => Err(tx.rollback(&mut self.graph, &mut self.registry, err)),
        }
    }

    /// Pending sources plus every source owning an element that references
    /// an element of the closure, transitively. Derived back-references do
    /// not count. Returned in registry order.
    fn recompilation_closure(&self, pending: &[String]) -> Vec<String> {
        let mut closure: HashSet<String> = pending.iter().cloned().collect();
        let mut queue: VecDeque<String> = pending.iter().cloned().collect();

        while let Some(path) = queue.pop_front() {
            let Some(unit) = self.registry.get(&path) else {
                continue;
            };
            for element in &unit.elements {
                let Some(root) = self.graph.lookup(element) else {
                    continue;
                };
                for node in self.graph.containment_subtree(root) {
                    for edge in self.graph.incoming(node) {
                        if edge.containment || slot::is_derived(&edge.slot) {
                            continue;
                        }
                        let owner_root = self.graph.root_of(edge.owner);
                        let Some(owner_path) = self.graph.node(owner_root).and_then(|n| n.path.as_deref())
                        else {
                            continue;
                        };
                        if let Some(dependent) = self.registry.element_source(owner_path) {
                            if closure.insert(dependent.to_string()) {
                                queue.push_back(dependent.to_string());
                            }
                        }
                    }
                }
            }
        }

        let mut ordered: Vec<String> = closure.into_iter().collect();
        ordered.sort_by_key(|p| self.registry.index_of(p));
        ordered
    }

    fn run_phases(&mut self, closure: &[String]) -> Result<PhaseStats, CompilationError> {
        self.remove_committed_elements(closure)?;

        let mut builder = GraphBuilder::new(&mut self.graph);
        for path in closure {
            let Some(unit) = self.registry.get(path) else {
                continue;
            };
            if unit.state == SourceState::Deleted {
                continue;
            }
            let parsed = self.parser.parse(path, &unit.text)?;
            let elements = builder.build_source(&parsed)?;
            if let Some(unit) = self.registry.get_mut(path) {
                unit.elements = elements.into_iter().collect();
                unit.state = SourceState::Parsed;
            }
        }
        let built = builder.finish();
        debug!(
            elements = built.elements.len(),
            stubs = built.stubs.len(),
            "parse phase complete"
        );

        let resolved = Resolver::new(&mut self.graph, self.options.max_resolution_passes)
            .run(built.stubs, built.associations)?;
        let validated = Validator::new(&mut self.graph)?.run(&built.elements)?;

        Ok(PhaseStats {
            resolved_stubs: resolved.resolved_stubs,
            inferred_expressions: validated.expressions,
        })
    }

    /// Removes the committed elements of the closure. Derived back-edges
    /// from elements outside the closure are unlinked first; any other
    /// outside reference means the closure is incomplete.
    fn remove_committed_elements(&mut self, closure: &[String]) -> Result<(), CompilationError> {
        let mut roots = Vec::new();
        for path in closure {
            if let Some(unit) = self.registry.get(path) {
                roots.extend(unit.elements.iter().filter_map(|e| self.graph.lookup(e)));
            }
        }

        let mut members = HashSet::new();
        for &root in &roots {
            members.extend(self.graph.containment_subtree(root));
        }
        let mut derived = Vec::new();
        for &node in &members {
            derived.extend(
                self.graph
                    .incoming(node)
                    .into_iter()
                    .filter(|e| !members.contains(&e.owner) && slot::is_derived(&e.slot)),
            );
        }
        // Highest offsets first so that earlier removals do not shift later ones.
        derived.sort_by(|a, b| {
            a.owner
                .cmp(&b.owner)
                .then(a.slot.cmp(&b.slot))
                .then(b.offset.cmp(&a.offset))
        });
        for edge in &derived {
            self.graph
                .remove_edge(edge.owner, &edge.slot, edge.offset as usize)?;
        }

        let removed = self.graph.remove_subtrees(&roots)?;
        for path in closure {
            if let Some(unit) = self.registry.get_mut(path) {
                unit.elements.clear();
            }
        }
        debug!(
            roots = roots.len(),
            removed,
            unlinked = derived.len(),
            "removed committed elements"
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Canonical serialization of the committed graph.
    pub fn serialize(&self) -> Vec<u8> {
        self.graph.serialize()
    }

    pub fn fingerprint(&self) -> blake3::Hash {
        self.graph.fingerprint()
    }

    pub fn lookup(&self, path: &str) -> Option<NodeId> {
        self.graph.lookup(path)
    }

    /// A function by full signature path, or by qualified name when exactly
    /// one function carries it.
    pub fn get_function(&self, signature: &str) -> Option<NodeId> {
        let is_function = |id: NodeId| matches!(self.graph.kind(id), Some(NodeKind::Function(_)));
        if let Some(id) = self.graph.lookup(signature).filter(|id| is_function(*id)) {
            return Some(id);
        }
        if signature.contains('(') {
            return None;
        }
        let matches: Vec<NodeId> = self
            .graph
            .paths_named(simple_name(signature))
            .into_iter()
            .filter(|path| strip_signature(path) == signature)
            .filter_map(|path| self.graph.lookup(&path))
            .filter(|id| is_function(*id))
            .collect();
        match matches.as_slice() {
            [single] => Some(*single),
            _ => None,
        }
    }

    /// The declaring location of `property` as seen from `class_path`.
    /// Inherited properties report the ancestor that declares them.
    pub fn property_path(&self, class_path: &str, property: &str) -> Option<PropertyLocation> {
        let class = self.graph.lookup(class_path).filter(|c| is_class(&self.graph, *c))?;
        let found = find_property(&self.graph, class, property)?;
        let node = self.graph.node(found)?;
        let owner = declaring_owner(&self.graph, found)?;
        Some(PropertyLocation {
            path: node.path.clone()?,
            owner: display_name(&self.graph, owner),
            source: node.source.clone(),
        })
    }

    /// Source-attributable usages of the element at `path`.
    pub fn usages_of(&self, path: &str) -> Vec<ReferenceUsage> {
        self.graph
            .lookup(path)
            .map(|id| self.graph.usages_of(id))
            .unwrap_or_default()
    }

    pub fn source(&self, path: &str) -> Option<&SourceUnit> {
        self.registry.get(path)
    }

    pub fn sources(&self) -> impl Iterator<Item = &SourceUnit> {
        self.registry.units()
    }

    pub fn state(&self, path: &str) -> Option<SourceState> {
        self.registry.state(path)
    }

    /// The source owning a top-level element.
    pub fn element_source(&self, element_path: &str) -> Option<&str> {
        self.registry.element_source(element_path)
    }

    /// Whether the top-level element at `element_path` belongs to a
    /// compiled source.
    pub fn is_compiled(&self, element_path: &str) -> bool {
        self.element_source(element_path)
            .and_then(|source| self.registry.state(source))
            == Some(SourceState::Compiled)
    }
}
