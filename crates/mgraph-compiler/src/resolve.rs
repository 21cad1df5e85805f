//! Resolution phase: binds stubs to elements until a fixed point.
//!
//! Each pass walks the pending stub worklist and the association worklist.
//! A stub whose reference matches nothing yet stays pending; a pass that
//! binds nothing ends resolution with the first outstanding error. A
//! reference matching several candidates, or matching an element of the
//! wrong kind, fails immediately.

use indexmap::IndexSet;
use mgraph_core::query::{declared_type, display_name, is_class};
use mgraph_core::{
    simple_name, slot, strip_signature, MetaGraph, NodeId, NodeKind, StubNode, StubTarget,
};
use tracing::{debug, trace};

use crate::error::CompilationError;

/// Counters reported by a resolution run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ResolveStats {
    pub resolved_stubs: usize,
    pub wired_associations: usize,
    pub passes: usize,
}

enum Outcome {
    Bound,
    /// Nothing matches yet; carries the error to report if nothing ever does.
    Pending(CompilationError),
}

pub(crate) struct Resolver<'g> {
    graph: &'g mut MetaGraph,
    max_passes: usize,
}

impl<'g> Resolver<'g> {
    pub fn new(graph: &'g mut MetaGraph, max_passes: usize) -> Self {
        Resolver { graph, max_passes }
    }

    /// Runs resolution over the given worklists.
    pub fn run(
        &mut self,
        stubs: Vec<NodeId>,
        associations: Vec<NodeId>,
    ) -> Result<ResolveStats, CompilationError> {
        let mut stats = ResolveStats::default();
        let mut pending_stubs = stubs;
        let mut pending_associations = associations;

        while !pending_stubs.is_empty() || !pending_associations.is_empty() {
            if stats.passes >= self.max_passes {
                return Err(CompilationError::resolution(
                    format!(
                        "Resolution did not reach a fixed point after {} passes",
                        stats.passes
                    ),
                    None,
                ));
            }
            stats.passes += 1;

            let mut progress = false;
            let mut outstanding: Option<CompilationError> = None;

            let mut next_stubs = Vec::new();
            for stub in pending_stubs {
                match self.resolve_stub(stub)? {
                    Outcome::Bound => {
                        stats.resolved_stubs += 1;
                        progress = true;
                    }
                    Outcome::Pending(err) => {
                        outstanding.get_or_insert(err);
                        next_stubs.push(stub);
                    }
                }
            }

            let mut next_associations = Vec::new();
            for association in pending_associations {
                if self.wire_association(association)? {
                    stats.wired_associations += 1;
                    progress = true;
                } else {
                    next_associations.push(association);
                }
            }

            trace!(
                pass = stats.passes,
                stubs = next_stubs.len(),
                associations = next_associations.len(),
                "resolution pass"
            );
            pending_stubs = next_stubs;
            pending_associations = next_associations;

            if !progress && (!pending_stubs.is_empty() || !pending_associations.is_empty()) {
                return Err(outstanding.unwrap_or_else(|| {
                    let association = pending_associations
                        .first()
                        .map(|a| display_name(self.graph, *a))
                        .unwrap_or_default();
                    CompilationError::resolution(
                        format!("The ends of association {} could not be resolved", association),
                        None,
                    )
                }));
            }
        }

        debug!(
            resolved = stats.resolved_stubs,
            associations = stats.wired_associations,
            passes = stats.passes,
            "resolution reached a fixed point"
        );
        Ok(stats)
    }

    // -----------------------------------------------------------------------
    // Stubs
    // -----------------------------------------------------------------------

    fn resolve_stub(&mut self, stub: NodeId) -> Result<Outcome, CompilationError> {
        let Some(node) = self.graph.node(stub) else {
            return Ok(Outcome::Bound);
        };
        let NodeKind::Stub(info) = &node.kind else {
            return Ok(Outcome::Bound);
        };
        let info = info.clone();
        let source = node.source.clone();

        let matches = self.candidates(&info);
        let target = match matches.as_slice() {
            [] => {
                let message = self.not_defined_message(&info, &matches);
                return Ok(Outcome::Pending(CompilationError::resolution(message, source)));
            }
            [single] => *single,
            [first, ..] if matches!(info.expects, StubTarget::Function { .. }) => {
                // Call overloads are narrowed by argument type once types are
                // inferred; until then the call keeps every candidate.
                let call = self.graph.parent(stub);
                let first = *first;
                self.bind(stub, first)?;
                if let Some(call) = call {
                    for candidate in &matches {
                        self.graph.add_edge(call, slot::OVERLOADS, *candidate)?;
                    }
                }
                trace!(stub = %stub, overloads = matches.len(), "deferred overloaded call");
                return Ok(Outcome::Bound);
            }
            many => {
                let mut paths: Vec<String> = many.iter().map(|m| display_name(self.graph, *m)).collect();
                paths.sort();
                return Err(CompilationError::resolution(
                    format!(
                        "{} has been found more than one time in the imports: [{}]",
                        info.reference,
                        paths.join(", ")
                    ),
                    source,
                ));
            }
        };

        let kind_ok = match (info.expects, self.graph.kind(target)) {
            (StubTarget::Type, Some(kind)) => kind.is_type(),
            (StubTarget::Class, Some(NodeKind::Class)) => true,
            (StubTarget::Enumeration, Some(NodeKind::Enumeration)) => true,
            (StubTarget::Function { .. }, Some(NodeKind::Function(_))) => true,
            _ => false,
        };
        if !kind_ok {
            return Err(CompilationError::resolution(
                format!(
                    "{} is not a {}",
                    display_name(self.graph, target),
                    info.expects.label()
                ),
                source,
            ));
        }

        self.bind(stub, target)?;
        Ok(Outcome::Bound)
    }

    /// Replaces the containment edge to `stub` with a reference to `target`
    /// and drops the stub.
    fn bind(&mut self, stub: NodeId, target: NodeId) -> Result<(), CompilationError> {
        let edge = self
            .graph
            .incoming(stub)
            .into_iter()
            .find(|e| e.containment)
            .ok_or_else(|| CompilationError::resolution(format!("stub {} has no owner", stub), None))?;
        self.graph
            .retarget_edge(edge.owner, &edge.slot, edge.offset as usize, target, false)?;
        self.graph.remove_node(stub)?;
        if edge.slot == slot::GENERALIZATIONS {
            self.graph.add_edge(target, slot::SPECIALIZATIONS, edge.owner)?;
        }
        trace!(stub = %stub, target = %target, slot = %edge.slot, "bound reference");
        Ok(())
    }

    /// Qualified paths a reference may denote: the reference itself when
    /// qualified, otherwise the referencing package, each import, then the
    /// root package.
    fn candidate_paths(info: &StubNode) -> IndexSet<String> {
        let mut paths = IndexSet::new();
        if info.reference.contains("::") {
            paths.insert(info.reference.clone());
            return paths;
        }
        if !info.imports.package.is_empty() {
            paths.insert(format!("{}::{}", info.imports.package, info.reference));
        }
        for import in &info.imports.imports {
            paths.insert(format!("{}::{}", import, info.reference));
        }
        paths.insert(info.reference.clone());
        paths
    }

    /// Distinct live elements matching the reference.
    fn candidates(&self, info: &StubNode) -> Vec<NodeId> {
        let mut found = IndexSet::new();
        let paths = Self::candidate_paths(info);
        match info.expects {
            StubTarget::Function { arity } => {
                let name = simple_name(&info.reference);
                for path in self.graph.paths_named(name) {
                    if !paths.contains(strip_signature(&path)) {
                        continue;
                    }
                    if let Some(id) = self.graph.lookup(&path) {
                        if matches!(self.graph.kind(id), Some(NodeKind::Function(f)) if f.arity == arity) {
                            found.insert(id);
                        }
                    }
                }
            }
            _ => {
                for path in &paths {
                    if let Some(id) = self.graph.lookup(path) {
                        found.insert(id);
                    }
                }
            }
        }
        found.into_iter().collect()
    }

    fn not_defined_message(&self, info: &StubNode, exclude: &[NodeId]) -> String {
        let hints: Vec<String> = self
            .graph
            .paths_named(simple_name(&info.reference))
            .into_iter()
            .filter(|path| {
                self.graph
                    .lookup(path)
                    .filter(|id| !exclude.contains(id))
                    .and_then(|id| self.graph.kind(id))
                    .is_some_and(|kind| match info.expects {
                        StubTarget::Function { .. } => matches!(kind, NodeKind::Function(_)),
                        _ => kind.is_type(),
                    })
            })
            .collect();
        let mut message = format!("{} has not been defined!", info.reference);
        if !hints.is_empty() {
            message.push_str(&format!(
                " The system found {} possible matches:\n    {}",
                hints.len(),
                hints.join("\n    ")
            ));
        }
        message
    }

    // -----------------------------------------------------------------------
    // Associations
    // -----------------------------------------------------------------------

    /// Adds each end property to the class on the opposite end once both
    /// end types are bound. Returns `false` while an end is unresolved.
    fn wire_association(&mut self, association: NodeId) -> Result<bool, CompilationError> {
        let ends = self.graph.get_edge(association, slot::PROPERTIES);
        let [first, second] = ends.as_slice() else {
            return Err(CompilationError::resolution(
                format!(
                    "Association {} must have exactly two ends",
                    display_name(self.graph, association)
                ),
                self.graph.node(association).and_then(|n| n.source.clone()),
            ));
        };
        let (first, second) = (*first, *second);

        let mut classes = [NodeId(0); 2];
        for (i, end) in [first, second].into_iter().enumerate() {
            let Some(ty) = declared_type(self.graph, end) else {
                return Ok(false);
            };
            if matches!(self.graph.kind(ty), Some(NodeKind::Stub(_))) {
                return Ok(false);
            }
            if !is_class(self.graph, ty) {
                return Err(CompilationError::resolution(
                    format!(
                        "Association end '{}' must target a Class, found {}",
                        display_name(self.graph, end),
                        display_name(self.graph, ty)
                    ),
                    self.graph.node(end).and_then(|n| n.source.clone()),
                ));
            }
            classes[i] = ty;
        }

        // An end names the property added to the class on the other end.
        self.graph
            .add_edge(classes[1], slot::PROPERTIES_FROM_ASSOCIATIONS, first)?;
        self.graph
            .add_edge(classes[0], slot::PROPERTIES_FROM_ASSOCIATIONS, second)?;
        trace!(association = %association, "wired association ends");
        Ok(true)
    }
}
