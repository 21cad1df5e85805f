//! MetaGraph: the shared, mutable metamodel graph.
//!
//! [`MetaGraph`] is an arena of [`GraphNode`]s stored in a petgraph
//! `StableGraph`, so node ids stay valid across removals. Children are
//! petgraph edges weighted by a [`SlotEdge`] (slot name, offset within the
//! slot, containment flag). Containment edges form a forest rooted at
//! top-level elements; all other edges are non-owning lookups, which is how
//! association cycles and self-referential classes are represented without
//! ownership cycles.
//!
//! Every edge mutation keeps the [`ReferenceIndex`] in step, and while a
//! transaction is open every mutation is appended to the [`Journal`] so
//! that [`MetaGraph::rollback`] can restore the previous state exactly.
//!
//! Only this type mutates the arena. The compiler reads through the
//! accessors and writes through the builder methods below.

use std::collections::{BTreeSet, HashMap, HashSet};

use petgraph::graph::{EdgeIndex, NodeIndex};
use petgraph::stable_graph::StableGraph;
use petgraph::visit::EdgeRef;
use petgraph::{Directed, Direction};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::error::CoreError;
use crate::id::NodeId;
use crate::journal::{Journal, Mutation};
use crate::node::{simple_name, GraphNode, NodeKind};
use crate::source::SourceInformation;
use crate::usage::{ReferenceIndex, ReferenceUsage};

/// Weight of an arena edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotEdge {
    pub slot: String,
    pub offset: u32,
    /// The owner owns the target: removing the owner's subtree removes it.
    pub containment: bool,
}

/// A resolved view of one edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeView {
    pub owner: NodeId,
    pub slot: String,
    pub offset: u32,
    pub target: NodeId,
    pub containment: bool,
}

/// The metamodel graph container.
#[derive(Debug, Clone, Default)]
pub struct MetaGraph {
    arena: StableGraph<GraphNode, SlotEdge, Directed, u32>,
    /// Path -> node for every path-addressable node.
    paths: HashMap<String, NodeId>,
    /// Element name -> paths sharing it (hints and name lookups).
    simple_names: HashMap<String, BTreeSet<String>>,
    usages: ReferenceIndex,
    journal: Option<Journal>,
    /// Nodes removed during the open transaction; purged on commit.
    tombstones: HashSet<NodeId>,
}

impl MetaGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Transactions
    // -----------------------------------------------------------------------

    /// Starts journaling mutations.
    pub fn begin(&mut self) -> Result<(), CoreError> {
        if self.journal.is_some() {
            return Err(CoreError::TransactionInProgress);
        }
        self.journal = Some(Journal::new());
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        self.journal.is_some()
    }

    /// The journal of the open transaction, if any.
    pub fn journal(&self) -> Option<&Journal> {
        self.journal.as_ref()
    }

    /// Makes the journaled mutations the new baseline. Returns the number of
    /// mutations committed.
    pub fn commit(&mut self) -> Result<usize, CoreError> {
        let journal = self.journal.take().ok_or(CoreError::NoTransaction)?;
        for node in std::mem::take(&mut self.tombstones) {
            self.arena.remove_node(node.into());
        }
        Ok(journal.len())
    }

    /// Undoes every journaled mutation, newest first. Returns the number of
    /// mutations undone.
    pub fn rollback(&mut self) -> Result<usize, CoreError> {
        let journal = self.journal.take().ok_or(CoreError::NoTransaction)?;
        let count = journal.len();
        let mut first_error = None;
        for mutation in journal.into_reversed() {
            if let Err(err) = self.undo(mutation) {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(count),
        }
    }

    fn undo(&mut self, mutation: Mutation) -> Result<(), CoreError> {
        match mutation {
            Mutation::NodeCreated { node } => {
                self.tombstones.remove(&node);
                if let Some(weight) = self.arena.remove_node(node.into()) {
                    if let Some(path) = &weight.path {
                        self.unregister_path(path, node);
                    }
                }
                Ok(())
            }
            Mutation::NodeRemoved { node } => {
                self.tombstones.remove(&node);
                let path = self
                    .arena
                    .node_weight(node.into())
                    .ok_or(CoreError::NodeNotFound { id: node })?
                    .path
                    .clone();
                if let Some(path) = path {
                    self.register_path(path, node);
                }
                Ok(())
            }
            Mutation::KindReplaced { node, before } => {
                let weight = self
                    .arena
                    .node_weight_mut(node.into())
                    .ok_or(CoreError::NodeNotFound { id: node })?;
                weight.kind = before;
                Ok(())
            }
            Mutation::EdgeInserted {
                owner, slot, offset, ..
            } => self.raw_remove_edge(owner, &slot, offset).map(|_| ()),
            Mutation::EdgeRemoved {
                owner,
                slot,
                offset,
                target,
                containment,
            } => self.raw_insert_edge(owner, &slot, offset, target, containment),
        }
    }

    fn record(&mut self, mutation: Mutation) {
        if let Some(journal) = self.journal.as_mut() {
            journal.record(mutation);
        }
    }

    // -----------------------------------------------------------------------
    // Node methods
    // -----------------------------------------------------------------------

    /// Creates a node, registering its path if it has one.
    pub fn create_node(
        &mut self,
        kind: NodeKind,
        path: Option<String>,
        source: Option<SourceInformation>,
    ) -> Result<NodeId, CoreError> {
        self.insert_node(GraphNode::new(kind, path, source))
    }

    /// Creates an anonymous node generated internally rather than from
    /// source text.
    pub fn create_synthetic_node(
        &mut self,
        kind: NodeKind,
        source: Option<SourceInformation>,
    ) -> NodeId {
        let idx = self.arena.add_node(GraphNode::synthetic(kind, source));
        let id = NodeId::from(idx);
        self.record(Mutation::NodeCreated { node: id });
        id
    }

    fn insert_node(&mut self, node: GraphNode) -> Result<NodeId, CoreError> {
        if let Some(path) = &node.path {
            if self.paths.contains_key(path) {
                return Err(CoreError::DuplicatePath { path: path.clone() });
            }
        }
        let path = node.path.clone();
        let id = NodeId::from(self.arena.add_node(node));
        if let Some(path) = path {
            self.register_path(path, id);
        }
        self.record(Mutation::NodeCreated { node: id });
        Ok(id)
    }

    fn register_path(&mut self, path: String, id: NodeId) {
        self.simple_names
            .entry(simple_name(&path).to_string())
            .or_default()
            .insert(path.clone());
        self.paths.insert(path, id);
    }

    fn unregister_path(&mut self, path: &str, id: NodeId) {
        if self.paths.get(path) != Some(&id) {
            return;
        }
        self.paths.remove(path);
        let name = simple_name(path);
        if let Some(set) = self.simple_names.get_mut(name) {
            set.remove(path);
            if set.is_empty() {
                self.simple_names.remove(name);
            }
        }
    }

    /// Whether `id` denotes a live node.
    pub fn contains(&self, id: NodeId) -> bool {
        !self.tombstones.contains(&id) && self.arena.contains_node(id.into())
    }

    pub fn node(&self, id: NodeId) -> Option<&GraphNode> {
        if self.tombstones.contains(&id) {
            return None;
        }
        self.arena.node_weight(id.into())
    }

    pub fn kind(&self, id: NodeId) -> Option<&NodeKind> {
        self.node(id).map(|n| &n.kind)
    }

    fn require(&self, id: NodeId) -> Result<&GraphNode, CoreError> {
        self.node(id).ok_or(CoreError::NodeNotFound { id })
    }

    /// Looks up a node by path.
    pub fn lookup(&self, path: &str) -> Option<NodeId> {
        self.paths.get(path).copied()
    }

    /// All registered paths whose element name is `name`, sorted.
    pub fn paths_named(&self, name: &str) -> Vec<String> {
        self.simple_names
            .get(name)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// All registered paths, sorted.
    pub fn paths(&self) -> Vec<(&str, NodeId)> {
        let mut paths: Vec<(&str, NodeId)> =
            self.paths.iter().map(|(p, id)| (p.as_str(), *id)).collect();
        paths.sort();
        paths
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.arena.node_count() - self.tombstones.len()
    }

    /// Number of live edges.
    pub fn edge_count(&self) -> usize {
        self.arena.edge_count()
    }

    /// Live node ids in ascending order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .arena
            .node_indices()
            .map(NodeId::from)
            .filter(|id| !self.tombstones.contains(id))
            .collect();
        ids.sort();
        ids
    }

    /// Replaces a node's payload, returning the previous one.
    pub fn replace_kind(&mut self, id: NodeId, kind: NodeKind) -> Result<NodeKind, CoreError> {
        self.require(id)?;
        let weight = self
            .arena
            .node_weight_mut(id.into())
            .ok_or(CoreError::NodeNotFound { id })?;
        let before = std::mem::replace(&mut weight.kind, kind);
        self.record(Mutation::KindReplaced {
            node: id,
            before: before.clone(),
        });
        Ok(before)
    }

    /// Removes a node and its outgoing edges.
    ///
    /// Fails with [`CoreError::NodeInUse`] while any edge still points at
    /// the node; callers unlink incoming edges first.
    pub fn remove_node(&mut self, id: NodeId) -> Result<GraphNode, CoreError> {
        self.require(id)?;
        let incoming = self
            .arena
            .edges_directed(id.into(), Direction::Incoming)
            .count();
        if incoming > 0 {
            return Err(CoreError::NodeInUse {
                id,
                usages: incoming,
            });
        }
        self.clear_outgoing(id)?;

        let weight = self.require(id)?.clone();
        if let Some(path) = &weight.path {
            self.unregister_path(path, id);
        }
        if self.in_transaction() {
            self.tombstones.insert(id);
            self.record(Mutation::NodeRemoved { node: id });
        } else {
            self.arena.remove_node(id.into());
        }
        Ok(weight)
    }

    /// Removes every outgoing edge of `id`, highest offsets first so that
    /// no shifting happens.
    fn clear_outgoing(&mut self, id: NodeId) -> Result<(), CoreError> {
        let mut edges = self.outgoing(id);
        edges.sort_by(|a, b| a.slot.cmp(&b.slot).then(b.offset.cmp(&a.offset)));
        for edge in edges {
            self.remove_edge(id, &edge.slot, edge.offset as usize)?;
        }
        Ok(())
    }

    /// Nodes reachable from `root` through containment edges, `root` first.
    pub fn containment_subtree(&self, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut seen = HashSet::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if !self.contains(id) || !seen.insert(id) {
                continue;
            }
            out.push(id);
            let mut children: Vec<EdgeView> = self
                .outgoing(id)
                .into_iter()
                .filter(|e| e.containment)
                .collect();
            children.reverse();
            stack.extend(children.into_iter().map(|e| e.target));
        }
        out
    }

    /// Removes `root` and its containment subtree.
    ///
    /// Fails before mutating anything if a node outside the subtree still
    /// points into it.
    pub fn remove_subtree(&mut self, root: NodeId) -> Result<usize, CoreError> {
        self.remove_subtrees(&[root])
    }

    /// Removes several containment subtrees at once. Edges between the
    /// subtrees do not block removal; edges from anywhere else do.
    pub fn remove_subtrees(&mut self, roots: &[NodeId]) -> Result<usize, CoreError> {
        let mut nodes = Vec::new();
        for &root in roots {
            self.require(root)?;
            nodes.extend(self.containment_subtree(root));
        }
        let members: HashSet<NodeId> = nodes.iter().copied().collect();
        for &node in &nodes {
            let external = self
                .incoming(node)
                .into_iter()
                .filter(|e| !members.contains(&e.owner))
                .count();
            if external > 0 {
                return Err(CoreError::NodeInUse {
                    id: node,
                    usages: external,
                });
            }
        }
        for &node in &nodes {
            self.clear_outgoing(node)?;
        }
        let mut removed = 0;
        for &node in &nodes {
            if self.contains(node) {
                self.remove_node(node)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// The containment parent of `id`.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.arena
            .edges_directed(id.into(), Direction::Incoming)
            .find(|e| e.weight().containment)
            .map(|e| NodeId::from(e.source()))
    }

    /// The top-level element containing `id` (possibly `id` itself).
    pub fn root_of(&self, id: NodeId) -> NodeId {
        let mut current = id;
        let mut steps = 0usize;
        while let Some(parent) = self.parent(current) {
            current = parent;
            steps += 1;
            if steps > self.arena.node_count() {
                break;
            }
        }
        current
    }

    // -----------------------------------------------------------------------
    // Edge methods
    // -----------------------------------------------------------------------

    /// Appends a reference edge. Returns its offset.
    pub fn add_edge(&mut self, owner: NodeId, slot: &str, target: NodeId) -> Result<usize, CoreError> {
        let offset = self.slot_len(owner, slot);
        self.insert_edge(owner, slot, offset, target, false)?;
        Ok(offset)
    }

    /// Appends a containment edge. Returns its offset.
    pub fn add_child(&mut self, owner: NodeId, slot: &str, child: NodeId) -> Result<usize, CoreError> {
        let offset = self.slot_len(owner, slot);
        self.insert_edge(owner, slot, offset, child, true)?;
        Ok(offset)
    }

    /// Inserts an edge at `offset`, shifting later edges of the slot up.
    pub fn insert_edge(
        &mut self,
        owner: NodeId,
        slot: &str,
        offset: usize,
        target: NodeId,
        containment: bool,
    ) -> Result<(), CoreError> {
        self.raw_insert_edge(owner, slot, offset as u32, target, containment)?;
        self.record(Mutation::EdgeInserted {
            owner,
            slot: slot.to_string(),
            offset: offset as u32,
            target,
            containment,
        });
        Ok(())
    }

    /// Points `owner.slot` at `target`.
    ///
    /// With `index == None` the slot is replaced by the single value; with
    /// `Some(i)` the value at `i` is replaced (or appended when `i` equals
    /// the slot length). A replaced edge keeps its containment flag.
    pub fn set_edge(
        &mut self,
        owner: NodeId,
        slot: &str,
        index: Option<usize>,
        target: NodeId,
    ) -> Result<(), CoreError> {
        match index {
            None => {
                self.clear_slot(owner, slot)?;
                self.insert_edge(owner, slot, 0, target, false)
            }
            Some(i) => {
                let len = self.slot_len(owner, slot);
                if i > len {
                    return Err(CoreError::OffsetOutOfRange {
                        owner,
                        slot: slot.to_string(),
                        offset: i,
                        len,
                    });
                }
                let containment = if i < len {
                    let (_, containment) = self.remove_edge_full(owner, slot, i)?;
                    containment
                } else {
                    false
                };
                self.insert_edge(owner, slot, i, target, containment)
            }
        }
    }

    /// Replaces the target at `owner.slot[offset]` with an explicit
    /// containment flag. Used when binding a stub to its resolved element.
    pub fn retarget_edge(
        &mut self,
        owner: NodeId,
        slot: &str,
        offset: usize,
        target: NodeId,
        containment: bool,
    ) -> Result<NodeId, CoreError> {
        let (previous, _) = self.remove_edge_full(owner, slot, offset)?;
        self.insert_edge(owner, slot, offset, target, containment)?;
        Ok(previous)
    }

    /// Removes the edge at `owner.slot[offset]`, shifting later edges down.
    /// Returns the former target.
    pub fn remove_edge(&mut self, owner: NodeId, slot: &str, offset: usize) -> Result<NodeId, CoreError> {
        self.remove_edge_full(owner, slot, offset).map(|(target, _)| target)
    }

    fn remove_edge_full(
        &mut self,
        owner: NodeId,
        slot: &str,
        offset: usize,
    ) -> Result<(NodeId, bool), CoreError> {
        let (target, containment) = self.raw_remove_edge(owner, slot, offset as u32)?;
        self.record(Mutation::EdgeRemoved {
            owner,
            slot: slot.to_string(),
            offset: offset as u32,
            target,
            containment,
        });
        Ok((target, containment))
    }

    /// Removes every edge of a slot. Returns how many were removed.
    pub fn clear_slot(&mut self, owner: NodeId, slot: &str) -> Result<usize, CoreError> {
        let len = self.slot_len(owner, slot);
        for offset in (0..len).rev() {
            self.remove_edge(owner, slot, offset)?;
        }
        Ok(len)
    }

    /// Targets of `owner.slot` in offset order.
    pub fn get_edge(&self, owner: NodeId, slot: &str) -> SmallVec<[NodeId; 2]> {
        if !self.contains(owner) {
            return SmallVec::new();
        }
        let mut edges: SmallVec<[(u32, NodeId); 2]> = self
            .arena
            .edges_directed(owner.into(), Direction::Outgoing)
            .filter(|e| e.weight().slot == slot)
            .map(|e| (e.weight().offset, NodeId::from(e.target())))
            .collect();
        edges.sort_by_key(|(offset, _)| *offset);
        edges.into_iter().map(|(_, target)| target).collect()
    }

    /// First target of a slot, if any.
    pub fn first(&self, owner: NodeId, slot: &str) -> Option<NodeId> {
        self.get_edge(owner, slot).first().copied()
    }

    pub fn slot_len(&self, owner: NodeId, slot: &str) -> usize {
        if !self.contains(owner) {
            return 0;
        }
        self.arena
            .edges_directed(owner.into(), Direction::Outgoing)
            .filter(|e| e.weight().slot == slot)
            .count()
    }

    /// Outgoing edges of `owner`, sorted by slot then offset.
    pub fn outgoing(&self, owner: NodeId) -> Vec<EdgeView> {
        if !self.contains(owner) {
            return Vec::new();
        }
        let mut edges: Vec<EdgeView> = self
            .arena
            .edges_directed(owner.into(), Direction::Outgoing)
            .map(|e| EdgeView {
                owner,
                slot: e.weight().slot.clone(),
                offset: e.weight().offset,
                target: NodeId::from(e.target()),
                containment: e.weight().containment,
            })
            .collect();
        edges.sort_by(|a, b| a.slot.cmp(&b.slot).then(a.offset.cmp(&b.offset)));
        edges
    }

    /// Incoming edges of `target`, sorted by owner, slot and offset.
    pub fn incoming(&self, target: NodeId) -> Vec<EdgeView> {
        if !self.contains(target) {
            return Vec::new();
        }
        let mut edges: Vec<EdgeView> = self
            .arena
            .edges_directed(target.into(), Direction::Incoming)
            .map(|e| EdgeView {
                owner: NodeId::from(e.source()),
                slot: e.weight().slot.clone(),
                offset: e.weight().offset,
                target,
                containment: e.weight().containment,
            })
            .collect();
        edges.sort_by(|a, b| {
            a.owner
                .cmp(&b.owner)
                .then(a.slot.cmp(&b.slot))
                .then(a.offset.cmp(&b.offset))
        });
        edges
    }

    // -----------------------------------------------------------------------
    // Reference usages
    // -----------------------------------------------------------------------

    pub fn usages(&self) -> &ReferenceIndex {
        &self.usages
    }

    /// Source-attributable usages of `target`.
    pub fn usages_of(&self, target: NodeId) -> Vec<ReferenceUsage> {
        self.usages.usages_of(target)
    }

    // -----------------------------------------------------------------------
    // Raw edge primitives (index-maintaining, not journaled)
    // -----------------------------------------------------------------------

    fn slot_edges(&self, owner: NodeId, slot: &str) -> Vec<(EdgeIndex<u32>, u32, NodeId)> {
        self.arena
            .edges_directed(owner.into(), Direction::Outgoing)
            .filter(|e| e.weight().slot == slot)
            .map(|e| (e.id(), e.weight().offset, NodeId::from(e.target())))
            .collect()
    }

    fn is_synthetic(&self, id: NodeId) -> bool {
        self.arena
            .node_weight(id.into())
            .map_or(false, |n| n.synthetic)
    }

    fn shift(&mut self, owner: NodeId, slot: &str, edge: EdgeIndex<u32>, from: u32, to: u32, target: NodeId) {
        let synthetic = self.is_synthetic(owner);
        self.usages
            .on_edge_removed(&ReferenceUsage::new(owner, slot, from), target, synthetic);
        if let Some(weight) = self.arena.edge_weight_mut(edge) {
            weight.offset = to;
        }
        self.usages
            .on_edge_added(ReferenceUsage::new(owner, slot, to), target, synthetic);
    }

    fn raw_insert_edge(
        &mut self,
        owner: NodeId,
        slot: &str,
        offset: u32,
        target: NodeId,
        containment: bool,
    ) -> Result<(), CoreError> {
        self.require(owner)?;
        self.require(target)?;
        let mut edges = self.slot_edges(owner, slot);
        if offset as usize > edges.len() {
            return Err(CoreError::OffsetOutOfRange {
                owner,
                slot: slot.to_string(),
                offset: offset as usize,
                len: edges.len(),
            });
        }
        // Shift highest first so no two edges transiently share an offset.
        edges.sort_by(|a, b| b.1.cmp(&a.1));
        for (edge, current, edge_target) in edges {
            if current >= offset {
                self.shift(owner, slot, edge, current, current + 1, edge_target);
            }
        }
        self.arena.add_edge(
            NodeIndex::from(owner),
            NodeIndex::from(target),
            SlotEdge {
                slot: slot.to_string(),
                offset,
                containment,
            },
        );
        let synthetic = self.is_synthetic(owner);
        self.usages
            .on_edge_added(ReferenceUsage::new(owner, slot, offset), target, synthetic);
        Ok(())
    }

    fn raw_remove_edge(
        &mut self,
        owner: NodeId,
        slot: &str,
        offset: u32,
    ) -> Result<(NodeId, bool), CoreError> {
        self.require(owner)?;
        let mut edges = self.slot_edges(owner, slot);
        let (edge, _, target) = edges
            .iter()
            .copied()
            .find(|(_, current, _)| *current == offset)
            .ok_or_else(|| CoreError::EdgeNotFound {
                owner,
                slot: slot.to_string(),
                offset: offset as usize,
            })?;
        let weight = self
            .arena
            .remove_edge(edge)
            .ok_or_else(|| CoreError::EdgeNotFound {
                owner,
                slot: slot.to_string(),
                offset: offset as usize,
            })?;
        let synthetic = self.is_synthetic(owner);
        self.usages
            .on_edge_removed(&ReferenceUsage::new(owner, slot, offset), target, synthetic);

        edges.sort_by_key(|(_, current, _)| *current);
        for (other, current, other_target) in edges {
            if current > offset {
                self.shift(owner, slot, other, current, current - 1, other_target);
            }
        }
        Ok((target, weight.containment))
    }
}
