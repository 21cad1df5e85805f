//! Read-only metamodel queries over a compiled [`MetaGraph`].
//!
//! These walk the slot vocabulary (properties, generalizations, generic
//! types) and are shared by the validation pass and the runtime.

use std::collections::{HashSet, VecDeque};

use crate::graph::MetaGraph;
use crate::id::NodeId;
use crate::multiplicity::Multiplicity;
use crate::node::{slot, NodeKind, PrimitiveKind};

/// Raw type of a generic type node.
pub fn raw_type(graph: &MetaGraph, generic_type: NodeId) -> Option<NodeId> {
    graph.first(generic_type, slot::RAW_TYPE)
}

/// Declared type of a property or parameter.
pub fn declared_type(graph: &MetaGraph, typed: NodeId) -> Option<NodeId> {
    graph
        .first(typed, slot::GENERIC_TYPE)
        .and_then(|gt| raw_type(graph, gt))
}

/// Declared multiplicity of a property or parameter.
pub fn declared_multiplicity(graph: &MetaGraph, typed: NodeId) -> Option<Multiplicity> {
    multiplicity_at(graph, typed, slot::MULTIPLICITY)
}

/// The multiplicity node hanging off `owner.slot`.
pub fn multiplicity_at(graph: &MetaGraph, owner: NodeId, slot_name: &str) -> Option<Multiplicity> {
    match graph.first(owner, slot_name).and_then(|m| graph.kind(m)) {
        Some(NodeKind::Multiplicity(m)) => Some(*m),
        _ => None,
    }
}

/// Name of a property, parameter or enum value.
pub fn member_name(graph: &MetaGraph, node: NodeId) -> Option<&str> {
    match graph.kind(node)? {
        NodeKind::Property { name } | NodeKind::Parameter { name } | NodeKind::EnumValue { name } => {
            Some(name.as_str())
        }
        _ => None,
    }
}

/// Path of a node, or its kind label for anonymous nodes.
pub fn display_name(graph: &MetaGraph, node: NodeId) -> String {
    match graph.node(node) {
        Some(n) => n.path.clone().unwrap_or_else(|| n.kind.label().to_string()),
        None => format!("<missing {}>", node),
    }
}

pub fn primitive_kind(graph: &MetaGraph, node: NodeId) -> Option<PrimitiveKind> {
    match graph.kind(node)? {
        NodeKind::PrimitiveType(p) => Some(*p),
        _ => None,
    }
}

pub fn is_class(graph: &MetaGraph, node: NodeId) -> bool {
    matches!(graph.kind(node), Some(NodeKind::Class))
}

/// `class` followed by all its ancestors, breadth-first, without repeats.
pub fn class_hierarchy(graph: &MetaGraph, class: NodeId) -> Vec<NodeId> {
    let mut order = Vec::new();
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([class]);
    while let Some(current) = queue.pop_front() {
        if !seen.insert(current) {
            continue;
        }
        order.push(current);
        queue.extend(graph.get_edge(current, slot::GENERALIZATIONS));
    }
    order
}

/// `class` followed by every class that specializes it, directly or
/// transitively, breadth-first.
pub fn class_descendants(graph: &MetaGraph, class: NodeId) -> Vec<NodeId> {
    let mut order = Vec::new();
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([class]);
    while let Some(current) = queue.pop_front() {
        if !seen.insert(current) {
            continue;
        }
        order.push(current);
        queue.extend(graph.get_edge(current, slot::SPECIALIZATIONS));
    }
    order
}

/// Properties declared directly on `class` followed by the association
/// ends it receives.
pub fn own_properties(graph: &MetaGraph, class: NodeId) -> Vec<NodeId> {
    let mut props: Vec<NodeId> = graph.get_edge(class, slot::PROPERTIES).into_iter().collect();
    let mut from_associations: Vec<NodeId> = graph
        .get_edge(class, slot::PROPERTIES_FROM_ASSOCIATIONS)
        .into_iter()
        .collect();
    // Derived slot: order by path so that results do not depend on wiring order.
    from_associations.sort_by_key(|p| graph.node(*p).and_then(|n| n.path.clone()));
    props.extend(from_associations);
    props
}

/// All properties visible on `class`, own ones first, then inherited.
pub fn all_properties(graph: &MetaGraph, class: NodeId) -> Vec<NodeId> {
    class_hierarchy(graph, class)
        .into_iter()
        .flat_map(|c| own_properties(graph, c))
        .collect()
}

/// Finds a visible property by name.
pub fn find_property(graph: &MetaGraph, class: NodeId, name: &str) -> Option<NodeId> {
    all_properties(graph, class)
        .into_iter()
        .find(|p| member_name(graph, *p) == Some(name))
}

/// The element that declares `property`: a class or an association.
pub fn declaring_owner(graph: &MetaGraph, property: NodeId) -> Option<NodeId> {
    graph.first(property, slot::OWNER)
}

/// For an association end, the opposite end.
pub fn opposite_end(graph: &MetaGraph, property: NodeId) -> Option<NodeId> {
    let owner = declaring_owner(graph, property)?;
    if !matches!(graph.kind(owner), Some(NodeKind::Association)) {
        return None;
    }
    graph
        .get_edge(owner, slot::PROPERTIES)
        .into_iter()
        .find(|p| *p != property)
}

/// Constraints applying to `class`: its own in declaration order, then
/// those of its ancestors.
pub fn all_constraints(graph: &MetaGraph, class: NodeId) -> Vec<(NodeId, NodeId)> {
    class_hierarchy(graph, class)
        .into_iter()
        .flat_map(|c| {
            graph
                .get_edge(c, slot::CONSTRAINTS)
                .into_iter()
                .map(move |k| (c, k))
        })
        .collect()
}

/// Enum value node named `value` within `enumeration`.
pub fn enum_value(graph: &MetaGraph, enumeration: NodeId, value: &str) -> Option<NodeId> {
    graph
        .get_edge(enumeration, slot::VALUES)
        .into_iter()
        .find(|v| member_name(graph, *v) == Some(value))
}

/// Subtyping over graph types: identity, primitive rules, class
/// generalization. `Nil` is below and `Any` above everything.
pub fn is_subtype(graph: &MetaGraph, sub: NodeId, sup: NodeId) -> bool {
    if sub == sup {
        return true;
    }
    let sub_prim = primitive_kind(graph, sub);
    let sup_prim = primitive_kind(graph, sup);
    if sup_prim == Some(PrimitiveKind::Any) || sub_prim == Some(PrimitiveKind::Nil) {
        return true;
    }
    match (sub_prim, sup_prim) {
        (Some(a), Some(b)) => a.is_subtype_of(&b),
        (None, None) if is_class(graph, sub) => class_hierarchy(graph, sub).contains(&sup),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::GenericTypeNode;

    struct Fixture {
        graph: MetaGraph,
        string: NodeId,
        integer: NodeId,
        number: NodeId,
        a: NodeId,
        b: NodeId,
    }

    fn property(graph: &mut MetaGraph, owner: NodeId, owner_path: &str, name: &str, ty: NodeId) -> NodeId {
        let prop = graph
            .create_node(
                NodeKind::Property { name: name.into() },
                Some(format!("{}.{}", owner_path, name)),
                None,
            )
            .unwrap();
        let gt = graph
            .create_node(NodeKind::GenericType(GenericTypeNode::declared()), None, None)
            .unwrap();
        let mult = graph
            .create_node(NodeKind::Multiplicity(Multiplicity::PURE_ONE), None, None)
            .unwrap();
        graph.add_child(owner, slot::PROPERTIES, prop).unwrap();
        graph.add_edge(prop, slot::OWNER, owner).unwrap();
        graph.add_child(prop, slot::GENERIC_TYPE, gt).unwrap();
        graph.add_child(prop, slot::MULTIPLICITY, mult).unwrap();
        graph.add_edge(gt, slot::RAW_TYPE, ty).unwrap();
        prop
    }

    fn fixture() -> Fixture {
        let mut graph = MetaGraph::new();
        let prim = |g: &mut MetaGraph, p: PrimitiveKind| {
            g.create_node(NodeKind::PrimitiveType(p), Some(p.name().into()), None)
                .unwrap()
        };
        let string = prim(&mut graph, PrimitiveKind::String);
        let integer = prim(&mut graph, PrimitiveKind::Integer);
        let number = prim(&mut graph, PrimitiveKind::Number);
        let a = graph
            .create_node(NodeKind::Class, Some("m::A".into()), None)
            .unwrap();
        let b = graph
            .create_node(NodeKind::Class, Some("m::B".into()), None)
            .unwrap();
        graph.add_edge(b, slot::GENERALIZATIONS, a).unwrap();
        property(&mut graph, a, "m::A", "prop1", string);
        property(&mut graph, b, "m::B", "count", integer);
        Fixture {
            graph,
            string,
            integer,
            number,
            a,
            b,
        }
    }

    #[test]
    fn inherited_properties_are_found_on_the_declaring_class() {
        let f = fixture();
        let prop = find_property(&f.graph, f.b, "prop1").unwrap();
        assert_eq!(declaring_owner(&f.graph, prop), Some(f.a));
        assert_eq!(
            f.graph.node(prop).unwrap().path.as_deref(),
            Some("m::A.prop1")
        );
        assert_eq!(declared_type(&f.graph, prop), Some(f.string));
        assert_eq!(declared_multiplicity(&f.graph, prop), Some(Multiplicity::PURE_ONE));
        assert!(find_property(&f.graph, f.a, "count").is_none());
    }

    #[test]
    fn descendants_follow_specializations() {
        let mut f = fixture();
        let c = f
            .graph
            .create_node(NodeKind::Class, Some("m::C".into()), None)
            .unwrap();
        f.graph.add_edge(f.a, slot::SPECIALIZATIONS, f.b).unwrap();
        f.graph.add_edge(f.b, slot::SPECIALIZATIONS, c).unwrap();
        assert_eq!(class_descendants(&f.graph, f.a), vec![f.a, f.b, c]);
        assert_eq!(class_descendants(&f.graph, c), vec![c]);
    }

    #[test]
    fn subtyping() {
        let f = fixture();
        assert!(is_subtype(&f.graph, f.b, f.a));
        assert!(!is_subtype(&f.graph, f.a, f.b));
        assert!(is_subtype(&f.graph, f.integer, f.number));
        assert!(!is_subtype(&f.graph, f.string, f.number));
        assert!(!is_subtype(&f.graph, f.a, f.string));
    }

    #[test]
    fn hierarchy_is_breadth_first() {
        let f = fixture();
        assert_eq!(class_hierarchy(&f.graph, f.b), vec![f.b, f.a]);
        let names: Vec<&str> = all_properties(&f.graph, f.b)
            .into_iter()
            .filter_map(|p| member_name(&f.graph, p))
            .collect();
        assert_eq!(names, vec!["count", "prop1"]);
    }
}
