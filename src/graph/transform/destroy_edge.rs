//! Ordering destroys relative to creates.

use std::collections::BTreeMap;
use tracing::debug;

use crate::addrs::ResourceInstanceAddr;
use crate::diagnostics::Diagnostics;
use crate::graph::dag::{Graph, VertexId};
use crate::graph::node::{Node, ResourceInstanceNode};

use super::{GraphTransformer, resources};

/// Forces create-before-destroy onto everything a create-before-destroy
/// resource depends on.
///
/// Replacing a dependency by destroying it first would otherwise have to
/// wait for the dependent's old object, which in turn waits for the new
/// dependency: a cycle.
#[derive(Debug, Default)]
pub struct ForcedCbdTransformer;

impl GraphTransformer for ForcedCbdTransformer {
    fn name(&self) -> &'static str {
        "ForcedCbdTransformer"
    }

    fn transform(&self, graph: &mut Graph<Node>) -> Diagnostics {
        let mut forced = Vec::new();
        for (id, node) in resources(graph) {
            if !node.role.is_creator() || !node.create_before_destroy() {
                continue;
            }
            forced.extend(graph.ancestors(id).into_iter().filter(|a| {
                graph
                    .get(*a)
                    .and_then(Node::as_resource)
                    .is_some_and(|r| r.role.is_creator() && !r.create_before_destroy())
            }));
        }
        for id in forced {
            if let Some(node) = graph.get_mut(id).and_then(Node::as_resource_mut) {
                debug!("Forcing create-before-destroy on {}", node.addr);
                node.force_create_before_destroy = true;
            }
        }
        Diagnostics::new()
    }
}

/// Adds the edges that order destroy vertices.
///
/// * For one instance, the create waits for the destroy, or the other way
///   round under create-before-destroy.
/// * If `x` depends on `y`, by configuration or by the dependencies recorded
///   on its object, then `y` is destroyed only after `x`. This also orders
///   orphans among themselves.
/// * Under create-before-destroy, the old `y` is destroyed only after every
///   creator that depends on `y` has switched to the new object.
#[derive(Debug, Default)]
pub struct DestroyEdgeTransformer;

impl DestroyEdgeTransformer {
    fn refers_to(node: &ResourceInstanceNode, other: &ResourceInstanceAddr) -> bool {
        node.addr.resource != other.resource
            && (node.stored_dependencies.contains(&other.resource)
                || node.config_dependencies().iter().any(|t| t.matches_instance(other)))
    }
}

impl GraphTransformer for DestroyEdgeTransformer {
    fn name(&self) -> &'static str {
        "DestroyEdgeTransformer"
    }

    fn transform(&self, graph: &mut Graph<Node>) -> Diagnostics {
        let nodes = resources(graph);
        let creators: BTreeMap<&ResourceInstanceAddr, (VertexId, &ResourceInstanceNode)> = nodes
            .iter()
            .filter(|(_, n)| n.role.is_creator())
            .map(|(id, n)| (&n.addr, (*id, *n)))
            .collect();
        let destroyers: Vec<(VertexId, &ResourceInstanceNode)> = nodes
            .iter()
            .filter(|(_, n)| n.role.is_destroy())
            .map(|(id, n)| (*id, *n))
            .collect();

        let mut edges = Vec::new();
        for (d, destroy) in &destroyers {
            let replaces_current = destroy.deposed_key.is_none() || destroy.preallocated_deposed_key.is_some();
            if replaces_current && let Some((a, create)) = creators.get(&destroy.addr) {
                if destroy.preallocated_deposed_key.is_some() || create.create_before_destroy() {
                    edges.push((*d, *a));
                } else {
                    edges.push((*a, *d));
                }
            }

            for (other, dependent) in &destroyers {
                if other != d && Self::refers_to(dependent, &destroy.addr) {
                    edges.push((*d, *other));
                }
            }

            if destroy.preallocated_deposed_key.is_some() {
                for (a, create) in creators.values() {
                    if Self::refers_to(create, &destroy.addr) {
                        edges.push((*d, *a));
                    }
                }
            }
        }

        debug!("Adding {} destroy edges", edges.len());
        for (from, to) in edges {
            graph.connect(from, to);
        }
        Diagnostics::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addrs::{DeposedKey, ResourceAddr};
    use crate::graph::node::ResourceRole;

    fn addr(s: &str) -> ResourceInstanceAddr {
        s.parse().expect("addr")
    }

    fn edge(graph: &Graph<Node>, from: &str, to: &str) -> bool {
        match (graph.find(from), graph.find(to)) {
            (Some(from), Some(to)) => graph.has_edge(from, to),
            _ => false,
        }
    }

    #[test]
    fn test_create_waits_for_destroy() {
        let mut graph = Graph::new();
        graph.add(Node::ResourceInstance(ResourceInstanceNode::new(ResourceRole::ApplyableNormal, addr("simple_thing.a"))));
        graph.add(Node::ResourceInstance(ResourceInstanceNode::new(ResourceRole::ApplyableDestroy, addr("simple_thing.a"))));
        DestroyEdgeTransformer.transform(&mut graph);
        assert!(edge(&graph, "simple_thing.a", "simple_thing.a (destroy)"));
        assert!(graph.validate().is_empty());
    }

    #[test]
    fn test_create_before_destroy_flips_edge() {
        let key = DeposedKey::generate();
        let mut graph = Graph::new();
        let mut create = ResourceInstanceNode::new(ResourceRole::ApplyableNormal, addr("simple_thing.a"));
        create.preallocated_deposed_key = Some(key.clone());
        let mut destroy =
            ResourceInstanceNode::new(ResourceRole::ApplyableDestroy, addr("simple_thing.a")).with_deposed_key(key.clone());
        destroy.preallocated_deposed_key = Some(key.clone());
        graph.add(Node::ResourceInstance(create));
        graph.add(Node::ResourceInstance(destroy));
        DestroyEdgeTransformer.transform(&mut graph);
        assert!(edge(&graph, &format!("simple_thing.a (destroy deposed {key})"), "simple_thing.a"));
    }

    #[test]
    fn test_dependents_destroyed_first() {
        let mut graph = Graph::new();
        let mut b = ResourceInstanceNode::new(ResourceRole::PlannableOrphan, addr("simple_thing.b"));
        b.stored_dependencies = vec!["simple_thing.a".parse::<ResourceAddr>().expect("addr")];
        graph.add(Node::ResourceInstance(b));
        graph.add(Node::ResourceInstance(ResourceInstanceNode::new(ResourceRole::PlannableOrphan, addr("simple_thing.a"))));
        DestroyEdgeTransformer.transform(&mut graph);
        assert!(edge(&graph, "simple_thing.a (orphan)", "simple_thing.b (orphan)"));
        assert!(!edge(&graph, "simple_thing.b (orphan)", "simple_thing.a (orphan)"));
    }
}
