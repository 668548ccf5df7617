//! Fence vertices closing providers and modules.

use std::collections::{BTreeMap, BTreeSet};

use crate::addrs::ModulePath;
use crate::diagnostics::Diagnostics;
use crate::graph::dag::{Graph, VertexId};
use crate::graph::node::{ModuleCloseNode, Node, ProviderCloseNode};

use super::GraphTransformer;

/// Adds a close vertex per provider, after the provider and all its users.
#[derive(Debug, Default)]
pub struct CloseProviderTransformer;

impl GraphTransformer for CloseProviderTransformer {
    fn name(&self) -> &'static str {
        "CloseProviderTransformer"
    }

    fn transform(&self, graph: &mut Graph<Node>) -> Diagnostics {
        let providers: Vec<(VertexId, ProviderCloseNode)> = graph
            .vertices()
            .filter_map(|(id, node)| match node {
                Node::Provider(p) => Some((id, ProviderCloseNode { addr: p.addr.clone() })),
                _ => None,
            })
            .collect();
        for (provider, close) in providers {
            let users = graph.dependents_of(provider);
            let close = graph.add(Node::ProviderClose(close));
            graph.connect(close, provider);
            for user in users {
                graph.connect(close, user);
            }
        }
        Diagnostics::new()
    }
}

/// Adds a close vertex per module, the root included, that runs after
/// everything in the module and after the closes of its child modules.
#[derive(Debug, Default)]
pub struct CloseModuleTransformer;

impl GraphTransformer for CloseModuleTransformer {
    fn name(&self) -> &'static str {
        "CloseModuleTransformer"
    }

    fn transform(&self, graph: &mut Graph<Node>) -> Diagnostics {
        let mut members: BTreeMap<ModulePath, Vec<VertexId>> = BTreeMap::new();
        members.insert(ModulePath::root(), Vec::new());
        for (id, node) in graph.vertices() {
            members.entry(node.module_path()).or_default().push(id);
        }
        let modules: BTreeSet<ModulePath> = members
            .keys()
            .flat_map(ModulePath::self_and_ancestors)
            .collect();

        let closes: BTreeMap<ModulePath, VertexId> = modules
            .into_iter()
            .map(|module| {
                let id = graph.add(Node::ModuleClose(ModuleCloseNode {
                    module: module.clone(),
                }));
                (module, id)
            })
            .collect();

        for (module, close) in &closes {
            for member in members.get(module).into_iter().flatten() {
                graph.connect(*close, *member);
            }
            if let Some(parent) = module.parent()
                && let Some(parent_close) = closes.get(&parent)
            {
                graph.connect(*parent_close, *close);
            }
        }
        Diagnostics::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addrs::ProviderConfigAddr;
    use crate::graph::node::{ProviderNode, ResourceInstanceNode, ResourceRole};

    #[test]
    fn test_close_vertices() {
        let mut graph = Graph::new();
        let provider = graph.add(Node::Provider(ProviderNode::new(ProviderConfigAddr::root("simple"), None)));
        let deep = graph.add(Node::ResourceInstance(ResourceInstanceNode::new(
            ResourceRole::PlannableNormal,
            "module.a.module.b.simple_thing.x".parse().expect("addr"),
        )));
        graph.connect(deep, provider);

        CloseProviderTransformer.transform(&mut graph);
        CloseModuleTransformer.transform(&mut graph);

        let find = |key: &str| graph.find(key).expect(key);
        let provider_close = find("provider.simple (close)");
        assert!(graph.has_edge(provider_close, deep));
        assert!(graph.has_edge(provider_close, provider));
        assert!(graph.has_edge(find("module.a.module.b (close)"), deep));
        assert!(graph.has_edge(find("module.a (close)"), find("module.a.module.b (close)")));
        assert!(graph.has_edge(find("root"), find("module.a (close)")));
        assert!(graph.has_edge(find("root"), provider_close));
        assert!(graph.validate().is_empty());
        assert!(graph.find("root").is_some_and(|root| graph.dependents_of(root).is_empty()));
    }
}
