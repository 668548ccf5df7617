//! Attaching recorded objects and resource blocks to resource vertices.

use std::sync::Arc;

use crate::config::Config;
use crate::diagnostics::Diagnostics;
use crate::graph::dag::Graph;
use crate::graph::node::Node;
use crate::state::State;

use super::{GraphTransformer, resource_ids};

/// Copies each vertex's recorded object, provider and dependencies from
/// state.
#[derive(Debug)]
pub struct AttachStateTransformer<'a> {
    /// Prior state.
    pub state: &'a State,
}

impl GraphTransformer for AttachStateTransformer<'_> {
    fn name(&self) -> &'static str {
        "AttachStateTransformer"
    }

    fn transform(&self, graph: &mut Graph<Node>) -> Diagnostics {
        for id in resource_ids(graph) {
            let Some(node) = graph.get_mut(id).and_then(Node::as_resource_mut) else {
                continue;
            };
            let Some(resource) = self.state.resource(&node.addr.resource) else {
                continue;
            };
            node.stored_provider = Some(resource.provider.clone());

            // A preallocated deposed key names an object that only exists
            // once the create half has run; until then it is current.
            let deposed = if node.preallocated_deposed_key.is_some() {
                None
            } else {
                node.deposed_key.as_ref()
            };
            let object = self.state.object(&node.addr, deposed).cloned();
            node.stored_dependencies = object
                .as_ref()
                .map(|o| o.dependencies.clone())
                .unwrap_or_default();
            node.state = object;
        }
        Diagnostics::new()
    }
}

/// Attaches the resource block to every vertex whose instance is still
/// declared.
#[derive(Debug)]
pub struct AttachResourceConfigTransformer<'a> {
    /// Configuration.
    pub config: &'a Config,
}

impl GraphTransformer for AttachResourceConfigTransformer<'_> {
    fn name(&self) -> &'static str {
        "AttachResourceConfigTransformer"
    }

    fn transform(&self, graph: &mut Graph<Node>) -> Diagnostics {
        for id in resource_ids(graph) {
            let Some(node) = graph.get_mut(id).and_then(Node::as_resource_mut) else {
                continue;
            };
            if node.config.is_some() || !self.config.declares_instance(&node.addr) {
                continue;
            }
            node.config = self
                .config
                .resource(&node.addr.resource)
                .cloned()
                .map(Arc::new);
        }
        Diagnostics::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addrs::{ProviderConfigAddr, ResourceAddr};
    use crate::graph::node::{ResourceInstanceNode, ResourceRole};
    use crate::state::ResourceInstanceObject;
    use serde_json::json;

    #[test]
    fn test_attach_state_and_config() {
        let addr = "simple_thing.a".parse().expect("addr");
        let dependency: ResourceAddr = "simple_thing.b".parse().expect("addr");
        let mut state = State::new();
        state.set_current(
            &addr,
            Some(ResourceInstanceObject::new(json!({"id": "1"})).with_dependencies(vec![dependency.clone()])),
            &ProviderConfigAddr::root("simple"),
        );
        let config: Config = serde_yaml::from_str(
            "resources:\n  - type: simple_thing\n    name: a\n    lifecycle:\n      prevent_destroy: true\n",
        )
        .expect("config");

        let mut graph = Graph::new();
        let id = graph.add(Node::ResourceInstance(ResourceInstanceNode::new(ResourceRole::PlanDestroyable, addr)));
        AttachStateTransformer { state: &state }.transform(&mut graph);
        AttachResourceConfigTransformer { config: &config }.transform(&mut graph);

        let node = graph.get(id).and_then(Node::as_resource).expect("node");
        assert_eq!(node.stored_provider, Some(ProviderConfigAddr::root("simple")));
        assert_eq!(node.stored_dependencies, vec![dependency]);
        assert!(node.state.is_some());
        assert!(node.prevent_destroy());
    }
}
