//! Resolving provider configurations for resource vertices.

use std::sync::Arc;
use tracing::debug;

use crate::addrs::ProviderConfigAddr;
use crate::config::Config;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::{GraphError, Result};
use crate::graph::dag::{Graph, VertexId};
use crate::graph::node::{Node, ProviderNode, ResourceInstanceNode};
use crate::provider::ProviderFactory;

use super::{GraphTransformer, resource_ids};

/// Adds provider vertices and makes each resource vertex depend on the one
/// provider configuration that manages it.
///
/// A resource asks for `<type>` or `<type>.<alias>`; the closest module,
/// starting from its own and walking up to the root, that declares a
/// matching block wins. Without any block a default root configuration is
/// implied, provided the factory knows the type. Vertices that already carry
/// a resolved provider keep it; orphans fall back to the provider recorded in
/// state. Provider configurations nothing uses are dropped.
#[derive(Debug)]
pub struct ProviderTransformer<'a> {
    /// Configuration declaring provider blocks.
    pub config: &'a Config,
    /// Known provider types.
    pub factory: &'a ProviderFactory,
}

impl ProviderTransformer<'_> {
    fn resolve(&self, node: &ResourceInstanceNode) -> Result<ProviderConfigAddr> {
        if let Some(addr) = &node.resolved_provider {
            return self.available(node, addr.clone());
        }
        match (&node.config, &node.stored_provider) {
            (Some(config), _) => {
                let requested = config.provider_addr(node.addr.module())?;
                for module in requested.module.self_and_ancestors() {
                    let candidate = ProviderConfigAddr::new(
                        module,
                        requested.provider_type.clone(),
                        requested.alias.clone(),
                    );
                    if self.config.provider(&candidate).is_some() {
                        return Ok(candidate);
                    }
                }
                self.implied(node, &requested)
            }
            (None, Some(stored)) => self.available(node, stored.clone()),
            (None, None) => self.implied(
                node,
                &ProviderConfigAddr::root(node.addr.resource.implied_provider_type()),
            ),
        }
    }

    fn available(&self, node: &ResourceInstanceNode, addr: ProviderConfigAddr) -> Result<ProviderConfigAddr> {
        if self.config.provider(&addr).is_some() || self.factory.has(&addr.provider_type) {
            Ok(addr)
        } else {
            Err(unresolved(node, &addr))
        }
    }

    fn implied(&self, node: &ResourceInstanceNode, requested: &ProviderConfigAddr) -> Result<ProviderConfigAddr> {
        if requested.alias.is_none() && self.factory.has(&requested.provider_type) {
            Ok(ProviderConfigAddr::root(requested.provider_type.clone()))
        } else {
            Err(unresolved(node, requested))
        }
    }

    fn provider_vertex(&self, graph: &mut Graph<Node>, addr: &ProviderConfigAddr) -> VertexId {
        if let Some(id) = graph.find(&addr.to_string()) {
            return id;
        }
        debug!("Adding implied {addr}");
        let config = self.config.provider(addr).cloned().map(Arc::new);
        graph.add(Node::Provider(ProviderNode::new(addr.clone(), config)))
    }
}

fn unresolved(node: &ResourceInstanceNode, requested: &ProviderConfigAddr) -> crate::error::OrchestratorError {
    GraphError::UnresolvedProvider {
        resource: node.addr.to_string(),
        provider: requested.to_string(),
    }
    .into()
}

impl GraphTransformer for ProviderTransformer<'_> {
    fn name(&self) -> &'static str {
        "ProviderTransformer"
    }

    fn transform(&self, graph: &mut Graph<Node>) -> Diagnostics {
        let mut diagnostics = Diagnostics::new();

        for (path, module) in self.config.modules() {
            for provider in &module.providers {
                graph.add(Node::Provider(ProviderNode::new(
                    provider.addr(&path),
                    Some(Arc::new(provider.clone())),
                )));
            }
        }

        for id in resource_ids(graph) {
            let Some(node) = graph.get(id).and_then(Node::as_resource) else {
                continue;
            };
            let addr = match self.resolve(node) {
                Ok(addr) => addr,
                Err(err) => {
                    diagnostics.push(Diagnostic::error(err).with_address(node.key()));
                    continue;
                }
            };
            let provider = self.provider_vertex(graph, &addr);
            if let Some(node) = graph.get_mut(id).and_then(Node::as_resource_mut) {
                node.resolved_provider = Some(addr);
            }
            graph.connect(id, provider);
        }

        let unused: Vec<VertexId> = graph
            .vertices()
            .filter(|(id, node)| matches!(node, Node::Provider(_)) && graph.dependents_of(*id).is_empty())
            .map(|(id, _)| id)
            .collect();
        for id in unused {
            if let Some(node) = graph.remove(id) {
                debug!("Dropping unused {node}");
            }
        }
        diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addrs::ModulePath;
    use crate::error::OrchestratorError;
    use crate::graph::node::ResourceRole;
    use crate::graph::transform::ConfigTransformer;

    const CONFIG: &str = r"
providers:
  - type: simple
    alias: west
modules:
  - name: net
    providers:
      - type: simple
    resources:
      - type: simple_thing
        name: inherited
    modules:
      - name: inner
        resources:
          - type: simple_thing
            name: deep
resources:
  - type: simple_thing
    name: implied
  - type: simple_thing
    name: aliased
    provider: simple.west
";

    fn build(config: &Config, factory: &ProviderFactory) -> (Graph<Node>, Diagnostics) {
        let mut graph = Graph::new();
        ConfigTransformer { config }.transform(&mut graph);
        let diags = ProviderTransformer { config, factory }.transform(&mut graph);
        (graph, diags)
    }

    fn provider_of(graph: &Graph<Node>, key: &str) -> String {
        let id = graph.find(key).expect("vertex");
        let deps = graph.dependencies_of(id);
        assert_eq!(deps.len(), 1, "{key} must depend on exactly one provider");
        graph.key(deps[0]).expect("key").to_string()
    }

    #[test]
    fn test_resolution_and_inheritance() {
        let config: Config = serde_yaml::from_str(CONFIG).expect("config");
        let (graph, diags) = build(&config, &ProviderFactory::builtin());
        assert!(!diags.has_errors(), "{diags}");

        assert_eq!(provider_of(&graph, "simple_thing.implied"), "provider.simple");
        assert_eq!(provider_of(&graph, "simple_thing.aliased"), "provider.simple.west");
        assert_eq!(provider_of(&graph, "module.net.simple_thing.inherited"), "module.net.provider.simple");
        assert_eq!(provider_of(&graph, "module.net.module.inner.simple_thing.deep"), "module.net.provider.simple");

        let net = ProviderConfigAddr::new(ModulePath::root().child("net"), "simple", None);
        let node = graph.find(&net.to_string()).and_then(|id| graph.get(id));
        assert!(matches!(node, Some(Node::Provider(p)) if p.config.is_some()));
    }

    #[test]
    fn test_unknown_provider_type() {
        let config: Config =
            serde_yaml::from_str("resources:\n  - type: cloud_box\n    name: a\n").expect("config");
        let (_, diags) = build(&config, &ProviderFactory::builtin());
        assert!(diags.any_error(|e| matches!(
            e,
            OrchestratorError::Graph(GraphError::UnresolvedProvider { resource, .. }) if resource == "cloud_box.a"
        )));
    }

    #[test]
    fn test_orphan_uses_stored_provider_and_unused_are_dropped() {
        let config: Config = serde_yaml::from_str("providers:\n  - type: simple\n    alias: spare\n").expect("config");
        let mut graph = Graph::new();
        let mut orphan =
            ResourceInstanceNode::new(ResourceRole::PlannableOrphan, "simple_thing.old".parse().expect("addr"));
        orphan.stored_provider = Some(ProviderConfigAddr::root("simple"));
        graph.add(Node::ResourceInstance(orphan));

        let factory = ProviderFactory::builtin();
        let diags = ProviderTransformer { config: &config, factory: &factory }.transform(&mut graph);
        assert!(!diags.has_errors());
        assert_eq!(provider_of(&graph, "simple_thing.old (orphan)"), "provider.simple");
        assert!(graph.find("provider.simple.spare").is_none());
    }
}
