//! Vertices created from recorded state and from planned changes.

use tracing::debug;

use crate::addrs::DeposedKey;
use crate::config::Config;
use crate::diagnostics::Diagnostics;
use crate::graph::dag::Graph;
use crate::graph::node::{Node, ResourceInstanceNode, ResourceRole};
use crate::plans::{Action, Changes};
use crate::state::State;

use super::GraphTransformer;

/// Adds vertices for objects recorded in state.
///
/// Deposed objects always get a [`ResourceRole::PlanDeposed`] vertex. In
/// destroy mode every current object also gets a
/// [`ResourceRole::PlanDestroyable`] vertex.
#[derive(Debug)]
pub struct StateTransformer<'a> {
    /// Prior state.
    pub state: &'a State,
    /// Plan the destruction of current objects.
    pub destroy: bool,
}

impl GraphTransformer for StateTransformer<'_> {
    fn name(&self) -> &'static str {
        "StateTransformer"
    }

    fn transform(&self, graph: &mut Graph<Node>) -> Diagnostics {
        for (addr, instance, _) in self.state.instances() {
            if self.destroy && instance.current.is_some() {
                graph.add(Node::ResourceInstance(ResourceInstanceNode::new(
                    ResourceRole::PlanDestroyable,
                    addr.clone(),
                )));
            }
            for key in instance.deposed.keys() {
                let node = ResourceInstanceNode::new(ResourceRole::PlanDeposed, addr.clone())
                    .with_deposed_key(key.clone());
                graph.add(Node::ResourceInstance(node));
            }
        }
        Diagnostics::new()
    }
}

/// Adds a [`ResourceRole::PlannableOrphan`] vertex for every current object
/// whose instance is no longer declared in configuration.
#[derive(Debug)]
pub struct OrphanResourceInstanceTransformer<'a> {
    /// Configuration being planned.
    pub config: &'a Config,
    /// Prior state.
    pub state: &'a State,
}

impl GraphTransformer for OrphanResourceInstanceTransformer<'_> {
    fn name(&self) -> &'static str {
        "OrphanResourceInstanceTransformer"
    }

    fn transform(&self, graph: &mut Graph<Node>) -> Diagnostics {
        for (addr, instance, _) in self.state.instances() {
            if instance.current.is_none() || self.config.declares_instance(&addr) {
                continue;
            }
            debug!("{addr} is no longer configured");
            graph.add(Node::ResourceInstance(ResourceInstanceNode::new(
                ResourceRole::PlannableOrphan,
                addr,
            )));
        }
        Diagnostics::new()
    }
}

/// Adds apply vertices for every planned resource change.
///
/// A replace produces a create and a destroy vertex. For
/// create-before-destroy the deposed key of the old object is allocated here
/// so the destroy vertex can address it before it exists.
#[derive(Debug)]
pub struct DiffTransformer<'a> {
    /// Changes being applied.
    pub changes: &'a Changes,
}

impl GraphTransformer for DiffTransformer<'_> {
    fn name(&self) -> &'static str {
        "DiffTransformer"
    }

    fn transform(&self, graph: &mut Graph<Node>) -> Diagnostics {
        for change in &self.changes.resources {
            let applyable = |role| {
                let mut node = ResourceInstanceNode::new(role, change.addr.clone());
                node.resolved_provider = Some(change.provider.clone());
                node.planned_action = Some(change.action);
                node
            };

            match change.action {
                Action::NoOp | Action::Read => {}
                Action::Create | Action::Update => {
                    graph.add(Node::ResourceInstance(applyable(ResourceRole::ApplyableNormal)));
                }
                Action::DeleteThenCreate => {
                    graph.add(Node::ResourceInstance(applyable(ResourceRole::ApplyableNormal)));
                    graph.add(Node::ResourceInstance(applyable(ResourceRole::ApplyableDestroy)));
                }
                Action::CreateThenDelete => {
                    let key = DeposedKey::generate();
                    let mut create = applyable(ResourceRole::ApplyableNormal);
                    create.preallocated_deposed_key = Some(key.clone());
                    let mut destroy =
                        applyable(ResourceRole::ApplyableDestroy).with_deposed_key(key.clone());
                    destroy.preallocated_deposed_key = Some(key);
                    graph.add(Node::ResourceInstance(create));
                    graph.add(Node::ResourceInstance(destroy));
                }
                Action::Delete => {
                    let mut destroy = applyable(ResourceRole::ApplyableDestroy);
                    destroy.deposed_key.clone_from(&change.deposed_key);
                    graph.add(Node::ResourceInstance(destroy));
                }
            }
        }
        Diagnostics::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addrs::{ProviderConfigAddr, ResourceInstanceAddr};
    use crate::graph::dag::Vertex;
    use crate::plans::ResourceInstanceChange;
    use crate::state::ResourceInstanceObject;
    use serde_json::json;

    fn addr(s: &str) -> ResourceInstanceAddr {
        s.parse().expect("addr")
    }

    fn keys(graph: &Graph<Node>) -> Vec<String> {
        let mut keys: Vec<String> = graph.vertices().map(|(_, n)| n.key()).collect();
        keys.sort();
        keys
    }

    #[test]
    fn test_state_transformer_destroy_mode() {
        let provider = ProviderConfigAddr::root("simple");
        let mut state = State::new();
        state.set_current(&addr("simple_thing.a"), Some(ResourceInstanceObject::new(json!({}))), &provider);
        let key = DeposedKey::generate();
        state.set_deposed(&addr("simple_thing.a"), &key, Some(ResourceInstanceObject::new(json!({}))), &provider);

        let mut graph = Graph::new();
        StateTransformer { state: &state, destroy: false }.transform(&mut graph);
        assert_eq!(keys(&graph), vec![format!("simple_thing.a (deposed {key})")]);

        let mut graph = Graph::new();
        StateTransformer { state: &state, destroy: true }.transform(&mut graph);
        assert_eq!(
            keys(&graph),
            vec![String::from("simple_thing.a (destroy)"), format!("simple_thing.a (deposed {key})")]
        );
    }

    #[test]
    fn test_orphans_are_undeclared_instances() {
        let provider = ProviderConfigAddr::root("simple");
        let mut state = State::new();
        state.set_current(&addr("simple_thing.gone"), Some(ResourceInstanceObject::new(json!({}))), &provider);
        let config: Config = serde_yaml::from_str("resources:\n  - type: simple_thing\n    name: kept\n")
            .expect("config");
        state.set_current(&addr("simple_thing.kept"), Some(ResourceInstanceObject::new(json!({}))), &provider);

        let mut graph = Graph::new();
        OrphanResourceInstanceTransformer { config: &config, state: &state }.transform(&mut graph);
        assert_eq!(keys(&graph), vec![String::from("simple_thing.gone (orphan)")]);
    }

    #[test]
    fn test_diff_splits_replace() {
        let provider = ProviderConfigAddr::root("simple");
        let mut changes = Changes::new();
        for (name, action) in [
            ("a", Action::Create),
            ("b", Action::NoOp),
            ("c", Action::DeleteThenCreate),
            ("d", Action::CreateThenDelete),
            ("e", Action::Delete),
        ] {
            changes.put_resource_change(ResourceInstanceChange {
                action,
                ..ResourceInstanceChange::noop(addr(&format!("simple_thing.{name}")), None, provider.clone())
            });
        }

        let mut graph = Graph::new();
        DiffTransformer { changes: &changes }.transform(&mut graph);
        let keys = keys(&graph);
        assert_eq!(keys.len(), 6);
        assert!(keys.contains(&String::from("simple_thing.a")));
        assert!(!keys.iter().any(|k| k.starts_with("simple_thing.b")));
        assert!(keys.contains(&String::from("simple_thing.c (destroy)")));
        assert!(keys.iter().any(|k| k.starts_with("simple_thing.d (destroy deposed ")));
        assert!(keys.contains(&String::from("simple_thing.e (destroy)")));

        let create = graph.find("simple_thing.d").and_then(|id| graph.get(id)).and_then(Node::as_resource);
        let destroy = graph
            .vertices()
            .filter_map(|(_, n)| n.as_resource())
            .find(|n| n.addr == addr("simple_thing.d") && n.role == ResourceRole::ApplyableDestroy);
        let create = create.expect("create");
        let destroy = destroy.expect("destroy");
        assert_eq!(create.preallocated_deposed_key, destroy.deposed_key);
        assert_eq!(create.resolved_provider, Some(provider));
    }
}
