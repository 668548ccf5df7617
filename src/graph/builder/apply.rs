//! Apply graph pipeline.

use crate::addrs::Target;
use crate::config::Config;
use crate::diagnostics::Diagnostics;
use crate::graph::dag::Graph;
use crate::graph::node::Node;
use crate::graph::transform::{
    AttachResourceConfigTransformer, AttachStateTransformer, CloseModuleTransformer,
    CloseProviderTransformer, DestroyEdgeTransformer, DiffTransformer, GraphTransformer,
    OutputTransformer, ProviderTransformer, ReferenceTransformer, RootVariableTransformer,
    TargetsTransformer, TransitiveReductionTransformer,
};
use crate::plans::Changes;
use crate::provider::ProviderFactory;
use crate::state::State;

use super::BasicGraphBuilder;

/// Builds the graph that carries out a plan's changes.
#[derive(Debug)]
pub struct ApplyGraphBuilder<'a> {
    /// Configuration the plan was made from.
    pub config: &'a Config,
    /// State the changes apply to.
    pub state: &'a State,
    /// Planned changes.
    pub changes: &'a Changes,
    /// Known provider types.
    pub factory: &'a ProviderFactory,
    /// Targets recorded in the plan.
    pub targets: &'a [Target],
    /// Excludes recorded in the plan.
    pub excludes: &'a [Target],
    /// The plan destroys everything; outputs are removed.
    pub destroy: bool,
}

impl<'a> ApplyGraphBuilder<'a> {
    /// A builder for applying `changes` on top of `state`.
    #[must_use]
    pub const fn new(
        config: &'a Config,
        state: &'a State,
        changes: &'a Changes,
        factory: &'a ProviderFactory,
    ) -> Self {
        Self {
            config,
            state,
            changes,
            factory,
            targets: &[],
            excludes: &[],
            destroy: false,
        }
    }

    /// Restricts the graph as the plan was restricted.
    #[must_use]
    pub const fn with_targets(mut self, targets: &'a [Target], excludes: &'a [Target]) -> Self {
        self.targets = targets;
        self.excludes = excludes;
        self
    }

    /// Applies a destroy plan.
    #[must_use]
    pub const fn with_destroy(mut self, destroy: bool) -> Self {
        self.destroy = destroy;
        self
    }

    fn steps(&self) -> Vec<Box<dyn GraphTransformer + 'a>> {
        let config = self.config;
        let state = self.state;
        vec![
            Box::new(DiffTransformer { changes: self.changes }),
            Box::new(RootVariableTransformer { config }),
            Box::new(OutputTransformer { config, state: Some(state), destroy: self.destroy }),
            Box::new(AttachStateTransformer { state }),
            Box::new(AttachResourceConfigTransformer { config }),
            Box::new(ProviderTransformer { config, factory: self.factory }),
            Box::new(ReferenceTransformer),
            Box::new(DestroyEdgeTransformer),
            // The plan already rejected unmatched targets.
            Box::new(TargetsTransformer { targets: self.targets, excludes: self.excludes, strict: false }),
            Box::new(CloseProviderTransformer),
            Box::new(CloseModuleTransformer),
            Box::new(TransitiveReductionTransformer),
        ]
    }

    /// Builds the graph.
    #[must_use]
    pub fn build(&self) -> (Option<Graph<Node>>, Diagnostics) {
        BasicGraphBuilder {
            name: "apply",
            steps: self.steps(),
            validate: true,
        }
        .build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addrs::{ProviderConfigAddr, ResourceInstanceAddr};
    use crate::graph::node::{ResourceInstanceNode, ResourceRole};
    use crate::plans::{Action, ResourceInstanceChange};
    use crate::state::ResourceInstanceObject;
    use serde_json::json;

    fn addr(s: &str) -> ResourceInstanceAddr {
        s.parse().expect("addr")
    }

    fn reaches(graph: &Graph<Node>, from: &str, to: &str) -> bool {
        let (Some(from), Some(to)) = (graph.find(from), graph.find(to)) else {
            return false;
        };
        graph.ancestors(from).contains(&to)
    }

    fn change(name: &str, action: Action) -> ResourceInstanceChange {
        ResourceInstanceChange {
            action,
            ..ResourceInstanceChange::noop(addr(name), None, ProviderConfigAddr::root("simple"))
        }
    }

    #[test]
    fn test_replace_orderings() {
        let config: Config = serde_yaml::from_str(
            r"
resources:
  - type: simple_thing
    name: a
  - type: simple_thing
    name: b
    depends_on: [simple_thing.a]
",
        )
        .expect("config");
        let mut state = State::new();
        for name in ["simple_thing.a", "simple_thing.b"] {
            state.set_current(
                &addr(name),
                Some(ResourceInstanceObject::new(json!({"id": name}))),
                &ProviderConfigAddr::root("simple"),
            );
        }
        let mut changes = Changes::new();
        changes.put_resource_change(change("simple_thing.a", Action::CreateThenDelete));
        changes.put_resource_change(change("simple_thing.b", Action::Update));
        let factory = ProviderFactory::builtin();

        let (graph, diags) = ApplyGraphBuilder::new(&config, &state, &changes, &factory).build();
        assert!(!diags.has_errors(), "{diags}");
        let graph = graph.expect("graph");

        let destroy_a = graph
            .vertices()
            .find_map(|(_, n)| {
                n.as_resource()
                    .filter(|r| r.role == ResourceRole::ApplyableDestroy)
                    .map(ResourceInstanceNode::key)
            })
            .expect("destroy vertex");
        assert!(reaches(&graph, "simple_thing.b", "simple_thing.a"));
        assert!(reaches(&graph, &destroy_a, "simple_thing.a"));
        assert!(reaches(&graph, &destroy_a, "simple_thing.b"));
        assert!(reaches(&graph, "root", &destroy_a));
    }

    #[test]
    fn test_destroy_then_create() {
        let config: Config =
            serde_yaml::from_str("resources:\n  - type: simple_thing\n    name: a\n").expect("config");
        let mut changes = Changes::new();
        changes.put_resource_change(change("simple_thing.a", Action::DeleteThenCreate));
        let factory = ProviderFactory::builtin();
        let state = State::new();

        let (graph, _) = ApplyGraphBuilder::new(&config, &state, &changes, &factory).build();
        let graph = graph.expect("graph");
        assert!(reaches(&graph, "simple_thing.a", "simple_thing.a (destroy)"));
    }
}
