//! Graph builders.
//!
//! Each builder is a fixed, ordered pipeline of transformers run by
//! [`BasicGraphBuilder`]. The pipelines differ per operation: planning starts
//! from configuration, destroy planning from state, applying from planned
//! changes.

mod apply;
mod plan;

pub use apply::ApplyGraphBuilder;
pub use plan::{DestroyPlanGraphBuilder, PlanGraphBuilder};

use tracing::{debug, info, warn};

use crate::diagnostics::Diagnostics;

use super::dag::Graph;
use super::node::Node;
use super::transform::GraphTransformer;

/// Runs transformers in order, then checks the result is acyclic.
pub struct BasicGraphBuilder<'a> {
    /// Name used in logs.
    pub name: &'static str,
    /// Transformers, run in order.
    pub steps: Vec<Box<dyn GraphTransformer + 'a>>,
    /// Reject cyclic results.
    pub validate: bool,
}

impl BasicGraphBuilder<'_> {
    /// Builds the graph.
    ///
    /// Stops at the first step reporting an error and returns no graph, so a
    /// partial graph is never walked.
    #[must_use]
    pub fn build(&self) -> (Option<Graph<Node>>, Diagnostics) {
        let mut graph = Graph::new();
        let mut diagnostics = Diagnostics::new();

        for step in &self.steps {
            let step_diagnostics = step.transform(&mut graph);
            debug!(
                "{} graph after {}: {} vertices",
                self.name,
                step.name(),
                graph.len()
            );
            let failed = step_diagnostics.has_errors();
            diagnostics.append(step_diagnostics);
            if failed {
                warn!("{} graph build failed in {}", self.name, step.name());
                return (None, diagnostics);
            }
        }

        if self.validate {
            for err in graph.validate() {
                diagnostics.push_error(err);
            }
            if diagnostics.has_errors() {
                warn!("{} graph is not acyclic", self.name);
                return (None, diagnostics);
            }
        }

        info!("Built {} graph with {} vertices", self.name, graph.len());
        (Some(graph), diagnostics)
    }
}

impl std::fmt::Debug for BasicGraphBuilder<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let steps: Vec<&str> = self.steps.iter().map(|s| s.name()).collect();
        f.debug_struct("BasicGraphBuilder")
            .field("name", &self.name)
            .field("steps", &steps)
            .field("validate", &self.validate)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{GraphError, OrchestratorError};
    use crate::graph::node::{ResourceInstanceNode, ResourceRole};

    struct Cyclic;

    impl GraphTransformer for Cyclic {
        fn name(&self) -> &'static str {
            "Cyclic"
        }

        fn transform(&self, graph: &mut Graph<Node>) -> Diagnostics {
            let a = graph.add(Node::ResourceInstance(ResourceInstanceNode::new(
                ResourceRole::PlannableNormal,
                "simple_thing.a".parse().expect("addr"),
            )));
            let b = graph.add(Node::ResourceInstance(ResourceInstanceNode::new(
                ResourceRole::PlannableNormal,
                "simple_thing.b".parse().expect("addr"),
            )));
            graph.connect(a, b);
            graph.connect(b, a);
            Diagnostics::new()
        }
    }

    struct Failing;

    impl GraphTransformer for Failing {
        fn name(&self) -> &'static str {
            "Failing"
        }

        fn transform(&self, _graph: &mut Graph<Node>) -> Diagnostics {
            let mut diagnostics = Diagnostics::new();
            diagnostics.push_error(OrchestratorError::internal("boom"));
            diagnostics
        }
    }

    #[test]
    fn test_cycle_is_reported_not_broken() {
        let builder = BasicGraphBuilder {
            name: "test",
            steps: vec![Box::new(Cyclic)],
            validate: true,
        };
        let (graph, diags) = builder.build();
        assert!(graph.is_none());
        assert!(diags.any_error(|e| matches!(
            e,
            OrchestratorError::Graph(GraphError::Cycle { vertices }) if vertices.len() == 2
        )));
    }

    #[test]
    fn test_stops_at_first_failing_step() {
        let builder = BasicGraphBuilder {
            name: "test",
            steps: vec![Box::new(Failing), Box::new(Cyclic)],
            validate: true,
        };
        let (graph, diags) = builder.build();
        assert!(graph.is_none());
        assert_eq!(diags.len(), 1);
    }
}
