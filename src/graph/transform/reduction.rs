//! Transitive reduction.

use crate::diagnostics::Diagnostics;
use crate::graph::dag::Graph;
use crate::graph::node::Node;

use super::GraphTransformer;

/// Drops edges implied by longer paths, keeping reachability.
#[derive(Debug, Default)]
pub struct TransitiveReductionTransformer;

impl GraphTransformer for TransitiveReductionTransformer {
    fn name(&self) -> &'static str {
        "TransitiveReductionTransformer"
    }

    fn transform(&self, graph: &mut Graph<Node>) -> Diagnostics {
        let before = graph.edges().len();
        graph.transitive_reduction();
        tracing::trace!("Transitive reduction: {before} -> {} edges", graph.edges().len());
        Diagnostics::new()
    }
}
