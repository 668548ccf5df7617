//! `-target` and `-exclude` filtering.

use std::collections::BTreeSet;
use tracing::debug;

use crate::addrs::Target;
use crate::diagnostics::Diagnostics;
use crate::error::GraphError;
use crate::graph::dag::{Graph, VertexId};
use crate::graph::node::Node;

use super::{GraphTransformer, resources};

/// Narrows the graph to the targeted resources.
///
/// With targets, only the matching resource vertices and everything they
/// depend on survive. Excluded resource vertices are removed together with
/// everything that depends on them. When `strict`, a target or exclude that
/// matches no vertex is an error.
#[derive(Debug)]
pub struct TargetsTransformer<'a> {
    /// Addresses to keep.
    pub targets: &'a [Target],
    /// Addresses to drop.
    pub excludes: &'a [Target],
    /// Reject addresses that match nothing.
    pub strict: bool,
}

impl TargetsTransformer<'_> {
    fn matching(graph: &Graph<Node>, target: &Target) -> Vec<VertexId> {
        resources(graph)
            .into_iter()
            .filter(|(_, node)| target.matches_instance(&node.addr))
            .map(|(id, _)| id)
            .collect()
    }

    fn unmatched(&self, target: &Target, diagnostics: &mut Diagnostics) {
        if self.strict {
            diagnostics.push_error(GraphError::UnmatchedTarget {
                target: target.to_string(),
            });
        } else {
            debug!("Target {target} matches nothing");
        }
    }
}

impl GraphTransformer for TargetsTransformer<'_> {
    fn name(&self) -> &'static str {
        "TargetsTransformer"
    }

    fn transform(&self, graph: &mut Graph<Node>) -> Diagnostics {
        let mut diagnostics = Diagnostics::new();
        let mut removed = BTreeSet::new();

        if !self.targets.is_empty() {
            let mut keep = BTreeSet::new();
            for target in self.targets {
                let matched = Self::matching(graph, target);
                if matched.is_empty() {
                    self.unmatched(target, &mut diagnostics);
                }
                for id in matched {
                    keep.insert(id);
                    keep.extend(graph.ancestors(id));
                }
            }
            removed.extend(graph.ids().into_iter().filter(|id| !keep.contains(id)));
        }

        for exclude in self.excludes {
            let matched = Self::matching(graph, exclude);
            if matched.is_empty() {
                self.unmatched(exclude, &mut diagnostics);
            }
            for id in matched {
                removed.insert(id);
                removed.extend(graph.descendants(id));
            }
        }

        if diagnostics.has_errors() {
            return diagnostics;
        }
        for id in removed {
            graph.remove(id);
        }
        diagnostics
    }
}
