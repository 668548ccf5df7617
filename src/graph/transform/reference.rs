//! Ordering edges from `depends_on` and output references.

use crate::addrs::{ResourceInstanceAddr, Target, VariableAddr};
use crate::config::OutputSource;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::graph::dag::{Graph, VertexId};
use crate::graph::node::Node;

use super::{GraphTransformer, resources};

/// Makes creators wait for the creators they reference.
///
/// A resource depends on every other creating vertex its `depends_on`
/// matches. An output depends on the variable, resource or child output it
/// reads, and on whatever its own `depends_on` matches.
#[derive(Debug, Default)]
pub struct ReferenceTransformer;

impl GraphTransformer for ReferenceTransformer {
    fn name(&self) -> &'static str {
        "ReferenceTransformer"
    }

    fn transform(&self, graph: &mut Graph<Node>) -> Diagnostics {
        let mut diagnostics = Diagnostics::new();
        let creators: Vec<(VertexId, ResourceInstanceAddr)> = resources(graph)
            .into_iter()
            .filter(|(_, node)| node.role.is_creator())
            .map(|(id, node)| (id, node.addr.clone()))
            .collect();
        let matching = |targets: &[Target]| -> Vec<VertexId> {
            creators
                .iter()
                .filter(|(_, addr)| targets.iter().any(|t| t.matches_instance(addr)))
                .map(|(id, _)| *id)
                .collect()
        };

        let mut edges = Vec::new();
        for (id, node) in graph.vertices() {
            match node {
                Node::ResourceInstance(resource) if resource.role.is_creator() => {
                    let Some(config) = &resource.config else {
                        continue;
                    };
                    match config.dependencies(resource.addr.module()) {
                        Ok(targets) => edges.extend(
                            matching(&targets)
                                .into_iter()
                                .filter(|other| {
                                    graph
                                        .get(*other)
                                        .and_then(Node::as_resource)
                                        .is_some_and(|o| o.addr.resource != resource.addr.resource)
                                })
                                .map(|other| (id, other)),
                        ),
                        Err(err) => diagnostics.push(Diagnostic::error(err).with_address(node)),
                    }
                }
                Node::Output(output) if !output.destroy => {
                    let Some(config) = &output.config else {
                        continue;
                    };
                    match config.source(&output.addr.module) {
                        Ok(OutputSource::Literal(_)) => {}
                        Ok(OutputSource::Variable(name)) => {
                            edges.extend(graph.find(&VariableAddr::new(name).to_string()).map(|v| (id, v)));
                        }
                        Ok(OutputSource::ResourceAttribute { instance, .. }) => edges.extend(
                            creators
                                .iter()
                                .filter(|(_, addr)| *addr == instance)
                                .map(|(other, _)| (id, *other)),
                        ),
                        Ok(OutputSource::ModuleOutput(addr)) => {
                            edges.extend(graph.find(&addr.to_string()).map(|v| (id, v)));
                        }
                        Err(err) => diagnostics.push(Diagnostic::error(err).with_address(node)),
                    }
                    match config.dependencies(&output.addr.module) {
                        Ok(targets) => edges.extend(matching(&targets).into_iter().map(|other| (id, other))),
                        Err(err) => diagnostics.push(Diagnostic::error(err).with_address(node)),
                    }
                }
                _ => {}
            }
        }

        for (from, to) in edges {
            graph.connect(from, to);
        }
        diagnostics
    }
}
