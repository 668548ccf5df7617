//! Vertices created from configuration.

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

use crate::addrs::{OutputAddr, VariableAddr};
use crate::config::Config;
use crate::diagnostics::Diagnostics;
use crate::graph::dag::Graph;
use crate::graph::node::{Node, OutputNode, ResourceInstanceNode, ResourceRole, VariableNode};
use crate::state::State;

use super::GraphTransformer;

/// Adds a plannable vertex for every configured resource instance.
#[derive(Debug)]
pub struct ConfigTransformer<'a> {
    /// Configuration being planned.
    pub config: &'a Config,
}

impl GraphTransformer for ConfigTransformer<'_> {
    fn name(&self) -> &'static str {
        "ConfigTransformer"
    }

    fn transform(&self, graph: &mut Graph<Node>) -> Diagnostics {
        for (addr, resource) in self.config.resource_instances() {
            let mut node = ResourceInstanceNode::new(ResourceRole::PlannableNormal, addr);
            node.config = Some(Arc::new(resource.clone()));
            graph.add(Node::ResourceInstance(node));
        }
        Diagnostics::new()
    }
}

/// Adds a vertex for every root input variable.
#[derive(Debug)]
pub struct RootVariableTransformer<'a> {
    /// Configuration declaring the variables.
    pub config: &'a Config,
}

impl GraphTransformer for RootVariableTransformer<'_> {
    fn name(&self) -> &'static str {
        "RootVariableTransformer"
    }

    fn transform(&self, graph: &mut Graph<Node>) -> Diagnostics {
        for variable in &self.config.root.variables {
            graph.add(Node::Variable(VariableNode {
                addr: VariableAddr::new(variable.name.clone()),
                config: Arc::new(variable.clone()),
            }));
        }
        Diagnostics::new()
    }
}

/// Adds output vertices.
///
/// Outside destroy mode every configured output is evaluated and outputs
/// only found in `state` are removed. In destroy mode every known output is
/// removed.
#[derive(Debug)]
pub struct OutputTransformer<'a> {
    /// Configuration declaring outputs.
    pub config: &'a Config,
    /// Prior state, for outputs no longer configured.
    pub state: Option<&'a State>,
    /// Remove outputs instead of evaluating them.
    pub destroy: bool,
}

impl OutputTransformer<'_> {
    fn stored_outputs(&self) -> BTreeSet<OutputAddr> {
        self.state
            .map(|state| {
                state
                    .modules
                    .iter()
                    .flat_map(|(path, module)| {
                        module
                            .outputs
                            .keys()
                            .map(|name| OutputAddr::new(path.clone(), name.clone()))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn configured_outputs(&self) -> BTreeSet<OutputAddr> {
        self.config
            .modules()
            .into_iter()
            .flat_map(|(path, module)| {
                module
                    .outputs
                    .iter()
                    .map(move |o| OutputAddr::new(path.clone(), o.name.clone()))
            })
            .collect()
    }
}

impl GraphTransformer for OutputTransformer<'_> {
    fn name(&self) -> &'static str {
        "OutputTransformer"
    }

    fn transform(&self, graph: &mut Graph<Node>) -> Diagnostics {
        let configured = self.configured_outputs();
        let stored = self.stored_outputs();

        let (evaluated, removed): (BTreeSet<OutputAddr>, BTreeSet<OutputAddr>) = if self.destroy {
            (BTreeSet::new(), configured.union(&stored).cloned().collect())
        } else {
            (configured.clone(), stored.difference(&configured).cloned().collect())
        };

        for addr in evaluated {
            let config = self.config.output(&addr).cloned().map(Arc::new);
            graph.add(Node::Output(OutputNode {
                addr,
                config,
                destroy: false,
            }));
        }
        for addr in removed {
            debug!("Adding removal of {addr}");
            let config = self.config.output(&addr).cloned().map(Arc::new);
            graph.add(Node::Output(OutputNode {
                addr,
                config,
                destroy: true,
            }));
        }
        Diagnostics::new()
    }
}
