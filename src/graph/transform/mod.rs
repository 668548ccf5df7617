//! Graph transforms.
//!
//! A builder is an ordered list of [`GraphTransformer`]s, each adding
//! vertices, attaching data or wiring edges. A transformer reports problems
//! as diagnostics; any error aborts the build before the next step runs.

mod attach;
mod close;
mod config;
mod destroy_edge;
mod provider;
mod reduction;
mod reference;
mod state;
mod targets;

pub use attach::{AttachResourceConfigTransformer, AttachStateTransformer};
pub use close::{CloseModuleTransformer, CloseProviderTransformer};
pub use config::{ConfigTransformer, OutputTransformer, RootVariableTransformer};
pub use destroy_edge::{DestroyEdgeTransformer, ForcedCbdTransformer};
pub use provider::ProviderTransformer;
pub use reduction::TransitiveReductionTransformer;
pub use reference::ReferenceTransformer;
pub use state::{DiffTransformer, OrphanResourceInstanceTransformer, StateTransformer};
pub use targets::TargetsTransformer;

use crate::diagnostics::Diagnostics;

use super::dag::{Graph, VertexId};
use super::node::{Node, ResourceInstanceNode};

/// One step of a graph build.
pub trait GraphTransformer {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Mutates the graph in place.
    fn transform(&self, graph: &mut Graph<Node>) -> Diagnostics;
}

/// Ids of every resource instance vertex, in insertion order.
fn resource_ids(graph: &Graph<Node>) -> Vec<VertexId> {
    graph
        .vertices()
        .filter(|(_, node)| node.as_resource().is_some())
        .map(|(id, _)| id)
        .collect()
}

/// Resource instance vertices with their ids.
fn resources(graph: &Graph<Node>) -> Vec<(VertexId, &ResourceInstanceNode)> {
    graph
        .vertices()
        .filter_map(|(id, node)| node.as_resource().map(|r| (id, r)))
        .collect()
}
