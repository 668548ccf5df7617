//! Dependency graphs and their evaluation.
//!
//! Builders run a fixed sequence of transformers over an empty [`Graph`] to
//! produce the graph for one operation. The [`Walker`] then executes each
//! vertex against a shared [`EvalContext`], dependencies first.

pub mod builder;
pub mod context;
pub mod dag;
pub mod node;
pub mod transform;
pub mod walker;

pub use builder::{ApplyGraphBuilder, BasicGraphBuilder, DestroyPlanGraphBuilder, PlanGraphBuilder};
pub use context::EvalContext;
pub use dag::{Graph, Vertex, VertexId};
pub use node::{Node, WalkOperation};
pub use transform::GraphTransformer;
pub use walker::{
    DEFAULT_PARALLELISM, InterruptHandle, InterruptLevel, VertexOutcome, VertexStatus, WalkResult,
    WalkStatus, Walker,
};
