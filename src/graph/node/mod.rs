//! Graph vertex kinds.
//!
//! [`Node`] is a closed set: every vertex a builder can produce is one of
//! these variants, and [`Node::execute`] dispatches exhaustively.

mod module;
mod output;
mod provider;
mod resource;
mod resource_apply;
mod resource_plan;
mod resource_plan_destroy;
mod variable;

use std::fmt;

use crate::addrs::ModulePath;
use crate::diagnostics::Diagnostics;

use super::context::EvalContext;
use super::dag::Vertex;

pub use module::ModuleCloseNode;
pub use output::OutputNode;
pub use provider::{ProviderCloseNode, ProviderNode};
pub use resource::{ResourceInstanceNode, ResourceRole};
pub use variable::VariableNode;

/// What a walk is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WalkOperation {
    /// Check configuration without contacting providers.
    Validate,
    /// Compute changes converging on the configuration.
    Plan,
    /// Compute changes destroying everything in state.
    PlanDestroy,
    /// Carry out planned changes.
    Apply,
}

impl fmt::Display for WalkOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validate => write!(f, "validate"),
            Self::Plan => write!(f, "plan"),
            Self::PlanDestroy => write!(f, "plan-destroy"),
            Self::Apply => write!(f, "apply"),
        }
    }
}

/// A graph vertex.
#[derive(Debug, Clone)]
pub enum Node {
    /// One object of a resource instance.
    ResourceInstance(ResourceInstanceNode),
    /// A provider configuration.
    Provider(ProviderNode),
    /// A module output.
    Output(OutputNode),
    /// A root input variable.
    Variable(VariableNode),
    /// Closes a provider once every user is done.
    ProviderClose(ProviderCloseNode),
    /// Runs after everything in a module.
    ModuleClose(ModuleCloseNode),
}

impl Node {
    /// Executes the vertex once, after all its dependencies succeeded.
    pub async fn execute(&self, ctx: &EvalContext, op: WalkOperation) -> Diagnostics {
        let diagnostics = match self {
            Self::ResourceInstance(node) => node.execute(ctx, op).await,
            Self::Provider(node) => node.execute(ctx, op).await,
            Self::Output(node) => node.execute(ctx, op),
            Self::Variable(node) => node.execute(ctx),
            Self::ProviderClose(node) => node.execute(ctx).await,
            Self::ModuleClose(node) => node.execute(),
        };
        diagnostics.in_context(&self.key())
    }

    /// Fences run even when a dependency failed.
    #[must_use]
    pub const fn is_fence(&self) -> bool {
        matches!(self, Self::ProviderClose(_) | Self::ModuleClose(_))
    }

    /// Module the vertex belongs to.
    #[must_use]
    pub fn module_path(&self) -> ModulePath {
        match self {
            Self::ResourceInstance(node) => node.addr.module().clone(),
            Self::Provider(node) => node.addr.module.clone(),
            Self::Output(node) => node.addr.module.clone(),
            Self::Variable(_) => ModulePath::root(),
            Self::ProviderClose(node) => node.addr.module.clone(),
            Self::ModuleClose(node) => node.module.clone(),
        }
    }

    /// The resource instance payload, if this is a resource vertex.
    #[must_use]
    pub const fn as_resource(&self) -> Option<&ResourceInstanceNode> {
        match self {
            Self::ResourceInstance(node) => Some(node),
            _ => None,
        }
    }

    /// Mutable resource instance payload.
    pub fn as_resource_mut(&mut self) -> Option<&mut ResourceInstanceNode> {
        match self {
            Self::ResourceInstance(node) => Some(node),
            _ => None,
        }
    }
}

impl Vertex for Node {
    fn key(&self) -> String {
        match self {
            Self::ResourceInstance(node) => node.key(),
            Self::Provider(node) => node.addr.to_string(),
            Self::Output(node) => node.key(),
            Self::Variable(node) => node.addr.to_string(),
            Self::ProviderClose(node) => format!("{} (close)", node.addr),
            Self::ModuleClose(node) => node.key(),
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}
