//! Plan and destroy-plan graph pipelines.

use crate::addrs::Target;
use crate::config::Config;
use crate::diagnostics::Diagnostics;
use crate::graph::dag::Graph;
use crate::graph::node::Node;
use crate::graph::transform::{
    AttachResourceConfigTransformer, AttachStateTransformer, CloseModuleTransformer,
    CloseProviderTransformer, ConfigTransformer, DestroyEdgeTransformer, ForcedCbdTransformer,
    GraphTransformer, OrphanResourceInstanceTransformer, OutputTransformer, ProviderTransformer,
    ReferenceTransformer, RootVariableTransformer, StateTransformer, TargetsTransformer,
    TransitiveReductionTransformer,
};
use crate::provider::ProviderFactory;
use crate::state::State;

use super::BasicGraphBuilder;

/// Builds the graph for planning towards the configuration.
#[derive(Debug)]
pub struct PlanGraphBuilder<'a> {
    /// Configuration to converge on.
    pub config: &'a Config,
    /// Prior state.
    pub state: &'a State,
    /// Known provider types.
    pub factory: &'a ProviderFactory,
    /// Resources to restrict the plan to.
    pub targets: &'a [Target],
    /// Resources to leave out of the plan.
    pub excludes: &'a [Target],
    /// Build the graph for validation: no state and no providers.
    pub validate_only: bool,
}

impl<'a> PlanGraphBuilder<'a> {
    /// A builder planning every configured resource.
    #[must_use]
    pub const fn new(config: &'a Config, state: &'a State, factory: &'a ProviderFactory) -> Self {
        Self {
            config,
            state,
            factory,
            targets: &[],
            excludes: &[],
            validate_only: false,
        }
    }

    /// Restricts the plan.
    #[must_use]
    pub const fn with_targets(mut self, targets: &'a [Target], excludes: &'a [Target]) -> Self {
        self.targets = targets;
        self.excludes = excludes;
        self
    }

    /// Switches to the validation pipeline.
    #[must_use]
    pub const fn validate_only(mut self) -> Self {
        self.validate_only = true;
        self
    }

    fn steps(&self) -> Vec<Box<dyn GraphTransformer + 'a>> {
        let config = self.config;
        let state = self.state;

        if self.validate_only {
            return vec![
                Box::new(ConfigTransformer { config }),
                Box::new(RootVariableTransformer { config }),
                Box::new(OutputTransformer { config, state: None, destroy: false }),
                Box::new(ReferenceTransformer),
                Box::new(CloseModuleTransformer),
                Box::new(TransitiveReductionTransformer),
            ];
        }

        vec![
            Box::new(ConfigTransformer { config }),
            Box::new(RootVariableTransformer { config }),
            Box::new(OutputTransformer { config, state: Some(state), destroy: false }),
            Box::new(OrphanResourceInstanceTransformer { config, state }),
            Box::new(StateTransformer { state, destroy: false }),
            Box::new(AttachStateTransformer { state }),
            Box::new(AttachResourceConfigTransformer { config }),
            Box::new(ProviderTransformer { config, factory: self.factory }),
            Box::new(ReferenceTransformer),
            Box::new(ForcedCbdTransformer),
            Box::new(DestroyEdgeTransformer),
            Box::new(TargetsTransformer { targets: self.targets, excludes: self.excludes, strict: true }),
            Box::new(CloseProviderTransformer),
            Box::new(CloseModuleTransformer),
            Box::new(TransitiveReductionTransformer),
        ]
    }

    /// Builds the graph.
    #[must_use]
    pub fn build(&self) -> (Option<Graph<Node>>, Diagnostics) {
        BasicGraphBuilder {
            name: if self.validate_only { "validate" } else { "plan" },
            steps: self.steps(),
            validate: true,
        }
        .build()
    }
}

/// Builds the graph for planning the destruction of everything in state.
///
/// Resources are ordered by destroy edges only; configuration contributes
/// lifecycle settings and provider blocks.
#[derive(Debug)]
pub struct DestroyPlanGraphBuilder<'a> {
    /// Configuration, for lifecycle settings and provider blocks.
    pub config: &'a Config,
    /// State to destroy.
    pub state: &'a State,
    /// Known provider types.
    pub factory: &'a ProviderFactory,
    /// Resources to restrict the plan to.
    pub targets: &'a [Target],
    /// Resources to leave out of the plan.
    pub excludes: &'a [Target],
}

impl<'a> DestroyPlanGraphBuilder<'a> {
    /// A builder destroying every recorded object.
    #[must_use]
    pub const fn new(config: &'a Config, state: &'a State, factory: &'a ProviderFactory) -> Self {
        Self {
            config,
            state,
            factory,
            targets: &[],
            excludes: &[],
        }
    }

    /// Restricts the plan.
    #[must_use]
    pub const fn with_targets(mut self, targets: &'a [Target], excludes: &'a [Target]) -> Self {
        self.targets = targets;
        self.excludes = excludes;
        self
    }

    fn steps(&self) -> Vec<Box<dyn GraphTransformer + 'a>> {
        let config = self.config;
        let state = self.state;
        vec![
            Box::new(StateTransformer { state, destroy: true }),
            Box::new(OutputTransformer { config, state: Some(state), destroy: true }),
            Box::new(AttachStateTransformer { state }),
            Box::new(AttachResourceConfigTransformer { config }),
            Box::new(ProviderTransformer { config, factory: self.factory }),
            Box::new(DestroyEdgeTransformer),
            Box::new(TargetsTransformer { targets: self.targets, excludes: self.excludes, strict: true }),
            Box::new(CloseProviderTransformer),
            Box::new(CloseModuleTransformer),
            Box::new(TransitiveReductionTransformer),
        ]
    }

    /// Builds the graph.
    #[must_use]
    pub fn build(&self) -> (Option<Graph<Node>>, Diagnostics) {
        BasicGraphBuilder {
            name: "destroy plan",
            steps: self.steps(),
            validate: true,
        }
        .build()
    }
}
