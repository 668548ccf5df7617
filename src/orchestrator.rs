//! Plan, apply and validate entry points.
//!
//! The [`Orchestrator`] ties configuration, providers and the graph engine
//! together: it picks the builder for an operation, walks the resulting graph
//! and turns the walk's context back into a [`Plan`] or a new [`State`].
//! It never touches a state store; see [`crate::operation`] for the
//! lock-disciplined wrappers.

use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::addrs::Target;
use crate::config::{Config, ConfigHasher, ConfigValidator};
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::ConfigError;
use crate::graph::{
    ApplyGraphBuilder, DEFAULT_PARALLELISM, DestroyPlanGraphBuilder, EvalContext, Graph,
    InterruptHandle, Node, PlanGraphBuilder, WalkOperation, WalkResult, WalkStatus, Walker,
};
use crate::plans::{Plan, PlanMode};
use crate::provider::{ProviderFactory, ProvisionerFactory};
use crate::state::State;

/// Options for [`Orchestrator::plan`].
#[derive(Debug, Clone)]
pub struct PlanOptions {
    /// Normal or destroy plan.
    pub mode: PlanMode,
    /// Restrict the plan to these addresses and their dependencies.
    pub targets: Vec<Target>,
    /// Leave these addresses and their dependents out of the plan.
    pub excludes: Vec<Target>,
    /// Root variable values.
    pub variables: BTreeMap<String, Value>,
    /// Refresh recorded objects before planning.
    pub refresh: bool,
    /// Maximum number of concurrent operations.
    pub parallelism: usize,
}

impl Default for PlanOptions {
    fn default() -> Self {
        Self {
            mode: PlanMode::Normal,
            targets: Vec::new(),
            excludes: Vec::new(),
            variables: BTreeMap::new(),
            refresh: true,
            parallelism: DEFAULT_PARALLELISM,
        }
    }
}

impl PlanOptions {
    /// Options for a destroy plan.
    #[must_use]
    pub fn destroy() -> Self {
        Self {
            mode: PlanMode::Destroy,
            ..Self::default()
        }
    }
}

/// Options for [`Orchestrator::apply`].
#[derive(Debug, Clone, Copy)]
pub struct ApplyOptions {
    /// Maximum number of concurrent operations.
    pub parallelism: usize,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            parallelism: DEFAULT_PARALLELISM,
        }
    }
}

/// Graph shown by [`Orchestrator::graph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphKind {
    /// Normal plan.
    Plan,
    /// Destroy plan.
    PlanDestroy,
    /// Apply of a fresh normal plan.
    Apply,
    /// Configuration validation.
    Validate,
}

impl fmt::Display for GraphKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plan => write!(f, "plan"),
            Self::PlanDestroy => write!(f, "plan-destroy"),
            Self::Apply => write!(f, "apply"),
            Self::Validate => write!(f, "validate"),
        }
    }
}

/// Result of an apply walk, as seen by the state-locking layer.
#[derive(Debug)]
pub struct ApplyOutcome {
    /// State after apply; includes every change that completed.
    pub state: State,
    /// How the walk ended, if it started.
    pub status: Option<WalkStatus>,
    /// Everything reported along the way.
    pub diagnostics: Diagnostics,
}

/// Runs operations for one configuration.
pub struct Orchestrator {
    config: Arc<Config>,
    factory: Arc<ProviderFactory>,
    provisioners: Arc<ProvisionerFactory>,
    interrupt: InterruptHandle,
    hasher: ConfigHasher,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("factory", &self.factory)
            .field("provisioners", &self.provisioners)
            .field("interrupt", &self.interrupt.level())
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator for `config`.
    #[must_use]
    pub fn new(config: Config, factory: ProviderFactory) -> Self {
        Self {
            config: Arc::new(config),
            factory: Arc::new(factory),
            provisioners: Arc::new(ProvisionerFactory::builtin()),
            interrupt: InterruptHandle::new(),
            hasher: ConfigHasher::new(),
        }
    }

    /// Replaces the built-in provisioners.
    #[must_use]
    pub fn with_provisioners(mut self, provisioners: ProvisionerFactory) -> Self {
        self.provisioners = Arc::new(provisioners);
        self
    }

    /// Shares an interrupt handle with every walk.
    #[must_use]
    pub fn with_interrupt(mut self, interrupt: InterruptHandle) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// The handle interrupting walks started by this orchestrator.
    #[must_use]
    pub const fn interrupt_handle(&self) -> &InterruptHandle {
        &self.interrupt
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Hash of the configuration.
    #[must_use]
    pub fn config_hash(&self) -> String {
        self.hasher.hash_config(&self.config)
    }

    /// Checks the configuration without contacting any provider's remote side.
    pub async fn validate(&self) -> Diagnostics {
        let mut diags = ConfigValidator::new().validate(&self.config).into_diagnostics();
        if diags.has_errors() {
            return diags;
        }

        let state = State::new();
        let (graph, build_diags) = PlanGraphBuilder::new(&self.config, &state, &self.factory)
            .validate_only()
            .build();
        diags.append(build_diags);
        let Some(graph) = graph else {
            return diags;
        };

        let ctx = Arc::new(self.context());
        let result = self
            .walker(DEFAULT_PARALLELISM)
            .walk(&graph, Arc::clone(&ctx), WalkOperation::Validate)
            .await;
        diags.append(Self::finish_walk(result).1);
        Self::close_provisioners(&ctx, &mut diags).await;
        diags
    }

    /// Plans the changes converging `state` on the configuration, or
    /// destroying everything in it.
    ///
    /// Returns no plan if the graph could not be built, any vertex failed, or
    /// the walk was interrupted.
    pub async fn plan(&self, state: &State, options: &PlanOptions) -> (Option<Plan>, Diagnostics) {
        info!("Planning ({} mode)", options.mode);
        let mut diags = ConfigValidator::new().validate(&self.config).into_diagnostics();
        if diags.has_errors() {
            return (None, diags);
        }

        let (graph, build_diags) = self.plan_graph(state, options);
        diags.append(build_diags);
        let Some(graph) = graph else {
            return (None, diags);
        };

        let ctx = Arc::new(
            self.context()
                .with_state(state.clone())
                .with_variables(options.variables.clone())
                .with_refresh(options.refresh),
        );
        let op = match options.mode {
            PlanMode::Normal => WalkOperation::Plan,
            PlanMode::Destroy => WalkOperation::PlanDestroy,
        };
        let result = self.walker(options.parallelism).walk(&graph, Arc::clone(&ctx), op).await;
        let (status, walk_diags) = Self::finish_walk(result);
        diags.append(walk_diags);
        if status != WalkStatus::Completed || diags.has_errors() {
            return (None, diags);
        }

        let mut changes = ctx.changes().snapshot();
        changes.sort();
        let plan = Plan {
            mode: options.mode,
            variable_values: ctx.variable_values(),
            changes,
            targets: options.targets.clone(),
            excludes: options.excludes.clone(),
            prior_state: ctx.state().snapshot(),
            config_hash: self.config_hash(),
            state_origin: None,
            created_at: Utc::now(),
        };
        info!("Plan: {}", plan.summary());
        (Some(plan), diags)
    }

    /// Carries out `plan`, starting from the state it was made against.
    pub async fn apply(&self, plan: &Plan, options: &ApplyOptions) -> (State, Diagnostics) {
        let outcome = self.apply_plan(plan, options).await;
        (outcome.state, outcome.diagnostics)
    }

    /// Like [`Orchestrator::apply`], also reporting how the walk ended.
    pub async fn apply_plan(&self, plan: &Plan, options: &ApplyOptions) -> ApplyOutcome {
        let found = self.config_hash();
        if found != plan.config_hash {
            return ApplyOutcome {
                state: plan.prior_state.clone(),
                status: None,
                diagnostics: Diagnostic::error(ConfigError::StalePlan {
                    expected: plan.config_hash.clone(),
                    found,
                })
                .into(),
            };
        }

        info!("Applying plan: {}", plan.summary());
        let (graph, diags) = self.apply_graph(plan);
        let Some(graph) = graph else {
            return ApplyOutcome {
                state: plan.prior_state.clone(),
                status: None,
                diagnostics: diags,
            };
        };
        let mut diagnostics = diags;

        let ctx = Arc::new(
            self.context()
                .with_state(plan.prior_state.clone())
                .with_changes(plan.changes.clone())
                .with_variables(plan.variable_values.clone()),
        );
        let result = self
            .walker(options.parallelism)
            .walk(&graph, Arc::clone(&ctx), WalkOperation::Apply)
            .await;
        let (status, walk_diags) = Self::finish_walk(result);
        diagnostics.append(walk_diags);
        Self::close_provisioners(&ctx, &mut diagnostics).await;

        let mut state = ctx.state().snapshot();
        state.prune();
        ApplyOutcome {
            state,
            status: Some(status),
            diagnostics,
        }
    }

    /// Builds the graph an operation would walk, without walking it. An
    /// apply graph needs a plan, so [`GraphKind::Apply`] plans first.
    pub async fn graph(
        &self,
        kind: GraphKind,
        state: &State,
        options: &PlanOptions,
    ) -> (Option<Graph<Node>>, Diagnostics) {
        debug!("Building {kind} graph");
        match kind {
            GraphKind::Plan => self.plan_graph(
                state,
                &PlanOptions {
                    mode: PlanMode::Normal,
                    ..options.clone()
                },
            ),
            GraphKind::PlanDestroy => self.plan_graph(
                state,
                &PlanOptions {
                    mode: PlanMode::Destroy,
                    ..options.clone()
                },
            ),
            GraphKind::Validate => PlanGraphBuilder::new(&self.config, state, &self.factory)
                .validate_only()
                .build(),
            GraphKind::Apply => {
                let (plan, mut diags) = self.plan(state, options).await;
                let Some(plan) = plan else {
                    return (None, diags);
                };
                let (graph, build_diags) = self.apply_graph(&plan);
                diags.append(build_diags);
                (graph, diags)
            }
        }
    }

    fn plan_graph(&self, state: &State, options: &PlanOptions) -> (Option<Graph<Node>>, Diagnostics) {
        match options.mode {
            PlanMode::Normal => PlanGraphBuilder::new(&self.config, state, &self.factory)
                .with_targets(&options.targets, &options.excludes)
                .build(),
            PlanMode::Destroy => DestroyPlanGraphBuilder::new(&self.config, state, &self.factory)
                .with_targets(&options.targets, &options.excludes)
                .build(),
        }
    }

    fn apply_graph(&self, plan: &Plan) -> (Option<Graph<Node>>, Diagnostics) {
        ApplyGraphBuilder::new(&self.config, &plan.prior_state, &plan.changes, &self.factory)
            .with_targets(&plan.targets, &plan.excludes)
            .with_destroy(plan.mode == PlanMode::Destroy)
            .build()
    }

    fn context(&self) -> EvalContext {
        EvalContext::new(Arc::clone(&self.config), Arc::clone(&self.factory))
            .with_provisioners(Arc::clone(&self.provisioners))
    }

    async fn close_provisioners(ctx: &EvalContext, diagnostics: &mut Diagnostics) {
        if let Err(e) = ctx.close_provisioners().await {
            diagnostics.push(Diagnostic::warning(
                "Failed to close a provisioner",
                Some(e.to_string()),
            ));
        }
    }

    fn walker(&self, parallelism: usize) -> Walker {
        Walker::new()
            .with_parallelism(parallelism)
            .with_interrupt(self.interrupt.clone())
    }

    fn finish_walk(result: WalkResult) -> (WalkStatus, Diagnostics) {
        let WalkResult {
            status,
            mut diagnostics,
            ..
        } = result;
        if status == WalkStatus::Cancelled {
            warn!("Operation cancelled");
            diagnostics.push(Diagnostic::warning(
                "Operation cancelled",
                Some(String::from(
                    "Running operations were allowed to finish. Changes that had not started were not made.",
                )),
            ));
        }
        (status, diagnostics)
    }
}
