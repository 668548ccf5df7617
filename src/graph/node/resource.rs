//! Resource instance vertices.
//!
//! One struct covers every role a resource instance object can play in a
//! graph; the role decides what [`ResourceInstanceNode::execute`] does. The
//! role-specific bodies live in the sibling `resource_*` modules.

use std::fmt;
use std::sync::Arc;

use crate::addrs::{DeposedKey, ProviderConfigAddr, ResourceAddr, ResourceInstanceAddr, Target};
use crate::config::{Config, ResourceConfig};
use crate::diagnostics::Diagnostics;
use crate::error::{GraphError, PlanError, Result};
use crate::graph::context::EvalContext;
use crate::plans::{Action, AttributePath};
use crate::provider::ResourceProvider;
use crate::state::ResourceInstanceObject;

use super::WalkOperation;

/// The part a resource instance vertex plays in its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceRole {
    /// Plan the instance towards its configuration.
    PlannableNormal,
    /// Plan the destruction of an instance no longer in configuration.
    PlannableOrphan,
    /// Plan the destruction of a configured instance (destroy mode).
    PlanDestroyable,
    /// Plan the destruction of a deposed object.
    PlanDeposed,
    /// Apply a create, update or the create half of a replace.
    ApplyableNormal,
    /// Apply a delete of the current or a deposed object.
    ApplyableDestroy,
}

impl ResourceRole {
    /// Returns true for roles that destroy an existing object.
    #[must_use]
    pub const fn is_destroy(self) -> bool {
        matches!(
            self,
            Self::PlannableOrphan | Self::PlanDestroyable | Self::PlanDeposed | Self::ApplyableDestroy
        )
    }

    /// Returns true for roles that create or update the current object.
    #[must_use]
    pub const fn is_creator(self) -> bool {
        matches!(self, Self::PlannableNormal | Self::ApplyableNormal)
    }
}

impl fmt::Display for ResourceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::PlannableNormal => "plannable",
            Self::PlannableOrphan => "orphan",
            Self::PlanDestroyable => "plan-destroy",
            Self::PlanDeposed => "plan-deposed",
            Self::ApplyableNormal => "applyable",
            Self::ApplyableDestroy => "destroy",
        };
        f.write_str(s)
    }
}

/// A vertex for one object of one resource instance.
#[derive(Debug, Clone)]
pub struct ResourceInstanceNode {
    /// What the vertex does.
    pub role: ResourceRole,
    /// Instance address.
    pub addr: ResourceInstanceAddr,
    /// Set when the vertex handles a deposed object.
    pub deposed_key: Option<DeposedKey>,
    /// Provider configuration chosen by the provider transform.
    pub resolved_provider: Option<ProviderConfigAddr>,
    /// Resource block from configuration, absent for orphans.
    pub config: Option<Arc<ResourceConfig>>,
    /// Object recorded in state when the graph was built.
    pub state: Option<ResourceInstanceObject>,
    /// Provider recorded in state for the resource.
    pub stored_provider: Option<ProviderConfigAddr>,
    /// Dependencies recorded on the state object.
    pub stored_dependencies: Vec<ResourceAddr>,
    /// Action planned for the object, known when building apply graphs.
    pub planned_action: Option<Action>,
    /// Set when a dependent's create-before-destroy forces this one too.
    pub force_create_before_destroy: bool,
    /// Deposed key reserved for the object replaced by create-before-destroy.
    pub preallocated_deposed_key: Option<DeposedKey>,
}

impl ResourceInstanceNode {
    /// Creates a vertex with nothing attached.
    #[must_use]
    pub const fn new(role: ResourceRole, addr: ResourceInstanceAddr) -> Self {
        Self {
            role,
            addr,
            deposed_key: None,
            resolved_provider: None,
            config: None,
            state: None,
            stored_provider: None,
            stored_dependencies: Vec::new(),
            planned_action: None,
            force_create_before_destroy: false,
            preallocated_deposed_key: None,
        }
    }

    /// Targets a deposed object.
    #[must_use]
    pub fn with_deposed_key(mut self, key: DeposedKey) -> Self {
        self.deposed_key = Some(key);
        self
    }

    /// Graph key, unique per object and role family.
    #[must_use]
    pub fn key(&self) -> String {
        match (self.role, &self.deposed_key) {
            (ResourceRole::PlannableNormal | ResourceRole::ApplyableNormal, _) => self.addr.to_string(),
            (ResourceRole::PlannableOrphan, _) => format!("{} (orphan)", self.addr),
            (ResourceRole::PlanDestroyable | ResourceRole::ApplyableDestroy, None) => {
                format!("{} (destroy)", self.addr)
            }
            (ResourceRole::PlanDeposed, Some(key)) => format!("{} (deposed {key})", self.addr),
            (ResourceRole::PlanDeposed, None) => format!("{} (deposed)", self.addr),
            (ResourceRole::PlanDestroyable | ResourceRole::ApplyableDestroy, Some(key)) => {
                format!("{} (destroy deposed {key})", self.addr)
            }
        }
    }

    /// Whether replacing this object creates the new one first.
    #[must_use]
    pub fn create_before_destroy(&self) -> bool {
        self.force_create_before_destroy
            || self.planned_action == Some(Action::CreateThenDelete)
            || self
                .config
                .as_ref()
                .is_some_and(|c| c.lifecycle.create_before_destroy)
    }

    /// Whether configuration forbids destroying this object.
    #[must_use]
    pub fn prevent_destroy(&self) -> bool {
        self.config
            .as_ref()
            .is_some_and(|c| c.lifecycle.prevent_destroy)
    }

    /// `depends_on` entries of the configuration, made absolute. Entries that
    /// do not parse are dropped; validation reports them.
    #[must_use]
    pub fn config_dependencies(&self) -> Vec<Target> {
        self.config
            .as_ref()
            .and_then(|c| c.dependencies(self.addr.module()).ok())
            .unwrap_or_default()
    }

    /// Resources this object depends on: configured dependencies expanded
    /// against `config`, sorted and de-duplicated.
    #[must_use]
    pub fn resolved_dependencies(&self, config: &Config) -> Vec<ResourceAddr> {
        let targets = self.config_dependencies();
        let mut out: Vec<ResourceAddr> = config
            .resource_instances()
            .into_iter()
            .map(|(addr, _)| addr.resource)
            .filter(|resource| resource != &self.addr.resource)
            .filter(|resource| targets.iter().any(|t| t.matches_resource(resource)))
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Attribute paths to redact.
    #[must_use]
    pub fn sensitive_paths(&self) -> Vec<AttributePath> {
        self.config
            .as_ref()
            .map(|c| {
                c.sensitive_attributes
                    .iter()
                    .map(|name| vec![name.clone()])
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(super) async fn execute(&self, ctx: &EvalContext, op: WalkOperation) -> Diagnostics {
        let result = match (self.role, op) {
            (ResourceRole::PlannableNormal, WalkOperation::Validate) => self.validate(ctx).await,
            (ResourceRole::PlannableNormal, _) => self.plan(ctx).await,
            (ResourceRole::PlannableOrphan, _) => self.plan_orphan(ctx).await,
            (ResourceRole::PlanDestroyable, _) => self.plan_destroy(ctx),
            (ResourceRole::PlanDeposed, _) => self.plan_deposed(ctx),
            (ResourceRole::ApplyableNormal, _) => self.apply(ctx).await,
            (ResourceRole::ApplyableDestroy, _) => self.apply_destroy(ctx).await,
        };
        match result {
            Ok(()) => Diagnostics::new(),
            Err(err) => err.into(),
        }
    }

    /// The provider configuration that manages this object.
    pub(super) fn provider_addr(&self) -> Result<&ProviderConfigAddr> {
        self.resolved_provider
            .as_ref()
            .or(self.stored_provider.as_ref())
            .ok_or_else(|| {
                GraphError::UnresolvedProvider {
                    resource: self.addr.to_string(),
                    provider: self
                        .config
                        .as_ref()
                        .and_then(|c| c.provider.clone())
                        .unwrap_or_else(|| self.addr.resource.implied_provider_type().to_string()),
                }
                .into()
            })
    }

    /// The configured provider instance.
    pub(super) fn provider(&self, ctx: &EvalContext) -> Result<Arc<dyn ResourceProvider>> {
        Ok(ctx.provider(self.provider_addr()?)?)
    }

    /// Current state of this vertex's object, checked to decode.
    pub(super) fn read_object(&self, ctx: &EvalContext) -> Result<Option<ResourceInstanceObject>> {
        let object = ctx
            .state()
            .read(|s| s.object(&self.addr, self.deposed_key.as_ref()).cloned());
        if let Some(object) = &object {
            object.decode(&self.addr)?;
        }
        Ok(object)
    }

    /// Fails if the object may not be destroyed.
    pub(super) fn check_prevent_destroy(&self) -> Result<()> {
        if self.prevent_destroy() {
            return Err(PlanError::PreventDestroy {
                addr: self.addr.to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(role: ResourceRole) -> ResourceInstanceNode {
        ResourceInstanceNode::new(role, "simple_thing.a[0]".parse().expect("valid address"))
    }

    #[test]
    fn test_keys_by_role() {
        let key = DeposedKey::generate();
        assert_eq!(node(ResourceRole::PlannableNormal).key(), "simple_thing.a[0]");
        assert_eq!(node(ResourceRole::ApplyableNormal).key(), "simple_thing.a[0]");
        assert_eq!(node(ResourceRole::PlannableOrphan).key(), "simple_thing.a[0] (orphan)");
        assert_eq!(node(ResourceRole::PlanDestroyable).key(), "simple_thing.a[0] (destroy)");
        assert_eq!(
            node(ResourceRole::PlanDeposed).with_deposed_key(key.clone()).key(),
            format!("simple_thing.a[0] (deposed {key})")
        );
        assert_eq!(
            node(ResourceRole::ApplyableDestroy).with_deposed_key(key.clone()).key(),
            format!("simple_thing.a[0] (destroy deposed {key})")
        );
    }

    #[test]
    fn test_unresolved_provider() {
        let n = node(ResourceRole::PlannableNormal);
        let err = n.provider_addr().expect_err("nothing resolved");
        assert!(matches!(
            err,
            crate::error::OrchestratorError::Graph(GraphError::UnresolvedProvider { provider, .. })
                if provider == "simple"
        ));
    }

    #[test]
    fn test_create_before_destroy_sources() {
        let mut n = node(ResourceRole::ApplyableNormal);
        assert!(!n.create_before_destroy());
        n.planned_action = Some(Action::CreateThenDelete);
        assert!(n.create_before_destroy());

        let mut n = node(ResourceRole::PlannableNormal);
        n.force_create_before_destroy = true;
        assert!(n.create_before_destroy());
    }
}
