//! Applying planned resource changes.

use tracing::{debug, info, warn};

use crate::config::OnFailure;
use crate::error::{PlanError, ProviderError, Result};
use crate::graph::context::EvalContext;
use crate::plans::{Action, ResourceInstanceChange};
use crate::provider::{ApplyRequest, ProvisionRequest};
use crate::state::{ObjectStatus, ResourceInstanceObject};

use super::resource::ResourceInstanceNode;

impl ResourceInstanceNode {
    /// Applies a create, an update or the create half of a replace.
    ///
    /// A created object is provisioned before it is recorded. If a
    /// provisioner fails with `on_failure: fail`, the object is recorded as
    /// tainted and the instance fails.
    pub(super) async fn apply(&self, ctx: &EvalContext) -> Result<()> {
        let change = self.planned_change(ctx, None)?;
        let prior = match change.action {
            Action::Update => self.read_object(ctx)?.map(|o| o.attributes),
            Action::Create | Action::DeleteThenCreate | Action::CreateThenDelete => None,
            Action::NoOp | Action::Read | Action::Delete => return Ok(()),
        };

        let provider = self.provider(ctx)?;
        let applied = provider
            .apply_resource_change(ApplyRequest {
                type_name: self.addr.resource.type_name.clone(),
                prior,
                planned: change.after.clone(),
            })
            .await?;
        let Some(attributes) = applied else {
            return Err(PlanError::InvalidPlan {
                addr: self.addr.to_string(),
                message: String::from("provider returned no object after apply"),
            }
            .into());
        };

        let mut object = ResourceInstanceObject::new(attributes)
            .with_dependencies(self.resolved_dependencies(ctx.config()));
        object.create_before_destroy = self.create_before_destroy();

        let failure = if change.action == Action::Update {
            None
        } else {
            self.provision(ctx, &object).await
        };
        if failure.is_some() {
            object.status = ObjectStatus::Tainted;
        }

        if change.action == Action::CreateThenDelete {
            let key = self
                .preallocated_deposed_key
                .clone()
                .unwrap_or_else(crate::addrs::DeposedKey::generate);
            let deposed = ctx
                .state()
                .write(|s| s.replace_current(&self.addr, object, &key, &change.provider));
            if deposed {
                debug!("Deposed previous object of {} as {key}", self.addr);
            } else {
                warn!("{} had no current object to depose", self.addr);
            }
        } else {
            ctx.state()
                .write(|s| s.set_current(&self.addr, Some(object), &change.provider));
        }
        if let Some(err) = failure {
            return Err(err.into());
        }
        info!("{}: {} complete", self.addr, change.action);
        Ok(())
    }

    /// Runs the configured provisioners in order against a created object.
    /// Returns the failure that fails the instance, if any.
    async fn provision(&self, ctx: &EvalContext, object: &ResourceInstanceObject) -> Option<ProviderError> {
        let provisioners = self
            .config
            .as_deref()
            .map(|c| c.provisioners.as_slice())
            .unwrap_or_default();
        for config in provisioners {
            let result = match ctx.provisioner(&config.type_name) {
                Ok(provisioner) => {
                    provisioner
                        .provision_resource(ProvisionRequest {
                            addr: self.addr.to_string(),
                            config: config.settings_value(),
                            object: object.attributes.clone(),
                        })
                        .await
                }
                Err(e) => Err(e),
            };
            match (result, config.on_failure) {
                (Ok(()), _) => debug!("{}: {} provisioner finished", self.addr, config.type_name),
                (Err(e), OnFailure::Continue) => {
                    warn!("{}: {} provisioner failed, continuing: {e}", self.addr, config.type_name);
                }
                (Err(e), OnFailure::Fail) => {
                    warn!("{}: {} provisioner failed, marking it tainted", self.addr, config.type_name);
                    return Some(e);
                }
            }
        }
        None
    }

    /// Applies a delete of the current or a deposed object.
    pub(super) async fn apply_destroy(&self, ctx: &EvalContext) -> Result<()> {
        // The destroy half of a create-before-destroy replace is planned as
        // part of the current object's change.
        let change_key = if self.preallocated_deposed_key.is_some() {
            None
        } else {
            self.deposed_key.as_ref()
        };
        let change = self.planned_change(ctx, change_key)?;
        if !change.action.destroys() {
            return Ok(());
        }
        self.destroy_object(ctx).await?;
        info!("{}: destroy complete", self.key());
        Ok(())
    }

    /// Deletes this vertex's object through its provider and removes it from
    /// state. A missing object is not an error.
    async fn destroy_object(&self, ctx: &EvalContext) -> Result<()> {
        let Some(object) = self.read_object(ctx)? else {
            debug!("{} is already gone", self.key());
            return Ok(());
        };
        let provider_addr = self.provider_addr()?.clone();
        let provider = self.provider(ctx)?;
        provider
            .apply_resource_change(ApplyRequest {
                type_name: self.addr.resource.type_name.clone(),
                prior: Some(object.attributes),
                planned: None,
            })
            .await?;

        ctx.state().write(|s| match &self.deposed_key {
            Some(key) => s.set_deposed(&self.addr, key, None, &provider_addr),
            None => s.set_current(&self.addr, None, &provider_addr),
        });
        Ok(())
    }

    fn planned_change(
        &self,
        ctx: &EvalContext,
        deposed: Option<&crate::addrs::DeposedKey>,
    ) -> Result<ResourceInstanceChange> {
        ctx.changes()
            .resource_change(&self.addr, deposed)
            .ok_or_else(|| {
                PlanError::MissingChange {
                    addr: self.key(),
                }
                .into()
            })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use serde_json::json;

    use crate::addrs::{DeposedKey, ProviderConfigAddr, ResourceInstanceAddr};
    use crate::config::{Config, LifecycleConfig, OnFailure, ProvisionerConfig, ResourceConfig};
    use crate::error::{OrchestratorError, PlanError, ProviderError};
    use crate::graph::context::EvalContext;
    use crate::graph::node::{ResourceInstanceNode, ResourceRole, WalkOperation};
    use crate::plans::{Action, Changes, ResourceInstanceChange};
    use crate::provider::{
        MockResourceProvisioner, ProviderFactory, ProvisionerFactory, SimpleProvider,
    };
    use crate::state::{ObjectStatus, ResourceInstanceObject, State};

    fn addr() -> ResourceInstanceAddr {
        "simple_thing.a".parse().expect("addr")
    }

    fn provider() -> ProviderConfigAddr {
        ProviderConfigAddr::root(SimpleProvider::TYPE)
    }

    fn change(action: Action, before: Option<serde_json::Value>) -> ResourceInstanceChange {
        ResourceInstanceChange {
            action,
            before,
            after: Some(json!({"id": null, "size": 2})),
            ..ResourceInstanceChange::noop(addr(), None, provider())
        }
    }

    async fn context(state: State, changes: Changes) -> EvalContext {
        let ctx = EvalContext::new(Arc::new(Config::default()), Arc::new(ProviderFactory::builtin()))
            .with_state(state)
            .with_changes(changes);
        let p = ctx.instantiate_provider(&provider()).expect("simple");
        p.configure(&json!({})).await.expect("configure");
        ctx.register_provider(provider(), p);
        ctx
    }

    fn node(role: ResourceRole) -> ResourceInstanceNode {
        let mut node = ResourceInstanceNode::new(role, addr());
        node.resolved_provider = Some(provider());
        node
    }

    fn old_state() -> State {
        let mut state = State::new();
        state.set_current(&addr(), Some(ResourceInstanceObject::new(json!({"id": "old", "size": 1}))), &provider());
        state
    }

    #[tokio::test]
    async fn test_apply_create() {
        let mut changes = Changes::new();
        changes.put_resource_change(change(Action::Create, None));
        let ctx = context(State::new(), changes).await;

        let diags = node(ResourceRole::ApplyableNormal).execute(&ctx, WalkOperation::Apply).await;
        assert!(!diags.has_errors(), "{diags}");
        let object = ctx.state().read(|s| s.current_object(&addr()).cloned()).expect("created");
        assert_eq!(object.status, ObjectStatus::Ready);
        assert!(object.attribute("id").and_then(|v| v.as_str()).is_some_and(|id| id.starts_with("simple-")));
    }

    #[tokio::test]
    async fn test_missing_change_is_error() {
        let ctx = context(State::new(), Changes::new()).await;
        let diags = node(ResourceRole::ApplyableNormal).execute(&ctx, WalkOperation::Apply).await;
        assert!(diags.any_error(|e| matches!(e, OrchestratorError::Plan(PlanError::MissingChange { .. }))));
    }

    #[tokio::test]
    async fn test_create_before_destroy_deposes_old_object() {
        let key = DeposedKey::generate();
        let mut changes = Changes::new();
        changes.put_resource_change(change(Action::CreateThenDelete, Some(json!({"id": "old", "size": 1}))));
        let ctx = context(old_state(), changes).await;

        let mut create = node(ResourceRole::ApplyableNormal);
        create.preallocated_deposed_key = Some(key.clone());
        create.planned_action = Some(Action::CreateThenDelete);
        assert!(!create.execute(&ctx, WalkOperation::Apply).await.has_errors());

        let (current, deposed) = ctx.state().read(|s| {
            (s.current_object(&addr()).cloned(), s.deposed_object(&addr(), &key).cloned())
        });
        let current = current.expect("new object current");
        assert_ne!(current.attribute("id"), Some(&json!("old")));
        assert!(current.create_before_destroy);
        assert_eq!(deposed.expect("old object deposed").status, ObjectStatus::Deposed);

        let mut destroy = node(ResourceRole::ApplyableDestroy).with_deposed_key(key.clone());
        destroy.preallocated_deposed_key = Some(key.clone());
        assert!(!destroy.execute(&ctx, WalkOperation::Apply).await.has_errors());
        assert!(ctx.state().read(|s| s.deposed_object(&addr(), &key).is_none()));
        assert!(ctx.state().read(|s| s.current_object(&addr()).is_some()));
    }

    #[tokio::test]
    async fn test_failed_create_keeps_old_object_current() {
        let mut changes = Changes::new();
        let mut failing = change(Action::CreateThenDelete, Some(json!({"id": "old"})));
        failing.after = Some(json!({"id": null, "fail_apply": true}));
        changes.put_resource_change(failing);
        let ctx = context(old_state(), changes).await;

        let mut create = node(ResourceRole::ApplyableNormal);
        create.preallocated_deposed_key = Some(DeposedKey::generate());
        assert!(create.execute(&ctx, WalkOperation::Apply).await.has_errors());
        let current = ctx.state().read(|s| s.current_object(&addr()).cloned()).expect("still there");
        assert_eq!(current.attribute("id"), Some(&json!("old")));
    }

    #[tokio::test]
    async fn test_destroy_then_create() {
        let mut changes = Changes::new();
        changes.put_resource_change(change(Action::DeleteThenCreate, Some(json!({"id": "old", "size": 1}))));
        let ctx = context(old_state(), changes).await;

        assert!(!node(ResourceRole::ApplyableDestroy).execute(&ctx, WalkOperation::Apply).await.has_errors());
        assert!(ctx.state().read(|s| s.current_object(&addr()).is_none()));
        assert!(!node(ResourceRole::ApplyableNormal).execute(&ctx, WalkOperation::Apply).await.has_errors());
        let current = ctx.state().read(|s| s.current_object(&addr()).cloned()).expect("recreated");
        assert_ne!(current.attribute("id"), Some(&json!("old")));
    }

    fn provisioned(role: ResourceRole, provisioners: Vec<ProvisionerConfig>) -> ResourceInstanceNode {
        let mut node = node(role);
        node.config = Some(Arc::new(ResourceConfig {
            type_name: String::from("simple_thing"),
            name: String::from("a"),
            count: None,
            for_each: None,
            provider: None,
            depends_on: Vec::new(),
            attributes: BTreeMap::new(),
            sensitive_attributes: Vec::new(),
            lifecycle: LifecycleConfig::default(),
            provisioners,
        }));
        node
    }

    fn mock_provisioner(on_failure: OnFailure) -> ProvisionerConfig {
        ProvisionerConfig {
            type_name: String::from("mock"),
            on_failure,
            settings: BTreeMap::from([(String::from("step"), json!("one"))]),
        }
    }

    fn failing_provisioners() -> Arc<ProvisionerFactory> {
        let mut mock = MockResourceProvisioner::new();
        mock.expect_provision_resource()
            .withf(|request| {
                request.addr == "simple_thing.a"
                    && request.config == json!({"step": "one"})
                    && request.object.get("id").is_some_and(|id| id.is_string())
            })
            .times(1)
            .returning(|_| Err(ProviderError::reported("mock", "boom")));
        Arc::new(ProvisionerFactory::new().with_instance("mock", Arc::new(mock)))
    }

    async fn create_context() -> EvalContext {
        let mut changes = Changes::new();
        changes.put_resource_change(change(Action::Create, None));
        context(State::new(), changes).await
    }

    #[tokio::test]
    async fn test_failed_provisioner_taints_created_object() {
        let ctx = create_context().await.with_provisioners(failing_provisioners());
        let n = provisioned(ResourceRole::ApplyableNormal, vec![mock_provisioner(OnFailure::Fail)]);

        let diags = n.execute(&ctx, WalkOperation::Apply).await;
        assert!(diags.any_error(|e| matches!(e, OrchestratorError::Provider(ProviderError::Reported { message, .. }) if message == "boom")));
        let object = ctx.state().read(|s| s.current_object(&addr()).cloned()).expect("recorded");
        assert_eq!(object.status, ObjectStatus::Tainted);
    }

    #[tokio::test]
    async fn test_continue_on_provisioner_failure() {
        let ctx = create_context().await.with_provisioners(failing_provisioners());
        let n = provisioned(ResourceRole::ApplyableNormal, vec![mock_provisioner(OnFailure::Continue)]);

        let diags = n.execute(&ctx, WalkOperation::Apply).await;
        assert!(!diags.has_errors(), "{diags}");
        let object = ctx.state().read(|s| s.current_object(&addr()).cloned()).expect("recorded");
        assert_eq!(object.status, ObjectStatus::Ready);
    }

    #[tokio::test]
    async fn test_update_runs_no_provisioners() {
        let mut mock = MockResourceProvisioner::new();
        mock.expect_provision_resource().never();
        let factory = ProvisionerFactory::new().with_instance("mock", Arc::new(mock));
        let mut changes = Changes::new();
        changes.put_resource_change(change(Action::Update, Some(json!({"id": "old", "size": 1}))));
        let ctx = context(old_state(), changes).await.with_provisioners(Arc::new(factory));

        let n = provisioned(ResourceRole::ApplyableNormal, vec![mock_provisioner(OnFailure::Fail)]);
        assert!(!n.execute(&ctx, WalkOperation::Apply).await.has_errors());
    }

    #[tokio::test]
    async fn test_unknown_provisioner_taints_object() {
        let ctx = create_context().await;
        let n = provisioned(ResourceRole::ApplyableNormal, vec![mock_provisioner(OnFailure::Fail)]);

        let diags = n.execute(&ctx, WalkOperation::Apply).await;
        assert!(diags.any_error(|e| matches!(e, OrchestratorError::Provider(ProviderError::UnknownProvisioner { .. }))));
        let object = ctx.state().read(|s| s.current_object(&addr()).cloned()).expect("recorded");
        assert_eq!(object.status, ObjectStatus::Tainted);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_local_exec_sees_created_object() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctx = create_context().await;
        let local_exec = ProvisionerConfig {
            type_name: String::from("local-exec"),
            on_failure: OnFailure::Fail,
            settings: BTreeMap::from([
                (String::from("command"), json!("printf '%s' \"$HALLDYLL_OBJECT\" > created.json")),
                (String::from("working_dir"), json!(dir.path())),
            ]),
        };
        let n = provisioned(ResourceRole::ApplyableNormal, vec![local_exec]);

        let diags = n.execute(&ctx, WalkOperation::Apply).await;
        assert!(!diags.has_errors(), "{diags}");
        let object = ctx.state().read(|s| s.current_object(&addr()).cloned()).expect("recorded");
        let written = std::fs::read_to_string(dir.path().join("created.json")).expect("written");
        let written: serde_json::Value = serde_json::from_str(&written).expect("json");
        assert_eq!(written.get("id"), object.attribute("id"));
    }
}
