//! Planning the destruction of recorded objects: destroy mode, orphans and
//! deposed objects.

use tracing::debug;

use crate::error::Result;
use crate::graph::context::EvalContext;
use crate::plans::ResourceInstanceChange;

use super::resource::ResourceInstanceNode;

impl ResourceInstanceNode {
    /// Plans a `Delete` for the current object of a configured instance.
    pub(super) fn plan_destroy(&self, ctx: &EvalContext) -> Result<()> {
        let Some(object) = self.read_object(ctx)? else {
            debug!("{} has no object to destroy", self.addr);
            return Ok(());
        };
        self.check_prevent_destroy()?;
        self.write_delete(ctx, object.attributes)
    }

    /// Plans a `Delete` for an instance that is no longer configured.
    pub(super) async fn plan_orphan(&self, ctx: &EvalContext) -> Result<()> {
        let Some(mut object) = self.read_object(ctx)? else {
            return Ok(());
        };
        if ctx.refresh() {
            match self.refresh(ctx, object).await? {
                Some(refreshed) => object = refreshed,
                None => return Ok(()),
            }
        }
        self.write_delete(ctx, object.attributes)
    }

    /// Plans a `Delete` for a deposed object.
    pub(super) fn plan_deposed(&self, ctx: &EvalContext) -> Result<()> {
        let Some(object) = self.read_object(ctx)? else {
            debug!("{} has no deposed object to destroy", self.key());
            return Ok(());
        };
        self.write_delete(ctx, object.attributes)
    }

    fn write_delete(&self, ctx: &EvalContext, before: serde_json::Value) -> Result<()> {
        let provider = self.provider_addr()?.clone();
        debug!("Planned destroy for {}", self.key());
        ctx.changes().put_resource_change(ResourceInstanceChange {
            sensitive: self.sensitive_paths(),
            ..ResourceInstanceChange::delete(
                self.addr.clone(),
                self.deposed_key.clone(),
                provider,
                before,
            )
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use crate::addrs::{DeposedKey, ProviderConfigAddr, ResourceInstanceAddr};
    use crate::config::{Config, LifecycleConfig, ResourceConfig};
    use crate::error::{OrchestratorError, PlanError, StateError};
    use crate::graph::context::EvalContext;
    use crate::graph::node::{ResourceInstanceNode, ResourceRole, WalkOperation};
    use crate::plans::Action;
    use crate::provider::{ProviderFactory, SimpleProvider};
    use crate::state::{ResourceInstanceObject, State};

    fn addr() -> ResourceInstanceAddr {
        "simple_thing.a".parse().expect("addr")
    }

    fn provider() -> ProviderConfigAddr {
        ProviderConfigAddr::root(SimpleProvider::TYPE)
    }

    async fn context(state: State) -> EvalContext {
        let ctx = EvalContext::new(Arc::new(Config::default()), Arc::new(ProviderFactory::builtin()))
            .with_state(state);
        let p = ctx.instantiate_provider(&provider()).expect("simple");
        p.configure(&json!({})).await.expect("configure");
        ctx.register_provider(provider(), p);
        ctx
    }

    fn node(role: ResourceRole) -> ResourceInstanceNode {
        let mut node = ResourceInstanceNode::new(role, addr());
        node.stored_provider = Some(provider());
        node
    }

    fn state_with(attributes: serde_json::Value) -> State {
        let mut state = State::new();
        state.set_current(&addr(), Some(ResourceInstanceObject::new(attributes)), &provider());
        state
    }

    #[tokio::test]
    async fn test_plan_destroy_writes_delete() {
        let ctx = context(state_with(json!({"id": "1"}))).await;
        let n = node(ResourceRole::PlanDestroyable);
        assert!(!n.execute(&ctx, WalkOperation::PlanDestroy).await.has_errors());
        let change = ctx.changes().resource_change(&addr(), None).expect("change");
        assert_eq!(change.action, Action::Delete);
        assert_eq!(change.after, None);
        assert_eq!(change.before, Some(json!({"id": "1"})));
    }

    #[tokio::test]
    async fn test_prevent_destroy_writes_no_change() {
        let ctx = context(state_with(json!({"id": "1"}))).await;
        let mut n = node(ResourceRole::PlanDestroyable);
        n.config = Some(Arc::new(ResourceConfig {
            type_name: String::from("simple_thing"),
            name: String::from("a"),
            count: None,
            for_each: None,
            provider: None,
            depends_on: Vec::new(),
            attributes: std::collections::BTreeMap::new(),
            sensitive_attributes: Vec::new(),
            lifecycle: LifecycleConfig { create_before_destroy: false, prevent_destroy: true },
            provisioners: Vec::new(),
        }));
        let diags = n.execute(&ctx, WalkOperation::PlanDestroy).await;
        assert!(diags.any_error(|e| matches!(e, OrchestratorError::Plan(PlanError::PreventDestroy { .. }))));
        assert!(ctx.changes().resource_change(&addr(), None).is_none());
    }

    #[tokio::test]
    async fn test_undecodable_object_is_read_error() {
        let ctx = context(state_with(json!("garbage"))).await;
        let diags = node(ResourceRole::PlanDestroyable)
            .execute(&ctx, WalkOperation::PlanDestroy)
            .await;
        assert!(diags.any_error(|e| matches!(e, OrchestratorError::State(StateError::ReadState { .. }))));
    }

    #[tokio::test]
    async fn test_plan_orphan_writes_delete() {
        let ctx = context(state_with(json!({"id": "1"}))).await;
        let n = node(ResourceRole::PlannableOrphan);
        assert!(!n.execute(&ctx, WalkOperation::Plan).await.has_errors());
        let change = ctx.changes().resource_change(&addr(), None).expect("change");
        assert_eq!(change.action, Action::Delete);
        assert_eq!(change.before, Some(json!({"id": "1"})));
        assert!(ctx.state().read(|s| s.current_object(&addr()).is_some()));
    }

    #[tokio::test]
    async fn test_plan_deposed() {
        let key = DeposedKey::generate();
        let mut state = state_with(json!({"id": "new"}));
        state.set_deposed(&addr(), &key, Some(ResourceInstanceObject::new(json!({"id": "old"}))), &provider());
        let ctx = context(state).await;

        let n = node(ResourceRole::PlanDeposed).with_deposed_key(key.clone());
        assert!(!n.execute(&ctx, WalkOperation::Plan).await.has_errors());
        let change = ctx.changes().resource_change(&addr(), Some(&key)).expect("change");
        assert_eq!(change.action, Action::Delete);
        assert_eq!(change.before, Some(json!({"id": "old"})));
        assert!(ctx.changes().resource_change(&addr(), None).is_none());
    }
}
