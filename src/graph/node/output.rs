//! Output vertices.

use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::addrs::{OutputAddr, ResourceInstanceAddr};
use crate::config::{OutputConfig, OutputSource};
use crate::diagnostics::Diagnostics;
use crate::error::{PlanError, Result};
use crate::graph::context::EvalContext;
use crate::plans::{Action, OutputChange};
use crate::state::OutputValue;

use super::WalkOperation;

/// Evaluates a module output, or removes it when destroying.
#[derive(Debug, Clone)]
pub struct OutputNode {
    /// Output address.
    pub addr: OutputAddr,
    /// Declared block; absent for outputs only found in state.
    pub config: Option<Arc<OutputConfig>>,
    /// Remove the output instead of evaluating it.
    pub destroy: bool,
}

impl OutputNode {
    /// Graph key.
    #[must_use]
    pub fn key(&self) -> String {
        if self.destroy {
            format!("{} (destroy)", self.addr)
        } else {
            self.addr.to_string()
        }
    }

    /// Where the value comes from, if configured and well-formed.
    #[must_use]
    pub fn source(&self) -> Option<OutputSource> {
        self.config
            .as_ref()
            .and_then(|c| c.source(&self.addr.module).ok())
    }

    fn sensitive(&self) -> bool {
        self.config.as_ref().is_some_and(|c| c.sensitive)
    }

    pub(super) fn execute(&self, ctx: &EvalContext, op: WalkOperation) -> Diagnostics {
        let result = match (self.destroy, op) {
            (_, WalkOperation::Validate) => self.validate(),
            (true, WalkOperation::Apply) => {
                ctx.state().write(|s| s.set_output(&self.addr, None));
                Ok(())
            }
            (true, _) => {
                self.plan_removal(ctx);
                Ok(())
            }
            (false, WalkOperation::Apply) => self.apply(ctx),
            (false, _) => self.plan(ctx),
        };
        match result {
            Ok(()) => Diagnostics::new(),
            Err(err) => err.into(),
        }
    }

    fn validate(&self) -> Result<()> {
        if let Some(config) = &self.config {
            config.source(&self.addr.module)?;
        }
        Ok(())
    }

    fn plan(&self, ctx: &EvalContext) -> Result<()> {
        let after = self.evaluate(ctx, true)?;
        ctx.set_output_value(self.addr.clone(), after.clone());

        let before = ctx
            .state()
            .read(|s| s.output(&self.addr).map(|o| o.value.clone()));
        let action = match (&before, &after) {
            (None, _) => Action::Create,
            (Some(b), Some(a)) if b == a => Action::NoOp,
            _ => Action::Update,
        };
        ctx.changes().put_output_change(OutputChange {
            addr: self.addr.clone(),
            action,
            before,
            after,
            sensitive: self.sensitive(),
        });
        Ok(())
    }

    fn plan_removal(&self, ctx: &EvalContext) {
        let before = ctx
            .state()
            .read(|s| s.output(&self.addr).map(|o| o.value.clone()));
        if let Some(before) = before {
            ctx.changes().put_output_change(OutputChange {
                addr: self.addr.clone(),
                action: Action::Delete,
                before: Some(before),
                after: None,
                sensitive: self.sensitive(),
            });
        }
    }

    fn apply(&self, ctx: &EvalContext) -> Result<()> {
        let Some(value) = self.evaluate(ctx, false)? else {
            return Err(self.error("value is still unknown after apply"));
        };
        ctx.set_output_value(self.addr.clone(), Some(value.clone()));
        debug!("Recorded {}", self.addr);
        ctx.state().write(|s| {
            s.set_output(
                &self.addr,
                Some(OutputValue {
                    value,
                    sensitive: self.sensitive(),
                }),
            );
        });
        Ok(())
    }

    /// Computes the value. When `planning`, attributes that are only known
    /// after apply evaluate to `None`.
    fn evaluate(&self, ctx: &EvalContext, planning: bool) -> Result<Option<Value>> {
        let Some(config) = &self.config else {
            return Err(self.error("output is not configured"));
        };
        match config.source(&self.addr.module)? {
            OutputSource::Literal(value) => Ok(Some(value)),
            OutputSource::Variable(name) => ctx
                .variable(&name)
                .map(Some)
                .ok_or_else(|| self.error(format!("variable \"{name}\" has no value"))),
            OutputSource::ResourceAttribute { instance, attribute } => {
                self.resource_attribute(ctx, &instance, &attribute, planning)
            }
            OutputSource::ModuleOutput(addr) => match ctx.output_value(&addr) {
                Some(value) => Ok(value),
                None => ctx
                    .state()
                    .read(|s| s.output(&addr).map(|o| Some(o.value.clone())))
                    .ok_or_else(|| self.error(format!("{addr} has no value"))),
            },
        }
    }

    fn resource_attribute(
        &self,
        ctx: &EvalContext,
        instance: &ResourceInstanceAddr,
        attribute: &str,
        planning: bool,
    ) -> Result<Option<Value>> {
        if planning && let Some(change) = ctx.changes().resource_change(instance, None) {
            if change
                .after_unknown
                .iter()
                .any(|path| path.first().map(String::as_str) == Some(attribute))
            {
                return Ok(None);
            }
            if let Some(after) = &change.after {
                return Ok(Some(after.get(attribute).cloned().unwrap_or(Value::Null)));
            }
        }
        let object = ctx.state().read(|s| s.current_object(instance).cloned());
        let Some(object) = object else {
            return Err(self.error(format!("{instance} has no current object")));
        };
        Ok(Some(object.attribute(attribute).cloned().unwrap_or(Value::Null)))
    }

    fn error(&self, message: impl Into<String>) -> crate::error::OrchestratorError {
        PlanError::OutputEvaluation {
            addr: self.addr.to_string(),
            message: message.into(),
        }
        .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addrs::{ModulePath, ProviderConfigAddr};
    use crate::config::Config;
    use crate::plans::{Changes, ResourceInstanceChange};
    use crate::provider::ProviderFactory;
    use crate::state::{ResourceInstanceObject, State};
    use serde_json::json;

    fn output(value_from: &str) -> OutputNode {
        OutputNode {
            addr: OutputAddr::new(ModulePath::root(), "id"),
            config: Some(Arc::new(OutputConfig {
                name: String::from("id"),
                value: None,
                value_from: Some(value_from.to_string()),
                sensitive: false,
                depends_on: Vec::new(),
            })),
            destroy: false,
        }
    }

    fn context() -> EvalContext {
        EvalContext::new(Arc::new(Config::default()), Arc::new(ProviderFactory::builtin()))
    }

    #[test]
    fn test_plan_unknown_attribute() {
        let mut changes = Changes::new();
        changes.put_resource_change(ResourceInstanceChange {
            action: Action::Create,
            after: Some(json!({"id": null})),
            after_unknown: vec![vec![String::from("id")]],
            ..ResourceInstanceChange::noop(
                "simple_thing.a".parse().expect("addr"),
                None,
                ProviderConfigAddr::root("simple"),
            )
        });
        let ctx = context().with_changes(changes);
        let node = output("simple_thing.a.id");
        assert!(!node.execute(&ctx, WalkOperation::Plan).has_errors());

        let change = ctx.changes().snapshot().outputs.remove(0);
        assert_eq!(change.action, Action::Create);
        assert_eq!(change.after, None);
    }

    #[test]
    fn test_apply_records_in_state() {
        let mut state = State::new();
        state.set_current(
            &"simple_thing.a".parse().expect("addr"),
            Some(ResourceInstanceObject::new(json!({"id": "simple-1"}))),
            &ProviderConfigAddr::root("simple"),
        );
        let ctx = context().with_state(state);
        let node = output("simple_thing.a.id");
        assert!(!node.execute(&ctx, WalkOperation::Apply).has_errors());
        let recorded = ctx.state().read(|s| s.output(&node.addr).cloned()).expect("output");
        assert_eq!(recorded.value, json!("simple-1"));
    }

    #[test]
    fn test_missing_variable_is_error() {
        let ctx = context();
        let diags = output("var.region").execute(&ctx, WalkOperation::Apply);
        assert!(diags.has_errors());
    }

    #[test]
    fn test_destroy_removes_output() {
        let mut state = State::new();
        let addr = OutputAddr::new(ModulePath::root(), "id");
        state.set_output(&addr, Some(OutputValue { value: json!("x"), sensitive: false }));
        let ctx = context().with_state(state);
        let mut node = output("var.unused");
        node.destroy = true;

        node.execute(&ctx, WalkOperation::PlanDestroy);
        assert_eq!(ctx.changes().snapshot().outputs[0].action, Action::Delete);
        node.execute(&ctx, WalkOperation::Apply);
        assert!(ctx.state().snapshot().is_empty());
    }
}
