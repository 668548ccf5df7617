//! Planning a configured resource instance.

use serde_json::Value;
use tracing::debug;

use crate::error::{OrchestratorError, PlanError, Result};
use crate::graph::context::EvalContext;
use crate::plans::{Action, ResourceInstanceChange};
use crate::provider::{PlanRequest, PlannedChange, with_retry};
use crate::state::{ObjectStatus, ResourceInstanceObject};

use super::resource::ResourceInstanceNode;

impl ResourceInstanceNode {
    /// Validates the configured attributes with an unconfigured provider,
    /// then the settings of each provisioner.
    pub(super) async fn validate(&self, ctx: &EvalContext) -> Result<()> {
        let config = self.require_config()?;
        let provider_type = config.provider_addr(self.addr.module())?.provider_type;
        let provider = ctx.validation_provider(&provider_type)?;
        provider
            .validate_resource_config(&config.type_name, &config.attributes_value())
            .await?;
        for provisioner in &config.provisioners {
            ctx.provisioner(&provisioner.type_name)?
                .validate_provisioner_config(&provisioner.settings_value())
                .await?;
        }
        Ok(())
    }

    /// Refreshes the current object, asks the provider for a plan and
    /// records the resulting change.
    pub(super) async fn plan(&self, ctx: &EvalContext) -> Result<()> {
        let config = self.require_config()?;
        let provider_addr = self.provider_addr()?.clone();
        let provider = self.provider(ctx)?;

        let mut prior = self.read_object(ctx)?;
        if ctx.refresh()
            && let Some(object) = prior.take()
        {
            prior = self.refresh(ctx, object).await?;
        }

        let provider = provider.as_ref();
        let proposed = config.attributes_value();
        let request = PlanRequest {
            type_name: config.type_name.clone(),
            prior: prior.as_ref().map(|o| o.attributes.clone()),
            proposed: Some(proposed.clone()),
        };
        let operation = format!("plan {}", self.addr);
        let mut planned = with_retry(&operation, move || {
            provider.plan_resource_change(request.clone())
        })
        .await?;
        let after = self.planned_object(&planned)?;

        let action = match &prior {
            None => Action::Create,
            Some(object)
                if object.status == ObjectStatus::Tainted || !planned.requires_replace.is_empty() =>
            {
                if self.create_before_destroy() {
                    Action::CreateThenDelete
                } else {
                    Action::DeleteThenCreate
                }
            }
            Some(object) if object.attributes == after => Action::NoOp,
            Some(_) => Action::Update,
        };

        let mut after = after;
        if action.is_replace() {
            self.check_prevent_destroy()?;
            // The new object is planned as a fresh create.
            let requires_replace = std::mem::take(&mut planned.requires_replace);
            let request = PlanRequest {
                type_name: config.type_name.clone(),
                prior: None,
                proposed: Some(proposed),
            };
            planned = with_retry(&operation, move || {
                provider.plan_resource_change(request.clone())
            })
            .await?;
            planned.requires_replace = requires_replace;
            after = self.planned_object(&planned)?;
        }

        debug!("Planned {} for {}", action, self.addr);
        ctx.changes().put_resource_change(ResourceInstanceChange {
            addr: self.addr.clone(),
            deposed_key: None,
            provider: provider_addr,
            action,
            before: prior.map(|o| o.attributes),
            after: Some(after),
            after_unknown: planned.unknown,
            sensitive: self.sensitive_paths(),
            requires_replace: planned.requires_replace,
        });
        Ok(())
    }

    /// Reads the remote object and records the result in state. Returns the
    /// refreshed object, or `None` if it no longer exists.
    pub(super) async fn refresh(
        &self,
        ctx: &EvalContext,
        object: ResourceInstanceObject,
    ) -> Result<Option<ResourceInstanceObject>> {
        let provider_addr = self.provider_addr()?.clone();
        let provider = self.provider(ctx)?;
        let provider = provider.as_ref();
        let type_name = self.addr.resource.type_name.as_str();
        let attributes = &object.attributes;
        let refreshed = with_retry(&format!("read {}", self.addr), move || {
            provider.read_resource(type_name, attributes)
        })
        .await?;

        let refreshed = refreshed.map(|attributes| ResourceInstanceObject {
            attributes,
            ..object
        });
        if refreshed.is_none() {
            debug!("{} no longer exists, removing it from state", self.addr);
        }
        let stored = refreshed.clone();
        ctx.state().write(|s| match &self.deposed_key {
            Some(key) => s.set_deposed(&self.addr, key, stored, &provider_addr),
            None => s.set_current(&self.addr, stored, &provider_addr),
        });
        Ok(refreshed)
    }

    fn require_config(&self) -> Result<&crate::config::ResourceConfig> {
        self.config.as_deref().ok_or_else(|| {
            OrchestratorError::internal(format!("{} has no configuration attached", self.addr))
        })
    }

    fn planned_object(&self, planned: &PlannedChange) -> Result<Value> {
        match &planned.planned {
            Some(value @ Value::Object(_)) => Ok(value.clone()),
            Some(_) => Err(PlanError::InvalidPlan {
                addr: self.addr.to_string(),
                message: String::from("planned object is not an object"),
            }
            .into()),
            None => Err(PlanError::InvalidPlan {
                addr: self.addr.to_string(),
                message: String::from("provider planned to destroy a configured instance"),
            }
            .into()),
        }
    }
}
