//! The built-in `simple` provider.
//!
//! Objects exist only as the attributes recorded in state: create assigns a
//! generated `id`, update keeps it, delete forgets the object. A resource may
//! list attribute names under `force_new` to make changes to them replace the
//! object, and may set `fail_apply: true` to make apply fail.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::error::ProviderError;
use crate::plans::AttributePath;

use super::{ApplyRequest, PlanRequest, PlannedChange, ProviderResult, ResourceProvider};

/// Attribute that lists replace-forcing attribute names.
const FORCE_NEW: &str = "force_new";

/// Attribute that makes apply fail on purpose.
const FAIL_APPLY: &str = "fail_apply";

/// In-process provider with no remote side.
#[derive(Debug, Default)]
pub struct SimpleProvider {
    id_prefix: Mutex<Option<String>>,
}

impl SimpleProvider {
    /// Provider type name.
    pub const TYPE: &'static str = "simple";

    /// Creates an unconfigured provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn prefix(&self) -> ProviderResult<String> {
        self.id_prefix
            .lock()
            .clone()
            .ok_or_else(|| ProviderError::NotConfigured {
                provider: Self::TYPE.to_string(),
            })
    }

    fn error(message: impl Into<String>) -> ProviderError {
        ProviderError::reported(Self::TYPE, message)
    }
}

fn as_object<'a>(value: &'a Value, what: &str) -> ProviderResult<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| SimpleProvider::error(format!("{what} must be an object")))
}

fn force_new_names(object: &Map<String, Value>) -> Vec<String> {
    object
        .get(FORCE_NEW)
        .and_then(Value::as_array)
        .map(|names| {
            names
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl ResourceProvider for SimpleProvider {
    async fn validate_provider_config(&self, config: &Value) -> ProviderResult<()> {
        if config.is_null() {
            return Ok(());
        }
        let config = as_object(config, "provider configuration")?;
        match config.get("id_prefix") {
            None | Some(Value::String(_)) => Ok(()),
            Some(_) => Err(Self::error("id_prefix must be a string")),
        }
    }

    async fn configure(&self, config: &Value) -> ProviderResult<()> {
        self.validate_provider_config(config).await?;
        let prefix = config
            .get("id_prefix")
            .and_then(Value::as_str)
            .unwrap_or(Self::TYPE)
            .to_string();
        debug!("Configured simple provider with id prefix {prefix}");
        *self.id_prefix.lock() = Some(prefix);
        Ok(())
    }

    async fn validate_resource_config(&self, type_name: &str, config: &Value) -> ProviderResult<()> {
        let object = as_object(config, &format!("{type_name} attributes"))?;
        if object.contains_key("id") {
            return Err(Self::error(format!("{type_name}: id is computed and cannot be set")));
        }
        if let Some(force_new) = object.get(FORCE_NEW) {
            let valid = force_new
                .as_array()
                .is_some_and(|names| names.iter().all(Value::is_string));
            if !valid {
                return Err(Self::error(format!(
                    "{type_name}: {FORCE_NEW} must be a list of attribute names"
                )));
            }
        }
        Ok(())
    }

    async fn read_resource(&self, _type_name: &str, prior: &Value) -> ProviderResult<Option<Value>> {
        self.prefix()?;
        Ok(Some(prior.clone()))
    }

    async fn plan_resource_change(&self, request: PlanRequest) -> ProviderResult<PlannedChange> {
        self.prefix()?;
        let Some(proposed) = request.proposed else {
            return Ok(PlannedChange::default());
        };
        let mut planned = as_object(&proposed, "proposed object")?.clone();

        let Some(prior) = request.prior else {
            planned.insert(String::from("id"), Value::Null);
            return Ok(PlannedChange {
                planned: Some(Value::Object(planned)),
                unknown: vec![vec![String::from("id")]],
                requires_replace: Vec::new(),
            });
        };
        let prior = as_object(&prior, "prior object")?;

        let requires_replace: Vec<AttributePath> = force_new_names(&planned)
            .into_iter()
            .filter(|name| planned.get(name) != prior.get(name))
            .map(|name| vec![name])
            .collect();

        let mut unknown = Vec::new();
        if requires_replace.is_empty() {
            planned.insert(
                String::from("id"),
                prior.get("id").cloned().unwrap_or(Value::Null),
            );
        } else {
            planned.insert(String::from("id"), Value::Null);
            unknown.push(vec![String::from("id")]);
        }

        Ok(PlannedChange {
            planned: Some(Value::Object(planned)),
            unknown,
            requires_replace,
        })
    }

    async fn apply_resource_change(&self, request: ApplyRequest) -> ProviderResult<Option<Value>> {
        let prefix = self.prefix()?;
        let Some(planned) = request.planned else {
            debug!("Deleted {} object", request.type_name);
            return Ok(None);
        };
        let mut object = as_object(&planned, "planned object")?.clone();

        if object.get(FAIL_APPLY) == Some(&Value::Bool(true)) {
            return Err(Self::error(format!(
                "{}: apply failed because {FAIL_APPLY} is set",
                request.type_name
            )));
        }

        if object.get("id").is_none_or(Value::is_null) {
            let suffix = &Uuid::new_v4().simple().to_string()[..12];
            object.insert(String::from("id"), Value::String(format!("{prefix}-{suffix}")));
        }
        Ok(Some(Value::Object(object)))
    }

    async fn close(&self) -> ProviderResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn configured() -> SimpleProvider {
        let provider = SimpleProvider::new();
        provider
            .configure(&json!({"id_prefix": "t"}))
            .await
            .expect("configure");
        provider
    }

    #[tokio::test]
    async fn test_requires_configure() {
        let provider = SimpleProvider::new();
        let result = provider.read_resource("simple_thing", &json!({})).await;
        assert!(matches!(result, Err(ProviderError::NotConfigured { .. })));
    }

    #[tokio::test]
    async fn test_plan_create_marks_id_unknown() {
        let provider = configured().await;
        let planned = provider
            .plan_resource_change(PlanRequest {
                type_name: String::from("simple_thing"),
                prior: None,
                proposed: Some(json!({"size": 1})),
            })
            .await
            .expect("plan");
        assert_eq!(planned.planned, Some(json!({"size": 1, "id": null})));
        assert_eq!(planned.unknown, vec![vec![String::from("id")]]);
    }

    #[tokio::test]
    async fn test_plan_update_keeps_id() {
        let provider = configured().await;
        let planned = provider
            .plan_resource_change(PlanRequest {
                type_name: String::from("simple_thing"),
                prior: Some(json!({"id": "t-1", "size": 1})),
                proposed: Some(json!({"size": 2})),
            })
            .await
            .expect("plan");
        assert_eq!(planned.planned, Some(json!({"id": "t-1", "size": 2})));
        assert!(planned.requires_replace.is_empty());
    }

    #[tokio::test]
    async fn test_plan_force_new_requires_replace() {
        let provider = configured().await;
        let planned = provider
            .plan_resource_change(PlanRequest {
                type_name: String::from("simple_thing"),
                prior: Some(json!({"id": "t-1", "zone": "a", "force_new": ["zone"]})),
                proposed: Some(json!({"zone": "b", "force_new": ["zone"]})),
            })
            .await
            .expect("plan");
        assert_eq!(planned.requires_replace, vec![vec![String::from("zone")]]);
        assert_eq!(planned.unknown, vec![vec![String::from("id")]]);
    }

    #[tokio::test]
    async fn test_apply_generates_id_and_can_fail() {
        let provider = configured().await;
        let created = provider
            .apply_resource_change(ApplyRequest {
                type_name: String::from("simple_thing"),
                prior: None,
                planned: Some(json!({"id": null, "size": 1})),
            })
            .await
            .expect("apply")
            .expect("object");
        let id = created["id"].as_str().expect("id set");
        assert!(id.starts_with("t-"));

        let failed = provider
            .apply_resource_change(ApplyRequest {
                type_name: String::from("simple_thing"),
                prior: None,
                planned: Some(json!({"fail_apply": true})),
            })
            .await;
        assert!(matches!(failed, Err(ProviderError::Reported { .. })));
    }

    #[tokio::test]
    async fn test_validate_resource_config() {
        let provider = SimpleProvider::new();
        assert!(provider.validate_resource_config("simple_thing", &json!({"a": 1})).await.is_ok());
        assert!(provider.validate_resource_config("simple_thing", &json!({"id": "x"})).await.is_err());
        assert!(provider
            .validate_resource_config("simple_thing", &json!({"force_new": "zone"}))
            .await
            .is_err());
        assert!(provider.validate_resource_config("simple_thing", &json!([1])).await.is_err());
    }
}
