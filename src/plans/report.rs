//! Machine-readable change report.
//!
//! Unknown and sensitive attributes are reported as a mirror of the object in
//! which each marked leaf is `true` and every known leaf is omitted, so that
//! consumers can walk `after` and `after_unknown` side by side.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::addrs::InstanceKey;
use crate::error::{OrchestratorError, Result};

use super::changes::{AttributePath, ChangeSummary, OutputChange, ResourceInstanceChange};
use super::plan::{Plan, PlanMode};

/// Version of the report format.
pub const FORMAT_VERSION: &str = "1.0";

/// Top-level report.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeReport {
    /// Report format version.
    pub format_version: &'static str,
    /// Mode of the plan.
    pub plan_mode: PlanMode,
    /// One entry per resource instance object.
    pub resource_changes: Vec<ResourceChangeReport>,
    /// Output changes keyed by output address.
    pub output_changes: BTreeMap<String, ChangeRepresentation>,
    /// Change counts.
    pub summary: ChangeSummary,
}

/// Report entry for one resource instance object.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceChangeReport {
    /// Full instance address.
    pub address: String,
    /// Module address, absent for the root module.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_address: Option<String>,
    /// Resource type.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Resource name.
    pub name: String,
    /// Instance key as a JSON number or string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<Value>,
    /// Deposed key, for changes to deposed objects.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deposed: Option<String>,
    /// Provider configuration address.
    pub provider_name: String,
    /// The change itself.
    pub change: ChangeRepresentation,
}

/// Before/after view of one change.
#[derive(Debug, Clone, Serialize)]
pub struct ChangeRepresentation {
    /// Primitive actions in execution order.
    pub actions: Vec<&'static str>,
    /// Value before the change, `null` when absent.
    pub before: Value,
    /// Value after the change, `null` when absent.
    pub after: Value,
    /// Marks for values only known after apply.
    pub after_unknown: Value,
    /// Marks for sensitive values in `before`.
    pub before_sensitive: Value,
    /// Marks for sensitive values in `after`.
    pub after_sensitive: Value,
}

impl ChangeReport {
    /// Builds the report for a plan.
    #[must_use]
    pub fn from_plan(plan: &Plan) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            plan_mode: plan.mode,
            resource_changes: plan
                .changes
                .resources
                .iter()
                .map(ResourceChangeReport::from_change)
                .collect(),
            output_changes: plan
                .changes
                .outputs
                .iter()
                .map(|c| (c.addr.to_string(), ChangeRepresentation::from_output(c)))
                .collect(),
            summary: plan.summary(),
        }
    }

    /// Serializes the report as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| OrchestratorError::internal(format!("Failed to render change report: {e}")))
    }
}

impl ResourceChangeReport {
    fn from_change(change: &ResourceInstanceChange) -> Self {
        let resource = &change.addr.resource;
        Self {
            address: change.addr.to_string(),
            module_address: (!resource.module.is_root()).then(|| resource.module.to_string()),
            type_name: resource.type_name.clone(),
            name: resource.name.clone(),
            index: match &change.addr.key {
                InstanceKey::NoKey => None,
                InstanceKey::Int(i) => Some(Value::from(*i)),
                InstanceKey::Str(s) => Some(Value::from(s.as_str())),
            },
            deposed: change.deposed_key.as_ref().map(ToString::to_string),
            provider_name: change.provider.to_string(),
            change: ChangeRepresentation {
                actions: change.action.primitives().to_vec(),
                before: change.before.clone().unwrap_or(Value::Null),
                after: change.after.clone().unwrap_or(Value::Null),
                after_unknown: mark_paths(change.after.as_ref(), &change.after_unknown),
                before_sensitive: mark_paths(change.before.as_ref(), &change.sensitive),
                after_sensitive: mark_paths(change.after.as_ref(), &change.sensitive),
            },
        }
    }
}

impl ChangeRepresentation {
    fn from_output(change: &OutputChange) -> Self {
        let sensitive = Value::Bool(change.sensitive);
        Self {
            actions: change.action.primitives().to_vec(),
            before: change.before.clone().unwrap_or(Value::Null),
            after: change.after.clone().unwrap_or(Value::Null),
            after_unknown: Value::Bool(false),
            before_sensitive: sensitive.clone(),
            after_sensitive: sensitive,
        }
    }
}

/// Builds the mark tree for `value`: `true` at every path in `paths`, known
/// leaves omitted, containers kept so the shape mirrors `value`.
#[must_use]
pub fn mark_paths(value: Option<&Value>, paths: &[AttributePath]) -> Value {
    if paths.iter().any(Vec::is_empty) {
        return Value::Bool(true);
    }
    let mut tree = value
        .and_then(skeleton)
        .unwrap_or_else(|| if paths.is_empty() { Value::Bool(false) } else { Value::Object(Map::new()) });
    for path in paths {
        insert_mark(&mut tree, path);
    }
    tree
}

fn skeleton(value: &Value) -> Option<Value> {
    match value {
        Value::Object(map) => Some(Value::Object(
            map.iter()
                .filter_map(|(k, v)| skeleton(v).map(|s| (k.clone(), s)))
                .collect(),
        )),
        Value::Array(items) => Some(Value::Array(
            items
                .iter()
                .map(|v| skeleton(v).unwrap_or(Value::Bool(false)))
                .collect(),
        )),
        _ => None,
    }
}

fn insert_mark(tree: &mut Value, path: &[String]) {
    let Some((head, rest)) = path.split_first() else {
        *tree = Value::Bool(true);
        return;
    };
    // Paths that do not fit an array are dropped.
    if let Value::Array(items) = tree {
        if let Some(item) = head.parse::<usize>().ok().and_then(|i| items.get_mut(i)) {
            insert_mark(item, rest);
        }
        return;
    }
    if !tree.is_object() {
        *tree = Value::Object(Map::new());
    }
    if let Value::Object(map) = tree {
        let child = map
            .entry(head.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        insert_mark(child, rest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addrs::ProviderConfigAddr;
    use crate::plans::{Action, Changes};
    use crate::state::State;
    use chrono::Utc;
    use serde_json::json;

    fn path(segments: &[&str]) -> AttributePath {
        segments.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_mark_paths_omits_known_leaves() {
        let after = json!({"id": null, "size": 3, "tags": {"env": "prod"}, "ports": [80, 443]});
        let marks = mark_paths(Some(&after), &[path(&["id"]), path(&["ports", "1"])]);
        assert_eq!(marks, json!({"id": true, "tags": {}, "ports": [false, true]}));
    }

    #[test]
    fn test_mark_paths_missing_attribute_is_added() {
        let after = json!({"size": 3});
        let marks = mark_paths(Some(&after), &[path(&["meta", "arn"])]);
        assert_eq!(marks, json!({"meta": {"arn": true}}));
    }

    #[test]
    fn test_mark_paths_ignores_out_of_range_index() {
        let after = json!({"ports": [80, 443]});
        let marks = mark_paths(Some(&after), &[path(&["ports", "5"]), path(&["ports", "name"])]);
        assert_eq!(marks, json!({"ports": [false, false]}));
    }

    #[test]
    fn test_mark_paths_without_value() {
        assert_eq!(mark_paths(None, &[]), json!(false));
        assert_eq!(mark_paths(None, &[path(&[])]), json!(true));
    }

    #[test]
    fn test_report_for_create() {
        let mut changes = Changes::new();
        changes.put_resource_change(ResourceInstanceChange {
            action: Action::Create,
            after: Some(json!({"id": null, "password": "hunter2"})),
            after_unknown: vec![path(&["id"])],
            sensitive: vec![path(&["password"])],
            ..ResourceInstanceChange::noop(
                "module.db.simple_db.main[0]".parse().expect("valid address"),
                None,
                ProviderConfigAddr::root("simple"),
            )
        });
        let plan = Plan {
            mode: PlanMode::Normal,
            variable_values: BTreeMap::new(),
            changes,
            targets: Vec::new(),
            excludes: Vec::new(),
            prior_state: State::new(),
            config_hash: String::new(),
            state_origin: None,
            created_at: Utc::now(),
        };

        let report = ChangeReport::from_plan(&plan);
        let json: Value = serde_json::from_str(&report.to_json().expect("render")).expect("json");
        let entry = &json["resource_changes"][0];
        assert_eq!(entry["address"], "module.db.simple_db.main[0]");
        assert_eq!(entry["module_address"], "module.db");
        assert_eq!(entry["index"], 0);
        assert_eq!(entry["change"]["actions"], json!(["create"]));
        assert_eq!(entry["change"]["before"], Value::Null);
        assert_eq!(entry["change"]["after_unknown"], json!({"id": true}));
        assert_eq!(entry["change"]["after_sensitive"], json!({"password": true}));
        assert_eq!(entry["change"]["before_sensitive"], json!({"password": true}));
        assert_eq!(json["summary"]["add"], 1);
    }
}
