//! Configuration specification types.
//!
//! These structs map onto `halldyll.yaml`. A configuration is a tree of
//! modules; the root module is flattened into [`Config`] and child modules are
//! declared under `modules:` with the same shape.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::addrs::{
    InstanceKey, ModulePath, OutputAddr, ProviderConfigAddr, ResourceAddr, ResourceInstanceAddr,
    Target,
};
use crate::error::ConfigError;

/// The root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Body of the root module.
    #[serde(flatten)]
    pub root: ModuleConfig,
}

/// Body of one module: the root or a `modules:` entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModuleConfig {
    /// Provider configurations declared in this module.
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    /// Input variables (only meaningful in the root module).
    #[serde(default)]
    pub variables: Vec<VariableConfig>,
    /// Managed resources.
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
    /// Named outputs.
    #[serde(default)]
    pub outputs: Vec<OutputConfig>,
    /// Child module calls.
    #[serde(default)]
    pub modules: Vec<ModuleCall>,
}

/// A child module declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModuleCall {
    /// Call name; becomes the `module.<name>` path segment.
    pub name: String,
    /// Body of the child module.
    #[serde(flatten)]
    pub body: ModuleConfig,
}

/// A provider configuration block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderConfig {
    /// Provider type, e.g. `simple`.
    #[serde(rename = "type")]
    pub provider_type: String,
    /// Alias for non-default configurations.
    #[serde(default)]
    pub alias: Option<String>,
    /// Provider-specific settings passed to `configure`.
    #[serde(default)]
    pub config: BTreeMap<String, Value>,
}

impl ProviderConfig {
    /// Address of this configuration when declared in `module`.
    #[must_use]
    pub fn addr(&self, module: &ModulePath) -> ProviderConfigAddr {
        ProviderConfigAddr::new(module.clone(), self.provider_type.clone(), self.alias.clone())
    }

    /// Settings as a JSON object.
    #[must_use]
    pub fn config_value(&self) -> Value {
        Value::Object(self.config.clone().into_iter().collect())
    }
}

/// A root input variable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VariableConfig {
    /// Variable name.
    pub name: String,
    /// Value used when no input is supplied.
    #[serde(default)]
    pub default: Option<Value>,
    /// Free-form description.
    #[serde(default)]
    pub description: Option<String>,
    /// Hide the value in plan output.
    #[serde(default)]
    pub sensitive: bool,
}

/// A managed resource block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceConfig {
    /// Resource type; the prefix before the first `_` names the provider type.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Resource name, unique per type within the module.
    pub name: String,
    /// Number of instances, keyed `[0]..[n-1]`.
    #[serde(default)]
    pub count: Option<u32>,
    /// Instance keys, one instance per entry.
    #[serde(default)]
    pub for_each: Option<Vec<String>>,
    /// Explicit provider reference (`<type>` or `<type>.<alias>`).
    #[serde(default)]
    pub provider: Option<String>,
    /// Module-relative addresses this resource depends on.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Desired attributes, passed to the provider as the proposed object.
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
    /// Attribute names to redact in plan output.
    #[serde(default)]
    pub sensitive_attributes: Vec<String>,
    /// Lifecycle customizations.
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    /// Provisioners run, in order, after an instance is created.
    #[serde(default)]
    pub provisioners: Vec<ProvisionerConfig>,
}

/// A provisioner attached to a resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProvisionerConfig {
    /// Provisioner type, e.g. `local-exec`.
    #[serde(rename = "type")]
    pub type_name: String,
    /// What a failure does to the apply.
    #[serde(default)]
    pub on_failure: OnFailure,
    /// Provisioner-specific settings.
    #[serde(flatten)]
    pub settings: BTreeMap<String, Value>,
}

impl ProvisionerConfig {
    /// Settings as a single JSON object.
    #[must_use]
    pub fn settings_value(&self) -> Value {
        Value::Object(self.settings.clone().into_iter().collect())
    }
}

/// What a failed provisioner does to the apply.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OnFailure {
    /// Mark the instance tainted and fail it.
    #[default]
    Fail,
    /// Warn and keep the instance.
    Continue,
}

/// Lifecycle customizations for a resource.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LifecycleConfig {
    /// Replace by creating the new object before destroying the old one.
    #[serde(default)]
    pub create_before_destroy: bool,
    /// Refuse any plan that destroys this resource.
    #[serde(default)]
    pub prevent_destroy: bool,
}

impl ResourceConfig {
    /// Address of this resource when declared in `module`.
    #[must_use]
    pub fn addr(&self, module: &ModulePath) -> ResourceAddr {
        ResourceAddr::new(module.clone(), self.type_name.clone(), self.name.clone())
    }

    /// Instance keys produced by `count` or `for_each`.
    #[must_use]
    pub fn instance_keys(&self) -> Vec<InstanceKey> {
        if let Some(count) = self.count {
            return (0..i64::from(count)).map(InstanceKey::Int).collect();
        }
        if let Some(keys) = &self.for_each {
            return keys.iter().cloned().map(InstanceKey::Str).collect();
        }
        vec![InstanceKey::NoKey]
    }

    /// Provider configuration this resource asks for, relative to `module`.
    ///
    /// # Errors
    ///
    /// Returns an error if the explicit `provider` reference is malformed.
    pub fn provider_addr(&self, module: &ModulePath) -> Result<ProviderConfigAddr, ConfigError> {
        match &self.provider {
            Some(reference) => ProviderConfigAddr::from_local_ref(module, reference),
            None => Ok(ProviderConfigAddr::new(
                module.clone(),
                self.addr(module).implied_provider_type(),
                None,
            )),
        }
    }

    /// Parsed `depends_on` entries, made absolute against `module`.
    ///
    /// # Errors
    ///
    /// Returns an error for an entry that is not a valid address.
    pub fn dependencies(&self, module: &ModulePath) -> Result<Vec<Target>, ConfigError> {
        self.depends_on
            .iter()
            .map(|raw| raw.parse::<Target>().map(|t| t.in_module(module)))
            .collect()
    }

    /// Desired attributes as a JSON object.
    #[must_use]
    pub fn attributes_value(&self) -> Value {
        Value::Object(self.attributes.clone().into_iter().collect())
    }
}

/// A named output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputConfig {
    /// Output name.
    pub name: String,
    /// Literal value.
    #[serde(default)]
    pub value: Option<Value>,
    /// Reference to evaluate: `var.<name>`, `<type>.<name>[key].<attr>` or
    /// `module.<call>.<output>`.
    #[serde(default)]
    pub value_from: Option<String>,
    /// Hide the value in plan output.
    #[serde(default)]
    pub sensitive: bool,
    /// Extra ordering dependencies.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// Where an output takes its value from.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputSource {
    /// A literal from the configuration.
    Literal(Value),
    /// A root variable.
    Variable(String),
    /// One attribute of a resource instance.
    ResourceAttribute {
        /// Instance holding the attribute.
        instance: ResourceInstanceAddr,
        /// Top-level attribute name.
        attribute: String,
    },
    /// An output of a child module.
    ModuleOutput(OutputAddr),
}

impl OutputConfig {
    /// Resolves the value source, relative to `module`.
    ///
    /// # Errors
    ///
    /// Returns an error if both or neither of `value` and `value_from` are
    /// set, or the reference is malformed.
    pub fn source(&self, module: &ModulePath) -> Result<OutputSource, ConfigError> {
        match (&self.value, &self.value_from) {
            (Some(value), None) => Ok(OutputSource::Literal(value.clone())),
            (None, Some(reference)) => parse_output_reference(module, reference),
            _ => Err(ConfigError::validation(
                "exactly one of value and value_from must be set",
                format!("outputs.{}", self.name),
            )),
        }
    }

    /// Parsed `depends_on` entries, made absolute against `module`.
    ///
    /// # Errors
    ///
    /// Returns an error for an entry that is not a valid address.
    pub fn dependencies(&self, module: &ModulePath) -> Result<Vec<Target>, ConfigError> {
        self.depends_on
            .iter()
            .map(|raw| raw.parse::<Target>().map(|t| t.in_module(module)))
            .collect()
    }
}

fn parse_output_reference(module: &ModulePath, reference: &str) -> Result<OutputSource, ConfigError> {
    if let Some(name) = reference.strip_prefix("var.") {
        return Ok(OutputSource::Variable(name.to_string()));
    }
    if let Some(rest) = reference.strip_prefix("module.")
        && let Some((call, name)) = rest.split_once('.')
        && !name.contains('.')
    {
        return Ok(OutputSource::ModuleOutput(OutputAddr::new(module.child(call), name)));
    }
    let (instance, attribute) = reference.rsplit_once('.').ok_or_else(|| {
        ConfigError::invalid_address(reference, "expected <type>.<name>.<attribute>")
    })?;
    let mut instance: ResourceInstanceAddr = instance.parse()?;
    instance.resource.module = module.join(&instance.resource.module);
    Ok(OutputSource::ResourceAttribute {
        instance,
        attribute: attribute.to_string(),
    })
}

impl Config {
    /// Body of the module at `path`, if declared.
    #[must_use]
    pub fn module(&self, path: &ModulePath) -> Option<&ModuleConfig> {
        let mut current = &self.root;
        for name in path.segments() {
            current = &current.modules.iter().find(|m| &m.name == name)?.body;
        }
        Some(current)
    }

    /// Every module with its path, parents before children.
    #[must_use]
    pub fn modules(&self) -> Vec<(ModulePath, &ModuleConfig)> {
        let mut out = Vec::new();
        let mut stack = vec![(ModulePath::root(), &self.root)];
        while let Some((path, module)) = stack.pop() {
            for call in module.modules.iter().rev() {
                stack.push((path.child(&call.name), &call.body));
            }
            out.push((path, module));
        }
        out
    }

    /// Resource block at `addr`, if declared.
    #[must_use]
    pub fn resource(&self, addr: &ResourceAddr) -> Option<&ResourceConfig> {
        self.module(&addr.module)?
            .resources
            .iter()
            .find(|r| r.type_name == addr.type_name && r.name == addr.name)
    }

    /// Returns true if the instance is declared by the current configuration.
    #[must_use]
    pub fn declares_instance(&self, addr: &ResourceInstanceAddr) -> bool {
        self.resource(&addr.resource)
            .is_some_and(|r| r.instance_keys().contains(&addr.key))
    }

    /// Provider configuration block at `addr`, if declared.
    #[must_use]
    pub fn provider(&self, addr: &ProviderConfigAddr) -> Option<&ProviderConfig> {
        self.module(&addr.module)?
            .providers
            .iter()
            .find(|p| p.provider_type == addr.provider_type && p.alias == addr.alias)
    }

    /// Output block at `addr`, if declared.
    #[must_use]
    pub fn output(&self, addr: &OutputAddr) -> Option<&OutputConfig> {
        self.module(&addr.module)?
            .outputs
            .iter()
            .find(|o| o.name == addr.name)
    }

    /// Root variable `name`, if declared.
    #[must_use]
    pub fn variable(&self, name: &str) -> Option<&VariableConfig> {
        self.root.variables.iter().find(|v| v.name == name)
    }

    /// Every resource instance declared anywhere in the tree.
    #[must_use]
    pub fn resource_instances(&self) -> Vec<(ResourceInstanceAddr, &ResourceConfig)> {
        self.modules()
            .into_iter()
            .flat_map(|(path, module)| {
                module.resources.iter().flat_map(move |resource| {
                    let addr = resource.addr(&path);
                    resource
                        .instance_keys()
                        .into_iter()
                        .map(move |key| (addr.instance(key), resource))
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        serde_yaml::from_str(
            r#"
providers:
  - type: simple
resources:
  - type: simple_thing
    name: web
    count: 2
    depends_on: ["module.net"]
modules:
  - name: net
    resources:
      - type: simple_subnet
        name: a
        for_each: ["eu", "us"]
outputs:
  - name: web_id
    value_from: simple_thing.web[0].id
"#,
        )
        .expect("valid yaml")
    }

    #[test]
    fn test_module_lookup_and_order() {
        let config = sample();
        let paths: Vec<String> = config.modules().iter().map(|(p, _)| p.to_string()).collect();
        assert_eq!(paths, vec!["", "module.net"]);
        assert!(config.module(&ModulePath::root().child("net")).is_some());
        assert!(config.module(&ModulePath::root().child("missing")).is_none());
    }

    #[test]
    fn test_instance_expansion() {
        let config = sample();
        let instances: Vec<String> = config
            .resource_instances()
            .iter()
            .map(|(a, _)| a.to_string())
            .collect();
        assert_eq!(
            instances,
            vec![
                "simple_thing.web[0]",
                "simple_thing.web[1]",
                "module.net.simple_subnet.a[\"eu\"]",
                "module.net.simple_subnet.a[\"us\"]",
            ]
        );
    }

    #[test]
    fn test_provisioner_settings_are_flattened() {
        let resource: ResourceConfig = serde_yaml::from_str(
            r#"
type: simple_thing
name: web
provisioners:
  - type: local-exec
    command: "echo created"
    environment:
      STAGE: dev
  - type: local-exec
    on_failure: continue
    command: "exit 1"
"#,
        )
        .expect("valid yaml");
        assert_eq!(resource.provisioners.len(), 2);
        let first = &resource.provisioners[0];
        assert_eq!(first.type_name, "local-exec");
        assert_eq!(first.on_failure, OnFailure::Fail);
        assert_eq!(
            first.settings_value(),
            serde_json::json!({"command": "echo created", "environment": {"STAGE": "dev"}})
        );
        assert_eq!(resource.provisioners[1].on_failure, OnFailure::Continue);
    }

    #[test]
    fn test_dependencies_are_module_relative() {
        let config = sample();
        let web = &config.root.resources[0];
        let deps = web.dependencies(&ModulePath::root()).expect("valid depends_on");
        assert_eq!(deps, vec![Target::Module(ModulePath::root().child("net"))]);
    }

    #[test]
    fn test_output_sources() {
        let config = sample();
        let source = config.root.outputs[0]
            .source(&ModulePath::root())
            .expect("valid source");
        match source {
            OutputSource::ResourceAttribute { instance, attribute } => {
                assert_eq!(instance.to_string(), "simple_thing.web[0]");
                assert_eq!(attribute, "id");
            }
            other => panic!("unexpected source {other:?}"),
        }

        let output = OutputConfig {
            name: "child".to_string(),
            value: None,
            value_from: Some("module.net.subnet_ids".to_string()),
            sensitive: false,
            depends_on: Vec::new(),
        };
        assert_eq!(
            output.source(&ModulePath::root()).expect("valid"),
            OutputSource::ModuleOutput(OutputAddr::new(ModulePath::root().child("net"), "subnet_ids"))
        );
    }

    #[test]
    fn test_implied_and_explicit_provider() {
        let mut resource = sample().root.resources[0].clone();
        let module = ModulePath::root();
        assert_eq!(resource.provider_addr(&module).expect("valid").to_string(), "provider.simple");
        resource.provider = Some("simple.west".to_string());
        assert_eq!(
            resource.provider_addr(&module).expect("valid").to_string(),
            "provider.simple.west"
        );
    }
}
