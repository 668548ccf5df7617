//! Configuration validation.
//!
//! Structural checks that need no provider: names, duplicates, references
//! between blocks and `count`/`for_each` exclusivity. Provider-specific checks
//! run later as part of the validate walk.

use crate::addrs::{is_identifier, ModulePath, OutputAddr, ProviderConfigAddr, Target};
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::ConfigError;
use std::collections::HashSet;
use tracing::debug;

use super::spec::{Config, ModuleConfig, OutputConfig, OutputSource, ResourceConfig};

/// Validator for orchestrator configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a configuration, collecting every problem found.
    #[must_use]
    pub fn validate(&self, config: &Config) -> ValidationResult {
        let mut result = ValidationResult::default();

        for (path, module) in config.modules() {
            Self::validate_module_calls(&path, module, &mut result);
            Self::validate_providers(&path, module, &mut result);
            Self::validate_variables(&path, module, &mut result);
            for resource in &module.resources {
                Self::validate_resource(config, &path, resource, &mut result);
            }
            Self::check_duplicates(
                &path,
                "resource",
                module.resources.iter().map(|r| format!("{}.{}", r.type_name, r.name)),
                &mut result,
            );
            for output in &module.outputs {
                Self::validate_output(config, &path, output, &mut result);
            }
            Self::check_duplicates(
                &path,
                "output",
                module.outputs.iter().map(|o| o.name.clone()),
                &mut result,
            );
        }

        if config.resource_instances().is_empty() {
            result
                .warnings
                .push(String::from("Configuration declares no resource instances"));
        }

        if result.errors.is_empty() {
            debug!("Configuration validation passed");
        } else {
            debug!("Configuration validation found {} errors", result.errors.len());
        }
        result
    }

    fn validate_module_calls(path: &ModulePath, module: &ModuleConfig, result: &mut ValidationResult) {
        for call in &module.modules {
            if !is_identifier(&call.name) {
                result.error(field(path, &format!("modules.{}", call.name)), format!(
                    "Module name '{}' is invalid. Must start with a letter or underscore.",
                    call.name
                ));
            }
        }
        Self::check_duplicates(path, "module", module.modules.iter().map(|m| m.name.clone()), result);
    }

    fn validate_providers(path: &ModulePath, module: &ModuleConfig, result: &mut ValidationResult) {
        for provider in &module.providers {
            let name = provider.addr(path).local_ref();
            if !is_identifier(&provider.provider_type)
                || provider.alias.as_deref().is_some_and(|a| !is_identifier(a))
            {
                result.error(
                    field(path, &format!("providers.{name}")),
                    format!("Provider '{name}' has an invalid type or alias"),
                );
            }
        }
        Self::check_duplicates(
            path,
            "provider",
            module.providers.iter().map(|p| p.addr(path).local_ref()),
            result,
        );
    }

    fn validate_variables(path: &ModulePath, module: &ModuleConfig, result: &mut ValidationResult) {
        if !path.is_root() && !module.variables.is_empty() {
            result.warnings.push(format!(
                "{path}: variables are only read from the root module and will be ignored"
            ));
        }
        for variable in &module.variables {
            if !is_identifier(&variable.name) {
                result.error(
                    field(path, &format!("variables.{}", variable.name)),
                    format!("Variable name '{}' is invalid", variable.name),
                );
            }
        }
        Self::check_duplicates(
            path,
            "variable",
            module.variables.iter().map(|v| v.name.clone()),
            result,
        );
    }

    fn validate_resource(
        config: &Config,
        path: &ModulePath,
        resource: &ResourceConfig,
        result: &mut ValidationResult,
    ) {
        let local = format!("{}.{}", resource.type_name, resource.name);
        let at = field(path, &format!("resources.{local}"));

        if let Err(e) = local.parse::<crate::addrs::ResourceAddr>() {
            result.error(at.clone(), e.to_string());
            return;
        }
        let addr = resource.addr(path);

        if resource.count.is_some() && resource.for_each.is_some() {
            result.error(at.clone(), "count and for_each cannot be used together");
        }
        if let Some(keys) = &resource.for_each {
            let mut seen = HashSet::new();
            for key in keys {
                if !seen.insert(key) {
                    result.error(at.clone(), format!("for_each key \"{key}\" is repeated"));
                }
            }
        }

        match resource.provider_addr(path) {
            Ok(provider) if resource.provider.is_some() => {
                if !provider_declared(config, &provider) {
                    result.error(
                        at.clone(),
                        ConfigError::UnknownReference {
                            from: addr.to_string(),
                            reference: provider.to_string(),
                        }
                        .to_string(),
                    );
                }
            }
            Ok(_) => {}
            Err(e) => result.error(at.clone(), e.to_string()),
        }

        match resource.dependencies(path) {
            Ok(targets) => {
                for target in targets {
                    if target == Target::Resource(addr.clone()) {
                        result.error(at.clone(), format!("{addr} cannot depend on itself"));
                    } else if !target_declared(config, &target) {
                        result.error(
                            at.clone(),
                            ConfigError::UnknownReference {
                                from: addr.to_string(),
                                reference: target.to_string(),
                            }
                            .to_string(),
                        );
                    }
                }
            }
            Err(e) => result.error(at.clone(), e.to_string()),
        }

        for name in &resource.sensitive_attributes {
            if !resource.attributes.contains_key(name) {
                result.warnings.push(format!(
                    "{addr}: sensitive attribute '{name}' is not set in attributes"
                ));
            }
        }
    }

    fn validate_output(
        config: &Config,
        path: &ModulePath,
        output: &OutputConfig,
        result: &mut ValidationResult,
    ) {
        let addr = OutputAddr::new(path.clone(), output.name.clone());
        let at = field(path, &format!("outputs.{}", output.name));

        if !is_identifier(&output.name) {
            result.error(at.clone(), format!("Output name '{}' is invalid", output.name));
        }

        let missing = match output.source(path) {
            Ok(OutputSource::Literal(_)) => None,
            Ok(OutputSource::Variable(name)) => {
                (!path.is_root() || config.variable(&name).is_none()).then(|| format!("var.{name}"))
            }
            Ok(OutputSource::ResourceAttribute { instance, .. }) => {
                (!config.declares_instance(&instance)).then(|| instance.to_string())
            }
            Ok(OutputSource::ModuleOutput(child)) => {
                config.output(&child).is_none().then(|| child.to_string())
            }
            Err(e) => {
                result.error(at.clone(), e.to_string());
                None
            }
        };
        if let Some(reference) = missing {
            result.error(
                at.clone(),
                ConfigError::UnknownReference {
                    from: addr.to_string(),
                    reference,
                }
                .to_string(),
            );
        }

        match output.dependencies(path) {
            Ok(targets) => {
                for target in targets.iter().filter(|t| !target_declared(config, t)) {
                    result.error(
                        at.clone(),
                        ConfigError::UnknownReference {
                            from: addr.to_string(),
                            reference: target.to_string(),
                        }
                        .to_string(),
                    );
                }
            }
            Err(e) => result.error(at, e.to_string()),
        }
    }

    fn check_duplicates(
        path: &ModulePath,
        kind: &str,
        names: impl Iterator<Item = String>,
        result: &mut ValidationResult,
    ) {
        let mut seen = HashSet::new();
        for name in names {
            if !seen.insert(name.clone()) {
                result.error(
                    field(path, &format!("{kind}s.{name}")),
                    ConfigError::DuplicateName {
                        kind: kind.to_string(),
                        name,
                    }
                    .to_string(),
                );
            }
        }
    }
}

/// Field path prefixed with the module path.
fn field(path: &ModulePath, rest: &str) -> String {
    if path.is_root() {
        rest.to_string()
    } else {
        format!("{path}.{rest}")
    }
}

/// Returns true if the provider is declared in its module or an ancestor.
fn provider_declared(config: &Config, addr: &ProviderConfigAddr) -> bool {
    addr.module
        .self_and_ancestors()
        .iter()
        .any(|module| config.provider(&addr.in_module(module)).is_some())
}

fn target_declared(config: &Config, target: &Target) -> bool {
    match target {
        Target::Module(module) => config.module(module).is_some(),
        Target::Resource(resource) => config.resource(resource).is_some(),
        Target::Instance(instance) => config.declares_instance(instance),
    }
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }

    fn error(&mut self, field: String, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field,
            message: message.into(),
        });
    }

    /// Converts the result into diagnostics, errors first.
    #[must_use]
    pub fn into_diagnostics(self) -> Diagnostics {
        let mut diags = Diagnostics::new();
        for error in self.errors {
            diags.push(
                Diagnostic::error(ConfigError::validation(error.message, error.field.clone()))
                    .with_address(error.field),
            );
        }
        for warning in self.warnings {
            diags.push(Diagnostic::warning(warning, None));
        }
        diags
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;

    fn validate(yaml: &str) -> ValidationResult {
        let config = ConfigParser::new().parse_yaml(yaml, None).expect("valid yaml");
        ConfigValidator::new().validate(&config)
    }

    #[test]
    fn test_valid_config() {
        let result = validate(
            r"
providers:
  - type: simple
    alias: west
resources:
  - type: simple_thing
    name: a
    provider: simple.west
  - type: simple_thing
    name: b
    depends_on: [simple_thing.a]
outputs:
  - name: a_id
    value_from: simple_thing.a.id
",
        );
        assert!(result.is_valid(), "{:?}", result.errors);
    }

    #[test]
    fn test_duplicate_resource() {
        let result = validate(
            "resources:\n  - {type: simple_thing, name: a}\n  - {type: simple_thing, name: a}\n",
        );
        assert_eq!(result.error_count(), 1);
        assert!(result.errors[0].message.contains("Duplicate resource"));
    }

    #[test]
    fn test_count_and_for_each_exclusive() {
        let result = validate(
            "resources:\n  - {type: simple_thing, name: a, count: 2, for_each: [x]}\n",
        );
        assert!(!result.is_valid());
    }

    #[test]
    fn test_unknown_dependency_and_provider() {
        let result = validate(
            r"
resources:
  - type: simple_thing
    name: a
    provider: simple.nowhere
    depends_on: [simple_thing.missing, module.gone]
",
        );
        assert_eq!(result.error_count(), 3);
    }

    #[test]
    fn test_self_dependency() {
        let result = validate(
            "resources:\n  - {type: simple_thing, name: a, depends_on: [simple_thing.a]}\n",
        );
        assert!(result.errors[0].message.contains("itself"));
    }

    #[test]
    fn test_child_module_inherits_aliased_provider() {
        let result = validate(
            r"
providers:
  - type: simple
    alias: west
modules:
  - name: child
    resources:
      - type: simple_thing
        name: x
        provider: simple.west
",
        );
        assert!(result.is_valid(), "{:?}", result.errors);
    }

    #[test]
    fn test_output_reference_must_exist() {
        let result = validate(
            r"
resources:
  - {type: simple_thing, name: a, count: 1}
outputs:
  - {name: ok, value_from: 'simple_thing.a[0].id'}
  - {name: bad, value_from: 'simple_thing.a[5].id'}
  - {name: var, value_from: var.nope}
  - {name: both, value: 1, value_from: var.nope}
",
        );
        assert_eq!(result.error_count(), 3);
    }

    #[test]
    fn test_empty_config_warns() {
        let result = validate("providers: []\n");
        assert!(result.is_valid());
        assert_eq!(result.warning_count(), 1);
    }

    #[test]
    fn test_into_diagnostics() {
        let result = validate("resources:\n  - {type: module, name: a}\n");
        let diags = result.into_diagnostics();
        assert!(diags.has_errors());
    }
}
