//! Addresses of modules, resources, providers and outputs.
//!
//! Every address has a canonical string form (`module.net.simple_subnet.a[0]`,
//! `provider.simple.west`, `output.url`, ...) that is used for graph keys,
//! state map keys and command-line targets. [`fmt::Display`] produces that
//! form and [`FromStr`] parses it back.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::ConfigError;

macro_rules! impl_string_serde {
    ($($ty:ty),* $(,)?) => {$(
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    )*};
}

impl_string_serde!(
    ModulePath,
    InstanceKey,
    ResourceAddr,
    ResourceInstanceAddr,
    ProviderConfigAddr,
    OutputAddr,
    DeposedKey,
    Target,
);

/// Keywords that cannot be used as a resource type.
const RESERVED: &[&str] = &["module", "provider", "output", "var"];

/// Returns true if `s` is a valid block name.
#[must_use]
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Path from the root module to a (possibly nested) child module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModulePath(Vec<String>);

impl ModulePath {
    /// The root module.
    #[must_use]
    pub const fn root() -> Self {
        Self(Vec::new())
    }

    /// Returns true for the root module.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Path of the child module `name` of this module.
    #[must_use]
    pub fn child(&self, name: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(name.to_string());
        Self(segments)
    }

    /// Path of the parent module, `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        let (_, rest) = self.0.split_last()?;
        Some(Self(rest.to_vec()))
    }

    /// Module call names from the root down.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Nesting depth; the root has depth zero.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// Returns true if `other` is this module or one of its descendants.
    #[must_use]
    pub fn contains(&self, other: &Self) -> bool {
        other.0.starts_with(&self.0)
    }

    /// Appends `relative` below this module.
    #[must_use]
    pub fn join(&self, relative: &Self) -> Self {
        let mut segments = self.0.clone();
        segments.extend(relative.0.iter().cloned());
        Self(segments)
    }

    /// This module followed by each ancestor up to and including the root.
    #[must_use]
    pub fn self_and_ancestors(&self) -> Vec<Self> {
        (0..=self.0.len())
            .rev()
            .map(|len| Self(self.0[..len].to_vec()))
            .collect()
    }

    fn write_prefix(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for name in &self.0 {
            write!(f, "module.{name}.")?;
        }
        Ok(())
    }
}

impl fmt::Display for ModulePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, name) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "module.{name}")?;
        }
        Ok(())
    }
}

impl FromStr for ModulePath {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Self::root());
        }
        let (module, rest) = split_modules(s)?;
        if !rest.is_empty() {
            return Err(ConfigError::invalid_address(s, "expected only module segments"));
        }
        Ok(module)
    }
}

/// Splits leading `module.<name>` pairs off a dotted address.
fn split_modules(input: &str) -> Result<(ModulePath, Vec<&str>), ConfigError> {
    let parts: Vec<&str> = input.split('.').collect();
    let mut module = Vec::new();
    let mut i = 0;
    while i < parts.len() && parts[i] == "module" {
        let name = parts
            .get(i + 1)
            .ok_or_else(|| ConfigError::invalid_address(input, "module keyword without a name"))?;
        if !is_identifier(name) {
            return Err(ConfigError::invalid_address(
                input,
                format!("invalid module name \"{name}\""),
            ));
        }
        module.push((*name).to_string());
        i += 2;
    }
    Ok((ModulePath(module), parts[i..].to_vec()))
}

/// Splits a trailing `[key]` off an address.
fn split_key(input: &str) -> Result<(&str, InstanceKey), ConfigError> {
    match input.find('[') {
        Some(open) => Ok((&input[..open], input[open..].parse()?)),
        None => Ok((input, InstanceKey::NoKey)),
    }
}

/// Distinguishes the instances of a resource that uses `count` or `for_each`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum InstanceKey {
    /// Single-instance resource.
    #[default]
    NoKey,
    /// Instance created by `count`.
    Int(i64),
    /// Instance created by `for_each`.
    Str(String),
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoKey => Ok(()),
            Self::Int(i) => write!(f, "[{i}]"),
            Self::Str(s) => {
                let quoted = serde_json::to_string(s).map_err(|_| fmt::Error)?;
                write!(f, "[{quoted}]")
            }
        }
    }
}

impl FromStr for InstanceKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Ok(Self::NoKey);
        }
        let inner = s
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
            .ok_or_else(|| ConfigError::invalid_address(s, "instance key must be bracketed"))?;
        if inner.starts_with('"') {
            serde_json::from_str::<String>(inner)
                .map(Self::Str)
                .map_err(|e| ConfigError::invalid_address(s, e.to_string()))
        } else {
            inner
                .parse::<i64>()
                .map(Self::Int)
                .map_err(|e| ConfigError::invalid_address(s, e.to_string()))
        }
    }
}

/// A resource block: every instance of one `type.name` in one module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceAddr {
    /// Module containing the resource.
    pub module: ModulePath,
    /// Resource type, e.g. `simple_thing`.
    pub type_name: String,
    /// Resource name within the module.
    pub name: String,
}

impl ResourceAddr {
    /// Creates a resource address.
    #[must_use]
    pub fn new(module: ModulePath, type_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            module,
            type_name: type_name.into(),
            name: name.into(),
        }
    }

    /// Address of one instance of this resource.
    #[must_use]
    pub fn instance(&self, key: InstanceKey) -> ResourceInstanceAddr {
        ResourceInstanceAddr {
            resource: self.clone(),
            key,
        }
    }

    /// Provider type implied by the resource type: the prefix before the first `_`.
    #[must_use]
    pub fn implied_provider_type(&self) -> &str {
        self.type_name
            .split_once('_')
            .map_or(self.type_name.as_str(), |(prefix, _)| prefix)
    }

    /// `type.name` without the module prefix.
    #[must_use]
    pub fn local_name(&self) -> String {
        format!("{}.{}", self.type_name, self.name)
    }
}

impl fmt::Display for ResourceAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.module.write_prefix(f)?;
        write!(f, "{}.{}", self.type_name, self.name)
    }
}

impl FromStr for ResourceAddr {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.contains('[') {
            return Err(ConfigError::invalid_address(s, "resource address cannot have a key"));
        }
        let (module, rest) = split_modules(s)?;
        parse_resource_parts(s, module, &rest)
    }
}

fn parse_resource_parts(
    input: &str,
    module: ModulePath,
    rest: &[&str],
) -> Result<ResourceAddr, ConfigError> {
    match rest {
        [type_name, name] => {
            if RESERVED.contains(type_name) {
                return Err(ConfigError::invalid_address(
                    input,
                    format!("\"{type_name}\" is not a resource type"),
                ));
            }
            if !is_identifier(type_name) || !is_identifier(name) {
                return Err(ConfigError::invalid_address(input, "invalid resource type or name"));
            }
            Ok(ResourceAddr::new(module, *type_name, *name))
        }
        _ => Err(ConfigError::invalid_address(input, "expected <type>.<name>")),
    }
}

/// One instance of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceInstanceAddr {
    /// The resource block.
    pub resource: ResourceAddr,
    /// Instance key within the block.
    pub key: InstanceKey,
}

impl ResourceInstanceAddr {
    /// Module containing the instance.
    #[must_use]
    pub const fn module(&self) -> &ModulePath {
        &self.resource.module
    }
}

impl fmt::Display for ResourceInstanceAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.resource, self.key)
    }
}

impl FromStr for ResourceInstanceAddr {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (head, key) = split_key(s)?;
        let (module, rest) = split_modules(head)?;
        let resource = parse_resource_parts(s, module, &rest)?;
        Ok(Self { resource, key })
    }
}

/// A provider configuration block, optionally aliased.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProviderConfigAddr {
    /// Module declaring the configuration.
    pub module: ModulePath,
    /// Provider type, e.g. `simple`.
    pub provider_type: String,
    /// Alias distinguishing several configurations of one type.
    pub alias: Option<String>,
}

impl ProviderConfigAddr {
    /// Creates a provider configuration address.
    #[must_use]
    pub fn new(module: ModulePath, provider_type: impl Into<String>, alias: Option<String>) -> Self {
        Self {
            module,
            provider_type: provider_type.into(),
            alias,
        }
    }

    /// Default (unaliased) configuration of `provider_type` in the root module.
    #[must_use]
    pub fn root(provider_type: impl Into<String>) -> Self {
        Self::new(ModulePath::root(), provider_type, None)
    }

    /// Parses a module-local reference such as `simple` or `simple.west`.
    ///
    /// # Errors
    ///
    /// Returns an error if the reference is not `<type>` or `<type>.<alias>`.
    pub fn from_local_ref(module: &ModulePath, reference: &str) -> Result<Self, ConfigError> {
        let parts: Vec<&str> = reference.split('.').collect();
        match parts.as_slice() {
            [provider_type] if is_identifier(provider_type) => {
                Ok(Self::new(module.clone(), *provider_type, None))
            }
            [provider_type, alias] if is_identifier(provider_type) && is_identifier(alias) => Ok(
                Self::new(module.clone(), *provider_type, Some((*alias).to_string())),
            ),
            _ => Err(ConfigError::invalid_address(
                reference,
                "expected <provider type> or <provider type>.<alias>",
            )),
        }
    }

    /// The same configuration name declared in another module.
    #[must_use]
    pub fn in_module(&self, module: &ModulePath) -> Self {
        Self::new(module.clone(), self.provider_type.clone(), self.alias.clone())
    }

    /// `type` or `type.alias`, as written in a resource's `provider` field.
    #[must_use]
    pub fn local_ref(&self) -> String {
        match &self.alias {
            Some(alias) => format!("{}.{alias}", self.provider_type),
            None => self.provider_type.clone(),
        }
    }
}

impl fmt::Display for ProviderConfigAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.module.write_prefix(f)?;
        write!(f, "provider.{}", self.local_ref())
    }
}

impl FromStr for ProviderConfigAddr {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (module, rest) = split_modules(s)?;
        match rest.as_slice() {
            ["provider", local @ ..] if !local.is_empty() => {
                Self::from_local_ref(&module, &local.join("."))
                    .map_err(|e| ConfigError::invalid_address(s, e.to_string()))
            }
            _ => Err(ConfigError::invalid_address(s, "expected provider.<type>[.<alias>]")),
        }
    }
}

/// A named output of a module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputAddr {
    /// Module declaring the output.
    pub module: ModulePath,
    /// Output name.
    pub name: String,
}

impl OutputAddr {
    /// Creates an output address.
    #[must_use]
    pub fn new(module: ModulePath, name: impl Into<String>) -> Self {
        Self {
            module,
            name: name.into(),
        }
    }
}

impl fmt::Display for OutputAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.module.write_prefix(f)?;
        write!(f, "output.{}", self.name)
    }
}

impl FromStr for OutputAddr {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (module, rest) = split_modules(s)?;
        match rest.as_slice() {
            ["output", name] if is_identifier(name) => Ok(Self::new(module, *name)),
            _ => Err(ConfigError::invalid_address(s, "expected output.<name>")),
        }
    }
}

/// A root input variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariableAddr {
    /// Variable name.
    pub name: String,
}

impl VariableAddr {
    /// Creates a variable address.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl fmt::Display for VariableAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "var.{}", self.name)
    }
}

/// Identifies a deposed object: a former current object kept around during a
/// create-before-destroy replacement until it is destroyed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeposedKey(String);

impl DeposedKey {
    /// Generates a fresh random key.
    #[must_use]
    pub fn generate() -> Self {
        let id = Uuid::new_v4().simple().to_string();
        Self(id[..8].to_string())
    }

    /// The key as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeposedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for DeposedKey {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ConfigError::invalid_address(s, "deposed key must be alphanumeric"));
        }
        Ok(Self(s.to_string()))
    }
}

/// An address accepted by `-target` and `-exclude`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Target {
    /// Everything inside a module and its descendants.
    Module(ModulePath),
    /// Every instance of a resource.
    Resource(ResourceAddr),
    /// One resource instance.
    Instance(ResourceInstanceAddr),
}

impl Target {
    /// Returns true if the instance falls under this target.
    #[must_use]
    pub fn matches_instance(&self, addr: &ResourceInstanceAddr) -> bool {
        match self {
            Self::Module(module) => module.contains(addr.module()),
            Self::Resource(resource) => &addr.resource == resource,
            Self::Instance(instance) => instance == addr,
        }
    }

    /// Returns true if any instance of `resource` could fall under this target.
    #[must_use]
    pub fn matches_resource(&self, resource: &ResourceAddr) -> bool {
        match self {
            Self::Module(module) => module.contains(&resource.module),
            Self::Resource(r) => r == resource,
            Self::Instance(instance) => &instance.resource == resource,
        }
    }

    /// Returns true if the module falls under this target.
    #[must_use]
    pub fn matches_module(&self, module: &ModulePath) -> bool {
        matches!(self, Self::Module(m) if m.contains(module))
    }

    /// Interprets a module-relative target as seen from `base`.
    #[must_use]
    pub fn in_module(self, base: &ModulePath) -> Self {
        match self {
            Self::Module(module) => Self::Module(base.join(&module)),
            Self::Resource(mut resource) => {
                resource.module = base.join(&resource.module);
                Self::Resource(resource)
            }
            Self::Instance(mut instance) => {
                instance.resource.module = base.join(&instance.resource.module);
                Self::Instance(instance)
            }
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Module(module) => write!(f, "{module}"),
            Self::Resource(resource) => write!(f, "{resource}"),
            Self::Instance(instance) => write!(f, "{instance}"),
        }
    }
}

impl FromStr for Target {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (head, key) = split_key(s)?;
        let (module, rest) = split_modules(head)?;
        if rest.is_empty() {
            if module.is_root() || key != InstanceKey::NoKey {
                return Err(ConfigError::invalid_address(s, "expected a module or resource"));
            }
            return Ok(Self::Module(module));
        }
        let resource = parse_resource_parts(s, module, &rest)?;
        Ok(match key {
            InstanceKey::NoKey => Self::Resource(resource),
            key => Self::Instance(resource.instance(key)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested_instance() {
        let addr: ResourceInstanceAddr = "module.net.module.sub.simple_subnet.a[\"eu\"]"
            .parse()
            .expect("valid address");
        assert_eq!(addr.module().segments(), ["net", "sub"]);
        assert_eq!(addr.resource.type_name, "simple_subnet");
        assert_eq!(addr.key, InstanceKey::Str("eu".to_string()));
        assert_eq!(
            addr.to_string(),
            "module.net.module.sub.simple_subnet.a[\"eu\"]"
        );
    }

    #[test]
    fn test_implied_provider_type() {
        let addr: ResourceAddr = "simple_thing.a".parse().expect("valid address");
        assert_eq!(addr.implied_provider_type(), "simple");

        let addr: ResourceAddr = "bare.a".parse().expect("valid address");
        assert_eq!(addr.implied_provider_type(), "bare");
    }

    #[test]
    fn test_provider_addr_forms() {
        let addr: ProviderConfigAddr = "module.a.provider.simple.west".parse().expect("valid");
        assert_eq!(addr.alias.as_deref(), Some("west"));
        assert_eq!(addr.local_ref(), "simple.west");
        assert_eq!(addr.to_string(), "module.a.provider.simple.west");
        assert_eq!(ProviderConfigAddr::root("simple").to_string(), "provider.simple");
    }

    #[test]
    fn test_target_kinds() {
        assert!(matches!("module.a".parse::<Target>(), Ok(Target::Module(_))));
        assert!(matches!("simple_thing.a".parse::<Target>(), Ok(Target::Resource(_))));
        assert!(matches!("simple_thing.a[2]".parse::<Target>(), Ok(Target::Instance(_))));
        assert!("simple_thing".parse::<Target>().is_err());
        assert!("provider.simple".parse::<Target>().is_err());
        assert!("module.a[0]".parse::<Target>().is_err());
    }

    #[test]
    fn test_module_target_matches_descendants() {
        let target: Target = "module.a".parse().expect("valid");
        let inside: ResourceInstanceAddr = "module.a.module.b.simple_thing.x".parse().expect("valid");
        let outside: ResourceInstanceAddr = "module.ab.simple_thing.x".parse().expect("valid");
        assert!(target.matches_instance(&inside));
        assert!(!target.matches_instance(&outside));
    }

    #[test]
    fn test_relative_target_in_module() {
        let target: Target = "simple_thing.b".parse().expect("valid");
        let base = ModulePath::root().child("net");
        assert_eq!(target.in_module(&base).to_string(), "module.net.simple_thing.b");
    }

    #[test]
    fn test_module_ancestors() {
        let path = ModulePath::root().child("a").child("b");
        let chain: Vec<String> = path.self_and_ancestors().iter().map(ToString::to_string).collect();
        assert_eq!(chain, vec!["module.a.module.b", "module.a", ""]);
    }

    #[test]
    fn test_instance_key_as_json_map_key() {
        let mut map = std::collections::BTreeMap::new();
        map.insert(InstanceKey::Int(3), 1);
        map.insert(InstanceKey::NoKey, 2);
        let json = serde_json::to_string(&map).expect("serialize");
        assert_eq!(json, r#"{"":2,"[3]":1}"#);
        let back: std::collections::BTreeMap<InstanceKey, i32> =
            serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, map);
    }

    #[test]
    fn test_generated_deposed_keys_differ() {
        let a = DeposedKey::generate();
        let b = DeposedKey::generate();
        assert_eq!(a.as_str().len(), 8);
        assert_ne!(a, b);
    }
}
