//! Configuration hashing for change detection.
//!
//! A saved plan records the hash of the configuration it was made from; apply
//! refuses a plan whose hash no longer matches.

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::warn;

use super::spec::{Config, ModuleConfig, ResourceConfig};

/// Hasher for computing configuration hashes.
#[derive(Debug, Default)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new configuration hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of the entire configuration.
    #[must_use]
    pub fn hash_config(&self, config: &Config) -> String {
        let mut hasher = Sha256::new();
        for (path, module) in config.modules() {
            hasher.update(path.to_string().as_bytes());
            hasher.update(self.hash_module(module).as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Computes a hash of one module body, excluding its children.
    #[must_use]
    pub fn hash_module(&self, module: &ModuleConfig) -> String {
        let mut hasher = Sha256::new();

        for provider in &module.providers {
            update_json(&mut hasher, provider);
        }
        for variable in &module.variables {
            update_json(&mut hasher, variable);
        }
        // Resources sorted by address for determinism
        let mut resources: Vec<&ResourceConfig> = module.resources.iter().collect();
        resources.sort_by(|a, b| (&a.type_name, &a.name).cmp(&(&b.type_name, &b.name)));
        for resource in resources {
            hasher.update(self.hash_resource(resource).as_bytes());
        }
        for output in &module.outputs {
            update_json(&mut hasher, output);
        }
        for call in &module.modules {
            hasher.update(call.name.as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a hash for a single resource block.
    #[must_use]
    pub fn hash_resource(&self, resource: &ResourceConfig) -> String {
        let mut hasher = Sha256::new();
        update_json(&mut hasher, resource);
        hex::encode(hasher.finalize())
    }

    /// Checks if two configurations are equivalent.
    #[must_use]
    pub fn configs_equal(&self, a: &Config, b: &Config) -> bool {
        self.hash_config(a) == self.hash_config(b)
    }
}

fn update_json(hasher: &mut Sha256, value: &impl Serialize) {
    match serde_json::to_vec(value) {
        Ok(bytes) => hasher.update(&bytes),
        Err(e) => warn!("Skipping unserializable configuration block in hash: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;

    fn parse(yaml: &str) -> Config {
        ConfigParser::new().parse_yaml(yaml, None).expect("valid yaml")
    }

    #[test]
    fn test_hash_is_deterministic() {
        let config = parse("resources:\n  - type: simple_thing\n    name: a\n");
        let hasher = ConfigHasher::new();
        assert_eq!(hasher.hash_config(&config), hasher.hash_config(&config));
        assert_eq!(hasher.hash_config(&config).len(), 64);
    }

    #[test]
    fn test_hash_ignores_resource_order() {
        let a = parse(
            "resources:\n  - {type: simple_thing, name: a}\n  - {type: simple_thing, name: b}\n",
        );
        let b = parse(
            "resources:\n  - {type: simple_thing, name: b}\n  - {type: simple_thing, name: a}\n",
        );
        assert!(ConfigHasher::new().configs_equal(&a, &b));
    }

    #[test]
    fn test_hash_changes_with_attributes() {
        let a = parse("resources:\n  - {type: simple_thing, name: a, attributes: {size: 1}}\n");
        let b = parse("resources:\n  - {type: simple_thing, name: a, attributes: {size: 2}}\n");
        assert!(!ConfigHasher::new().configs_equal(&a, &b));
    }
}
