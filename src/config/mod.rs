//! Configuration module for the Halldyll orchestrator.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `halldyll.yaml`
//! - Structural validation of the module tree
//! - Computing configuration hashes for stale-plan detection

mod spec;
mod parser;
mod validator;
mod hash;

pub use spec::{
    Config, LifecycleConfig, ModuleCall, ModuleConfig, OnFailure, OutputConfig, OutputSource,
    ProviderConfig, ProvisionerConfig, ResourceConfig, VariableConfig,
};
pub use parser::{ConfigParser, DEFAULT_CONFIG_FILES, VARIABLE_ENV_PREFIX, find_config_file};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
pub use hash::ConfigHasher;
