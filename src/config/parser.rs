//! Configuration parser for loading configuration files.
//!
//! This module handles loading configuration from YAML files, the `.env`
//! file and `HALLDYLL_VAR_<name>` environment variables.

use crate::error::{ConfigError, OrchestratorError, Result};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

use super::spec::Config;

/// Prefix of environment variables that set root input variables.
pub const VARIABLE_ENV_PREFIX: &str = "HALLDYLL_VAR_";

/// Configuration parser for loading orchestrator configuration.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving relative paths.
    base_path: Option<std::path::PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(OrchestratorError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            OrchestratorError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<Config> {
        debug!("Parsing YAML configuration");

        // An empty document is an empty configuration.
        if content.trim().is_empty() {
            return Ok(Config::default());
        }

        let config: Config = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            OrchestratorError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!(
            "Parsed configuration with {} modules",
            config.modules().len()
        );
        Ok(config)
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| std::path::PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                OrchestratorError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Collects root variable values from `HALLDYLL_VAR_<name>` variables.
    #[must_use]
    pub fn variables_from_env() -> BTreeMap<String, Value> {
        Self::variables_from_pairs(std::env::vars())
    }

    /// Collects variable values from `(key, value)` pairs carrying the
    /// `HALLDYLL_VAR_` prefix.
    #[must_use]
    pub fn variables_from_pairs(
        pairs: impl IntoIterator<Item = (String, String)>,
    ) -> BTreeMap<String, Value> {
        pairs
            .into_iter()
            .filter_map(|(key, raw)| {
                let name = key.strip_prefix(VARIABLE_ENV_PREFIX)?;
                if name.is_empty() {
                    return None;
                }
                debug!("Variable {name} set from environment");
                Some((name.to_string(), parse_variable_value(&raw)))
            })
            .collect()
    }

    /// Parses `name=value` assignments from the command line.
    ///
    /// # Errors
    ///
    /// Returns an error for an assignment without `=`.
    pub fn parse_assignments(assignments: &[String]) -> Result<BTreeMap<String, Value>> {
        assignments
            .iter()
            .map(|assignment| {
                let (name, raw) = assignment.split_once('=').ok_or_else(|| {
                    OrchestratorError::Config(ConfigError::validation(
                        format!("variable assignment \"{assignment}\" must be name=value"),
                        "var",
                    ))
                })?;
                Ok((name.trim().to_string(), parse_variable_value(raw)))
            })
            .collect()
    }
}

/// Interprets a raw variable value as JSON, falling back to a plain string.
fn parse_variable_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["halldyll.yaml", "halldyll.yml"];

/// Finds the configuration file in the current directory or parent directories.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<std::path::PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(OrchestratorError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let yaml = r"
resources:
  - type: simple_thing
    name: a
";
        let parser = ConfigParser::new();
        let config = parser.parse_yaml(yaml, None).expect("valid yaml");
        assert_eq!(config.root.resources.len(), 1);
        assert!(config.root.providers.is_empty());
    }

    #[test]
    fn test_parse_empty_document() {
        let config = ConfigParser::new().parse_yaml("  \n", None).expect("empty is valid");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_parse_invalid_yaml() {
        let result = ConfigParser::new().parse_yaml("resources: [", None);
        assert!(matches!(
            result,
            Err(OrchestratorError::Config(ConfigError::ParseError { .. }))
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = ConfigParser::new().load_file(dir.path().join("nope.yaml"));
        assert!(matches!(
            result,
            Err(OrchestratorError::Config(ConfigError::FileNotFound { .. }))
        ));
    }

    #[test]
    fn test_find_config_file_in_parent() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("halldyll.yaml"), "").expect("write");
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).expect("mkdir");

        let found = find_config_file(&nested).expect("found in parent");
        assert_eq!(found, dir.path().join("halldyll.yaml"));
    }

    #[test]
    fn test_variables_from_pairs() {
        let vars = ConfigParser::variables_from_pairs(vec![
            ("HALLDYLL_VAR_region".to_string(), "eu-west".to_string()),
            ("HALLDYLL_VAR_size".to_string(), "3".to_string()),
            ("OTHER".to_string(), "ignored".to_string()),
        ]);
        assert_eq!(vars.len(), 2);
        assert_eq!(vars["region"], Value::String("eu-west".to_string()));
        assert_eq!(vars["size"], Value::from(3));
    }

    #[test]
    fn test_parse_assignments() {
        let vars = ConfigParser::parse_assignments(&["a=1".to_string(), "b=x=y".to_string()])
            .expect("valid assignments");
        assert_eq!(vars["a"], Value::from(1));
        assert_eq!(vars["b"], Value::String("x=y".to_string()));
        assert!(ConfigParser::parse_assignments(&["novalue".to_string()]).is_err());
    }
}
