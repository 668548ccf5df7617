//! The built-in `local-exec` provisioner.
//!
//! Runs a command on the machine running the orchestrator. The created
//! object is passed to the command as JSON in `HALLDYLL_OBJECT` and its
//! address in `HALLDYLL_ADDRESS`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::ProviderError;

use super::ProviderResult;
use super::provisioner::{ProvisionRequest, ResourceProvisioner};

/// Environment variable holding the created object as JSON.
pub const OBJECT_ENV: &str = "HALLDYLL_OBJECT";

/// Environment variable holding the instance address.
pub const ADDRESS_ENV: &str = "HALLDYLL_ADDRESS";

/// Settings accepted by `local-exec`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Settings {
    command: String,
    #[serde(default)]
    working_dir: Option<PathBuf>,
    #[serde(default)]
    environment: BTreeMap<String, String>,
    #[serde(default)]
    interpreter: Option<Vec<String>>,
}

impl Settings {
    fn parse(config: &Value) -> ProviderResult<Self> {
        let settings: Self = serde_json::from_value(config.clone())
            .map_err(|e| LocalExecProvisioner::error(format!("invalid settings: {e}")))?;
        if settings.command.trim().is_empty() {
            return Err(LocalExecProvisioner::error("command must not be empty"));
        }
        if settings.interpreter.as_ref().is_some_and(Vec::is_empty) {
            return Err(LocalExecProvisioner::error("interpreter must name a program"));
        }
        Ok(settings)
    }

    fn interpreter(&self) -> Vec<String> {
        self.interpreter.clone().unwrap_or_else(|| {
            if cfg!(windows) {
                vec![String::from("cmd"), String::from("/C")]
            } else {
                vec![String::from("/bin/sh"), String::from("-c")]
            }
        })
    }
}

/// Runs a local command against each created object.
#[derive(Debug, Default)]
pub struct LocalExecProvisioner;

impl LocalExecProvisioner {
    /// Provisioner type.
    pub const TYPE: &'static str = "local-exec";

    /// Creates the provisioner.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn error(message: impl Into<String>) -> ProviderError {
        ProviderError::reported(Self::TYPE, message)
    }
}

#[async_trait]
impl ResourceProvisioner for LocalExecProvisioner {
    async fn validate_provisioner_config(&self, config: &Value) -> ProviderResult<()> {
        Settings::parse(config).map(|_| ())
    }

    async fn provision_resource(&self, request: ProvisionRequest) -> ProviderResult<()> {
        let settings = Settings::parse(&request.config)?;
        let interpreter = settings.interpreter();
        let Some((program, args)) = interpreter.split_first() else {
            return Err(Self::error("interpreter must name a program"));
        };

        let mut command = Command::new(program);
        command
            .args(args)
            .arg(&settings.command)
            .envs(&settings.environment)
            .env(OBJECT_ENV, request.object.to_string())
            .env(ADDRESS_ENV, &request.addr)
            .kill_on_drop(true);
        if let Some(dir) = &settings.working_dir {
            command.current_dir(dir);
        }

        info!("{}: running local-exec: {}", request.addr, settings.command);
        let output = command
            .output()
            .await
            .map_err(|e| Self::error(format!("failed to run {program}: {e}")))?;

        for line in String::from_utf8_lossy(&output.stdout).lines() {
            info!("{} (local-exec): {line}", request.addr);
        }
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Self::error(format!(
                "command failed with {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        debug!("{}: local-exec finished", request.addr);
        Ok(())
    }

    async fn close(&self) -> ProviderResult<()> {
        Ok(())
    }
}
