//! The result of a plan operation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

use crate::addrs::{ProviderConfigAddr, Target};
use crate::error::{ConfigError, OrchestratorError, Result};
use crate::state::{State, StateFile};

use super::changes::{Changes, ChangeSummary};

/// Plan mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanMode {
    /// Converge on the configuration.
    #[default]
    Normal,
    /// Destroy everything recorded in state.
    Destroy,
}

impl fmt::Display for PlanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Destroy => write!(f, "destroy"),
        }
    }
}

/// The stored state file a plan was made against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateOrigin {
    /// Lineage of the stored file.
    pub lineage: String,
    /// Serial of the stored file.
    pub serial: u64,
}

impl StateOrigin {
    /// Origin of a stored state file.
    #[must_use]
    pub fn of(file: &StateFile) -> Self {
        Self {
            lineage: file.lineage.clone(),
            serial: file.serial,
        }
    }
}

impl fmt::Display for StateOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} serial {}", self.lineage, self.serial)
    }
}

/// Everything apply needs to carry out a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Plan mode.
    pub mode: PlanMode,
    /// Root variable values used while planning.
    #[serde(default)]
    pub variable_values: BTreeMap<String, Value>,
    /// Planned changes.
    pub changes: Changes,
    /// Targets the plan was restricted to.
    #[serde(default)]
    pub targets: Vec<Target>,
    /// Addresses excluded from the plan.
    #[serde(default)]
    pub excludes: Vec<Target>,
    /// State the plan was made against, after refresh.
    pub prior_state: State,
    /// Hash of the configuration the plan was made from.
    pub config_hash: String,
    /// Stored state the plan was made against; `None` if nothing was stored.
    #[serde(default)]
    pub state_origin: Option<StateOrigin>,
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
}

impl Plan {
    /// Provider configurations referenced by resource changes, sorted and
    /// de-duplicated.
    #[must_use]
    pub fn provider_addrs(&self) -> Vec<ProviderConfigAddr> {
        self.changes
            .resources
            .iter()
            .map(|c| c.provider.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Returns true if applying the plan would change anything.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Counts of resource changes.
    #[must_use]
    pub fn summary(&self) -> ChangeSummary {
        self.changes.summary()
    }

    /// Writes the plan as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(|e| {
            OrchestratorError::internal(format!("Failed to serialize plan: {e}"))
        })?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Reads a plan written by [`Plan::save`].
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or not a plan.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|_| {
            OrchestratorError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            })
        })?;
        serde_json::from_str(&content).map_err(|e| {
            OrchestratorError::Config(ConfigError::ParseError {
                message: format!("Invalid plan file: {e}"),
                location: Some(path.display().to_string()),
            })
        })
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Plan ({} mode, created {})", self.mode, self.created_at.to_rfc3339())?;
        for change in self.changes.resources.iter().filter(|c| c.action != super::Action::NoOp) {
            writeln!(f, "  {} {change}", change.action.symbol())?;
        }
        write!(f, "Plan: {}.", self.summary())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plans::{Action, ResourceInstanceChange};

    fn plan_with(providers: &[&str]) -> Plan {
        let mut changes = Changes::new();
        for (i, provider) in providers.iter().enumerate() {
            let mut change = ResourceInstanceChange::noop(
                format!("simple_thing.r{i}").parse().expect("valid address"),
                None,
                provider.parse().expect("valid provider"),
            );
            change.action = Action::Create;
            changes.put_resource_change(change);
        }
        Plan {
            mode: PlanMode::Normal,
            variable_values: BTreeMap::new(),
            changes,
            targets: Vec::new(),
            excludes: Vec::new(),
            prior_state: State::new(),
            config_hash: String::from("abc"),
            state_origin: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_provider_addrs_sorted_and_unique() {
        let plan = plan_with(&[
            "provider.simple.west",
            "provider.simple",
            "provider.simple.west",
        ]);
        let addrs: Vec<String> = plan.provider_addrs().iter().map(ToString::to_string).collect();
        assert_eq!(addrs, vec!["provider.simple", "provider.simple.west"]);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("plan.json");
        let plan = plan_with(&["provider.simple"]);
        plan.save(&path).expect("save");
        assert_eq!(Plan::load(&path).expect("load"), plan);
    }

    #[test]
    fn test_display_lists_changes() {
        let text = plan_with(&["provider.simple"]).to_string();
        assert!(text.contains("+ simple_thing.r0: create"));
        assert!(text.ends_with("Plan: 1 to add, 0 to change, 0 to destroy."));
    }
}
