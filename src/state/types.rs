//! State types recording what the orchestrator has created.
//!
//! The state is a tree: modules hold resources, resources hold instances, and
//! every instance has at most one current object plus any number of deposed
//! objects awaiting destruction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::addrs::{
    DeposedKey, InstanceKey, ModulePath, OutputAddr, ProviderConfigAddr, ResourceAddr,
    ResourceInstanceAddr,
};
use crate::error::StateError;

/// Current version of the state file format.
pub const STATE_FORMAT_VERSION: u32 = 1;

/// Maximum number of history entries kept in a state file.
const MAX_HISTORY: usize = 20;

/// Everything the orchestrator knows about managed objects.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    /// Module states keyed by module path; the root key is `""`.
    #[serde(default)]
    pub modules: BTreeMap<ModulePath, ModuleState>,
}

/// State of one module.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleState {
    /// Resources keyed by `type.name`.
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceState>,
    /// Output values keyed by name.
    #[serde(default)]
    pub outputs: BTreeMap<String, OutputValue>,
}

/// State of one resource block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    /// Address of the resource.
    pub addr: ResourceAddr,
    /// Provider configuration that manages the objects.
    pub provider: ProviderConfigAddr,
    /// Instances keyed by instance key.
    #[serde(default)]
    pub instances: BTreeMap<InstanceKey, ResourceInstanceState>,
}

/// Objects of one resource instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceInstanceState {
    /// The object currently associated with the instance.
    #[serde(default)]
    pub current: Option<ResourceInstanceObject>,
    /// Former objects replaced by create-before-destroy, pending destruction.
    #[serde(default)]
    pub deposed: BTreeMap<DeposedKey, ResourceInstanceObject>,
}

impl ResourceInstanceState {
    /// Returns true if the instance holds no objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.current.is_none() && self.deposed.is_empty()
    }
}

/// A remote object as recorded after the last apply or refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceInstanceObject {
    /// Attribute values returned by the provider.
    pub attributes: Value,
    /// Object status.
    #[serde(default)]
    pub status: ObjectStatus,
    /// Resources this object depended on when it was last applied.
    #[serde(default)]
    pub dependencies: Vec<ResourceAddr>,
    /// Whether the object was created with create-before-destroy.
    #[serde(default)]
    pub create_before_destroy: bool,
}

impl ResourceInstanceObject {
    /// Creates a ready object with the given attributes.
    #[must_use]
    pub const fn new(attributes: Value) -> Self {
        Self {
            attributes,
            status: ObjectStatus::Ready,
            dependencies: Vec::new(),
            create_before_destroy: false,
        }
    }

    /// Sets the recorded dependencies.
    #[must_use]
    pub fn with_dependencies(mut self, dependencies: Vec<ResourceAddr>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Checks that the stored attributes decode as an object.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::ReadState`] if the attributes are not a JSON object.
    pub fn decode(&self, addr: &ResourceInstanceAddr) -> Result<&serde_json::Map<String, Value>, StateError> {
        self.attributes.as_object().ok_or_else(|| StateError::ReadState {
            addr: addr.to_string(),
            message: format!("expected an object, found {}", json_kind(&self.attributes)),
        })
    }

    /// Value of a top-level attribute.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Status of a recorded object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectStatus {
    /// Fully created and usable.
    #[default]
    Ready,
    /// Partially created or flagged for replacement.
    Tainted,
    /// Replaced by a newer object and awaiting destruction.
    Deposed,
}

/// A recorded output value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputValue {
    /// The value.
    pub value: Value,
    /// Hide the value in output.
    #[serde(default)]
    pub sensitive: bool,
}

impl State {
    /// Creates an empty state.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            modules: BTreeMap::new(),
        }
    }

    /// Returns true if no module holds resources or outputs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules
            .values()
            .all(|m| m.resources.is_empty() && m.outputs.is_empty())
    }

    /// State of the module at `path`.
    #[must_use]
    pub fn module(&self, path: &ModulePath) -> Option<&ModuleState> {
        self.modules.get(path)
    }

    /// State of the resource at `addr`.
    #[must_use]
    pub fn resource(&self, addr: &ResourceAddr) -> Option<&ResourceState> {
        self.module(&addr.module)?.resources.get(&addr.local_name())
    }

    /// State of the instance at `addr`.
    #[must_use]
    pub fn resource_instance(&self, addr: &ResourceInstanceAddr) -> Option<&ResourceInstanceState> {
        self.resource(&addr.resource)?.instances.get(&addr.key)
    }

    /// Current object of an instance.
    #[must_use]
    pub fn current_object(&self, addr: &ResourceInstanceAddr) -> Option<&ResourceInstanceObject> {
        self.resource_instance(addr)?.current.as_ref()
    }

    /// A deposed object of an instance.
    #[must_use]
    pub fn deposed_object(
        &self,
        addr: &ResourceInstanceAddr,
        key: &DeposedKey,
    ) -> Option<&ResourceInstanceObject> {
        self.resource_instance(addr)?.deposed.get(key)
    }

    /// Object addressed by an optional deposed key.
    #[must_use]
    pub fn object(
        &self,
        addr: &ResourceInstanceAddr,
        deposed: Option<&DeposedKey>,
    ) -> Option<&ResourceInstanceObject> {
        match deposed {
            Some(key) => self.deposed_object(addr, key),
            None => self.current_object(addr),
        }
    }

    /// Sets or removes the current object of an instance.
    ///
    /// Passing `None` removes the object and prunes empty containers.
    pub fn set_current(
        &mut self,
        addr: &ResourceInstanceAddr,
        object: Option<ResourceInstanceObject>,
        provider: &ProviderConfigAddr,
    ) {
        match object {
            Some(object) => self.instance_mut(addr, provider).current = Some(object),
            None => {
                if let Some(instance) = self.instance_mut_existing(addr) {
                    instance.current = None;
                }
                self.prune();
            }
        }
    }

    /// Sets or removes a deposed object of an instance.
    pub fn set_deposed(
        &mut self,
        addr: &ResourceInstanceAddr,
        key: &DeposedKey,
        object: Option<ResourceInstanceObject>,
        provider: &ProviderConfigAddr,
    ) {
        match object {
            Some(mut object) => {
                object.status = ObjectStatus::Deposed;
                self.instance_mut(addr, provider).deposed.insert(key.clone(), object);
            }
            None => {
                if let Some(instance) = self.instance_mut_existing(addr) {
                    instance.deposed.remove(key);
                }
                self.prune();
            }
        }
    }

    /// Moves the current object to `deposed[key]` and installs `replacement`
    /// as current in one mutation.
    ///
    /// Returns false, installing `replacement` anyway, if there was no current
    /// object to depose.
    pub fn replace_current(
        &mut self,
        addr: &ResourceInstanceAddr,
        replacement: ResourceInstanceObject,
        key: &DeposedKey,
        provider: &ProviderConfigAddr,
    ) -> bool {
        let instance = self.instance_mut(addr, provider);
        let deposed = instance.current.replace(replacement);
        match deposed {
            Some(mut old) => {
                old.status = ObjectStatus::Deposed;
                instance.deposed.insert(key.clone(), old);
                true
            }
            None => false,
        }
    }

    /// Every instance with its provider, in address order.
    #[must_use]
    pub fn instances(&self) -> Vec<(ResourceInstanceAddr, &ResourceInstanceState, &ProviderConfigAddr)> {
        self.modules
            .values()
            .flat_map(|module| module.resources.values())
            .flat_map(|resource| {
                resource.instances.iter().map(move |(key, instance)| {
                    (resource.addr.instance(key.clone()), instance, &resource.provider)
                })
            })
            .collect()
    }

    /// Recorded output value.
    #[must_use]
    pub fn output(&self, addr: &OutputAddr) -> Option<&OutputValue> {
        self.module(&addr.module)?.outputs.get(&addr.name)
    }

    /// Sets or removes an output value.
    pub fn set_output(&mut self, addr: &OutputAddr, value: Option<OutputValue>) {
        match value {
            Some(value) => {
                self.modules
                    .entry(addr.module.clone())
                    .or_default()
                    .outputs
                    .insert(addr.name.clone(), value);
            }
            None => {
                if let Some(module) = self.modules.get_mut(&addr.module) {
                    module.outputs.remove(&addr.name);
                }
                self.prune();
            }
        }
    }

    /// Removes empty instances, resources and modules.
    pub fn prune(&mut self) {
        for module in self.modules.values_mut() {
            for resource in module.resources.values_mut() {
                resource.instances.retain(|_, instance| !instance.is_empty());
            }
            module.resources.retain(|_, resource| !resource.instances.is_empty());
        }
        self.modules
            .retain(|_, module| !module.resources.is_empty() || !module.outputs.is_empty());
    }

    fn instance_mut(
        &mut self,
        addr: &ResourceInstanceAddr,
        provider: &ProviderConfigAddr,
    ) -> &mut ResourceInstanceState {
        let resource = self
            .modules
            .entry(addr.module().clone())
            .or_default()
            .resources
            .entry(addr.resource.local_name())
            .or_insert_with(|| ResourceState {
                addr: addr.resource.clone(),
                provider: provider.clone(),
                instances: BTreeMap::new(),
            });
        resource.provider = provider.clone();
        resource.instances.entry(addr.key.clone()).or_default()
    }

    fn instance_mut_existing(&mut self, addr: &ResourceInstanceAddr) -> Option<&mut ResourceInstanceState> {
        self.modules
            .get_mut(addr.module())?
            .resources
            .get_mut(&addr.resource.local_name())?
            .instances
            .get_mut(&addr.key)
    }
}

/// Kind of operation recorded in the state history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// A normal apply.
    Apply,
    /// An apply of a destroy plan.
    Destroy,
}

/// A state history entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    /// When the operation finished.
    pub timestamp: DateTime<Utc>,
    /// Operation kind.
    pub operation: OperationKind,
    /// Serial written by the operation.
    pub serial: u64,
    /// Whether every change was applied.
    pub success: bool,
    /// One-line summary.
    pub summary: String,
}

/// Persisted envelope around [`State`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateFile {
    /// State format version.
    pub version: u32,
    /// Incremented on every write.
    pub serial: u64,
    /// Identifies one line of state history across writes.
    pub lineage: String,
    /// When the file was last written.
    pub last_updated: DateTime<Utc>,
    /// The state itself.
    #[serde(default)]
    pub state: State,
    /// Recent operations, newest last.
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

impl StateFile {
    /// Creates a fresh state file with a new lineage.
    #[must_use]
    pub fn new(state: State) -> Self {
        Self {
            version: STATE_FORMAT_VERSION,
            serial: 0,
            lineage: Uuid::new_v4().to_string(),
            last_updated: Utc::now(),
            state,
            history: Vec::new(),
        }
    }

    /// The next file in this lineage, holding `state`.
    #[must_use]
    pub fn successor(&self, state: State) -> Self {
        Self {
            version: STATE_FORMAT_VERSION,
            serial: self.serial + 1,
            lineage: self.lineage.clone(),
            last_updated: Utc::now(),
            state,
            history: self.history.clone(),
        }
    }

    /// Appends a history entry, keeping only the most recent entries.
    pub fn add_history(&mut self, operation: OperationKind, success: bool, summary: impl Into<String>) {
        self.history.push(HistoryEntry {
            timestamp: Utc::now(),
            operation,
            serial: self.serial,
            success,
            summary: summary.into(),
        });
        if self.history.len() > MAX_HISTORY {
            let excess = self.history.len() - MAX_HISTORY;
            self.history.drain(..excess);
        }
    }

    /// Rejects files written by a newer format.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::VersionMismatch`] for an unsupported version.
    pub fn check_version(&self) -> Result<(), StateError> {
        if self.version > STATE_FORMAT_VERSION {
            return Err(StateError::VersionMismatch {
                expected: STATE_FORMAT_VERSION,
                found: self.version,
            });
        }
        Ok(())
    }
}
