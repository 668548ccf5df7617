//! Planned changes to resource instances and outputs.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::addrs::{DeposedKey, OutputAddr, ProviderConfigAddr, ResourceInstanceAddr};

/// Path to a nested attribute, one segment per object key or array index.
pub type AttributePath = Vec<String>;

/// What a change does to its object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Nothing to do.
    NoOp,
    /// Create a new object.
    Create,
    /// Read a data source.
    Read,
    /// Update the object in place.
    Update,
    /// Replace: destroy the old object, then create the new one.
    DeleteThenCreate,
    /// Replace: create the new object, then destroy the old one.
    CreateThenDelete,
    /// Destroy the object.
    Delete,
}

impl Action {
    /// Returns true for either replace ordering.
    #[must_use]
    pub const fn is_replace(self) -> bool {
        matches!(self, Self::DeleteThenCreate | Self::CreateThenDelete)
    }

    /// Returns true if the action destroys an object.
    #[must_use]
    pub const fn destroys(self) -> bool {
        matches!(
            self,
            Self::Delete | Self::DeleteThenCreate | Self::CreateThenDelete
        )
    }

    /// Primitive actions in execution order, as used by the JSON report.
    #[must_use]
    pub const fn primitives(self) -> &'static [&'static str] {
        match self {
            Self::NoOp => &["no-op"],
            Self::Create => &["create"],
            Self::Read => &["read"],
            Self::Update => &["update"],
            Self::DeleteThenCreate => &["delete", "create"],
            Self::CreateThenDelete => &["create", "delete"],
            Self::Delete => &["delete"],
        }
    }

    /// Single-character marker used in text output.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::NoOp => " ",
            Self::Create => "+",
            Self::Read => "<=",
            Self::Update => "~",
            Self::DeleteThenCreate => "-/+",
            Self::CreateThenDelete => "+/-",
            Self::Delete => "-",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoOp => "no-op",
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::DeleteThenCreate => "replace (destroy first)",
            Self::CreateThenDelete => "replace (create first)",
            Self::Delete => "destroy",
        };
        f.write_str(s)
    }
}

/// Planned change to one resource instance object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceInstanceChange {
    /// Instance address.
    pub addr: ResourceInstanceAddr,
    /// Set when the change targets a deposed object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deposed_key: Option<DeposedKey>,
    /// Provider configuration that will carry out the change.
    pub provider: ProviderConfigAddr,
    /// What to do.
    pub action: Action,
    /// Object before the change, `None` when creating.
    pub before: Option<Value>,
    /// Planned object after the change, `None` when deleting.
    pub after: Option<Value>,
    /// Attributes of `after` only known once the change is applied.
    #[serde(default)]
    pub after_unknown: Vec<AttributePath>,
    /// Attributes to redact in output.
    #[serde(default)]
    pub sensitive: Vec<AttributePath>,
    /// Attributes whose change forced a replace.
    #[serde(default)]
    pub requires_replace: Vec<AttributePath>,
}

impl ResourceInstanceChange {
    /// A `Delete` change for an existing object.
    #[must_use]
    pub const fn delete(
        addr: ResourceInstanceAddr,
        deposed_key: Option<DeposedKey>,
        provider: ProviderConfigAddr,
        before: Value,
    ) -> Self {
        Self {
            addr,
            deposed_key,
            provider,
            action: Action::Delete,
            before: Some(before),
            after: None,
            after_unknown: Vec::new(),
            sensitive: Vec::new(),
            requires_replace: Vec::new(),
        }
    }

    /// A `NoOp` change for an absent object.
    #[must_use]
    pub const fn noop(
        addr: ResourceInstanceAddr,
        deposed_key: Option<DeposedKey>,
        provider: ProviderConfigAddr,
    ) -> Self {
        Self {
            addr,
            deposed_key,
            provider,
            action: Action::NoOp,
            before: None,
            after: None,
            after_unknown: Vec::new(),
            sensitive: Vec::new(),
            requires_replace: Vec::new(),
        }
    }

    fn same_object(&self, addr: &ResourceInstanceAddr, deposed: Option<&DeposedKey>) -> bool {
        &self.addr == addr && self.deposed_key.as_ref() == deposed
    }
}

impl fmt::Display for ResourceInstanceChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.addr)?;
        if let Some(key) = &self.deposed_key {
            write!(f, " (deposed {key})")?;
        }
        write!(f, ": {}", self.action)
    }
}

/// Planned change to an output value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputChange {
    /// Output address.
    pub addr: OutputAddr,
    /// What happens to the value.
    pub action: Action,
    /// Value before the change.
    pub before: Option<Value>,
    /// Value after the change.
    pub after: Option<Value>,
    /// Hide the value in output.
    #[serde(default)]
    pub sensitive: bool,
}

/// Counts of changes by effect, as shown after a plan or apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSummary {
    /// Objects to create.
    pub add: usize,
    /// Objects to update in place.
    pub change: usize,
    /// Objects to destroy.
    pub destroy: usize,
}

impl fmt::Display for ChangeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} to add, {} to change, {} to destroy",
            self.add, self.change, self.destroy
        )
    }
}

/// Every planned change of one plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Changes {
    /// Resource instance changes.
    #[serde(default)]
    pub resources: Vec<ResourceInstanceChange>,
    /// Output changes.
    #[serde(default)]
    pub outputs: Vec<OutputChange>,
}

impl Changes {
    /// Creates an empty change set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            resources: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Returns true if nothing but no-ops is planned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.iter().all(|c| c.action == Action::NoOp)
            && self.outputs.iter().all(|c| c.action == Action::NoOp)
    }

    /// Change for one object, if planned.
    #[must_use]
    pub fn resource_change(
        &self,
        addr: &ResourceInstanceAddr,
        deposed: Option<&DeposedKey>,
    ) -> Option<&ResourceInstanceChange> {
        self.resources.iter().find(|c| c.same_object(addr, deposed))
    }

    /// Records a change, replacing any earlier change for the same object.
    pub fn put_resource_change(&mut self, change: ResourceInstanceChange) {
        let deposed = change.deposed_key.clone();
        self.resources
            .retain(|c| !c.same_object(&change.addr, deposed.as_ref()));
        self.resources.push(change);
    }

    /// Removes the change for one object.
    pub fn remove_resource_change(
        &mut self,
        addr: &ResourceInstanceAddr,
        deposed: Option<&DeposedKey>,
    ) -> Option<ResourceInstanceChange> {
        let index = self.resources.iter().position(|c| c.same_object(addr, deposed))?;
        Some(self.resources.remove(index))
    }

    /// Change for one output, if planned.
    #[must_use]
    pub fn output_change(&self, addr: &OutputAddr) -> Option<&OutputChange> {
        self.outputs.iter().find(|c| &c.addr == addr)
    }

    /// Records an output change, replacing any earlier one.
    pub fn put_output_change(&mut self, change: OutputChange) {
        self.outputs.retain(|c| c.addr != change.addr);
        self.outputs.push(change);
    }

    /// Counts resource changes by effect.
    #[must_use]
    pub fn summary(&self) -> ChangeSummary {
        let mut summary = ChangeSummary::default();
        for change in &self.resources {
            match change.action {
                Action::Create => summary.add += 1,
                Action::Update => summary.change += 1,
                Action::DeleteThenCreate | Action::CreateThenDelete => {
                    summary.add += 1;
                    summary.destroy += 1;
                }
                Action::Delete => summary.destroy += 1,
                Action::NoOp | Action::Read => {}
            }
        }
        summary
    }

    /// Sorts changes by address so output does not depend on walk order.
    pub fn sort(&mut self) {
        self.resources.sort_by(|a, b| {
            (&a.addr, &a.deposed_key).cmp(&(&b.addr, &b.deposed_key))
        });
        self.outputs.sort_by(|a, b| a.addr.cmp(&b.addr));
    }
}

/// [`Changes`] behind a mutex, shared by the vertices of one walk.
#[derive(Debug, Default)]
pub struct SyncChanges {
    inner: Mutex<Changes>,
}

impl SyncChanges {
    /// Wraps a change set.
    #[must_use]
    pub const fn new(changes: Changes) -> Self {
        Self {
            inner: Mutex::new(changes),
        }
    }

    /// Records a resource change.
    pub fn put_resource_change(&self, change: ResourceInstanceChange) {
        self.inner.lock().put_resource_change(change);
    }

    /// Copy of the change for one object.
    #[must_use]
    pub fn resource_change(
        &self,
        addr: &ResourceInstanceAddr,
        deposed: Option<&DeposedKey>,
    ) -> Option<ResourceInstanceChange> {
        self.inner.lock().resource_change(addr, deposed).cloned()
    }

    /// Removes the change for one object.
    pub fn remove_resource_change(
        &self,
        addr: &ResourceInstanceAddr,
        deposed: Option<&DeposedKey>,
    ) -> Option<ResourceInstanceChange> {
        self.inner.lock().remove_resource_change(addr, deposed)
    }

    /// Records an output change.
    pub fn put_output_change(&self, change: OutputChange) {
        self.inner.lock().put_output_change(change);
    }

    /// Sorted copy of all changes.
    #[must_use]
    pub fn snapshot(&self) -> Changes {
        let mut changes = self.inner.lock().clone();
        changes.sort();
        changes
    }
}
