//! Shared evaluation context for one graph walk.

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::addrs::{OutputAddr, ProviderConfigAddr};
use crate::config::Config;
use crate::error::ProviderError;
use crate::plans::{Changes, SyncChanges};
use crate::provider::{
    ProviderFactory, ProviderResult, ProvisionerFactory, ResourceProvider, ResourceProvisioner,
};
use crate::state::{State, SyncState};

type ProviderMap = BTreeMap<ProviderConfigAddr, Arc<dyn ResourceProvider>>;
type ProvisionerMap = BTreeMap<String, Arc<dyn ResourceProvisioner>>;

/// Everything a vertex may read or mutate while it executes.
///
/// Each mutex section is a plain closure or a short method body, so no lock
/// is ever held across an `.await`.
pub struct EvalContext {
    config: Arc<Config>,
    state: SyncState,
    changes: SyncChanges,
    factory: Arc<ProviderFactory>,
    providers: Mutex<ProviderMap>,
    provisioner_factory: Arc<ProvisionerFactory>,
    provisioners: Mutex<ProvisionerMap>,
    input_variables: BTreeMap<String, Value>,
    variable_values: Mutex<BTreeMap<String, Value>>,
    output_values: Mutex<BTreeMap<OutputAddr, Option<Value>>>,
    refresh: bool,
}

impl EvalContext {
    /// Creates a context with empty state and changes.
    #[must_use]
    pub fn new(config: Arc<Config>, factory: Arc<ProviderFactory>) -> Self {
        Self {
            config,
            state: SyncState::default(),
            changes: SyncChanges::default(),
            factory,
            providers: Mutex::new(BTreeMap::new()),
            provisioner_factory: Arc::new(ProvisionerFactory::builtin()),
            provisioners: Mutex::new(BTreeMap::new()),
            input_variables: BTreeMap::new(),
            variable_values: Mutex::new(BTreeMap::new()),
            output_values: Mutex::new(BTreeMap::new()),
            refresh: false,
        }
    }

    /// Starts the walk from `state`.
    #[must_use]
    pub fn with_state(mut self, state: State) -> Self {
        self.state = SyncState::new(state);
        self
    }

    /// Starts the walk from previously planned `changes`.
    #[must_use]
    pub fn with_changes(mut self, changes: Changes) -> Self {
        self.changes = SyncChanges::new(changes);
        self
    }

    /// Root variable values supplied by the caller.
    #[must_use]
    pub fn with_variables(mut self, variables: BTreeMap<String, Value>) -> Self {
        self.input_variables = variables;
        self
    }

    /// Provisioner types available to resources; the built-in ones by
    /// default.
    #[must_use]
    pub fn with_provisioners(mut self, factory: Arc<ProvisionerFactory>) -> Self {
        self.provisioner_factory = factory;
        self
    }

    /// Refresh recorded objects through their providers before planning.
    #[must_use]
    pub const fn with_refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    /// The configuration being walked.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Working state.
    #[must_use]
    pub const fn state(&self) -> &SyncState {
        &self.state
    }

    /// Working change set.
    #[must_use]
    pub const fn changes(&self) -> &SyncChanges {
        &self.changes
    }

    /// Whether plan vertices refresh before planning.
    #[must_use]
    pub const fn refresh(&self) -> bool {
        self.refresh
    }

    /// Creates an unconfigured provider instance for `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::UnknownType`] if the factory has no
    /// constructor for the provider type.
    pub fn instantiate_provider(
        &self,
        addr: &ProviderConfigAddr,
    ) -> ProviderResult<Arc<dyn ResourceProvider>> {
        self.factory.instantiate(&addr.provider_type)
    }

    /// Creates an unconfigured instance used only to validate resource
    /// configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::UnknownType`] for an unregistered type.
    pub fn validation_provider(&self, provider_type: &str) -> ProviderResult<Arc<dyn ResourceProvider>> {
        self.factory.instantiate(provider_type)
    }

    /// Makes a configured provider available to resource vertices.
    pub fn register_provider(&self, addr: ProviderConfigAddr, provider: Arc<dyn ResourceProvider>) {
        debug!("Provider {addr} ready");
        self.providers.lock().insert(addr, provider);
    }

    /// The configured provider for `addr`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::NotConfigured`] if its provider vertex has
    /// not run (or failed).
    pub fn provider(&self, addr: &ProviderConfigAddr) -> ProviderResult<Arc<dyn ResourceProvider>> {
        self.providers.lock()
            .get(addr)
            .cloned()
            .ok_or_else(|| ProviderError::NotConfigured {
                provider: addr.to_string(),
            })
    }

    /// Removes and returns the provider for `addr`, for closing.
    pub fn take_provider(&self, addr: &ProviderConfigAddr) -> Option<Arc<dyn ResourceProvider>> {
        self.providers.lock().remove(addr)
    }

    /// The provisioner of `provisioner_type`, created on first use and shared
    /// for the rest of the walk.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::UnknownProvisioner`] for an unregistered type.
    pub fn provisioner(&self, provisioner_type: &str) -> ProviderResult<Arc<dyn ResourceProvisioner>> {
        let mut provisioners = self.provisioners.lock();
        if let Some(provisioner) = provisioners.get(provisioner_type) {
            return Ok(Arc::clone(provisioner));
        }
        let provisioner = self.provisioner_factory.instantiate(provisioner_type)?;
        debug!("Provisioner {provisioner_type} ready");
        provisioners.insert(provisioner_type.to_string(), Arc::clone(&provisioner));
        Ok(provisioner)
    }

    /// Closes every provisioner used during the walk.
    ///
    /// # Errors
    ///
    /// Returns the first failure; the remaining provisioners are still
    /// closed.
    pub async fn close_provisioners(&self) -> ProviderResult<()> {
        let provisioners = std::mem::take(&mut *self.provisioners.lock());
        let mut result = Ok(());
        for (provisioner_type, provisioner) in provisioners {
            if let Err(e) = provisioner.close().await {
                warn!("Failed to close provisioner {provisioner_type}: {e}");
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    /// Value supplied by the caller for root variable `name`.
    #[must_use]
    pub fn input_variable(&self, name: &str) -> Option<&Value> {
        self.input_variables.get(name)
    }

    /// Records the resolved value of a root variable.
    pub fn set_variable(&self, name: impl Into<String>, value: Value) {
        self.variable_values.lock().insert(name.into(), value);
    }

    /// Resolved value of a root variable.
    #[must_use]
    pub fn variable(&self, name: &str) -> Option<Value> {
        self.variable_values.lock().get(name).cloned()
    }

    /// Every resolved root variable.
    #[must_use]
    pub fn variable_values(&self) -> BTreeMap<String, Value> {
        self.variable_values.lock().clone()
    }

    /// Records an evaluated output; `None` means known only after apply.
    pub fn set_output_value(&self, addr: OutputAddr, value: Option<Value>) {
        self.output_values.lock().insert(addr, value);
    }

    /// Evaluated output value: outer `None` when the output has not been
    /// evaluated, inner `None` when its value is unknown.
    #[must_use]
    pub fn output_value(&self, addr: &OutputAddr) -> Option<Option<Value>> {
        self.output_values.lock().get(addr).cloned()
    }
}

impl std::fmt::Debug for EvalContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvalContext")
            .field("providers", &self.providers.lock().keys().collect::<Vec<_>>())
            .field("provisioners", &self.provisioners.lock().keys().collect::<Vec<_>>())
            .field("refresh", &self.refresh)
            .finish_non_exhaustive()
    }
}
