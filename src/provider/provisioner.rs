//! Resource provisioners.
//!
//! A provisioner runs once against a newly created object, after its provider
//! has created it. Provisioners are created per walk through a
//! [`ProvisionerFactory`] keyed by provisioner type.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::ProviderError;

use super::ProviderResult;
use super::local_exec::LocalExecProvisioner;

/// Input to [`ResourceProvisioner::provision_resource`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisionRequest {
    /// Address of the created instance.
    pub addr: String,
    /// Provisioner settings from configuration.
    pub config: Value,
    /// The object as recorded after create.
    pub object: Value,
}

/// Operations every provisioner implements.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResourceProvisioner: Send + Sync {
    /// Checks provisioner settings without running anything.
    async fn validate_provisioner_config(&self, config: &Value) -> ProviderResult<()>;

    /// Runs against a created object.
    async fn provision_resource(&self, request: ProvisionRequest) -> ProviderResult<()>;

    /// Releases the provisioner; called once per walk.
    async fn close(&self) -> ProviderResult<()>;
}

/// Builds a provisioner instance.
pub type ProvisionerConstructor = Arc<dyn Fn() -> Arc<dyn ResourceProvisioner> + Send + Sync>;

/// Maps provisioner types to constructors.
#[derive(Clone, Default)]
pub struct ProvisionerFactory {
    constructors: BTreeMap<String, ProvisionerConstructor>,
}

impl ProvisionerFactory {
    /// Creates an empty factory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a factory with `local-exec` registered.
    #[must_use]
    pub fn builtin() -> Self {
        Self::new().with_provisioner(LocalExecProvisioner::TYPE, || {
            Arc::new(LocalExecProvisioner::new()) as Arc<dyn ResourceProvisioner>
        })
    }

    /// Registers a constructor, replacing any earlier one for the type.
    #[must_use]
    pub fn with_provisioner(
        mut self,
        provisioner_type: impl Into<String>,
        constructor: impl Fn() -> Arc<dyn ResourceProvisioner> + Send + Sync + 'static,
    ) -> Self {
        self.constructors
            .insert(provisioner_type.into(), Arc::new(constructor));
        self
    }

    /// Registers a shared instance returned for every instantiation.
    #[must_use]
    pub fn with_instance(
        self,
        provisioner_type: impl Into<String>,
        instance: Arc<dyn ResourceProvisioner>,
    ) -> Self {
        self.with_provisioner(provisioner_type, move || Arc::clone(&instance))
    }

    /// Registered types in sorted order.
    #[must_use]
    pub fn types(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }

    /// Creates a provisioner instance.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::UnknownProvisioner`] for an unregistered type.
    pub fn instantiate(&self, provisioner_type: &str) -> ProviderResult<Arc<dyn ResourceProvisioner>> {
        let constructor = self
            .constructors
            .get(provisioner_type)
            .ok_or_else(|| ProviderError::UnknownProvisioner {
                provisioner_type: provisioner_type.to_string(),
            })?;
        Ok(constructor())
    }
}

impl fmt::Debug for ProvisionerFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisionerFactory")
            .field("types", &self.types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_has_local_exec() {
        let factory = ProvisionerFactory::builtin();
        assert_eq!(factory.types(), vec!["local-exec"]);
        assert!(factory.instantiate("local-exec").is_ok());
    }

    #[test]
    fn test_unknown_provisioner_type() {
        let err = ProvisionerFactory::new()
            .instantiate("remote-exec")
            .err()
            .expect("unknown");
        assert!(matches!(err, ProviderError::UnknownProvisioner { ref provisioner_type } if provisioner_type == "remote-exec"));
    }

    #[test]
    fn test_shared_instance() {
        let shared: Arc<dyn ResourceProvisioner> = Arc::new(MockResourceProvisioner::new());
        let factory = ProvisionerFactory::new().with_instance("mock", Arc::clone(&shared));
        let a = factory.instantiate("mock").expect("mock");
        assert!(Arc::ptr_eq(&a, &shared));
    }
}
