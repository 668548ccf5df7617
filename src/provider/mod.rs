//! Resource providers.
//!
//! A provider owns the remote side of a resource type: it validates
//! configuration, refreshes recorded objects, plans changes and applies them.
//! Providers are created per walk through a [`ProviderFactory`] keyed by
//! provider type. Provisioners run against objects once they are created.

mod local_exec;
mod provisioner;
mod retry;
mod simple;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::ProviderError;
use crate::plans::AttributePath;

pub use local_exec::{ADDRESS_ENV, LocalExecProvisioner, OBJECT_ENV};
pub use provisioner::{ProvisionRequest, ProvisionerConstructor, ProvisionerFactory, ResourceProvisioner};
#[cfg(test)]
pub use provisioner::MockResourceProvisioner;
pub use retry::{MAX_ATTEMPTS, with_retry};
pub use simple::SimpleProvider;

/// Result of a provider call.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Input to [`ResourceProvider::plan_resource_change`].
#[derive(Debug, Clone, PartialEq)]
pub struct PlanRequest {
    /// Resource type.
    pub type_name: String,
    /// Object currently recorded, `None` when creating.
    pub prior: Option<Value>,
    /// Desired object from configuration, `None` when destroying.
    pub proposed: Option<Value>,
}

/// Output of [`ResourceProvider::plan_resource_change`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlannedChange {
    /// Object expected after apply, `None` when destroying.
    pub planned: Option<Value>,
    /// Attributes whose values are only known after apply.
    pub unknown: Vec<AttributePath>,
    /// Attributes whose change cannot be made in place.
    pub requires_replace: Vec<AttributePath>,
}

/// Input to [`ResourceProvider::apply_resource_change`].
#[derive(Debug, Clone, PartialEq)]
pub struct ApplyRequest {
    /// Resource type.
    pub type_name: String,
    /// Object currently recorded, `None` when creating.
    pub prior: Option<Value>,
    /// Planned object, `None` when destroying.
    pub planned: Option<Value>,
}

/// Operations every provider implements.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Checks provider settings without contacting anything.
    async fn validate_provider_config(&self, config: &Value) -> ProviderResult<()>;

    /// Configures the provider for use.
    async fn configure(&self, config: &Value) -> ProviderResult<()>;

    /// Checks the configured attributes of a resource.
    async fn validate_resource_config(&self, type_name: &str, config: &Value) -> ProviderResult<()>;

    /// Refreshes a recorded object; `None` means it no longer exists.
    async fn read_resource(&self, type_name: &str, prior: &Value) -> ProviderResult<Option<Value>>;

    /// Plans the change from `prior` to `proposed`.
    async fn plan_resource_change(&self, request: PlanRequest) -> ProviderResult<PlannedChange>;

    /// Carries out a planned change, returning the new object (`None` once
    /// destroyed).
    async fn apply_resource_change(&self, request: ApplyRequest) -> ProviderResult<Option<Value>>;

    /// Releases the provider; called once per walk.
    async fn close(&self) -> ProviderResult<()>;
}

/// Builds a provider instance.
pub type ProviderConstructor =
    Arc<dyn Fn() -> ProviderResult<Arc<dyn ResourceProvider>> + Send + Sync>;

/// Maps provider types to constructors.
#[derive(Clone, Default)]
pub struct ProviderFactory {
    constructors: BTreeMap<String, ProviderConstructor>,
}

impl ProviderFactory {
    /// Creates an empty factory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a factory with the built-in providers registered.
    #[must_use]
    pub fn builtin() -> Self {
        Self::new().with_provider(SimpleProvider::TYPE, || {
            Ok(Arc::new(SimpleProvider::new()) as Arc<dyn ResourceProvider>)
        })
    }

    /// Registers a constructor, replacing any earlier one for the type.
    #[must_use]
    pub fn with_provider(
        mut self,
        provider_type: impl Into<String>,
        constructor: impl Fn() -> ProviderResult<Arc<dyn ResourceProvider>> + Send + Sync + 'static,
    ) -> Self {
        self.register(provider_type, constructor);
        self
    }

    /// Registers a constructor, replacing any earlier one for the type.
    pub fn register(
        &mut self,
        provider_type: impl Into<String>,
        constructor: impl Fn() -> ProviderResult<Arc<dyn ResourceProvider>> + Send + Sync + 'static,
    ) {
        self.constructors
            .insert(provider_type.into(), Arc::new(constructor));
    }

    /// Registers a shared instance returned for every instantiation.
    #[must_use]
    pub fn with_instance(self, provider_type: impl Into<String>, instance: Arc<dyn ResourceProvider>) -> Self {
        self.with_provider(provider_type, move || Ok(Arc::clone(&instance)))
    }

    /// Returns true if the type has a constructor.
    #[must_use]
    pub fn has(&self, provider_type: &str) -> bool {
        self.constructors.contains_key(provider_type)
    }

    /// Registered types in sorted order.
    #[must_use]
    pub fn types(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }

    /// Creates a provider instance.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::UnknownType`] for an unregistered type, or the
    /// constructor's own error.
    pub fn instantiate(&self, provider_type: &str) -> ProviderResult<Arc<dyn ResourceProvider>> {
        let constructor = self
            .constructors
            .get(provider_type)
            .ok_or_else(|| ProviderError::UnknownType {
                provider_type: provider_type.to_string(),
            })?;
        constructor()
    }
}

impl fmt::Debug for ProviderFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderFactory")
            .field("types", &self.types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_has_simple() {
        let factory = ProviderFactory::builtin();
        assert!(factory.has("simple"));
        assert_eq!(factory.types(), vec!["simple"]);
        assert!(factory.instantiate("simple").is_ok());
    }

    #[test]
    fn test_unknown_type() {
        let factory = ProviderFactory::new();
        assert!(matches!(
            factory.instantiate("cloud"),
            Err(ProviderError::UnknownType { provider_type }) if provider_type == "cloud"
        ));
    }

    #[test]
    fn test_with_instance_shares_one_provider() {
        let shared: Arc<dyn ResourceProvider> = Arc::new(SimpleProvider::new());
        let factory = ProviderFactory::new().with_instance("simple", Arc::clone(&shared));
        let a = factory.instantiate("simple").expect("instance");
        let b = factory.instantiate("simple").expect("instance");
        assert!(Arc::ptr_eq(&a, &b));
    }
}
