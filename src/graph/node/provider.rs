//! Provider configuration and close vertices.

use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

use crate::addrs::ProviderConfigAddr;
use crate::config::ProviderConfig;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::graph::context::EvalContext;

use super::WalkOperation;

/// Instantiates and configures one provider configuration.
#[derive(Debug, Clone)]
pub struct ProviderNode {
    /// Provider configuration address.
    pub addr: ProviderConfigAddr,
    /// Declared block; `None` for an implied default configuration.
    pub config: Option<Arc<ProviderConfig>>,
}

impl ProviderNode {
    /// Creates a vertex for a provider configuration.
    #[must_use]
    pub const fn new(addr: ProviderConfigAddr, config: Option<Arc<ProviderConfig>>) -> Self {
        Self { addr, config }
    }

    fn settings(&self) -> Value {
        self.config
            .as_ref()
            .map_or_else(|| Value::Object(Map::new()), |c| c.config_value())
    }

    pub(super) async fn execute(&self, ctx: &EvalContext, op: WalkOperation) -> Diagnostics {
        let provider = match ctx.instantiate_provider(&self.addr) {
            Ok(provider) => provider,
            Err(err) => return Diagnostic::error(err).into(),
        };
        let settings = self.settings();

        if let Err(err) = provider.validate_provider_config(&settings).await {
            return Diagnostic::error(err).into();
        }
        if op == WalkOperation::Validate {
            return Diagnostics::new();
        }

        debug!("Configuring {}", self.addr);
        if let Err(err) = provider.configure(&settings).await {
            return Diagnostic::error(err).into();
        }
        ctx.register_provider(self.addr.clone(), provider);
        Diagnostics::new()
    }
}

/// Closes a provider after every vertex using it has finished.
#[derive(Debug, Clone)]
pub struct ProviderCloseNode {
    /// Provider configuration address.
    pub addr: ProviderConfigAddr,
}

impl ProviderCloseNode {
    pub(super) async fn execute(&self, ctx: &EvalContext) -> Diagnostics {
        let Some(provider) = ctx.take_provider(&self.addr) else {
            return Diagnostics::new();
        };
        match provider.close().await {
            Ok(()) => {
                info!("Closed {}", self.addr);
                Diagnostics::new()
            }
            Err(err) => Diagnostic::error(err).into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::provider::{MockResourceProvider, ProviderFactory, ResourceProvider};

    fn context(factory: ProviderFactory) -> EvalContext {
        EvalContext::new(Arc::new(Config::default()), Arc::new(factory))
    }

    #[tokio::test]
    async fn test_configure_registers_provider() {
        let mut mock = MockResourceProvider::new();
        mock.expect_validate_provider_config().times(1).returning(|_| Ok(()));
        mock.expect_configure().times(1).returning(|_| Ok(()));
        mock.expect_close().times(1).returning(|| Ok(()));
        let shared: Arc<dyn ResourceProvider> = Arc::new(mock);
        let ctx = context(ProviderFactory::new().with_instance("simple", shared));

        let addr = ProviderConfigAddr::root("simple");
        let diags = ProviderNode::new(addr.clone(), None).execute(&ctx, WalkOperation::Plan).await;
        assert!(!diags.has_errors());
        assert!(ctx.provider(&addr).is_ok());

        let diags = ProviderCloseNode { addr: addr.clone() }.execute(&ctx).await;
        assert!(!diags.has_errors());
        assert!(ctx.provider(&addr).is_err());
    }

    #[tokio::test]
    async fn test_validate_does_not_configure() {
        let mut mock = MockResourceProvider::new();
        mock.expect_validate_provider_config().times(1).returning(|_| Ok(()));
        mock.expect_configure().never();
        let shared: Arc<dyn ResourceProvider> = Arc::new(mock);
        let ctx = context(ProviderFactory::new().with_instance("simple", shared));

        let addr = ProviderConfigAddr::root("simple");
        let diags = ProviderNode::new(addr.clone(), None)
            .execute(&ctx, WalkOperation::Validate)
            .await;
        assert!(!diags.has_errors());
        assert!(ctx.provider(&addr).is_err());
    }

    #[tokio::test]
    async fn test_unknown_provider_type() {
        let ctx = context(ProviderFactory::new());
        let diags = ProviderNode::new(ProviderConfigAddr::root("cloud"), None)
            .execute(&ctx, WalkOperation::Plan)
            .await;
        assert!(diags.has_errors());
    }
}
