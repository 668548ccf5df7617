//! Root variable vertices.

use std::sync::Arc;
use tracing::debug;

use crate::addrs::VariableAddr;
use crate::config::VariableConfig;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::ConfigError;
use crate::graph::context::EvalContext;

/// Resolves one root variable from caller input or its default.
#[derive(Debug, Clone)]
pub struct VariableNode {
    /// Variable address.
    pub addr: VariableAddr,
    /// Declared block.
    pub config: Arc<VariableConfig>,
}

impl VariableNode {
    pub(super) fn execute(&self, ctx: &EvalContext) -> Diagnostics {
        let value = ctx
            .input_variable(&self.addr.name)
            .cloned()
            .or_else(|| self.config.default.clone());
        let Some(value) = value else {
            return Diagnostic::error(ConfigError::MissingVariable {
                name: self.addr.name.clone(),
            })
            .into();
        };
        debug!("Resolved {}", self.addr);
        ctx.set_variable(self.addr.name.clone(), value);
        Diagnostics::new()
    }
}
