//! Module close vertices.

use crate::addrs::ModulePath;
use crate::diagnostics::Diagnostics;

/// Runs once everything in a module, and its child modules, has finished.
#[derive(Debug, Clone)]
pub struct ModuleCloseNode {
    /// The module being closed.
    pub module: ModulePath,
}

impl ModuleCloseNode {
    /// Graph key: `root` for the root module.
    #[must_use]
    pub fn key(&self) -> String {
        if self.module.is_root() {
            String::from("root")
        } else {
            format!("{} (close)", self.module)
        }
    }

    pub(super) fn execute(&self) -> Diagnostics {
        tracing::trace!("Closed {}", self.key());
        Diagnostics::new()
    }
}
