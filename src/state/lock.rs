//! State locking for concurrent access protection.
//!
//! Locks are advisory: every operation that reads and then writes state takes
//! the lock first and releases it on every exit path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Information about a state lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    /// Unique lock identifier.
    pub id: String,
    /// Operation holding the lock (`plan`, `apply`, ...).
    pub operation: String,
    /// Who holds the lock.
    pub holder: String,
    /// Version of the tool that took the lock.
    pub version: String,
    /// When the lock was acquired.
    pub created: DateTime<Utc>,
    /// Location of the locked state, filled in by the store.
    #[serde(default)]
    pub path: String,
    /// Free-form note.
    #[serde(default)]
    pub info: String,
}

impl LockInfo {
    /// Creates lock info for an operation run by the current process.
    #[must_use]
    pub fn new(operation: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            operation: operation.to_string(),
            holder: generate_holder_id(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            created: Utc::now(),
            path: String::new(),
            info: String::new(),
        }
    }

    /// Sets a free-form note.
    #[must_use]
    pub fn with_info(mut self, info: impl Into<String>) -> Self {
        self.info = info.into();
        self
    }

    /// Seconds since the lock was taken.
    #[must_use]
    pub fn age_secs(&self) -> i64 {
        (Utc::now() - self.created).num_seconds().max(0)
    }
}

impl std::fmt::Display for LockInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ID: {}\nPath: {}\nOperation: {}\nWho: {}\nVersion: {}\nCreated: {}",
            self.id,
            self.path,
            self.operation,
            self.holder,
            self.version,
            self.created.to_rfc3339()
        )?;
        if !self.info.is_empty() {
            write!(f, "\nInfo: {}", self.info)?;
        }
        Ok(())
    }
}

/// Generates a unique holder identifier for the current process.
#[must_use]
pub fn generate_holder_id() -> String {
    let hostname = hostname::get().map_or_else(|_| String::from("unknown"), |h| h.to_string_lossy().to_string());

    let pid = std::process::id();
    let uuid = &Uuid::new_v4().to_string()[..8];

    format!("{hostname}-{pid}-{uuid}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_lock_info() {
        let info = LockInfo::new("apply").with_info("nightly");
        assert_eq!(info.operation, "apply");
        assert_eq!(info.info, "nightly");
        assert!(info.age_secs() <= 1);
        assert!(info.to_string().contains("Operation: apply"));
    }

    #[test]
    fn test_holder_ids_are_unique() {
        let a = generate_holder_id();
        let b = generate_holder_id();
        assert_ne!(a, b);
        assert!(a.contains(&std::process::id().to_string()));
    }
}
