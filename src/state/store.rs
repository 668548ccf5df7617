//! State store trait definition.
//!
//! This module defines the common interface for state storage backends.

use async_trait::async_trait;

use crate::error::Result;
use super::lock::LockInfo;
use super::types::StateFile;

/// Trait for state storage backends.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Reads the stored state file.
    ///
    /// Returns [`crate::error::StateError::NotFound`] if nothing has been
    /// written yet.
    async fn read(&self) -> Result<StateFile>;

    /// Persists a state file.
    async fn write(&self, file: &StateFile) -> Result<()>;

    /// Acquires the lock.
    ///
    /// Returns the lock id on success, or
    /// [`crate::error::StateError::LockedByOther`] naming the current holder.
    async fn lock(&self, info: &LockInfo) -> Result<String>;

    /// Releases a lock taken by this process.
    async fn unlock(&self, lock_id: &str) -> Result<()>;

    /// Removes a lock regardless of who holds it, provided the id matches.
    async fn force_unlock(&self, lock_id: &str) -> Result<()>;

    /// Gets current lock information if locked.
    async fn lock_info(&self) -> Result<Option<LockInfo>>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;
}

#[async_trait]
impl StateStore for Box<dyn StateStore> {
    async fn read(&self) -> Result<StateFile> {
        (**self).read().await
    }

    async fn write(&self, file: &StateFile) -> Result<()> {
        (**self).write(file).await
    }

    async fn lock(&self, info: &LockInfo) -> Result<String> {
        (**self).lock(info).await
    }

    async fn unlock(&self, lock_id: &str) -> Result<()> {
        (**self).unlock(lock_id).await
    }

    async fn force_unlock(&self, lock_id: &str) -> Result<()> {
        (**self).force_unlock(lock_id).await
    }

    async fn lock_info(&self) -> Result<Option<LockInfo>> {
        (**self).lock_info().await
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }
}
