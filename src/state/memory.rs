//! In-memory state storage backend.
//!
//! Used by tests and embedders that manage persistence themselves. It counts
//! lock and unlock calls so callers can check lock discipline.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, warn};

use crate::error::{OrchestratorError, Result, StateError};

use super::lock::LockInfo;
use super::store::StateStore;
use super::types::StateFile;

/// In-memory state store.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    file: Mutex<Option<StateFile>>,
    lock: Mutex<Option<LockInfo>>,
    lock_calls: AtomicUsize,
    unlock_calls: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryStateStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store already holding `file`.
    #[must_use]
    pub fn with_file(file: StateFile) -> Self {
        Self {
            file: Mutex::new(Some(file)),
            ..Self::default()
        }
    }

    /// Number of successful lock acquisitions.
    #[must_use]
    pub fn lock_count(&self) -> usize {
        self.lock_calls.load(Ordering::SeqCst)
    }

    /// Number of successful unlocks, forced or not.
    #[must_use]
    pub fn unlock_count(&self) -> usize {
        self.unlock_calls.load(Ordering::SeqCst)
    }

    /// Number of writes.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Returns true while a lock is held.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.lock.lock().is_some()
    }

    fn remove_lock(&self, lock_id: &str) -> Result<()> {
        let mut held = self.lock.lock();
        match held.as_ref() {
            None => Err(OrchestratorError::State(StateError::NotLocked)),
            Some(existing) if existing.id != lock_id => {
                Err(OrchestratorError::State(StateError::LockMismatch {
                    held: existing.id.clone(),
                    requested: lock_id.to_string(),
                }))
            }
            Some(_) => {
                *held = None;
                self.unlock_calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn read(&self) -> Result<StateFile> {
        self.file.lock().clone().ok_or_else(|| {
            OrchestratorError::State(StateError::NotFound {
                location: String::from("memory"),
            })
        })
    }

    async fn write(&self, file: &StateFile) -> Result<()> {
        debug!("Writing state serial {} to memory", file.serial);
        *self.file.lock() = Some(file.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn lock(&self, info: &LockInfo) -> Result<String> {
        let mut held = self.lock.lock();
        if let Some(existing) = held.as_ref() {
            return Err(OrchestratorError::State(StateError::LockedByOther {
                lock_id: existing.id.clone(),
                holder: existing.holder.clone(),
                since: existing.created.to_rfc3339(),
            }));
        }
        let mut info = info.clone();
        info.path = String::from("memory");
        let id = info.id.clone();
        *held = Some(info);
        self.lock_calls.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    async fn unlock(&self, lock_id: &str) -> Result<()> {
        self.remove_lock(lock_id)
    }

    async fn force_unlock(&self, lock_id: &str) -> Result<()> {
        self.remove_lock(lock_id)?;
        warn!("Force-unlocked in-memory state lock: {lock_id}");
        Ok(())
    }

    async fn lock_info(&self) -> Result<Option<LockInfo>> {
        Ok(self.lock.lock().clone())
    }

    fn backend_type(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::State;

    #[tokio::test]
    async fn test_lock_counts_and_conflict() {
        let store = MemoryStateStore::new();
        let id = store.lock(&LockInfo::new("plan")).await.expect("lock");
        assert!(store.is_locked());
        assert!(store.lock(&LockInfo::new("apply")).await.is_err());

        store.unlock(&id).await.expect("unlock");
        assert!(!store.is_locked());
        assert_eq!(store.lock_count(), 1);
        assert_eq!(store.unlock_count(), 1);
    }

    #[tokio::test]
    async fn test_read_write() {
        let store = MemoryStateStore::new();
        assert!(store.read().await.is_err());

        let file = StateFile::new(State::new());
        store.write(&file).await.expect("write");
        assert_eq!(store.read().await.expect("read"), file);
        assert_eq!(store.write_count(), 1);
    }
}
