//! Local file-based state storage backend.
//!
//! State lives in `.halldyll/state.json`; the lock is a sibling
//! `state.lock` file created exclusively so two processes cannot both win.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{OrchestratorError, Result, StateError};

use super::lock::LockInfo;
use super::store::StateStore;
use super::types::StateFile;

/// Default state directory name.
const STATE_DIR: &str = ".halldyll";

/// State file name.
const STATE_FILE: &str = "state.json";

/// Lock file name.
const LOCK_FILE: &str = "state.lock";

/// Local file-based state store.
#[derive(Debug)]
pub struct LocalStateStore {
    /// Base directory for state files.
    base_dir: PathBuf,
    /// Path to the state file.
    state_path: PathBuf,
    /// Path to the lock file.
    lock_path: PathBuf,
}

impl LocalStateStore {
    /// Creates a new local state store with default paths.
    ///
    /// # Errors
    ///
    /// Returns an error if the base directory cannot be determined.
    pub fn new() -> Result<Self> {
        let base_dir = std::env::current_dir()
            .map_err(|e| OrchestratorError::internal(format!("Cannot determine current directory: {e}")))?
            .join(STATE_DIR);

        Ok(Self::with_base_dir(base_dir))
    }

    /// Creates a new local state store with a custom base directory.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let state_path = base_dir.join(STATE_FILE);
        let lock_path = base_dir.join(LOCK_FILE);

        Self {
            base_dir,
            state_path,
            lock_path,
        }
    }

    /// Creates a new local state store from a custom state file path.
    #[must_use]
    pub fn with_state_path(state_path: impl Into<PathBuf>) -> Self {
        let state_path = state_path.into();
        let base_dir = state_path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        let lock_path = state_path.with_extension("lock");

        Self {
            base_dir,
            state_path,
            lock_path,
        }
    }

    /// Path to the state file.
    #[must_use]
    pub fn state_path(&self) -> &Path {
        &self.state_path
    }

    /// Ensures the state directory exists.
    async fn ensure_dir(&self) -> Result<()> {
        if !self.base_dir.exists() {
            debug!("Creating state directory: {}", self.base_dir.display());
            fs::create_dir_all(&self.base_dir).await?;
        }
        Ok(())
    }

    /// Reads the lock file if it exists.
    async fn read_lock_file(&self) -> Result<Option<LockInfo>> {
        let content = match fs::read_to_string(&self.lock_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(OrchestratorError::State(StateError::Corrupted {
                    message: format!("Failed to read lock file: {e}"),
                }));
            }
        };

        let lock_info: LockInfo = serde_json::from_str(&content).map_err(|e| {
            OrchestratorError::State(StateError::Corrupted {
                message: format!("Failed to parse lock file: {e}"),
            })
        })?;

        Ok(Some(lock_info))
    }

    /// Deletes the lock file after checking the id.
    async fn remove_lock(&self, lock_id: &str) -> Result<()> {
        let Some(existing) = self.read_lock_file().await? else {
            return Err(OrchestratorError::State(StateError::NotLocked));
        };
        if existing.id != lock_id {
            return Err(OrchestratorError::State(StateError::LockMismatch {
                held: existing.id,
                requested: lock_id.to_string(),
            }));
        }
        fs::remove_file(&self.lock_path).await.map_err(|e| {
            OrchestratorError::State(StateError::LockFailed {
                message: format!("Failed to delete lock file: {e}"),
            })
        })
    }
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn read(&self) -> Result<StateFile> {
        let content = match fs::read_to_string(&self.state_path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("State file does not exist: {}", self.state_path.display());
                return Err(OrchestratorError::State(StateError::NotFound {
                    location: self.state_path.display().to_string(),
                }));
            }
            Err(e) => {
                return Err(OrchestratorError::State(StateError::Corrupted {
                    message: format!("Failed to read state file: {e}"),
                }));
            }
        };

        info!("Loading state from: {}", self.state_path.display());

        let file: StateFile = serde_json::from_str(&content).map_err(|e| {
            OrchestratorError::State(StateError::Corrupted {
                message: format!("Failed to parse state file: {e}"),
            })
        })?;
        file.check_version()?;

        Ok(file)
    }

    async fn write(&self, file: &StateFile) -> Result<()> {
        self.ensure_dir().await?;

        info!(
            "Saving state serial {} to: {}",
            file.serial,
            self.state_path.display()
        );

        let content = serde_json::to_string_pretty(file)
            .map_err(|e| StateError::serialization(format!("Failed to serialize state: {e}")))?;

        // Write to a temporary file first, then rename for atomicity
        let temp_path = self.state_path.with_extension("tmp");

        let mut temp = fs::File::create(&temp_path).await?;
        temp.write_all(content.as_bytes()).await?;
        temp.sync_all().await?;

        fs::rename(&temp_path, &self.state_path).await?;

        debug!("State saved successfully");
        Ok(())
    }

    async fn lock(&self, info: &LockInfo) -> Result<String> {
        self.ensure_dir().await?;

        let mut info = info.clone();
        info.path = self.state_path.display().to_string();
        let content = serde_json::to_string_pretty(&info)
            .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")))?;

        let opened = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.lock_path)
            .await;
        let mut file = match opened {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let existing = self.read_lock_file().await?.ok_or_else(|| {
                    OrchestratorError::State(StateError::LockFailed {
                        message: String::from("Lock file vanished while being inspected"),
                    })
                })?;
                return Err(OrchestratorError::State(StateError::LockedByOther {
                    lock_id: existing.id,
                    holder: existing.holder,
                    since: existing.created.to_rfc3339(),
                }));
            }
            Err(e) => {
                return Err(OrchestratorError::State(StateError::LockFailed {
                    message: format!("Failed to create lock file: {e}"),
                }));
            }
        };

        file.write_all(content.as_bytes()).await.map_err(|e| {
            OrchestratorError::State(StateError::LockFailed {
                message: format!("Failed to write lock file: {e}"),
            })
        })?;
        file.sync_all().await.map_err(|e| {
            OrchestratorError::State(StateError::LockFailed {
                message: format!("Failed to sync lock file: {e}"),
            })
        })?;

        info!("Acquired state lock: {} for {}", info.id, info.operation);
        Ok(info.id)
    }

    async fn unlock(&self, lock_id: &str) -> Result<()> {
        self.remove_lock(lock_id).await?;
        info!("Released state lock: {lock_id}");
        Ok(())
    }

    async fn force_unlock(&self, lock_id: &str) -> Result<()> {
        self.remove_lock(lock_id).await?;
        warn!("Force-unlocked state lock: {lock_id}");
        Ok(())
    }

    async fn lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock_file().await
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addrs::ProviderConfigAddr;
    use crate::state::{ResourceInstanceObject, State};
    use tempfile::TempDir;

    fn create_test_store() -> (LocalStateStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStateStore::with_base_dir(temp_dir.path().join(".halldyll"));
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let (store, _temp) = create_test_store();

        let mut state = State::new();
        state.set_current(
            &"simple_thing.a".parse().expect("valid address"),
            Some(ResourceInstanceObject::new(serde_json::json!({"id": "1"}))),
            &ProviderConfigAddr::root("simple"),
        );
        let file = StateFile::new(state);
        store.write(&file).await.expect("Failed to write state");

        let loaded = store.read().await.expect("Failed to read state");
        assert_eq!(loaded, file);
    }

    #[tokio::test]
    async fn test_read_nonexistent() {
        let (store, _temp) = create_test_store();

        let result = store.read().await;
        assert!(matches!(
            result,
            Err(OrchestratorError::State(StateError::NotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn test_read_corrupted() {
        let (store, _temp) = create_test_store();
        store.ensure_dir().await.expect("mkdir");
        std::fs::write(store.state_path(), "{not json").expect("write");

        let result = store.read().await;
        assert!(matches!(
            result,
            Err(OrchestratorError::State(StateError::Corrupted { .. }))
        ));
    }

    #[tokio::test]
    async fn test_lock_acquire_release() {
        let (store, _temp) = create_test_store();

        let id = store
            .lock(&LockInfo::new("plan"))
            .await
            .expect("Failed to acquire lock");

        let info = store.lock_info().await.expect("lock_info failed").expect("locked");
        assert_eq!(info.id, id);
        assert!(info.path.ends_with("state.json"));

        store.unlock(&id).await.expect("Failed to release lock");
        assert!(store.lock_info().await.expect("lock_info failed").is_none());
    }

    #[tokio::test]
    async fn test_lock_conflict_names_holder() {
        let (store, _temp) = create_test_store();

        let first = LockInfo::new("apply");
        let _id = store.lock(&first).await.expect("Failed to acquire first lock");

        let result = store.lock(&LockInfo::new("plan")).await;
        match result {
            Err(OrchestratorError::State(StateError::LockedByOther { holder, lock_id, .. })) => {
                assert_eq!(holder, first.holder);
                assert_eq!(lock_id, first.id);
            }
            other => panic!("expected lock conflict, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unlock_with_wrong_id() {
        let (store, _temp) = create_test_store();

        assert!(matches!(
            store.unlock("nope").await,
            Err(OrchestratorError::State(StateError::NotLocked))
        ));

        let id = store.lock(&LockInfo::new("plan")).await.expect("lock");
        assert!(matches!(
            store.unlock("nope").await,
            Err(OrchestratorError::State(StateError::LockMismatch { .. }))
        ));
        store.force_unlock(&id).await.expect("force unlock");
        assert!(store.lock_info().await.expect("lock_info").is_none());
    }
}
