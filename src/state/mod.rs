//! State management module for the Halldyll orchestrator.
//!
//! This module provides the state model (what has been created, and by which
//! provider), persistent storage backends and advisory locking.

mod store;
mod local;
mod memory;
mod lock;
mod sync;
mod types;

pub use store::StateStore;
pub use local::LocalStateStore;
pub use memory::MemoryStateStore;
pub use lock::{LockInfo, generate_holder_id};
pub use sync::SyncState;
pub use types::{
    HistoryEntry, ModuleState, ObjectStatus, OperationKind, OutputValue, ResourceInstanceObject,
    ResourceInstanceState, ResourceState, STATE_FORMAT_VERSION, State, StateFile,
};
