//! Shared, mutex-guarded state for concurrent graph walks.

use parking_lot::Mutex;

use super::types::State;

/// [`State`] behind a mutex.
///
/// Access goes through closures so a guard can never be held across an
/// `.await` in a vertex.
#[derive(Debug, Default)]
pub struct SyncState {
    inner: Mutex<State>,
}

impl SyncState {
    /// Wraps a state.
    #[must_use]
    pub const fn new(state: State) -> Self {
        Self {
            inner: Mutex::new(state),
        }
    }

    /// Runs `f` with shared access.
    pub fn read<R>(&self, f: impl FnOnce(&State) -> R) -> R {
        let guard = self.inner.lock();
        f(&*guard)
    }

    /// Runs `f` with exclusive access.
    pub fn write<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let mut guard = self.inner.lock();
        f(&mut *guard)
    }

    /// A copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> State {
        self.inner.lock().clone()
    }

    /// Unwraps the state.
    #[must_use]
    pub fn into_inner(self) -> State {
        self.inner.into_inner()
    }
}
