//! Lock-disciplined operations over a state store.
//!
//! Each operation takes the state lock, reads the stored state, runs the
//! [`Orchestrator`] and persists the result. The lock is released on every
//! exit path, including failed, cancelled and abandoned walks. Lock and
//! storage failures are returned as errors; everything the walk reports
//! stays in the returned [`Diagnostics`].

use std::future::Future;
use tracing::{debug, error, info, warn};

use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::{OrchestratorError, PlanError, Result, StateError};
use crate::graph::WalkStatus;
use crate::orchestrator::{ApplyOptions, Orchestrator, PlanOptions};
use crate::plans::{Plan, PlanMode, StateOrigin};
use crate::state::{LockInfo, OperationKind, State, StateFile, StateStore};

/// Result of [`run_apply`].
#[derive(Debug)]
pub struct ApplyReport {
    /// The state file as written, or as read if nothing was applied.
    pub file: StateFile,
    /// How the walk ended; `None` if it never started.
    pub status: Option<WalkStatus>,
    /// Everything reported along the way.
    pub diagnostics: Diagnostics,
}

impl ApplyReport {
    /// Returns true if every planned change was applied.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == Some(WalkStatus::Completed) && !self.diagnostics.has_errors()
    }
}

/// Reads the stored state file, starting a new lineage if nothing was
/// stored yet.
///
/// # Errors
///
/// Returns an error if the store fails or holds an unsupported format.
pub async fn read_state<S: StateStore + ?Sized>(store: &S) -> Result<StateFile> {
    Ok(read_stored(store)
        .await?
        .unwrap_or_else(|| StateFile::new(State::new())))
}

async fn read_stored<S: StateStore + ?Sized>(store: &S) -> Result<Option<StateFile>> {
    match store.read().await {
        Ok(file) => {
            file.check_version()?;
            debug!("Read state serial {} from {}", file.serial, store.backend_type());
            Ok(Some(file))
        }
        Err(OrchestratorError::State(StateError::NotFound { location })) => {
            info!("No state at {location}, starting from empty state");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn describe(origin: Option<&StateOrigin>) -> String {
    origin.map_or_else(|| String::from("(none)"), ToString::to_string)
}

/// Plans under the state lock.
///
/// # Errors
///
/// Returns an error if the lock cannot be taken or state cannot be read.
pub async fn run_plan<S: StateStore + ?Sized>(
    store: &S,
    orchestrator: &Orchestrator,
    options: &PlanOptions,
) -> Result<(Option<Plan>, Diagnostics)> {
    let operation = match options.mode {
        PlanMode::Normal => "plan",
        PlanMode::Destroy => "plan-destroy",
    };
    with_lock(store, LockInfo::new(operation), || async move {
        let stored = read_stored(store).await?;
        let state_origin = stored.as_ref().map(StateOrigin::of);
        let state = stored.map(|f| f.state).unwrap_or_default();
        let (plan, diags) = orchestrator.plan(&state, options).await;
        Ok((plan.map(|p| Plan { state_origin, ..p }), diags))
    })
    .await
}

/// Applies `plan` under the state lock and writes the resulting state,
/// including partial results of a failed or interrupted walk.
///
/// A plan made against a different lineage or serial than the one stored
/// now is rejected without walking or writing.
///
/// # Errors
///
/// Returns an error if the lock cannot be taken, or state cannot be read or
/// written.
pub async fn run_apply<S: StateStore + ?Sized>(
    store: &S,
    orchestrator: &Orchestrator,
    plan: &Plan,
    options: &ApplyOptions,
) -> Result<ApplyReport> {
    let kind = match plan.mode {
        PlanMode::Normal => OperationKind::Apply,
        PlanMode::Destroy => OperationKind::Destroy,
    };
    let info = LockInfo::new("apply").with_info(plan.summary().to_string());
    with_lock(store, info, || async move {
        let stored = read_stored(store).await?;
        let found = stored.as_ref().map(StateOrigin::of);
        let current = stored.unwrap_or_else(|| StateFile::new(State::new()));
        if found != plan.state_origin {
            warn!("Refusing to apply a plan made against older state");
            return Ok(ApplyReport {
                file: current,
                status: None,
                diagnostics: Diagnostic::error(PlanError::StaleState {
                    expected: describe(plan.state_origin.as_ref()),
                    found: describe(found.as_ref()),
                })
                .into(),
            });
        }

        let outcome = orchestrator.apply_plan(plan, options).await;
        let Some(status) = outcome.status else {
            return Ok(ApplyReport {
                file: current,
                status: None,
                diagnostics: outcome.diagnostics,
            });
        };

        let success = status == WalkStatus::Completed && !outcome.diagnostics.has_errors();
        let mut file = current.successor(outcome.state);
        file.add_history(kind, success, format!("{} ({status})", plan.summary()));
        store.write(&file).await?;
        info!("Wrote state serial {} ({status})", file.serial);

        Ok(ApplyReport {
            file,
            status: Some(status),
            diagnostics: outcome.diagnostics,
        })
    })
    .await
}

/// Runs `f` while holding the state lock.
async fn with_lock<S, T, F, Fut>(store: &S, info: LockInfo, f: F) -> Result<T>
where
    S: StateStore + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let lock_id = store.lock(&info).await?;
    debug!("Acquired {} state lock {lock_id} for {}", store.backend_type(), info.operation);

    let result = f().await;

    match store.unlock(&lock_id).await {
        Ok(()) => {
            debug!("Released state lock {lock_id}");
            result
        }
        Err(e) => {
            error!("Failed to release state lock {lock_id}: {e}");
            warn!("Run `halldyll force-unlock {lock_id}` once no other operation is running");
            result.and(Err(e))
        }
    }
}
