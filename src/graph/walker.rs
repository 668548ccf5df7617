//! Concurrent graph walker.
//!
//! Every vertex tracks how many of its dependencies are still outstanding.
//! Vertices whose count reaches zero are dispatched in key order onto a
//! [`JoinSet`], at most `parallelism` at a time. When a vertex fails, its
//! dependents are skipped, except fences which run after any outcome.
//!
//! Interrupts arrive through a watch channel. The first one stops dispatch
//! and lets running vertices finish; the second aborts them.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::{self, AbortHandle, JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::{OrchestratorError, WalkError};

use super::context::EvalContext;
use super::dag::{Graph, Vertex, VertexId};
use super::node::{Node, WalkOperation};

/// Default number of vertices executing at once.
pub const DEFAULT_PARALLELISM: usize = 10;

/// How hard the walk has been asked to stop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum InterruptLevel {
    /// Keep going.
    #[default]
    None,
    /// Dispatch nothing new; let running vertices finish.
    Stop,
    /// Abandon running vertices.
    Fatal,
}

/// Shared handle used to interrupt walks, e.g. from a Ctrl-C handler.
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    tx: Arc<watch::Sender<InterruptLevel>>,
}

impl Default for InterruptHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptHandle {
    /// Creates a handle at [`InterruptLevel::None`].
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(InterruptLevel::None);
        Self { tx: Arc::new(tx) }
    }

    /// Escalates one level: the first call stops, any later call is fatal.
    /// Returns the new level.
    pub fn interrupt(&self) -> InterruptLevel {
        let mut level = InterruptLevel::None;
        self.tx.send_modify(|current| {
            *current = match *current {
                InterruptLevel::None => InterruptLevel::Stop,
                InterruptLevel::Stop | InterruptLevel::Fatal => InterruptLevel::Fatal,
            };
            level = *current;
        });
        level
    }

    /// Requests a graceful stop.
    pub fn stop(&self) {
        self.tx.send_if_modified(|current| {
            if *current < InterruptLevel::Stop {
                *current = InterruptLevel::Stop;
                true
            } else {
                false
            }
        });
    }

    /// Current level.
    #[must_use]
    pub fn level(&self) -> InterruptLevel {
        *self.tx.borrow()
    }

    /// Receiver notified on every escalation.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<InterruptLevel> {
        self.tx.subscribe()
    }
}

/// How a walk ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkStatus {
    /// Every vertex ran and succeeded.
    Completed,
    /// At least one vertex failed.
    Failed,
    /// Stopped by a first interrupt; running vertices were allowed to finish.
    Cancelled,
    /// Stopped by a second interrupt; running vertices were abandoned.
    FatalInterrupt,
}

impl fmt::Display for WalkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::FatalInterrupt => write!(f, "interrupted"),
        }
    }
}

/// What happened to one vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VertexStatus {
    /// Executed without errors.
    Succeeded,
    /// Executed and reported errors.
    Failed,
    /// Not executed because a dependency failed or was skipped.
    Skipped,
    /// Never dispatched.
    NotStarted,
    /// Dispatched, then abandoned by a fatal interrupt.
    Abandoned,
}

/// Outcome of one vertex.
#[derive(Debug, Clone)]
pub struct VertexOutcome {
    /// Vertex key.
    pub key: String,
    /// What happened.
    pub status: VertexStatus,
    /// When the vertex was dispatched.
    pub started_at: Option<Instant>,
    /// When it finished or was abandoned.
    pub finished_at: Option<Instant>,
}

impl VertexOutcome {
    /// Time between dispatch and completion.
    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        Some(self.finished_at?.duration_since(self.started_at?))
    }
}

/// Result of a walk.
#[derive(Debug)]
pub struct WalkResult {
    /// How the walk ended.
    pub status: WalkStatus,
    /// Diagnostics of every executed vertex, plus walker warnings.
    pub diagnostics: Diagnostics,
    /// Per-vertex outcomes, sorted by key.
    pub outcomes: Vec<VertexOutcome>,
}

impl WalkResult {
    /// Returns true if every vertex succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == WalkStatus::Completed
    }

    /// Outcome of the vertex with `key`.
    #[must_use]
    pub fn outcome(&self, key: &str) -> Option<&VertexOutcome> {
        self.outcomes.iter().find(|o| o.key == key)
    }
}

/// Aborts the wrapped task when dropped, so aborting a dispatch task also
/// aborts the vertex it is waiting on.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Walks graphs with bounded concurrency.
#[derive(Debug, Clone)]
pub struct Walker {
    parallelism: usize,
    interrupt: InterruptHandle,
}

impl Default for Walker {
    fn default() -> Self {
        Self::new()
    }
}

/// Book-keeping for one walk.
struct WalkState<'g> {
    graph: &'g Graph<Node>,
    pending: HashMap<VertexId, usize>,
    ready: BTreeSet<(String, VertexId)>,
    upstream_failed: HashSet<VertexId>,
    running: HashMap<VertexId, Instant>,
    outcomes: HashMap<VertexId, VertexOutcome>,
}

impl<'g> WalkState<'g> {
    fn new(graph: &'g Graph<Node>) -> Self {
        let mut pending = HashMap::new();
        let mut ready = BTreeSet::new();
        let mut outcomes = HashMap::new();
        for (id, node) in graph.vertices() {
            let key = node.key();
            let count = graph.dependencies_of(id).len();
            if count == 0 {
                ready.insert((key.clone(), id));
            }
            pending.insert(id, count);
            outcomes.insert(
                id,
                VertexOutcome {
                    key,
                    status: VertexStatus::NotStarted,
                    started_at: None,
                    finished_at: None,
                },
            );
        }
        Self {
            graph,
            pending,
            ready,
            upstream_failed: HashSet::new(),
            running: HashMap::new(),
            outcomes,
        }
    }

    /// Records the outcome of `id` and releases its dependents.
    fn finish(&mut self, id: VertexId, status: VertexStatus) {
        let now = Instant::now();
        let started = self.running.remove(&id);
        if let Some(outcome) = self.outcomes.get_mut(&id) {
            outcome.status = status;
            outcome.started_at = started;
            outcome.finished_at = Some(now);
        }
        self.pending.remove(&id);

        let tainted = status != VertexStatus::Succeeded || self.upstream_failed.contains(&id);
        for dependent in self.graph.dependents_of(id) {
            if tainted {
                self.upstream_failed.insert(dependent);
            }
            if let Some(count) = self.pending.get_mut(&dependent) {
                *count = count.saturating_sub(1);
                if *count == 0
                    && let Some(key) = self.graph.key(dependent)
                {
                    self.ready.insert((key.to_string(), dependent));
                }
            }
        }
    }

    /// Records a dispatch task that ended without reporting, so its
    /// dependents are skipped like those of any failed vertex.
    fn task_failed(&mut self, id: VertexId, err: JoinError) -> Diagnostic {
        let key = self.graph.key(id).unwrap_or_default().to_string();
        error!("Dispatch task for {key} failed: {err}");
        self.finish(id, VertexStatus::Failed);
        join_error_diagnostic(&key, err)
    }

    fn abandon_running(&mut self) {
        let now = Instant::now();
        for (id, started) in self.running.drain() {
            if let Some(outcome) = self.outcomes.get_mut(&id) {
                outcome.status = VertexStatus::Abandoned;
                outcome.started_at = Some(started);
                outcome.finished_at = Some(now);
            }
        }
    }

    fn into_outcomes(self) -> Vec<VertexOutcome> {
        let mut outcomes: Vec<VertexOutcome> = self.outcomes.into_values().collect();
        outcomes.sort_by(|a, b| a.key.cmp(&b.key));
        outcomes
    }
}

impl Walker {
    /// Creates a walker with [`DEFAULT_PARALLELISM`] and its own interrupt
    /// handle.
    #[must_use]
    pub fn new() -> Self {
        Self {
            parallelism: DEFAULT_PARALLELISM,
            interrupt: InterruptHandle::new(),
        }
    }

    /// Sets the maximum number of concurrently executing vertices. Zero is
    /// treated as one.
    #[must_use]
    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Uses a shared interrupt handle.
    #[must_use]
    pub fn with_interrupt(mut self, interrupt: InterruptHandle) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// The handle interrupting this walker.
    #[must_use]
    pub const fn interrupt_handle(&self) -> &InterruptHandle {
        &self.interrupt
    }

    /// Maximum number of concurrently executing vertices.
    #[must_use]
    pub const fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Executes every vertex once, dependencies first.
    pub async fn walk(&self, graph: &Graph<Node>, ctx: Arc<EvalContext>, op: WalkOperation) -> WalkResult {
        info!(
            "Walking {op} graph: {} vertices, parallelism {}",
            graph.len(),
            self.parallelism
        );
        let mut rx = self.interrupt.subscribe();
        let mut state = WalkState::new(graph);
        let mut tasks: JoinSet<(VertexId, Diagnostics)> = JoinSet::new();
        let mut task_ids: HashMap<task::Id, VertexId> = HashMap::new();
        let mut diagnostics = Diagnostics::new();

        let initial = *rx.borrow_and_update();
        let mut stopping = initial >= InterruptLevel::Stop;
        let mut fatal = false;
        let mut interrupts_open = true;

        loop {
            if !stopping {
                self.dispatch(&mut state, &mut tasks, &mut task_ids, &ctx, op);
            }
            if tasks.is_empty() {
                break;
            }

            tokio::select! {
                changed = rx.changed(), if interrupts_open => {
                    if changed.is_err() {
                        interrupts_open = false;
                        continue;
                    }
                    let level = *rx.borrow_and_update();
                    if level >= InterruptLevel::Stop && !stopping {
                        warn!("Interrupt received, waiting for {} running operations", tasks.len());
                        stopping = true;
                    }
                    if level == InterruptLevel::Fatal {
                        error!("Second interrupt received, abandoning {} running operations", tasks.len());
                        tasks.abort_all();
                        state.abandon_running();
                        fatal = true;
                        break;
                    }
                }
                joined = tasks.join_next_with_id() => {
                    match joined {
                        Some(Ok((task_id, (id, vertex_diagnostics)))) => {
                            task_ids.remove(&task_id);
                            let status = if vertex_diagnostics.has_errors() {
                                VertexStatus::Failed
                            } else {
                                VertexStatus::Succeeded
                            };
                            if let Some(key) = graph.key(id) {
                                debug!("{key}: {status:?}");
                            }
                            diagnostics.append(vertex_diagnostics);
                            state.finish(id, status);
                        }
                        Some(Err(err)) => match task_ids.remove(&err.id()) {
                            Some(id) => diagnostics.push(state.task_failed(id, err)),
                            None => diagnostics.push_error(OrchestratorError::internal(format!(
                                "dispatch task failed: {err}"
                            ))),
                        },
                        None => {}
                    }
                }
            }
        }

        // Abandoned tasks are already aborted; dropping the set reaps them.
        drop(tasks);

        let status = if fatal {
            diagnostics.push(Diagnostic::warning(
                "Operations were abandoned while in flight",
                Some(String::from(
                    "Remote objects may exist that are not recorded in state. Run a refresh plan and inspect the state before continuing.",
                )),
            ));
            WalkStatus::FatalInterrupt
        } else if stopping {
            WalkStatus::Cancelled
        } else if diagnostics.has_errors()
            || state
                .outcomes
                .values()
                .any(|o| o.status != VertexStatus::Succeeded)
        {
            WalkStatus::Failed
        } else {
            WalkStatus::Completed
        };
        info!("Walk {status}");

        WalkResult {
            status,
            diagnostics,
            outcomes: state.into_outcomes(),
        }
    }

    fn dispatch(
        &self,
        state: &mut WalkState<'_>,
        tasks: &mut JoinSet<(VertexId, Diagnostics)>,
        task_ids: &mut HashMap<task::Id, VertexId>,
        ctx: &Arc<EvalContext>,
        op: WalkOperation,
    ) {
        while tasks.len() < self.parallelism {
            let Some((key, id)) = state.ready.pop_first() else {
                return;
            };
            let Some(node) = state.graph.get(id) else {
                continue;
            };
            if state.upstream_failed.contains(&id) && !node.is_fence() {
                debug!("Skipping {key}: a dependency did not succeed");
                state.finish(id, VertexStatus::Skipped);
                continue;
            }

            debug!("Dispatching {key}");
            state.running.insert(id, Instant::now());
            let node = node.clone();
            let ctx = Arc::clone(ctx);
            let handle = tasks.spawn(async move {
                let mut inner = tokio::spawn(async move { node.execute(&ctx, op).await });
                let _guard = AbortOnDrop(inner.abort_handle());
                let diagnostics = match (&mut inner).await {
                    Ok(diagnostics) => diagnostics,
                    Err(err) => join_error_diagnostic(&key, err).into(),
                };
                (id, diagnostics)
            });
            task_ids.insert(handle.id(), id);
        }
    }
}

/// Diagnostic for a vertex task that panicked or was cancelled.
fn join_error_diagnostic(key: &str, err: JoinError) -> Diagnostic {
    if !err.is_panic() {
        return Diagnostic::error(WalkError::Cancelled).with_address(key);
    }
    let payload = err.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| String::from("unknown panic"));
    Diagnostic::error(WalkError::TaskPanicked {
        vertex: key.to_string(),
        message,
    })
    .with_address(key)
}
