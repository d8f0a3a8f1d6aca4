//! # Execution Substrate
//!
//! The queue core never runs work itself; it submits opaque units of work to
//! an execution substrate and chains continuations on it. [`ExecutionSubstrate`]
//! is that capability, and [`TokioSubstrate`] is the default implementation
//! that spawns each unit onto the tokio runtime.
//!
//! Submission is always synchronous; only the produced task's execution is
//! asynchronous. Status flows from the executing task to every [`TaskHandle`]
//! clone through a watch channel, so waiting for a terminal state never
//! busy-polls.

use std::panic::{self, AssertUnwindSafe};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Lifecycle states of a submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Submitted but not yet started (waiting on a prior task, or on a
    /// worker becoming available).
    Pending,
    /// Currently executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Never started because cancellation was requested first.
    Canceled,
    /// The unit of work returned an error or panicked.
    Faulted,
}

impl TaskStatus {
    /// A task is terminal once it can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Canceled | TaskStatus::Faulted
        )
    }
}

/// One schedulable unit of work.
pub type WorkUnit = Box<dyn FnOnce() -> anyhow::Result<()> + Send + 'static>;

/// Handle to a submitted task.
///
/// Cheap to clone; all clones observe the same status. Equality is by task
/// identity, not by status.
#[derive(Debug, Clone)]
pub struct TaskHandle {
    id: Uuid,
    status: watch::Receiver<TaskStatus>,
}

impl TaskHandle {
    /// Opaque identity of the underlying task.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Snapshot of the current status.
    pub fn status(&self) -> TaskStatus {
        *self.status.borrow()
    }

    /// Whether the task has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Wait until the task reaches a terminal state and return it.
    ///
    /// Suspends the caller; never blocks a worker thread. Safe to await from
    /// any number of handle clones concurrently.
    pub async fn wait_terminal(&self) -> TaskStatus {
        let mut rx = self.status.clone();
        loop {
            let current = *rx.borrow_and_update();
            if current.is_terminal() {
                return current;
            }
            if rx.changed().await.is_err() {
                // Sender dropped without a terminal update; report what we saw.
                return *rx.borrow();
            }
        }
    }
}

impl PartialEq for TaskHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TaskHandle {}

/// Capability for submitting and chaining units of work.
///
/// Both methods return immediately; the produced task runs asynchronously on
/// the substrate's workers under the given cancellation token.
pub trait ExecutionSubstrate: Send + Sync {
    /// Submit a unit of work to start as soon as a worker picks it up.
    fn submit(&self, work: WorkUnit, token: CancellationToken) -> TaskHandle;

    /// Submit a unit of work that starts only after `prior` reaches a
    /// terminal state (completed, canceled, or faulted alike).
    fn continue_after(
        &self,
        prior: &TaskHandle,
        work: WorkUnit,
        token: CancellationToken,
    ) -> TaskHandle;
}

/// Substrate backed by the tokio runtime.
///
/// Each unit of work is spawned as a tokio task. Cancellation is cooperative:
/// a token triggered before the unit starts prevents it from running at all,
/// but a unit already mid-execution runs to its own end.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSubstrate;

impl TokioSubstrate {
    pub fn new() -> Self {
        Self
    }
}

impl ExecutionSubstrate for TokioSubstrate {
    fn submit(&self, work: WorkUnit, token: CancellationToken) -> TaskHandle {
        let (tx, rx) = watch::channel(TaskStatus::Pending);
        let id = Uuid::new_v4();
        debug!(task_id = %id, "submitting unit of work");

        tokio::spawn(execute_unit(id, tx, work, token));

        TaskHandle { id, status: rx }
    }

    fn continue_after(
        &self,
        prior: &TaskHandle,
        work: WorkUnit,
        token: CancellationToken,
    ) -> TaskHandle {
        let (tx, rx) = watch::channel(TaskStatus::Pending);
        let id = Uuid::new_v4();
        let prior = prior.clone();
        debug!(task_id = %id, prior_task_id = %prior.id(), "chaining unit of work");

        tokio::spawn(async move {
            let prior_status = prior.wait_terminal().await;
            debug!(
                task_id = %id,
                prior_task_id = %prior.id(),
                prior_status = ?prior_status,
                "prior task terminal, continuation released"
            );
            execute_unit(id, tx, work, token).await;
        });

        TaskHandle { id, status: rx }
    }
}

/// Drive one unit of work to a terminal status.
async fn execute_unit(
    id: Uuid,
    tx: watch::Sender<TaskStatus>,
    work: WorkUnit,
    token: CancellationToken,
) {
    if token.is_cancelled() {
        debug!(task_id = %id, "cancellation requested before start, task will not run");
        tx.send_replace(TaskStatus::Canceled);
        return;
    }

    tx.send_replace(TaskStatus::Running);

    let terminal = match panic::catch_unwind(AssertUnwindSafe(work)) {
        Ok(Ok(())) => TaskStatus::Completed,
        Ok(Err(error)) => {
            debug!(task_id = %id, error = %error, "task faulted");
            TaskStatus::Faulted
        }
        Err(_) => {
            warn!(task_id = %id, "task panicked");
            TaskStatus::Faulted
        }
    };

    debug!(task_id = %id, status = ?terminal, "task reached terminal state");
    tx.send_replace(terminal);
}
