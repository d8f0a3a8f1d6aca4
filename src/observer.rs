//! # Completion Observers
//!
//! A [`CompletionObserver`] wraps exactly one submitted unit of work. It
//! carries the action payload, receives the produced [`TaskHandle`] through
//! [`Observer::on_next`] exactly once, and exposes the task's completion
//! transition: a one-shot wait that resolves to `true` for a completed task
//! and `false` for a canceled or faulted one.
//!
//! Observers are compared by identity (`Arc` pointer), never by value; the
//! registry looks them up by the task they wrap.

use std::sync::Arc;
use std::sync::OnceLock;

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, error};

use crate::error::{QueueError, Result};
use crate::substrate::{TaskHandle, TaskStatus};
use crate::subscription::SubscriptionHandle;

/// Action payload: a re-runnable callable taking an optional argument.
///
/// Replaces separate no-arg and one-arg action shapes with a single form;
/// callers that need no argument ignore the payload.
pub type Action = Arc<dyn Fn(Option<Value>) -> anyhow::Result<()> + Send + Sync>;

/// Notify capability: receives each produced value exactly once per value.
pub trait Observer<T>: Send + Sync {
    fn on_next(&self, value: T);
}

/// Observer for a single submitted task.
pub struct CompletionObserver {
    action: Action,
    task: OnceLock<TaskHandle>,
    subscription: Mutex<Option<SubscriptionHandle>>,
}

impl CompletionObserver {
    /// Create an observer carrying `action`, not yet attached to any task.
    pub fn new(action: Action) -> Self {
        Self {
            action,
            task: OnceLock::new(),
            subscription: Mutex::new(None),
        }
    }

    /// The stored action payload, for the substrate to execute.
    pub fn action(&self) -> Action {
        self.action.clone()
    }

    /// The wrapped task, if one has been attached.
    pub fn task(&self) -> Option<&TaskHandle> {
        self.task.get()
    }

    /// Whether a task has been attached yet.
    pub fn is_attached(&self) -> bool {
        self.task.get().is_some()
    }

    /// Whether this observer wraps `task` (identity comparison).
    pub fn wraps(&self, task: &TaskHandle) -> bool {
        self.task.get().is_some_and(|wrapped| wrapped == task)
    }

    /// Keep the first subscription handle handed to this observer; later
    /// handles for the same registration are redundant and dropped.
    pub(crate) fn attach_subscription(&self, handle: SubscriptionHandle) {
        let mut slot = self.subscription.lock();
        if slot.is_none() {
            *slot = Some(handle);
        }
    }

    /// Await the completion transition of the wrapped task.
    ///
    /// Resolves to `Ok(true)` once the task completes, `Ok(false)` once it
    /// is canceled or faults. Fails fast if no task has been attached yet.
    pub async fn finished(&self) -> Result<bool> {
        let task = self.task.get().ok_or(QueueError::ObserverNotAttached)?;
        let status = task.wait_terminal().await;
        Ok(status == TaskStatus::Completed)
    }

    /// Detach from the registry's active set. Idempotent.
    pub fn unsubscribe(&self) {
        if let Some(handle) = self.subscription.lock().take() {
            match self.task.get() {
                Some(task) => debug!(task_id = %task.id(), "observer unsubscribed"),
                None => debug!("unattached observer unsubscribed"),
            }
            handle.release();
        }
    }
}

impl Observer<TaskHandle> for CompletionObserver {
    /// Attach the produced task handle. This is the single write point for
    /// the observer-to-task binding; a second attach is rejected.
    fn on_next(&self, task: TaskHandle) {
        let task_id = task.id();
        if self.task.set(task).is_err() {
            error!(task_id = %task_id, "observer already attached to a task, ignoring second attach");
            return;
        }
        debug!(task_id = %task_id, "task attached to observer");
    }
}

impl std::fmt::Debug for CompletionObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionObserver")
            .field("task", &self.task.get().map(TaskHandle::id))
            .finish_non_exhaustive()
    }
}
