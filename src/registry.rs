//! # Task Registry
//!
//! Owns the ordered sequence of submitted tasks (insertion order = submission
//! order) and the set of active completion observers, and implements the
//! subscribe/unsubscribe/query protocol over that set.
//!
//! Both collections sit behind `parking_lot` mutexes, acquired for short
//! critical sections only and never across an await point. Waits operate on a
//! snapshot taken under the lock, so observers subscribed mid-wait are not
//! included in that wait. Lock order is observers before tasks everywhere.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::error::{QueueError, Result};
use crate::observer::CompletionObserver;
use crate::subscription::{ObserverSet, SubscriptionHandle};
use crate::substrate::TaskHandle;

/// Subscribe capability implemented by the registry.
pub trait Subject<O>: Send + Sync {
    fn subscribe(&self, observer: Arc<O>) -> SubscriptionHandle;
}

/// Registry of submitted tasks and their active observers.
pub struct TaskRegistry {
    observers: ObserverSet,
    tasks: Mutex<Vec<TaskHandle>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            observers: Arc::new(Mutex::new(Vec::new())),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// True iff some active observer wraps `task`.
    pub fn observer_exists_for(&self, task: &TaskHandle) -> bool {
        self.observers
            .lock()
            .iter()
            .any(|observer| observer.wraps(task))
    }

    /// True iff the active-observer set is non-empty.
    pub fn has_observers(&self) -> bool {
        !self.observers.lock().is_empty()
    }

    /// First active observer wrapping `task`, in registration order.
    ///
    /// Callers must already know the observer exists; an untracked task is
    /// programmer misuse and fails fast.
    pub fn observer_for(&self, task: &TaskHandle) -> Result<Arc<CompletionObserver>> {
        self.observers
            .lock()
            .iter()
            .find(|observer| observer.wraps(task))
            .cloned()
            .ok_or(QueueError::ObserverNotFound { task_id: task.id() })
    }

    /// Snapshot of the active observers, in registration order.
    pub fn active_observers(&self) -> Vec<Arc<CompletionObserver>> {
        self.observers.lock().clone()
    }

    /// Await every active observer's completion transition, sequentially in
    /// registration order over a snapshot of the set.
    ///
    /// Always returns `true` once all transitions have resolved; individual
    /// outcomes are the caller's concern. Observers not yet attached to a
    /// task have nothing to wait for and are skipped.
    pub async fn all_observers_completed(&self) -> bool {
        let snapshot = self.active_observers();
        for observer in snapshot {
            match observer.finished().await {
                Ok(outcome) => {
                    if let Some(task) = observer.task() {
                        debug!(task_id = %task.id(), success = outcome, "completion transition resolved");
                    }
                }
                Err(QueueError::ObserverNotAttached) => {
                    debug!("skipping unattached observer");
                }
                Err(_) => {}
            }
        }
        true
    }

    /// Most recently submitted task, the anchor for the next continuation.
    pub fn last_task(&self) -> Option<TaskHandle> {
        self.tasks.lock().last().cloned()
    }

    /// Number of tracked tasks.
    pub fn task_count(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Snapshot of the ordered task sequence.
    pub fn tasks(&self) -> Vec<TaskHandle> {
        self.tasks.lock().clone()
    }

    /// Remove every task that is terminal and no longer observed.
    ///
    /// Non-terminal tasks and tasks with a live observer stay tracked.
    pub fn sweep_finished(&self) {
        let observers = self.observers.lock();
        let mut tasks = self.tasks.lock();
        tasks.retain(|task| {
            let observed = observers.iter().any(|observer| observer.wraps(task));
            let keep = !task.is_terminal() || observed;
            if !keep {
                debug!(task_id = %task.id(), "sweeping finished task");
            }
            keep
        });
    }

    /// Unsubscribe every active observer, for the disposal path.
    pub fn unsubscribe_all(&self) {
        for observer in self.active_observers() {
            observer.unsubscribe();
        }
    }
}

impl Subject<CompletionObserver> for TaskRegistry {
    /// Add `observer` to the active set unless already present (pointer
    /// identity); registration is idempotent. Independently, append the
    /// observer's wrapped task to the sequence whenever one is attached;
    /// task tracking and observer tracking are separate concerns.
    fn subscribe(&self, observer: Arc<CompletionObserver>) -> SubscriptionHandle {
        {
            let mut observers = self.observers.lock();
            let already_registered = observers
                .iter()
                .any(|entry| Arc::ptr_eq(entry, &observer));
            if already_registered {
                debug!("observer already registered, skipping duplicate");
            } else {
                observers.push(observer.clone());
                debug!(active = observers.len(), "observer subscribed");
            }
        }

        if let Some(task) = observer.task() {
            let mut tasks = self.tasks.lock();
            tasks.push(task.clone());
            debug!(task_id = %task.id(), tracked = tasks.len(), "tracking submitted task");
        }

        SubscriptionHandle::new(self.observers.clone(), &observer)
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("observers", &self.observers.lock().len())
            .field("tasks", &self.tasks.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::Observer;
    use crate::substrate::{ExecutionSubstrate, TokioSubstrate};
    use tokio_util::sync::CancellationToken;

    fn observer() -> Arc<CompletionObserver> {
        Arc::new(CompletionObserver::new(Arc::new(|_| Ok(()))))
    }

    fn submitted_observer(substrate: &TokioSubstrate) -> Arc<CompletionObserver> {
        let obs = observer();
        let handle = substrate.submit(Box::new(|| Ok(())), CancellationToken::new());
        obs.on_next(handle);
        obs
    }

    #[tokio::test]
    async fn duplicate_subscribe_registers_observer_once() {
        let registry = TaskRegistry::new();
        let obs = observer();

        registry.subscribe(obs.clone());
        registry.subscribe(obs.clone());

        assert_eq!(registry.active_observers().len(), 1);
    }

    #[tokio::test]
    async fn subscribe_appends_task_independently_of_observer_registration() {
        let substrate = TokioSubstrate::new();
        let registry = TaskRegistry::new();
        let obs = observer();

        // Unattached at first registration: observer tracked, no task yet.
        registry.subscribe(obs.clone());
        assert_eq!(registry.task_count(), 0);

        // Re-subscribe after attachment: duplicate observer skipped, task appended.
        let handle = substrate.submit(Box::new(|| Ok(())), CancellationToken::new());
        obs.on_next(handle.clone());
        registry.subscribe(obs.clone());

        assert_eq!(registry.active_observers().len(), 1);
        assert_eq!(registry.task_count(), 1);
        assert_eq!(registry.last_task(), Some(handle));
    }

    #[tokio::test]
    async fn observer_lookup_by_task_identity() {
        let substrate = TokioSubstrate::new();
        let registry = TaskRegistry::new();
        let obs = submitted_observer(&substrate);
        let task = obs.task().unwrap().clone();

        registry.subscribe(obs.clone());

        assert!(registry.observer_exists_for(&task));
        assert!(registry.has_observers());
        let found = registry.observer_for(&task).unwrap();
        assert!(Arc::ptr_eq(&found, &obs));
    }

    #[tokio::test]
    async fn observer_for_untracked_task_fails_fast() {
        let substrate = TokioSubstrate::new();
        let registry = TaskRegistry::new();
        let stray = substrate.submit(Box::new(|| Ok(())), CancellationToken::new());

        assert!(matches!(
            registry.observer_for(&stray),
            Err(QueueError::ObserverNotFound { .. })
        ));
        assert!(!registry.observer_exists_for(&stray));
    }

    #[tokio::test]
    async fn all_observers_completed_resolves_every_transition() {
        let substrate = TokioSubstrate::new();
        let registry = TaskRegistry::new();

        for _ in 0..3 {
            registry.subscribe(submitted_observer(&substrate));
        }
        // An unattached observer must not wedge the wait.
        registry.subscribe(observer());

        assert!(registry.all_observers_completed().await);
    }

    #[tokio::test]
    async fn sweep_removes_only_terminal_unobserved_tasks() {
        let substrate = TokioSubstrate::new();
        let registry = TaskRegistry::new();

        let obs = submitted_observer(&substrate);
        let task = obs.task().unwrap().clone();
        let sub = registry.subscribe(obs.clone());
        task.wait_terminal().await;

        // Terminal but still observed: kept.
        registry.sweep_finished();
        assert_eq!(registry.task_count(), 1);

        // Terminal and unobserved: swept.
        sub.release();
        registry.sweep_finished();
        assert_eq!(registry.task_count(), 0);
    }

    #[tokio::test]
    async fn unsubscribing_keeps_task_tracked_until_sweep() {
        let substrate = TokioSubstrate::new();
        let registry = TaskRegistry::new();

        let obs = submitted_observer(&substrate);
        let handle = registry.subscribe(obs.clone());
        obs.attach_subscription(handle);
        obs.task().unwrap().wait_terminal().await;

        obs.unsubscribe();
        assert!(!registry.has_observers());
        assert_eq!(registry.task_count(), 1);

        registry.sweep_finished();
        assert_eq!(registry.task_count(), 0);
    }

    #[tokio::test]
    async fn unsubscribe_all_empties_active_set() {
        let substrate = TokioSubstrate::new();
        let registry = TaskRegistry::new();

        for _ in 0..3 {
            let obs = submitted_observer(&substrate);
            let handle = registry.subscribe(obs.clone());
            obs.attach_subscription(handle);
        }
        assert!(registry.has_observers());

        registry.unsubscribe_all();
        assert!(!registry.has_observers());
        // Tasks remain tracked until the sweep.
        assert_eq!(registry.task_count(), 3);
    }
}
