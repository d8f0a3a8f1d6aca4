//! # FIFO Task Queue
//!
//! The façade over the execution substrate. Actions defined here run in
//! strict submission order: the first submission starts immediately, every
//! later one is chained as a continuation of the most recently submitted
//! task. Callers can await everything observed so far ([`TaskQueue::complete`]),
//! request cooperative cancellation (immediate or delayed), and drain the
//! queue on shutdown.
//!
//! A single shared [`CancellationToken`] covers the queue's whole lifetime;
//! it is created lazily on first access and released only at disposal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{QueueError, Result};
use crate::observer::{Action, CompletionObserver, Observer};
use crate::registry::{Subject, TaskRegistry};
use crate::substrate::{ExecutionSubstrate, TaskHandle, TokioSubstrate, WorkUnit};

/// FIFO task queue over an execution substrate.
pub struct TaskQueue {
    substrate: Arc<dyn ExecutionSubstrate>,
    registry: OnceLock<TaskRegistry>,
    cancellation: Mutex<Option<CancellationToken>>,
    /// Serializes the first-vs-continuation decision in [`TaskQueue::run`].
    submission: Mutex<()>,
    disposed: AtomicBool,
}

impl TaskQueue {
    /// Queue backed by the tokio runtime.
    pub fn new() -> Self {
        Self::with_substrate(Arc::new(TokioSubstrate::new()))
    }

    /// Queue backed by a caller-provided substrate.
    pub fn with_substrate(substrate: Arc<dyn ExecutionSubstrate>) -> Self {
        Self {
            substrate,
            registry: OnceLock::new(),
            cancellation: Mutex::new(None),
            submission: Mutex::new(()),
            disposed: AtomicBool::new(false),
        }
    }

    fn registry(&self) -> &TaskRegistry {
        self.registry.get_or_init(TaskRegistry::new)
    }

    /// Wrap an action in a new observer subscribed to the registry.
    ///
    /// Pure bookkeeping: no task is submitted until [`TaskQueue::run`].
    pub fn define<F>(&self, action: F) -> Arc<CompletionObserver>
    where
        F: Fn(Option<Value>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.define_action(Arc::new(action))
    }

    /// [`TaskQueue::define`] for an already-shared action payload.
    pub fn define_action(&self, action: Action) -> Arc<CompletionObserver> {
        let observer = Arc::new(CompletionObserver::new(action));
        let handle = self.registry().subscribe(observer.clone());
        observer.attach_subscription(handle);
        debug!("action defined and observer subscribed");
        observer
    }

    /// Submit the observer's action, preserving FIFO order.
    ///
    /// With no outstanding task the action is submitted directly; otherwise
    /// it is chained after the most recently submitted task. Either way the
    /// produced handle is attached to the observer and tracked by the
    /// registry. Never suspends; returns the queue for call chaining.
    pub fn run(&self, observer: &Arc<CompletionObserver>, payload: Option<Value>) -> &Self {
        if self.disposed.load(Ordering::SeqCst) {
            warn!("queue already disposed, refusing submission");
            return self;
        }
        let registry = self.registry();
        let token = self.cancellation_token();
        let action = observer.action();
        let work: WorkUnit = Box::new(move || action(payload));

        let _guard = self.submission.lock();
        let handle = match registry.last_task() {
            None => {
                debug!("no outstanding task, submitting directly");
                self.substrate.submit(work, token)
            }
            Some(prior) => {
                debug!(prior_task_id = %prior.id(), "outstanding task present, chaining continuation");
                self.substrate.continue_after(&prior, work, token)
            }
        };

        observer.on_next(handle);
        let subscription = registry.subscribe(observer.clone());
        observer.attach_subscription(subscription);
        self
    }

    /// Await the completion transition of every observer registered at call
    /// time (snapshot semantics: work submitted mid-wait is not included).
    ///
    /// Returns `Ok(true)` iff every snapshotted transition resolved
    /// successfully. Fails fast if the snapshot contains an observer that
    /// was never run.
    pub async fn complete(&self) -> Result<bool> {
        let snapshot = self.registry().active_observers();
        debug!(observers = snapshot.len(), "awaiting completion transitions");

        let mut all_succeeded = true;
        for observer in snapshot {
            if !observer.finished().await? {
                all_succeeded = false;
            }
        }
        Ok(all_succeeded)
    }

    /// Arm the shared cancellation signal to fire after `delay`, then await
    /// completion of everything observed so far.
    ///
    /// The delayed trigger races against in-flight tasks: work that finishes
    /// first is unaffected, work submitted under the token after it fires
    /// never starts.
    pub async fn cancel_after(&self, delay: Duration) -> Result<bool> {
        let token = self.cancellation_token();
        debug!(delay_ms = delay.as_millis() as u64, "arming delayed cancellation");
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            token.cancel();
            debug!("delayed cancellation fired");
        });
        self.complete().await
    }

    /// Raise the shared cancellation signal immediately.
    ///
    /// Best-effort by contract: repeated or late triggers are no-ops and
    /// never raise to the caller.
    pub fn cancel_execution(&self) {
        debug!("cancellation requested");
        self.cancellation_token().cancel();
    }

    /// Read-only view of the registry's ordered task sequence.
    pub fn tasks(&self) -> Vec<TaskHandle> {
        self.registry().tasks()
    }

    /// The queue's shared cancellation signal, created lazily on first
    /// access. At most one controller exists per queue lifetime; once
    /// created it is only ever triggered, never replaced. After disposal
    /// no controller remains and callers only ever see a triggered signal.
    pub fn cancellation_token(&self) -> CancellationToken {
        let mut slot = self.cancellation.lock();
        if let Some(token) = slot.as_ref() {
            return token.clone();
        }
        if self.disposed.load(Ordering::SeqCst) {
            // The controller was released at disposal; hand out a signal
            // that is already triggered rather than resurrecting one.
            let token = CancellationToken::new();
            token.cancel();
            return token;
        }
        let token = CancellationToken::new();
        *slot = Some(token.clone());
        token
    }

    /// Drain and dispose the queue.
    ///
    /// In order: wait for every outstanding task's terminal state, resolve
    /// all completion transitions, unsubscribe every observer, sweep
    /// finished tasks, assert the sequence is empty, and release the
    /// cancellation signal. A task surviving the sweep is an invariant
    /// breach and comes back as [`QueueError::DisposalInvariant`]. Calling
    /// `shutdown` again is a no-op.
    pub async fn shutdown(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::SeqCst) {
            debug!("queue already disposed, ignoring repeat shutdown");
            return Ok(());
        }
        info!("disposing task queue");
        let registry = self.registry();

        for task in registry.tasks() {
            task.wait_terminal().await;
        }

        let drained = registry.all_observers_completed().await;
        debug!(drained, "all completion transitions resolved");

        registry.unsubscribe_all();
        registry.sweep_finished();

        let remaining = registry.task_count();
        if remaining > 0 {
            error!(remaining, "tasks still tracked after disposal sweep");
            return Err(QueueError::DisposalInvariant { remaining });
        }

        if let Some(token) = self.cancellation.lock().take() {
            // Trigger on release so clones held by callers observe that the
            // queue is gone.
            token.cancel();
        }
        info!("task queue disposed");
        Ok(())
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TaskQueue {
    /// Safety net for owners that never called [`TaskQueue::shutdown`]:
    /// trigger the shared signal so pending work stops submitting. Cannot
    /// await, so no draining happens here.
    fn drop(&mut self) {
        if !self.disposed.load(Ordering::SeqCst) {
            warn!("task queue dropped without shutdown, cancelling outstanding work");
            if let Some(token) = self.cancellation.get_mut().take() {
                token.cancel();
            }
        }
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("registry", &self.registry.get())
            .field("disposed", &self.disposed.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}
