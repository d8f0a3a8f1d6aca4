//! Structured error handling for the queue core.
//!
//! Only programmer misuse and invariant breaches surface as errors. Task
//! failure, task cancellation, and cancellation-signal races are absorbed
//! into boolean completion transitions and never reach this enum.

use uuid::Uuid;

/// Errors raised by the queue core.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// No active observer wraps the given task.
    #[error("no active observer found for task {task_id}")]
    ObserverNotFound { task_id: Uuid },

    /// A completion transition was queried before the observer was attached
    /// to a submitted task.
    #[error("observer has no task attached; run the action before awaiting its completion")]
    ObserverNotAttached,

    /// Tasks survived a full disposal sweep. This is a logic bug, not a
    /// recoverable runtime condition.
    #[error("{remaining} task(s) still tracked after disposal sweep")]
    DisposalInvariant { remaining: usize },
}

pub type Result<T> = std::result::Result<T, QueueError>;
