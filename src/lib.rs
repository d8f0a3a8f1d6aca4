#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # taskqueue
//!
//! A FIFO task queue over a pluggable execution substrate: submitted actions
//! run in strict submission order, completion is tracked through one-shot
//! observers, and a single shared cancellation signal covers the queue's
//! whole lifetime.
//!
//! ## Overview
//!
//! The queue does no execution of its own. Each action is handed to an
//! [`ExecutionSubstrate`] (by default [`TokioSubstrate`], which spawns onto
//! the tokio runtime): the first submission starts immediately, every later
//! one is chained as a continuation of the most recently submitted task, so
//! no two tasks from the same queue run concurrently. A
//! [`CompletionObserver`] wraps each submission and resolves exactly once to
//! success or failure; [`TaskQueue::complete`] aggregates those transitions
//! without busy-waiting.
//!
//! ## Module Organization
//!
//! - [`queue`] - The [`TaskQueue`] façade: define, run, complete, cancel, dispose
//! - [`registry`] - Ordered task tracking and the observer subscribe/query protocol
//! - [`observer`] - Per-task completion observers and the notify capability
//! - [`subscription`] - Idempotent unsubscribe tokens
//! - [`substrate`] - The execution substrate capability and its tokio implementation
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use taskqueue::TaskQueue;
//!
//! # async fn example() -> taskqueue::Result<()> {
//! let queue = TaskQueue::new();
//!
//! let first = queue.define(|_| {
//!     println!("runs first");
//!     Ok(())
//! });
//! let second = queue.define(|_| {
//!     println!("runs strictly after the first");
//!     Ok(())
//! });
//!
//! queue.run(&first, None).run(&second, None);
//!
//! // true iff every task observed so far completed successfully
//! let all_succeeded = queue.complete().await?;
//! println!("all succeeded: {all_succeeded}");
//!
//! queue.shutdown().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Cancellation
//!
//! Cancellation is cooperative and best-effort: triggering the queue's
//! shared token (immediately via [`TaskQueue::cancel_execution`] or delayed
//! via [`TaskQueue::cancel_after`]) prevents pending and future submissions
//! from starting, but never stops a task already mid-execution. Repeated
//! triggers are no-ops.

pub mod error;
pub mod observer;
pub mod queue;
pub mod registry;
pub mod subscription;
pub mod substrate;

pub use error::{QueueError, Result};
pub use observer::{Action, CompletionObserver, Observer};
pub use queue::TaskQueue;
pub use registry::{Subject, TaskRegistry};
pub use subscription::SubscriptionHandle;
pub use substrate::{ExecutionSubstrate, TaskHandle, TaskStatus, TokioSubstrate, WorkUnit};
