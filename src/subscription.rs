//! Subscription tokens handed out by the registry.
//!
//! Releasing a handle removes its observer from the active set exactly once;
//! a second release is a no-op, never an error. Handles hold the observer
//! weakly so they never keep one alive on their own.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

use crate::observer::CompletionObserver;

/// Shared active-observer set, insertion order preserved.
pub(crate) type ObserverSet = Arc<Mutex<Vec<Arc<CompletionObserver>>>>;

/// Capability bound to one (observer set, observer) pair.
pub struct SubscriptionHandle {
    set: ObserverSet,
    observer: Weak<CompletionObserver>,
    released: AtomicBool,
}

impl SubscriptionHandle {
    pub(crate) fn new(set: ObserverSet, observer: &Arc<CompletionObserver>) -> Self {
        Self {
            set,
            observer: Arc::downgrade(observer),
            released: AtomicBool::new(false),
        }
    }

    /// Remove the bound observer from the set if still present.
    ///
    /// Idempotent, and safe to call from disposal code after the set has
    /// already been mutated elsewhere.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        let Some(observer) = self.observer.upgrade() else {
            return;
        };
        let mut set = self.set.lock();
        if let Some(index) = set.iter().position(|entry| Arc::ptr_eq(entry, &observer)) {
            set.remove(index);
            debug!(remaining = set.len(), "observer removed from active set");
        }
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("released", &self.released.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}
