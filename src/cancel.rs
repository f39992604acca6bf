//! Cancellation registry for in-flight operations.
//!
//! Code that starts cancellable work registers a handle for it here;
//! blanket teardown (navigating away, ending a session) calls
//! [`CancelRegistry::cancel_all`] to signal every outstanding handle at
//! once. The registry is an explicitly constructed value: build one per
//! session and hand it to each component that issues cancellable work,
//! so independent sessions never share cancellation scope.

use parking_lot::Mutex;
use tokio::task::{AbortHandle, JoinHandle};
use tokio_util::sync::CancellationToken;

/// An in-flight operation that can be told to stop.
///
/// The contract is a single zero-argument [`cancel`](CancelHandle::cancel)
/// call. Cancelling an operation that already finished must be a no-op;
/// tokio's task and token types already behave that way, and closure
/// adapters registered through [`CancelRegistry::register_fn`] are
/// expected to as well.
pub trait CancelHandle {
    /// Signals the operation to stop.
    fn cancel(&self);
}

impl CancelHandle for CancellationToken {
    fn cancel(&self) {
        CancellationToken::cancel(self);
    }
}

impl CancelHandle for AbortHandle {
    fn cancel(&self) {
        self.abort();
    }
}

impl<T> CancelHandle for JoinHandle<T> {
    fn cancel(&self) {
        self.abort();
    }
}

struct FnHandle<F>(F);

impl<F: Fn()> CancelHandle for FnHandle<F> {
    fn cancel(&self) {
        (self.0)();
    }
}

/// Registry of pending cancellation handles for one session.
///
/// `register` appends and never fails; duplicates are allowed and
/// registration order is preserved. Handles are only removed by
/// [`cancel_all`](CancelRegistry::cancel_all), so an operation that
/// completes on its own leaves its (now inert) handle behind and a
/// session that never triggers a blanket cancel accumulates them.
/// Sessions in this console are short enough that the accumulation has
/// not mattered in practice.
#[derive(Default)]
pub struct CancelRegistry {
    pending: Mutex<Vec<Box<dyn CancelHandle + Send>>>,
}

impl CancelRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a handle to the pending set.
    pub fn register<H>(&self, handle: H)
    where
        H: CancelHandle + Send + 'static,
    {
        self.pending.lock().push(Box::new(handle));
    }

    /// Adds a closure-backed handle to the pending set.
    ///
    /// The closure must tolerate being called after the operation it
    /// stops has already finished.
    pub fn register_fn<F>(&self, cancel: F)
    where
        F: Fn() + Send + 'static,
    {
        self.register(FnHandle(cancel));
    }

    /// Cancels every pending handle, oldest first, then clears the set.
    ///
    /// The pending list is taken in one swap and the handles are
    /// signalled outside the lock, so a cancel callback may register new
    /// work without deadlocking; such work lands in the next batch.
    /// Calling this on an empty registry does nothing.
    pub fn cancel_all(&self) {
        let pending = std::mem::take(&mut *self.pending.lock());
        for handle in &pending {
            handle.cancel();
        }
    }

    /// Number of handles currently pending.
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Whether no handles are pending.
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}
