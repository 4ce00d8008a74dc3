use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::trace;

use crate::error::HanError;

type Callback = Box<dyn FnOnce(Result<(), HanError>) + Send>;

/// Observable lifecycle of a [`Completion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionState {
    Active { remaining: usize },
    /// The last operation finished; the callback is running.
    Complete,
    /// The callback has run and everything it captured is gone.
    Released,
}

/// A single completion handle over `N` asynchronous operations.
///
/// Each operation reports once through
/// [`on_operation_complete`](Completion::on_operation_complete), from any
/// thread. The thread that brings the active count to zero takes the user
/// callback out of the handle and runs it; no other thread ever sees it.
/// The callback receives the first error reported, if any.
pub struct Completion {
    registered: usize,
    active: AtomicUsize,
    /// One flag per operation; a slot reports at most once.
    slots: Vec<AtomicBool>,
    first_error: Mutex<Option<HanError>>,
    callback: Mutex<Option<Callback>>,
    released: AtomicBool,
}

impl Completion {
    /// Attach `callback` to `count` outstanding operations.
    ///
    /// With `count == 0` the callback runs before this returns.
    pub fn attach<F>(count: usize, callback: F) -> Arc<Self>
    where
        F: FnOnce(Result<(), HanError>) + Send + 'static,
    {
        let completion = Arc::new(Self {
            registered: count,
            active: AtomicUsize::new(count),
            slots: (0..count).map(|_| AtomicBool::new(false)).collect(),
            first_error: Mutex::new(None),
            callback: Mutex::new(Some(Box::new(callback))),
            released: AtomicBool::new(false),
        });
        if count == 0 {
            completion.fire();
        }
        completion
    }

    pub fn registered(&self) -> usize {
        self.registered
    }

    pub fn state(&self) -> CompletionState {
        if self.released.load(Ordering::Acquire) {
            return CompletionState::Released;
        }
        match self.active.load(Ordering::Acquire) {
            0 => CompletionState::Complete,
            remaining => CompletionState::Active { remaining },
        }
    }

    /// Record the outcome of operation `slot`.
    ///
    /// Returns `true` on the call that completed the handle and ran the
    /// callback. Reports for an out-of-range or already-reported slot are
    /// ignored.
    pub fn on_operation_complete(&self, slot: usize, result: Result<(), HanError>) -> bool {
        let Some(flag) = self.slots.get(slot) else {
            trace!(slot, registered = self.registered, "ignoring unknown completion slot");
            return false;
        };
        if flag.swap(true, Ordering::AcqRel) {
            trace!(slot, "ignoring duplicate completion");
            return false;
        }

        if let Err(e) = result {
            let mut first = self
                .first_error
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            first.get_or_insert(e);
        }

        // Each slot decrements once, so this cannot underflow.
        if self.active.fetch_sub(1, Ordering::AcqRel) != 1 {
            return false;
        }
        self.fire();
        true
    }

    fn fire(&self) {
        let callback = self
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let error = self
            .first_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(callback) = callback {
            callback(error.map_or(Ok(()), Err));
        }
        self.released.store(true, Ordering::Release);
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("registered", &self.registered)
            .field("state", &self.state())
            .finish()
    }
}
