//! Deferred invocations and single-assignment completion handles.
//!
//! Backend fetches run on the worker thread, but their results must touch
//! tree state only on the main thread. A [`QueuedInvocation`] wraps the
//! marshaled closure; a [`CompletionHandle`]/[`CompletionWaiter`] pair lets
//! the originating side block (or poll) until the closure has actually run.
//!
//! The waiter side is also what a synthetic-input routine hands back to its
//! caller as an execution token: the overlay fires a click routine, keeps
//! the waiter, and can time out if the action never lands.

use std::cell::Cell;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

/// A type-erased deferred invocation that can be executed later on the
/// main thread.
pub struct QueuedInvocation {
    invoke: Box<dyn FnOnce() + Send>,
    completion: Option<CompletionHandle>,
}

impl QueuedInvocation {
    /// Create a new queued invocation.
    pub fn new<F>(invoke: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            invoke: Box::new(invoke),
            completion: None,
        }
    }

    /// Create a queued invocation that signals a completion handle when done.
    pub fn with_completion<F>(invoke: F, completion: CompletionHandle) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            invoke: Box::new(invoke),
            completion: Some(completion),
        }
    }

    /// Execute the invocation, signalling completion if one was attached.
    pub fn execute(self) {
        (self.invoke)();
        if let Some(completion) = self.completion {
            completion.signal_done();
        }
    }
}

/// The signalling half of a completion pair.
///
/// Dropping the handle without signalling leaves the waiter unsignalled
/// for good; a queued invocation discarded by a closing loop therefore
/// never reports success.
pub struct CompletionHandle {
    tx: Sender<()>,
}

impl CompletionHandle {
    /// Signal that the invocation has finished.
    pub fn signal_done(self) {
        let _ = self.tx.send(());
    }
}

/// The waiting half of a completion pair.
///
/// Single-assignment: once the signal has been observed it stays done.
pub struct CompletionWaiter {
    rx: Receiver<()>,
    seen: Cell<bool>,
}

impl CompletionWaiter {
    /// Check whether the invocation has finished, without blocking.
    pub fn is_done(&self) -> bool {
        if self.seen.get() {
            return true;
        }
        if self.rx.try_recv().is_ok() {
            self.seen.set(true);
        }
        self.seen.get()
    }

    /// Block until the invocation finishes or its handle is dropped
    /// unsignalled.
    ///
    /// # Warning
    ///
    /// Calling this from the main thread for an invocation that runs on the
    /// main thread deadlocks. The waiter is meant for worker/input threads.
    pub fn wait(self) {
        if self.seen.get() {
            return;
        }
        // Err means the handle is gone; nothing further can arrive.
        let _ = self.rx.recv();
    }

    /// Block until the invocation finishes or the timeout elapses.
    ///
    /// Returns `true` only if the invocation completed.
    pub fn wait_timeout(self, timeout: Duration) -> bool {
        if self.seen.get() {
            return true;
        }
        match self.rx.recv_timeout(timeout) {
            Ok(()) => true,
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }
}

/// Create a completion handle/waiter pair.
pub fn completion_pair() -> (CompletionHandle, CompletionWaiter) {
    // One slot, one message ever; signalling never blocks.
    let (tx, rx) = bounded(1);
    (
        CompletionHandle { tx },
        CompletionWaiter {
            rx,
            seen: Cell::new(false),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn execute_runs_closure() {
        let executed = Arc::new(AtomicBool::new(false));
        let executed_clone = executed.clone();

        let invocation = QueuedInvocation::new(move || {
            executed_clone.store(true, Ordering::SeqCst);
        });
        invocation.execute();

        assert!(executed.load(Ordering::SeqCst));
    }

    #[test]
    fn completion_pair_signals_across_threads() {
        let (handle, waiter) = completion_pair();

        let thread = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            handle.signal_done();
        });

        waiter.wait();
        thread.join().unwrap();
    }

    #[test]
    fn completion_with_invocation() {
        let executed = Arc::new(AtomicBool::new(false));
        let (handle, waiter) = completion_pair();

        let executed_clone = executed.clone();
        let invocation = QueuedInvocation::with_completion(
            move || {
                executed_clone.store(true, Ordering::SeqCst);
            },
            handle,
        );

        assert!(!waiter.is_done());
        invocation.execute();
        assert!(waiter.is_done());
        assert!(executed.load(Ordering::SeqCst));
    }

    #[test]
    fn completion_timeout_when_never_signalled() {
        let (_handle, waiter) = completion_pair();
        let completed = waiter.wait_timeout(Duration::from_millis(10));
        assert!(!completed);
    }

    #[test]
    fn abandoned_handle_never_reports_success() {
        let (handle, waiter) = completion_pair();
        drop(handle);
        assert!(!waiter.is_done());
        assert!(!waiter.wait_timeout(Duration::from_secs(1)));
    }
}
