//! The logical main thread.
//!
//! All tree mutation, rule evaluation, and provider bookkeeping happen
//! on one thread. Everything that originates elsewhere (backend reply
//! callbacks, event listeners, embedder requests) is marshalled here as
//! a [`QueuedInvocation`] through a [`MainHandle`].
//!
//! The loop interleaves queued invocations with due poll tasks from the
//! shared [`SharedPollScheduler`], sleeping no longer than the next poll
//! deadline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::error::{CoreError, Result};
use crate::invoke::{completion_pair, CompletionWaiter, QueuedInvocation};
use crate::scheduler::SharedPollScheduler;

/// Fallback sleep when no poll task is pending; keeps quit latency bounded.
const IDLE_TIMEOUT: Duration = Duration::from_millis(100);

struct MainShared {
    sender: Sender<QueuedInvocation>,
    thread: ThreadId,
    scheduler: SharedPollScheduler,
    closed: AtomicBool,
}

/// The main event loop.
///
/// Created on the thread that will run it; that thread becomes the
/// logical main thread for the lifetime of the loop.
pub struct MainLoop {
    receiver: Receiver<QueuedInvocation>,
    shared: Arc<MainShared>,
}

impl MainLoop {
    /// Create a main loop bound to the current thread.
    pub fn new() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let shared = Arc::new(MainShared {
            sender,
            thread: thread::current().id(),
            scheduler: SharedPollScheduler::new(),
            closed: AtomicBool::new(false),
        });
        Self { receiver, shared }
    }

    /// Get a clonable handle for posting work to this loop.
    pub fn handle(&self) -> MainHandle {
        MainHandle {
            shared: self.shared.clone(),
        }
    }

    /// The shared poll scheduler driven by this loop.
    pub fn poll_scheduler(&self) -> SharedPollScheduler {
        self.shared.scheduler.clone()
    }

    /// Run until [`MainHandle::quit`] is called.
    ///
    /// Executes queued invocations as they arrive and fires due poll
    /// tasks between them.
    pub fn run(&mut self) {
        tracing::debug!(target: "uidom_core::main_loop", "main loop started");
        while !self.shared.closed.load(Ordering::Acquire) {
            self.shared.scheduler.process_ready();

            let timeout = self
                .shared
                .scheduler
                .time_until_next()
                .map_or(IDLE_TIMEOUT, |d| d.min(IDLE_TIMEOUT));

            match self.receiver.recv_timeout(timeout) {
                Ok(invocation) => invocation.execute(),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        // Drain anything posted before quit so completions are signalled.
        while let Ok(invocation) = self.receiver.try_recv() {
            invocation.execute();
        }
        tracing::debug!(target: "uidom_core::main_loop", "main loop stopped");
    }

    /// Execute every invocation currently queued, without blocking.
    ///
    /// Returns how many invocations ran. Poll tasks are processed first.
    pub fn process_pending(&mut self) -> usize {
        self.shared.scheduler.process_ready();
        let mut executed = 0;
        while let Ok(invocation) = self.receiver.try_recv() {
            invocation.execute();
            executed += 1;
        }
        executed
    }

    /// Run for at most `timeout`, then return. Useful in tests that
    /// drive the loop from the test thread.
    pub fn turn(&mut self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut executed = 0;
        loop {
            self.shared.scheduler.process_ready();
            let now = Instant::now();
            if now >= deadline || self.shared.closed.load(Ordering::Acquire) {
                break;
            }
            let remaining = deadline - now;
            let wait = self
                .shared
                .scheduler
                .time_until_next()
                .map_or(remaining, |d| d.min(remaining));
            match self.receiver.recv_timeout(wait) {
                Ok(invocation) => {
                    invocation.execute();
                    executed += 1;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        executed
    }
}

impl Default for MainLoop {
    fn default() -> Self {
        Self::new()
    }
}

/// A clonable, thread-safe handle to the main loop.
#[derive(Clone)]
pub struct MainHandle {
    shared: Arc<MainShared>,
}

impl MainHandle {
    /// Queue a closure to run on the main thread. FIFO with respect to
    /// other posts from the same thread.
    pub fn post<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(CoreError::MainLoopClosed);
        }
        self.shared
            .sender
            .send(QueuedInvocation::new(f))
            .map_err(|_| CoreError::MainLoopClosed)
    }

    /// Queue a closure and get a waiter that is signalled after it runs.
    pub fn post_with_completion<F>(&self, f: F) -> Result<CompletionWaiter>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(CoreError::MainLoopClosed);
        }
        let (handle, waiter) = completion_pair();
        self.shared
            .sender
            .send(QueuedInvocation::with_completion(f, handle))
            .map_err(|_| CoreError::MainLoopClosed)?;
        Ok(waiter)
    }

    /// Whether the calling thread is the main thread.
    pub fn is_main_thread(&self) -> bool {
        thread::current().id() == self.shared.thread
    }

    /// Assert main-thread affinity in debug builds.
    #[track_caller]
    pub fn debug_assert_main_thread(&self) {
        debug_assert!(
            self.is_main_thread(),
            "called off the main thread"
        );
    }

    /// Error when called off the main thread.
    pub fn ensure_main_thread(&self) -> Result<()> {
        if self.is_main_thread() {
            Ok(())
        } else {
            Err(CoreError::NotMainThread)
        }
    }

    /// The poll scheduler owned by the loop.
    pub fn poll_scheduler(&self) -> SharedPollScheduler {
        self.shared.scheduler.clone()
    }

    /// Ask the loop to stop. Invocations already queued still run.
    pub fn quit(&self) {
        self.shared.closed.store(true, Ordering::Release);
        // Wake the loop if it is sleeping in recv_timeout.
        let _ = self.shared.sender.send(QueuedInvocation::new(|| {}));
    }

    /// Whether the loop has been asked to stop.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}
