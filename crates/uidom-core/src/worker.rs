//! The backend worker thread.
//!
//! All blocking calls into a native accessibility backend run on one
//! dedicated thread so the main thread never stalls on IPC. Jobs are
//! queued in three priority tiers: user actions jump ahead of property
//! queries, which jump ahead of background polls.
//!
//! Results come back to the main thread via [`BackendWorker::submit_with_reply`],
//! which posts the reply closure through a [`MainHandle`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

use crate::error::WorkerError;
use crate::main_loop::MainHandle;

/// Maximum queued jobs across all tiers before `submit` refuses work.
const DEFAULT_CAPACITY: usize = 1024;

/// Priority tier for a backend job. Higher tiers drain first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CommandPriority {
    /// Background refresh of polled properties.
    Poll = 0,
    /// Property fetches needed to evaluate rules.
    Query = 1,
    /// Actions the user asked for (click, focus, set value).
    UserAction = 2,
}

type Job = Box<dyn FnOnce() + Send + 'static>;

struct TierQueues {
    tiers: [VecDeque<Job>; 3],
    stopped: bool,
}

impl TierQueues {
    fn len(&self) -> usize {
        self.tiers.iter().map(VecDeque::len).sum()
    }

    fn pop_highest(&mut self) -> Option<Job> {
        for tier in self.tiers.iter_mut().rev() {
            if let Some(job) = tier.pop_front() {
                return Some(job);
            }
        }
        None
    }
}

struct WorkerShared {
    queues: Mutex<TierQueues>,
    wake: Condvar,
    capacity: usize,
}

/// A dedicated thread for blocking backend calls.
///
/// Dropping the worker stops it; jobs already queued still run before
/// the thread exits.
pub struct BackendWorker {
    shared: Arc<WorkerShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl BackendWorker {
    /// Spawn the worker thread with the default queue capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Spawn the worker thread with an explicit queue capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let shared = Arc::new(WorkerShared {
            queues: Mutex::new(TierQueues {
                tiers: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
                stopped: false,
            }),
            wake: Condvar::new(),
            capacity,
        });

        let thread_shared = shared.clone();
        let thread = std::thread::Builder::new()
            .name("uidom-backend".into())
            .spawn(move || worker_loop(thread_shared))
            .ok();

        if thread.is_none() {
            tracing::error!(target: "uidom_core::worker", "failed to spawn backend worker thread");
        }

        Self {
            shared,
            thread: Mutex::new(thread),
        }
    }

    /// Queue a job at the given priority.
    pub fn submit<F>(&self, priority: CommandPriority, job: F) -> Result<(), WorkerError>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut queues = self.shared.queues.lock();
        if queues.stopped {
            return Err(WorkerError::Stopped);
        }
        if queues.len() >= self.shared.capacity {
            tracing::warn!(
                target: "uidom_core::worker",
                ?priority,
                capacity = self.shared.capacity,
                "backend queue full, rejecting job"
            );
            return Err(WorkerError::QueueFull);
        }
        queues.tiers[priority as usize].push_back(Box::new(job));
        drop(queues);
        self.shared.wake.notify_one();
        Ok(())
    }

    /// Queue a fetch whose result is marshalled back to the main thread.
    ///
    /// `fetch` runs on the worker; `reply` runs on the main loop with the
    /// fetched value. If the main loop has closed by then the reply is
    /// dropped.
    pub fn submit_with_reply<T, F, R>(
        &self,
        priority: CommandPriority,
        main: &MainHandle,
        fetch: F,
        reply: R,
    ) -> Result<(), WorkerError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
        R: FnOnce(T) + Send + 'static,
    {
        let main = main.clone();
        self.submit(priority, move || {
            let value = fetch();
            if main.post(move || reply(value)).is_err() {
                tracing::debug!(
                    target: "uidom_core::worker",
                    "main loop closed, dropping backend reply"
                );
            }
        })
    }

    /// Run a job on the worker and block until it completes.
    ///
    /// Must not be called from the main thread in production paths; it
    /// exists for setup and teardown sequences.
    pub fn submit_sync<T, F>(&self, priority: CommandPriority, job: F) -> Result<T, WorkerError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.submit(priority, move || {
            let _ = tx.send(job());
        })?;
        rx.recv().map_err(|_| WorkerError::Stopped)
    }

    /// Jobs currently queued across all tiers.
    pub fn pending(&self) -> usize {
        self.shared.queues.lock().len()
    }

    /// Stop the worker. Queued jobs still run; new submissions fail.
    pub fn stop(&self) {
        let mut queues = self.shared.queues.lock();
        if queues.stopped {
            return;
        }
        queues.stopped = true;
        drop(queues);
        self.shared.wake.notify_all();
    }

    /// Stop and wait for the worker thread to finish its queue.
    pub fn join(&self) {
        self.stop();
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                tracing::error!(target: "uidom_core::worker", "backend worker thread panicked");
            }
        }
    }
}

impl Default for BackendWorker {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BackendWorker {
    fn drop(&mut self) {
        self.join();
    }
}

fn worker_loop(shared: Arc<WorkerShared>) {
    tracing::debug!(target: "uidom_core::worker", "backend worker started");
    let mut queues = shared.queues.lock();
    loop {
        if let Some(job) = queues.pop_highest() {
            drop(queues);
            job();
            queues = shared.queues.lock();
            continue;
        }
        if queues.stopped {
            break;
        }
        shared.wake.wait(&mut queues);
    }
    drop(queues);
    tracing::debug!(target: "uidom_core::worker", "backend worker stopped");
}
