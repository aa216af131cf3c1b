//! Poll scheduler for properties with no push notification.
//!
//! Some backend properties (absolute position, for one) have no
//! change event, so the tree re-fetches them on a short fixed interval
//! while something depends on them. A repeating entry is registered
//! when such a property gains its first watcher and cancelled when the
//! last watcher goes away; one-shot entries cover deferred retries.
//! The main loop drives the scheduler between posted invocations.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::{Result, SchedulerError};

/// Default interval for properties that must be polled: frequent enough
/// to feel live, rare enough not to hammer the peer over IPC.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Identifies a scheduled poll while it is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PollTaskId(u64);

struct PollTask {
    due: Instant,
    /// `Some` keeps the poll alive after each run.
    repeat: Option<Duration>,
    run: Box<dyn FnMut() + Send + 'static>,
}

/// Manages scheduled poll tasks.
///
/// Tasks live in a map keyed by id; a `BTreeSet` of `(deadline, id)`
/// pairs gives the due order. Both are updated together, so a cancelled
/// poll is gone immediately and never surfaces again.
pub struct PollScheduler {
    tasks: HashMap<u64, PollTask>,
    deadlines: BTreeSet<(Instant, u64)>,
    next_id: u64,
}

impl PollScheduler {
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
            deadlines: BTreeSet::new(),
            next_id: 0,
        }
    }

    /// Schedule a task to run once after `delay`.
    pub fn schedule_once<F>(&mut self, delay: Duration, task: F) -> PollTaskId
    where
        F: FnMut() + Send + 'static,
    {
        self.insert(delay, None, Box::new(task))
    }

    /// Schedule a task to run every `interval`, starting one interval
    /// from now.
    pub fn schedule_repeating<F>(&mut self, interval: Duration, task: F) -> PollTaskId
    where
        F: FnMut() + Send + 'static,
    {
        self.insert(interval, Some(interval), Box::new(task))
    }

    fn insert(
        &mut self,
        delay: Duration,
        repeat: Option<Duration>,
        run: Box<dyn FnMut() + Send + 'static>,
    ) -> PollTaskId {
        let id = self.next_id;
        self.next_id += 1;
        let due = Instant::now() + delay;
        self.tasks.insert(id, PollTask { due, repeat, run });
        self.deadlines.insert((due, id));
        tracing::trace!(target: "uidom_core::scheduler", id, ?repeat, "scheduled poll task");
        PollTaskId(id)
    }

    /// Cancel and remove a scheduled task.
    pub fn cancel(&mut self, id: PollTaskId) -> Result<()> {
        match self.tasks.remove(&id.0) {
            Some(task) => {
                self.deadlines.remove(&(task.due, id.0));
                tracing::trace!(target: "uidom_core::scheduler", id = id.0, "cancelled poll task");
                Ok(())
            }
            None => Err(SchedulerError::InvalidTaskId.into()),
        }
    }

    /// Whether the task is still scheduled.
    pub fn is_active(&self, id: PollTaskId) -> bool {
        self.tasks.contains_key(&id.0)
    }

    /// Time until the earliest deadline, if any task is scheduled.
    pub fn time_until_next(&self) -> Option<Duration> {
        self.deadlines
            .first()
            .map(|&(due, _)| due.saturating_duration_since(Instant::now()))
    }

    /// Run every task that is due. Returns how many ran.
    pub fn process_ready(&mut self) -> usize {
        let now = Instant::now();
        let mut executed = 0;

        while let Some((due, id)) = self.deadlines.pop_first() {
            if due > now {
                self.deadlines.insert((due, id));
                break;
            }
            let Some(mut task) = self.tasks.remove(&id) else {
                continue;
            };

            (task.run)();
            executed += 1;

            if let Some(interval) = task.repeat {
                // Count from the deadline, not from now, so a slow run
                // does not stretch the poll period.
                task.due = due + interval;
                self.deadlines.insert((task.due, id));
                self.tasks.insert(id, task);
            }
        }

        executed
    }

    /// Number of scheduled tasks.
    pub fn active_count(&self) -> usize {
        self.tasks.len()
    }
}

impl Default for PollScheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// A clonable thread-safe handle to a [`PollScheduler`].
///
/// Providers hold one of these to register/cancel polls from watch
/// callbacks; the main loop holds the same scheduler to drive it.
#[derive(Clone)]
pub struct SharedPollScheduler {
    inner: Arc<Mutex<PollScheduler>>,
}

impl SharedPollScheduler {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(PollScheduler::new())),
        }
    }

    /// Schedule a one-shot task.
    pub fn schedule_once<F>(&self, delay: Duration, task: F) -> PollTaskId
    where
        F: FnMut() + Send + 'static,
    {
        self.inner.lock().schedule_once(delay, task)
    }

    /// Schedule a repeating task.
    pub fn schedule_repeating<F>(&self, interval: Duration, task: F) -> PollTaskId
    where
        F: FnMut() + Send + 'static,
    {
        self.inner.lock().schedule_repeating(interval, task)
    }

    /// Cancel a task.
    pub fn cancel(&self, id: PollTaskId) -> Result<()> {
        self.inner.lock().cancel(id)
    }

    /// Check if a task is active.
    pub fn is_active(&self, id: PollTaskId) -> bool {
        self.inner.lock().is_active(id)
    }

    /// Time until the next due task.
    pub fn time_until_next(&self) -> Option<Duration> {
        self.inner.lock().time_until_next()
    }

    /// Process all due tasks.
    pub fn process_ready(&self) -> usize {
        self.inner.lock().process_ready()
    }

    /// Number of active tasks.
    pub fn active_count(&self) -> usize {
        self.inner.lock().active_count()
    }
}

impl Default for SharedPollScheduler {
    fn default() -> Self {
        Self::new()
    }
}
