//! Error types for the UiDom runtime substrate.

use std::fmt;

/// The main error type for runtime operations.
#[derive(Debug)]
pub enum CoreError {
    /// The main loop has shut down and no longer accepts tasks.
    MainLoopClosed,
    /// An operation that requires main-thread affinity was called elsewhere.
    NotMainThread,
    /// Poll scheduler error.
    Scheduler(SchedulerError),
    /// Backend worker error.
    Worker(WorkerError),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MainLoopClosed => write!(f, "Main loop has shut down"),
            Self::NotMainThread => {
                write!(f, "Operation requires the main thread")
            }
            Self::Scheduler(err) => write!(f, "Scheduler error: {err}"),
            Self::Worker(err) => write!(f, "Worker error: {err}"),
        }
    }
}

impl std::error::Error for CoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Scheduler(err) => Some(err),
            Self::Worker(err) => Some(err),
            _ => None,
        }
    }
}

/// Poll-scheduler-specific errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// The poll task ID is invalid or has already been cancelled.
    InvalidTaskId,
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTaskId => write!(f, "Invalid or cancelled poll task ID"),
        }
    }
}

impl std::error::Error for SchedulerError {}

impl From<SchedulerError> for CoreError {
    fn from(err: SchedulerError) -> Self {
        Self::Scheduler(err)
    }
}

/// Backend-worker-specific errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    /// The worker has been stopped and no longer accepts commands.
    Stopped,
    /// The command queue is at capacity.
    QueueFull,
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => write!(f, "Backend worker has been stopped"),
            Self::QueueFull => write!(f, "Backend worker command queue is full"),
        }
    }
}

impl std::error::Error for WorkerError {}

impl From<WorkerError> for CoreError {
    fn from(err: WorkerError) -> Self {
        Self::Worker(err)
    }
}

/// A specialized Result type for UiDom runtime operations.
pub type Result<T> = std::result::Result<T, CoreError>;
