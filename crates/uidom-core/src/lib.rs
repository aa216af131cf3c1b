//! Runtime substrate for UiDom.
//!
//! This crate provides the threading model the accessibility tree is
//! built on:
//!
//! - [`MainLoop`] / [`MainHandle`]: a single logical main thread that
//!   runs all tree mutation, with cross-thread marshalling of closures.
//! - [`BackendWorker`]: a dedicated thread for blocking backend IPC,
//!   with three priority tiers ([`CommandPriority`]).
//! - [`SharedPollScheduler`]: deadline-ordered poll tasks for
//!   properties that cannot be watched.
//! - [`completion_pair`]: one-shot completion signalling between
//!   threads, used for routine tokens and synchronous posts.
//!
//! Nothing in here knows about elements, rules, or values; the tree
//! crate layers those on top.

pub mod error;
pub mod invoke;
pub mod logging;
pub mod main_loop;
pub mod scheduler;
pub mod worker;

pub use error::{CoreError, Result, SchedulerError, WorkerError};
pub use invoke::{completion_pair, CompletionHandle, CompletionWaiter, QueuedInvocation};
pub use logging::PerfSpan;
pub use main_loop::{MainHandle, MainLoop};
pub use scheduler::{PollScheduler, PollTaskId, SharedPollScheduler, DEFAULT_POLL_INTERVAL};
pub use worker::{BackendWorker, CommandPriority};
