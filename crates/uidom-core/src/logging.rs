//! Logging conventions for the UiDom runtime.
//!
//! UiDom uses the `tracing` crate for structured logging. Install a
//! subscriber in the embedding application to see output:
//!
//! ```ignore
//! tracing_subscriber::fmt::init();
//! ```
//!
//! Every log line carries a per-subsystem target so directives like
//! `uidom_core::worker=trace` can narrow output to one subsystem.

/// Target names for log filtering.
pub mod targets {
    /// Runtime substrate target.
    pub const CORE: &str = "uidom_core";
    /// Main loop target.
    pub const MAIN_LOOP: &str = "uidom_core::main_loop";
    /// Poll scheduler target.
    pub const SCHEDULER: &str = "uidom_core::scheduler";
    /// Backend worker target.
    pub const WORKER: &str = "uidom_core::worker";
}

/// A guard that scopes a tracing span to an operation's duration.
#[derive(Debug)]
pub struct PerfSpan {
    #[allow(dead_code)]
    span: tracing::span::EnteredSpan,
}

impl PerfSpan {
    /// Create a new performance span, active until the guard drops.
    pub fn new(name: &'static str) -> Self {
        let span = tracing::info_span!(target: "uidom::perf", "perf", operation = name);
        Self {
            span: span.entered(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perf_span_is_droppable() {
        let _span = PerfSpan::new("test_operation");
    }
}
