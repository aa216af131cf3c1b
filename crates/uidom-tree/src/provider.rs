//! The provider SPI: how backends plug property values into elements.
//!
//! A provider answers identifier lookups for the elements it is
//! attached to, watches the properties rules depend on, and pushes
//! change notifications back into the tree. Providers are called on the
//! main thread only; anything that talks to a backend captures a worker
//! handle at construction and marshals replies back.
//!
//! [`PropertySlot`] is the per-property cache state machine providers
//! build on: idempotent watch, in-flight fetch generations, change
//! coalescing, and staleness checks for replies that arrive after an
//! unwatch.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::element::ElementId;
use crate::eval::{DependencySet, EvalCtx};
use crate::expr::Expression;
use crate::value::Value;

/// A source of element properties.
///
/// All methods run on the main thread. Default implementations answer
/// nothing, so a provider only overrides what it supports.
pub trait Provider: Send + Sync {
    /// Name for diagnostics.
    fn name(&self) -> &str;

    /// Resolve an identifier on an element. `Undefined` means "not
    /// mine"; the tree falls through to the next provider.
    fn evaluate_identifier(
        &self,
        _ctx: &EvalCtx<'_>,
        _element: ElementId,
        _name: &str,
        _deps: &mut DependencySet,
    ) -> Value {
        Value::Undefined
    }

    /// Second resolution pass, after every provider declined the first.
    /// Lets a provider supply fallbacks without shadowing others.
    fn evaluate_identifier_late(
        &self,
        _ctx: &EvalCtx<'_>,
        _element: ElementId,
        _name: &str,
        _deps: &mut DependencySet,
    ) -> Value {
        Value::Undefined
    }

    /// Start watching a dependency. Returns whether this provider owns
    /// the property. Must be idempotent.
    fn watch_property(
        &self,
        _ctx: &EvalCtx<'_>,
        _element: ElementId,
        _expr: &Expression,
    ) -> bool {
        false
    }

    /// Stop watching a dependency. Returns whether this provider owned
    /// the property. Must be idempotent.
    fn unwatch_property(
        &self,
        _ctx: &EvalCtx<'_>,
        _element: ElementId,
        _expr: &Expression,
    ) -> bool {
        false
    }

    /// Resolve a screen point to click for the element, asynchronously.
    /// Returns whether this provider took the request.
    fn clickable_point(
        &self,
        _ctx: &EvalCtx<'_>,
        _element: ElementId,
        _reply: Box<dyn FnOnce(Option<(i32, i32)>) + Send>,
    ) -> bool {
        false
    }

    /// Append diagnostic lines describing this provider's view of the
    /// element. Used by the tree dump.
    fn dump_properties(&self, _element: ElementId, _out: &mut String) {}

    /// The element's merged declaration map changed. Level-triggered:
    /// read the current declarations from the tree rather than assuming
    /// a delta.
    fn declarations_changed(&self, _ctx: &EvalCtx<'_>, _element: ElementId) {}

    /// Tracked property names this provider wants level-triggered
    /// notifications for, from other providers on the same element.
    fn tracked_properties(&self) -> &[&'static str] {
        &[]
    }

    /// A tracked property's merged value changed (or became available).
    fn tracked_property_changed(
        &self,
        _ctx: &EvalCtx<'_>,
        _element: ElementId,
        _name: &'static str,
        _value: &Value,
    ) {
    }

    /// The element was removed from the tree; drop per-element state.
    fn notify_element_removed(&self, _element: ElementId) {}
}

/// What happened when a fetch result reached a [`PropertySlot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotOutcome {
    /// The slot was unwatched or the fetch generation was stale; the
    /// result was discarded.
    Ignored,
    /// The value matched the cache; no notification needed.
    Unchanged,
    /// The cache was updated; dependents must be refreshed.
    Changed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    /// Nothing cached, nothing in flight.
    Unwatched,
    /// A fetch is in flight; no value known yet.
    Fetching,
    /// A value is cached and current as far as we know.
    Known,
    /// A value is cached but an invalidation arrived; refetch pending.
    Stale,
}

struct SlotInner<T> {
    state: SlotState,
    value: Option<T>,
    /// Bumped whenever in-flight results should be discarded.
    generation: u64,
    watched: bool,
    fetches: u64,
    notifications: u64,
}

/// Cache and lifecycle state for one watched property.
///
/// The generation counter is the staleness check: a fetch completion
/// carries the generation it was started under, and a completion whose
/// generation no longer matches is dropped.
pub struct PropertySlot<T: Clone + PartialEq> {
    inner: Mutex<SlotInner<T>>,
}

impl<T: Clone + PartialEq> PropertySlot<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SlotInner {
                state: SlotState::Unwatched,
                value: None,
                generation: 0,
                watched: false,
                fetches: 0,
                notifications: 0,
            }),
        }
    }

    /// Begin watching. Returns the generation to fetch under, or `None`
    /// when already watched (the idempotent re-watch case: no second
    /// fetch).
    pub fn begin_watch(&self) -> Option<u64> {
        let mut inner = self.inner.lock();
        if inner.watched {
            return None;
        }
        inner.watched = true;
        inner.state = SlotState::Fetching;
        inner.generation += 1;
        inner.fetches += 1;
        Some(inner.generation)
    }

    /// A fetch started under `generation` completed with `value`.
    pub fn complete(&self, generation: u64, value: T) -> SlotOutcome {
        let mut inner = self.inner.lock();
        if !inner.watched || inner.generation != generation {
            return SlotOutcome::Ignored;
        }
        inner.state = SlotState::Known;
        if inner.value.as_ref() == Some(&value) {
            SlotOutcome::Unchanged
        } else {
            inner.value = Some(value);
            inner.notifications += 1;
            SlotOutcome::Changed
        }
    }

    /// A fetch started under `generation` failed.
    ///
    /// The slot resets so a later watch retries instead of serving a
    /// phantom value.
    pub fn fail(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if inner.watched && inner.generation == generation {
            inner.state = SlotState::Unwatched;
            inner.watched = false;
            inner.value = None;
            inner.generation += 1;
        }
    }

    /// An invalidation event arrived; the cache is suspect. Returns the
    /// generation for the refetch, or `None` when unwatched.
    pub fn invalidate(&self) -> Option<u64> {
        let mut inner = self.inner.lock();
        if !inner.watched {
            return None;
        }
        inner.state = SlotState::Stale;
        inner.generation += 1;
        inner.fetches += 1;
        Some(inner.generation)
    }

    /// A change event carried the new value directly. Returns whether
    /// the cache changed (and dependents should refresh).
    pub fn set_from_event(&self, value: T) -> bool {
        let mut inner = self.inner.lock();
        if !inner.watched {
            return false;
        }
        // Supersede any in-flight fetch.
        inner.generation += 1;
        inner.state = SlotState::Known;
        if inner.value.as_ref() == Some(&value) {
            false
        } else {
            inner.value = Some(value);
            inner.notifications += 1;
            true
        }
    }

    /// Stop watching and drop the cache. In-flight completions become
    /// stale.
    pub fn end_watch(&self) {
        let mut inner = self.inner.lock();
        inner.watched = false;
        inner.state = SlotState::Unwatched;
        inner.value = None;
        inner.generation += 1;
    }

    /// The cached value, if any.
    pub fn value(&self) -> Option<T> {
        self.inner.lock().value.clone()
    }

    /// Whether the slot is being watched.
    pub fn is_watched(&self) -> bool {
        self.inner.lock().watched
    }

    /// Whether a value is cached and not known stale.
    pub fn is_known(&self) -> bool {
        self.inner.lock().state == SlotState::Known
    }

    /// Fetches started over the slot's lifetime.
    pub fn fetch_count(&self) -> u64 {
        self.inner.lock().fetches
    }

    /// Value changes observed over the slot's lifetime.
    pub fn notification_count(&self) -> u64 {
        self.inner.lock().notifications
    }
}

impl<T: Clone + PartialEq> Default for PropertySlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + PartialEq + fmt::Debug> fmt::Debug for PropertySlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("PropertySlot")
            .field("state", &inner.state)
            .field("value", &inner.value)
            .field("watched", &inner.watched)
            .field("generation", &inner.generation)
            .finish()
    }
}

/// Why a backend call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendErrorCode {
    /// The peer application exited or crashed.
    PeerGone,
    /// The peer did not answer.
    NoReply,
    /// The element does not implement the interface asked for.
    UnsupportedInterface,
    /// The element reference is no longer valid on the peer side.
    StaleReference,
    /// The call timed out.
    Timeout,
    /// Backend-specific code.
    Other(i32),
}

impl fmt::Display for BackendErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendErrorCode::PeerGone => f.write_str("peer gone"),
            BackendErrorCode::NoReply => f.write_str("no reply"),
            BackendErrorCode::UnsupportedInterface => f.write_str("unsupported interface"),
            BackendErrorCode::StaleReference => f.write_str("stale reference"),
            BackendErrorCode::Timeout => f.write_str("timeout"),
            BackendErrorCode::Other(code) => write!(f, "backend code {}", code),
        }
    }
}

/// An error returned by a native backend call.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct BackendError {
    pub code: BackendErrorCode,
    pub message: String,
}

impl BackendError {
    pub fn new(code: BackendErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Which backend errors a provider treats as ordinary.
///
/// Peers crash and windows close mid-query; those errors are expected
/// and logged at trace. Anything else indicates a bug in our protocol
/// handling, so debug builds panic on it and release builds log a
/// warning and carry on.
pub struct BackendErrorPolicy {
    backend: &'static str,
    expected: &'static [BackendErrorCode],
}

impl BackendErrorPolicy {
    pub fn new(backend: &'static str, expected: &'static [BackendErrorCode]) -> Self {
        Self { backend, expected }
    }

    /// Whether the policy treats this code as ordinary.
    pub fn is_expected(&self, code: BackendErrorCode) -> bool {
        self.expected.contains(&code)
    }

    /// Log or escalate a backend error, then continue. The caller
    /// treats the failed value as `Undefined` either way.
    pub fn absorb(&self, error: &BackendError, context: &str) {
        if self.is_expected(error.code) {
            tracing::trace!(
                target: "uidom_tree::provider",
                backend = self.backend,
                context,
                %error,
                "expected backend error"
            );
        } else if cfg!(debug_assertions) {
            panic!(
                "unexpected {} backend error in {}: {}",
                self.backend, context, error
            );
        } else {
            tracing::warn!(
                target: "uidom_tree::provider",
                backend = self.backend,
                context,
                %error,
                "unexpected backend error"
            );
        }
    }
}

impl fmt::Debug for BackendErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendErrorPolicy")
            .field("backend", &self.backend)
            .field("expected", &self.expected)
            .finish()
    }
}

/// A provider and the reference-counted handle the tree stores.
pub type ProviderRef = Arc<dyn Provider>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewatch_is_idempotent() {
        let slot: PropertySlot<i64> = PropertySlot::new();
        let generation = slot.begin_watch().unwrap();
        // Second watch while already watching: no second fetch.
        assert!(slot.begin_watch().is_none());
        assert_eq!(slot.fetch_count(), 1);

        assert_eq!(slot.complete(generation, 7), SlotOutcome::Changed);
        assert_eq!(slot.value(), Some(7));
        assert!(slot.is_known());
    }

    #[test]
    fn equal_completion_is_coalesced() {
        let slot: PropertySlot<i64> = PropertySlot::new();
        let generation = slot.begin_watch().unwrap();
        assert_eq!(slot.complete(generation, 7), SlotOutcome::Changed);

        let generation = slot.invalidate().unwrap();
        assert_eq!(slot.complete(generation, 7), SlotOutcome::Unchanged);
        assert_eq!(slot.notification_count(), 1);

        let generation = slot.invalidate().unwrap();
        assert_eq!(slot.complete(generation, 9), SlotOutcome::Changed);
        assert_eq!(slot.notification_count(), 2);
    }

    #[test]
    fn stale_generation_is_ignored() {
        let slot: PropertySlot<i64> = PropertySlot::new();
        let old = slot.begin_watch().unwrap();
        let new = slot.invalidate().unwrap();
        assert_ne!(old, new);

        // The first fetch answers after the invalidation.
        assert_eq!(slot.complete(old, 1), SlotOutcome::Ignored);
        assert!(slot.value().is_none());

        assert_eq!(slot.complete(new, 2), SlotOutcome::Changed);
        assert_eq!(slot.value(), Some(2));
    }

    #[test]
    fn completion_after_end_watch_is_dropped() {
        let slot: PropertySlot<i64> = PropertySlot::new();
        let generation = slot.begin_watch().unwrap();
        slot.end_watch();

        assert_eq!(slot.complete(generation, 5), SlotOutcome::Ignored);
        assert!(slot.value().is_none());
        assert!(!slot.is_watched());
    }

    #[test]
    fn failed_fetch_resets_for_retry() {
        let slot: PropertySlot<i64> = PropertySlot::new();
        let generation = slot.begin_watch().unwrap();
        slot.fail(generation);
        assert!(!slot.is_watched());

        // A later watch starts a fresh fetch.
        assert!(slot.begin_watch().is_some());
        assert_eq!(slot.fetch_count(), 2);
    }

    #[test]
    fn event_value_supersedes_in_flight_fetch() {
        let slot: PropertySlot<i64> = PropertySlot::new();
        let generation = slot.begin_watch().unwrap();

        assert!(slot.set_from_event(3));
        // The fetch started earlier answers late; it must lose.
        assert_eq!(slot.complete(generation, 99), SlotOutcome::Ignored);
        assert_eq!(slot.value(), Some(3));

        // Same value from another event: no notification.
        assert!(!slot.set_from_event(3));
    }

    #[test]
    fn expected_errors_are_absorbed_quietly() {
        let policy =
            BackendErrorPolicy::new("mock", &[BackendErrorCode::PeerGone, BackendErrorCode::Timeout]);
        policy.absorb(
            &BackendError::new(BackendErrorCode::PeerGone, "app exited"),
            "fetch name",
        );
        assert!(policy.is_expected(BackendErrorCode::Timeout));
        assert!(!policy.is_expected(BackendErrorCode::NoReply));
    }

    #[test]
    #[should_panic(expected = "unexpected mock backend error")]
    #[cfg(debug_assertions)]
    fn unexpected_errors_panic_in_debug() {
        let policy = BackendErrorPolicy::new("mock", &[BackendErrorCode::PeerGone]);
        policy.absorb(
            &BackendError::new(BackendErrorCode::NoReply, "silence"),
            "fetch role",
        );
    }
}
