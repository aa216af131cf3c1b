//! A unified accessibility element tree with reactive rule evaluation.
//!
//! UiDom presents the accessibility hierarchies of native backends as
//! one tree of elements. Declarative rules select elements and assign
//! declarations to them; evaluation records exactly which properties it
//! read, and those properties are watched so a backend change re-runs
//! only the rules that could care.
//!
//! The crate is organised around a few pieces:
//!
//! - [`value::Value`]: the tagged value domain, where the unanswerable
//!   is `Undefined` rather than an error.
//! - [`expr::Expression`]: parsed rule expressions, doubling as
//!   hashable dependency keys.
//! - [`eval`]: total, dependency-recording evaluation.
//! - [`element::Tree`]: the element arena and identifier resolution.
//! - [`provider::Provider`]: the SPI backends implement, with
//!   [`provider::PropertySlot`] as the per-property cache state machine.
//! - [`rules`] and [`root::Root`]: rule sets, refresh, and change
//!   propagation.
//!
//! Threading: the tree and root are main-thread structures (see
//! `uidom_core`); providers marshal blocking backend work through a
//! [`root::Backend`] handle.

pub mod element;
pub mod eval;
pub mod expr;
pub mod provider;
pub mod root;
pub mod rules;
pub mod tables;
pub mod value;

pub use element::{ElementId, Tree};
pub use eval::{evaluate, DependencySet, EvalCtx};
pub use expr::{BinaryOp, Expression};
pub use provider::{
    BackendError, BackendErrorCode, BackendErrorPolicy, PropertySlot, Provider, ProviderRef,
    SlotOutcome,
};
pub use root::{Backend, Root, SharedRoot};
pub use rules::{Rule, RuleSet, RuleSetBuilder};
pub use tables::{global_enum_value, roles, states, EnumTable, EnumValue, StateSet};
pub use value::{ActionList, AttributeMap, RoutineToken, RoutineValue, Value};
