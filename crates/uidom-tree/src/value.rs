//! The tagged value type flowing through rule evaluation.
//!
//! Every property read, literal, and intermediate result is a [`Value`].
//! There is no error variant; anything unanswerable is [`Value::Undefined`],
//! and operations on `Undefined` stay `Undefined` so partial knowledge
//! propagates instead of aborting a rule.
//!
//! Values are hashable (doubles by bit pattern) because cached property
//! values are compared for change coalescing and routine identities key
//! watcher maps.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use uidom_core::{completion_pair, CompletionWaiter};

use crate::element::ElementId;
use crate::eval::{DependencySet, EvalCtx};
use crate::expr::Expression;
use crate::tables::{EnumValue, StateSet};

/// Signalled when a routine invocation has been carried out by the
/// backend. Callers may wait on it or drop it.
pub type RoutineToken = CompletionWaiter;

/// A function that evaluates a query routine during rule evaluation.
///
/// Receives the value the call was evaluated against (so lazy argument
/// expressions resolve against the caller, not the routine's bound
/// element) and the unevaluated argument expressions, recording any
/// dependencies into `deps`.
pub type QueryFn = Arc<
    dyn Fn(&EvalCtx<'_>, &Value, &[Expression], &mut DependencySet) -> Value + Send + Sync,
>;

/// A function that performs a backend action.
///
/// Receives already-evaluated arguments and a completion handle to
/// signal when the backend has finished.
pub type ActionFn = Arc<dyn Fn(Vec<Value>, uidom_core::CompletionHandle) + Send + Sync>;

/// What a routine does when applied or invoked.
#[derive(Clone)]
pub enum RoutineKind {
    /// Computed during evaluation, like a parameterised property.
    Query(QueryFn),
    /// Side-effecting backend call, never run during evaluation.
    Action(ActionFn),
}

/// A callable bound to an element.
///
/// Identity (equality, hashing) is the `(element, name)` pair; the
/// implementation closure does not participate, so re-fetching the
/// same routine never looks like a change.
#[derive(Clone)]
pub struct RoutineValue {
    element: ElementId,
    name: Arc<str>,
    kind: RoutineKind,
}

impl RoutineValue {
    /// A query routine.
    pub fn query(element: ElementId, name: impl Into<Arc<str>>, f: QueryFn) -> Self {
        Self {
            element,
            name: name.into(),
            kind: RoutineKind::Query(f),
        }
    }

    /// An action routine.
    pub fn action(element: ElementId, name: impl Into<Arc<str>>, f: ActionFn) -> Self {
        Self {
            element,
            name: name.into(),
            kind: RoutineKind::Action(f),
        }
    }

    /// The element this routine is bound to.
    pub fn element(&self) -> ElementId {
        self.element
    }

    /// The routine name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this is an action routine.
    pub fn is_action(&self) -> bool {
        matches!(self.kind, RoutineKind::Action(_))
    }

    /// Apply during evaluation.
    ///
    /// Query routines compute their value; applying an action routine
    /// inside an expression is meaningless (evaluation must stay free
    /// of side effects) and yields `Undefined`.
    pub fn apply(
        &self,
        ctx: &EvalCtx<'_>,
        node: &Value,
        args: &[Expression],
        deps: &mut DependencySet,
    ) -> Value {
        match &self.kind {
            RoutineKind::Query(f) => f(ctx, node, args, deps),
            RoutineKind::Action(_) => {
                tracing::debug!(
                    target: "uidom_tree::value",
                    routine = %self.name,
                    element = ?self.element,
                    "action routine applied in expression, yielding undefined"
                );
                Value::Undefined
            }
        }
    }

    /// Invoke an action routine with evaluated arguments.
    ///
    /// The returned token is signalled once the backend call completes.
    /// Invoking a query routine is a no-op with an already-signalled
    /// token.
    pub fn invoke(&self, args: Vec<Value>) -> RoutineToken {
        let (handle, waiter) = completion_pair();
        match &self.kind {
            RoutineKind::Action(f) => f(args, handle),
            RoutineKind::Query(_) => {
                tracing::debug!(
                    target: "uidom_tree::value",
                    routine = %self.name,
                    "query routine invoked as action, ignoring"
                );
                handle.signal_done();
            }
        }
        waiter
    }
}

impl PartialEq for RoutineValue {
    fn eq(&self, other: &Self) -> bool {
        self.element == other.element && self.name == other.name
    }
}

impl Eq for RoutineValue {}

impl Hash for RoutineValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.element.hash(state);
        self.name.hash(state);
    }
}

impl fmt::Debug for RoutineValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutineValue")
            .field("element", &self.element)
            .field("name", &self.name)
            .field("action", &self.is_action())
            .finish()
    }
}

/// Dispatches a named action to the backend that owns the element.
pub type ActionInvoker = Arc<dyn Fn(&str, Vec<Value>, uidom_core::CompletionHandle) + Send + Sync>;

/// The set of actions a backend reports for an element.
///
/// Identity is the `(element, names)` pair; the invoker closure does
/// not participate.
#[derive(Clone)]
pub struct ActionList {
    element: ElementId,
    names: Arc<[Arc<str>]>,
    invoker: ActionInvoker,
}

impl ActionList {
    /// Build an action list for an element.
    pub fn new(
        element: ElementId,
        names: impl Into<Arc<[Arc<str>]>>,
        invoker: ActionInvoker,
    ) -> Self {
        Self {
            element,
            names: names.into(),
            invoker,
        }
    }

    /// The element the actions apply to.
    pub fn element(&self) -> ElementId {
        self.element
    }

    /// The action names.
    pub fn names(&self) -> &[Arc<str>] {
        &self.names
    }

    /// Resolve a name to an invocable routine.
    pub fn routine(&self, name: &str) -> Option<RoutineValue> {
        let name = self.names.iter().find(|n| n.as_ref() == name)?.clone();
        let invoker = self.invoker.clone();
        let routine_name = name.clone();
        Some(RoutineValue::action(
            self.element,
            name,
            Arc::new(move |args, done| invoker(&routine_name, args, done)),
        ))
    }
}

impl PartialEq for ActionList {
    fn eq(&self, other: &Self) -> bool {
        self.element == other.element && self.names == other.names
    }
}

impl Eq for ActionList {}

impl Hash for ActionList {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.element.hash(state);
        self.names.hash(state);
    }
}

impl fmt::Debug for ActionList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionList")
            .field("element", &self.element)
            .field("names", &self.names)
            .finish()
    }
}

/// String-keyed attributes a backend reports (HTML tag, CSS class and
/// the like). Immutable and cheaply clonable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct AttributeMap(Arc<BTreeMap<Arc<str>, Arc<str>>>);

impl AttributeMap {
    /// An empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from key/value pairs.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<Arc<str>>,
        V: Into<Arc<str>>,
    {
        Self(Arc::new(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        ))
    }

    /// Look up an attribute.
    pub fn get(&self, key: &str) -> Option<&Arc<str>> {
        self.0.get(key)
    }

    /// Number of attributes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate the attributes in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&Arc<str>, &Arc<str>)> {
        self.0.iter()
    }
}

/// A value in the rule evaluation domain.
#[derive(Debug, Clone)]
pub enum Value {
    /// The absence of an answer. Not an error; propagates.
    Undefined,
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(Arc<str>),
    /// A role or state constant.
    Enum(EnumValue),
    /// A reference to another element in the tree.
    Element(ElementId),
    /// A set of states.
    States(StateSet),
    /// The actions available on an element.
    Actions(ActionList),
    /// Backend attributes.
    Attributes(AttributeMap),
    /// A callable.
    Routine(RoutineValue),
}

impl Value {
    /// Truthiness, used by `and`, `or` and rule selectors.
    ///
    /// `Undefined` is false; numbers are true when non-zero; strings
    /// when non-empty; everything with structure is true.
    pub fn to_bool(&self) -> bool {
        match self {
            Value::Undefined => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Double(d) => *d != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Enum(_)
            | Value::Element(_)
            | Value::States(_)
            | Value::Actions(_)
            | Value::Attributes(_)
            | Value::Routine(_) => true,
        }
    }

    /// Numeric coercion for arithmetic and ordering.
    pub fn try_to_double(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    /// Integer view, without truncation.
    pub fn try_to_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Whether this is `Undefined`.
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Resolve `self.name`: the right-hand side of a dot expression.
    ///
    /// Only values with structure answer; scalars yield `Undefined`.
    /// Element reads record a dependency via the tree.
    pub fn evaluate_identifier(
        &self,
        ctx: &EvalCtx<'_>,
        name: &str,
        deps: &mut DependencySet,
    ) -> Value {
        match self {
            Value::Undefined => Value::Undefined,
            Value::Element(id) => ctx.tree.evaluate_identifier(*id, name, deps),
            Value::Enum(e) => e
                .matches_name(name)
                .map_or(Value::Undefined, Value::Bool),
            Value::States(s) => s
                .contains_name(name)
                .map_or(Value::Undefined, Value::Bool),
            Value::Actions(a) => a
                .routine(name)
                .map_or(Value::Undefined, Value::Routine),
            Value::Attributes(m) => m
                .get(name)
                .map_or(Value::Undefined, |v| Value::Str(v.clone())),
            Value::Bool(_)
            | Value::Int(_)
            | Value::Double(_)
            | Value::Str(_)
            | Value::Routine(_) => {
                tracing::trace!(
                    target: "uidom_tree::value",
                    name,
                    value = ?self,
                    "identifier lookup on scalar value"
                );
                Value::Undefined
            }
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            // Bit equality: NaN == NaN here, so a NaN-valued property
            // does not report a change on every poll.
            (Value::Double(a), Value::Double(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Enum(a), Value::Enum(b)) => a == b,
            (Value::Element(a), Value::Element(b)) => a == b,
            (Value::States(a), Value::States(b)) => a == b,
            (Value::Actions(a), Value::Actions(b)) => a == b,
            (Value::Attributes(a), Value::Attributes(b)) => a == b,
            (Value::Routine(a), Value::Routine(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Undefined => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Double(d) => d.to_bits().hash(state),
            Value::Str(s) => s.hash(state),
            Value::Enum(e) => e.hash(state),
            Value::Element(id) => id.hash(state),
            Value::States(s) => s.hash(state),
            Value::Actions(a) => a.hash(state),
            Value::Attributes(m) => m.hash(state),
            Value::Routine(r) => r.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => f.write_str("undefined"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Double(d) => write!(f, "{}", d),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Enum(e) => write!(f, "{}", e),
            Value::Element(id) => write!(f, "element({:?})", id),
            Value::States(s) => write!(f, "{}", s),
            Value::Actions(a) => write!(f, "actions({})", a.names().len()),
            Value::Attributes(m) => write!(f, "attributes({})", m.len()),
            Value::Routine(r) => write!(f, "routine({})", r.name()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(Arc::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(Arc::from(v))
    }
}

impl From<Arc<str>> for Value {
    fn from(v: Arc<str>) -> Self {
        Value::Str(v)
    }
}

impl From<EnumValue> for Value {
    fn from(v: EnumValue) -> Self {
        Value::Enum(v)
    }
}

impl From<ElementId> for Value {
    fn from(v: ElementId) -> Self {
        Value::Element(v)
    }
}

impl From<StateSet> for Value {
    fn from(v: StateSet) -> Self {
        Value::States(v)
    }
}

#[cfg(test)]
mod tests {
    use crate::tables::{roles, states};

    use super::*;

    #[test]
    fn truthiness() {
        assert!(!Value::Undefined.to_bool());
        assert!(!Value::Bool(false).to_bool());
        assert!(!Value::Int(0).to_bool());
        assert!(!Value::Double(0.0).to_bool());
        assert!(!Value::from("").to_bool());

        assert!(Value::Bool(true).to_bool());
        assert!(Value::Int(-3).to_bool());
        assert!(Value::Double(0.5).to_bool());
        assert!(Value::from("x").to_bool());
        assert!(Value::Enum(roles().value("slider").unwrap()).to_bool());
        assert!(Value::States(StateSet::EMPTY).to_bool());
    }

    #[test]
    fn nan_doubles_compare_equal_to_themselves() {
        let a = Value::Double(f64::NAN);
        let b = Value::Double(f64::NAN);
        assert_eq!(a, b);
        assert_ne!(Value::Double(1.0), Value::Double(2.0));
    }

    #[test]
    fn cross_variant_comparison_is_false() {
        assert_ne!(Value::Int(1), Value::Bool(true));
        assert_ne!(Value::Int(0), Value::Undefined);
    }

    #[test]
    fn attribute_map_lookup() {
        let attrs = AttributeMap::from_pairs([("tag", "div"), ("class", "toolbar")]);
        assert_eq!(attrs.get("tag").map(AsRef::as_ref), Some("div"));
        assert!(attrs.get("id").is_none());
        assert_eq!(attrs.len(), 2);
    }

    #[test]
    fn routine_identity_ignores_the_closure() {
        let el = crate::element::Tree::new().insert_detached("x");
        let a = RoutineValue::query(el, "click", Arc::new(|_, _, _, _| Value::Undefined));
        let b = RoutineValue::query(el, "click", Arc::new(|_, _, _, _| Value::Bool(true)));
        assert_eq!(Value::Routine(a), Value::Routine(b));
    }

    #[test]
    fn invoking_an_action_signals_its_token() {
        let el = crate::element::Tree::new().insert_detached("x");
        let routine = RoutineValue::action(
            el,
            "press",
            Arc::new(|_args, done| done.signal_done()),
        );
        let token = routine.invoke(vec![]);
        assert!(token.is_done());
    }

    #[test]
    fn state_set_identifier_answers_by_membership() {
        let focused = states().value("focused").unwrap();
        let set = StateSet::from_states([focused]);
        let tree = crate::element::Tree::new();
        let ctx = EvalCtx { tree: &tree };
        let mut deps = DependencySet::new();

        let v = Value::States(set);
        assert_eq!(v.evaluate_identifier(&ctx, "focused", &mut deps), Value::Bool(true));
        assert_eq!(v.evaluate_identifier(&ctx, "checked", &mut deps), Value::Bool(false));
        assert_eq!(v.evaluate_identifier(&ctx, "slider", &mut deps), Value::Undefined);
    }
}
