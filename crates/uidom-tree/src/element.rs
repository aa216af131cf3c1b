//! The element tree.
//!
//! Elements live in a slotmap arena; an [`ElementId`] is a generational
//! key, so a held id for a removed element simply stops resolving
//! instead of dangling. Each element carries its providers, the
//! declarations rules assigned to it, and the watch set from its last
//! refresh.
//!
//! Identifier resolution order on an element: built-ins, then each
//! provider in attachment order, then a late pass for provider
//! fallbacks, then global constants (role and state names, booleans).

use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;

use slotmap::{new_key_type, SlotMap};

use crate::eval::{DependencySet, EvalCtx};
use crate::expr::Expression;
use crate::provider::ProviderRef;
use crate::tables::global_enum_value;
use crate::value::Value;

new_key_type! {
    /// A generational handle to an element.
    pub struct ElementId;
}

/// Last value delivered to a tracked-property hook, keyed by
/// (provider index, property name).
type TrackedValues = HashMap<(usize, &'static str), Value>;

pub(crate) struct ElementData {
    debug_id: String,
    parent: Option<ElementId>,
    children: Vec<ElementId>,
    providers: Vec<ProviderRef>,
    /// Rule outputs, with the order index of the rule that won.
    declarations: HashMap<Arc<str>, (u32, Value)>,
    /// Dependencies recorded by this element's last refresh.
    watch_set: HashSet<(ElementId, Expression)>,
    tracked: TrackedValues,
}

/// The unified accessibility tree.
pub struct Tree {
    elements: SlotMap<ElementId, ElementData>,
    roots: Vec<ElementId>,
}

impl Tree {
    pub fn new() -> Self {
        Self {
            elements: SlotMap::with_key(),
            roots: Vec::new(),
        }
    }

    fn insert_data(&mut self, debug_id: impl Into<String>, parent: Option<ElementId>) -> ElementId {
        self.elements.insert(ElementData {
            debug_id: debug_id.into(),
            parent,
            children: Vec::new(),
            providers: Vec::new(),
            declarations: HashMap::new(),
            watch_set: HashSet::new(),
            tracked: TrackedValues::new(),
        })
    }

    /// Insert a top-level element.
    pub fn insert_root(&mut self, debug_id: impl Into<String>) -> ElementId {
        let id = self.insert_data(debug_id, None);
        self.roots.push(id);
        tracing::debug!(target: "uidom_tree::element", ?id, "root element inserted");
        id
    }

    /// Insert an element with no parent and no root registration.
    /// Used for values that reference elements before attachment.
    pub fn insert_detached(&mut self, debug_id: impl Into<String>) -> ElementId {
        self.insert_data(debug_id, None)
    }

    /// Insert a child at the end of `parent`'s children.
    ///
    /// Returns `None` when the parent does not resolve.
    pub fn insert_child(
        &mut self,
        parent: ElementId,
        debug_id: impl Into<String>,
    ) -> Option<ElementId> {
        let count = self.elements.get(parent)?.children.len();
        self.insert_child_at(parent, count, debug_id)
    }

    /// Insert a child at a specific index, shifting later siblings.
    pub fn insert_child_at(
        &mut self,
        parent: ElementId,
        index: usize,
        debug_id: impl Into<String>,
    ) -> Option<ElementId> {
        if !self.elements.contains_key(parent) {
            return None;
        }
        let id = self.insert_data(debug_id, Some(parent));
        let children = &mut self.elements[parent].children;
        let index = index.min(children.len());
        children.insert(index, id);
        tracing::debug!(target: "uidom_tree::element", ?id, ?parent, index, "child inserted");
        Some(id)
    }

    /// Attach a provider. Providers answer identifier lookups in
    /// attachment order.
    pub fn add_provider(&mut self, element: ElementId, provider: ProviderRef) -> bool {
        match self.elements.get_mut(element) {
            Some(data) => {
                data.providers.push(provider);
                true
            }
            None => false,
        }
    }

    /// Whether the id still resolves.
    pub fn contains(&self, element: ElementId) -> bool {
        self.elements.contains_key(element)
    }

    pub fn debug_id(&self, element: ElementId) -> Option<&str> {
        self.elements.get(element).map(|d| d.debug_id.as_str())
    }

    pub fn parent(&self, element: ElementId) -> Option<ElementId> {
        self.elements.get(element).and_then(|d| d.parent)
    }

    pub fn children(&self, element: ElementId) -> &[ElementId] {
        self.elements
            .get(element)
            .map(|d| d.children.as_slice())
            .unwrap_or(&[])
    }

    /// Position among the parent's children.
    pub fn index_in_parent(&self, element: ElementId) -> Option<usize> {
        let parent = self.parent(element)?;
        self.children(parent).iter().position(|&c| c == element)
    }

    pub fn roots(&self) -> &[ElementId] {
        &self.roots
    }

    pub fn providers(&self, element: ElementId) -> &[ProviderRef] {
        self.elements
            .get(element)
            .map(|d| d.providers.as_slice())
            .unwrap_or(&[])
    }

    /// Number of live elements.
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// A declaration assigned by the last refresh.
    pub fn declaration(&self, element: ElementId, name: &str) -> Option<&Value> {
        self.elements
            .get(element)?
            .declarations
            .get(name)
            .map(|(_, v)| v)
    }

    /// All current declarations on an element.
    pub fn declarations(
        &self,
        element: ElementId,
    ) -> impl Iterator<Item = (&Arc<str>, &Value)> {
        self.elements
            .get(element)
            .into_iter()
            .flat_map(|d| d.declarations.iter().map(|(k, (_, v))| (k, v)))
    }

    pub(crate) fn set_declarations(
        &mut self,
        element: ElementId,
        declarations: HashMap<Arc<str>, (u32, Value)>,
    ) {
        if let Some(data) = self.elements.get_mut(element) {
            data.declarations = declarations;
        }
    }

    pub(crate) fn watch_set(&self, element: ElementId) -> Option<&HashSet<(ElementId, Expression)>> {
        self.elements.get(element).map(|d| &d.watch_set)
    }

    pub(crate) fn replace_watch_set(
        &mut self,
        element: ElementId,
        watch_set: HashSet<(ElementId, Expression)>,
    ) -> HashSet<(ElementId, Expression)> {
        match self.elements.get_mut(element) {
            Some(data) => std::mem::replace(&mut data.watch_set, watch_set),
            None => HashSet::new(),
        }
    }

    pub(crate) fn tracked_value(
        &self,
        element: ElementId,
        provider: usize,
        name: &'static str,
    ) -> Option<&Value> {
        self.elements.get(element)?.tracked.get(&(provider, name))
    }

    pub(crate) fn set_tracked_value(
        &mut self,
        element: ElementId,
        provider: usize,
        name: &'static str,
        value: Value,
    ) {
        if let Some(data) = self.elements.get_mut(element) {
            data.tracked.insert((provider, name), value);
        }
    }

    /// Resolve an identifier on an element, recording the dependency.
    ///
    /// `debug_id` and global constants record no dependency; they never
    /// change. Unanswered names still record one, so a property that
    /// becomes available later re-triggers the rules that asked.
    pub fn evaluate_identifier(
        &self,
        element: ElementId,
        name: &str,
        deps: &mut DependencySet,
    ) -> Value {
        let Some(data) = self.elements.get(element) else {
            return Value::Undefined;
        };

        match name {
            "debug_id" => return Value::from(data.debug_id.as_str()),
            "parent" => {
                deps.insert((element, Expression::ident(name)));
                return data.parent.map_or(Value::Undefined, Value::Element);
            }
            "child_count" => {
                deps.insert((element, Expression::ident(name)));
                return Value::Int(data.children.len() as i64);
            }
            "index_in_parent" => {
                deps.insert((element, Expression::ident(name)));
                return self
                    .index_in_parent(element)
                    .map_or(Value::Undefined, |i| Value::Int(i as i64));
            }
            _ => {}
        }

        let ctx = EvalCtx { tree: self };
        for provider in &data.providers {
            let value = provider.evaluate_identifier(&ctx, element, name, deps);
            if !value.is_undefined() {
                deps.insert((element, Expression::ident(name)));
                return value;
            }
        }
        for provider in &data.providers {
            let value = provider.evaluate_identifier_late(&ctx, element, name, deps);
            if !value.is_undefined() {
                deps.insert((element, Expression::ident(name)));
                return value;
            }
        }

        // Global constants resolve without a dependency.
        match name {
            "true" => return Value::Bool(true),
            "false" => return Value::Bool(false),
            _ => {}
        }
        if let Some(value) = global_enum_value(name) {
            return Value::Enum(value);
        }

        // Unknown today, maybe known once a fetch lands.
        deps.insert((element, Expression::ident(name)));
        Value::Undefined
    }

    /// Ids of `element` and all descendants, children before parents.
    /// Removal order: leaves go first so no child outlives its parent's
    /// notification.
    pub(crate) fn collect_subtree(&self, element: ElementId) -> Vec<ElementId> {
        let mut out = Vec::new();
        self.collect_subtree_into(element, &mut out);
        out
    }

    fn collect_subtree_into(&self, element: ElementId, out: &mut Vec<ElementId>) {
        for &child in self.children(element) {
            self.collect_subtree_into(child, out);
        }
        if self.elements.contains_key(element) {
            out.push(element);
        }
    }

    /// Remove a single element: unlink from its parent and drop its
    /// data. Subtree bookkeeping is the caller's job.
    pub(crate) fn remove_element(&mut self, element: ElementId) {
        let Some(data) = self.elements.remove(element) else {
            return;
        };
        if let Some(parent) = data.parent {
            if let Some(parent_data) = self.elements.get_mut(parent) {
                parent_data.children.retain(|&c| c != element);
            }
        }
        self.roots.retain(|&r| r != element);
        tracing::debug!(target: "uidom_tree::element", ?element, "element removed");
    }

    /// Human-readable dump of a subtree, with declarations and provider
    /// diagnostics.
    pub fn dump(&self, root: ElementId) -> String {
        let mut out = String::new();
        self.dump_into(root, "", true, &mut out);
        out
    }

    fn dump_into(&self, element: ElementId, prefix: &str, is_last: bool, out: &mut String) {
        let Some(data) = self.elements.get(element) else {
            return;
        };

        let connector = if prefix.is_empty() {
            ""
        } else if is_last {
            "└── "
        } else {
            "├── "
        };
        let _ = write!(out, "{}{}{} [{:?}]", prefix, connector, data.debug_id, element);
        out.push('\n');

        let child_prefix = if prefix.is_empty() {
            String::new()
        } else if is_last {
            format!("{}    ", prefix)
        } else {
            format!("{}│   ", prefix)
        };

        let mut declarations: Vec<_> = data.declarations.iter().collect();
        declarations.sort_by(|a, b| a.0.cmp(b.0));
        for (name, (_, value)) in declarations {
            let _ = writeln!(out, "{}  .{} = {}", child_prefix, name, value);
        }
        for provider in &data.providers {
            provider.dump_properties(element, out);
        }

        let count = data.children.len();
        for (i, &child) in data.children.iter().enumerate() {
            let next_prefix = if prefix.is_empty() { "  " } else { &child_prefix };
            self.dump_into(child, next_prefix, i == count - 1, out);
        }
    }
}

impl Default for Tree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structure_builtins_resolve_and_record_deps() {
        let mut tree = Tree::new();
        let root = tree.insert_root("window");
        let a = tree.insert_child(root, "a").unwrap();
        let b = tree.insert_child(root, "b").unwrap();

        let mut deps = DependencySet::new();
        assert_eq!(
            tree.evaluate_identifier(root, "child_count", &mut deps),
            Value::Int(2)
        );
        assert_eq!(
            tree.evaluate_identifier(b, "index_in_parent", &mut deps),
            Value::Int(1)
        );
        assert_eq!(
            tree.evaluate_identifier(a, "parent", &mut deps),
            Value::Element(root)
        );
        assert!(deps.contains(&(root, Expression::ident("child_count"))));
        assert!(deps.contains(&(b, Expression::ident("index_in_parent"))));
        assert!(deps.contains(&(a, Expression::ident("parent"))));
    }

    #[test]
    fn debug_id_records_no_dependency() {
        let mut tree = Tree::new();
        let root = tree.insert_root("window");

        let mut deps = DependencySet::new();
        assert_eq!(
            tree.evaluate_identifier(root, "debug_id", &mut deps),
            Value::from("window")
        );
        assert!(deps.is_empty());
    }

    #[test]
    fn global_constants_resolve_without_dependencies() {
        let mut tree = Tree::new();
        let root = tree.insert_root("window");

        let mut deps = DependencySet::new();
        let v = tree.evaluate_identifier(root, "push_button", &mut deps);
        assert!(matches!(v, Value::Enum(_)));
        assert_eq!(tree.evaluate_identifier(root, "true", &mut deps), Value::Bool(true));
        assert!(deps.is_empty());
    }

    #[test]
    fn unknown_identifier_is_undefined_but_watched() {
        let mut tree = Tree::new();
        let root = tree.insert_root("window");

        let mut deps = DependencySet::new();
        assert!(tree
            .evaluate_identifier(root, "custom_property", &mut deps)
            .is_undefined());
        assert!(deps.contains(&(root, Expression::ident("custom_property"))));
    }

    #[test]
    fn insert_at_index_shifts_siblings() {
        let mut tree = Tree::new();
        let root = tree.insert_root("window");
        let a = tree.insert_child(root, "a").unwrap();
        let c = tree.insert_child(root, "c").unwrap();
        let b = tree.insert_child_at(root, 1, "b").unwrap();

        assert_eq!(tree.children(root), &[a, b, c]);
        assert_eq!(tree.index_in_parent(c), Some(2));
    }

    #[test]
    fn subtree_collection_is_children_first() {
        let mut tree = Tree::new();
        let root = tree.insert_root("window");
        let mid = tree.insert_child(root, "mid").unwrap();
        let leaf = tree.insert_child(mid, "leaf").unwrap();

        let order = tree.collect_subtree(mid);
        assert_eq!(order, vec![leaf, mid]);
    }

    #[test]
    fn removed_ids_stop_resolving() {
        let mut tree = Tree::new();
        let root = tree.insert_root("window");
        let child = tree.insert_child(root, "child").unwrap();

        tree.remove_element(child);
        assert!(!tree.contains(child));
        assert!(tree.children(root).is_empty());

        let mut deps = DependencySet::new();
        assert!(tree
            .evaluate_identifier(child, "child_count", &mut deps)
            .is_undefined());
    }

    #[test]
    fn dump_shows_hierarchy() {
        let mut tree = Tree::new();
        let root = tree.insert_root("window");
        tree.insert_child(root, "button").unwrap();

        let dump = tree.dump(root);
        assert!(dump.contains("window"));
        assert!(dump.contains("button"));
    }

    #[test]
    fn dump_lists_declarations_in_name_order() {
        let mut tree = Tree::new();
        let root = tree.insert_root("window");
        let mut declarations = HashMap::new();
        declarations.insert(Arc::from("speak"), (1, Value::Bool(true)));
        declarations.insert(Arc::from("priority"), (0, Value::Int(2)));
        tree.set_declarations(root, declarations);

        let dump = tree.dump(root);
        let priority = dump.find(".priority").unwrap();
        let speak = dump.find(".speak").unwrap();
        assert!(priority < speak);
    }
}
