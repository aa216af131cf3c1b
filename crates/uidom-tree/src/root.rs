//! Refresh orchestration and change propagation.
//!
//! [`Root`] owns the tree, the rule set, and the reverse dependency
//! index. A refresh re-evaluates every rule against one element,
//! merges the truthy rules' declarations last-write-wins, and diffs
//! the dependencies the evaluation recorded against the previous watch
//! set: newly-read properties get watched, no-longer-read ones get
//! unwatched once their last dependent drops out.
//!
//! Everything here runs on the main thread. Backend completions arrive
//! as posted closures that look the element up again before touching
//! it; an element removed in the meantime makes the completion a no-op.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use uidom_core::{BackendWorker, CommandPriority, MainHandle, WorkerError};

use crate::element::{ElementId, Tree};
use crate::eval::{evaluate, DependencySet, EvalCtx};
use crate::expr::Expression;
use crate::provider::ProviderRef;
use crate::rules::RuleSet;
use crate::value::Value;

/// One dependency key in the reverse index.
type WatchKey = (ElementId, Expression);

/// The tree plus the machinery that keeps it consistent with the rules.
pub struct Root {
    tree: Tree,
    rules: RuleSet,
    /// Dependency key to the elements whose refresh read it.
    watchers: HashMap<WatchKey, HashSet<ElementId>>,
    backend: Option<Backend>,
}

impl Root {
    pub fn new(rules: RuleSet) -> Self {
        Self {
            tree: Tree::new(),
            rules,
            watchers: HashMap::new(),
            backend: None,
        }
    }

    /// Attach the runtime handles providers need (main loop, worker).
    /// Once set, mutation entry points assert main-thread affinity in
    /// debug builds.
    pub fn set_backend(&mut self, backend: Backend) {
        self.backend = Some(backend);
    }

    pub fn backend(&self) -> Option<&Backend> {
        self.backend.as_ref()
    }

    fn assert_main_thread(&self) {
        if let Some(backend) = &self.backend {
            backend.main().debug_assert_main_thread();
        }
    }

    /// Read access to the tree.
    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Replace the rule set and re-refresh every element under `roots`.
    pub fn set_rules(&mut self, rules: RuleSet) {
        let _span = uidom_core::PerfSpan::new("set_rules");
        self.rules = rules;
        for root in self.tree.roots().to_vec() {
            self.refresh_subtree(root);
        }
    }

    /// Insert a top-level element and refresh it.
    pub fn add_root(&mut self, debug_id: impl Into<String>) -> ElementId {
        let id = self.tree.insert_root(debug_id);
        self.refresh(id);
        id
    }

    /// Insert a child at the end of `parent`'s children and refresh it.
    pub fn add_child(
        &mut self,
        parent: ElementId,
        debug_id: impl Into<String>,
    ) -> Option<ElementId> {
        let index = self.tree.children(parent).len();
        self.add_child_at(parent, index, debug_id)
    }

    /// Insert a child at an index, refresh it, and propagate the
    /// structural change to the parent and shifted siblings.
    pub fn add_child_at(
        &mut self,
        parent: ElementId,
        index: usize,
        debug_id: impl Into<String>,
    ) -> Option<ElementId> {
        let id = self.tree.insert_child_at(parent, index, debug_id)?;
        self.refresh(id);
        self.structure_changed(parent, index);
        Some(id)
    }

    /// Attach a provider and refresh, so rules can see what it answers.
    pub fn add_provider(&mut self, element: ElementId, provider: ProviderRef) -> bool {
        self.assert_main_thread();
        if !self.tree.add_provider(element, provider) {
            return false;
        }
        // Watches on this element may predate the provider; replay them
        // so it can claim the ones it owns. Watch is idempotent by
        // contract, so already-claimed keys are harmless.
        let established: Vec<WatchKey> = self
            .watchers
            .keys()
            .filter(|(target, _)| *target == element)
            .cloned()
            .collect();
        {
            let ctx = EvalCtx { tree: &self.tree };
            for (target, expr) in &established {
                for provider in self.tree.providers(*target) {
                    if provider.watch_property(&ctx, *target, expr) {
                        break;
                    }
                }
            }
        }
        self.refresh(element);
        // A provider that answers synchronously changes what the
        // replayed keys resolve to right now, so their other dependents
        // re-evaluate too instead of waiting for a change event.
        let dependents: HashSet<ElementId> = self
            .watchers
            .iter()
            .filter(|((target, _), _)| *target == element)
            .flat_map(|(_, deps)| deps.iter().copied())
            .collect();
        for dependent in dependents {
            if dependent != element && self.tree.contains(dependent) {
                self.refresh(dependent);
            }
        }
        true
    }

    /// Re-evaluate all rules against one element. Returns whether the
    /// element's declarations changed.
    pub fn refresh(&mut self, element: ElementId) -> bool {
        self.assert_main_thread();
        if !self.tree.contains(element) {
            return false;
        }
        tracing::trace!(target: "uidom_tree::root", ?element, "refresh");

        // Phase 1: evaluate against the immutable tree.
        let mut deps = DependencySet::new();
        let mut declarations: HashMap<Arc<str>, (u32, Value)> = HashMap::new();
        {
            let ctx = EvalCtx { tree: &self.tree };
            let node = Value::Element(element);
            for rule in self.rules.rules() {
                let selected = evaluate(&ctx, &node, rule.selector(), &mut deps);
                if !selected.to_bool() {
                    continue;
                }
                for (name, expr) in rule.declarations() {
                    let value = evaluate(&ctx, &node, expr, &mut deps);
                    // Later rules overwrite earlier ones.
                    declarations.insert(name.clone(), (rule.order(), value));
                }
            }
        }

        // Phase 2: diff the watch set and update the reverse index.
        let old = self.tree.replace_watch_set(element, deps.clone());
        let mut to_watch: Vec<WatchKey> = Vec::new();
        let mut to_unwatch: Vec<WatchKey> = Vec::new();
        for key in deps.iter() {
            if !old.contains(key) {
                let dependents = self.watchers.entry(key.clone()).or_default();
                if dependents.is_empty() {
                    to_watch.push(key.clone());
                }
                dependents.insert(element);
            }
        }
        for key in old {
            if !deps.contains(&key) {
                if let Some(dependents) = self.watchers.get_mut(&key) {
                    dependents.remove(&element);
                    if dependents.is_empty() {
                        self.watchers.remove(&key);
                        to_unwatch.push(key);
                    }
                }
            }
        }

        let (tracked, declarations_changed) = self.apply_declarations(element, declarations);
        if declarations_changed {
            tracing::debug!(target: "uidom_tree::root", ?element, "declarations changed");
        }

        // Phase 3: provider calls against the settled tree.
        let ctx = EvalCtx { tree: &self.tree };
        for (target, expr) in &to_watch {
            for provider in self.tree.providers(*target) {
                if provider.watch_property(&ctx, *target, expr) {
                    break;
                }
            }
        }
        for (target, expr) in &to_unwatch {
            for provider in self.tree.providers(*target) {
                if provider.unwatch_property(&ctx, *target, expr) {
                    break;
                }
            }
        }
        if declarations_changed {
            for provider in self.tree.providers(element) {
                provider.declarations_changed(&ctx, element);
            }
        }
        for (provider, name, value) in &tracked {
            provider.tracked_property_changed(&ctx, element, *name, value);
        }
        declarations_changed
    }

    /// Store the merged declarations and work out which tracked
    /// properties need a level-triggered notification.
    fn apply_declarations(
        &mut self,
        element: ElementId,
        declarations: HashMap<Arc<str>, (u32, Value)>,
    ) -> (Vec<(ProviderRef, &'static str, Value)>, bool) {
        let changed = {
            let mut old = self.tree.declarations(element);
            let mut count = 0;
            let mut differs = false;
            for (name, value) in &mut old {
                count += 1;
                if declarations.get(name).map(|(_, v)| v) != Some(value) {
                    differs = true;
                }
            }
            differs || count != declarations.len()
        };
        let mut dispatches = Vec::new();
        let providers: Vec<ProviderRef> = self.tree.providers(element).to_vec();
        for (index, provider) in providers.iter().enumerate() {
            for &name in provider.tracked_properties() {
                let value = declarations
                    .get(name)
                    .map(|(_, v)| v.clone())
                    .unwrap_or(Value::Undefined);
                let last = self.tree.tracked_value(element, index, name);
                let first_and_empty = last.is_none() && value.is_undefined();
                if last != Some(&value) && !first_and_empty {
                    self.tree.set_tracked_value(element, index, name, value.clone());
                    dispatches.push((provider.clone(), name, value));
                }
            }
        }
        self.tree.set_declarations(element, declarations);
        (dispatches, changed)
    }

    /// Refresh an element and its whole subtree.
    pub fn refresh_subtree(&mut self, element: ElementId) {
        self.refresh(element);
        for child in self.tree.children(element).to_vec() {
            self.refresh_subtree(child);
        }
    }

    /// A watched property changed; refresh everything that read it.
    pub fn property_changed(&mut self, element: ElementId, expr: &Expression) {
        let key = (element, expr.clone());
        let Some(dependents) = self.watchers.get(&key) else {
            tracing::trace!(
                target: "uidom_tree::root",
                ?element,
                expr = %expr,
                "property change with no dependents"
            );
            return;
        };
        let dependents: Vec<ElementId> = dependents.iter().copied().collect();
        for dependent in dependents {
            if self.tree.contains(dependent) {
                self.refresh(dependent);
            }
        }
    }

    /// [`Root::property_changed`] for a plain named property.
    pub fn property_changed_named(&mut self, element: ElementId, name: &str) {
        self.property_changed(element, &Expression::ident(name));
    }

    /// Children of `parent` shifted at `from_index`: notify the
    /// structural builtins.
    fn structure_changed(&mut self, parent: ElementId, from_index: usize) {
        self.property_changed_named(parent, "child_count");
        let shifted: Vec<ElementId> = self
            .tree
            .children(parent)
            .iter()
            .skip(from_index)
            .copied()
            .collect();
        for sibling in shifted {
            self.property_changed_named(sibling, "index_in_parent");
        }
    }

    /// Remove an element and its subtree.
    ///
    /// Children go first. Each removed element's watches are released,
    /// its providers are told, and afterwards everything that depended
    /// on a removed property is refreshed (those reads now come back
    /// `Undefined`).
    pub fn remove(&mut self, element: ElementId) {
        self.assert_main_thread();
        if !self.tree.contains(element) {
            return;
        }
        let parent = self.tree.parent(element);
        let index = self.tree.index_in_parent(element).unwrap_or(0);
        let subtree = self.tree.collect_subtree(element);
        let doomed: HashSet<ElementId> = subtree.iter().copied().collect();
        tracing::debug!(
            target: "uidom_tree::root",
            ?element,
            elements = subtree.len(),
            "removing subtree"
        );

        let mut to_unwatch: Vec<WatchKey> = Vec::new();
        let mut to_refresh: HashSet<ElementId> = HashSet::new();

        for &removed in &subtree {
            // Release this element's outgoing watches.
            let watch_set = self.tree.replace_watch_set(removed, HashSet::new());
            for key in watch_set {
                if let Some(dependents) = self.watchers.get_mut(&key) {
                    dependents.remove(&removed);
                    if dependents.is_empty() {
                        self.watchers.remove(&key);
                        // Targets inside the doomed subtree are going
                        // away with their providers; no unwatch call.
                        if !doomed.contains(&key.0) {
                            to_unwatch.push(key);
                        }
                    }
                }
            }
            // Anyone outside watching a property of this element must
            // re-evaluate once it is gone.
            let incoming: Vec<WatchKey> = self
                .watchers
                .keys()
                .filter(|(target, _)| *target == removed)
                .cloned()
                .collect();
            for key in incoming {
                if let Some(dependents) = self.watchers.remove(&key) {
                    to_refresh.extend(dependents.into_iter().filter(|d| !doomed.contains(d)));
                }
            }
        }

        {
            let ctx = EvalCtx { tree: &self.tree };
            for (target, expr) in &to_unwatch {
                for provider in self.tree.providers(*target) {
                    if provider.unwatch_property(&ctx, *target, expr) {
                        break;
                    }
                }
            }
            for &removed in &subtree {
                for provider in self.tree.providers(removed) {
                    provider.notify_element_removed(removed);
                }
            }
        }

        for &removed in &subtree {
            self.tree.remove_element(removed);
        }

        for dependent in to_refresh {
            if self.tree.contains(dependent) {
                self.refresh(dependent);
            }
        }
        if let Some(parent) = parent {
            self.structure_changed(parent, index);
        }
    }

    /// Elements currently registered as dependents of a key. Test and
    /// diagnostics hook.
    pub fn dependents(&self, element: ElementId, expr: &Expression) -> usize {
        self.watchers
            .get(&(element, expr.clone()))
            .map_or(0, HashSet::len)
    }

    /// Total distinct watched dependency keys.
    pub fn watched_key_count(&self) -> usize {
        self.watchers.len()
    }
}

/// The main-thread-shared root.
///
/// Backend completion closures hold one of these; they re-check that
/// their element still resolves before writing anything, which is what
/// makes late completions for removed elements harmless.
#[derive(Clone)]
pub struct SharedRoot {
    inner: Arc<Mutex<Root>>,
}

impl SharedRoot {
    pub fn new(rules: RuleSet) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Root::new(rules))),
        }
    }

    /// Run a closure against the root.
    pub fn with<R>(&self, f: impl FnOnce(&mut Root) -> R) -> R {
        f(&mut self.inner.lock())
    }
}

/// The runtime handles a backend-facing provider captures at
/// construction: where to post main-thread work and where to run
/// blocking calls.
#[derive(Clone)]
pub struct Backend {
    main: MainHandle,
    worker: Arc<BackendWorker>,
}

impl Backend {
    pub fn new(main: MainHandle, worker: Arc<BackendWorker>) -> Self {
        Self { main, worker }
    }

    pub fn main(&self) -> &MainHandle {
        &self.main
    }

    pub fn worker(&self) -> &BackendWorker {
        &self.worker
    }

    /// Run a blocking fetch on the worker and deliver the result on the
    /// main thread.
    pub fn fetch<T, F, R>(
        &self,
        priority: CommandPriority,
        fetch: F,
        reply: R,
    ) -> Result<(), WorkerError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
        R: FnOnce(T) + Send + 'static,
    {
        self.worker.submit_with_reply(priority, &self.main, fetch, reply)
    }
}

#[cfg(test)]
mod tests {
    use crate::expr::{BinaryOp, Expression as E};
    use crate::value::Value;

    use super::*;

    fn role_rule() -> RuleSet {
        RuleSet::builder()
            .rule(
                E::binary(
                    BinaryOp::Gt,
                    E::ident("child_count"),
                    E::literal(0i64),
                ),
                [("container", E::literal(true))],
            )
            .build()
    }

    #[test]
    fn refresh_applies_truthy_declarations() {
        let mut root = Root::new(role_rule());
        let window = root.add_root("window");
        assert!(root.tree().declaration(window, "container").is_none());

        root.add_child(window, "button").unwrap();
        assert_eq!(
            root.tree().declaration(window, "container"),
            Some(&Value::Bool(true))
        );
    }

    #[test]
    fn later_rules_win_declaration_conflicts() {
        let rules = RuleSet::builder()
            .rule(E::literal(true), [("kind", E::literal("generic"))])
            .rule(
                E::binary(BinaryOp::Gt, E::ident("child_count"), E::literal(0i64)),
                [("kind", E::literal("container"))],
            )
            .build();

        let mut root = Root::new(rules);
        let window = root.add_root("window");
        assert_eq!(
            root.tree().declaration(window, "kind"),
            Some(&Value::from("generic"))
        );

        root.add_child(window, "child").unwrap();
        assert_eq!(
            root.tree().declaration(window, "kind"),
            Some(&Value::from("container"))
        );
    }

    #[test]
    fn structural_change_refreshes_dependents() {
        let mut root = Root::new(role_rule());
        let window = root.add_root("window");
        assert_eq!(root.dependents(window, &E::ident("child_count")), 1);

        let child = root.add_child(window, "a").unwrap();
        assert_eq!(
            root.tree().declaration(window, "container"),
            Some(&Value::Bool(true))
        );

        root.remove(child);
        assert!(root.tree().declaration(window, "container").is_none());
    }

    #[test]
    fn removal_releases_watches() {
        let rules = RuleSet::builder()
            .rule(
                E::binary(
                    BinaryOp::Eq,
                    E::dot(E::ident("parent"), "debug_id"),
                    E::literal("window"),
                ),
                [("inside", E::literal(true))],
            )
            .build();

        let mut root = Root::new(rules);
        let window = root.add_root("window");
        let child = root.add_child(window, "a").unwrap();
        assert_eq!(
            root.tree().declaration(child, "inside"),
            Some(&Value::Bool(true))
        );
        let keys_before = root.watched_key_count();
        assert!(keys_before > 0);

        root.remove(child);
        assert_eq!(root.dependents(child, &E::ident("parent")), 0);
        assert!(root.watched_key_count() < keys_before);
    }

    #[test]
    fn index_in_parent_follows_sibling_insertions() {
        let rules = RuleSet::builder()
            .rule(
                E::binary(
                    BinaryOp::Eq,
                    E::ident("index_in_parent"),
                    E::literal(0i64),
                ),
                [("first", E::literal(true))],
            )
            .build();

        let mut root = Root::new(rules);
        let window = root.add_root("window");
        let a = root.add_child(window, "a").unwrap();
        assert_eq!(root.tree().declaration(a, "first"), Some(&Value::Bool(true)));

        // Insert before "a": it is no longer first.
        let b = root.add_child_at(window, 0, "b").unwrap();
        assert_eq!(root.tree().declaration(b, "first"), Some(&Value::Bool(true)));
        assert!(root.tree().declaration(a, "first").is_none());
    }

    #[test]
    fn removing_a_missing_element_is_a_no_op() {
        let mut root = Root::new(RuleSet::default());
        let window = root.add_root("window");
        let child = root.add_child(window, "a").unwrap();
        root.remove(child);
        root.remove(child);
        assert!(root.tree().contains(window));
    }
}
