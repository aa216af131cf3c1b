//! The rule set: selectors and declarations.
//!
//! A rule pairs a selector expression with declarations. During a
//! refresh every selector is evaluated against the element; truthy
//! rules contribute their declarations, and when two rules declare the
//! same name the one later in the set wins. The set is immutable once
//! built; swapping rule sets means re-refreshing the tree.

use std::sync::Arc;

use crate::expr::Expression;

/// One rule: a selector guarding a list of declarations.
#[derive(Debug, Clone)]
pub struct Rule {
    selector: Expression,
    declarations: Vec<(Arc<str>, Expression)>,
    /// Position in the rule set, for last-write-wins merging.
    order: u32,
}

impl Rule {
    pub fn selector(&self) -> &Expression {
        &self.selector
    }

    pub fn declarations(&self) -> &[(Arc<str>, Expression)] {
        &self.declarations
    }

    pub fn order(&self) -> u32 {
        self.order
    }
}

/// An immutable, ordered collection of rules.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Arc<[Rule]>,
}

impl RuleSet {
    pub fn builder() -> RuleSetBuilder {
        RuleSetBuilder::new()
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Builds a [`RuleSet`], assigning source order.
#[derive(Debug, Default)]
pub struct RuleSetBuilder {
    rules: Vec<Rule>,
}

impl RuleSetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule. Later rules win declaration conflicts.
    pub fn rule(
        mut self,
        selector: Expression,
        declarations: impl IntoIterator<Item = (impl Into<Arc<str>>, Expression)>,
    ) -> Self {
        let order = self.rules.len() as u32;
        self.rules.push(Rule {
            selector,
            declarations: declarations
                .into_iter()
                .map(|(name, expr)| (name.into(), expr))
                .collect(),
            order,
        });
        self
    }

    pub fn build(self) -> RuleSet {
        tracing::debug!(target: "uidom_tree::rules", rules = self.rules.len(), "rule set built");
        RuleSet {
            rules: self.rules.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::expr::{BinaryOp, Expression as E};

    use super::*;

    #[test]
    fn builder_assigns_source_order() {
        let set = RuleSet::builder()
            .rule(E::literal(true), [("a", E::literal(1i64))])
            .rule(
                E::binary(BinaryOp::Eq, E::ident("role"), E::ident("push_button")),
                [("a", E::literal(2i64)), ("b", E::literal(3i64))],
            )
            .build();

        assert_eq!(set.len(), 2);
        assert_eq!(set.rules()[0].order(), 0);
        assert_eq!(set.rules()[1].order(), 1);
        assert_eq!(set.rules()[1].declarations().len(), 2);
    }
}
