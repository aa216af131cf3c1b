//! Expression trees for rule selectors and declarations.
//!
//! Expressions arrive pre-parsed from the rule language frontend; this
//! module only defines the shape. Sub-expressions are shared through
//! `Arc` so the same tree can serve as both an evaluation program and a
//! hashable dependency key: a watcher is keyed by `(element,
//! expression)` pairs, so `Expression` implements structural equality
//! and hashing.

use std::fmt;
use std::sync::Arc;

use crate::value::Value;

/// A binary operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    /// Property access: `left.right`, where `right` must be an identifier.
    Dot,
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOp {
    /// The operator as it appears in rule source.
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Dot => ".",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        }
    }
}

/// A parsed expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expression {
    /// A constant.
    Literal(Value),
    /// A bare name, resolved against the element under evaluation.
    Identifier(Arc<str>),
    /// `left op right`.
    Binary {
        op: BinaryOp,
        left: Arc<Expression>,
        right: Arc<Expression>,
    },
    /// `func(args...)`. Arguments are passed unevaluated; the callee
    /// decides what to do with them.
    Apply {
        func: Arc<Expression>,
        args: Arc<[Expression]>,
    },
}

impl Expression {
    /// An identifier expression.
    pub fn ident(name: impl Into<Arc<str>>) -> Self {
        Expression::Identifier(name.into())
    }

    /// A literal expression.
    pub fn literal(value: impl Into<Value>) -> Self {
        Expression::Literal(value.into())
    }

    /// Property access: `base.name`.
    pub fn dot(base: Expression, name: impl Into<Arc<str>>) -> Self {
        Expression::Binary {
            op: BinaryOp::Dot,
            left: Arc::new(base),
            right: Arc::new(Expression::Identifier(name.into())),
        }
    }

    /// A binary expression.
    pub fn binary(op: BinaryOp, left: Expression, right: Expression) -> Self {
        Expression::Binary {
            op,
            left: Arc::new(left),
            right: Arc::new(right),
        }
    }

    /// A call expression.
    pub fn apply(func: Expression, args: impl Into<Arc<[Expression]>>) -> Self {
        Expression::Apply {
            func: Arc::new(func),
            args: args.into(),
        }
    }

    /// The identifier name, if this is a bare identifier.
    pub fn as_identifier(&self) -> Option<&str> {
        match self {
            Expression::Identifier(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Literal(value) => write!(f, "{}", value),
            Expression::Identifier(name) => f.write_str(name),
            Expression::Binary { op: BinaryOp::Dot, left, right } => {
                write!(f, "{}.{}", left, right)
            }
            Expression::Binary { op, left, right } => {
                write!(f, "({} {} {})", left, op.symbol(), right)
            }
            Expression::Apply { func, args } => {
                write!(f, "{}(", func)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn structurally_equal_expressions_hash_equal() {
        let a = Expression::dot(Expression::ident("role"), "name");
        let b = Expression::dot(Expression::ident("role"), "name");
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn different_shapes_are_distinct() {
        let a = Expression::ident("role");
        let b = Expression::dot(Expression::ident("self"), "role");
        assert_ne!(a, b);
    }

    #[test]
    fn display_reads_like_rule_source() {
        let expr = Expression::binary(
            BinaryOp::Eq,
            Expression::ident("role"),
            Expression::ident("push_button"),
        );
        assert_eq!(expr.to_string(), "(role == push_button)");

        let call = Expression::apply(
            Expression::dot(Expression::ident("parent"), "is_focused"),
            vec![Expression::ident("x")],
        );
        assert_eq!(call.to_string(), "parent.is_focused(x)");
    }
}
