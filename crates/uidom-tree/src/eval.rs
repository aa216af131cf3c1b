//! Dependency-tracked expression evaluation.
//!
//! Evaluation is total: it never panics and never errors. Anything the
//! tree cannot answer right now comes back [`Value::Undefined`], and
//! every element property touched along the way is recorded into a
//! [`DependencySet`]. The caller diffs that set against the previous
//! evaluation to decide what to watch and unwatch.
//!
//! Short-circuiting is semantic, not an optimisation: `a or b` must not
//! record dependencies on `b` when `a` is true, or the watch set would
//! be wider than the rule's actual sensitivity.

use std::collections::HashSet;

use crate::element::{ElementId, Tree};
use crate::expr::{BinaryOp, Expression};
use crate::value::Value;

/// Everything evaluation may read. Immutable for the duration of one
/// evaluation; side effects (fetch scheduling, watching) happen after.
pub struct EvalCtx<'a> {
    pub tree: &'a Tree,
}

/// The `(element, expression)` pairs an evaluation read.
pub type DependencySet = HashSet<(ElementId, Expression)>;

/// Evaluate `expr` with `node` as the element under evaluation.
///
/// `node` is usually `Value::Element`, so bare identifiers resolve
/// against that element first, then globals.
pub fn evaluate(
    ctx: &EvalCtx<'_>,
    node: &Value,
    expr: &Expression,
    deps: &mut DependencySet,
) -> Value {
    match expr {
        Expression::Literal(value) => value.clone(),
        Expression::Identifier(name) => node.evaluate_identifier(ctx, name, deps),
        Expression::Binary { op, left, right } => {
            evaluate_binary(ctx, node, *op, left, right, deps)
        }
        Expression::Apply { func, args } => {
            let callee = evaluate(ctx, node, func, deps);
            match callee {
                Value::Routine(routine) => routine.apply(ctx, node, args, deps),
                Value::Undefined => Value::Undefined,
                other => {
                    tracing::trace!(
                        target: "uidom_tree::eval",
                        callee = %other,
                        "call target is not a routine"
                    );
                    Value::Undefined
                }
            }
        }
    }
}

fn evaluate_binary(
    ctx: &EvalCtx<'_>,
    node: &Value,
    op: BinaryOp,
    left: &Expression,
    right: &Expression,
    deps: &mut DependencySet,
) -> Value {
    match op {
        BinaryOp::Dot => {
            let base = evaluate(ctx, node, left, deps);
            match right.as_identifier() {
                Some(name) => base.evaluate_identifier(ctx, name, deps),
                None => {
                    tracing::debug!(
                        target: "uidom_tree::eval",
                        expr = %right,
                        "right-hand side of '.' is not an identifier"
                    );
                    Value::Undefined
                }
            }
        }
        BinaryOp::And => {
            let lhs = evaluate(ctx, node, left, deps);
            if !lhs.to_bool() {
                return Value::Bool(false);
            }
            Value::Bool(evaluate(ctx, node, right, deps).to_bool())
        }
        BinaryOp::Or => {
            let lhs = evaluate(ctx, node, left, deps);
            if lhs.to_bool() {
                return Value::Bool(true);
            }
            Value::Bool(evaluate(ctx, node, right, deps).to_bool())
        }
        BinaryOp::Eq | BinaryOp::Ne => {
            let lhs = evaluate(ctx, node, left, deps);
            let rhs = evaluate(ctx, node, right, deps);
            equality(op, &lhs, &rhs)
        }
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let lhs = evaluate(ctx, node, left, deps);
            let rhs = evaluate(ctx, node, right, deps);
            ordering(op, &lhs, &rhs)
        }
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div => {
            let lhs = evaluate(ctx, node, left, deps);
            let rhs = evaluate(ctx, node, right, deps);
            arithmetic(op, &lhs, &rhs)
        }
    }
}

/// `==` and `!=`.
///
/// Comparisons involving `Undefined` are themselves `Undefined`, so a
/// not-yet-fetched property neither matches nor mismatches. Numeric
/// operands compare numerically across `Int`/`Double`; everything else
/// compares structurally.
fn equality(op: BinaryOp, lhs: &Value, rhs: &Value) -> Value {
    if lhs.is_undefined() || rhs.is_undefined() {
        return Value::Undefined;
    }
    let equal = match (lhs.try_to_double(), rhs.try_to_double()) {
        (Some(a), Some(b)) => a == b,
        _ => lhs == rhs,
    };
    match op {
        BinaryOp::Eq => Value::Bool(equal),
        _ => Value::Bool(!equal),
    }
}

/// `<`, `<=`, `>`, `>=` over numbers and strings.
fn ordering(op: BinaryOp, lhs: &Value, rhs: &Value) -> Value {
    if lhs.is_undefined() || rhs.is_undefined() {
        return Value::Undefined;
    }
    let cmp = match (lhs, rhs) {
        (Value::Str(a), Value::Str(b)) => a.as_ref().partial_cmp(b.as_ref()),
        _ => match (lhs.try_to_double(), rhs.try_to_double()) {
            (Some(a), Some(b)) => a.partial_cmp(&b),
            _ => None,
        },
    };
    let Some(cmp) = cmp else {
        return Value::Undefined;
    };
    let result = match op {
        BinaryOp::Lt => cmp.is_lt(),
        BinaryOp::Le => cmp.is_le(),
        BinaryOp::Gt => cmp.is_gt(),
        _ => cmp.is_ge(),
    };
    Value::Bool(result)
}

/// `+`, `-`, `*`, `/`.
///
/// Two ints stay exact where possible; `Int / Int` falls back to
/// `Double` when the division is inexact, and division by zero is
/// `Undefined`. `Str + Str` concatenates.
fn arithmetic(op: BinaryOp, lhs: &Value, rhs: &Value) -> Value {
    if let (Value::Str(a), Value::Str(b)) = (lhs, rhs) {
        if op == BinaryOp::Add {
            let mut out = String::with_capacity(a.len() + b.len());
            out.push_str(a);
            out.push_str(b);
            return Value::from(out);
        }
    }

    if let (Some(a), Some(b)) = (lhs.try_to_int(), rhs.try_to_int()) {
        return match op {
            BinaryOp::Add => a.checked_add(b).map_or(Value::Undefined, Value::Int),
            BinaryOp::Sub => a.checked_sub(b).map_or(Value::Undefined, Value::Int),
            BinaryOp::Mul => a.checked_mul(b).map_or(Value::Undefined, Value::Int),
            _ => {
                if b == 0 {
                    Value::Undefined
                } else if a % b == 0 {
                    Value::Int(a / b)
                } else {
                    Value::Double(a as f64 / b as f64)
                }
            }
        };
    }

    match (lhs.try_to_double(), rhs.try_to_double()) {
        (Some(a), Some(b)) => match op {
            BinaryOp::Add => Value::Double(a + b),
            BinaryOp::Sub => Value::Double(a - b),
            BinaryOp::Mul => Value::Double(a * b),
            _ => {
                if b == 0.0 {
                    Value::Undefined
                } else {
                    Value::Double(a / b)
                }
            }
        },
        _ => Value::Undefined,
    }
}
