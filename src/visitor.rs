//! Traversal helpers shared by the verification, folding and compilation passes.
//!
//! Two visitors live here:
//!
//! - [`ExpressionVisitor`] walks a typed expression tree, dispatching on the
//!   variant tag. Implementors override the hooks they care about and call
//!   [`walk_expression`] to recurse.
//! - [`RulePartVisitor`] processes one clause sequence. [`visit_rule_parts`]
//!   drives it in either source order or the canonical order
//!   (invocations, builtin predicates, bindings, conditions) that verification
//!   relies on: invocations introduce the schema-derived names, and bindings
//!   must be visible to the conditions after them.

use std::collections::BTreeSet;

use crate::ast::RulePart;
use crate::builtins::ResolvedOp;
use crate::typed_ast::{Binder, TypedExprKind, TypedExpression, TypedPredicate, TypedRulePart};

pub trait ExpressionVisitor {
    fn visit_expression(&mut self, expr: &TypedExpression) {
        walk_expression(self, expr);
    }

    fn visit_var_ref(&mut self, _name: &str) {}

    fn visit_keyword_ref(&mut self, _cell: &str) {}

    fn visit_op(&mut self, _op: &ResolvedOp) {}
}

pub fn walk_expression<V: ExpressionVisitor + ?Sized>(visitor: &mut V, expr: &TypedExpression) {
    match &expr.kind {
        TypedExprKind::Constant(_) => {}
        TypedExprKind::VarRef(name) => visitor.visit_var_ref(name),
        TypedExprKind::KeywordRef(cell) => visitor.visit_keyword_ref(cell),
        TypedExprKind::MemberRef { object, .. } => visitor.visit_expression(object),
        TypedExprKind::FunctionCall { op, args } => {
            visitor.visit_op(op);
            for arg in args {
                visitor.visit_expression(arg);
            }
        }
        TypedExprKind::UnaryOp { op, arg } => {
            visitor.visit_op(op);
            visitor.visit_expression(arg);
        }
        TypedExprKind::BinaryOp { op, lhs, rhs } => {
            visitor.visit_op(op);
            visitor.visit_expression(lhs);
            visitor.visit_expression(rhs);
        }
        TypedExprKind::Tuple(items) | TypedExprKind::Array(items) => {
            for item in items {
                visitor.visit_expression(item);
            }
        }
    }
}

/// Visits every expression nested in a typed rule part.
pub fn walk_rule_part<V: ExpressionVisitor + ?Sized>(visitor: &mut V, part: &TypedRulePart) {
    let visit_binder = |visitor: &mut V, binder: &Binder| {
        if let Binder::Expr(expr) = binder {
            visitor.visit_expression(expr);
        }
    };
    match part {
        TypedRulePart::Invocation(invocation) => {
            for param in invocation.params.iter().flatten() {
                visit_binder(visitor, param);
            }
        }
        TypedRulePart::Binding { expr, .. } | TypedRulePart::Condition(expr) => {
            visitor.visit_expression(expr)
        }
        TypedRulePart::BuiltinPredicate(TypedPredicate::Regex {
            value,
            pattern,
            flags,
            captures,
        }) => {
            visitor.visit_expression(value);
            visitor.visit_expression(pattern);
            visitor.visit_expression(flags);
            for capture in captures {
                visit_binder(visitor, capture);
            }
        }
        TypedRulePart::BuiltinPredicate(TypedPredicate::Contains { container, element }) => {
            visitor.visit_expression(container);
            visit_binder(visitor, element);
        }
        TypedRulePart::BuiltinPredicate(TypedPredicate::Call(expr)) => {
            visitor.visit_expression(expr)
        }
    }
}

/// Collects the keyword cells read by the visited expressions.
#[derive(Debug, Default)]
pub struct KeywordReadCollector {
    pub keywords: BTreeSet<String>,
}

impl ExpressionVisitor for KeywordReadCollector {
    fn visit_keyword_ref(&mut self, cell: &str) {
        self.keywords.insert(cell.to_string());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitOrder {
    Source,
    /// invocations, builtin predicates, bindings, conditions
    Canonical,
}

/// Position of a rule part in the canonical order.
pub trait RankedPart {
    fn rank(&self) -> u8;
}

impl RankedPart for RulePart {
    fn rank(&self) -> u8 {
        match self {
            RulePart::Invocation(_) => 0,
            RulePart::BuiltinPredicate(_) => 1,
            RulePart::Binding { .. } => 2,
            RulePart::Condition(_) => 3,
        }
    }
}

impl RankedPart for TypedRulePart {
    fn rank(&self) -> u8 {
        match self {
            TypedRulePart::Invocation(_) => 0,
            TypedRulePart::BuiltinPredicate(_) => 1,
            TypedRulePart::Binding { .. } => 2,
            TypedRulePart::Condition(_) => 3,
        }
    }
}

pub trait RulePartVisitor<P> {
    type Output;
    type Error;

    fn visit_part(&mut self, part: &P) -> Result<Self::Output, Self::Error>;
}

/// Visits `parts` in the requested order, stopping at the first error.
pub fn visit_rule_parts<P, V>(
    visitor: &mut V,
    parts: &[P],
    order: VisitOrder,
) -> Result<Vec<V::Output>, V::Error>
where
    P: RankedPart,
    V: RulePartVisitor<P>,
{
    let mut ordered: Vec<&P> = parts.iter().collect();
    if order == VisitOrder::Canonical {
        // stable: parts of equal rank keep their source order
        ordered.sort_by_key(|part| part.rank());
    }
    ordered
        .into_iter()
        .map(|part| visitor.visit_part(part))
        .collect()
}
