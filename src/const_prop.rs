//! Constant propagation over verified rules.
//!
//! Any subtree whose operator is pure and whose operands are all constants
//! is replaced by its value. Bindings that fold to a constant are
//! substituted into the parts of the same rule that read them. The
//! `regex` and `contains` predicates keep their shape: only their scalar
//! arguments are folded, the input compiler relies on recognizing them.

use std::collections::HashMap;

use tracing::debug;

use crate::ast::Value;
use crate::builtins::ResolvedOp;
use crate::typed_ast::{
    Binder, TypedAction, TypedExprKind, TypedExpression, TypedInvocation, TypedPredicate,
    TypedProgram, TypedRule, TypedRulePart,
};
use crate::types::Type;

pub fn fold_program(program: TypedProgram) -> TypedProgram {
    let rules = program.rules.iter().map(fold_rule).collect();
    TypedProgram { rules, ..program }
}

pub fn fold_rule(rule: &TypedRule) -> TypedRule {
    let mut folder = ConstantFolder::default();
    let trigger = rule
        .trigger
        .as_ref()
        .map(|parts| folder.fold_parts(parts));
    let queries = rule
        .queries
        .iter()
        .map(|parts| folder.fold_parts(parts))
        .collect();
    let actions = rule
        .actions
        .iter()
        .map(|action| folder.fold_action(action))
        .collect();
    TypedRule {
        id: rule.id,
        module: rule.module.clone(),
        trigger,
        queries,
        actions,
    }
}

/// Folds a single expression with no bindings in scope.
pub fn fold_expression(expr: &TypedExpression) -> TypedExpression {
    ConstantFolder::default().fold(expr)
}

#[derive(Debug, Default)]
struct ConstantFolder {
    /// Rule locals bound to a constant so far.
    constants: HashMap<String, TypedExpression>,
}

impl ConstantFolder {
    fn fold_parts(&mut self, parts: &[TypedRulePart]) -> Vec<TypedRulePart> {
        parts.iter().map(|part| self.fold_part(part)).collect()
    }

    fn fold_part(&mut self, part: &TypedRulePart) -> TypedRulePart {
        match part {
            TypedRulePart::Invocation(invocation) => TypedRulePart::Invocation(TypedInvocation {
                channel: invocation.channel.clone(),
                params: invocation
                    .params
                    .iter()
                    .map(|param| param.as_ref().map(|binder| self.fold_binder(binder)))
                    .collect(),
                schema: invocation.schema.clone(),
            }),
            TypedRulePart::Binding { name, expr } => {
                let expr = self.fold(expr);
                if expr.is_constant() {
                    self.constants.insert(name.clone(), expr.clone());
                }
                TypedRulePart::Binding {
                    name: name.clone(),
                    expr,
                }
            }
            TypedRulePart::BuiltinPredicate(predicate) => {
                TypedRulePart::BuiltinPredicate(self.fold_predicate(predicate))
            }
            TypedRulePart::Condition(expr) => TypedRulePart::Condition(self.fold(expr)),
        }
    }

    fn fold_predicate(&self, predicate: &TypedPredicate) -> TypedPredicate {
        match predicate {
            TypedPredicate::Regex {
                value,
                pattern,
                flags,
                captures,
            } => TypedPredicate::Regex {
                value: self.fold(value),
                pattern: self.fold(pattern),
                flags: self.fold(flags),
                captures: captures
                    .iter()
                    .map(|capture| self.fold_binder(capture))
                    .collect(),
            },
            TypedPredicate::Contains { container, element } => TypedPredicate::Contains {
                container: self.fold(container),
                element: self.fold_binder(element),
            },
            TypedPredicate::Call(expr) => TypedPredicate::Call(self.fold(expr)),
        }
    }

    fn fold_binder(&self, binder: &Binder) -> Binder {
        match binder {
            Binder::Declare { .. } => binder.clone(),
            Binder::Expr(expr) => Binder::Expr(self.fold(expr)),
        }
    }

    fn fold_action(&self, action: &TypedAction) -> TypedAction {
        match action {
            TypedAction::Invocation { channel, params } => TypedAction::Invocation {
                channel: channel.clone(),
                params: params
                    .iter()
                    .map(|param| param.as_ref().map(|expr| self.fold(expr)))
                    .collect(),
            },
            TypedAction::Keyword { name, expr } => TypedAction::Keyword {
                name: name.clone(),
                expr: self.fold(expr),
            },
        }
    }

    fn fold(&self, expr: &TypedExpression) -> TypedExpression {
        match &expr.kind {
            TypedExprKind::Constant(value) => match value.normalize() {
                Ok(value) => TypedExpression::constant(value, expr.ty.clone()),
                Err(_) => expr.clone(),
            },
            TypedExprKind::VarRef(name) => match self.constants.get(name) {
                Some(constant) => constant.clone(),
                None => expr.clone(),
            },
            TypedExprKind::KeywordRef(_) => expr.clone(),
            TypedExprKind::MemberRef { object, name } => {
                let object = self.fold(object);
                if let Some(Value::Object(fields)) = object.as_constant() {
                    if let Some(field) = fields.get(name) {
                        return TypedExpression::constant(field.clone(), expr.ty.clone());
                    }
                }
                TypedExpression::new(
                    expr.ty.clone(),
                    TypedExprKind::MemberRef {
                        object: Box::new(object),
                        name: name.clone(),
                    },
                )
            }
            TypedExprKind::FunctionCall { op, args } => {
                let args: Vec<_> = args.iter().map(|arg| self.fold(arg)).collect();
                try_fold(op, &args, &expr.ty).unwrap_or_else(|| {
                    TypedExpression::new(
                        expr.ty.clone(),
                        TypedExprKind::FunctionCall { op: *op, args },
                    )
                })
            }
            TypedExprKind::UnaryOp { op, arg } => {
                let arg = self.fold(arg);
                try_fold(op, std::slice::from_ref(&arg), &expr.ty).unwrap_or_else(|| {
                    TypedExpression::new(
                        expr.ty.clone(),
                        TypedExprKind::UnaryOp {
                            op: *op,
                            arg: Box::new(arg),
                        },
                    )
                })
            }
            TypedExprKind::BinaryOp { op, lhs, rhs } => {
                let args = [self.fold(lhs), self.fold(rhs)];
                try_fold(op, &args, &expr.ty).unwrap_or_else(|| {
                    let [lhs, rhs] = args;
                    TypedExpression::new(
                        expr.ty.clone(),
                        TypedExprKind::BinaryOp {
                            op: *op,
                            lhs: Box::new(lhs),
                            rhs: Box::new(rhs),
                        },
                    )
                })
            }
            TypedExprKind::Tuple(items) => TypedExpression::new(
                expr.ty.clone(),
                TypedExprKind::Tuple(items.iter().map(|item| self.fold(item)).collect()),
            ),
            TypedExprKind::Array(items) => {
                let items: Vec<_> = items.iter().map(|item| self.fold(item)).collect();
                let values: Option<Vec<Value>> = items
                    .iter()
                    .map(|item| item.as_constant().cloned())
                    .collect();
                match values {
                    Some(values) => TypedExpression::constant(Value::Array(values), expr.ty.clone()),
                    None => TypedExpression::new(expr.ty.clone(), TypedExprKind::Array(items)),
                }
            }
        }
    }
}

// None when the call cannot be evaluated now; failures leave it unfolded
fn try_fold(op: &ResolvedOp, args: &[TypedExpression], ty: &Type) -> Option<TypedExpression> {
    if !op.is_foldable() {
        return None;
    }
    let runtime_args = args
        .iter()
        .map(|arg| arg.as_constant().map(Value::to_runtime))
        .collect::<Option<Vec<_>>>()?;
    match op.invoke(&runtime_args, None) {
        Ok(value) => Some(TypedExpression::constant(
            Value::from_runtime(value, ty),
            ty.clone(),
        )),
        Err(error) => {
            debug!(op = op.name, %error, "Constant fold failed, leaving expression unfolded");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Expression;
    use crate::type_checker::scope::VarKind;
    use crate::type_checker::{check_expression, TypeScope};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn typed(expr: &Expression) -> TypedExpression {
        let mut scope = TypeScope::new();
        scope.declare("x", Type::Number, VarKind::Local).unwrap();
        check_expression(expr, &scope, &BTreeMap::new()).unwrap()
    }

    fn number(n: f64) -> Expression {
        Expression::constant(Value::Number(n))
    }

    #[test]
    fn test_arithmetic_folds() {
        let expr = typed(&Expression::binary(
            number(1.0),
            "+",
            Expression::binary(number(2.0), "*", number(3.0)),
        ));
        assert_eq!(fold_expression(&expr), TypedExpression::constant(Value::Number(7.0), Type::Number));
    }

    #[test]
    fn test_measures_fold_in_base_unit() {
        let expr = typed(&Expression::binary(
            Expression::constant(Value::measure(2.0, "km")),
            "+",
            Expression::constant(Value::measure(500.0, "m")),
        ));
        let folded = fold_expression(&expr);
        assert_eq!(folded.ty, Type::Measure("m".to_string()));
        assert_eq!(folded.as_constant(), Some(&Value::measure(2500.0, "m")));
    }

    #[test]
    fn test_variables_and_impure_calls_stay() {
        let expr = typed(&Expression::binary(Expression::var("x"), "+", number(1.0)));
        assert_eq!(fold_expression(&expr), expr);

        let expr = typed(&Expression::call("random", vec![]));
        assert_eq!(fold_expression(&expr), expr);

        // partial folding below a variable
        let expr = typed(&Expression::binary(
            Expression::var("x"),
            "+",
            Expression::binary(number(1.0), "+", number(1.0)),
        ));
        let TypedExprKind::BinaryOp { rhs, .. } = fold_expression(&expr).kind else {
            panic!("expected a binary op");
        };
        assert_eq!(rhs.as_constant(), Some(&Value::Number(2.0)));
    }

    #[test]
    fn test_failed_fold_is_left_alone() {
        let expr = typed(&Expression::binary(number(1.0), "/", number(0.0)));
        assert_eq!(fold_expression(&expr), expr);

        let date = chrono::TimeZone::with_ymd_and_hms(&chrono::Utc, 2024, 1, 1, 0, 0, 0).unwrap();
        let expr = typed(&Expression::binary(
            Expression::constant(Value::Date(date)),
            "-",
            Expression::constant(Value::measure(1e300, "ms")),
        ));
        assert_eq!(expr.ty, Type::Date);
        assert_eq!(fold_expression(&expr), expr);
    }

    #[test]
    fn test_constant_arrays() {
        let expr = typed(&Expression::Array(vec![
            number(1.0),
            Expression::binary(number(1.0), "+", number(1.0)),
        ]));
        assert_eq!(
            fold_expression(&expr).as_constant(),
            Some(&Value::Array(vec![Value::Number(1.0), Value::Number(2.0)]))
        );
    }

    #[test]
    fn test_constant_bindings_are_substituted() {
        let rule = TypedRule {
            id: 0,
            module: None,
            trigger: None,
            queries: vec![vec![
                TypedRulePart::Binding {
                    name: "y".to_string(),
                    expr: typed(&Expression::binary(number(2.0), "+", number(2.0))),
                },
                TypedRulePart::Condition(typed(&Expression::binary(
                    Expression::var("x"),
                    ">",
                    number(0.0),
                ))),
            ]],
            actions: vec![TypedAction::Keyword {
                name: "count".to_string(),
                expr: TypedExpression::new(Type::Number, TypedExprKind::VarRef("y".to_string())),
            }],
        };
        let folded = fold_rule(&rule);
        assert_eq!(
            folded.actions[0],
            TypedAction::Keyword {
                name: "count".to_string(),
                expr: TypedExpression::constant(Value::Number(4.0), Type::Number),
            }
        );
    }

    #[test]
    fn test_regex_keeps_its_shape() {
        let pattern = typed(&Expression::binary(
            Expression::constant(Value::string("^a")),
            "+",
            Expression::constant(Value::string("b")),
        ));
        let rule = TypedRule {
            id: 0,
            module: None,
            trigger: None,
            queries: vec![vec![TypedRulePart::BuiltinPredicate(TypedPredicate::Regex {
                value: TypedExpression::constant(Value::string("abc"), Type::String),
                pattern,
                flags: TypedExpression::constant(Value::string(""), Type::String),
                captures: vec![],
            })]],
            actions: vec![],
        };
        let folded = fold_rule(&rule);
        let TypedRulePart::BuiltinPredicate(TypedPredicate::Regex { pattern, .. }) =
            &folded.queries[0][0]
        else {
            panic!("regex predicate was rewritten");
        };
        assert_eq!(pattern.as_constant(), Some(&Value::string("^ab")));
    }

    fn arithmetic() -> impl Strategy<Value = Expression> {
        let leaf = prop_oneof![
            (-100i32..100).prop_map(|n| number(n as f64)),
            Just(Expression::var("x")),
        ];
        leaf.prop_recursive(4, 32, 2, |inner| {
            (inner.clone(), prop_oneof![Just("+"), Just("-"), Just("*")], inner)
                .prop_map(|(lhs, op, rhs)| Expression::binary(lhs, op, rhs))
        })
    }

    proptest! {
        #[test]
        fn test_folding_is_idempotent(expr in arithmetic()) {
            let once = fold_expression(&typed(&expr));
            let twice = fold_expression(&once);
            prop_assert_eq!(&twice, &once);
            prop_assert_eq!(once.ty, Type::Number);
        }
    }
}
