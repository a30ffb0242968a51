use crate::ast::{Expression, Invocation, RulePart, Section, Value};
use crate::typed_ast::{Binder, TypedExpression, TypedInvocation, TypedPredicate, TypedRulePart};
use crate::types::{unify, Type, TypeVarScope};
use crate::visitor::RulePartVisitor;

use super::checker::ProgramChecker;
use super::expression::check_expression;
use super::scope::{TypeScope, VarKind};
use super::{TypeCheckError, TypeCheckResult};

/// A bare variable reference that nothing in scope declares yet.
pub(super) fn fresh_name<'e>(expr: &'e Expression, scope: &TypeScope) -> Option<&'e str> {
    match expr {
        Expression::VarRef(name) | Expression::Constant(Value::VarRef(name))
            if !scope.contains(name) =>
        {
            Some(name)
        }
        _ => None,
    }
}

/// Checks the clauses of a trigger or query.
pub struct InputChecker<'c, 's> {
    checker: &'c mut ProgramChecker<'s>,
    section: Section,
}

impl<'c, 's> InputChecker<'c, 's> {
    pub fn new(checker: &'c mut ProgramChecker<'s>, section: Section) -> Self {
        Self { checker, section }
    }

    fn check(&self, expr: &Expression) -> TypeCheckResult<TypedExpression> {
        check_expression(expr, &self.checker.scope, &self.checker.keywords)
    }

    fn check_invocation(&mut self, invocation: &Invocation) -> TypeCheckResult<TypedRulePart> {
        let (channel, mut schema) =
            self.checker
                .channel_schema(&invocation.selector, &invocation.name, self.section)?;
        if invocation.params.len() > schema.len() {
            return Err(TypeCheckError::ArityMismatch {
                name: channel.to_string(),
                expected: schema.len(),
                found: invocation.params.len(),
            });
        }

        let mut params = Vec::with_capacity(schema.len());
        for index in 0..schema.len() {
            let param = invocation.params.get(index).unwrap_or(&Expression::Null);
            if matches!(param, Expression::Null) {
                params.push(None);
                continue;
            }
            if let Some(name) = fresh_name(param, &self.checker.scope) {
                // filled from the event once the channel fires
                self.checker
                    .scope
                    .declare(name, schema[index].clone(), VarKind::Local)?;
                params.push(Some(Binder::Declare {
                    name: name.to_string(),
                    ty: schema[index].clone(),
                }));
                continue;
            }
            let typed = self.check(param)?;
            let unified = unify(&schema[index], &typed.ty, &mut TypeVarScope::new()).map_err(
                |_| {
                    TypeCheckError::parameter_mismatch(
                        &channel.to_string(),
                        index,
                        &schema[index],
                        &typed.ty,
                    )
                },
            )?;
            schema[index] = unified;
            params.push(Some(Binder::Expr(typed)));
        }

        Ok(TypedRulePart::Invocation(TypedInvocation {
            channel,
            params,
            schema,
        }))
    }

    /// A binder position: declares a fresh name of type `ty`, or checks an
    /// expression compatible with `ty`.
    fn check_binder(&mut self, expr: &Expression, ty: &Type, function: &str) -> TypeCheckResult<Binder> {
        if let Some(name) = fresh_name(expr, &self.checker.scope) {
            self.checker.scope.declare(name, ty.clone(), VarKind::Local)?;
            return Ok(Binder::Declare {
                name: name.to_string(),
                ty: ty.clone(),
            });
        }
        let typed = self.check(expr)?;
        unify(ty, &typed.ty, &mut TypeVarScope::new()).map_err(|_| {
            TypeCheckError::NoMatchingOverload {
                name: function.to_string(),
                args: vec![ty.clone(), typed.ty.clone()],
            }
        })?;
        Ok(Binder::Expr(typed))
    }

    fn check_string_arg(&self, expr: &Expression) -> TypeCheckResult<TypedExpression> {
        let typed = self.check(expr)?;
        match typed.ty {
            Type::String | Type::Entity(_) | Type::Enum(_) | Type::Any => Ok(typed),
            _ => Err(TypeCheckError::NoMatchingOverload {
                name: "regex".to_string(),
                args: vec![Type::String, typed.ty],
            }),
        }
    }

    fn check_predicate(&mut self, expr: &Expression) -> TypeCheckResult<TypedPredicate> {
        match expr {
            Expression::FunctionCall { name, args } if name == "regex" && args.len() >= 3 => {
                let value = self.check_string_arg(&args[0])?;
                let pattern = self.check_string_arg(&args[1])?;
                let flags = self.check_string_arg(&args[2])?;
                let captures = args[3..]
                    .iter()
                    .map(|capture| self.check_binder(capture, &Type::String, "regex"))
                    .collect::<TypeCheckResult<Vec<_>>>()?;
                Ok(TypedPredicate::Regex {
                    value,
                    pattern,
                    flags,
                    captures,
                })
            }
            Expression::FunctionCall { name, args } if name == "contains" && args.len() == 2 => {
                let container = self.check(&args[0])?;
                let elem = match &container.ty {
                    Type::Any => Type::Any,
                    other => other.element_type().cloned().ok_or_else(|| {
                        TypeCheckError::NoMatchingOverload {
                            name: "contains".to_string(),
                            args: vec![other.clone(), Type::Any],
                        }
                    })?,
                };
                let element = self.check_binder(&args[1], &elem, "contains")?;
                Ok(TypedPredicate::Contains { container, element })
            }
            other => {
                let typed = self.check(other)?;
                unify(&Type::Boolean, &typed.ty, &mut TypeVarScope::new())?;
                Ok(TypedPredicate::Call(typed))
            }
        }
    }
}

impl RulePartVisitor<RulePart> for InputChecker<'_, '_> {
    type Output = TypedRulePart;
    type Error = TypeCheckError;

    fn visit_part(&mut self, part: &RulePart) -> TypeCheckResult<TypedRulePart> {
        match part {
            RulePart::Invocation(invocation) => self.check_invocation(invocation),
            RulePart::BuiltinPredicate(expr) => {
                Ok(TypedRulePart::BuiltinPredicate(self.check_predicate(expr)?))
            }
            RulePart::Binding { name, expr } => {
                let typed = self.check(expr)?;
                self.checker
                    .scope
                    .declare(name, typed.ty.clone(), VarKind::Local)?;
                Ok(TypedRulePart::Binding {
                    name: name.clone(),
                    expr: typed,
                })
            }
            RulePart::Condition(expr) => {
                let typed = self.check(expr)?;
                unify(&Type::Boolean, &typed.ty, &mut TypeVarScope::new())?;
                Ok(TypedRulePart::Condition(typed))
            }
        }
    }
}
