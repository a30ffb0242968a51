use crate::ast::{Expression, Invocation, RulePart, Section, Selector};
use crate::typed_ast::{TypedAction, TypedExpression};
use crate::types::{unify, TypeVarScope};
use crate::visitor::RulePartVisitor;

use super::checker::ProgramChecker;
use super::expression::check_expression;
use super::scope::VarKind;
use super::{TypeCheckError, TypeCheckResult};

/// Checks the clauses of an action sequence, in source order.
pub struct OutputChecker<'c, 's> {
    checker: &'c mut ProgramChecker<'s>,
}

impl<'c, 's> OutputChecker<'c, 's> {
    pub fn new(checker: &'c mut ProgramChecker<'s>) -> Self {
        Self { checker }
    }

    fn check(&self, expr: &Expression) -> TypeCheckResult<TypedExpression> {
        check_expression(expr, &self.checker.scope, &self.checker.keywords)
    }

    fn check_invocation(&self, invocation: &Invocation) -> TypeCheckResult<TypedAction> {
        let (channel, schema) =
            self.checker
                .channel_schema(&invocation.selector, &invocation.name, Section::Actions)?;
        if invocation.params.len() < schema.len() {
            return Err(TypeCheckError::ArityMismatch {
                name: channel.to_string(),
                expected: schema.len(),
                found: invocation.params.len(),
            });
        }

        // actuals beyond the schema are dropped
        let mut params = Vec::with_capacity(schema.len());
        for (index, (param, slot)) in invocation.params.iter().zip(&schema).enumerate() {
            if matches!(param, Expression::Null) {
                params.push(None);
                continue;
            }
            let typed = self.check(param)?;
            unify(slot, &typed.ty, &mut TypeVarScope::new()).map_err(|_| {
                TypeCheckError::parameter_mismatch(&channel.to_string(), index, slot, &typed.ty)
            })?;
            params.push(Some(typed));
        }

        if let Selector::ComputeModule(module) = &invocation.selector {
            let expr = params
                .into_iter()
                .next()
                .flatten()
                .ok_or(TypeCheckError::InvalidNull)?;
            return Ok(TypedAction::Keyword {
                name: format!("{}.{}", module, invocation.name),
                expr,
            });
        }
        Ok(TypedAction::Invocation { channel, params })
    }

    fn check_keyword_write(&self, name: &str, expr: &Expression) -> TypeCheckResult<TypedAction> {
        let entry = self
            .checker
            .scope
            .get(name)
            .ok_or_else(|| TypeCheckError::UndefinedVariable(name.to_string()))?;
        let VarKind::Keyword { cell } = &entry.kind else {
            return Err(TypeCheckError::NotAKeyword(name.to_string()));
        };
        let typed = self.check(expr)?;
        unify(&entry.ty, &typed.ty, &mut TypeVarScope::new())?;
        Ok(TypedAction::Keyword {
            name: cell.clone(),
            expr: typed,
        })
    }
}

impl RulePartVisitor<RulePart> for OutputChecker<'_, '_> {
    type Output = TypedAction;
    type Error = TypeCheckError;

    fn visit_part(&mut self, part: &RulePart) -> TypeCheckResult<TypedAction> {
        match part {
            RulePart::Invocation(invocation) => self.check_invocation(invocation),
            RulePart::Binding { name, expr } => self.check_keyword_write(name, expr),
            RulePart::BuiltinPredicate(_) | RulePart::Condition(_) => Err(
                TypeCheckError::invalid_rule_part("actions cannot contain predicates"),
            ),
        }
    }
}
