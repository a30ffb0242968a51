use std::collections::BTreeMap;

use crate::ast::{Expression, Value};
use crate::builtins::{self, Builtin, ResolveFailure};
use crate::typed_ast::{TypedExprKind, TypedExpression};
use crate::types::{unify, Type, TypeVarScope};

use super::scope::{TypeScope, VarKind};
use super::{TypeCheckError, TypeCheckResult};

/// Type-checks one expression against the names visible in `scope`.
///
/// `keywords` maps qualified keyword cells to their declared types; it is
/// consulted for `module.keyword` member references.
pub fn check_expression(
    expr: &Expression,
    scope: &TypeScope,
    keywords: &BTreeMap<String, Type>,
) -> TypeCheckResult<TypedExpression> {
    ExpressionChecker { scope, keywords }.check(expr)
}

struct ExpressionChecker<'a> {
    scope: &'a TypeScope,
    keywords: &'a BTreeMap<String, Type>,
}

impl ExpressionChecker<'_> {
    fn check(&self, expr: &Expression) -> TypeCheckResult<TypedExpression> {
        match expr {
            Expression::Null => Err(TypeCheckError::InvalidNull),
            Expression::Constant(Value::VarRef(name)) | Expression::VarRef(name) => {
                self.check_var_ref(name)
            }
            Expression::Constant(value) => {
                let value = value.normalize()?;
                let ty = value.type_of()?;
                Ok(TypedExpression::constant(value, ty))
            }
            Expression::MemberRef { object, name } => self.check_member_ref(object, name),
            Expression::FunctionCall { name, args } => {
                let (name, builtin) = builtins::function(name)
                    .ok_or_else(|| TypeCheckError::UndefinedFunction(name.clone()))?;
                let args = self.check_all(args)?;
                let (op, ret) = resolve_call(name, builtin, &args)?;
                Ok(TypedExpression::new(ret, TypedExprKind::FunctionCall { op, args }))
            }
            Expression::UnaryOp { arg, opcode } => {
                let (name, builtin) = builtins::unary_op(opcode)
                    .ok_or_else(|| TypeCheckError::UndefinedFunction(opcode.clone()))?;
                let arg = self.check(arg)?;
                let (op, ret) = resolve_call(name, builtin, std::slice::from_ref(&arg))?;
                Ok(TypedExpression::new(
                    ret,
                    TypedExprKind::UnaryOp {
                        op,
                        arg: Box::new(arg),
                    },
                ))
            }
            Expression::BinaryOp { lhs, rhs, opcode } => {
                let (name, builtin) = builtins::binary_op(opcode)
                    .ok_or_else(|| TypeCheckError::UndefinedFunction(opcode.clone()))?;
                let lhs = self.check(lhs)?;
                let rhs = self.check(rhs)?;
                let args = [lhs, rhs];
                let (op, ret) = resolve_call(name, builtin, &args)?;
                let [lhs, rhs] = args;
                Ok(TypedExpression::new(
                    ret,
                    TypedExprKind::BinaryOp {
                        op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    },
                ))
            }
            Expression::Tuple(items) => {
                let items = self.check_all(items)?;
                let ty = Type::Tuple(Some(items.iter().map(|item| item.ty.clone()).collect()));
                Ok(TypedExpression::new(ty, TypedExprKind::Tuple(items)))
            }
            Expression::Array(items) => {
                let items = self.check_all(items)?;
                let mut scope = TypeVarScope::new();
                let mut elem = Type::Any;
                for item in &items {
                    elem = unify(&elem, &item.ty, &mut scope)?;
                }
                Ok(TypedExpression::new(
                    Type::array(elem),
                    TypedExprKind::Array(items),
                ))
            }
        }
    }

    fn check_all(&self, exprs: &[Expression]) -> TypeCheckResult<Vec<TypedExpression>> {
        exprs.iter().map(|expr| self.check(expr)).collect()
    }

    fn check_var_ref(&self, name: &str) -> TypeCheckResult<TypedExpression> {
        let entry = self
            .scope
            .get(name)
            .ok_or_else(|| TypeCheckError::UndefinedVariable(name.to_string()))?;
        let kind = match &entry.kind {
            VarKind::Keyword { cell } => TypedExprKind::KeywordRef(cell.clone()),
            VarKind::Module => {
                return Err(TypeCheckError::invalid_rule_part(format!(
                    "compute module {} cannot be used as a value",
                    name
                )))
            }
            VarKind::Param | VarKind::Local => TypedExprKind::VarRef(name.to_string()),
        };
        Ok(TypedExpression::new(entry.ty.clone(), kind))
    }

    fn check_member_ref(&self, object: &Expression, name: &str) -> TypeCheckResult<TypedExpression> {
        // module.keyword
        if let Expression::VarRef(module) = object {
            if let Some(VarKind::Module) = self.scope.get(module).map(|entry| &entry.kind) {
                let cell = format!("{}.{}", module, name);
                let ty = self.keywords.get(&cell).ok_or_else(|| TypeCheckError::UnknownMember {
                    object: module.clone(),
                    name: name.to_string(),
                })?;
                return Ok(TypedExpression::new(ty.clone(), TypedExprKind::KeywordRef(cell)));
            }
        }

        let object = self.check(object)?;
        let ty = match &object.ty {
            Type::Object(Some(fields)) => fields.get(name).cloned(),
            Type::Object(None) | Type::Any => Some(Type::Any),
            _ => None,
        }
        .ok_or_else(|| TypeCheckError::UnknownMember {
            object: object.ty.to_string(),
            name: name.to_string(),
        })?;
        Ok(TypedExpression::new(
            ty,
            TypedExprKind::MemberRef {
                object: Box::new(object),
                name: name.to_string(),
            },
        ))
    }
}

fn resolve_call(
    name: &'static str,
    builtin: &Builtin,
    args: &[TypedExpression],
) -> TypeCheckResult<(builtins::ResolvedOp, Type)> {
    let types: Vec<Type> = args.iter().map(|arg| arg.ty.clone()).collect();
    match builtins::resolve(name, builtin, &types) {
        Ok(resolution) => Ok((resolution.op, resolution.ret)),
        Err(ResolveFailure::Arity) => Err(TypeCheckError::ArityMismatch {
            name: name.to_string(),
            expected: builtin
                .overloads
                .first()
                .map(|overload| overload.params.len())
                .unwrap_or_default(),
            found: types.len(),
        }),
        Err(ResolveFailure::NoMatch) => Err(TypeCheckError::NoMatchingOverload {
            name: name.to_string(),
            args: types,
        }),
    }
}
