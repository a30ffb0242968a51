use std::sync::Arc;

use crate::ast::Value;
use crate::builtins::ResolvedOp;
use crate::eval::{ExecEnvironment, RuntimeError, RuntimeResult};
use crate::typed_ast::{TypedExprKind, TypedExpression};

use super::{CompileError, CompileResult, CompileScope};

/// A compiled expression, evaluated once per activation.
pub type CompiledExpr = Arc<dyn Fn(&ExecEnvironment) -> RuntimeResult<Value> + Send + Sync>;

/// Compiles `expr` against the names in `scope`. Referencing a local the
/// scope does not hold yet fails with [`CompileError::UnknownVariable`].
pub fn compile_expression(expr: &TypedExpression, scope: &CompileScope) -> CompileResult<CompiledExpr> {
    let compiled: CompiledExpr = match &expr.kind {
        TypedExprKind::Constant(value) => {
            let value = value.to_runtime();
            Arc::new(move |_| Ok(value.clone()))
        }
        TypedExprKind::VarRef(name) => {
            if !scope.contains(name) {
                return Err(CompileError::UnknownVariable(name.clone()));
            }
            let name = name.clone();
            Arc::new(move |env| env.read_var(&name))
        }
        TypedExprKind::KeywordRef(cell) => {
            let cell = cell.clone();
            Arc::new(move |env| env.read_keyword(&cell))
        }
        TypedExprKind::MemberRef { object, name } => {
            let object = compile_expression(object, scope)?;
            let name = name.clone();
            Arc::new(move |env| match object(env)? {
                Value::Object(mut fields) => fields
                    .remove(&name)
                    .ok_or_else(|| RuntimeError::MissingProperty(name.clone())),
                other => Err(RuntimeError::type_mismatch("Object", &other)),
            })
        }
        TypedExprKind::FunctionCall { op, args } => {
            let args = compile_all(args, scope)?;
            call(*op, args)
        }
        TypedExprKind::UnaryOp { op, arg } => call(*op, vec![compile_expression(arg, scope)?]),
        TypedExprKind::BinaryOp { op, lhs, rhs } => {
            let lhs = compile_expression(lhs, scope)?;
            let rhs = compile_expression(rhs, scope)?;
            match op.name {
                "&&" => short_circuit(lhs, rhs, false),
                "||" => short_circuit(lhs, rhs, true),
                _ => call(*op, vec![lhs, rhs]),
            }
        }
        TypedExprKind::Tuple(items) | TypedExprKind::Array(items) => {
            let items = compile_all(items, scope)?;
            Arc::new(move |env| {
                items
                    .iter()
                    .map(|item| item(env))
                    .collect::<RuntimeResult<Vec<_>>>()
                    .map(Value::Array)
            })
        }
    };
    Ok(compiled)
}

fn compile_all(exprs: &[TypedExpression], scope: &CompileScope) -> CompileResult<Vec<CompiledExpr>> {
    exprs
        .iter()
        .map(|expr| compile_expression(expr, scope))
        .collect()
}

fn call(op: ResolvedOp, args: Vec<CompiledExpr>) -> CompiledExpr {
    Arc::new(move |env| {
        let values = args
            .iter()
            .map(|arg| arg(env))
            .collect::<RuntimeResult<Vec<_>>>()?;
        op.invoke(&values, Some(env))
    })
}

// the right operand only runs when the left one does not decide
fn short_circuit(lhs: CompiledExpr, rhs: CompiledExpr, decides_on: bool) -> CompiledExpr {
    Arc::new(move |env| {
        let left = lhs(env)?;
        match left.as_bool() {
            Some(value) if value == decides_on => Ok(Value::Boolean(value)),
            Some(_) => {
                let right = rhs(env)?;
                right
                    .as_bool()
                    .map(Value::Boolean)
                    .ok_or_else(|| RuntimeError::type_mismatch("Boolean", &right))
            }
            None => Err(RuntimeError::type_mismatch("Boolean", &left)),
        }
    })
}
