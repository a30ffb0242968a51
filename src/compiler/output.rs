use std::fmt;
use std::sync::Arc;

use crate::ast::Value;
use crate::eval::{ExecEnvironment, RuntimeResult};
use crate::typed_ast::{ChannelRef, TypedAction};

use super::expression::compile_expression;
use super::{CompileResult, CompileScope};

/// What an action writes to.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputTarget {
    Invocation(ChannelRef),
    /// A keyword cell, by qualified name.
    Keyword(String),
}

pub type ProduceFn = Arc<dyn Fn(&ExecEnvironment) -> RuntimeResult<Vec<Option<Value>>> + Send + Sync>;

/// A compiled action. Producing its values executes nothing; invoking the
/// channel or persisting the keyword is left to the engine.
#[derive(Clone)]
pub struct CompiledOutput {
    pub target: OutputTarget,
    produce: ProduceFn,
}

impl fmt::Debug for CompiledOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledOutput")
            .field("target", &self.target)
            .finish()
    }
}

impl CompiledOutput {
    /// Parameter values for the target, one slot per schema parameter. A
    /// keyword target produces exactly one value.
    pub fn produce(&self, env: &ExecEnvironment) -> RuntimeResult<Vec<Option<Value>>> {
        (self.produce)(env)
    }
}

pub fn compile_action(action: &TypedAction, scope: &CompileScope) -> CompileResult<CompiledOutput> {
    match action {
        TypedAction::Invocation { channel, params } => {
            let params = params
                .iter()
                .map(|param| {
                    param
                        .as_ref()
                        .map(|expr| compile_expression(expr, scope))
                        .transpose()
                })
                .collect::<CompileResult<Vec<_>>>()?;
            Ok(CompiledOutput {
                target: OutputTarget::Invocation(channel.clone()),
                produce: Arc::new(move |env| {
                    params
                        .iter()
                        .map(|param| param.as_ref().map(|expr| expr(env)).transpose())
                        .collect()
                }),
            })
        }
        TypedAction::Keyword { name, expr } => {
            let compiled = compile_expression(expr, scope)?;
            Ok(CompiledOutput {
                target: OutputTarget::Keyword(name.clone()),
                produce: Arc::new(move |env| Ok(vec![Some(compiled(env)?)])),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Section, Selector};
    use crate::typed_ast::{TypedExprKind, TypedExpression};
    use crate::types::Type;

    fn logger() -> ChannelRef {
        ChannelRef {
            selector: Selector::Builtin,
            kind: crate::ast::BUILTIN_KIND.to_string(),
            channel: "logger".to_string(),
            section: Section::Actions,
        }
    }

    #[test]
    fn test_invocation_output() {
        let mut scope = CompileScope::new();
        scope.declare("text", Type::String);
        let action = TypedAction::Invocation {
            channel: logger(),
            params: vec![
                Some(TypedExpression::new(
                    Type::String,
                    TypedExprKind::VarRef("text".to_string()),
                )),
                None,
            ],
        };
        let output = compile_action(&action, &scope).unwrap();
        assert_eq!(output.target, OutputTarget::Invocation(logger()));

        let mut env = ExecEnvironment::default();
        env.set_var("text", Value::string("hello"));
        assert_eq!(
            output.produce(&env).unwrap(),
            vec![Some(Value::string("hello")), None]
        );
    }

    #[test]
    fn test_keyword_output() {
        let action = TypedAction::Keyword {
            name: "count".to_string(),
            expr: TypedExpression::constant(Value::Number(5.0), Type::Number),
        };
        let output = compile_action(&action, &CompileScope::new()).unwrap();
        assert_eq!(output.target, OutputTarget::Keyword("count".to_string()));
        assert_eq!(
            output.produce(&ExecEnvironment::default()).unwrap(),
            vec![Some(Value::Number(5.0))]
        );
    }
}
