//! Turns verified rules into closures the engine drives.
//!
//! A compile-time [`CompileScope`] threads through one rule: trigger, then
//! each query in order, then actions. Input clauses become [`RuleFilter`]s,
//! chains of steps that each pass, reject or fan out an
//! [`ExecEnvironment`](crate::eval::ExecEnvironment). Actions become
//! [`CompiledOutput`]s that produce parameter values without executing
//! anything.

pub mod expression;
pub mod input;
pub mod output;
pub mod program;

pub use expression::{compile_expression, CompiledExpr};
pub use input::{
    compile_clause, CompiledInvocation, CompiledQuery, EventSource, Matches, RuleFilter,
};
pub use output::{compile_action, CompiledOutput, OutputTarget};
pub use program::{
    compile_program, compile_rule, compile_typed_program, CompiledInputs, CompiledProgram,
    CompiledRule,
};

use std::collections::BTreeMap;

use thiserror::Error;

use crate::ast::ProgramParam;
use crate::schema::SchemaError;
use crate::type_checker::TypeCheckError;
use crate::types::Type;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompileError {
    #[error("Type check error: {0}")]
    TypeCheck(#[from] TypeCheckError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Variable {0} is not in scope")]
    UnknownVariable(String),

    #[error("Internal compiler error: {0}")]
    Internal(String),
}

impl CompileError {
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }
}

pub type CompileResult<T> = Result<T, CompileError>;

/// Names visible to compiled code at one point of a rule, with their types.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompileScope {
    vars: BTreeMap<String, Type>,
}

impl CompileScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(params: &[ProgramParam]) -> Self {
        Self {
            vars: params
                .iter()
                .map(|param| (param.name.clone(), param.ty.clone()))
                .collect(),
        }
    }

    pub fn declare(&mut self, name: &str, ty: Type) {
        self.vars.insert(name.to_string(), ty);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Type> {
        self.vars.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }
}
