use thiserror::Error;

use crate::compiler::CompileError;
use crate::eval::RuntimeError;
use crate::schema::SchemaError;
use crate::type_checker::TypeCheckError;
use crate::types::TypeError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Type error: {0}")]
    Type(#[from] TypeError),

    // verification
    #[error("Type check error: {0}")]
    TypeCheck(#[from] TypeCheckError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type InternalResult<T> = Result<T, Error>;

impl Error {
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Error::Internal(message.into())
    }
}
