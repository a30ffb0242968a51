pub mod environment;
pub mod format;

pub use environment::{EventFrame, ExecEnvironment, KeywordAccess};
pub use format::{DefaultFormatter, EventFormatter, FormatHint, FormattedEvent, FormattedOutput};

use thiserror::Error;

use crate::ast::Value;

/// Errors raised while compiled closures run against an environment.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("Unknown variable: {0}")]
    UnknownVariable(String),

    #[error("Unknown keyword: {0}")]
    UnknownKeyword(String),

    #[error("Keyword {0} is read-only in this activation")]
    ReadOnlyKeyword(String),

    #[error("Event from {channel} has no property at index {index}")]
    MissingEventProperty { channel: String, index: usize },

    #[error("No event is available in this activation")]
    NoEvent,

    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("Invalid regular expression: {0}")]
    InvalidRegex(String),

    #[error("Missing property: {0}")]
    MissingProperty(String),

    #[error("{function} failed: {message}")]
    Native { function: String, message: String },

    #[error("Format error: {0}")]
    Format(String),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

impl RuntimeError {
    pub fn type_mismatch(expected: &str, found: &Value) -> Self {
        RuntimeError::TypeMismatch {
            expected: expected.to_string(),
            found: format!("{:?}", found),
        }
    }

    pub fn native<S: Into<String>>(function: &str, message: S) -> Self {
        RuntimeError::Native {
            function: function.to_string(),
            message: message.into(),
        }
    }
}
