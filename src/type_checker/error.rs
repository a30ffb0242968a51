use thiserror::Error;

use crate::schema::SchemaError;
use crate::types::{Type, TypeError};

/// Error type for type checking operations.
///
/// Verification stops at the first error; there is no partial result.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TypeCheckError {
    #[error("Type error: {0}")]
    Type(#[from] TypeError),

    #[error("Parameter {index} of {channel}: expected {expected}, found {found}")]
    ParameterMismatch {
        channel: String,
        index: usize,
        expected: Type,
        found: Type,
    },

    #[error("Undefined variable: {0}")]
    UndefinedVariable(String),

    #[error("Undefined function: {0}")]
    UndefinedFunction(String),

    #[error("No overload of {name} accepts ({})", join_types(.args))]
    NoMatchingOverload { name: String, args: Vec<Type> },

    #[error("Wrong number of arguments to {name}: expected {expected}, found {found}")]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("Duplicate declaration: {0}")]
    DuplicateDeclaration(String),

    #[error("{0} is not a keyword")]
    NotAKeyword(String),

    #[error("Unknown member {name} of {object}")]
    UnknownMember { object: String, name: String },

    #[error("Cannot resolve selector: {0}")]
    UnresolvableSelector(String),

    #[error("Invalid rule part: {0}")]
    InvalidRulePart(String),

    #[error("Null is only allowed as an invocation parameter")]
    InvalidNull,

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),
}

fn join_types(types: &[Type]) -> String {
    types
        .iter()
        .map(Type::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl TypeCheckError {
    pub fn parameter_mismatch(channel: &str, index: usize, expected: &Type, found: &Type) -> Self {
        Self::ParameterMismatch {
            channel: channel.to_string(),
            index,
            expected: expected.clone(),
            found: found.clone(),
        }
    }

    pub fn invalid_rule_part<S: Into<String>>(message: S) -> Self {
        Self::InvalidRulePart(message.into())
    }
}

/// Result type for type checking operations
pub type TypeCheckResult<T> = Result<T, TypeCheckError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let error = TypeCheckError::NoMatchingOverload {
            name: "+".to_string(),
            args: vec![Type::Number, Type::String],
        };
        assert_eq!(error.to_string(), "No overload of + accepts (Number, String)");

        let error = TypeCheckError::parameter_mismatch(
            "@com.twitter.post",
            0,
            &Type::String,
            &Type::Number,
        );
        assert_eq!(
            error.to_string(),
            "Parameter 0 of @com.twitter.post: expected String, found Number"
        );

        let error: TypeCheckError = SchemaError::UnknownKind("com.nope".to_string()).into();
        assert!(matches!(error, TypeCheckError::Schema(_)));
    }
}
