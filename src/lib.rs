//! ThingTalk rule compiler.
//!
//! Turns a parsed trigger → query → action program into closures an
//! engine can drive: [`type_checker::verify_program`] resolves schemas and
//! types, [`const_prop`] folds constants, and [`compiler`] produces the
//! executable [`compiler::CompiledProgram`].

pub mod ast;
pub mod builtins;
pub mod compiler;
pub mod config;
pub mod const_prop;
pub mod error;
pub mod eval;
pub mod schema;
pub mod type_checker;
pub mod typed_ast;
pub mod types;
pub mod visitor;

// Re-exports
pub use ast::{Expression, Program, RulePart, Selector, Statement, Value};
pub use compiler::{compile_program, CompileError, CompiledProgram, CompiledRule};
pub use config::CompilerConfig;
pub use error::*;
pub use eval::{ExecEnvironment, KeywordAccess, RuntimeError};
pub use schema::{FileSchemaClient, SchemaClient, SchemaError, SchemaRetriever};
pub use type_checker::{verify_program, TypeCheckError};
pub use types::{Type, TypeError};
