
use super::*;
use crate::ast::{Expression, Program, RulePart, Selector, Statement, Value};
use crate::schema::{ChannelMeta, KindSchemas};
use crate::types::Type;
use std::collections::HashMap;
use std::sync::Arc;

fn meta(args: &[&str], schema: Vec<Type>) -> ChannelMeta {
    ChannelMeta::new(args.iter().map(|arg| arg.to_string()).collect(), schema)
}

/// Schemas for the kinds used across the checker tests.
pub(super) fn schemas() -> HashMap<String, Arc<KindSchemas>> {
    let mut twitter = KindSchemas::default();
    twitter.triggers.insert(
        "source".to_string(),
        meta(
            &["text", "from"],
            vec![Type::String, Type::entity("tt:username")],
        ),
    );
    twitter
        .actions
        .insert("post".to_string(), meta(&["status"], vec![Type::String]));

    let mut weather = KindSchemas::default();
    weather.queries.insert(
        "current".to_string(),
        meta(
            &["location", "temperature", "status"],
            vec![
                Type::Location,
                Type::Measure("C".to_string()),
                Type::Enum(vec!["sunny".to_string(), "cloudy".to_string()]),
            ],
        ),
    );

    let mut list = KindSchemas::default();
    list.queries.insert(
        "items".to_string(),
        meta(&["items"], vec![Type::array(Type::Number)]),
    );

    HashMap::from([
        ("com.twitter".to_string(), Arc::new(twitter)),
        ("com.weather".to_string(), Arc::new(weather)),
        ("com.list".to_string(), Arc::new(list)),
    ])
}

pub(super) fn check(program: &Program) -> TypeCheckResult<crate::typed_ast::TypedProgram> {
    let schemas = schemas();
    ProgramChecker::new(&schemas).check_program(program)
}

pub(super) fn rule(trigger: Vec<RulePart>, actions: Vec<RulePart>) -> Statement {
    Statement::Rule {
        trigger,
        queries: vec![],
        actions,
    }
}

pub(super) fn command(queries: Vec<Vec<RulePart>>, actions: Vec<RulePart>) -> Statement {
    Statement::Command { queries, actions }
}

pub(super) fn twitter_source(params: Vec<Expression>) -> RulePart {
    RulePart::invocation(Selector::GlobalName("com.twitter".to_string()), "source", params)
}

pub(super) fn notify() -> RulePart {
    RulePart::invocation(Selector::Builtin, "notify", vec![])
}

pub(super) fn number(n: f64) -> Expression {
    Expression::constant(Value::Number(n))
}
