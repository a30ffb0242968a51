mod activation_tests;
mod module_tests;
mod scenario_tests;
mod schema_tests;

use std::sync::Arc;
use std::time::Duration;

use thingtalk::{
    compile_program, CompileError, CompiledProgram, Expression, FileSchemaClient, Program,
    RulePart, SchemaRetriever, Selector, Statement, Value,
};

pub const SCHEMAS: &str = r#"{
    "com.twitter": {
        "triggers": {
            "source": {
                "args": ["text", "from"],
                "types": ["String", "Entity(tt:username)"]
            }
        },
        "actions": {
            "post": { "args": ["status"], "types": ["String"] }
        }
    },
    "com.weather": {
        "queries": {
            "current": {
                "args": ["location", "temperature", "status"],
                "types": ["Location", "Measure(C)", "Enum(sunny,cloudy)"]
            }
        }
    },
    "com.list": {
        "queries": {
            "items": { "args": ["items"], "types": ["Array(Number)"] }
        }
    }
}"#;

pub fn retriever() -> SchemaRetriever {
    let client = FileSchemaClient::from_json(SCHEMAS).expect("schema snapshot should parse");
    SchemaRetriever::new(Arc::new(client), Duration::from_millis(0))
}

pub async fn compile(program: &Program) -> Result<CompiledProgram, CompileError> {
    compile_program(program, &retriever()).await
}

pub fn remote(kind: &str, name: &str, params: Vec<Expression>) -> RulePart {
    RulePart::invocation(Selector::GlobalName(kind.to_string()), name, params)
}

pub fn notify() -> RulePart {
    RulePart::invocation(Selector::Builtin, "notify", vec![])
}

pub fn number(n: f64) -> Expression {
    Expression::constant(Value::Number(n))
}

pub fn command(queries: Vec<Vec<RulePart>>, actions: Vec<RulePart>) -> Statement {
    Statement::Command { queries, actions }
}

pub fn rule(
    trigger: Vec<RulePart>,
    queries: Vec<Vec<RulePart>>,
    actions: Vec<RulePart>,
) -> Statement {
    Statement::Rule {
        trigger,
        queries,
        actions,
    }
}
