use super::*;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use thingtalk::compiler::OutputTarget;
use thingtalk::{ExecEnvironment, KeywordAccess, Type, TypeCheckError};

// module stats { var total : Number; now => total := total + 1; }
// now => @com.twitter.post(toString(stats.total));
// monitor @stats.total(t) => @stats.total(0);
fn stats_program() -> Program {
    let module = Statement::ComputeModule {
        name: "stats".to_string(),
        statements: vec![
            Statement::VarDecl {
                name: "total".to_string(),
                ty: Type::Number,
            },
            command(
                vec![],
                vec![RulePart::binding(
                    "total",
                    Expression::binary(Expression::var("total"), "+", number(1.0)),
                )],
            ),
        ],
    };
    Program::new(
        "Stats",
        vec![
            module,
            command(
                vec![],
                vec![remote(
                    "com.twitter",
                    "post",
                    vec![Expression::call(
                        "toString",
                        vec![Expression::member(Expression::var("stats"), "total")],
                    )],
                )],
            ),
            rule(
                vec![RulePart::invocation(
                    Selector::ComputeModule("stats".to_string()),
                    "total",
                    vec![Expression::var("t")],
                )],
                vec![],
                vec![RulePart::invocation(
                    Selector::ComputeModule("stats".to_string()),
                    "total",
                    vec![number(0.0)],
                )],
            ),
        ],
    )
}

#[tokio::test]
async fn test_compute_module_keywords() -> Result<(), CompileError> {
    let compiled = compile(&stats_program()).await?;
    assert_eq!(compiled.keywords.get("stats.total"), Some(&Type::Number));
    assert_eq!(compiled.rules.len(), 3);

    let increment = &compiled.rules[0];
    assert_eq!(increment.module.as_deref(), Some("stats"));
    assert_eq!(
        increment.outputs[0].target,
        OutputTarget::Keyword("stats.total".to_string())
    );
    assert!(increment.keywords.contains("stats.total"));
    assert!(increment.inputs.keywords.is_empty());
    assert_eq!(
        increment.summary(),
        "rule 0 in stats: now => stats.total := (reads stats.total)"
    );

    let cells = Arc::new(dashmap::DashMap::new());
    cells.insert("stats.total".to_string(), thingtalk::Value::Number(41.0));
    let env = ExecEnvironment::default().with_keywords(KeywordAccess::ReadWrite(cells.clone()));
    assert_eq!(
        increment.outputs[0].produce(&env),
        Ok(vec![Some(thingtalk::Value::Number(42.0))])
    );

    let report = &compiled.rules[1];
    assert_eq!(
        report.outputs[0].produce(&env),
        Ok(vec![Some(thingtalk::Value::string("41"))])
    );

    let reset = &compiled.rules[2];
    assert!(!reset.is_command());
    assert_eq!(
        reset.outputs[0].target,
        OutputTarget::Keyword("stats.total".to_string())
    );
    Ok(())
}

#[tokio::test]
async fn test_undeclared_module_member() {
    let program = Program::new(
        "Stats",
        vec![
            Statement::ComputeModule {
                name: "stats".to_string(),
                statements: vec![],
            },
            command(
                vec![],
                vec![remote(
                    "com.twitter",
                    "post",
                    vec![Expression::member(Expression::var("stats"), "missing")],
                )],
            ),
        ],
    );
    assert!(matches!(
        compile(&program).await,
        Err(CompileError::TypeCheck(TypeCheckError::UnknownMember { .. }))
    ));
}
