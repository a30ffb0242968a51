use super::*;
use pretty_assertions::assert_eq;
use thingtalk::ast::BUILTIN_KIND;
use thingtalk::compiler::OutputTarget;
use thingtalk::eval::EventFrame;
use thingtalk::types::Type;
use thingtalk::{ExecEnvironment, TypeCheckError};

#[tokio::test]
async fn test_builtin_notify_command() -> Result<(), CompileError> {
    let program = Program::new("Notify", vec![command(vec![], vec![notify()])]);
    let compiled = compile(&program).await?;

    assert_eq!(compiled.rules.len(), 1);
    let rule = &compiled.rules[0];
    assert!(rule.is_command());
    assert!(rule.queries.is_empty());
    assert_eq!(rule.outputs.len(), 1);
    let OutputTarget::Invocation(channel) = &rule.outputs[0].target else {
        panic!("expected an invocation target");
    };
    assert_eq!(channel.kind, BUILTIN_KIND);
    assert_eq!(channel.channel, "notify");
    assert_eq!(rule.summary(), format!("rule 0: now => @{}.notify", BUILTIN_KIND));
    Ok(())
}

#[tokio::test]
async fn test_keyword_assignment_command() -> Result<(), CompileError> {
    let program = Program::new(
        "Count",
        vec![
            Statement::VarDecl {
                name: "count".to_string(),
                ty: Type::Number,
            },
            command(vec![], vec![RulePart::binding("count", number(5.0))]),
        ],
    );
    let compiled = compile(&program).await?;
    assert_eq!(compiled.keywords.get("count"), Some(&Type::Number));

    let output = &compiled.rules[0].outputs[0];
    assert_eq!(output.target, OutputTarget::Keyword("count".to_string()));
    assert_eq!(
        output.produce(&ExecEnvironment::default()),
        Ok(vec![Some(Value::Number(5.0))])
    );
    let mut env = ExecEnvironment::default();
    env.set_var("unrelated", Value::string("x"));
    assert_eq!(output.produce(&env), Ok(vec![Some(Value::Number(5.0))]));
    Ok(())
}

#[tokio::test]
async fn test_contains_binds_each_element() -> Result<(), CompileError> {
    // now => @com.list.items(items), $contains(items, x), x > 1 => notify
    let program = Program::new(
        "Contains",
        vec![command(
            vec![vec![
                remote("com.list", "items", vec![Expression::var("items")]),
                RulePart::BuiltinPredicate(Expression::call(
                    "contains",
                    vec![Expression::var("items"), Expression::var("x")],
                )),
                RulePart::Condition(Expression::binary(
                    Expression::var("x"),
                    ">",
                    number(1.0),
                )),
            ]],
            vec![notify()],
        )],
    );
    let compiled = compile(&program).await?;
    let query = &compiled.rules[0].queries[0];

    let mut env = ExecEnvironment::default();
    env.set_query_event(
        vec![],
        EventFrame::new(
            query.invocation.channel.clone(),
            vec![Value::Array(vec![
                Value::Number(1.0),
                Value::Number(2.0),
                Value::Number(3.0),
            ])],
        ),
    );
    let bound: Vec<Value> = query
        .filter
        .matches(env)
        .map(|env| env.and_then(|env| env.read_var("x")))
        .collect::<Result<_, _>>()
        .map_err(|e| CompileError::internal(e.to_string()))?;
    assert_eq!(bound, vec![Value::Number(2.0), Value::Number(3.0)]);
    Ok(())
}

#[tokio::test]
async fn test_trigger_parameters_are_classified() -> Result<(), CompileError> {
    // monitor @com.twitter.source(text = "hi", from := $who) => notify
    let program = Program::new(
        "Classify",
        vec![rule(
            vec![remote(
                "com.twitter",
                "source",
                vec![
                    Expression::constant(Value::string("hi")),
                    Expression::var("who"),
                ],
            )],
            vec![],
            vec![notify()],
        )],
    );
    let compiled = compile(&program).await?;
    let rule = &compiled.rules[0];
    let trigger = rule.inputs.invocation.as_ref().expect("rule has a trigger");
    assert_eq!(trigger.assigned, vec![(1, "who".to_string())]);
    assert!(trigger.post_checked.is_empty());
    assert_eq!(
        trigger.evaluate_inputs(&ExecEnvironment::default()),
        Ok(vec![Some(Value::string("hi")), None])
    );
    assert_eq!(compiled.triggered_rules().count(), 1);
    assert_eq!(compiled.commands().count(), 0);
    Ok(())
}

#[tokio::test]
async fn test_rejected_programs() {
    let unknown_channel = Program::new(
        "Unknown",
        vec![command(vec![], vec![remote("com.twitter", "delete", vec![])])],
    );
    assert!(matches!(
        compile(&unknown_channel).await,
        Err(CompileError::TypeCheck(TypeCheckError::Schema(_)))
    ));

    let bad_param = Program::new(
        "BadParam",
        vec![command(vec![], vec![remote("com.twitter", "post", vec![number(1.0)])])],
    );
    assert!(matches!(
        compile(&bad_param).await,
        Err(CompileError::TypeCheck(TypeCheckError::ParameterMismatch { .. }))
    ));

    let undefined = Program::new(
        "Undefined",
        vec![command(
            vec![],
            vec![remote("com.twitter", "post", vec![Expression::var("nope")])],
        )],
    );
    assert_eq!(
        compile(&undefined).await.err(),
        Some(CompileError::TypeCheck(TypeCheckError::UndefinedVariable(
            "nope".to_string()
        )))
    );
}

#[tokio::test]
async fn test_program_from_json() -> Result<(), CompileError> {
    let program = Program::new("Json", vec![command(vec![], vec![notify()])])
        .with_param("greeting", Type::String);
    let json = serde_json::to_string(&program).map_err(|e| CompileError::internal(e.to_string()))?;
    let parsed: Program =
        serde_json::from_str(&json).map_err(|e| CompileError::internal(e.to_string()))?;
    let compiled = compile(&parsed).await?;
    assert_eq!(compiled.params.len(), 1);
    assert_eq!(compiled.params[0].ty, Type::String);
    Ok(())
}
