use super::*;
use pretty_assertions::assert_eq;
use std::collections::HashMap;
use thingtalk::compiler::CompiledRule;
use thingtalk::eval::{EventFrame, RuntimeResult};
use thingtalk::{ExecEnvironment, KeywordAccess};

// monitor @com.twitter.source(text, from)
//   => @com.weather.current(location = here, temperature := temp), temp >= 20C
//   => @com.twitter.post(text)
fn hot_tweets() -> Program {
    let here = Value::Location {
        x: 13.4,
        y: 52.5,
        display: Some("Berlin".to_string()),
    };
    Program::new(
        "HotTweets",
        vec![rule(
            vec![remote(
                "com.twitter",
                "source",
                vec![Expression::var("text"), Expression::var("from")],
            )],
            vec![vec![
                remote(
                    "com.weather",
                    "current",
                    vec![Expression::constant(here), Expression::var("temp")],
                ),
                RulePart::Condition(Expression::binary(
                    Expression::var("temp"),
                    ">=",
                    Expression::constant(Value::measure(20.0, "C")),
                )),
            ]],
            vec![remote("com.twitter", "post", vec![Expression::var("text")])],
        )],
    )
}

/// Drives one trigger event through the rule the way an engine would and
/// returns the values produced for each output.
fn activate(
    rule: &CompiledRule,
    env: ExecEnvironment,
    tweet: Vec<Value>,
    weather: Vec<Value>,
) -> RuntimeResult<Vec<Vec<Option<Value>>>> {
    let trigger = rule
        .inputs
        .invocation
        .as_ref()
        .map(|trigger| trigger.channel.clone())
        .expect("rule has a trigger");
    let mut env = env;
    env.set_trigger_event(EventFrame::new(trigger, tweet));

    let mut produced = Vec::new();
    for env in rule.inputs.caller.matches(env) {
        let mut env = env?;
        let query = &rule.queries[0];
        let inputs: Vec<Value> = query
            .invocation
            .evaluate_inputs(&env)?
            .into_iter()
            .flatten()
            .collect();
        env.set_query_event(
            inputs,
            EventFrame::new(query.invocation.channel.clone(), weather.clone()),
        );
        if let Some(env) = query.filter.first_match(env)? {
            for output in &rule.outputs {
                produced.push(output.produce(&env)?);
            }
        }
    }
    Ok(produced)
}

#[tokio::test]
async fn test_trigger_query_action_activation() -> Result<(), CompileError> {
    let compiled = compile(&hot_tweets()).await?;
    let rule = &compiled.rules[0];
    assert_eq!(
        rule.summary(),
        "rule 0: @com.twitter.source => @com.weather.current => @com.twitter.post"
    );

    let query = &rule.queries[0].invocation;
    assert!(query.inputs[0].is_some());
    assert_eq!(query.assigned, vec![(1, "temp".to_string())]);

    let tweet = vec![
        Value::string("hot today"),
        Value::entity("alice", "tt:username"),
    ];
    let location = Value::Location {
        x: 13.4,
        y: 52.5,
        display: None,
    };
    let hot = vec![location.clone(), Value::Number(25.0), Value::Enum("sunny".to_string())];
    let cold = vec![location, Value::Number(10.0), Value::Enum("cloudy".to_string())];

    let produced = activate(rule, ExecEnvironment::default(), tweet.clone(), hot)
        .map_err(|e| CompileError::internal(e.to_string()))?;
    assert_eq!(produced, vec![vec![Some(Value::string("hot today"))]]);

    let produced = activate(rule, ExecEnvironment::default(), tweet, cold)
        .map_err(|e| CompileError::internal(e.to_string()))?;
    assert!(produced.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_missing_event_property_is_an_error() -> Result<(), CompileError> {
    let compiled = compile(&hot_tweets()).await?;
    let result = activate(
        &compiled.rules[0],
        ExecEnvironment::default(),
        vec![Value::string("only text")],
        vec![],
    );
    assert!(result.is_err());
    Ok(())
}

#[tokio::test]
async fn test_keyword_reads_and_params() -> Result<(), CompileError> {
    // var threshold : Number;
    // now => @com.list.items(items), $contains(items, x), x >= threshold
    //     => @com.twitter.post(prefix + "!")
    let program = Program::new(
        "Threshold",
        vec![
            Statement::VarDecl {
                name: "threshold".to_string(),
                ty: thingtalk::Type::Number,
            },
            command(
                vec![vec![
                    remote("com.list", "items", vec![Expression::var("items")]),
                    RulePart::BuiltinPredicate(Expression::call(
                        "contains",
                        vec![Expression::var("items"), Expression::var("x")],
                    )),
                    RulePart::Condition(Expression::binary(
                        Expression::var("x"),
                        ">=",
                        Expression::var("threshold"),
                    )),
                ]],
                vec![remote(
                    "com.twitter",
                    "post",
                    vec![Expression::binary(
                        Expression::var("prefix"),
                        "+",
                        Expression::constant(Value::string("!")),
                    )],
                )],
            ),
        ],
    )
    .with_param("prefix", thingtalk::Type::String);

    let compiled = compile(&program).await?;
    let rule = &compiled.rules[0];
    assert!(rule.inputs.keywords.contains("threshold"));
    assert!(rule.keywords.contains("threshold"));

    let cells = std::sync::Arc::new(dashmap::DashMap::new());
    cells.insert("threshold".to_string(), Value::Number(2.0));
    let mut env = ExecEnvironment::default()
        .with_params(HashMap::from([(
            "prefix".to_string(),
            Value::string("big"),
        )]))
        .with_keywords(KeywordAccess::ReadOnly(cells));
    let query = &rule.queries[0];
    env.set_query_event(
        vec![],
        EventFrame::new(
            query.invocation.channel.clone(),
            vec![Value::Array(vec![
                Value::Number(1.0),
                Value::Number(2.0),
                Value::Number(5.0),
            ])],
        ),
    );

    let produced: Vec<Vec<Option<Value>>> = query
        .filter
        .matches(env)
        .map(|env| env.and_then(|env| rule.outputs[0].produce(&env)))
        .collect::<RuntimeResult<_>>()
        .map_err(|e| CompileError::internal(e.to_string()))?;
    assert_eq!(
        produced,
        vec![
            vec![Some(Value::string("big!"))],
            vec![Some(Value::string("big!"))],
        ]
    );
    Ok(())
}
