use super::*;
use async_trait::async_trait;
use mockall::mock;
use std::collections::HashMap;
use thingtalk::schema::{KindSchemas, SchemaClient, SchemaResult};

mock! {
    pub Client {}

    #[async_trait]
    impl SchemaClient for Client {
        async fn get_schemas(
            &self,
            kinds: Vec<String>,
            with_metadata: bool,
        ) -> SchemaResult<HashMap<String, KindSchemas>>;
    }
}

fn snapshot() -> HashMap<String, KindSchemas> {
    serde_json::from_str(SCHEMAS).expect("schema snapshot should parse")
}

// @com.twitter.source(text) => @com.weather.current(...) => @com.twitter.post(text)
fn two_kinds() -> Program {
    Program::new(
        "TwoKinds",
        vec![rule(
            vec![remote("com.twitter", "source", vec![Expression::var("text")])],
            vec![vec![remote("com.weather", "current", vec![])]],
            vec![remote("com.twitter", "post", vec![Expression::var("text")])],
        )],
    )
}

#[tokio::test]
async fn test_schema_requests_are_batched_and_cached() -> Result<(), CompileError> {
    let mut client = MockClient::new();
    client
        .expect_get_schemas()
        .withf(|kinds, with_metadata| {
            let mut kinds = kinds.clone();
            kinds.sort();
            kinds == ["com.twitter", "com.weather"] && !with_metadata
        })
        .times(1)
        .returning(|kinds, _| {
            let snapshot = snapshot();
            Ok(kinds
                .into_iter()
                .filter_map(|kind| snapshot.get(&kind).map(|s| (kind, s.clone())))
                .collect())
        });

    let retriever = SchemaRetriever::new(Arc::new(client), Duration::from_millis(5));
    let program = two_kinds();
    let (first, second) = tokio::join!(
        compile_program(&program, &retriever),
        compile_program(&program, &retriever)
    );
    assert_eq!(first?.rules.len(), 1);
    assert_eq!(second?.rules.len(), 1);

    // served from the cache
    compile_program(&program, &retriever).await?;
    Ok(())
}

#[tokio::test]
async fn test_client_failure_rejects_program() {
    let mut client = MockClient::new();
    client.expect_get_schemas().returning(|_, _| {
        Err(thingtalk::SchemaError::Client("store unavailable".to_string()))
    });
    let retriever = SchemaRetriever::new(Arc::new(client), Duration::from_millis(0));
    assert!(matches!(
        compile_program(&two_kinds(), &retriever).await,
        Err(CompileError::TypeCheck(thingtalk::TypeCheckError::Schema(
            thingtalk::SchemaError::Client(_)
        )))
    ));
}
