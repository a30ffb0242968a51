//! Channel schemas fetched from an external store.
//!
//! [`SchemaRetriever`] owns the cache. Requests for kinds that are not cached
//! yet are queued into a batch; the batch is flushed once per batch window
//! with a single [`SchemaClient::get_schemas`] call, and concurrent waiters
//! for the same kind share that in-flight batch. Callers always receive owned
//! copies, so narrowing a schema during type checking never touches the cache.

pub mod file_client;

pub use file_client::FileSchemaClient;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info, instrument};

use crate::ast::Section;
use crate::types::Type;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemaError {
    #[error("Unknown kind: {0}")]
    UnknownKind(String),

    #[error("Unknown channel {kind}.{name} in {section}")]
    UnknownChannel {
        kind: String,
        section: Section,
        name: String,
    },

    #[error("Schema client error: {0}")]
    Client(String),

    #[error("Schema request was cancelled")]
    Cancelled,
}

pub type SchemaResult<T> = Result<T, SchemaError>;

/// Signature and metadata of one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMeta {
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(alias = "types")]
    pub schema: Vec<Type>,
    #[serde(default)]
    pub doc: String,
    #[serde(default)]
    pub confirmation: String,
    #[serde(default)]
    pub canonical: String,
}

impl ChannelMeta {
    pub fn new(args: Vec<String>, schema: Vec<Type>) -> Self {
        Self {
            args,
            schema,
            doc: String::new(),
            confirmation: String::new(),
            canonical: String::new(),
        }
    }
}

/// All channels of one kind, as returned by the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KindSchemas {
    #[serde(default)]
    pub triggers: BTreeMap<String, ChannelMeta>,
    #[serde(default)]
    pub queries: BTreeMap<String, ChannelMeta>,
    #[serde(default)]
    pub actions: BTreeMap<String, ChannelMeta>,
}

impl KindSchemas {
    pub fn section(&self, section: Section) -> &BTreeMap<String, ChannelMeta> {
        match section {
            Section::Triggers => &self.triggers,
            Section::Queries => &self.queries,
            Section::Actions => &self.actions,
        }
    }

    pub fn channel(&self, kind: &str, section: Section, name: &str) -> SchemaResult<&ChannelMeta> {
        self.section(section)
            .get(name)
            .ok_or_else(|| SchemaError::UnknownChannel {
                kind: kind.to_string(),
                section,
                name: name.to_string(),
            })
    }
}

/// Network side of the schema store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SchemaClient: Send + Sync {
    /// Fetches the schemas of `kinds`. Kinds the store does not know are
    /// omitted from the result.
    async fn get_schemas(
        &self,
        kinds: Vec<String>,
        with_metadata: bool,
    ) -> SchemaResult<HashMap<String, KindSchemas>>;
}

type BatchResult = SchemaResult<Arc<HashMap<String, Arc<KindSchemas>>>>;
type SharedBatch = Shared<BoxFuture<'static, BatchResult>>;

struct PendingBatch {
    kinds: Vec<String>,
    sender: oneshot::Sender<BatchResult>,
    shared: SharedBatch,
}

struct BatchCache {
    client: Arc<dyn SchemaClient>,
    with_metadata: bool,
    window: Duration,
    cache: DashMap<String, Arc<KindSchemas>>,
    in_flight: DashMap<String, SharedBatch>,
    pending: Mutex<Option<PendingBatch>>,
}

impl BatchCache {
    fn new(client: Arc<dyn SchemaClient>, with_metadata: bool, window: Duration) -> Self {
        Self {
            client,
            with_metadata,
            window,
            cache: DashMap::new(),
            in_flight: DashMap::new(),
            pending: Mutex::new(None),
        }
    }

    async fn get(self: &Arc<Self>, kind: &str) -> SchemaResult<Arc<KindSchemas>> {
        if let Some(hit) = self.cache.get(kind) {
            return Ok(hit.clone());
        }
        let batch = self.enqueue(kind);
        let result = batch.await?;
        result
            .get(kind)
            .cloned()
            .ok_or_else(|| SchemaError::UnknownKind(kind.to_string()))
    }

    fn enqueue(self: &Arc<Self>, kind: &str) -> SharedBatch {
        if let Some(in_flight) = self.in_flight.get(kind) {
            return in_flight.clone();
        }
        let mut pending = self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // another waiter may have queued the kind while we took the lock
        if let Some(in_flight) = self.in_flight.get(kind) {
            return in_flight.clone();
        }
        let batch = pending.get_or_insert_with(|| self.open_batch());
        batch.kinds.push(kind.to_string());
        self.in_flight.insert(kind.to_string(), batch.shared.clone());
        batch.shared.clone()
    }

    fn open_batch(self: &Arc<Self>) -> PendingBatch {
        let (sender, receiver) = oneshot::channel();
        let shared = async move { receiver.await.unwrap_or(Err(SchemaError::Cancelled)) }
            .boxed()
            .shared();
        tokio::spawn(self.clone().flush());
        PendingBatch {
            kinds: Vec::new(),
            sender,
            shared,
        }
    }

    async fn flush(self: Arc<Self>) {
        if self.window.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.window).await;
        }

        let batch = self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(PendingBatch { kinds, sender, .. }) = batch else {
            return;
        };

        info!(
            kinds = kinds.len(),
            with_metadata = self.with_metadata,
            "Flushing schema batch"
        );
        let result = self
            .client
            .get_schemas(kinds.clone(), self.with_metadata)
            .await
            .map(|schemas| {
                let schemas: HashMap<String, Arc<KindSchemas>> = schemas
                    .into_iter()
                    .map(|(kind, schema)| (kind, Arc::new(schema)))
                    .collect();
                for (kind, schema) in &schemas {
                    self.cache.insert(kind.clone(), schema.clone());
                }
                Arc::new(schemas)
            });
        for kind in &kinds {
            self.in_flight.remove(kind);
        }
        if sender.send(result).is_err() {
            debug!("All waiters for the schema batch went away");
        }
    }
}

/// Coalescing, caching front end of a [`SchemaClient`].
#[derive(Clone)]
pub struct SchemaRetriever {
    types: Arc<BatchCache>,
    metas: Arc<BatchCache>,
}

impl SchemaRetriever {
    pub fn new(client: Arc<dyn SchemaClient>, batch_window: Duration) -> Self {
        Self {
            types: Arc::new(BatchCache::new(client.clone(), false, batch_window)),
            metas: Arc::new(BatchCache::new(client, true, batch_window)),
        }
    }

    /// All channels of `kind`, from the type cache.
    #[instrument(level = "debug", skip(self))]
    pub async fn get_kind(&self, kind: &str) -> SchemaResult<Arc<KindSchemas>> {
        self.types.get(kind).await
    }

    /// An owned copy of the parameter types of one channel.
    pub async fn get_schema(&self, kind: &str, section: Section, name: &str) -> SchemaResult<Vec<Type>> {
        let schemas = self.types.get(kind).await?;
        Ok(schemas.channel(kind, section, name)?.schema.clone())
    }

    /// An owned copy of the full metadata of one channel.
    pub async fn get_meta(&self, kind: &str, section: Section, name: &str) -> SchemaResult<ChannelMeta> {
        let schemas = self.metas.get(kind).await?;
        Ok(schemas.channel(kind, section, name)?.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;

    fn twitter() -> KindSchemas {
        let mut kind = KindSchemas::default();
        kind.triggers.insert(
            "source".to_string(),
            ChannelMeta::new(
                vec!["text".to_string(), "from".to_string()],
                vec![Type::String, Type::entity("tt:username")],
            ),
        );
        kind
    }

    fn answer(kinds: Vec<String>) -> SchemaResult<HashMap<String, KindSchemas>> {
        Ok(kinds
            .into_iter()
            .filter(|kind| kind == "com.twitter" || kind == "com.xkcd")
            .map(|kind| (kind, twitter()))
            .collect())
    }

    #[tokio::test]
    async fn test_concurrent_requests_share_one_call() {
        let mut client = MockSchemaClient::new();
        client
            .expect_get_schemas()
            .times(1)
            .returning(|kinds, _| answer(kinds));
        let retriever = SchemaRetriever::new(Arc::new(client), Duration::ZERO);

        let requests = (0..8).map(|_| retriever.get_schema("com.twitter", Section::Triggers, "source"));
        let results = join_all(requests).await;
        for result in results {
            assert_eq!(result.unwrap().len(), 2);
        }

        // now cached: no further client call
        let cached = retriever.get_kind("com.twitter").await.unwrap();
        assert!(cached.triggers.contains_key("source"));
    }

    #[tokio::test]
    async fn test_different_kinds_coalesce_into_one_batch() {
        let mut client = MockSchemaClient::new();
        client
            .expect_get_schemas()
            .times(1)
            .withf(|kinds, with_metadata| kinds.len() == 2 && !*with_metadata)
            .returning(|kinds, _| answer(kinds));
        let retriever = SchemaRetriever::new(Arc::new(client), Duration::from_millis(5));

        let (a, b) = tokio::join!(retriever.get_kind("com.twitter"), retriever.get_kind("com.xkcd"));
        assert!(a.is_ok());
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_kind_and_channel() {
        let mut client = MockSchemaClient::new();
        client.expect_get_schemas().returning(|kinds, _| answer(kinds));
        let retriever = SchemaRetriever::new(Arc::new(client), Duration::ZERO);

        assert_eq!(
            retriever.get_kind("com.nope").await.unwrap_err(),
            SchemaError::UnknownKind("com.nope".to_string())
        );
        assert!(matches!(
            retriever
                .get_schema("com.twitter", Section::Actions, "post")
                .await,
            Err(SchemaError::UnknownChannel { .. })
        ));
    }

    #[tokio::test]
    async fn test_client_errors_reach_every_waiter() {
        let mut client = MockSchemaClient::new();
        client
            .expect_get_schemas()
            .times(1)
            .returning(|_, _| Err(SchemaError::Client("offline".to_string())));
        let retriever = SchemaRetriever::new(Arc::new(client), Duration::ZERO);

        let (a, b) = tokio::join!(retriever.get_kind("com.twitter"), retriever.get_kind("com.twitter"));
        assert_eq!(a.unwrap_err(), SchemaError::Client("offline".to_string()));
        assert_eq!(b.unwrap_err(), SchemaError::Client("offline".to_string()));
    }

    #[tokio::test]
    async fn test_metadata_uses_its_own_cache() {
        let mut client = MockSchemaClient::new();
        client
            .expect_get_schemas()
            .times(2)
            .returning(|kinds, _| answer(kinds));
        let retriever = SchemaRetriever::new(Arc::new(client), Duration::ZERO);

        retriever
            .get_schema("com.twitter", Section::Triggers, "source")
            .await
            .unwrap();
        let meta = retriever
            .get_meta("com.twitter", Section::Triggers, "source")
            .await
            .unwrap();
        assert_eq!(meta.args, vec!["text".to_string(), "from".to_string()]);
    }

    #[tokio::test]
    async fn test_returned_schemas_are_copies() {
        let mut client = MockSchemaClient::new();
        client
            .expect_get_schemas()
            .times(1)
            .returning(|kinds, _| answer(kinds));
        let retriever = SchemaRetriever::new(Arc::new(client), Duration::ZERO);

        let mut schema = retriever
            .get_schema("com.twitter", Section::Triggers, "source")
            .await
            .unwrap();
        schema[1] = Type::Any;
        let again = retriever
            .get_schema("com.twitter", Section::Triggers, "source")
            .await
            .unwrap();
        assert_eq!(again[1], Type::entity("tt:username"));
    }
}
