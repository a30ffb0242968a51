use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use super::{KindSchemas, SchemaClient, SchemaError, SchemaResult};

/// Serves schemas from a JSON snapshot of the form
/// `{ "<kind>": { "triggers": {..}, "queries": {..}, "actions": {..} } }`.
#[derive(Debug, Clone, Default)]
pub struct FileSchemaClient {
    kinds: HashMap<String, KindSchemas>,
}

impl FileSchemaClient {
    pub fn new(kinds: HashMap<String, KindSchemas>) -> Self {
        Self { kinds }
    }

    pub fn from_json(s: &str) -> SchemaResult<Self> {
        let kinds = serde_json::from_str(s)
            .map_err(|e| SchemaError::Client(format!("Failed to parse schema snapshot: {}", e)))?;
        Ok(Self { kinds })
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> SchemaResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| SchemaError::Client(format!("Failed to read schema snapshot: {}", e)))?;
        Self::from_json(&content)
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.kinds.keys().map(String::as_str)
    }
}

#[async_trait]
impl SchemaClient for FileSchemaClient {
    async fn get_schemas(
        &self,
        kinds: Vec<String>,
        with_metadata: bool,
    ) -> SchemaResult<HashMap<String, KindSchemas>> {
        debug!(?kinds, with_metadata, "Serving schemas from snapshot");
        Ok(kinds
            .into_iter()
            .filter_map(|kind| {
                let schemas = self.kinds.get(&kind)?.clone();
                Some((kind, schemas))
            })
            .collect())
    }
}
