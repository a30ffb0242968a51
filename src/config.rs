use serde::{Deserialize, Serialize};
use std::{fs::File, io::BufReader, path::Path, time::Duration};

use chrono::{FixedOffset, Offset, Utc};

use crate::{Error, InternalResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompilerConfig {
    /// How long the schema store waits to coalesce requests into one batch.
    /// Zero flushes on the next scheduler turn.
    #[serde(default = "default_schema_batch_window", with = "duration_ms")]
    pub schema_batch_window: Duration,

    #[serde(default = "default_locale")]
    pub locale: String,

    #[serde(default)]
    pub timezone_offset_minutes: i32,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            schema_batch_window: default_schema_batch_window(),
            locale: default_locale(),
            timezone_offset_minutes: 0,
            log_level: default_log_level(),
        }
    }
}

impl CompilerConfig {
    pub fn timezone(&self) -> FixedOffset {
        // out of range offsets fall back to UTC
        FixedOffset::east_opt(self.timezone_offset_minutes * 60).unwrap_or_else(|| Utc.fix())
    }
}

pub fn from_file<T: for<'de> Deserialize<'de>, P: AsRef<Path>>(path: P) -> InternalResult<T> {
    let file = File::open(path)
        .map_err(|e| Error::Internal(format!("Failed to open config file: {}", e)))?;
    let reader = BufReader::new(file);
    let config = serde_json::from_reader(reader)
        .map_err(|e| Error::Internal(format!("Failed to parse config file: {}", e)))?;
    Ok(config)
}

pub fn from_str<T: for<'de> Deserialize<'de>>(s: &str) -> InternalResult<T> {
    let config = serde_json::from_str(s)
        .map_err(|e| Error::Internal(format!("Failed to parse config: {}", e)))?;
    Ok(config)
}

fn default_schema_batch_window() -> Duration {
    Duration::from_millis(0)
}

fn default_locale() -> String {
    "en-US".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
