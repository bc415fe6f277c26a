//! SurrealDB-backed durable log and offset store.
//!
//! Works with any engine the `surrealdb` crate can reach through a URL:
//! `mem://` for embedded use and `rocksdb://<path>` for on-disk durability.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use surrealdb::Surreal;
use surrealdb::engine::any::Any;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::checkpoint::OffsetStore;
use crate::error::{ConnectionError, Error, Result};
use crate::message::NeuralMessage;
use crate::store::{DurableLog, LogEntry};
use crate::types::LogOffset;

const OFFSET_TABLE: &str = "log_offset";

/// Configuration for the durable log store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogStoreConfig {
    /// Connection URL (e.g., "mem://", "rocksdb:///var/lib/synapse")
    #[serde(default = "default_url")]
    pub url: String,
    /// Namespace to use
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Database to use
    #[serde(default = "default_database")]
    pub database: String,
    /// Stream (table) name
    #[serde(default = "default_stream")]
    pub stream: String,
    /// Retention bound; oldest entries beyond it are trimmed on append
    #[serde(default)]
    pub max_entries: Option<usize>,
}

fn default_url() -> String {
    "mem://".to_string()
}

fn default_namespace() -> String {
    "synapse".to_string()
}

fn default_database() -> String {
    "bus".to_string()
}

fn default_stream() -> String {
    "neural_messages".to_string()
}

impl LogStoreConfig {
    /// Create an in-memory configuration for testing.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            url: default_url(),
            namespace: default_namespace(),
            database: "test".to_string(),
            stream: default_stream(),
            max_entries: None,
        }
    }

    /// Create an on-disk RocksDB configuration.
    #[must_use]
    pub fn rocksdb(path: impl AsRef<std::path::Path>) -> Self {
        Self {
            url: format!("rocksdb://{}", path.as_ref().display()),
            database: default_database(),
            ..Self::in_memory()
        }
    }

    /// Set the stream name.
    #[must_use]
    pub fn with_stream(mut self, stream: impl Into<String>) -> Self {
        self.stream = stream.into();
        self
    }

    /// Set the retention bound.
    #[must_use]
    pub const fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries);
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is empty, the stream name is not a plain
    /// identifier, or the retention bound is zero.
    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(ConnectionError::InvalidUrl(self.url.clone()).into());
        }
        if !is_identifier(&self.stream) || self.stream == OFFSET_TABLE {
            return Err(ConnectionError::InvalidStreamName(self.stream.clone()).into());
        }
        if self.max_entries == Some(0) {
            return Err(Error::invalid_config("max_entries must be at least 1"));
        }
        Ok(())
    }
}

impl Default for LogStoreConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
            ..Self::in_memory()
        }
    }
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit())
}

/// Open a SurrealDB connection for the given configuration.
///
/// # Errors
///
/// Returns `Error::Connection` if the configuration is invalid or the
/// database cannot be reached.
pub async fn connect(config: &LogStoreConfig) -> Result<Arc<Surreal<Any>>> {
    config.validate()?;
    info!(url = %config.url, namespace = %config.namespace, database = %config.database, "Connecting to log store");

    let db = Surreal::<Any>::init();
    db.connect(config.url.as_str()).await.map_err(|e| {
        Error::connection(ConnectionError::InitializationFailed {
            reason: e.to_string(),
        })
    })?;
    db.use_ns(config.namespace.as_str())
        .use_db(config.database.as_str())
        .await
        .map_err(|e| {
            Error::connection(ConnectionError::InitializationFailed {
                reason: format!("failed to select namespace/database: {e}"),
            })
        })?;

    Ok(Arc::new(db))
}

#[derive(Debug, Deserialize)]
struct OffsetRow {
    offset: LogOffset,
}

#[derive(Debug, Deserialize)]
struct CountRow {
    count: usize,
}

#[derive(Debug, Serialize)]
struct NewEntry {
    offset: LogOffset,
    message: String,
}

/// Durable log stored as one SurrealDB table per stream.
pub struct SurrealLog {
    db: Arc<Surreal<Any>>,
    stream: String,
    max_entries: Option<usize>,
    /// Next offset to assign; holding the lock makes the caller the sole writer.
    writer: Mutex<LogOffset>,
}

impl SurrealLog {
    /// Open the log on an existing connection, creating its schema if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or schema setup fails.
    pub async fn open(db: Arc<Surreal<Any>>, config: &LogStoreConfig) -> Result<Self> {
        config.validate()?;
        let schema = format!(
            "DEFINE TABLE IF NOT EXISTS {table} SCHEMALESS;\
             DEFINE INDEX IF NOT EXISTS {table}_offset ON TABLE {table} FIELDS offset UNIQUE;",
            table = config.stream
        );
        db.query(schema).await?.check()?;

        let last = Self::query_last_offset(&db, &config.stream).await?;
        let next = last.map_or(LogOffset::FIRST, LogOffset::next);
        debug!(stream = %config.stream, next = %next, "Durable log opened");

        Ok(Self {
            db,
            stream: config.stream.clone(),
            max_entries: config.max_entries,
            writer: Mutex::new(next),
        })
    }

    /// Connect and open in one step.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection or schema setup fails.
    pub async fn connect(config: &LogStoreConfig) -> Result<Self> {
        let db = connect(config).await?;
        Self::open(db, config).await
    }

    /// Get the underlying database client.
    pub fn db(&self) -> &Arc<Surreal<Any>> {
        &self.db
    }

    async fn query_last_offset(db: &Surreal<Any>, table: &str) -> Result<Option<LogOffset>> {
        let rows: Vec<OffsetRow> = db
            .query("SELECT offset FROM type::table($table) ORDER BY offset DESC LIMIT 1")
            .bind(("table", table.to_string()))
            .await?
            .take(0)?;
        Ok(rows.first().map(|row| row.offset))
    }
}

#[async_trait]
impl DurableLog for SurrealLog {
    fn stream(&self) -> &str {
        &self.stream
    }

    async fn append(&self, message: &NeuralMessage) -> Result<LogOffset> {
        let encoded = message.to_json()?;
        let mut next = self.writer.lock().await;
        let offset = *next;

        self.db
            .query("CREATE type::table($table) CONTENT $entry RETURN NONE")
            .bind(("table", self.stream.clone()))
            .bind((
                "entry",
                NewEntry {
                    offset,
                    message: encoded,
                },
            ))
            .await
            .map_err(|e| Error::store_failed("append", e.to_string()))?
            .check()
            .map_err(|e| Error::store_failed("append", e.to_string()))?;
        *next = offset.next();

        if let Some(max) = self.max_entries {
            let retained = u64::try_from(max).unwrap_or(u64::MAX);
            let cutoff = offset.value().saturating_sub(retained);
            if cutoff > 0 {
                self.db
                    .query("DELETE type::table($table) WHERE offset <= $cutoff")
                    .bind(("table", self.stream.clone()))
                    .bind(("cutoff", cutoff))
                    .await
                    .map_err(|e| Error::store_failed("trim", e.to_string()))?
                    .check()
                    .map_err(|e| Error::store_failed("trim", e.to_string()))?;
            }
        }

        Ok(offset)
    }

    async fn read_after(&self, after: Option<LogOffset>, limit: usize) -> Result<Vec<LogEntry>> {
        let after = after.map_or(0, LogOffset::value);
        let entries: Vec<LogEntry> = self
            .db
            .query(
                "SELECT offset, message FROM type::table($table) \
                 WHERE offset > $after ORDER BY offset ASC LIMIT $limit",
            )
            .bind(("table", self.stream.clone()))
            .bind(("after", after))
            .bind(("limit", limit))
            .await
            .map_err(|e| Error::store_failed("read", e.to_string()))?
            .take(0)
            .map_err(|e| Error::store_failed("read", e.to_string()))?;
        Ok(entries)
    }

    async fn last_offset(&self) -> Result<Option<LogOffset>> {
        Self::query_last_offset(&self.db, &self.stream).await
    }

    async fn len(&self) -> Result<usize> {
        let rows: Vec<CountRow> = self
            .db
            .query("SELECT count() AS count FROM type::table($table) GROUP ALL")
            .bind(("table", self.stream.clone()))
            .await?
            .take(0)?;
        Ok(rows.first().map_or(0, |row| row.count))
    }
}

/// Consumer offsets stored in SurrealDB, one record per consumer.
#[derive(Clone)]
pub struct SurrealOffsetStore {
    db: Arc<Surreal<Any>>,
}

impl SurrealOffsetStore {
    pub const fn new(db: Arc<Surreal<Any>>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl OffsetStore for SurrealOffsetStore {
    async fn load(&self, consumer: &str) -> Result<Option<LogOffset>> {
        let rows: Vec<OffsetRow> = self
            .db
            .query("SELECT offset FROM type::thing($table, $consumer)")
            .bind(("table", OFFSET_TABLE))
            .bind(("consumer", consumer.to_string()))
            .await
            .map_err(|e| Error::store_failed("load offset", e.to_string()))?
            .take(0)
            .map_err(|e| Error::store_failed("load offset", e.to_string()))?;
        Ok(rows.first().map(|row| row.offset))
    }

    async fn save(&self, consumer: &str, offset: LogOffset) -> Result<()> {
        if self
            .load(consumer)
            .await?
            .is_some_and(|stored| stored >= offset)
        {
            return Ok(());
        }
        self.db
            .query("UPSERT type::thing($table, $consumer) SET offset = $offset RETURN NONE")
            .bind(("table", OFFSET_TABLE))
            .bind(("consumer", consumer.to_string()))
            .bind(("offset", offset))
            .await
            .map_err(|e| Error::store_failed("save offset", e.to_string()))?
            .check()
            .map_err(|e| Error::store_failed("save offset", e.to_string()))?;
        Ok(())
    }
}
