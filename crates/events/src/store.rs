//! Durable log trait and implementations.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::Result;
use crate::message::NeuralMessage;
use crate::types::LogOffset;

/// One stored entry: the offset and the JSON-encoded message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub offset: LogOffset,
    pub message: String,
}

impl LogEntry {
    /// Decode the stored message.
    ///
    /// # Errors
    ///
    /// Returns `Error::Protocol` if the stored text is not a valid message.
    pub fn decode(&self) -> Result<NeuralMessage> {
        NeuralMessage::from_json(&self.message)
    }
}

/// Append-only, offset-addressed message log.
#[async_trait]
pub trait DurableLog: Send + Sync {
    /// Name of the stream this log writes to.
    fn stream(&self) -> &str;

    /// Append a message, returning its offset.
    async fn append(&self, message: &NeuralMessage) -> Result<LogOffset>;

    /// Read up to `limit` entries strictly after `after` (from the start if `None`).
    async fn read_after(&self, after: Option<LogOffset>, limit: usize) -> Result<Vec<LogEntry>>;

    /// Offset of the newest entry.
    async fn last_offset(&self) -> Result<Option<LogOffset>>;

    /// Number of retained entries.
    async fn len(&self) -> Result<usize>;

    /// Whether the log has no retained entries.
    async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

#[derive(Debug)]
struct InMemoryInner {
    entries: VecDeque<LogEntry>,
    next: LogOffset,
}

/// In-memory durable log for tests and embedded use.
#[derive(Debug)]
pub struct InMemoryLog {
    stream: String,
    max_entries: Option<usize>,
    inner: Mutex<InMemoryInner>,
}

impl InMemoryLog {
    /// Create an unbounded in-memory log.
    pub fn new(stream: impl Into<String>) -> Self {
        Self {
            stream: stream.into(),
            max_entries: None,
            inner: Mutex::new(InMemoryInner {
                entries: VecDeque::new(),
                next: LogOffset::FIRST,
            }),
        }
    }

    /// Keep at most `max_entries`, trimming the oldest on append.
    #[must_use]
    pub fn with_retention(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries.max(1));
        self
    }

    /// Create a new in-memory log wrapped in an Arc.
    pub fn new_arc(stream: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::new(stream))
    }
}

#[async_trait]
impl DurableLog for InMemoryLog {
    fn stream(&self) -> &str {
        &self.stream
    }

    async fn append(&self, message: &NeuralMessage) -> Result<LogOffset> {
        let encoded = message.to_json()?;
        let mut inner = self.inner.lock().await;
        let offset = inner.next;
        inner.next = offset.next();
        inner.entries.push_back(LogEntry {
            offset,
            message: encoded,
        });
        if let Some(max) = self.max_entries {
            while inner.entries.len() > max {
                inner.entries.pop_front();
            }
        }
        Ok(offset)
    }

    async fn read_after(&self, after: Option<LogOffset>, limit: usize) -> Result<Vec<LogEntry>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .entries
            .iter()
            .filter(|entry| after.is_none_or(|after| entry.offset > after))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn last_offset(&self) -> Result<Option<LogOffset>> {
        let inner = self.inner.lock().await;
        Ok(inner.entries.back().map(|entry| entry.offset))
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.inner.lock().await.entries.len())
    }
}

/// A wrapper that adds tracing to a durable log.
pub struct TracingLog<L: DurableLog> {
    inner: L,
}

impl<L: DurableLog> TracingLog<L> {
    /// Create a new tracing log.
    pub const fn new(inner: L) -> Self {
        Self { inner }
    }

    /// Get the wrapped log.
    pub const fn inner(&self) -> &L {
        &self.inner
    }
}

#[async_trait]
impl<L: DurableLog> DurableLog for TracingLog<L> {
    fn stream(&self) -> &str {
        self.inner.stream()
    }

    async fn append(&self, message: &NeuralMessage) -> Result<LogOffset> {
        tracing::debug!(
            stream = self.inner.stream(),
            message_id = %message.id(),
            event = %message.event(),
            source = %message.source(),
            "Appending message"
        );
        let result = self.inner.append(message).await;
        match &result {
            Ok(offset) => tracing::trace!(offset = %offset, "Message appended"),
            Err(e) => tracing::debug!(error = %e, "Append failed"),
        }
        result
    }

    async fn read_after(&self, after: Option<LogOffset>, limit: usize) -> Result<Vec<LogEntry>> {
        tracing::trace!(after = ?after, limit, "Reading log");
        self.inner.read_after(after, limit).await
    }

    async fn last_offset(&self) -> Result<Option<LogOffset>> {
        self.inner.last_offset().await
    }

    async fn len(&self) -> Result<usize> {
        self.inner.len().await
    }
}
