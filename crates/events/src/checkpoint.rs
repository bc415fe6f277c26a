//! Consumer offset checkpoints.
//!
//! A consumer records the offset of the last entry it fully processed. On
//! restart it resumes strictly after that offset, or from the beginning of the
//! retained log when nothing was saved.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::Result;
use crate::types::LogOffset;

/// Storage for per-consumer log offsets.
#[async_trait]
pub trait OffsetStore: Send + Sync {
    /// Load the last processed offset for `consumer`.
    async fn load(&self, consumer: &str) -> Result<Option<LogOffset>>;

    /// Record `offset` as processed for `consumer`.
    async fn save(&self, consumer: &str, offset: LogOffset) -> Result<()>;
}

/// In-memory offset store.
#[derive(Debug, Default)]
pub struct InMemoryOffsetStore {
    offsets: RwLock<HashMap<String, LogOffset>>,
}

impl InMemoryOffsetStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OffsetStore for InMemoryOffsetStore {
    async fn load(&self, consumer: &str) -> Result<Option<LogOffset>> {
        Ok(self.offsets.read().await.get(consumer).copied())
    }

    async fn save(&self, consumer: &str, offset: LogOffset) -> Result<()> {
        let mut offsets = self.offsets.write().await;
        let entry = offsets.entry(consumer.to_string()).or_insert(offset);
        // Checkpoints never move backwards.
        if offset > *entry {
            *entry = offset;
        }
        Ok(())
    }
}
