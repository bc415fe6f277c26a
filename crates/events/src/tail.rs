//! Continuous log-tailing consumer.
//!
//! The tailer is the only producer for the local [`Dispatcher`]: it reads the
//! durable log after its checkpoint, dispatches each decoded message and then
//! records how far it got. A restarted process resumes from the saved offset,
//! so messages appended while it was down are still observed.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::checkpoint::OffsetStore;
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use crate::store::DurableLog;
use crate::types::LogOffset;

/// Tailer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TailConfig {
    /// Checkpoint key for this consumer.
    #[serde(default = "default_consumer")]
    pub consumer: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_consumer() -> String {
    "synapse".to_string()
}

const fn default_poll_interval_ms() -> u64 {
    100
}

const fn default_batch_size() -> usize {
    256
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            consumer: default_consumer(),
            poll_interval_ms: default_poll_interval_ms(),
            batch_size: default_batch_size(),
            retry: RetryPolicy::default(),
        }
    }
}

impl TailConfig {
    #[must_use]
    pub fn with_consumer(mut self, consumer: impl Into<String>) -> Self {
        self.consumer = consumer.into();
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the consumer name is empty or a size is zero.
    pub fn validate(&self) -> Result<()> {
        if self.consumer.trim().is_empty() {
            return Err(Error::invalid_config("tail consumer must not be empty"));
        }
        if self.poll_interval_ms == 0 || self.batch_size == 0 {
            return Err(Error::invalid_config(
                "poll_interval_ms and batch_size must be > 0",
            ));
        }
        Ok(())
    }

    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Copy)]
enum Cursor {
    Unloaded,
    At(Option<LogOffset>),
}

/// Reads the durable log and feeds the dispatcher.
pub struct LogTailer {
    log: Arc<dyn DurableLog>,
    offsets: Arc<dyn OffsetStore>,
    dispatcher: Arc<Dispatcher>,
    config: TailConfig,
    cursor: Mutex<Cursor>,
}

impl LogTailer {
    pub fn new(
        log: Arc<dyn DurableLog>,
        offsets: Arc<dyn OffsetStore>,
        dispatcher: Arc<Dispatcher>,
        config: TailConfig,
    ) -> Self {
        Self {
            log,
            offsets,
            dispatcher,
            config,
            cursor: Mutex::new(Cursor::Unloaded),
        }
    }

    pub const fn config(&self) -> &TailConfig {
        &self.config
    }

    /// Last offset this tailer has processed, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the checkpoint cannot be loaded.
    pub async fn position(&self) -> Result<Option<LogOffset>> {
        let mut cursor = self.cursor.lock().await;
        self.resolve(&mut cursor).await
    }

    async fn resolve(&self, cursor: &mut Cursor) -> Result<Option<LogOffset>> {
        if let Cursor::At(position) = *cursor {
            return Ok(position);
        }
        let consumer = self.config.consumer.as_str();
        let loaded = self
            .config
            .retry
            .run("load offset", || self.offsets.load(consumer))
            .await?;
        info!(consumer, offset = ?loaded, "Tailer resuming");
        *cursor = Cursor::At(loaded);
        Ok(loaded)
    }

    /// Dispatch everything after the checkpoint, batch by batch.
    ///
    /// Malformed entries are logged and skipped; the checkpoint still moves
    /// past them. Returns the number of messages dispatched.
    ///
    /// # Errors
    ///
    /// Returns an error if reading the log or saving the checkpoint fails
    /// after retries. Progress made before the failure is kept.
    pub async fn catch_up(&self) -> Result<usize> {
        let mut cursor = self.cursor.lock().await;
        let mut position = self.resolve(&mut cursor).await?;
        let consumer = self.config.consumer.as_str();
        let mut dispatched = 0;

        loop {
            let batch = self
                .config
                .retry
                .run("read log", || self.log.read_after(position, self.config.batch_size))
                .await?;
            let Some(last) = batch.last().map(|entry| entry.offset) else {
                break;
            };

            if let Some(first) = batch.first() {
                let expected = position.map_or(LogOffset::FIRST, LogOffset::next);
                if position.is_some() && first.offset > expected {
                    warn!(
                        consumer,
                        expected = %expected,
                        found = %first.offset,
                        "Entries trimmed by retention before they were read"
                    );
                }
            }

            for entry in &batch {
                match entry.decode() {
                    Ok(message) => {
                        if self.dispatcher.dispatch(message).await {
                            dispatched += 1;
                        }
                    }
                    Err(e) => {
                        warn!(offset = %entry.offset, error = %e, "Skipping malformed log entry");
                    }
                }
            }

            self.config
                .retry
                .run("save offset", || self.offsets.save(consumer, last))
                .await?;
            position = Some(last);
            *cursor = Cursor::At(position);

            if batch.len() < self.config.batch_size {
                break;
            }
        }

        if dispatched > 0 {
            debug!(consumer, dispatched, offset = ?position, "Tailer caught up");
        }
        Ok(dispatched)
    }

    /// Re-dispatch every entry after `after`, leaving the checkpoint alone.
    ///
    /// Messages the dispatcher has already seen are not delivered again.
    ///
    /// # Errors
    ///
    /// Returns an error if reading the log fails.
    pub async fn replay(&self, after: Option<LogOffset>) -> Result<usize> {
        let mut position = after;
        let mut dispatched = 0;
        loop {
            let batch = self.log.read_after(position, self.config.batch_size).await?;
            let Some(last) = batch.last().map(|entry| entry.offset) else {
                break;
            };
            for entry in &batch {
                match entry.decode() {
                    Ok(message) => {
                        if self.dispatcher.dispatch(message).await {
                            dispatched += 1;
                        }
                    }
                    Err(e) => warn!(offset = %entry.offset, error = %e, "Skipping malformed log entry"),
                }
            }
            position = Some(last);
            if batch.len() < self.config.batch_size {
                break;
            }
        }
        info!(after = ?after, dispatched, "Replay complete");
        Ok(dispatched)
    }

    /// Poll the log until `shutdown` flips to `true`.
    ///
    /// Errors are logged and retried with backoff; the loop only exits on
    /// shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut failures: u32 = 0;
        loop {
            match self.catch_up().await {
                Ok(_) => failures = 0,
                Err(e) => {
                    failures = failures.saturating_add(1);
                    error!(consumer = %self.config.consumer, failures, error = %e, "Tailer pass failed");
                }
            }

            let delay = if failures == 0 {
                self.config.poll_interval()
            } else {
                self.config
                    .poll_interval()
                    .max(self.config.retry.backoff(failures - 1))
            };

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!(consumer = %self.config.consumer, "Tailer stopping");
                        break;
                    }
                }
            }
        }
    }

    /// Spawn [`LogTailer::run`] on the runtime.
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }
}
