//! Local fan-out of log messages to in-process observers.
//!
//! The dispatcher is fed by the log tailer only. It drops message ids it has
//! already dispatched within a bounded window, so a segment replayed during
//! recovery reaches each observer once.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use moka::sync::Cache;
use tokio::sync::{RwLock, broadcast};
use tracing::debug;

use crate::error::{Error, Result};
use crate::message::{NeuralMessage, Topic};
use crate::types::{MessageId, NodeId};

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;
const DEFAULT_PATTERN_CAPACITY: usize = 256;
const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
const DEFAULT_DEDUP_WINDOW: u64 = 10_000;

/// Circuit breaker to prevent cascading failures.
pub struct CircuitBreaker {
    failure_count: AtomicU32,
    threshold: u32,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given failure threshold.
    pub const fn new(threshold: u32) -> Self {
        Self {
            failure_count: AtomicU32::new(0),
            threshold,
        }
    }

    /// Check if a request should be allowed.
    pub fn allow_request(&self) -> bool {
        self.failure_count.load(Ordering::Relaxed) < self.threshold
    }

    /// Record a successful request.
    pub fn record_success(&self) {
        self.failure_count.store(0, Ordering::Relaxed);
    }

    /// Record a failed request.
    pub fn record_failure(&self) {
        self.failure_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current failure count.
    pub fn failure_count(&self) -> u32 {
        self.failure_count.load(Ordering::Relaxed)
    }
}

/// Filter for pattern subscriptions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicPattern {
    /// Match every message.
    All,
    /// Match one topic.
    ByTopic(Topic),
    /// Match any of several topics.
    ByTopics(Vec<Topic>),
    /// Match messages from one node.
    BySource(NodeId),
    /// Match messages addressed to one node, plus broadcasts.
    ForTarget(NodeId),
}

impl TopicPattern {
    /// Check if a message matches this pattern.
    pub fn matches(&self, message: &NeuralMessage) -> bool {
        match self {
            Self::All => true,
            Self::ByTopic(topic) => message.event() == *topic,
            Self::ByTopics(topics) => topics.contains(&message.event()),
            Self::BySource(source) => message.source() == source,
            Self::ForTarget(node) => message.target().is_none_or(|target| target == node),
        }
    }
}

struct Subscriber {
    sender: broadcast::Sender<NeuralMessage>,
    pattern: TopicPattern,
    breaker: Arc<CircuitBreaker>,
}

/// Subscription handle for receiving messages.
pub struct Subscription {
    receiver: broadcast::Receiver<NeuralMessage>,
}

impl Subscription {
    /// Receive the next message.
    ///
    /// # Errors
    ///
    /// Returns `Error::Lagged` if the subscriber fell behind (it can keep
    /// receiving afterwards), or `Error::ChannelClosed` once the dispatcher
    /// is gone.
    pub async fn recv(&mut self) -> Result<NeuralMessage> {
        self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Lagged(skipped) => Error::Lagged { skipped },
            broadcast::error::RecvError::Closed => Error::ChannelClosed,
        })
    }

    /// Try to receive a message without waiting.
    ///
    /// # Errors
    ///
    /// Same as [`Subscription::recv`]; an empty channel is `Ok(None)`.
    pub fn try_recv(&mut self) -> Result<Option<NeuralMessage>> {
        match self.receiver.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => Err(Error::Lagged { skipped }),
            Err(broadcast::error::TryRecvError::Closed) => Err(Error::ChannelClosed),
        }
    }
}

/// In-process fan-out for messages read from the durable log.
pub struct Dispatcher {
    broadcast: broadcast::Sender<NeuralMessage>,
    subscribers: RwLock<HashMap<String, Subscriber>>,
    next_id: AtomicU64,
    pattern_capacity: usize,
    failure_threshold: u32,
    seen: Cache<MessageId, ()>,
}

impl Dispatcher {
    /// Create a dispatcher with default capacities.
    pub fn new() -> Self {
        DispatcherBuilder::new().build()
    }

    /// Start building a dispatcher.
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    /// Fan a message out to every matching subscriber.
    ///
    /// Returns `false` if the message id was already dispatched inside the
    /// de-duplication window.
    pub async fn dispatch(&self, message: NeuralMessage) -> bool {
        if !self.seen.entry(message.id()).or_insert(()).is_fresh() {
            debug!(message_id = %message.id(), "Skipping duplicate message");
            return false;
        }

        debug!(
            message_id = %message.id(),
            event = %message.event(),
            source = %message.source(),
            "Dispatching message"
        );

        let _ = self.broadcast.send(message.clone());

        let mut tripped = Vec::new();
        {
            let subscribers = self.subscribers.read().await;
            for (id, sub) in subscribers
                .iter()
                .filter(|(_, sub)| sub.pattern.matches(&message))
            {
                if !sub.breaker.allow_request() {
                    tripped.push(id.clone());
                    continue;
                }
                match sub.sender.send(message.clone()) {
                    Ok(_) => sub.breaker.record_success(),
                    Err(broadcast::error::SendError(_)) => {
                        sub.breaker.record_failure();
                        debug!(
                            subscriber = %id,
                            failures = sub.breaker.failure_count(),
                            "Failed to deliver message to subscriber"
                        );
                    }
                }
            }
        }

        if !tripped.is_empty() {
            let mut subscribers = self.subscribers.write().await;
            for id in tripped {
                debug!(subscriber = %id, "Removing subscriber with open circuit");
                subscribers.remove(&id);
            }
        }

        true
    }

    /// Subscribe to all messages.
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.broadcast.subscribe(),
        }
    }

    /// Subscribe to messages matching a pattern.
    pub async fn subscribe_with_pattern(&self, pattern: TopicPattern) -> (String, Subscription) {
        let (sender, receiver) = broadcast::channel(self.pattern_capacity);
        let id = format!("sub_{}", self.next_id.fetch_add(1, Ordering::Relaxed));

        self.subscribers.write().await.insert(
            id.clone(),
            Subscriber {
                sender,
                pattern,
                breaker: Arc::new(CircuitBreaker::new(self.failure_threshold)),
            },
        );

        (id, Subscription { receiver })
    }

    /// Unsubscribe a pattern-based subscriber.
    pub async fn unsubscribe(&self, subscriber_id: &str) -> bool {
        self.subscribers.write().await.remove(subscriber_id).is_some()
    }

    /// Number of pattern subscribers.
    pub async fn pattern_subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Whether a message id was already dispatched.
    pub fn has_seen(&self, id: MessageId) -> bool {
        self.seen.contains_key(&id)
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for [`Dispatcher`].
pub struct DispatcherBuilder {
    channel_capacity: usize,
    pattern_capacity: usize,
    failure_threshold: u32,
    dedup_window: u64,
}

impl DispatcherBuilder {
    /// Create a new builder.
    pub const fn new() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            pattern_capacity: DEFAULT_PATTERN_CAPACITY,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            dedup_window: DEFAULT_DEDUP_WINDOW,
        }
    }

    /// Set the capacity of the all-messages channel.
    #[must_use]
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }

    /// Set the capacity of each pattern subscriber channel.
    #[must_use]
    pub fn with_pattern_capacity(mut self, capacity: usize) -> Self {
        self.pattern_capacity = capacity.max(1);
        self
    }

    /// Set the circuit breaker failure threshold.
    #[must_use]
    pub const fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Set how many message ids are remembered for de-duplication.
    #[must_use]
    pub const fn with_dedup_window(mut self, window: u64) -> Self {
        self.dedup_window = window;
        self
    }

    /// Build the dispatcher.
    pub fn build(self) -> Dispatcher {
        let (broadcast, _) = broadcast::channel(self.channel_capacity);
        Dispatcher {
            broadcast,
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            pattern_capacity: self.pattern_capacity,
            failure_threshold: self.failure_threshold,
            seen: Cache::new(self.dedup_window),
        }
    }
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}
