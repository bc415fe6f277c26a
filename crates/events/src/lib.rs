//! Node registry and durable message bus for Synapse.
//!
//! - **Registry**: every participant with heartbeat-based liveness
//! - **Durable log**: append-only, offset-addressed storage of every message
//! - **Bus**: append first, then live fan-out to socket connections
//! - **Tailer**: reads the log from a checkpoint and feeds local observers
//! - **Gateway**: axum WebSocket endpoint for remote nodes
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use synapse_events::{
//!     BusConfig, Dispatcher, InMemoryLog, InMemoryOffsetStore, LogTailer, MessageBus,
//!     NodeRegistry, RegistryConfig, TailConfig,
//! };
//!
//! let config = BusConfig::default();
//! let log = InMemoryLog::new_arc("bus");
//! let dispatcher = Arc::new(config.dispatcher());
//! let registry = Arc::new(NodeRegistry::new(RegistryConfig::default()));
//! let bus = MessageBus::new(config, log.clone(), registry, dispatcher.clone());
//! let tailer = LogTailer::new(log, Arc::new(InMemoryOffsetStore::new()), dispatcher, TailConfig::default());
//! ```

pub mod bus;
pub mod checkpoint;
pub mod db;
pub mod dispatcher;
pub mod error;
pub mod message;
pub mod registry;
pub mod retry;
pub mod socket;
pub mod store;
pub mod tail;
pub mod types;

pub use bus::{BusConfig, Connection, Delivery, MessageBus, spawn_registry_sync};
pub use checkpoint::{InMemoryOffsetStore, OffsetStore};
pub use db::{LogStoreConfig, SurrealLog, SurrealOffsetStore};
pub use dispatcher::{CircuitBreaker, Dispatcher, DispatcherBuilder, Subscription, TopicPattern};
pub use error::{ConnectionError, Error, Result};
pub use message::{
    AgentRetired, AgentRetiring, AgentSpawned, AgentUnhealthy, HealthCheck, HealthReport,
    NeuralMessage, Payload, ServiceRegistration, TaskCompleted, TaskStarted, TaskSubmitted, Topic,
};
pub use registry::{NodeRegistration, NodeRegistry, RegistryConfig, ServiceNode, spawn_sweeper};
pub use retry::{RetryPolicy, calculate_backoff};
pub use store::{DurableLog, InMemoryLog, LogEntry, TracingLog};
pub use tail::{LogTailer, TailConfig};
pub use types::{LogOffset, MessageId, NodeId, NodeKind, NodeMetadata, NodeStatus, Priority};
