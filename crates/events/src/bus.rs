//! Message bus: durable append plus live fan-out to socket connections.
//!
//! Every published message is appended to the durable log first and only
//! then pushed to live connections, so nothing is ever delivered live that a
//! consumer replaying the log would not also see. Local observers are not fed
//! here; they hear about messages through the log tailer.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::dispatcher::{Dispatcher, DispatcherBuilder};
use crate::error::{Error, Result};
use crate::message::{HealthCheck, NeuralMessage, Payload};
use crate::registry::{NodeRegistration, NodeRegistry, ServiceNode};
use crate::retry::RetryPolicy;
use crate::store::DurableLog;
use crate::types::{LogOffset, NodeId, NodeKind, NodeStatus};

/// Bus configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Node id of this process on the bus.
    #[serde(default = "default_node_id")]
    pub node_id: NodeId,
    /// Retry policy for log appends.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Outbound queue size per connection.
    #[serde(default = "default_connection_buffer")]
    pub connection_buffer: usize,
    /// How many message ids the local dispatcher remembers.
    #[serde(default = "default_dedup_window")]
    pub dedup_window: u64,
}

fn default_node_id() -> NodeId {
    NodeId::new("synapse")
}

const fn default_connection_buffer() -> usize {
    256
}

const fn default_dedup_window() -> u64 {
    10_000
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            retry: RetryPolicy::default(),
            connection_buffer: default_connection_buffer(),
            dedup_window: default_dedup_window(),
        }
    }
}

impl BusConfig {
    #[must_use]
    pub fn with_node_id(mut self, node_id: impl Into<NodeId>) -> Self {
        self.node_id = node_id.into();
        self
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the node id is empty or a size is zero.
    pub fn validate(&self) -> Result<()> {
        if self.node_id.as_str().trim().is_empty() {
            return Err(Error::invalid_config("bus node_id must not be empty"));
        }
        if self.connection_buffer == 0 {
            return Err(Error::invalid_config("connection_buffer must be > 0"));
        }
        if self.dedup_window == 0 {
            return Err(Error::invalid_config("dedup_window must be > 0"));
        }
        Ok(())
    }

    /// A dispatcher sized for this configuration.
    pub fn dispatcher(&self) -> Dispatcher {
        DispatcherBuilder::new()
            .with_dedup_window(self.dedup_window)
            .build()
    }
}

/// A live connection handed to the transport.
pub struct Connection {
    node_id: NodeId,
    generation: u64,
    receiver: mpsc::Receiver<NeuralMessage>,
}

impl Connection {
    pub const fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Next message to push to the peer; `None` once the bus dropped the connection.
    pub async fn recv(&mut self) -> Option<NeuralMessage> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<NeuralMessage> {
        self.receiver.try_recv().ok()
    }
}

struct ConnectionSlot {
    generation: u64,
    sender: mpsc::Sender<NeuralMessage>,
}

/// Outcome of one live fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub dropped: usize,
}

/// Durable, multi-consumer message bus.
pub struct MessageBus {
    config: BusConfig,
    log: Arc<dyn DurableLog>,
    registry: Arc<NodeRegistry>,
    dispatcher: Arc<Dispatcher>,
    connections: RwLock<HashMap<NodeId, ConnectionSlot>>,
    next_generation: AtomicU64,
    /// Serializes append + fan-out so live order matches log order.
    publish_lock: Mutex<()>,
}

impl MessageBus {
    pub fn new(
        config: BusConfig,
        log: Arc<dyn DurableLog>,
        registry: Arc<NodeRegistry>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        Self {
            config,
            log,
            registry,
            dispatcher,
            connections: RwLock::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
            publish_lock: Mutex::new(()),
        }
    }

    pub const fn config(&self) -> &BusConfig {
        &self.config
    }

    pub const fn node_id(&self) -> &NodeId {
        &self.config.node_id
    }

    pub const fn log(&self) -> &Arc<dyn DurableLog> {
        &self.log
    }

    pub const fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub const fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Append a message to the log, then deliver it to live connections.
    ///
    /// # Errors
    ///
    /// Returns an error if the append still fails after retries. Nothing is
    /// delivered live in that case.
    pub async fn publish(&self, message: NeuralMessage) -> Result<LogOffset> {
        let _guard = self.publish_lock.lock().await;
        let offset = self
            .config
            .retry
            .run("append", || self.log.append(&message))
            .await?;

        let delivery = self.deliver_live(&message).await;
        debug!(
            offset = %offset,
            message_id = %message.id(),
            event = %message.event(),
            source = %message.source(),
            target = ?message.target().map(NodeId::as_str),
            delivered = delivery.delivered,
            dropped = delivery.dropped,
            "Published message"
        );
        Ok(offset)
    }

    /// Broadcast a payload from this process's node.
    ///
    /// # Errors
    ///
    /// See [`MessageBus::publish`].
    pub async fn emit(&self, payload: impl Into<Payload>) -> Result<LogOffset> {
        self.publish(NeuralMessage::broadcast(self.config.node_id.clone(), payload))
            .await
    }

    /// Send a payload from this process's node to a single target.
    ///
    /// # Errors
    ///
    /// See [`MessageBus::publish`].
    pub async fn send_to(&self, target: NodeId, payload: impl Into<Payload>) -> Result<LogOffset> {
        self.publish(NeuralMessage::unicast(
            self.config.node_id.clone(),
            target,
            payload,
        ))
        .await
    }

    async fn deliver_live(&self, message: &NeuralMessage) -> Delivery {
        let recipients: Vec<(NodeId, mpsc::Sender<NeuralMessage>)> = {
            let connections = self.connections.read().await;
            match message.target() {
                Some(target) => connections
                    .get(target)
                    .map(|slot| (target.clone(), slot.sender.clone()))
                    .into_iter()
                    .collect(),
                None => connections
                    .iter()
                    .filter(|(id, _)| *id != message.source())
                    .map(|(id, slot)| (id.clone(), slot.sender.clone()))
                    .collect(),
            }
        };

        let mut delivery = Delivery::default();
        let mut closed = Vec::new();
        for (node_id, sender) in recipients {
            if message.target().is_some() && !self.registry.is_live(&node_id).await {
                debug!(node_id = %node_id, "Unicast target not live, left in log");
                delivery.dropped += 1;
                continue;
            }
            match sender.try_send(message.clone()) {
                Ok(()) => delivery.delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(node_id = %node_id, message_id = %message.id(), "Connection queue full, dropping live copy");
                    delivery.dropped += 1;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    delivery.dropped += 1;
                    closed.push(node_id);
                }
            }
        }

        if message.target().is_some() && delivery.delivered == 0 && delivery.dropped == 0 {
            debug!(target = ?message.target().map(NodeId::as_str), "Unicast target not connected, left in log");
        }

        for node_id in closed {
            self.drop_closed(&node_id).await;
        }
        delivery
    }

    async fn drop_closed(&self, node_id: &NodeId) {
        let removed = {
            let mut connections = self.connections.write().await;
            match connections.get(node_id) {
                Some(slot) if slot.sender.is_closed() => connections.remove(node_id).is_some(),
                _ => false,
            }
        };
        if removed {
            info!(node_id = %node_id, "Removed closed connection");
            if let Err(e) = self.registry.update_status(node_id, NodeStatus::Offline).await {
                debug!(node_id = %node_id, error = %e, "Closed connection had no registry entry");
            }
        }
    }

    /// Register a node and open its outbound queue.
    ///
    /// A second connection for the same node id replaces the first.
    ///
    /// # Errors
    ///
    /// Returns an error if the registration announcement cannot be appended.
    pub async fn connect(&self, registration: NodeRegistration) -> Result<Connection> {
        let node = self.registry.register(registration).await;
        let (sender, receiver) = mpsc::channel(self.config.connection_buffer);
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        let replaced = self
            .connections
            .write()
            .await
            .insert(node.id.clone(), ConnectionSlot { generation, sender });
        if replaced.is_some() {
            info!(node_id = %node.id, "Replaced existing connection");
        }
        info!(node_id = %node.id, kind = node.kind.as_str(), "Node connected");

        self.publish(NeuralMessage::broadcast(
            node.id.clone(),
            node.registration_payload(),
        ))
        .await?;

        Ok(Connection {
            node_id: node.id,
            generation,
            receiver,
        })
    }

    /// Drop a node's connection and mark it offline.
    pub async fn disconnect(&self, node_id: &NodeId) {
        let removed = self.connections.write().await.remove(node_id).is_some();
        if removed {
            self.announce_offline(node_id).await;
        }
    }

    /// Close a connection returned by [`MessageBus::connect`].
    ///
    /// Does nothing if the node has since reconnected.
    pub async fn close(&self, connection: Connection) {
        let removed = {
            let mut connections = self.connections.write().await;
            match connections.get(&connection.node_id) {
                Some(slot) if slot.generation == connection.generation => {
                    connections.remove(&connection.node_id).is_some()
                }
                _ => false,
            }
        };
        if removed {
            self.announce_offline(&connection.node_id).await;
        }
    }

    async fn announce_offline(&self, node_id: &NodeId) {
        info!(node_id = %node_id, "Node disconnected");
        if let Err(e) = self.registry.update_status(node_id, NodeStatus::Offline).await {
            debug!(node_id = %node_id, error = %e, "Disconnected node was not registered");
        }
        let offline = NeuralMessage::broadcast(
            node_id.clone(),
            HealthCheck {
                node_id: node_id.clone(),
                status: NodeStatus::Offline,
            },
        );
        if let Err(e) = self.publish(offline).await {
            error!(node_id = %node_id, error = %e, "Failed to publish disconnect");
        }
    }

    /// Handle one inbound text frame from `from`.
    ///
    /// Malformed frames are logged and dropped. Valid frames refresh the
    /// sender's heartbeat and are published with their source pinned to
    /// `from` and a fresh id and receipt timestamp. Returns the offset of the
    /// published message.
    pub async fn handle_frame(&self, from: &NodeId, text: &str) -> Option<LogOffset> {
        let message = match NeuralMessage::from_json(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(node_id = %from, error = %e, "Dropping malformed frame");
                return None;
            }
        };

        if let Err(e) = self.registry.heartbeat(from).await {
            debug!(node_id = %from, error = %e, "Frame from unregistered node");
        }

        if message.source() != from {
            debug!(node_id = %from, claimed = %message.source(), "Pinning frame source to connection");
        }
        match self.publish(message.received_from(from.clone())).await {
            Ok(offset) => Some(offset),
            Err(e) => {
                error!(node_id = %from, error = %e, "Failed to publish frame");
                None
            }
        }
    }

    /// Register this process's own node on the bus.
    ///
    /// # Errors
    ///
    /// Returns an error if the registration cannot be appended.
    pub async fn register_self(&self, registration: NodeRegistration) -> Result<ServiceNode> {
        let node = self.registry.register(registration).await;
        self.emit(node.registration_payload()).await?;
        Ok(node)
    }

    /// Heartbeat this process's node and broadcast a `health_check`.
    ///
    /// # Errors
    ///
    /// Returns an error if the announcement cannot be appended.
    pub async fn announce_presence(&self) -> Result<LogOffset> {
        let status = match self.registry.heartbeat(&self.config.node_id).await {
            Ok(node) => node.status,
            Err(_) => {
                self.registry
                    .register(NodeRegistration::new(
                        self.config.node_id.clone(),
                        NodeKind::Service,
                    ))
                    .await
                    .status
            }
        };
        self.emit(HealthCheck {
            node_id: self.config.node_id.clone(),
            status,
        })
        .await
    }

    /// Number of open connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Ids of connected nodes.
    pub async fn connected_nodes(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.connections.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }
}

/// Keep the registry in step with registration and health messages read
/// from the log, until `shutdown` flips to `true`.
pub fn spawn_registry_sync(bus: &Arc<MessageBus>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    let registry = Arc::clone(bus.registry());
    let mut subscription = bus.dispatcher().subscribe();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                received = subscription.recv() => match received {
                    Ok(message) => {
                        registry.apply(&message).await;
                    }
                    Err(Error::Lagged { skipped }) => {
                        warn!(skipped, "Registry sync lagged behind the dispatcher");
                    }
                    Err(_) => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Registry sync stopped");
    })
}
