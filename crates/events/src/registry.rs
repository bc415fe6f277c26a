//! Node registry with heartbeat-based liveness.
//!
//! A node is live while its last heartbeat is no older than the liveness
//! timeout and its status is not offline. Stale nodes are flipped to offline
//! by the sweeper and purged once they go two timeouts without a heartbeat.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::message::{NeuralMessage, Payload, ServiceRegistration};
use crate::types::{NodeId, NodeKind, NodeMetadata, NodeStatus};

/// Registry timing configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Interval between heartbeats, and between stale sweeps.
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Maximum heartbeat age for a node to count as live.
    #[serde(default = "default_liveness_timeout_ms")]
    pub liveness_timeout_ms: u64,
}

const fn default_heartbeat_interval_ms() -> u64 {
    5_000
}

const fn default_liveness_timeout_ms() -> u64 {
    15_000
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            liveness_timeout_ms: default_liveness_timeout_ms(),
        }
    }
}

impl RegistryConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if either value is zero or the timeout does not
    /// exceed the heartbeat interval.
    pub fn validate(&self) -> Result<()> {
        if self.heartbeat_interval_ms == 0 {
            return Err(Error::invalid_config("heartbeat_interval_ms must be > 0"));
        }
        if self.liveness_timeout_ms <= self.heartbeat_interval_ms {
            return Err(Error::invalid_config(
                "liveness_timeout_ms must exceed heartbeat_interval_ms",
            ));
        }
        Ok(())
    }

    pub const fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn liveness_timeout(&self) -> TimeDelta {
        i64::try_from(self.liveness_timeout_ms)
            .ok()
            .and_then(TimeDelta::try_milliseconds)
            .unwrap_or(TimeDelta::MAX)
    }

    fn purge_after(&self) -> TimeDelta {
        self.liveness_timeout()
            .checked_mul(2)
            .unwrap_or(TimeDelta::MAX)
    }
}

/// What a node supplies when it joins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRegistration {
    pub id: NodeId,
    pub kind: NodeKind,
    #[serde(default)]
    pub metadata: NodeMetadata,
}

impl NodeRegistration {
    pub fn new(id: NodeId, kind: NodeKind) -> Self {
        Self {
            id,
            kind,
            metadata: NodeMetadata::default(),
        }
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: NodeMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A registered bus participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceNode {
    pub id: NodeId,
    pub kind: NodeKind,
    pub status: NodeStatus,
    pub last_heartbeat: DateTime<Utc>,
    pub metadata: NodeMetadata,
}

impl ServiceNode {
    /// Whether the node counts as live at `now`.
    pub fn is_live_at(&self, now: DateTime<Utc>, timeout: TimeDelta) -> bool {
        self.status != NodeStatus::Offline && now.signed_duration_since(self.last_heartbeat) <= timeout
    }

    /// Registration payload announcing this node.
    pub fn registration_payload(&self) -> ServiceRegistration {
        ServiceRegistration {
            node_id: self.id.clone(),
            kind: self.kind,
            status: self.status,
            metadata: self.metadata.clone(),
        }
    }
}

/// Registry of bus participants.
pub struct NodeRegistry {
    config: RegistryConfig,
    nodes: RwLock<HashMap<NodeId, ServiceNode>>,
}

impl NodeRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            nodes: RwLock::new(HashMap::new()),
        }
    }

    pub const fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Register or re-register a node as online.
    pub async fn register(&self, registration: NodeRegistration) -> ServiceNode {
        self.register_at(registration, Utc::now()).await
    }

    /// [`NodeRegistry::register`] with an explicit clock.
    pub async fn register_at(&self, registration: NodeRegistration, now: DateTime<Utc>) -> ServiceNode {
        let node = ServiceNode {
            id: registration.id,
            kind: registration.kind,
            status: NodeStatus::Online,
            last_heartbeat: now,
            metadata: registration.metadata,
        };
        info!(node_id = %node.id, kind = node.kind.as_str(), "Node registered");
        self.nodes.write().await.insert(node.id.clone(), node.clone());
        node
    }

    /// Refresh a node's heartbeat.
    ///
    /// # Errors
    ///
    /// Returns `Error::NodeNotFound` if the node is not registered.
    pub async fn heartbeat(&self, id: &NodeId) -> Result<ServiceNode> {
        self.heartbeat_at(id, Utc::now()).await
    }

    /// [`NodeRegistry::heartbeat`] with an explicit clock.
    ///
    /// # Errors
    ///
    /// Returns `Error::NodeNotFound` if the node is not registered.
    pub async fn heartbeat_at(&self, id: &NodeId, now: DateTime<Utc>) -> Result<ServiceNode> {
        let mut nodes = self.nodes.write().await;
        let node = nodes.get_mut(id).ok_or_else(|| Error::node_not_found(id))?;
        node.last_heartbeat = now;
        if node.status == NodeStatus::Offline {
            debug!(node_id = %id, "Node back online");
            node.status = NodeStatus::Online;
        }
        Ok(node.clone())
    }

    /// Set a node's status.
    ///
    /// # Errors
    ///
    /// Returns `Error::NodeNotFound` if the node is not registered.
    pub async fn update_status(&self, id: &NodeId, status: NodeStatus) -> Result<ServiceNode> {
        let mut nodes = self.nodes.write().await;
        let node = nodes.get_mut(id).ok_or_else(|| Error::node_not_found(id))?;
        node.status = status;
        Ok(node.clone())
    }

    pub async fn get(&self, id: &NodeId) -> Option<ServiceNode> {
        self.nodes.read().await.get(id).cloned()
    }

    pub async fn is_live(&self, id: &NodeId) -> bool {
        self.is_live_at(id, Utc::now()).await
    }

    pub async fn is_live_at(&self, id: &NodeId, now: DateTime<Utc>) -> bool {
        self.nodes
            .read()
            .await
            .get(id)
            .is_some_and(|node| node.is_live_at(now, self.config.liveness_timeout()))
    }

    /// Live nodes.
    pub async fn list_active(&self) -> Vec<ServiceNode> {
        self.list_active_at(Utc::now()).await
    }

    pub async fn list_active_at(&self, now: DateTime<Utc>) -> Vec<ServiceNode> {
        self.filter_nodes(|node| node.is_live_at(now, self.config.liveness_timeout()))
            .await
    }

    /// Live nodes of one kind.
    pub async fn list_by_kind(&self, kind: NodeKind) -> Vec<ServiceNode> {
        self.list_by_kind_at(kind, Utc::now()).await
    }

    pub async fn list_by_kind_at(&self, kind: NodeKind, now: DateTime<Utc>) -> Vec<ServiceNode> {
        self.filter_nodes(|node| {
            node.kind == kind && node.is_live_at(now, self.config.liveness_timeout())
        })
        .await
    }

    /// Every registered node, live or not.
    pub async fn list_all(&self) -> Vec<ServiceNode> {
        self.filter_nodes(|_| true).await
    }

    async fn filter_nodes(&self, keep: impl Fn(&ServiceNode) -> bool) -> Vec<ServiceNode> {
        let mut nodes: Vec<ServiceNode> = self
            .nodes
            .read()
            .await
            .values()
            .filter(|node| keep(node))
            .cloned()
            .collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    /// Flip nodes whose heartbeat is older than the timeout to offline.
    pub async fn mark_stale_at(&self, now: DateTime<Utc>) -> Vec<NodeId> {
        let timeout = self.config.liveness_timeout();
        let mut nodes = self.nodes.write().await;
        let mut stale = Vec::new();
        for node in nodes.values_mut() {
            if node.status != NodeStatus::Offline
                && now.signed_duration_since(node.last_heartbeat) > timeout
            {
                node.status = NodeStatus::Offline;
                stale.push(node.id.clone());
            }
        }
        if !stale.is_empty() {
            info!(count = stale.len(), "Marked stale nodes offline");
        }
        stale
    }

    /// Remove nodes that have gone two timeouts without a heartbeat.
    pub async fn purge_expired_at(&self, now: DateTime<Utc>) -> Vec<NodeId> {
        let cutoff = self.config.purge_after();
        let mut nodes = self.nodes.write().await;
        let expired: Vec<NodeId> = nodes
            .values()
            .filter(|node| now.signed_duration_since(node.last_heartbeat) > cutoff)
            .map(|node| node.id.clone())
            .collect();
        for id in &expired {
            nodes.remove(id);
            debug!(node_id = %id, "Purged expired node");
        }
        expired
    }

    /// Project a logged message onto the registry.
    ///
    /// Only `service_registration` and `health_check` messages change state.
    /// The heartbeat becomes the newer of the stored value and the message
    /// timestamp, and status/metadata are only taken from messages that are
    /// not older than the stored heartbeat, so applying a segment twice
    /// leaves the registry unchanged. Returns whether anything changed.
    pub async fn apply(&self, message: &NeuralMessage) -> bool {
        self.apply_at(message, Utc::now()).await
    }

    /// Like [`NodeRegistry::apply`], with message timestamps capped at `now`.
    ///
    /// A heartbeat is never recorded later than the moment it was applied.
    pub async fn apply_at(&self, message: &NeuralMessage, now: DateTime<Utc>) -> bool {
        let at = message.timestamp().min(now);
        let mut nodes = self.nodes.write().await;
        match message.payload() {
            Payload::ServiceRegistration(reg) => match nodes.get_mut(&reg.node_id) {
                Some(node) => {
                    if at < node.last_heartbeat {
                        return false;
                    }
                    let before = node.clone();
                    node.last_heartbeat = at;
                    node.kind = reg.kind;
                    node.status = reg.status;
                    node.metadata = reg.metadata.clone();
                    *node != before
                }
                None => {
                    nodes.insert(
                        reg.node_id.clone(),
                        ServiceNode {
                            id: reg.node_id.clone(),
                            kind: reg.kind,
                            status: reg.status,
                            last_heartbeat: at,
                            metadata: reg.metadata.clone(),
                        },
                    );
                    true
                }
            },
            Payload::HealthCheck(check) => match nodes.get_mut(&check.node_id) {
                Some(node) if at >= node.last_heartbeat => {
                    let before = node.clone();
                    node.last_heartbeat = at;
                    node.status = check.status;
                    *node != before
                }
                _ => false,
            },
            _ => false,
        }
    }
}

/// Run the stale sweep every heartbeat interval and the purge every two
/// liveness timeouts until `shutdown` flips to `true`.
pub fn spawn_sweeper(registry: Arc<NodeRegistry>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
    let config = *registry.config();
    let mut sweep = tokio::time::interval(config.heartbeat_interval());
    let mut purge =
        tokio::time::interval(Duration::from_millis(config.liveness_timeout_ms.saturating_mul(2)));

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = sweep.tick() => {
                    registry.mark_stale_at(Utc::now()).await;
                }
                _ = purge.tick() => {
                    registry.purge_expired_at(Utc::now()).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("Registry sweeper stopping");
                        break;
                    }
                }
            }
        }
    })
}
