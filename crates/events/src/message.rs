//! The `NeuralMessage` envelope and its typed payloads.
//!
//! Every message carries exactly one payload variant, and the wire `event`
//! field is derived from that variant. Decoding goes the other way: the `event`
//! name selects the schema the `payload` object must satisfy, so a frame whose
//! payload does not fit its topic is rejected as a protocol error.

use chrono::{DateTime, Utc};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::types::{MessageId, NodeId, NodeKind, NodeMetadata, NodeStatus, Priority};

/// Fixed set of message topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    #[serde(rename = "task_submitted")]
    TaskSubmitted,
    #[serde(rename = "task_started")]
    TaskStarted,
    #[serde(rename = "task_completed")]
    TaskCompleted,
    #[serde(rename = "agent-unhealthy")]
    AgentUnhealthy,
    #[serde(rename = "agent-retiring")]
    AgentRetiring,
    #[serde(rename = "agent-retired")]
    AgentRetired,
    #[serde(rename = "agent-spawned")]
    AgentSpawned,
    #[serde(rename = "service_registration")]
    ServiceRegistration,
    #[serde(rename = "health_check")]
    HealthCheck,
}

impl Topic {
    /// Wire name of the topic.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TaskSubmitted => "task_submitted",
            Self::TaskStarted => "task_started",
            Self::TaskCompleted => "task_completed",
            Self::AgentUnhealthy => "agent-unhealthy",
            Self::AgentRetiring => "agent-retiring",
            Self::AgentRetired => "agent-retired",
            Self::AgentSpawned => "agent-spawned",
            Self::ServiceRegistration => "service_registration",
            Self::HealthCheck => "health_check",
        }
    }

    /// Every topic, in declaration order.
    pub const fn all() -> [Self; 9] {
        [
            Self::TaskSubmitted,
            Self::TaskStarted,
            Self::TaskCompleted,
            Self::AgentUnhealthy,
            Self::AgentRetiring,
            Self::AgentRetired,
            Self::AgentSpawned,
            Self::ServiceRegistration,
            Self::HealthCheck,
        ]
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A task entered the pending queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSubmitted {
    pub task_id: String,
    pub task_type: String,
    pub priority: Priority,
}

/// A task was bound to an agent.
///
/// Carries everything the agent's node needs to run the task; the task's
/// correlation id travels on the envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStarted {
    pub task_id: String,
    pub task_type: String,
    pub agent_id: String,
    pub priority: Priority,
    #[serde(default)]
    pub input: Value,
}

/// A task reached a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCompleted {
    pub task_id: String,
    pub agent_id: String,
    pub success: bool,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Health components as broadcast with `agent-unhealthy`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub availability: f64,
    pub accuracy: f64,
    pub latency_score: f64,
    pub error_rate: f64,
    pub health_score: f64,
}

/// An agent scored below the health threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentUnhealthy {
    pub agent_id: String,
    pub role: String,
    pub health: HealthReport,
}

/// An agent was scheduled for retirement and stopped taking work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRetiring {
    pub agent_id: String,
    pub role: String,
    pub reason: String,
    pub in_flight: usize,
}

/// An agent was finalized and went offline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRetired {
    pub agent_id: String,
    pub role: String,
    pub reason: String,
    pub lifetime_ms: u64,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
}

/// A new agent joined the pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpawned {
    pub agent_id: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replaces: Option<String>,
}

/// A node joined or re-announced itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRegistration {
    pub node_id: NodeId,
    pub kind: NodeKind,
    pub status: NodeStatus,
    #[serde(default)]
    pub metadata: NodeMetadata,
}

/// Periodic liveness announcement of a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub node_id: NodeId,
    pub status: NodeStatus,
}

/// Typed message payload, one variant per topic.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    TaskSubmitted(TaskSubmitted),
    TaskStarted(TaskStarted),
    TaskCompleted(TaskCompleted),
    AgentUnhealthy(AgentUnhealthy),
    AgentRetiring(AgentRetiring),
    AgentRetired(AgentRetired),
    AgentSpawned(AgentSpawned),
    ServiceRegistration(ServiceRegistration),
    HealthCheck(HealthCheck),
}

impl Payload {
    /// The topic this payload belongs to.
    pub const fn topic(&self) -> Topic {
        match self {
            Self::TaskSubmitted(_) => Topic::TaskSubmitted,
            Self::TaskStarted(_) => Topic::TaskStarted,
            Self::TaskCompleted(_) => Topic::TaskCompleted,
            Self::AgentUnhealthy(_) => Topic::AgentUnhealthy,
            Self::AgentRetiring(_) => Topic::AgentRetiring,
            Self::AgentRetired(_) => Topic::AgentRetired,
            Self::AgentSpawned(_) => Topic::AgentSpawned,
            Self::ServiceRegistration(_) => Topic::ServiceRegistration,
            Self::HealthCheck(_) => Topic::HealthCheck,
        }
    }

    /// Decode a payload object against the schema of `topic`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Protocol` if the value does not fit the topic's schema.
    pub fn decode(topic: Topic, value: Value) -> Result<Self> {
        let decoded = match topic {
            Topic::TaskSubmitted => serde_json::from_value(value).map(Self::TaskSubmitted),
            Topic::TaskStarted => serde_json::from_value(value).map(Self::TaskStarted),
            Topic::TaskCompleted => serde_json::from_value(value).map(Self::TaskCompleted),
            Topic::AgentUnhealthy => serde_json::from_value(value).map(Self::AgentUnhealthy),
            Topic::AgentRetiring => serde_json::from_value(value).map(Self::AgentRetiring),
            Topic::AgentRetired => serde_json::from_value(value).map(Self::AgentRetired),
            Topic::AgentSpawned => serde_json::from_value(value).map(Self::AgentSpawned),
            Topic::ServiceRegistration => {
                serde_json::from_value(value).map(Self::ServiceRegistration)
            }
            Topic::HealthCheck => serde_json::from_value(value).map(Self::HealthCheck),
        };
        decoded.map_err(|e| Error::protocol(format!("payload does not match '{topic}': {e}")))
    }
}

macro_rules! payload_from {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for Payload {
                fn from(value: $variant) -> Self {
                    Self::$variant(value)
                }
            }
        )*
    };
}

payload_from!(
    TaskSubmitted,
    TaskStarted,
    TaskCompleted,
    AgentUnhealthy,
    AgentRetiring,
    AgentRetired,
    AgentSpawned,
    ServiceRegistration,
    HealthCheck,
);

/// Immutable bus envelope.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawMessage")]
pub struct NeuralMessage {
    id: MessageId,
    source: NodeId,
    target: Option<NodeId>,
    payload: Payload,
    timestamp: DateTime<Utc>,
    correlation_id: Option<String>,
}

impl NeuralMessage {
    /// A message for every connected node except the source.
    pub fn broadcast(source: NodeId, payload: impl Into<Payload>) -> Self {
        Self {
            id: MessageId::new(),
            source,
            target: None,
            payload: payload.into(),
            timestamp: Utc::now(),
            correlation_id: None,
        }
    }

    /// A message for a single node.
    pub fn unicast(source: NodeId, target: NodeId, payload: impl Into<Payload>) -> Self {
        Self {
            target: Some(target),
            ..Self::broadcast(source, payload)
        }
    }

    /// Attach a correlation id.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    /// Re-stamp a frame received from `source`.
    ///
    /// The source is pinned to the connection and the id and timestamp are
    /// reassigned on receipt. Payload, target and correlation id are kept.
    #[must_use]
    pub fn received_from(mut self, source: NodeId) -> Self {
        self.source = source;
        self.id = MessageId::new();
        self.timestamp = Utc::now();
        self
    }

    /// Override the timestamp.
    #[must_use]
    pub const fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub const fn id(&self) -> MessageId {
        self.id
    }

    /// Topic, derived from the payload.
    pub const fn event(&self) -> Topic {
        self.payload.topic()
    }

    pub const fn source(&self) -> &NodeId {
        &self.source
    }

    pub const fn target(&self) -> Option<&NodeId> {
        self.target.as_ref()
    }

    pub const fn payload(&self) -> &Payload {
        &self.payload
    }

    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    /// Whether the message has no target.
    pub const fn is_broadcast(&self) -> bool {
        self.target.is_none()
    }

    /// Encode as a wire frame.
    ///
    /// # Errors
    ///
    /// Returns `Error::Serialization` if encoding fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::serialization(e.to_string()))
    }

    /// Decode a wire frame.
    ///
    /// # Errors
    ///
    /// Returns `Error::Protocol` if the text is not a valid message.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::protocol(e.to_string()))
    }
}

impl Serialize for NeuralMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("NeuralMessage", 7)?;
        state.serialize_field("id", &self.id)?;
        state.serialize_field("event", &self.event())?;
        state.serialize_field("source", &self.source)?;
        match &self.target {
            Some(target) => state.serialize_field("target", target)?,
            None => state.skip_field("target")?,
        }
        state.serialize_field("payload", &self.payload)?;
        state.serialize_field("timestamp", &self.timestamp)?;
        match &self.correlation_id {
            Some(id) => state.serialize_field("correlation_id", id)?,
            None => state.skip_field("correlation_id")?,
        }
        state.end()
    }
}

/// Flat wire form before payload validation.
///
/// Clients may omit `id` and `timestamp`. Frames arriving through the bus
/// get both reassigned anyway, see [`NeuralMessage::received_from`].
#[derive(Deserialize)]
struct RawMessage {
    #[serde(default)]
    id: Option<MessageId>,
    event: Topic,
    source: NodeId,
    #[serde(default)]
    target: Option<NodeId>,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    correlation_id: Option<String>,
}

impl TryFrom<RawMessage> for NeuralMessage {
    type Error = Error;

    fn try_from(raw: RawMessage) -> Result<Self> {
        let payload = Payload::decode(raw.event, raw.payload)?;
        Ok(Self {
            id: raw.id.unwrap_or_default(),
            source: raw.source,
            target: raw.target,
            payload,
            timestamp: raw.timestamp.unwrap_or_else(Utc::now),
            correlation_id: raw.correlation_id,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn submitted() -> TaskSubmitted {
        TaskSubmitted {
            task_id: "task-1".to_string(),
            task_type: "code-help".to_string(),
            priority: Priority::High,
        }
    }

    #[test]
    fn should_use_exact_wire_names_for_topics() {
        for topic in Topic::all() {
            let encoded = serde_json::to_value(topic).unwrap();
            assert_eq!(encoded, json!(topic.as_str()));
        }
    }

    #[test]
    fn should_derive_event_from_payload() {
        let msg = NeuralMessage::broadcast(NodeId::new("swarm"), submitted());
        assert_eq!(msg.event(), Topic::TaskSubmitted);
        assert!(msg.is_broadcast());
    }

    #[test]
    fn should_encode_as_flat_object() {
        let msg = NeuralMessage::unicast(NodeId::new("swarm"), NodeId::new("ui-1"), submitted())
            .with_correlation_id("req-9");
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();

        assert_eq!(value["event"], json!("task_submitted"));
        assert_eq!(value["source"], json!("swarm"));
        assert_eq!(value["target"], json!("ui-1"));
        assert_eq!(value["payload"]["priority"], json!("high"));
        assert_eq!(value["correlation_id"], json!("req-9"));
    }

    #[test]
    fn should_omit_absent_target() {
        let msg = NeuralMessage::broadcast(NodeId::new("swarm"), submitted());
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert!(value.get("target").is_none());
    }

    #[test]
    fn should_decode_what_it_encodes() {
        let msg = NeuralMessage::broadcast(NodeId::new("swarm"), submitted());
        let decoded = NeuralMessage::from_json(&msg.to_json().unwrap()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn should_reject_payload_that_does_not_fit_topic() {
        let frame = json!({
            "event": "task_started",
            "source": "ui-1",
            "payload": { "task_id": "t", "task_type": "code-help", "priority": "low" }
        });
        let result = NeuralMessage::from_json(&frame.to_string());
        assert!(matches!(result, Err(Error::Protocol { .. })));
    }

    #[test]
    fn should_carry_task_input_when_started() {
        let started = TaskStarted {
            task_id: "task-1".to_string(),
            task_type: "code-help".to_string(),
            agent_id: "agent-1".to_string(),
            priority: Priority::Critical,
            input: json!({"question": "why"}),
        };
        let msg = NeuralMessage::broadcast(NodeId::new("swarm"), started).with_correlation_id("req-3");
        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();

        assert_eq!(value["payload"]["input"]["question"], json!("why"));
        assert_eq!(value["payload"]["priority"], json!("critical"));
        assert_eq!(value["correlation_id"], json!("req-3"));
    }

    #[test]
    fn should_reject_unknown_topic() {
        let frame = json!({ "event": "workflow_created", "source": "ui-1", "payload": {} });
        assert!(NeuralMessage::from_json(&frame.to_string()).is_err());
    }

    #[test]
    fn should_assign_id_and_timestamp_when_client_omits_them() {
        let frame = json!({
            "event": "health_check",
            "source": "ui-1",
            "payload": { "node_id": "ui-1", "status": "online" }
        });
        let msg = NeuralMessage::from_json(&frame.to_string()).unwrap();
        assert_eq!(msg.event(), Topic::HealthCheck);
        assert!(msg.timestamp() <= Utc::now());
    }

    #[test]
    fn should_restamp_received_frames() {
        let future = Utc::now() + chrono::TimeDelta::hours(1);
        let sent = NeuralMessage::broadcast(NodeId::new("swarm"), submitted())
            .with_timestamp(future)
            .with_correlation_id("req-1");

        let received = sent.clone().received_from(NodeId::new("ui-1"));

        assert_eq!(received.source(), &NodeId::new("ui-1"));
        assert_ne!(received.id(), sent.id());
        assert!(received.timestamp() < future);
        assert_eq!(received.payload(), sent.payload());
        assert_eq!(received.correlation_id(), Some("req-1"));
    }

    #[test]
    fn should_reject_garbage_text() {
        assert!(NeuralMessage::from_json("{not json").is_err());
    }
}
