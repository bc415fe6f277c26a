//! Agent configuration and runtime state.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use synapse_events::{HealthReport, NodeId, NodeKind, NodeMetadata, NodeRegistration};
use ulid::Ulid;

use crate::error::{Result, SwarmError};
use crate::task::TaskId;

/// Agent identifier, also used as the agent's node id on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh id of the form `agent-<role>-<ulid>`.
    pub fn generate(role: AgentRole) -> Self {
        Self(format!("agent-{}-{}", role, Ulid::new().to_string().to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn node_id(&self) -> NodeId {
        NodeId::new(self.0.clone())
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Specialization of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Code,
    Research,
    Analysis,
    Writing,
    Testing,
    Coordination,
}

impl AgentRole {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Research => "research",
            Self::Analysis => "analysis",
            Self::Writing => "writing",
            Self::Testing => "testing",
            Self::Coordination => "coordination",
        }
    }

    pub const fn all() -> [Self; 6] {
        [
            Self::Code,
            Self::Research,
            Self::Analysis,
            Self::Writing,
            Self::Testing,
            Self::Coordination,
        ]
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentRole {
    type Err = SwarmError;

    fn from_str(s: &str) -> Result<Self> {
        Self::all()
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| SwarmError::invalid_config(format!("unknown agent role '{s}'")))
    }
}

/// Immutable description of an agent. Replacements copy it under a new id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: AgentId,
    pub role: AgentRole,
    pub name: String,
    pub description: String,
    pub capabilities: BTreeSet<String>,
    pub max_concurrent_tasks: usize,
}

impl AgentConfig {
    /// A single-slot agent with a generated id.
    pub fn new(role: AgentRole, name: impl Into<String>) -> Self {
        Self {
            id: AgentId::generate(role),
            role,
            name: name.into(),
            description: String::new(),
            capabilities: BTreeSet::new(),
            max_concurrent_tasks: 1,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<AgentId>) -> Self {
        self.id = id.into();
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    #[must_use]
    pub const fn with_max_concurrent_tasks(mut self, max: usize) -> Self {
        self.max_concurrent_tasks = max;
        self
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }

    /// Same configuration under a freshly generated id.
    #[must_use]
    pub fn respawned(&self) -> Self {
        Self {
            id: AgentId::generate(self.role),
            ..self.clone()
        }
    }

    /// Registry entry for this agent's node.
    pub fn registration(&self) -> NodeRegistration {
        let metadata = self.capabilities.iter().fold(
            NodeMetadata::default()
                .with_role(self.role.as_str())
                .with_display_name(self.name.clone()),
            |metadata, capability| metadata.with_capability(capability.clone()),
        );
        NodeRegistration::new(self.id.node_id(), NodeKind::Agent).with_metadata(metadata)
    }

    /// # Errors
    ///
    /// Returns `SwarmError::InvalidConfig` for an empty name or a zero
    /// concurrency limit.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(SwarmError::invalid_config(format!(
                "agent {} must have a name",
                self.id
            )));
        }
        if self.max_concurrent_tasks == 0 {
            return Err(SwarmError::invalid_config(format!(
                "agent {} must accept at least one task",
                self.id
            )));
        }
        Ok(())
    }
}

/// Runtime status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Idle,
    Busy,
    Thinking,
    Unhealthy,
    Retiring,
    Offline,
}

impl AgentStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Busy => "busy",
            Self::Thinking => "thinking",
            Self::Unhealthy => "unhealthy",
            Self::Retiring => "retiring",
            Self::Offline => "offline",
        }
    }

    /// Statuses in which the agent is part of the working pool.
    pub const fn is_working(self) -> bool {
        matches!(self, Self::Idle | Self::Busy | Self::Thinking)
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rolling execution metrics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub avg_response_ms: f64,
    pub success_rate: f64,
    pub total_tasks: u64,
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self {
            avg_response_ms: 0.0,
            success_rate: 1.0,
            total_tasks: 0,
        }
    }
}

impl PerformanceMetrics {
    /// Fold one finished task into the metrics.
    #[allow(clippy::cast_precision_loss)]
    pub fn record(&mut self, duration_ms: u64, completed: u64) {
        self.total_tasks += 1;
        let total = self.total_tasks as f64;
        self.avg_response_ms += (duration_ms as f64 - self.avg_response_ms) / total;
        self.success_rate = completed as f64 / total;
    }
}

/// Derived health components. Always recomputed from metrics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AgentHealth {
    pub availability: f64,
    pub accuracy: f64,
    pub latency_score: f64,
    pub error_rate: f64,
    pub health_score: f64,
    pub last_check: DateTime<Utc>,
}

impl AgentHealth {
    pub fn pristine(now: DateTime<Utc>) -> Self {
        Self {
            availability: 1.0,
            accuracy: 1.0,
            latency_score: 1.0,
            error_rate: 0.0,
            health_score: 100.0,
            last_check: now,
        }
    }

    pub fn report(&self) -> HealthReport {
        HealthReport {
            availability: self.availability,
            accuracy: self.accuracy,
            latency_score: self.latency_score,
            error_rate: self.error_rate,
            health_score: self.health_score,
        }
    }
}

/// One agent instance in the swarm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwarmAgent {
    pub config: AgentConfig,
    pub status: AgentStatus,
    pub current_tasks: BTreeSet<TaskId>,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    pub last_activity: DateTime<Utc>,
    pub metrics: PerformanceMetrics,
    pub health: AgentHealth,
    pub retirement_scheduled: bool,
    pub retirement_reason: Option<String>,
    pub replaces: Option<AgentId>,
    pub created_at: DateTime<Utc>,
    pub retired_at: Option<DateTime<Utc>>,
}

impl SwarmAgent {
    pub fn new(config: AgentConfig, now: DateTime<Utc>) -> Self {
        Self {
            config,
            status: AgentStatus::Idle,
            current_tasks: BTreeSet::new(),
            completed_tasks: 0,
            failed_tasks: 0,
            last_activity: now,
            metrics: PerformanceMetrics::default(),
            health: AgentHealth::pristine(now),
            retirement_scheduled: false,
            retirement_reason: None,
            replaces: None,
            created_at: now,
            retired_at: None,
        }
    }

    /// Fresh idle agent with this agent's config under a new id.
    pub fn replacement(&self, now: DateTime<Utc>) -> Self {
        Self {
            replaces: Some(self.config.id.clone()),
            ..Self::new(self.config.respawned(), now)
        }
    }

    pub const fn id(&self) -> &AgentId {
        &self.config.id
    }

    pub const fn role(&self) -> AgentRole {
        self.config.role
    }

    pub fn load(&self) -> usize {
        self.current_tasks.len()
    }

    pub fn has_capacity(&self) -> bool {
        self.load() < self.config.max_concurrent_tasks
    }

    pub const fn is_retired(&self) -> bool {
        self.retired_at.is_some()
    }

    /// Eligible for new work in this scheduling tick.
    pub fn is_candidate(&self) -> bool {
        self.status == AgentStatus::Idle && self.has_capacity() && !self.retirement_scheduled
    }

    /// Bind a task. The agent turns busy once it reaches capacity.
    ///
    /// # Errors
    ///
    /// Returns `SwarmError::CapacityExceeded` if the agent is already full.
    pub fn assign(&mut self, task_id: TaskId, now: DateTime<Utc>) -> Result<()> {
        if !self.has_capacity() {
            return Err(SwarmError::CapacityExceeded {
                agent_id: self.id().clone(),
                max: self.config.max_concurrent_tasks,
            });
        }
        self.current_tasks.insert(task_id);
        self.last_activity = now;
        if !self.has_capacity() {
            self.status = AgentStatus::Busy;
        }
        Ok(())
    }

    /// Release a finished task and account for it. Returns false if the task
    /// was not bound to this agent.
    pub fn release(&mut self, task_id: &TaskId, success: bool, duration_ms: u64, now: DateTime<Utc>) -> bool {
        if !self.current_tasks.remove(task_id) {
            return false;
        }
        if success {
            self.completed_tasks += 1;
        } else {
            self.failed_tasks += 1;
        }
        self.metrics.record(duration_ms, self.completed_tasks);
        self.last_activity = now;

        match self.status {
            AgentStatus::Busy if self.has_capacity() => self.status = AgentStatus::Idle,
            AgentStatus::Thinking if self.current_tasks.is_empty() => self.status = AgentStatus::Idle,
            _ => {}
        }
        true
    }

    /// Stamp retirement. The record is immutable afterwards.
    pub fn retire(&mut self, now: DateTime<Utc>) {
        self.status = AgentStatus::Offline;
        self.retired_at = Some(now);
    }

    pub fn lifetime_ms(&self) -> u64 {
        let end = self.retired_at.unwrap_or(self.created_at);
        u64::try_from((end - self.created_at).num_milliseconds()).unwrap_or(0)
    }
}
