//! Swarm error types.
//!
//! These are business errors returned in RPC replies; the actor keeps
//! running after returning one.

use thiserror::Error;

use crate::agent::{AgentId, AgentStatus};
use crate::task::{TaskId, TaskStatus};

/// Errors raised by the scheduler, lifecycle manager and controller.
#[derive(Debug, Clone, Error)]
pub enum SwarmError {
    /// The task is in neither the active table nor the history ring.
    #[error("task not found: {task_id}")]
    TaskNotFound { task_id: TaskId },

    /// The task exists but is not processing.
    #[error("task {task_id} is {status}, not processing")]
    TaskNotActive { task_id: TaskId, status: TaskStatus },

    /// A task transition that the lifecycle does not allow.
    #[error("task {task_id} cannot move from {from} to {to}")]
    InvalidTransition {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    /// The submission was rejected.
    #[error("invalid task: {reason}")]
    InvalidTask { reason: String },

    /// No agent with this id exists.
    #[error("agent not found: {agent_id}")]
    AgentNotFound { agent_id: AgentId },

    /// The agent has already been retired.
    #[error("agent {agent_id} is retired")]
    AgentRetired { agent_id: AgentId },

    /// The agent's status does not allow the requested change.
    #[error("agent {agent_id} is {status}")]
    InvalidAgentState {
        agent_id: AgentId,
        status: AgentStatus,
    },

    /// Assignment would exceed the agent's concurrency limit.
    #[error("agent {agent_id} is at capacity ({max} tasks)")]
    CapacityExceeded { agent_id: AgentId, max: usize },

    /// Configuration failed validation.
    #[error("invalid swarm config: {reason}")]
    InvalidConfig { reason: String },

    /// The swarm actor is stopped or did not answer.
    #[error("swarm actor unavailable: {0}")]
    ActorUnavailable(String),

    /// Bus or registry failure.
    #[error(transparent)]
    Bus(#[from] synapse_events::Error),
}

impl SwarmError {
    pub fn task_not_found(task_id: &TaskId) -> Self {
        Self::TaskNotFound {
            task_id: task_id.clone(),
        }
    }

    pub fn agent_not_found(agent_id: &AgentId) -> Self {
        Self::AgentNotFound {
            agent_id: agent_id.clone(),
        }
    }

    pub fn invalid_config(reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            reason: reason.into(),
        }
    }

    pub fn invalid_task(reason: impl Into<String>) -> Self {
        Self::InvalidTask {
            reason: reason.into(),
        }
    }

    pub fn actor_unavailable(reason: impl std::fmt::Display) -> Self {
        Self::ActorUnavailable(reason.to_string())
    }
}

/// Result alias for swarm operations.
pub type Result<T> = std::result::Result<T, SwarmError>;
