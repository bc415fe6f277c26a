//! Tasks, their lifecycle, and the bounded history ring.

use std::fmt;

use chrono::{DateTime, Utc};
use im::Vector;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use synapse_events::Priority;
use ulid::Ulid;

use crate::agent::AgentId;
use crate::error::{Result, SwarmError};

/// Task identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(format!("task-{}", Ulid::new().to_string().to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an execution ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum TaskOutcome {
    Success { result: Option<Value> },
    Failure { error: String },
}

impl TaskOutcome {
    pub const fn success(result: Value) -> Self {
        Self::Success {
            result: Some(result),
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self::Failure {
            error: error.into(),
        }
    }

    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// A caller's request for work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub task_type: String,
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

impl TaskRequest {
    pub fn new(task_type: impl Into<String>, input: Value) -> Self {
        Self {
            task_type: task_type.into(),
            input,
            priority: Priority::default(),
            correlation_id: None,
        }
    }

    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

/// One unit of work. `agent_id` is set exactly when status is not pending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTask {
    pub id: TaskId,
    pub agent_id: Option<AgentId>,
    pub task_type: String,
    pub priority: Priority,
    pub input: Value,
    pub status: TaskStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub correlation_id: Option<String>,
}

impl AgentTask {
    /// A pending task built from `request`.
    ///
    /// # Errors
    ///
    /// Returns `SwarmError::InvalidTask` if the task type is blank.
    pub fn from_request(request: TaskRequest, now: DateTime<Utc>) -> Result<Self> {
        if request.task_type.trim().is_empty() {
            return Err(SwarmError::invalid_task("task type must not be empty"));
        }
        Ok(Self {
            id: TaskId::generate(),
            agent_id: None,
            task_type: request.task_type,
            priority: request.priority,
            input: request.input,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            submitted_at: now,
            start_time: None,
            end_time: None,
            correlation_id: request.correlation_id,
        })
    }

    /// pending -> processing, bound to `agent`.
    ///
    /// # Errors
    ///
    /// Returns `SwarmError::InvalidTransition` unless the task is pending.
    pub fn start(&mut self, agent: &AgentId, now: DateTime<Utc>) -> Result<()> {
        if self.status != TaskStatus::Pending {
            return Err(self.invalid_transition(TaskStatus::Processing));
        }
        self.agent_id = Some(agent.clone());
        self.status = TaskStatus::Processing;
        self.start_time = Some(now);
        Ok(())
    }

    /// processing -> completed | failed. Returns the execution time.
    ///
    /// # Errors
    ///
    /// Returns `SwarmError::InvalidTransition` unless the task is processing.
    pub fn finish(&mut self, outcome: TaskOutcome, now: DateTime<Utc>) -> Result<u64> {
        let next = if outcome.is_success() {
            TaskStatus::Completed
        } else {
            TaskStatus::Failed
        };
        if self.status != TaskStatus::Processing {
            return Err(self.invalid_transition(next));
        }
        match outcome {
            TaskOutcome::Success { result } => self.result = result,
            TaskOutcome::Failure { error } => self.error = Some(error),
        }
        self.status = next;
        self.end_time = Some(now);
        Ok(self.duration_ms().unwrap_or(0))
    }

    /// Time between start and end, once both are known.
    pub fn duration_ms(&self) -> Option<u64> {
        let (start, end) = (self.start_time?, self.end_time?);
        u64::try_from((end - start).num_milliseconds()).ok()
    }

    fn invalid_transition(&self, to: TaskStatus) -> SwarmError {
        SwarmError::InvalidTransition {
            task_id: self.id.clone(),
            from: self.status,
            to,
        }
    }
}

/// Bounded ring of finished tasks, oldest evicted first.
#[derive(Debug, Clone)]
pub struct TaskHistory {
    entries: Vector<AgentTask>,
    capacity: usize,
}

impl TaskHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vector::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, task: AgentTask) {
        self.entries.push_back(task);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// Newest entry with this id.
    pub fn get(&self, id: &TaskId) -> Option<&AgentTask> {
        self.entries.iter().rev().find(|task| &task.id == id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AgentTask> {
        self.entries.iter()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pending() -> AgentTask {
        AgentTask::from_request(TaskRequest::new("code-help", json!({"q": "?"})), Utc::now()).unwrap()
    }

    #[test]
    fn test_blank_task_type_is_rejected() {
        let err = AgentTask::from_request(TaskRequest::new("  ", Value::Null), Utc::now()).unwrap_err();
        assert!(matches!(err, SwarmError::InvalidTask { .. }));
    }

    #[test]
    fn test_start_binds_agent_exactly_once() {
        let mut task = pending();
        assert!(task.agent_id.is_none());

        task.start(&AgentId::new("a1"), Utc::now()).unwrap();
        assert_eq!(task.status, TaskStatus::Processing);
        assert_eq!(task.agent_id, Some(AgentId::new("a1")));

        let err = task.start(&AgentId::new("a2"), Utc::now()).unwrap_err();
        assert!(matches!(err, SwarmError::InvalidTransition { from: TaskStatus::Processing, .. }));
        assert_eq!(task.agent_id, Some(AgentId::new("a1")));
    }

    #[test]
    fn test_finish_records_outcome_and_duration() {
        let mut task = pending();
        let start = Utc::now();
        task.start(&AgentId::new("a1"), start).unwrap();

        let duration = task
            .finish(TaskOutcome::failure("boom"), start + chrono::TimeDelta::milliseconds(250))
            .unwrap();
        assert_eq!(duration, 250);
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.error.as_deref(), Some("boom"));
        assert!(task.agent_id.is_some());
    }

    #[test]
    fn test_pending_task_cannot_finish() {
        let mut task = pending();
        assert!(task.finish(TaskOutcome::success(json!(1)), Utc::now()).is_err());
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[test]
    fn test_history_evicts_oldest() {
        let mut history = TaskHistory::new(2);
        let tasks: Vec<_> = (0..3).map(|_| pending()).collect();
        for task in &tasks {
            history.push(task.clone());
        }
        assert_eq!(history.len(), 2);
        assert!(history.get(&tasks[0].id).is_none());
        assert!(history.get(&tasks[2].id).is_some());
    }
}
