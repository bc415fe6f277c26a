//! Local task execution.

use async_trait::async_trait;

use crate::agent::AgentConfig;
use crate::task::{AgentTask, TaskOutcome};

/// Runs an assigned task on behalf of an agent.
///
/// Executions run on their own tokio tasks and report back to the swarm
/// actor; they are never cancelled mid-flight. Without an executor,
/// completions arrive through `SwarmController::complete_task` or as
/// `task_completed` messages from other nodes.
#[async_trait]
pub trait TaskExecutor: Send + Sync + 'static {
    async fn execute(&self, task: AgentTask, agent: AgentConfig) -> TaskOutcome;
}
