//! Messages for the SwarmActor.
//!
//! - Commands are fire-and-forget (`send_message`)
//! - Queries return responses (`call` with an `RpcReplyPort`)
//! - Business errors are returned in RPC replies, NOT as actor crashes

use ractor::RpcReplyPort;
use synapse_events::TaskCompleted;

use crate::agent::{AgentHealth, AgentId, AgentStatus};
use crate::error::SwarmError;
use crate::state::SwarmStatus;
use crate::task::{AgentTask, TaskId, TaskOutcome, TaskRequest};

#[derive(Debug)]
pub enum SwarmMessage {
    // ═══════════════════════════════════════════════════════════════════════
    // TIMERS (reply is set when driven by a caller instead of an interval)
    // ═══════════════════════════════════════════════════════════════════════
    /// Install the scheduling, health, retirement and presence intervals.
    StartTimers,

    /// Scheduling pass. Replies with the number of tasks started.
    Tick { reply: Option<RpcReplyPort<usize>> },

    /// Health pass. Replies with the number of agents found unhealthy.
    CheckHealth { reply: Option<RpcReplyPort<usize>> },

    /// Retirement pass. Replies with the number of agents retired.
    PollRetirements { reply: Option<RpcReplyPort<usize>> },

    /// Heartbeat the swarm's node and its live agents.
    Presence,

    // ═══════════════════════════════════════════════════════════════════════
    // COMMANDS
    // ═══════════════════════════════════════════════════════════════════════
    /// A local executor finished a task.
    ExecutionFinished { task_id: TaskId, outcome: TaskOutcome },

    /// Another node reported a task as finished.
    RemoteCompleted(TaskCompleted),

    // ═══════════════════════════════════════════════════════════════════════
    // REQUESTS
    // ═══════════════════════════════════════════════════════════════════════
    Submit {
        request: TaskRequest,
        reply: RpcReplyPort<Result<TaskId, SwarmError>>,
    },

    Complete {
        task_id: TaskId,
        outcome: TaskOutcome,
        reply: RpcReplyPort<Result<AgentTask, SwarmError>>,
    },

    /// Replies with the replacement agent's id.
    ForceRetire {
        agent_id: AgentId,
        reason: String,
        reply: RpcReplyPort<Result<AgentId, SwarmError>>,
    },

    SetThinking {
        agent_id: AgentId,
        thinking: bool,
        reply: RpcReplyPort<Result<AgentStatus, SwarmError>>,
    },

    GetTask {
        task_id: TaskId,
        reply: RpcReplyPort<Option<AgentTask>>,
    },

    GetStatus { reply: RpcReplyPort<SwarmStatus> },

    GetAgentHealth {
        agent_id: AgentId,
        reply: RpcReplyPort<Option<AgentHealth>>,
    },
}
