//! # Orchestrator
//!
//! Agent swarm coordination and task distribution for Synapse.
//!
//! - [`state::SwarmState`]: the pure swarm state machine (agents, queue,
//!   bindings, health, retirement), driven by an explicit clock
//! - [`actors`]: the ractor actor owning that state, with periodic timers
//! - [`controller::SwarmController`]: the RPC handle callers use
//! - [`distribution`]: priority queue and capability matching
//! - [`health`]: composite health scoring

#![forbid(unsafe_code)]

pub mod actors;
pub mod agent;
pub mod config;
pub mod controller;
pub mod distribution;
pub mod error;
pub mod executor;
pub mod health;
pub mod state;
pub mod task;

pub use agent::{
    AgentConfig, AgentHealth, AgentId, AgentRole, AgentStatus, PerformanceMetrics, SwarmAgent,
};
pub use config::{RosterEntry, SwarmConfig, default_roster};
pub use controller::{DEFAULT_RPC_TIMEOUT, SwarmController};
pub use distribution::{CapabilityMatcher, Match, MatchTier, PendingQueue};
pub use error::{Result, SwarmError};
pub use executor::TaskExecutor;
pub use health::{HealthPolicy, HealthWeights, compute_health};
pub use state::{AgentSummary, SwarmEvent, SwarmState, SwarmStatus, TaskTotals};
pub use task::{AgentTask, TaskHistory, TaskId, TaskOutcome, TaskRequest, TaskStatus};
