//! Configuration for the swarm.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::{AgentConfig, AgentRole};
use crate::error::{Result, SwarmError};
use crate::health::HealthPolicy;

/// A group of identical agents in the initial roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub role: AgentRole,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,
    /// Number of agents to start with this configuration.
    #[serde(default = "default_count")]
    pub count: usize,
}

const fn default_max_concurrent_tasks() -> usize {
    1
}

const fn default_count() -> usize {
    1
}

impl RosterEntry {
    pub fn new(role: AgentRole, name: impl Into<String>) -> Self {
        Self {
            role,
            name: name.into(),
            description: String::new(),
            capabilities: BTreeSet::new(),
            max_concurrent_tasks: default_max_concurrent_tasks(),
            count: default_count(),
        }
    }

    #[must_use]
    pub const fn with_max_concurrent_tasks(mut self, max: usize) -> Self {
        self.max_concurrent_tasks = max;
        self
    }

    #[must_use]
    pub const fn with_count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    #[must_use]
    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.insert(capability.into());
        self
    }

    /// One config per instance, each with its own id.
    pub fn agent_configs(&self) -> Vec<AgentConfig> {
        (0..self.count)
            .map(|_| AgentConfig {
                capabilities: self.capabilities.clone(),
                description: self.description.clone(),
                ..AgentConfig::new(self.role, self.name.clone())
                    .with_max_concurrent_tasks(self.max_concurrent_tasks)
            })
            .collect()
    }
}

/// One agent per role.
pub fn default_roster() -> Vec<RosterEntry> {
    vec![
        RosterEntry::new(AgentRole::Code, "Code Assistant")
            .with_max_concurrent_tasks(2)
            .with_capability("code-help"),
        RosterEntry::new(AgentRole::Research, "Research Assistant").with_max_concurrent_tasks(2),
        RosterEntry::new(AgentRole::Analysis, "Analyst"),
        RosterEntry::new(AgentRole::Writing, "Writer"),
        RosterEntry::new(AgentRole::Testing, "Tester"),
        RosterEntry::new(AgentRole::Coordination, "Coordinator").with_max_concurrent_tasks(4),
    ]
}

/// Configuration for the swarm system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwarmConfig {
    /// Scheduling tick.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Health recomputation interval.
    #[serde(default = "default_health_check_interval_ms")]
    pub health_check_interval_ms: u64,

    /// How often retiring agents are checked for an empty task set.
    #[serde(default = "default_retirement_poll_interval_ms")]
    pub retirement_poll_interval_ms: u64,

    /// Heartbeat interval for the swarm's own node and its agents.
    #[serde(default = "default_presence_interval_ms")]
    pub presence_interval_ms: u64,

    /// Finished tasks kept for status queries.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Retired agents kept for health and status queries, oldest dropped first.
    #[serde(default = "default_retired_agent_capacity")]
    pub retired_agent_capacity: usize,

    #[serde(default)]
    pub health: HealthPolicy,

    #[serde(default = "default_roster")]
    pub roster: Vec<RosterEntry>,
}

const fn default_tick_interval_ms() -> u64 {
    100
}

const fn default_health_check_interval_ms() -> u64 {
    30_000
}

const fn default_retirement_poll_interval_ms() -> u64 {
    1_000
}

const fn default_presence_interval_ms() -> u64 {
    5_000
}

const fn default_history_capacity() -> usize {
    1_000
}

const fn default_retired_agent_capacity() -> usize {
    100
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            health_check_interval_ms: default_health_check_interval_ms(),
            retirement_poll_interval_ms: default_retirement_poll_interval_ms(),
            presence_interval_ms: default_presence_interval_ms(),
            history_capacity: default_history_capacity(),
            retired_agent_capacity: default_retired_agent_capacity(),
            health: HealthPolicy::default(),
            roster: default_roster(),
        }
    }
}

impl SwarmConfig {
    /// Replace the roster.
    #[must_use]
    pub fn with_roster(mut self, roster: Vec<RosterEntry>) -> Self {
        self.roster = roster;
        self
    }

    #[must_use]
    pub fn with_health(mut self, health: HealthPolicy) -> Self {
        self.health = health;
        self
    }

    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub const fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub const fn retirement_poll_interval(&self) -> Duration {
        Duration::from_millis(self.retirement_poll_interval_ms)
    }

    pub const fn presence_interval(&self) -> Duration {
        Duration::from_millis(self.presence_interval_ms)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `SwarmError::InvalidConfig` if an interval or the history
    /// capacity is zero, the health policy is invalid, or a roster entry
    /// would produce an invalid agent.
    pub fn validate(&self) -> Result<()> {
        let intervals = [
            ("tick_interval_ms", self.tick_interval_ms),
            ("health_check_interval_ms", self.health_check_interval_ms),
            ("retirement_poll_interval_ms", self.retirement_poll_interval_ms),
            ("presence_interval_ms", self.presence_interval_ms),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, value)| *value == 0) {
            return Err(SwarmError::invalid_config(format!("{name} must be greater than 0")));
        }
        if self.history_capacity == 0 {
            return Err(SwarmError::invalid_config("history_capacity must be greater than 0"));
        }
        if self.retired_agent_capacity == 0 {
            return Err(SwarmError::invalid_config("retired_agent_capacity must be greater than 0"));
        }
        self.health.validate()?;
        for entry in &self.roster {
            if entry.count == 0 {
                return Err(SwarmError::invalid_config(format!(
                    "roster entry '{}' must start at least one agent",
                    entry.name
                )));
            }
            if entry.max_concurrent_tasks == 0 || entry.name.trim().is_empty() {
                return Err(SwarmError::invalid_config(format!(
                    "roster entry '{}' needs a name and max_concurrent_tasks >= 1",
                    entry.name
                )));
            }
        }
        Ok(())
    }
}
