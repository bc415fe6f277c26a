//! Composite agent health scoring.
//!
//! Each component lies in [0, 1] and is monotonic in its input:
//!
//! - availability: 1.0 while the agent has work or was active within the
//!   grace period, then linear down to 0 at `max_idle_ms`
//! - accuracy: rolling success rate
//! - latency: 1.0 at or below `latency_target_ms`, linear down to 0 at
//!   `latency_max_ms`
//! - error rate: failed / terminal tasks
//!
//! Below `min_sample_size` terminal tasks accuracy is 1 and error rate 0.
//! The score is `100 * weighted mean`, with the error term contributing
//! `1 - error_rate`, clamped to [0, 100].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::{AgentHealth, SwarmAgent};
use crate::error::{Result, SwarmError};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthWeights {
    #[serde(default = "default_availability_weight")]
    pub availability: f64,
    #[serde(default = "default_accuracy_weight")]
    pub accuracy: f64,
    #[serde(default = "default_latency_weight")]
    pub latency: f64,
    #[serde(default = "default_error_weight")]
    pub error: f64,
}

const fn default_availability_weight() -> f64 {
    0.25
}

const fn default_accuracy_weight() -> f64 {
    0.35
}

const fn default_latency_weight() -> f64 {
    0.20
}

const fn default_error_weight() -> f64 {
    0.20
}

impl Default for HealthWeights {
    fn default() -> Self {
        Self {
            availability: default_availability_weight(),
            accuracy: default_accuracy_weight(),
            latency: default_latency_weight(),
            error: default_error_weight(),
        }
    }
}

impl HealthWeights {
    fn total(&self) -> f64 {
        self.availability + self.accuracy + self.latency + self.error
    }
}

/// Thresholds and weights for health scoring.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthPolicy {
    #[serde(default)]
    pub weights: HealthWeights,
    /// Scores strictly below this mark an agent unhealthy.
    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: f64,
    #[serde(default = "default_min_sample_size")]
    pub min_sample_size: u64,
    #[serde(default = "default_availability_grace_ms")]
    pub availability_grace_ms: u64,
    #[serde(default = "default_max_idle_ms")]
    pub max_idle_ms: u64,
    #[serde(default = "default_latency_target_ms")]
    pub latency_target_ms: u64,
    #[serde(default = "default_latency_max_ms")]
    pub latency_max_ms: u64,
}

const fn default_unhealthy_threshold() -> f64 {
    50.0
}

const fn default_min_sample_size() -> u64 {
    3
}

const fn default_availability_grace_ms() -> u64 {
    60_000
}

const fn default_max_idle_ms() -> u64 {
    600_000
}

const fn default_latency_target_ms() -> u64 {
    5_000
}

const fn default_latency_max_ms() -> u64 {
    60_000
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            weights: HealthWeights::default(),
            unhealthy_threshold: default_unhealthy_threshold(),
            min_sample_size: default_min_sample_size(),
            availability_grace_ms: default_availability_grace_ms(),
            max_idle_ms: default_max_idle_ms(),
            latency_target_ms: default_latency_target_ms(),
            latency_max_ms: default_latency_max_ms(),
        }
    }
}

impl HealthPolicy {
    /// # Errors
    ///
    /// Returns `SwarmError::InvalidConfig` for negative or all-zero weights,
    /// a threshold outside [0, 100], or decay windows that end before they
    /// start.
    pub fn validate(&self) -> Result<()> {
        let w = &self.weights;
        if [w.availability, w.accuracy, w.latency, w.error]
            .iter()
            .any(|weight| !weight.is_finite() || *weight < 0.0)
        {
            return Err(SwarmError::invalid_config("health weights must be finite and non-negative"));
        }
        if w.total() <= 0.0 {
            return Err(SwarmError::invalid_config("health weights must not all be zero"));
        }
        if !(0.0..=100.0).contains(&self.unhealthy_threshold) {
            return Err(SwarmError::invalid_config("unhealthy_threshold must be within [0, 100]"));
        }
        if self.max_idle_ms <= self.availability_grace_ms {
            return Err(SwarmError::invalid_config(
                "max_idle_ms must be greater than availability_grace_ms",
            ));
        }
        if self.latency_max_ms <= self.latency_target_ms {
            return Err(SwarmError::invalid_config(
                "latency_max_ms must be greater than latency_target_ms",
            ));
        }
        Ok(())
    }

    pub fn is_unhealthy(&self, health: &AgentHealth) -> bool {
        health.health_score < self.unhealthy_threshold
    }
}

/// 1.0 up to `start`, linear down to 0.0 at `end`.
#[allow(clippy::cast_precision_loss)]
fn linear_decay(value: f64, start: u64, end: u64) -> f64 {
    let (start, end) = (start as f64, end as f64);
    if value <= start {
        1.0
    } else if value >= end {
        0.0
    } else {
        1.0 - (value - start) / (end - start)
    }
}

/// Recompute health from the agent's current metrics.
#[allow(clippy::cast_precision_loss)]
pub fn compute_health(agent: &SwarmAgent, policy: &HealthPolicy, now: DateTime<Utc>) -> AgentHealth {
    let availability = if agent.current_tasks.is_empty() {
        let idle_ms = (now - agent.last_activity).num_milliseconds().max(0) as f64;
        linear_decay(idle_ms, policy.availability_grace_ms, policy.max_idle_ms)
    } else {
        1.0
    };

    let terminal = agent.completed_tasks + agent.failed_tasks;
    let (accuracy, error_rate) = if terminal < policy.min_sample_size.max(1) {
        (1.0, 0.0)
    } else {
        (
            agent.metrics.success_rate,
            agent.failed_tasks as f64 / terminal as f64,
        )
    };

    let latency_score = if agent.metrics.total_tasks == 0 {
        1.0
    } else {
        linear_decay(
            agent.metrics.avg_response_ms,
            policy.latency_target_ms,
            policy.latency_max_ms,
        )
    };

    let w = &policy.weights;
    let weighted = w.availability * availability
        + w.accuracy * accuracy
        + w.latency * latency_score
        + w.error * (1.0 - error_rate);
    let health_score = (100.0 * weighted / w.total()).clamp(0.0, 100.0);

    AgentHealth {
        availability,
        accuracy,
        latency_score,
        error_rate,
        health_score,
        last_check: now,
    }
}
