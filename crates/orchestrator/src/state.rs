//! Swarm state: agents, the pending queue, active tasks and history.
//!
//! Every operation is synchronous and takes an explicit clock. Operations
//! return the events they caused, in order; the caller publishes them.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use im::Vector;
use itertools::Itertools;
use serde::Serialize;
use synapse_events::{
    AgentRetired, AgentRetiring, AgentSpawned, AgentUnhealthy, Payload, TaskCompleted, TaskStarted,
    TaskSubmitted,
};
use tracing::{debug, info, warn};

use crate::agent::{AgentConfig, AgentHealth, AgentId, AgentRole, AgentStatus, SwarmAgent};
use crate::config::{RosterEntry, SwarmConfig};
use crate::distribution::{CapabilityMatcher, PendingQueue, QueueKey};
use crate::error::{Result, SwarmError};
use crate::health::{HealthPolicy, compute_health};
use crate::task::{AgentTask, TaskHistory, TaskId, TaskOutcome, TaskRequest, TaskStatus};

/// An event to publish, with the correlation id of the task that caused it.
#[derive(Debug, Clone, PartialEq)]
pub struct SwarmEvent {
    pub payload: Payload,
    pub correlation_id: Option<String>,
}

impl SwarmEvent {
    pub fn new(payload: impl Into<Payload>) -> Self {
        Self {
            payload: payload.into(),
            correlation_id: None,
        }
    }

    fn for_task(payload: impl Into<Payload>, task: &AgentTask) -> Self {
        Self {
            payload: payload.into(),
            correlation_id: task.correlation_id.clone(),
        }
    }
}

/// Cumulative task counters. Unlike the history ring these never evict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskTotals {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Per-agent line of a status report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentSummary {
    pub id: AgentId,
    pub name: String,
    pub role: AgentRole,
    pub status: AgentStatus,
    pub load: usize,
    pub max_concurrent_tasks: usize,
    pub completed_tasks: u64,
    pub failed_tasks: u64,
    pub health_score: f64,
    pub retirement_scheduled: bool,
    pub replaces: Option<AgentId>,
}

impl From<&SwarmAgent> for AgentSummary {
    fn from(agent: &SwarmAgent) -> Self {
        Self {
            id: agent.id().clone(),
            name: agent.config.name.clone(),
            role: agent.role(),
            status: agent.status,
            load: agent.load(),
            max_concurrent_tasks: agent.config.max_concurrent_tasks,
            completed_tasks: agent.completed_tasks,
            failed_tasks: agent.failed_tasks,
            health_score: agent.health.health_score,
            retirement_scheduled: agent.retirement_scheduled,
            replaces: agent.replaces.clone(),
        }
    }
}

/// Aggregate view of the swarm. Retired agents are only counted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SwarmStatus {
    pub total_agents: usize,
    pub retired_agents: usize,
    pub agents_by_status: BTreeMap<AgentStatus, usize>,
    pub pending_tasks: usize,
    pub processing_tasks: usize,
    pub totals: TaskTotals,
    pub agents: Vec<AgentSummary>,
}

/// All mutable swarm state.
#[derive(Debug, Clone)]
pub struct SwarmState {
    policy: HealthPolicy,
    matcher: CapabilityMatcher,
    agents: BTreeMap<AgentId, SwarmAgent>,
    /// Retired agent ids, oldest first.
    retired: Vector<AgentId>,
    retired_capacity: usize,
    queue: PendingQueue,
    tasks: HashMap<TaskId, AgentTask>,
    history: TaskHistory,
    totals: TaskTotals,
}

impl SwarmState {
    /// Empty state; agents are added with `spawn_roster` or `add_agent`.
    pub fn new(config: &SwarmConfig) -> Self {
        Self {
            policy: config.health,
            matcher: CapabilityMatcher::default(),
            agents: BTreeMap::new(),
            retired: Vector::new(),
            retired_capacity: config.retired_agent_capacity.max(1),
            queue: PendingQueue::new(),
            tasks: HashMap::new(),
            history: TaskHistory::new(config.history_capacity),
            totals: TaskTotals::default(),
        }
    }

    #[must_use]
    pub fn with_matcher(mut self, matcher: CapabilityMatcher) -> Self {
        self.matcher = matcher;
        self
    }

    // ═══════════════════════════════════════════════════════════════════════
    // AGENTS
    // ═══════════════════════════════════════════════════════════════════════

    /// # Errors
    ///
    /// Returns `SwarmError::InvalidConfig` if the config is invalid or the id
    /// is already taken.
    pub fn add_agent(&mut self, config: AgentConfig, now: DateTime<Utc>) -> Result<SwarmEvent> {
        config.validate()?;
        if self.agents.contains_key(&config.id) {
            return Err(SwarmError::invalid_config(format!("agent {} already exists", config.id)));
        }
        let agent = SwarmAgent::new(config, now);
        let event = SwarmEvent::new(AgentSpawned {
            agent_id: agent.id().to_string(),
            role: agent.role().to_string(),
            replaces: None,
        });
        info!(agent_id = %agent.id(), role = %agent.role(), "Agent spawned");
        self.agents.insert(agent.id().clone(), agent);
        Ok(event)
    }

    /// # Errors
    ///
    /// Returns the first invalid roster entry's error; agents added before it
    /// are kept.
    pub fn spawn_roster(&mut self, roster: &[RosterEntry], now: DateTime<Utc>) -> Result<Vec<SwarmEvent>> {
        roster
            .iter()
            .flat_map(RosterEntry::agent_configs)
            .map(|config| self.add_agent(config, now))
            .collect()
    }

    pub fn agent(&self, id: &AgentId) -> Option<&SwarmAgent> {
        self.agents.get(id)
    }

    /// Every agent, including the most recently retired ones.
    pub fn agents(&self) -> impl Iterator<Item = &SwarmAgent> {
        self.agents.values()
    }

    pub fn live_agents(&self) -> impl Iterator<Item = &SwarmAgent> {
        self.agents.values().filter(|agent| !agent.is_retired())
    }

    /// Last computed health; `None` for unknown or long-retired agents.
    pub fn agent_health(&self, id: &AgentId) -> Option<AgentHealth> {
        self.agents.get(id).map(|agent| agent.health)
    }

    /// Toggle the presentation-only `thinking` status.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown or retired agents, or agents that are
    /// unhealthy or retiring.
    pub fn set_thinking(&mut self, id: &AgentId, thinking: bool) -> Result<AgentStatus> {
        let agent = self.agents.get_mut(id).ok_or_else(|| SwarmError::agent_not_found(id))?;
        if agent.is_retired() {
            return Err(SwarmError::AgentRetired { agent_id: id.clone() });
        }
        if !agent.status.is_working() || agent.retirement_scheduled {
            return Err(SwarmError::InvalidAgentState {
                agent_id: id.clone(),
                status: agent.status,
            });
        }
        agent.status = match (thinking, agent.has_capacity()) {
            (true, _) => AgentStatus::Thinking,
            (false, true) => AgentStatus::Idle,
            (false, false) => AgentStatus::Busy,
        };
        debug!(agent_id = %id, status = %agent.status, "Agent status set");
        Ok(agent.status)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // TASKS
    // ═══════════════════════════════════════════════════════════════════════

    /// Enqueue a pending task.
    ///
    /// # Errors
    ///
    /// Returns `SwarmError::InvalidTask` for a blank task type.
    pub fn submit(&mut self, request: TaskRequest, now: DateTime<Utc>) -> Result<(TaskId, SwarmEvent)> {
        let task = AgentTask::from_request(request, now)?;
        let id = task.id.clone();
        let event = SwarmEvent::for_task(
            TaskSubmitted {
                task_id: id.to_string(),
                task_type: task.task_type.clone(),
                priority: task.priority,
            },
            &task,
        );

        self.queue.push(task.priority, id.clone());
        info!(task_id = %id, task_type = %task.task_type, priority = %task.priority, "Task submitted");
        self.tasks.insert(id.clone(), task);
        self.totals.submitted += 1;
        Ok((id, event))
    }

    /// Active table first, then the history ring.
    pub fn task(&self, id: &TaskId) -> Option<&AgentTask> {
        self.tasks.get(id).or_else(|| self.history.get(id))
    }

    /// Pending task ids in scheduling order.
    pub fn pending(&self) -> Vec<TaskId> {
        self.queue.task_ids()
    }

    /// Assign pending tasks to candidate agents, in priority order.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<SwarmEvent> {
        let pending: Vec<(QueueKey, TaskId)> = self.queue.iter().map(|(key, id)| (key, id.clone())).collect();
        let mut events = Vec::new();

        for (key, task_id) in pending {
            let Some(task_type) = self.tasks.get(&task_id).map(|task| task.task_type.clone()) else {
                warn!(task_id = %task_id, "Dropping queue entry without a task");
                self.queue.remove(key);
                continue;
            };

            let chosen = {
                let candidates: Vec<&SwarmAgent> =
                    self.agents.values().filter(|agent| agent.is_candidate()).collect();
                if candidates.is_empty() {
                    break;
                }
                self.matcher.select(&task_type, &candidates)
            };
            let Some(chosen) = chosen else {
                continue;
            };

            match self.bind(key, &task_id, &chosen.agent_id, now) {
                Ok(event) => {
                    debug!(task_id = %task_id, agent_id = %chosen.agent_id, tier = ?chosen.tier, "Task matched");
                    events.push(event);
                }
                Err(e) => warn!(task_id = %task_id, error = %e, "Failed to bind task"),
            }
        }
        events
    }

    fn bind(&mut self, key: QueueKey, task_id: &TaskId, agent_id: &AgentId, now: DateTime<Utc>) -> Result<SwarmEvent> {
        let agent = self
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| SwarmError::agent_not_found(agent_id))?;
        let task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| SwarmError::task_not_found(task_id))?;
        if !agent.has_capacity() {
            return Err(SwarmError::CapacityExceeded {
                agent_id: agent_id.clone(),
                max: agent.config.max_concurrent_tasks,
            });
        }

        task.start(agent_id, now)?;
        agent.assign(task_id.clone(), now)?;
        self.queue.remove(key);

        info!(task_id = %task_id, agent_id = %agent_id, load = agent.load(), "Task started");
        Ok(SwarmEvent::for_task(
            TaskStarted {
                task_id: task_id.to_string(),
                task_type: task.task_type.clone(),
                agent_id: agent_id.to_string(),
                priority: task.priority,
                input: task.input.clone(),
            },
            task,
        ))
    }

    /// Record the end of a processing task.
    ///
    /// # Errors
    ///
    /// Returns `SwarmError::TaskNotFound` for unknown ids and
    /// `SwarmError::TaskNotActive` for tasks that are not processing,
    /// including ones that already finished.
    pub fn complete(
        &mut self,
        task_id: &TaskId,
        outcome: TaskOutcome,
        now: DateTime<Utc>,
    ) -> Result<(AgentTask, SwarmEvent)> {
        let status = self
            .task(task_id)
            .map(|task| task.status)
            .ok_or_else(|| SwarmError::task_not_found(task_id))?;
        if status != TaskStatus::Processing {
            return Err(SwarmError::TaskNotActive {
                task_id: task_id.clone(),
                status,
            });
        }
        let Some(mut task) = self.tasks.remove(task_id) else {
            return Err(SwarmError::task_not_found(task_id));
        };
        let success = outcome.is_success();
        let duration_ms = task.finish(outcome, now)?;

        if let Some(agent_id) = &task.agent_id {
            let released = self
                .agents
                .get_mut(agent_id)
                .is_some_and(|agent| agent.release(task_id, success, duration_ms, now));
            if !released {
                warn!(task_id = %task_id, agent_id = %agent_id, "Finished task was not held by its agent");
            }
        }
        if success {
            self.totals.completed += 1;
        } else {
            self.totals.failed += 1;
        }

        info!(task_id = %task_id, status = %task.status, duration_ms, "Task finished");
        let event = SwarmEvent::for_task(
            TaskCompleted {
                task_id: task_id.to_string(),
                agent_id: task.agent_id.as_ref().map(ToString::to_string).unwrap_or_default(),
                success,
                duration_ms,
                result: task.result.clone(),
                error: task.error.clone(),
            },
            &task,
        );
        self.history.push(task.clone());
        Ok((task, event))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // HEALTH & LIFECYCLE
    // ═══════════════════════════════════════════════════════════════════════

    /// Recompute health for every live agent and start retiring the ones
    /// that fell below the threshold.
    pub fn check_health(&mut self, now: DateTime<Utc>) -> Vec<SwarmEvent> {
        let policy = self.policy;
        let mut events = Vec::new();
        let mut unhealthy = Vec::new();

        for agent in self.agents.values_mut().filter(|agent| !agent.is_retired()) {
            agent.health = compute_health(agent, &policy, now);
            if policy.is_unhealthy(&agent.health) && !agent.retirement_scheduled {
                agent.status = AgentStatus::Unhealthy;
                warn!(
                    agent_id = %agent.id(),
                    health_score = agent.health.health_score,
                    "Agent unhealthy"
                );
                events.push(SwarmEvent::new(AgentUnhealthy {
                    agent_id: agent.id().to_string(),
                    role: agent.role().to_string(),
                    health: agent.health.report(),
                }));
                unhealthy.push((
                    agent.id().clone(),
                    format!(
                        "health score {:.1} below threshold {:.1}",
                        agent.health.health_score, policy.unhealthy_threshold
                    ),
                ));
            }
        }

        for (agent_id, reason) in unhealthy {
            match self.schedule_retirement(&agent_id, reason) {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(e) => warn!(agent_id = %agent_id, error = %e, "Failed to schedule retirement"),
            }
        }
        events
    }

    /// Mark an agent as retiring. Returns `None` if it already was.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown or already retired agents.
    pub fn schedule_retirement(&mut self, agent_id: &AgentId, reason: impl Into<String>) -> Result<Option<SwarmEvent>> {
        let agent = self
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| SwarmError::agent_not_found(agent_id))?;
        if agent.is_retired() {
            return Err(SwarmError::AgentRetired {
                agent_id: agent_id.clone(),
            });
        }
        if agent.retirement_scheduled {
            return Ok(None);
        }

        let reason = reason.into();
        agent.retirement_scheduled = true;
        agent.retirement_reason = Some(reason.clone());
        agent.status = AgentStatus::Retiring;
        info!(agent_id = %agent_id, in_flight = agent.load(), reason = %reason, "Agent retiring");
        Ok(Some(SwarmEvent::new(AgentRetiring {
            agent_id: agent_id.to_string(),
            role: agent.role().to_string(),
            reason,
            in_flight: agent.load(),
        })))
    }

    /// Finalize every retiring agent whose task set has drained.
    pub fn poll_retirements(&mut self, now: DateTime<Utc>) -> Vec<SwarmEvent> {
        let drained: Vec<AgentId> = self
            .agents
            .values()
            .filter(|agent| agent.retirement_scheduled && !agent.is_retired() && agent.current_tasks.is_empty())
            .map(|agent| agent.id().clone())
            .collect();

        drained
            .iter()
            .filter_map(|agent_id| {
                self.finalize_retirement(agent_id, now)
                    .inspect_err(|e| warn!(agent_id = %agent_id, error = %e, "Failed to retire agent"))
                    .ok()
            })
            .flat_map(|(_, events)| events)
            .collect()
    }

    /// Retire now: fail in-flight tasks, finalize and spawn the replacement.
    /// Returns the replacement's id.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown or already retired agents.
    pub fn force_retire(
        &mut self,
        agent_id: &AgentId,
        reason: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<(AgentId, Vec<SwarmEvent>)> {
        let reason = reason.into();
        let mut events: Vec<SwarmEvent> = self.schedule_retirement(agent_id, reason.clone())?.into_iter().collect();

        let in_flight: Vec<TaskId> = self
            .agents
            .get(agent_id)
            .map(|agent| agent.current_tasks.iter().cloned().collect())
            .unwrap_or_default();
        for task_id in in_flight {
            let outcome = TaskOutcome::failure(format!("agent {agent_id} was force-retired: {reason}"));
            match self.complete(&task_id, outcome, now) {
                Ok((_, event)) => events.push(event),
                Err(e) => warn!(task_id = %task_id, error = %e, "Failed to fail in-flight task"),
            }
        }
        if let Some(agent) = self.agents.get_mut(agent_id) {
            agent.current_tasks.clear();
        }

        let (replacement, mut finalized) = self.finalize_retirement(agent_id, now)?;
        events.append(&mut finalized);
        Ok((replacement, events))
    }

    fn finalize_retirement(&mut self, agent_id: &AgentId, now: DateTime<Utc>) -> Result<(AgentId, Vec<SwarmEvent>)> {
        let agent = self
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| SwarmError::agent_not_found(agent_id))?;
        if agent.is_retired() {
            return Err(SwarmError::AgentRetired {
                agent_id: agent_id.clone(),
            });
        }

        agent.retire(now);
        let retired = AgentRetired {
            agent_id: agent_id.to_string(),
            role: agent.role().to_string(),
            reason: agent.retirement_reason.clone().unwrap_or_default(),
            lifetime_ms: agent.lifetime_ms(),
            completed_tasks: agent.completed_tasks,
            failed_tasks: agent.failed_tasks,
        };
        info!(
            agent_id = %agent_id,
            lifetime_ms = retired.lifetime_ms,
            completed = retired.completed_tasks,
            failed = retired.failed_tasks,
            "Agent retired"
        );

        let replacement = agent.replacement(now);
        let replacement_id = replacement.id().clone();
        let spawned = AgentSpawned {
            agent_id: replacement_id.to_string(),
            role: replacement.role().to_string(),
            replaces: Some(agent_id.to_string()),
        };
        info!(agent_id = %replacement_id, replaces = %agent_id, "Replacement agent spawned");
        self.agents.insert(replacement_id.clone(), replacement);
        self.remember_retired(agent_id.clone());

        Ok((replacement_id, vec![SwarmEvent::new(retired), SwarmEvent::new(spawned)]))
    }

    fn remember_retired(&mut self, agent_id: AgentId) {
        self.retired.push_back(agent_id);
        while self.retired.len() > self.retired_capacity {
            if let Some(oldest) = self.retired.pop_front() {
                self.agents.remove(&oldest);
                debug!(agent_id = %oldest, "Dropped retired agent record");
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // QUERIES
    // ═══════════════════════════════════════════════════════════════════════

    pub fn snapshot(&self) -> SwarmStatus {
        let live: Vec<&SwarmAgent> = self.live_agents().collect();
        SwarmStatus {
            total_agents: live.len(),
            retired_agents: self.agents.len() - live.len(),
            agents_by_status: live.iter().map(|agent| agent.status).counts().into_iter().collect(),
            pending_tasks: self.queue.len(),
            processing_tasks: self
                .tasks
                .values()
                .filter(|task| task.status == TaskStatus::Processing)
                .count(),
            totals: self.totals,
            agents: live.into_iter().map(AgentSummary::from).collect(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing, clippy::panic)]
mod tests {
    use super::*;
    use chrono::TimeDelta;
    use serde_json::json;
    use synapse_events::{Priority, Topic};

    fn state_with(agents: Vec<AgentConfig>) -> SwarmState {
        let mut state = SwarmState::new(&SwarmConfig::default());
        let now = Utc::now();
        for config in agents {
            state.add_agent(config, now).unwrap();
        }
        state
    }

    fn coder(id: &str, max: usize) -> AgentConfig {
        AgentConfig::new(AgentRole::Code, id).with_id(id).with_max_concurrent_tasks(max)
    }

    fn request(task_type: &str, priority: Priority) -> TaskRequest {
        TaskRequest::new(task_type, json!({})).with_priority(priority)
    }

    fn topics(events: &[SwarmEvent]) -> Vec<Topic> {
        events.iter().map(|event| event.payload.topic()).collect()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // SCHEDULING
    // ═══════════════════════════════════════════════════════════════════════

    #[test]
    fn should_start_task_on_matching_agent_within_one_tick() {
        let mut state = state_with(vec![coder("coder", 1)]);
        let now = Utc::now();
        let (id, submitted) = state
            .submit(request("code-help", Priority::High).with_correlation_id("req-1"), now)
            .unwrap();
        assert_eq!(submitted.payload.topic(), Topic::TaskSubmitted);
        assert_eq!(submitted.correlation_id.as_deref(), Some("req-1"));

        let events = state.tick(now);
        assert_eq!(topics(&events), [Topic::TaskStarted]);
        assert_eq!(events[0].correlation_id.as_deref(), Some("req-1"));
        let Payload::TaskStarted(started) = &events[0].payload else {
            panic!("expected task_started");
        };
        assert_eq!(started.priority, Priority::High);
        assert_eq!(started.input, json!({}));

        let task = state.task(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Processing);
        assert_eq!(task.agent_id, Some(AgentId::new("coder")));
        assert_eq!(state.agent(&AgentId::new("coder")).unwrap().status, AgentStatus::Busy);
    }

    #[test]
    fn should_schedule_in_priority_order_fifo_within_band() {
        let mut state = state_with(vec![coder("coder", 1)]);
        let now = Utc::now();
        let mut ids = Vec::new();
        for priority in [Priority::Low, Priority::Critical, Priority::Normal, Priority::High] {
            ids.push(state.submit(request("code-help", priority), now).unwrap().0);
        }

        let mut order = Vec::new();
        for _ in 0..4 {
            state.tick(now);
            let running = state
                .tasks
                .values()
                .find(|task| task.status == TaskStatus::Processing)
                .map(|task| task.id.clone())
                .unwrap();
            order.push(running.clone());
            state.complete(&running, TaskOutcome::success(json!("ok")), now).unwrap();
        }
        assert_eq!(order, vec![ids[1].clone(), ids[3].clone(), ids[2].clone(), ids[0].clone()]);
    }

    #[test]
    fn should_keep_agent_idle_while_it_has_spare_capacity() {
        let mut state = state_with(vec![coder("coder", 2)]);
        let now = Utc::now();
        state.submit(request("code-help", Priority::Normal), now).unwrap();
        state.tick(now);
        assert_eq!(state.agent(&AgentId::new("coder")).unwrap().status, AgentStatus::Idle);

        state.submit(request("code-help", Priority::Normal), now).unwrap();
        state.submit(request("code-help", Priority::Normal), now).unwrap();
        assert_eq!(state.tick(now).len(), 1);
        let agent = state.agent(&AgentId::new("coder")).unwrap();
        assert_eq!(agent.status, AgentStatus::Busy);
        assert_eq!(agent.load(), 2);
        assert_eq!(state.pending().len(), 1);
    }

    #[test]
    fn should_leave_tasks_pending_without_candidates() {
        let mut state = state_with(vec![]);
        let now = Utc::now();
        let (id, _) = state.submit(request("research", Priority::Normal), now).unwrap();
        assert!(state.tick(now).is_empty());
        assert_eq!(state.task(&id).unwrap().status, TaskStatus::Pending);
        assert!(state.task(&id).unwrap().agent_id.is_none());
    }

    #[test]
    fn should_skip_thinking_agents() {
        let mut state = state_with(vec![coder("coder", 1)]);
        let now = Utc::now();
        state.set_thinking(&AgentId::new("coder"), true).unwrap();
        state.submit(request("code-help", Priority::Normal), now).unwrap();
        assert!(state.tick(now).is_empty());

        assert_eq!(state.set_thinking(&AgentId::new("coder"), false).unwrap(), AgentStatus::Idle);
        assert_eq!(state.tick(now).len(), 1);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // COMPLETION
    // ═══════════════════════════════════════════════════════════════════════

    #[test]
    fn should_account_completion_and_release_agent() {
        let mut state = state_with(vec![coder("coder", 1)]);
        let now = Utc::now();
        let (id, _) = state.submit(request("code-help", Priority::High), now).unwrap();
        state.tick(now);

        let (task, event) = state
            .complete(&id, TaskOutcome::success(json!({"answer": 42})), now + TimeDelta::milliseconds(120))
            .unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        let Payload::TaskCompleted(completed) = event.payload else {
            panic!("expected task_completed");
        };
        assert!(completed.success);
        assert_eq!(completed.duration_ms, 120);
        assert_eq!(completed.agent_id, "coder");

        let agent = state.agent(&AgentId::new("coder")).unwrap();
        assert_eq!(agent.status, AgentStatus::Idle);
        assert_eq!(agent.completed_tasks, 1);
        assert!((agent.metrics.success_rate - 1.0).abs() < f64::EPSILON);
        assert_eq!(state.task(&id).unwrap().status, TaskStatus::Completed);
        assert_eq!(state.snapshot().totals.completed, 1);
    }

    #[test]
    fn should_reject_second_completion() {
        let mut state = state_with(vec![coder("coder", 1)]);
        let now = Utc::now();
        let (id, _) = state.submit(request("code-help", Priority::High), now).unwrap();
        state.tick(now);
        state.complete(&id, TaskOutcome::failure("boom"), now).unwrap();

        let err = state.complete(&id, TaskOutcome::success(json!(1)), now).unwrap_err();
        assert!(matches!(err, SwarmError::TaskNotActive { status: TaskStatus::Failed, .. }));
        assert_eq!(state.agent(&AgentId::new("coder")).unwrap().failed_tasks, 1);
    }

    #[test]
    fn should_reject_completion_of_pending_or_unknown_task() {
        let mut state = state_with(vec![]);
        let now = Utc::now();
        let (id, _) = state.submit(request("code-help", Priority::High), now).unwrap();

        assert!(matches!(
            state.complete(&id, TaskOutcome::success(json!(1)), now),
            Err(SwarmError::TaskNotActive { status: TaskStatus::Pending, .. })
        ));
        assert!(matches!(
            state.complete(&TaskId::new("nope"), TaskOutcome::success(json!(1)), now),
            Err(SwarmError::TaskNotFound { .. })
        ));
    }

    // ═══════════════════════════════════════════════════════════════════════
    // LIFECYCLE
    // ═══════════════════════════════════════════════════════════════════════

    fn fail_tasks(state: &mut SwarmState, count: usize, now: DateTime<Utc>) {
        for _ in 0..count {
            let (id, _) = state.submit(request("code-help", Priority::Normal), now).unwrap();
            state.tick(now);
            state.complete(&id, TaskOutcome::failure("bad answer"), now).unwrap();
        }
    }

    #[test]
    fn should_retire_unhealthy_agent_only_after_it_drains() {
        let mut state = state_with(vec![coder("coder", 2)]);
        let now = Utc::now();
        fail_tasks(&mut state, 3, now);
        let (in_flight, _) = state.submit(request("code-help", Priority::Normal), now).unwrap();
        state.tick(now);

        let events = state.check_health(now);
        assert_eq!(topics(&events), [Topic::AgentUnhealthy, Topic::AgentRetiring]);
        let agent = state.agent(&AgentId::new("coder")).unwrap();
        assert_eq!(agent.status, AgentStatus::Retiring);

        // Still busy: not finalized, and no new work is assigned.
        assert!(state.poll_retirements(now).is_empty());
        state.submit(request("code-help", Priority::Normal), now).unwrap();
        assert!(state.tick(now).is_empty());
        assert!(state.check_health(now).is_empty(), "retirement is scheduled once");

        state.complete(&in_flight, TaskOutcome::success(json!(1)), now).unwrap();
        let events = state.poll_retirements(now);
        assert_eq!(topics(&events), [Topic::AgentRetired, Topic::AgentSpawned]);

        let old = state.agent(&AgentId::new("coder")).unwrap();
        assert_eq!(old.status, AgentStatus::Offline);
        assert!(old.retired_at.is_some());

        let replacement = state
            .live_agents()
            .find(|agent| agent.replaces == Some(AgentId::new("coder")))
            .unwrap();
        assert_eq!(replacement.status, AgentStatus::Idle);
        assert_eq!(replacement.completed_tasks, 0);
        assert_eq!(replacement.config.max_concurrent_tasks, 2);

        // The replacement picks up the waiting task.
        assert_eq!(state.tick(now).len(), 1);
    }

    #[test]
    fn should_force_retire_and_fail_in_flight_work() {
        let mut state = state_with(vec![coder("coder", 1)]);
        let now = Utc::now();
        let (id, _) = state.submit(request("code-help", Priority::Normal), now).unwrap();
        state.tick(now);

        let (replacement, events) = state
            .force_retire(&AgentId::new("coder"), "operator request", now)
            .unwrap();
        assert_eq!(
            topics(&events),
            [Topic::AgentRetiring, Topic::TaskCompleted, Topic::AgentRetired, Topic::AgentSpawned]
        );
        let task = state.task(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.as_deref().unwrap().contains("operator request"));
        assert_eq!(state.agent(&replacement).unwrap().status, AgentStatus::Idle);

        assert!(matches!(
            state.force_retire(&AgentId::new("coder"), "again", now),
            Err(SwarmError::AgentRetired { .. })
        ));
    }

    #[test]
    fn should_report_live_agents_in_snapshot() {
        let mut state = state_with(vec![coder("a", 1), coder("b", 1)]);
        let now = Utc::now();
        state.force_retire(&AgentId::new("a"), "test", now).unwrap();
        state.submit(request("code-help", Priority::Low), now).unwrap();

        let status = state.snapshot();
        assert_eq!(status.total_agents, 2);
        assert_eq!(status.retired_agents, 1);
        assert_eq!(status.pending_tasks, 1);
        assert_eq!(status.agents_by_status.get(&AgentStatus::Idle), Some(&2));
        assert!(status.agents.iter().all(|agent| agent.id != AgentId::new("a")));
    }

    #[test]
    fn should_keep_only_the_most_recent_retired_agents() {
        let config = SwarmConfig {
            retired_agent_capacity: 2,
            ..SwarmConfig::default()
        };
        let mut state = SwarmState::new(&config);
        let now = Utc::now();
        state.add_agent(coder("coder", 1), now).unwrap();

        let mut current = AgentId::new("coder");
        let mut retired = Vec::new();
        for _ in 0..4 {
            let (replacement, _) = state.force_retire(&current, "churn", now).unwrap();
            retired.push(current);
            current = replacement;
        }

        assert_eq!(state.snapshot().retired_agents, 2);
        assert_eq!(state.agents().count(), 3);
        assert!(state.agent(&retired[0]).is_none());
        assert!(state.agent(&retired[1]).is_none());
        assert!(state.agent(&retired[3]).is_some_and(SwarmAgent::is_retired));
        assert!(state.agent_health(&retired[0]).is_none());
        assert!(state.agent_health(&current).is_some());
    }

    #[test]
    fn should_report_no_health_for_unknown_agent() {
        let state = state_with(vec![coder("coder", 1)]);
        assert!(state.agent_health(&AgentId::new("coder")).is_some());
        assert!(state.agent_health(&AgentId::new("ghost")).is_none());
    }

    #[test]
    fn should_refuse_duplicate_agent_ids() {
        let mut state = state_with(vec![coder("a", 1)]);
        assert!(state.add_agent(coder("a", 1), Utc::now()).is_err());
    }
}
