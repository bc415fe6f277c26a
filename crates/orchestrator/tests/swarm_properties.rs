//! Property tests for the swarm state machine under random operation sequences.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use chrono::{TimeDelta, Utc};
use orchestrator::{
    AgentConfig, AgentRole, SwarmConfig, SwarmState, TaskId, TaskOutcome, TaskRequest, TaskStatus,
};
use proptest::prelude::*;
use serde_json::json;
use synapse_events::Priority;

#[derive(Debug, Clone)]
enum Op {
    Submit { task_type: &'static str, priority: Priority },
    Tick,
    Complete { pick: usize, success: bool },
    CheckHealth,
    PollRetirements,
}

fn priority() -> impl Strategy<Value = Priority> {
    prop_oneof![
        Just(Priority::Low),
        Just(Priority::Normal),
        Just(Priority::High),
        Just(Priority::Critical),
    ]
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (prop::sample::select(vec!["code-help", "research", "writing", "unknown-kind"]), priority())
            .prop_map(|(task_type, priority)| Op::Submit { task_type, priority }),
        3 => Just(Op::Tick),
        3 => (any::<usize>(), any::<bool>()).prop_map(|(pick, success)| Op::Complete { pick, success }),
        1 => Just(Op::CheckHealth),
        1 => Just(Op::PollRetirements),
    ]
}

fn swarm() -> SwarmState {
    let mut state = SwarmState::new(&SwarmConfig::default());
    let now = Utc::now();
    for (role, max) in [(AgentRole::Code, 2), (AgentRole::Research, 1), (AgentRole::Coordination, 3)] {
        let config = AgentConfig::new(role, format!("{role} agent")).with_max_concurrent_tasks(max);
        state.add_agent(config, now).unwrap();
    }
    state
}

fn check_invariants(state: &SwarmState, submitted: &[TaskId]) -> Result<(), TestCaseError> {
    for id in submitted {
        let Some(task) = state.task(id) else {
            continue;
        };
        match task.status {
            TaskStatus::Pending => prop_assert!(task.agent_id.is_none(), "pending task {id} is bound"),
            TaskStatus::Processing => {
                let agent_id = task.agent_id.as_ref();
                prop_assert!(agent_id.is_some(), "processing task {id} is unbound");
                let agent = state.agent(agent_id.unwrap()).unwrap();
                prop_assert!(agent.current_tasks.contains(id));
                prop_assert!(task.start_time.is_some());
            }
            TaskStatus::Completed | TaskStatus::Failed => prop_assert!(task.end_time.is_some()),
        }
    }
    for agent in state.agents() {
        prop_assert!(agent.load() <= agent.config.max_concurrent_tasks);
        if agent.is_retired() {
            prop_assert!(agent.current_tasks.is_empty());
        }
    }
    let status = state.snapshot();
    let bound: usize = status.agents.iter().map(|agent| agent.load).sum();
    prop_assert_eq!(bound, status.processing_tasks);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn status_binding_and_capacity_hold_under_any_sequence(ops in prop::collection::vec(op(), 1..60)) {
        let mut state = swarm();
        let mut now = Utc::now();
        let mut submitted: Vec<TaskId> = Vec::new();

        for op in ops {
            now += TimeDelta::milliseconds(250);
            match op {
                Op::Submit { task_type, priority } => {
                    let request = TaskRequest::new(task_type, json!({})).with_priority(priority);
                    let (id, _) = state.submit(request, now).unwrap();
                    submitted.push(id);
                }
                Op::Tick => {
                    state.tick(now);
                }
                Op::Complete { pick, success } => {
                    let processing: Vec<TaskId> = submitted
                        .iter()
                        .filter(|id| state.task(id).is_some_and(|t| t.status == TaskStatus::Processing))
                        .cloned()
                        .collect();
                    if !processing.is_empty() {
                        let id = &processing[pick % processing.len()];
                        let outcome = if success {
                            TaskOutcome::success(json!("ok"))
                        } else {
                            TaskOutcome::failure("nope")
                        };
                        state.complete(id, outcome, now).unwrap();
                        prop_assert!(state.complete(id, TaskOutcome::failure("again"), now).is_err());
                    }
                }
                Op::CheckHealth => {
                    state.check_health(now);
                }
                Op::PollRetirements => {
                    state.poll_retirements(now);
                }
            }
            check_invariants(&state, &submitted)?;
        }

        let totals = state.snapshot().totals;
        prop_assert_eq!(totals.submitted, submitted.len() as u64);
        prop_assert!(totals.completed + totals.failed <= totals.submitted);
    }

    #[test]
    fn higher_priority_never_waits_behind_lower(priorities in prop::collection::vec(priority(), 1..20)) {
        let mut state = SwarmState::new(&SwarmConfig::default());
        let now = Utc::now();
        let config = AgentConfig::new(AgentRole::Code, "solo").with_max_concurrent_tasks(1);
        state.add_agent(config, now).unwrap();

        let mut ids = Vec::new();
        for priority in &priorities {
            let request = TaskRequest::new("code-help", json!({})).with_priority(*priority);
            ids.push((state.submit(request, now).unwrap().0, *priority));
        }

        let mut started: Vec<Priority> = Vec::new();
        for _ in 0..ids.len() {
            state.tick(now);
            let (id, priority) = ids
                .iter()
                .find(|(id, _)| state.task(id).is_some_and(|t| t.status == TaskStatus::Processing))
                .cloned()
                .unwrap();
            started.push(priority);
            state.complete(&id, TaskOutcome::success(json!(null)), now).unwrap();
        }

        for pair in started.windows(2) {
            prop_assert!(pair[0].rank() <= pair[1].rank(), "started {} before {}", pair[0], pair[1]);
        }
    }
}
