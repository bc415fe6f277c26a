//! Swarm flows driven through the controller, with the bus on an in-memory log.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use orchestrator::actors::SwarmArguments;
use orchestrator::{
    AgentConfig, AgentId, AgentRole, AgentStatus, AgentTask, RosterEntry, SwarmConfig, SwarmController, SwarmError,
    TaskExecutor, TaskId, TaskOutcome, TaskRequest, TaskStatus,
};
use serde_json::json;
use synapse_events::{
    BusConfig, DurableLog, InMemoryLog, InMemoryOffsetStore, LogTailer, MessageBus, NeuralMessage, NodeId,
    NodeKind, NodeRegistration, NodeRegistry, NodeStatus, Payload, Priority, RegistryConfig, TailConfig,
    TaskCompleted, Topic,
};
use tokio::sync::watch;

// ═══════════════════════════════════════════════════════════════════════════
// HARNESS
// ═══════════════════════════════════════════════════════════════════════════

struct Harness {
    log: Arc<InMemoryLog>,
    bus: Arc<MessageBus>,
    tailer: LogTailer,
}

fn harness() -> Harness {
    let config = BusConfig::default();
    let log = InMemoryLog::new_arc("bus");
    let dispatcher = Arc::new(config.dispatcher());
    let registry = Arc::new(NodeRegistry::new(RegistryConfig::default()));
    let bus = Arc::new(MessageBus::new(
        config,
        Arc::clone(&log) as Arc<dyn DurableLog>,
        registry,
        Arc::clone(&dispatcher),
    ));
    let tailer = LogTailer::new(
        Arc::clone(&log) as Arc<dyn DurableLog>,
        Arc::new(InMemoryOffsetStore::new()),
        dispatcher,
        TailConfig::default(),
    );
    Harness { log, bus, tailer }
}

fn config_with(roster: Vec<RosterEntry>) -> SwarmConfig {
    SwarmConfig::default().with_roster(roster)
}

fn coder(max: usize) -> RosterEntry {
    RosterEntry::new(AgentRole::Code, "Code Assistant")
        .with_capability("code-help")
        .with_max_concurrent_tasks(max)
}

async fn only_agent(swarm: &SwarmController, role: AgentRole) -> AgentId {
    let status = swarm.get_swarm_status().await.unwrap();
    let ids: Vec<AgentId> = status
        .agents
        .iter()
        .filter(|agent| agent.role == role)
        .map(|agent| agent.id.clone())
        .collect();
    assert_eq!(ids.len(), 1, "expected exactly one live {role} agent");
    ids[0].clone()
}

async fn topics(log: &InMemoryLog) -> Vec<Topic> {
    log.read_after(None, usize::MAX)
        .await
        .unwrap()
        .iter()
        .map(|entry| entry.decode().unwrap().event())
        .collect()
}

async fn wait_for_status(swarm: &SwarmController, task_id: &TaskId, status: TaskStatus) -> AgentTask {
    for _ in 0..200 {
        if let Some(task) = swarm.get_task_status(task_id).await.unwrap() {
            if task.status == status {
                return task;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {task_id} never reached {status}");
}

// ═══════════════════════════════════════════════════════════════════════════
// SCHEDULING
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn should_run_code_help_request_end_to_end() {
    let h = harness();
    let (swarm, _handle) = SwarmController::spawn(config_with(vec![coder(1)]), Arc::clone(&h.bus))
        .await
        .unwrap();
    let agent_id = only_agent(&swarm, AgentRole::Code).await;

    let request = TaskRequest::new("code-help", json!({"question": "why does this borrow fail?"}))
        .with_priority(Priority::High)
        .with_correlation_id("req-1");
    let task_id = swarm.submit_task(request).await.unwrap();

    let pending = swarm.get_task_status(&task_id).await.unwrap().unwrap();
    assert_eq!(pending.status, TaskStatus::Pending);
    assert!(pending.agent_id.is_none());

    assert_eq!(swarm.tick().await.unwrap(), 1);
    let processing = swarm.get_task_status(&task_id).await.unwrap().unwrap();
    assert_eq!(processing.status, TaskStatus::Processing);
    assert_eq!(processing.agent_id.as_ref(), Some(&agent_id));
    assert!(processing.start_time.is_some());

    let done = swarm
        .complete_task(&task_id, TaskOutcome::success(json!({"answer": "move the clone"})))
        .await
        .unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert!(done.end_time.is_some());

    let status = swarm.get_swarm_status().await.unwrap();
    let agent = status.agents.iter().find(|a| a.id == agent_id).unwrap();
    assert_eq!(agent.status, AgentStatus::Idle);
    assert_eq!(agent.completed_tasks, 1);
    assert_eq!(agent.load, 0);
    assert_eq!(status.totals.completed, 1);

    let health = swarm.get_agent_health(&agent_id).await.unwrap().unwrap();
    assert!((health.accuracy - 1.0).abs() < f64::EPSILON);

    let log_topics = topics(&h.log).await;
    let task_topics: Vec<Topic> = log_topics
        .into_iter()
        .filter(|t| matches!(t, Topic::TaskSubmitted | Topic::TaskStarted | Topic::TaskCompleted))
        .collect();
    assert_eq!(task_topics, [Topic::TaskSubmitted, Topic::TaskStarted, Topic::TaskCompleted]);
}

#[tokio::test]
async fn should_start_highest_priority_first() {
    let h = harness();
    let (swarm, _handle) = SwarmController::spawn(config_with(vec![coder(1)]), Arc::clone(&h.bus))
        .await
        .unwrap();

    let mut ids = Vec::new();
    for priority in [Priority::Low, Priority::Critical, Priority::Normal, Priority::High] {
        let request = TaskRequest::new("code-help", json!({})).with_priority(priority);
        ids.push(swarm.submit_task(request).await.unwrap());
    }

    let mut order = Vec::new();
    for _ in 0..ids.len() {
        assert_eq!(swarm.tick().await.unwrap(), 1);
        let status = swarm.get_swarm_status().await.unwrap();
        assert_eq!(status.processing_tasks, 1);
        for id in &ids {
            let task = swarm.get_task_status(id).await.unwrap().unwrap();
            if task.status == TaskStatus::Processing {
                order.push(id.clone());
                swarm.complete_task(id, TaskOutcome::success(json!(null))).await.unwrap();
            }
        }
    }
    assert_eq!(order, [ids[1].clone(), ids[3].clone(), ids[2].clone(), ids[0].clone()]);
}

#[tokio::test]
async fn should_reject_blank_task_type() {
    let h = harness();
    let (swarm, _handle) = SwarmController::spawn(config_with(vec![coder(1)]), Arc::clone(&h.bus))
        .await
        .unwrap();

    let result = swarm.submit_task(TaskRequest::new("  ", json!({}))).await;
    assert!(matches!(result, Err(SwarmError::InvalidTask { .. })));
    assert_eq!(swarm.get_swarm_status().await.unwrap().totals.submitted, 0);
}

#[tokio::test]
async fn should_refuse_invalid_config_before_spawning() {
    let h = harness();
    let config = SwarmConfig {
        tick_interval_ms: 0,
        ..SwarmConfig::default()
    };
    let result = SwarmController::spawn(config, Arc::clone(&h.bus)).await;
    assert!(matches!(result, Err(SwarmError::InvalidConfig { .. })));
}

// ═══════════════════════════════════════════════════════════════════════════
// LIFECYCLE
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn should_replace_unhealthy_agent_after_in_flight_work_drains() {
    let h = harness();
    let (swarm, _handle) = SwarmController::spawn(config_with(vec![coder(2)]), Arc::clone(&h.bus))
        .await
        .unwrap();
    let old_id = only_agent(&swarm, AgentRole::Code).await;

    for _ in 0..3 {
        let id = swarm.submit_task(TaskRequest::new("code-help", json!({}))).await.unwrap();
        swarm.tick().await.unwrap();
        swarm.complete_task(&id, TaskOutcome::failure("wrong answer")).await.unwrap();
    }
    let in_flight = swarm.submit_task(TaskRequest::new("code-help", json!({}))).await.unwrap();
    assert_eq!(swarm.tick().await.unwrap(), 1);

    assert_eq!(swarm.check_health().await.unwrap(), 1);
    let health = swarm.get_agent_health(&old_id).await.unwrap().unwrap();
    assert!(health.health_score < 50.0);

    // Busy agents are never pulled offline.
    assert_eq!(swarm.poll_retirements().await.unwrap(), 0);
    let status = swarm.get_swarm_status().await.unwrap();
    let old = status.agents.iter().find(|a| a.id == old_id).unwrap();
    assert_eq!(old.status, AgentStatus::Retiring);
    assert!(old.retirement_scheduled);

    swarm
        .complete_task(&in_flight, TaskOutcome::success(json!("late but fine")))
        .await
        .unwrap();
    assert_eq!(swarm.poll_retirements().await.unwrap(), 1);

    let status = swarm.get_swarm_status().await.unwrap();
    assert_eq!(status.retired_agents, 1);
    assert!(status.agents.iter().all(|a| a.id != old_id));
    let replacement = status.agents.iter().find(|a| a.replaces.as_ref() == Some(&old_id)).unwrap();
    assert_eq!(replacement.status, AgentStatus::Idle);
    assert_eq!(replacement.max_concurrent_tasks, 2);

    let old_node = h.bus.registry().get(&old_id.node_id()).await.unwrap();
    assert_eq!(old_node.status, NodeStatus::Offline);
    assert!(h.bus.registry().get(&replacement.id.node_id()).await.is_some());

    let lifecycle: Vec<Topic> = topics(&h.log)
        .await
        .into_iter()
        .filter(|t| {
            matches!(
                t,
                Topic::AgentUnhealthy | Topic::AgentRetiring | Topic::AgentRetired | Topic::AgentSpawned
            )
        })
        .collect();
    assert_eq!(
        lifecycle,
        [
            Topic::AgentSpawned,
            Topic::AgentUnhealthy,
            Topic::AgentRetiring,
            Topic::AgentRetired,
            Topic::AgentSpawned
        ]
    );
}

#[tokio::test]
async fn should_force_retire_and_fail_in_flight_task() {
    let h = harness();
    let (swarm, _handle) = SwarmController::spawn(config_with(vec![coder(1)]), Arc::clone(&h.bus))
        .await
        .unwrap();
    let old_id = only_agent(&swarm, AgentRole::Code).await;
    let task_id = swarm.submit_task(TaskRequest::new("code-help", json!({}))).await.unwrap();
    swarm.tick().await.unwrap();

    let replacement = swarm.force_retire_agent(&old_id, "operator request").await.unwrap();
    assert_ne!(replacement, old_id);

    let task = swarm.get_task_status(&task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error.unwrap().contains("operator request"));

    let again = swarm.force_retire_agent(&old_id, "again").await;
    assert!(matches!(again, Err(SwarmError::AgentRetired { .. })));
    let unknown = swarm.force_retire_agent(&AgentId::new("agent-nobody"), "x").await;
    assert!(matches!(unknown, Err(SwarmError::AgentNotFound { .. })));

    assert!(swarm.get_agent_health(&replacement).await.unwrap().is_some());
    assert!(swarm.get_agent_health(&AgentId::new("agent-nobody")).await.unwrap().is_none());
}

#[tokio::test]
async fn should_toggle_thinking_and_keep_work_away() {
    let h = harness();
    let (swarm, _handle) = SwarmController::spawn(config_with(vec![coder(1)]), Arc::clone(&h.bus))
        .await
        .unwrap();
    let agent_id = only_agent(&swarm, AgentRole::Code).await;

    assert_eq!(swarm.set_agent_thinking(&agent_id, true).await.unwrap(), AgentStatus::Thinking);
    let task_id = swarm.submit_task(TaskRequest::new("code-help", json!({}))).await.unwrap();
    assert_eq!(swarm.tick().await.unwrap(), 0);

    assert_eq!(swarm.set_agent_thinking(&agent_id, false).await.unwrap(), AgentStatus::Idle);
    assert_eq!(swarm.tick().await.unwrap(), 1);
    let task = swarm.get_task_status(&task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Processing);
}

// ═══════════════════════════════════════════════════════════════════════════
// EXECUTION
// ═══════════════════════════════════════════════════════════════════════════

struct EchoExecutor;

#[async_trait]
impl TaskExecutor for EchoExecutor {
    async fn execute(&self, task: AgentTask, agent: AgentConfig) -> TaskOutcome {
        if task.task_type == "explode" {
            return TaskOutcome::failure("executor refused");
        }
        TaskOutcome::success(json!({"echo": task.input, "by": agent.name}))
    }
}

#[tokio::test]
async fn should_complete_tasks_through_local_executor() {
    let h = harness();
    let roster = vec![coder(2), RosterEntry::new(AgentRole::Coordination, "Coordinator")];
    let args = SwarmArguments::new(config_with(roster), Arc::clone(&h.bus)).with_executor(Arc::new(EchoExecutor));
    let (swarm, _handle) = SwarmController::spawn_with(args).await.unwrap();

    let ok = swarm.submit_task(TaskRequest::new("code-help", json!("fn main() {}"))).await.unwrap();
    let bad = swarm.submit_task(TaskRequest::new("explode", json!({}))).await.unwrap();
    assert_eq!(swarm.tick().await.unwrap(), 2);

    let ok = wait_for_status(&swarm, &ok, TaskStatus::Completed).await;
    assert_eq!(ok.result.unwrap()["by"], json!("Code Assistant"));
    let bad = wait_for_status(&swarm, &bad, TaskStatus::Failed).await;
    assert_eq!(bad.error.as_deref(), Some("executor refused"));

    let status = swarm.get_swarm_status().await.unwrap();
    assert_eq!(status.totals.completed, 1);
    assert_eq!(status.totals.failed, 1);
    assert_eq!(status.processing_tasks, 0);
}

// ═══════════════════════════════════════════════════════════════════════════
// REMOTE COMPLETION
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn should_apply_task_completed_from_another_node() {
    let h = harness();
    let (swarm, _handle) = SwarmController::spawn(config_with(vec![coder(1)]), Arc::clone(&h.bus))
        .await
        .unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let listener = swarm.spawn_completion_listener(shutdown_rx).await;

    // The worker runs the agent out of process, connected under its node id.
    let agent_id = only_agent(&swarm, AgentRole::Code).await;
    let worker_id = agent_id.node_id();
    let mut worker = h
        .bus
        .connect(NodeRegistration::new(worker_id.clone(), NodeKind::Agent))
        .await
        .unwrap();

    let request = TaskRequest::new("code-help", json!({"a": 40, "b": 2}))
        .with_priority(Priority::High)
        .with_correlation_id("req-remote");
    let task_id = swarm.submit_task(request).await.unwrap();
    swarm.tick().await.unwrap();

    let started = loop {
        let message = worker.try_recv().expect("task_started pushed to the worker");
        if let Payload::TaskStarted(started) = message.payload() {
            assert_eq!(message.correlation_id(), Some("req-remote"));
            break started.clone();
        }
    };
    assert_eq!(started.task_id, task_id.to_string());
    assert_eq!(started.agent_id, agent_id.to_string());
    assert_eq!(started.priority, Priority::High);

    let sum = started.input["a"].as_i64().unwrap() + started.input["b"].as_i64().unwrap();
    let completed = NeuralMessage::broadcast(
        worker_id.clone(),
        TaskCompleted {
            task_id: started.task_id.clone(),
            agent_id: started.agent_id.clone(),
            success: true,
            duration_ms: 42,
            result: Some(json!({"answer": sum})),
            error: None,
        },
    )
    .with_correlation_id("req-remote")
    .to_json()
    .unwrap();
    // Delivered twice: the duplicate must be ignored.
    h.bus.handle_frame(&worker_id, &completed).await.unwrap();
    h.bus.handle_frame(&worker_id, &completed).await.unwrap();
    h.tailer.catch_up().await.unwrap();

    let task = wait_for_status(&swarm, &task_id, TaskStatus::Completed).await;
    assert_eq!(task.result, Some(json!({"answer": 42})));

    let status = swarm.get_swarm_status().await.unwrap();
    assert_eq!(status.totals.completed, 1);

    shutdown_tx.send(true).unwrap();
    listener.await.unwrap();
}

#[tokio::test]
async fn should_ignore_completion_for_a_different_agent() {
    let h = harness();
    let (swarm, _handle) = SwarmController::spawn(config_with(vec![coder(1)]), Arc::clone(&h.bus))
        .await
        .unwrap();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let _listener = swarm.spawn_completion_listener(shutdown_rx).await;

    let task_id = swarm.submit_task(TaskRequest::new("code-help", json!({}))).await.unwrap();
    swarm.tick().await.unwrap();

    let completed = TaskCompleted {
        task_id: task_id.to_string(),
        agent_id: "agent-impostor".to_string(),
        success: false,
        duration_ms: 1,
        result: None,
        error: Some("not mine".to_string()),
    };
    h.bus
        .publish(NeuralMessage::broadcast(NodeId::new("worker-1"), completed))
        .await
        .unwrap();
    h.tailer.catch_up().await.unwrap();

    // A later query is ordered after the remote message in the actor mailbox.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let task = swarm.get_task_status(&task_id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Processing);
}
