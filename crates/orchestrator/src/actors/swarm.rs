//! SwarmActor - the single owner of all swarm state.
//!
//! Scheduling ticks, health checks, retirement polls, submissions,
//! completions and queries are all actor messages, handled one at a time.
//! Every event the state machine produces is published on the bus, and
//! agent spawns and retirements are mirrored into the node registry.

use std::sync::Arc;

use chrono::Utc;
use ractor::concurrency::JoinHandle;
use ractor::{Actor, ActorProcessingErr, ActorRef};
use synapse_core::ResultExt;
use synapse_events::{
    HealthCheck, MessageBus, NeuralMessage, NodeStatus, Payload, TaskCompleted, Topic,
};
use tracing::{debug, error, info, warn};

use crate::agent::{AgentStatus, SwarmAgent};
use crate::config::SwarmConfig;
use crate::distribution::CapabilityMatcher;
use crate::error::SwarmError;
use crate::executor::TaskExecutor;
use crate::state::{SwarmEvent, SwarmState};
use crate::task::{AgentTask, TaskId, TaskOutcome};

use super::messages::SwarmMessage;

/// The swarm actor definition.
#[derive(Clone, Copy, Default)]
pub struct SwarmActorDef;

/// Arguments passed to the actor on startup.
#[derive(Clone)]
pub struct SwarmArguments {
    pub config: SwarmConfig,
    pub bus: Arc<MessageBus>,
    pub executor: Option<Arc<dyn TaskExecutor>>,
    pub matcher: CapabilityMatcher,
}

impl SwarmArguments {
    pub fn new(config: SwarmConfig, bus: Arc<MessageBus>) -> Self {
        Self {
            config,
            bus,
            executor: None,
            matcher: CapabilityMatcher::default(),
        }
    }

    /// Run assigned tasks locally.
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn TaskExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    #[must_use]
    pub fn with_matcher(mut self, matcher: CapabilityMatcher) -> Self {
        self.matcher = matcher;
        self
    }
}

/// Actor state: the swarm plus its integration handles.
pub struct SwarmActorState {
    swarm: SwarmState,
    config: SwarmConfig,
    bus: Arc<MessageBus>,
    executor: Option<Arc<dyn TaskExecutor>>,
    timers: Vec<JoinHandle<()>>,
}

impl Actor for SwarmActorDef {
    type Msg = SwarmMessage;
    type State = SwarmActorState;
    type Arguments = SwarmArguments;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        args.config.validate()?;

        let mut swarm = SwarmState::new(&args.config).with_matcher(args.matcher);
        let spawned = swarm.spawn_roster(&args.config.roster, Utc::now())?;
        let state = SwarmActorState {
            swarm,
            config: args.config,
            bus: args.bus,
            executor: args.executor,
            timers: Vec::new(),
        };

        info!(agents = spawned.len(), "SwarmActor starting");
        Self::publish_all(&state, spawned).await;
        Ok(state)
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            // ═══════════════════════════════════════════════════════════════
            // TIMERS
            // ═══════════════════════════════════════════════════════════════
            SwarmMessage::StartTimers => Self::handle_start_timers(&myself, state),

            SwarmMessage::Tick { reply } => {
                let events = state.swarm.tick(Utc::now());
                let started = count_topic(&events, Topic::TaskStarted);
                Self::dispatch_executions(&myself, state, &events);
                Self::publish_all(state, events).await;
                if let Some(reply) = reply {
                    let _ = reply.send(started);
                }
            }

            SwarmMessage::CheckHealth { reply } => {
                let events = state.swarm.check_health(Utc::now());
                let unhealthy = count_topic(&events, Topic::AgentUnhealthy);
                Self::publish_all(state, events).await;
                if let Some(reply) = reply {
                    let _ = reply.send(unhealthy);
                }
            }

            SwarmMessage::PollRetirements { reply } => {
                let events = state.swarm.poll_retirements(Utc::now());
                let retired = count_topic(&events, Topic::AgentRetired);
                Self::publish_all(state, events).await;
                if let Some(reply) = reply {
                    let _ = reply.send(retired);
                }
            }

            SwarmMessage::Presence => Self::handle_presence(state).await,

            // ═══════════════════════════════════════════════════════════════
            // COMMANDS
            // ═══════════════════════════════════════════════════════════════
            SwarmMessage::ExecutionFinished { task_id, outcome } => {
                if let Err(e) = Self::handle_complete(state, &task_id, outcome).await {
                    warn!(task_id = %task_id, error = %e, "Dropping execution result");
                }
            }

            SwarmMessage::RemoteCompleted(completed) => {
                Self::handle_remote_completed(state, completed).await;
            }

            // ═══════════════════════════════════════════════════════════════
            // REQUESTS
            // ═══════════════════════════════════════════════════════════════
            SwarmMessage::Submit { request, reply } => {
                let result = match state.swarm.submit(request, Utc::now()) {
                    Ok((task_id, event)) => {
                        Self::publish_all(state, vec![event]).await;
                        Ok(task_id)
                    }
                    Err(e) => Err(e),
                };
                // Ignore send error - caller may have timed out
                let _ = reply.send(result);
            }

            SwarmMessage::Complete {
                task_id,
                outcome,
                reply,
            } => {
                let result = Self::handle_complete(state, &task_id, outcome).await;
                let _ = reply.send(result);
            }

            SwarmMessage::ForceRetire {
                agent_id,
                reason,
                reply,
            } => {
                let result = match state.swarm.force_retire(&agent_id, reason, Utc::now()) {
                    Ok((replacement, events)) => {
                        Self::publish_all(state, events).await;
                        Ok(replacement)
                    }
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }

            SwarmMessage::SetThinking {
                agent_id,
                thinking,
                reply,
            } => {
                let _ = reply.send(state.swarm.set_thinking(&agent_id, thinking));
            }

            SwarmMessage::GetTask { task_id, reply } => {
                let _ = reply.send(state.swarm.task(&task_id).cloned());
            }

            SwarmMessage::GetStatus { reply } => {
                let _ = reply.send(state.swarm.snapshot());
            }

            SwarmMessage::GetAgentHealth { agent_id, reply } => {
                let _ = reply.send(state.swarm.agent_health(&agent_id));
            }
        }

        Ok(())
    }

    async fn post_stop(
        &self,
        _myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        for timer in state.timers.drain(..) {
            timer.abort();
        }
        info!("SwarmActor stopping");
        Ok(())
    }
}

fn count_topic(events: &[SwarmEvent], topic: Topic) -> usize {
    events.iter().filter(|event| event.payload.topic() == topic).count()
}

// ═══════════════════════════════════════════════════════════════════════════
// Implementation
// ═══════════════════════════════════════════════════════════════════════════

impl SwarmActorDef {
    fn handle_start_timers(myself: &ActorRef<SwarmMessage>, state: &mut SwarmActorState) {
        if !state.timers.is_empty() {
            debug!("Swarm timers already running");
            return;
        }
        let config = &state.config;
        state.timers = vec![
            myself.send_interval(config.tick_interval(), || SwarmMessage::Tick { reply: None }),
            myself.send_interval(config.health_check_interval(), || SwarmMessage::CheckHealth { reply: None }),
            myself.send_interval(config.retirement_poll_interval(), || SwarmMessage::PollRetirements {
                reply: None,
            }),
            myself.send_interval(config.presence_interval(), || SwarmMessage::Presence),
        ];
        info!(
            tick_ms = config.tick_interval_ms,
            health_ms = config.health_check_interval_ms,
            retirement_ms = config.retirement_poll_interval_ms,
            "Swarm timers started"
        );
    }

    async fn handle_complete(
        state: &mut SwarmActorState,
        task_id: &TaskId,
        outcome: TaskOutcome,
    ) -> Result<AgentTask, SwarmError> {
        let (task, event) = state.swarm.complete(task_id, outcome, Utc::now())?;
        Self::publish_all(state, vec![event]).await;
        Ok(task)
    }

    /// Apply a completion reported by another node, if it matches the
    /// task's current binding. Duplicates are ignored.
    async fn handle_remote_completed(state: &mut SwarmActorState, completed: TaskCompleted) {
        let task_id = TaskId::new(completed.task_id);
        let bound = state
            .swarm
            .task(&task_id)
            .and_then(|task| task.agent_id.as_ref())
            .is_some_and(|agent_id| agent_id.as_str() == completed.agent_id);
        if !bound {
            debug!(task_id = %task_id, agent_id = %completed.agent_id, "Ignoring completion for unbound task");
            return;
        }

        let outcome = if completed.success {
            TaskOutcome::Success {
                result: completed.result,
            }
        } else {
            TaskOutcome::failure(completed.error.unwrap_or_else(|| "remote execution failed".to_string()))
        };
        match Self::handle_complete(state, &task_id, outcome).await {
            Ok(_) => debug!(task_id = %task_id, "Applied remote completion"),
            Err(SwarmError::TaskNotActive { .. }) => {
                debug!(task_id = %task_id, "Duplicate remote completion");
            }
            Err(e) => warn!(task_id = %task_id, error = %e, "Failed to apply remote completion"),
        }
    }

    /// Hand freshly started tasks to the local executor, if there is one.
    fn dispatch_executions(myself: &ActorRef<SwarmMessage>, state: &SwarmActorState, events: &[SwarmEvent]) {
        let Some(executor) = &state.executor else {
            return;
        };
        for event in events {
            let Payload::TaskStarted(started) = &event.payload else {
                continue;
            };
            let task_id = TaskId::new(started.task_id.clone());
            let Some(task) = state.swarm.task(&task_id).cloned() else {
                continue;
            };
            let Some(agent) = task
                .agent_id
                .as_ref()
                .and_then(|id| state.swarm.agent(id))
                .map(|agent| agent.config.clone())
            else {
                continue;
            };

            let executor = Arc::clone(executor);
            let actor = myself.clone();
            tokio::spawn(async move {
                let outcome = executor.execute(task, agent).await;
                if actor
                    .send_message(SwarmMessage::ExecutionFinished {
                        task_id: task_id.clone(),
                        outcome,
                    })
                    .is_err()
                {
                    debug!(task_id = %task_id, "Swarm actor gone before execution finished");
                }
            });
        }
    }

    /// Publish events in order, mirroring agent lifecycle into the registry.
    async fn publish_all(state: &SwarmActorState, events: Vec<SwarmEvent>) {
        for event in events {
            Self::mirror_presence(state, &event.payload).await;

            let mut message = NeuralMessage::broadcast(state.bus.node_id().clone(), event.payload);
            if let Some(correlation_id) = event.correlation_id {
                message = message.with_correlation_id(correlation_id);
            }
            let topic = message.event();
            if let Err(e) = state.bus.publish(message).await {
                error!(topic = %topic, error = %e, "Failed to publish swarm event");
            }
        }
    }

    async fn mirror_presence(state: &SwarmActorState, payload: &Payload) {
        match payload {
            Payload::AgentSpawned(spawned) => {
                let Some(agent) = state.swarm.agents().find(|a| a.id().as_str() == spawned.agent_id) else {
                    return;
                };
                let node = state.bus.registry().register(agent.config.registration()).await;
                let announcement = NeuralMessage::broadcast(node.id.clone(), node.registration_payload());
                state
                    .bus
                    .publish(announcement)
                    .await
                    .ok_logged("Failed to announce agent node");
            }
            Payload::AgentRetired(retired) => {
                let node_id = synapse_events::NodeId::new(retired.agent_id.clone());
                state
                    .bus
                    .registry()
                    .update_status(&node_id, NodeStatus::Offline)
                    .await
                    .ok_logged("Retired agent was not registered");
                let offline = NeuralMessage::broadcast(
                    node_id.clone(),
                    HealthCheck {
                        node_id,
                        status: NodeStatus::Offline,
                    },
                );
                state
                    .bus
                    .publish(offline)
                    .await
                    .ok_logged("Failed to announce agent retirement");
            }
            _ => {}
        }
    }

    async fn handle_presence(state: &SwarmActorState) {
        state
            .bus
            .announce_presence()
            .await
            .ok_logged("Failed to announce swarm presence");

        let registry = state.bus.registry();
        for agent in state.swarm.live_agents() {
            let node_id = agent.id().node_id();
            if registry.heartbeat(&node_id).await.is_err() {
                // Purged while quiet: register again.
                registry.register(agent.config.registration()).await;
            }
            registry
                .update_status(&node_id, node_status(agent))
                .await
                .ok_logged("Failed to update agent node status");
        }
    }
}

fn node_status(agent: &SwarmAgent) -> NodeStatus {
    match agent.status {
        AgentStatus::Busy | AgentStatus::Thinking => NodeStatus::Busy,
        AgentStatus::Offline => NodeStatus::Offline,
        AgentStatus::Idle | AgentStatus::Unhealthy | AgentStatus::Retiring => NodeStatus::Online,
    }
}
