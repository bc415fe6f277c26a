//! Handle for driving a running swarm.
//!
//! `SwarmController` wraps the swarm actor's `ActorRef` and turns each
//! operation into an RPC with a timeout. It is cheap to clone and safe to
//! share between tasks.

use std::sync::Arc;
use std::time::Duration;

use ractor::concurrency::JoinHandle as ActorJoinHandle;
use ractor::rpc::CallResult;
use ractor::{Actor, ActorRef, RpcReplyPort};
use synapse_events::{Error as BusError, MessageBus, Payload, Topic, TopicPattern};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::actors::{SwarmActorDef, SwarmArguments, SwarmMessage};
use crate::agent::{AgentHealth, AgentId, AgentStatus};
use crate::config::SwarmConfig;
use crate::error::{Result, SwarmError};
use crate::state::SwarmStatus;
use crate::task::{AgentTask, TaskId, TaskOutcome, TaskRequest};

/// Default wait for an actor reply.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct SwarmController {
    actor: ActorRef<SwarmMessage>,
    bus: Arc<MessageBus>,
    rpc_timeout: Duration,
}

impl SwarmController {
    /// Spawn a swarm with default matching and no local executor.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the configuration is rejected, or
    /// `ActorUnavailable` if the actor fails to start.
    pub async fn spawn(config: SwarmConfig, bus: Arc<MessageBus>) -> Result<(Self, ActorJoinHandle<()>)> {
        Self::spawn_with(SwarmArguments::new(config, bus)).await
    }

    /// Spawn a swarm from full arguments.
    ///
    /// # Errors
    ///
    /// Same as [`SwarmController::spawn`].
    pub async fn spawn_with(args: SwarmArguments) -> Result<(Self, ActorJoinHandle<()>)> {
        args.config.validate()?;
        let bus = Arc::clone(&args.bus);
        let (actor, handle) = Actor::spawn(None, SwarmActorDef, args)
            .await
            .map_err(SwarmError::actor_unavailable)?;
        info!(actor_id = %actor.get_id(), "Swarm started");

        Ok((
            Self {
                actor,
                bus,
                rpc_timeout: DEFAULT_RPC_TIMEOUT,
            },
            handle,
        ))
    }

    #[must_use]
    pub const fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    pub const fn actor(&self) -> &ActorRef<SwarmMessage> {
        &self.actor
    }

    pub const fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    async fn call<T, F>(&self, build: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(RpcReplyPort<T>) -> SwarmMessage,
    {
        match self.actor.call(build, Some(self.rpc_timeout)).await {
            Ok(CallResult::Success(value)) => Ok(value),
            Ok(CallResult::Timeout) => Err(SwarmError::actor_unavailable("reply timed out")),
            Ok(CallResult::SenderError) => Err(SwarmError::actor_unavailable("reply channel dropped")),
            Err(e) => Err(SwarmError::actor_unavailable(e)),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // TASKS
    // ═══════════════════════════════════════════════════════════════════════

    /// Queue a task and return its id.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTask` for a blank task type.
    pub async fn submit_task(&self, request: TaskRequest) -> Result<TaskId> {
        self.call(|reply| SwarmMessage::Submit { request, reply }).await?
    }

    /// Look up a task, active or in history.
    ///
    /// # Errors
    ///
    /// Returns `ActorUnavailable` if the swarm does not answer.
    pub async fn get_task_status(&self, task_id: &TaskId) -> Result<Option<AgentTask>> {
        let task_id = task_id.clone();
        self.call(|reply| SwarmMessage::GetTask { task_id, reply }).await
    }

    /// Report the outcome of a processing task.
    ///
    /// # Errors
    ///
    /// Returns `TaskNotFound` or `TaskNotActive`.
    pub async fn complete_task(&self, task_id: &TaskId, outcome: TaskOutcome) -> Result<AgentTask> {
        let task_id = task_id.clone();
        self.call(|reply| SwarmMessage::Complete {
            task_id,
            outcome,
            reply,
        })
        .await?
    }

    // ═══════════════════════════════════════════════════════════════════════
    // AGENTS
    // ═══════════════════════════════════════════════════════════════════════

    /// Point-in-time view of the whole swarm.
    ///
    /// # Errors
    ///
    /// Returns `ActorUnavailable` if the swarm does not answer.
    pub async fn get_swarm_status(&self) -> Result<SwarmStatus> {
        self.call(|reply| SwarmMessage::GetStatus { reply }).await
    }

    /// Health of an agent, or `None` if the swarm does not know it.
    ///
    /// # Errors
    ///
    /// Returns `ActorUnavailable` if the swarm does not answer.
    pub async fn get_agent_health(&self, agent_id: &AgentId) -> Result<Option<AgentHealth>> {
        let agent_id = agent_id.clone();
        self.call(|reply| SwarmMessage::GetAgentHealth { agent_id, reply })
            .await
    }

    /// Retire an agent now, failing its in-flight tasks. Returns the
    /// replacement's id.
    ///
    /// # Errors
    ///
    /// Returns `AgentNotFound` or `AgentRetired`.
    pub async fn force_retire_agent(&self, agent_id: &AgentId, reason: impl Into<String>) -> Result<AgentId> {
        let agent_id = agent_id.clone();
        let reason = reason.into();
        self.call(|reply| SwarmMessage::ForceRetire {
            agent_id,
            reason,
            reply,
        })
        .await?
    }

    /// Toggle the thinking status of a working agent.
    ///
    /// # Errors
    ///
    /// Returns `AgentNotFound` or `InvalidAgentState`.
    pub async fn set_agent_thinking(&self, agent_id: &AgentId, thinking: bool) -> Result<AgentStatus> {
        let agent_id = agent_id.clone();
        self.call(|reply| SwarmMessage::SetThinking {
            agent_id,
            thinking,
            reply,
        })
        .await?
    }

    // ═══════════════════════════════════════════════════════════════════════
    // PERIODIC WORK
    // ═══════════════════════════════════════════════════════════════════════

    /// Run one scheduling pass. Returns the number of tasks started.
    ///
    /// # Errors
    ///
    /// Returns `ActorUnavailable` if the swarm does not answer.
    pub async fn tick(&self) -> Result<usize> {
        self.call(|reply| SwarmMessage::Tick { reply: Some(reply) }).await
    }

    /// Run one health pass. Returns the number of agents found unhealthy.
    ///
    /// # Errors
    ///
    /// Returns `ActorUnavailable` if the swarm does not answer.
    pub async fn check_health(&self) -> Result<usize> {
        self.call(|reply| SwarmMessage::CheckHealth { reply: Some(reply) })
            .await
    }

    /// Finalize drained retirements. Returns the number of agents retired.
    ///
    /// # Errors
    ///
    /// Returns `ActorUnavailable` if the swarm does not answer.
    pub async fn poll_retirements(&self) -> Result<usize> {
        self.call(|reply| SwarmMessage::PollRetirements { reply: Some(reply) })
            .await
    }

    /// Start the periodic timers. Calling it again is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `ActorUnavailable` if the actor is gone.
    pub fn start_timers(&self) -> Result<()> {
        self.actor
            .send_message(SwarmMessage::StartTimers)
            .map_err(SwarmError::actor_unavailable)
    }

    /// Feed `task_completed` messages from other nodes into the swarm,
    /// until `shutdown` flips to `true`.
    ///
    /// The swarm's own completions come back through the log too; those
    /// are skipped by source.
    pub async fn spawn_completion_listener(&self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let dispatcher = Arc::clone(self.bus.dispatcher());
        let own_node = self.bus.node_id().clone();
        let actor = self.actor.clone();
        let (subscriber_id, mut subscription) = dispatcher
            .subscribe_with_pattern(TopicPattern::ByTopic(Topic::TaskCompleted))
            .await;

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = subscription.recv() => match received {
                        Ok(message) => {
                            if message.source() == &own_node {
                                continue;
                            }
                            let Payload::TaskCompleted(completed) = message.payload().clone() else {
                                continue;
                            };
                            if actor.send_message(SwarmMessage::RemoteCompleted(completed)).is_err() {
                                debug!("Swarm actor gone, stopping completion listener");
                                break;
                            }
                        }
                        Err(BusError::Lagged { skipped }) => {
                            warn!(skipped, "Completion listener lagged behind the dispatcher");
                        }
                        Err(_) => break,
                    },
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            dispatcher.unsubscribe(&subscriber_id).await;
            debug!("Completion listener stopped");
        })
    }

    /// Stop the actor. Pending timers are cancelled.
    pub fn stop(&self, reason: Option<String>) {
        self.actor.stop(reason);
    }
}
