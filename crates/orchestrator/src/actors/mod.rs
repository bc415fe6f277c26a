//! Actor-based concurrency for the orchestrator.
//!
//! All swarm state is owned by one ractor actor:
//! - **Message passing**: callers talk to the actor, never to the state
//! - **Timers**: actor intervals drive ticks, health checks, retirement
//!   polls and presence
//! - **Graceful degradation**: business errors go back in RPC replies
//!
//! # Example
//!
//! ```ignore
//! use orchestrator::actors::{SwarmActorDef, SwarmArguments, SwarmMessage};
//! use ractor::Actor;
//!
//! let (actor, handle) = Actor::spawn(None, SwarmActorDef, SwarmArguments::new(config, bus)).await?;
//! actor.send_message(SwarmMessage::StartTimers)?;
//! ```

pub mod messages;
pub mod swarm;

pub use messages::SwarmMessage;
pub use swarm::{SwarmActorDef, SwarmActorState, SwarmArguments};
