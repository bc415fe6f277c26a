//! Task distribution for the swarm.
//!
//! - `PendingQueue`: priority bands, FIFO inside a band
//! - `CapabilityMatcher`: picks the agent for a task type
//!
//! # Example
//!
//! ```ignore
//! use orchestrator::distribution::{CapabilityMatcher, PendingQueue};
//! use synapse_events::Priority;
//!
//! let mut queue = PendingQueue::new();
//! queue.push(Priority::Low, "t1".into());
//! queue.push(Priority::Critical, "t2".into());
//! assert_eq!(queue.task_ids()[0].as_str(), "t2");
//!
//! let matcher = CapabilityMatcher::default();
//! let chosen = matcher.select("code-help", &candidates);
//! ```

mod matching;
mod queue;

pub use matching::{CapabilityMatcher, Match, MatchTier};
pub use queue::{PendingQueue, QueueKey};
