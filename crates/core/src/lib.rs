//! Core types shared by every Synapse crate.
//!
//! - [`Error`] / [`Result`]: configuration and I/O failures
//! - [`ResultExt`]: log-and-continue combinators for non-fatal paths
//! - [`config`]: TOML loading for embedding processes
//! - [`telemetry`]: tracing subscriber setup

pub mod config;
pub mod error;
pub mod result;
pub mod telemetry;

pub use error::Error;
pub use result::{Result, ResultExt};
