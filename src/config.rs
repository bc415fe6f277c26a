//! Daemon configuration: one TOML file, every section optional.

use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use synapse_core::telemetry::TelemetryConfig;
use synapse_events::{BusConfig, LogStoreConfig, RegistryConfig, TailConfig};

use orchestrator::SwarmConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SynapseConfig {
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub tail: TailConfig,
    #[serde(default)]
    pub log_store: LogStoreConfig,
    #[serde(default)]
    pub swarm: SwarmConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 7800))
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

impl SynapseConfig {
    /// Load from `path`, or use defaults when no path is given.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> synapse_core::Result<Self> {
        path.map_or_else(|| Ok(Self::default()), synapse_core::config::load_toml)
    }

    /// Validate every section.
    ///
    /// # Errors
    ///
    /// Returns the first section error found.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.registry.validate()?;
        self.bus.validate()?;
        self.tail.validate()?;
        self.log_store.validate()?;
        self.swarm.validate()?;
        Ok(())
    }
}
