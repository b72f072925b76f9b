use serde::{Deserialize, Serialize};
use tracing::Level;

use crate::agent::core::runtime::RuntimeConfig;
use crate::agents::{ManagerConfig, ResearchConfig, WriterConfig};
use crate::error::{Result, agent_error::AgentError};
use crate::multi_agent::communication::MessageBusConfig;
use crate::multi_agent::coordination::CoordinatorConfig;

/// Configuration for a whole agent system.
///
/// Every section falls back to its defaults when missing from the input.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub message_bus: MessageBusConfig,
    pub runtime: RuntimeConfig,
    pub manager: ManagerConfig,
    pub coordinator: CoordinatorConfig,
    pub research: ResearchConfig,
    pub writer: WriterConfig,
    pub log_level: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            message_bus: MessageBusConfig::default(),
            runtime: RuntimeConfig::default(),
            manager: ManagerConfig::default(),
            coordinator: CoordinatorConfig::default(),
            research: ResearchConfig::default(),
            writer: WriterConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl GlobalConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// `log_level` as a tracing level
    pub fn level(&self) -> Result<Level> {
        self.log_level.parse().map_err(|_| {
            AgentError::ParseError(format!("unknown log level '{}'", self.log_level)).into()
        })
    }
}
