use std::fmt;

use serde::{Deserialize, Serialize};

/// Agent lifecycle. A stopped agent is never restarted; build a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentLifecycleState {
    Created,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for AgentLifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentLifecycleState::Created => write!(f, "created"),
            AgentLifecycleState::Running => write!(f, "running"),
            AgentLifecycleState::Stopping => write!(f, "stopping"),
            AgentLifecycleState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Agent kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AgentType {
    Manager,
    Research,
    Analyzer,
    Writer,
    Custom(&'static str),
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentType::Manager => write!(f, "manager"),
            AgentType::Research => write!(f, "research"),
            AgentType::Analyzer => write!(f, "analyzer"),
            AgentType::Writer => write!(f, "writer"),
            AgentType::Custom(name) => write!(f, "{}", name),
        }
    }
}

/// What an agent can do
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentCapability {
    Coordination,
    TaskDecomposition,
    Synthesis,
    Research,
    InformationGathering,
    Verification,
    Analysis,
    PatternDetection,
    Statistics,
    Visualization,
    Writing,
    ContentCreation,
    Summarization,
    Structuring,
    DataProcessing,
    Custom(String),
}

/// Processing state. Failures do not leave an error state behind, the
/// agent goes back to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    #[default]
    Idle,
    Busy,
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentState::Idle => write!(f, "idle"),
            AgentState::Busy => write!(f, "busy"),
        }
    }
}

/// Point-in-time view of an agent, rebuilt on every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatus {
    pub agent_id: String,
    pub state: AgentState,
    pub current_task: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<AgentCapability>,
    /// 0.0 when idle
    #[serde(default)]
    pub workload: f32,
}

impl AgentStatus {
    pub fn is_idle(&self) -> bool {
        self.state == AgentState::Idle
    }

    /// True when every capability in `required` is offered.
    pub fn covers<'a>(&self, required: impl IntoIterator<Item = &'a AgentCapability>) -> bool {
        required
            .into_iter()
            .all(|capability| self.capabilities.contains(capability))
    }
}
