use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::{
    agent::{
        context::AgentContext,
        types::{AgentCapability, AgentType},
    },
    error::Result,
    multi_agent::{communication::message::Message, coordination::task::TaskInput},
};

/// Behaviour every agent supplies; the runtime owns the loop and the bus I/O.
#[async_trait]
pub trait AgentBehavior: Send + Sync + 'static {
    /// Id the agent registers under on the bus
    fn get_id(&self) -> &str;

    fn get_type(&self) -> AgentType;

    fn get_capabilities(&self) -> &[AgentCapability];

    /// Handles one task and returns its result.
    ///
    /// Called by the runtime for TASK messages and safe to call directly.
    /// Failures are returned, never reported over the bus by the
    /// implementation itself.
    async fn process_task(&self, ctx: &AgentContext, task: TaskInput) -> Result<Value>;

    /// Hook for messages the runtime does not dispatch itself
    /// (non-status REQUESTs, STATUS, BROADCAST, RESPONSE, uncorrelated
    /// RESULT/ERROR). Ignores them by default.
    async fn handle_message(&self, ctx: &AgentContext, message: Arc<Message>) -> Result<()> {
        let _ = ctx;
        debug!("Agent {} ignoring {}", self.get_id(), message);
        Ok(())
    }
}

/// Identity shared by the built-in agents.
#[derive(Debug, Clone)]
pub struct BaseAgent {
    pub id: String,
    pub agent_type: AgentType,
    pub capabilities: Vec<AgentCapability>,
}

impl BaseAgent {
    pub fn new(
        id: impl Into<String>,
        agent_type: AgentType,
        capabilities: Vec<AgentCapability>,
    ) -> Self {
        Self {
            id: id.into(),
            agent_type,
            capabilities,
        }
    }

    /// Fresh `<type>-<uuid>` id, for agents that are not addressed by a well-known name.
    pub fn generate_id(agent_type: &AgentType) -> String {
        format!("{}-{}", agent_type, uuid::Uuid::new_v4().simple())
    }
}
