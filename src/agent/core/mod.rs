pub mod base_agent;
pub mod runtime;

pub use base_agent::{AgentBehavior, BaseAgent};
pub use runtime::{AgentRuntime, RuntimeConfig};
