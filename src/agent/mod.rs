pub mod context;
pub mod core;
pub mod types;

pub use context::{AgentContext, PendingReply, ReplyRouter};
pub use self::core::{AgentBehavior, AgentRuntime, BaseAgent, RuntimeConfig};
pub use types::{AgentCapability, AgentLifecycleState, AgentState, AgentStatus, AgentType};
