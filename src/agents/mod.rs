//! Built-in agents and the well-known ids the manager routes to.

pub mod analyzer_agent;
pub mod manager_agent;
pub mod research_agent;
pub mod writer_agent;

pub use analyzer_agent::AnalyzerAgent;
pub use manager_agent::{ManagerAgent, ManagerConfig};
pub use research_agent::{ResearchAgent, ResearchConfig};
pub use writer_agent::{WriterAgent, WriterConfig};

pub const MANAGER_AGENT_ID: &str = "manager";
pub const RESEARCH_AGENT_ID: &str = "research_agent";
pub const ANALYZER_AGENT_ID: &str = "analyzer_agent";
pub const WRITER_AGENT_ID: &str = "writer_agent";
