#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("execution failed: {0}")]
    ExecutionError(String),

    #[error("invalid task state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("agent {agent_id} cannot {action} while {state}")]
    InvalidLifecycle {
        agent_id: String,
        action: &'static str,
        state: String,
    },

    #[error("parse error: {0}")]
    ParseError(String),
}
