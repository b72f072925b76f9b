pub mod agent_error;

use thiserror::Error as ThisError;

use crate::error::agent_error::AgentError;

#[derive(ThisError, Debug)]
pub enum Error {
    #[error("serde_json error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),

    #[error("agent error: {0}")]
    AgentError(#[from] AgentError),
}

impl Error {
    /// Shorthand for a specialist processing failure.
    pub fn execution(reason: impl Into<String>) -> Self {
        Error::AgentError(AgentError::ExecutionError(reason.into()))
    }
}

pub type Result<T> = core::result::Result<T, Error>;
