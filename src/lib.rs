pub mod agent;
pub mod agents;
pub mod error;
pub mod multi_agent;
pub mod shared;

pub use error::{Error, Result};
