pub mod coordinator;
pub mod task;

pub use coordinator::{COORDINATOR_ID, Coordinator, CoordinatorConfig};
pub use task::{Task, TaskInput, TaskStatus};
