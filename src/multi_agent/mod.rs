pub mod communication;
pub mod coordination;

pub use communication::{Message, MessageBus, MessageBusConfig, MessageFilter, MessageType};
pub use coordination::{Coordinator, CoordinatorConfig, Task, TaskInput, TaskStatus};
