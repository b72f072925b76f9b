pub mod inbox;
pub mod message;
pub mod message_bus;
pub mod protocol;

pub use inbox::{InboxSender, MessageReceiver, inbox};
pub use message::{BROADCAST_ADDRESS, Message, MessageFilter, MessageType};
pub use message_bus::{MessageBus, MessageBusConfig, MessageBusStats};
