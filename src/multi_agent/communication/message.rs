use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Recipient used by [`Message::broadcast`]; the bus rewrites it per copy.
pub const BROADCAST_ADDRESS: &str = "*";

/// Message kinds exchanged over the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Work assignment, payload is a task request
    Task,
    /// Successful task outcome
    Result,
    /// Generic request, `action` selects the behaviour
    Request,
    /// Generic reply
    Response,
    /// Fan-out copy produced by the bus
    Broadcast,
    /// Agent status snapshot
    Status,
    /// Processing failure report
    Error,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageType::Task => "task",
            MessageType::Result => "result",
            MessageType::Request => "request",
            MessageType::Response => "response",
            MessageType::Broadcast => "broadcast",
            MessageType::Status => "status",
            MessageType::Error => "error",
        };
        f.write_str(name)
    }
}

/// Envelope delivered between agents.
///
/// Once handed to the bus a message is shared as `Arc<Message>` and is never
/// mutated again; the id assigned in [`Message::new`] is the one every reply
/// refers to through `correlation_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "message_id")]
    pub id: String,
    #[serde(rename = "from")]
    pub sender_id: String,
    #[serde(rename = "to")]
    pub receiver_id: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(rename = "content")]
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Message {
    pub fn new(
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
        message_type: MessageType,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            sender_id: sender_id.into(),
            receiver_id: receiver_id.into(),
            message_type,
            payload,
            correlation_id: None,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Message meant for [`MessageBus::broadcast`](super::MessageBus::broadcast).
    pub fn broadcast(sender_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::new(sender_id, BROADCAST_ADDRESS, MessageType::Broadcast, payload)
    }

    /// Builds the answer to this message: addresses swapped, correlated to `self.id`.
    pub fn reply(&self, message_type: MessageType, payload: serde_json::Value) -> Self {
        Self::new(
            self.receiver_id.clone(),
            self.sender_id.clone(),
            message_type,
            payload,
        )
        .with_correlation_id(self.id.clone())
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn is_broadcast(&self) -> bool {
        self.message_type == MessageType::Broadcast
    }

    /// True when `agent_id` sent or received this message.
    pub fn involves(&self, agent_id: &str) -> bool {
        self.sender_id == agent_id || self.receiver_id == agent_id
    }

    /// Whether this message answers the message with id `message_id`.
    pub fn answers(&self, message_id: &str) -> bool {
        self.correlation_id.as_deref() == Some(message_id)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short_id: String = self.id.chars().take(8).collect();
        write!(
            f,
            "Message(id={}..., from={}, to={}, type={})",
            short_id, self.sender_id, self.receiver_id, self.message_type
        )
    }
}

/// Predicate over messages, used for history queries.
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    pub sender_id: Option<String>,
    pub receiver_id: Option<String>,
    pub participant: Option<String>,
    pub message_types: Option<Vec<MessageType>>,
    pub correlation_id: Option<String>,
}

impl MessageFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_sender(mut self, sender_id: impl Into<String>) -> Self {
        self.sender_id = Some(sender_id.into());
        self
    }

    pub fn to_receiver(mut self, receiver_id: impl Into<String>) -> Self {
        self.receiver_id = Some(receiver_id.into());
        self
    }

    /// Matches messages sent or received by `agent_id`.
    pub fn involving(mut self, agent_id: impl Into<String>) -> Self {
        self.participant = Some(agent_id.into());
        self
    }

    pub fn with_types(mut self, types: Vec<MessageType>) -> Self {
        self.message_types = Some(types);
        self
    }

    pub fn correlated_to(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn matches(&self, message: &Message) -> bool {
        if let Some(ref sender) = self.sender_id
            && &message.sender_id != sender
        {
            return false;
        }

        if let Some(ref receiver) = self.receiver_id
            && &message.receiver_id != receiver
        {
            return false;
        }

        if let Some(ref participant) = self.participant
            && !message.involves(participant)
        {
            return false;
        }

        if let Some(ref types) = self.message_types
            && !types.contains(&message.message_type)
        {
            return false;
        }

        if let Some(ref correlation_id) = self.correlation_id
            && !message.answers(correlation_id)
        {
            return false;
        }

        true
    }
}
