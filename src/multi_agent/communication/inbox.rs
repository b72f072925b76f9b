use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use crate::multi_agent::communication::message::Message;

/// Creates an unbounded FIFO inbox for `agent_id`.
///
/// The [`InboxSender`] is what gets registered on the bus; the
/// [`MessageReceiver`] stays with the owning agent and is the only way to
/// take messages out.
pub fn inbox(agent_id: impl Into<String>) -> (InboxSender, MessageReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        InboxSender { tx },
        MessageReceiver {
            agent_id: agent_id.into(),
            rx,
        },
    )
}

/// Enqueue-only handle to an agent inbox.
#[derive(Debug, Clone)]
pub struct InboxSender {
    tx: mpsc::UnboundedSender<Arc<Message>>,
}

impl InboxSender {
    /// Appends to the inbox; false when the owner has dropped its receiver.
    pub fn deliver(&self, message: Arc<Message>) -> bool {
        self.tx.send(message).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving end of an inbox, held by exactly one agent.
#[derive(Debug)]
pub struct MessageReceiver {
    pub agent_id: String,
    rx: mpsc::UnboundedReceiver<Arc<Message>>,
}

impl MessageReceiver {
    /// Next message in arrival order; `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<Arc<Message>> {
        let msg = self.rx.recv().await;
        if let Some(ref msg) = msg {
            debug!("Agent {} received {}", self.agent_id, msg);
        }
        msg
    }

    /// Waits at most `timeout` for the next message.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<Arc<Message>> {
        tokio::time::timeout(timeout, self.recv()).await.ok().flatten()
    }

    pub fn try_recv(&mut self) -> Option<Arc<Message>> {
        self.rx.try_recv().ok()
    }

    /// Removes everything currently queued without waiting.
    pub fn drain(&mut self) -> Vec<Arc<Message>> {
        let mut drained = Vec::new();
        while let Ok(msg) = self.rx.try_recv() {
            drained.push(msg);
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
