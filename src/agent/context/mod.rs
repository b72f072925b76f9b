use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::multi_agent::communication::{Message, MessageBus, MessageType, protocol};
use crate::multi_agent::coordination::task::TaskInput;

/// Correlation id -> waiting requester, for one agent.
///
/// The owning agent's message loop calls [`ReplyRouter::route`] on every
/// message it takes from the inbox, so replies reach the requester even
/// while the loop is busy with a task. Plain `std` mutex because
/// [`PendingReply`] has to deregister itself from `Drop`.
#[derive(Debug, Default)]
pub struct ReplyRouter {
    pending: Mutex<HashMap<String, oneshot::Sender<Arc<Message>>>>,
    /// set while a message loop is draining the inbox
    active: AtomicBool,
}

impl ReplyRouter {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, oneshot::Sender<Arc<Message>>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, correlation_id: String) -> oneshot::Receiver<Arc<Message>> {
        let (tx, rx) = oneshot::channel();
        self.lock().insert(correlation_id, tx);
        rx
    }

    fn forget(&self, correlation_id: &str) {
        self.lock().remove(correlation_id);
    }

    /// Hands `message` to whoever waits on its correlation id. Returns
    /// false when nobody does, the caller then treats it as a regular message.
    pub fn route(&self, message: &Arc<Message>) -> bool {
        let Some(correlation_id) = message.correlation_id.as_deref() else {
            return false;
        };
        let Some(waiter) = self.lock().remove(correlation_id) else {
            return false;
        };
        debug!("Routing {} to pending request {}", message, correlation_id);
        waiter.send(message.clone()).is_ok()
    }

    pub fn pending_count(&self) -> usize {
        self.lock().len()
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

/// Outstanding request; resolves with the first message correlated to it.
#[derive(Debug)]
pub struct PendingReply {
    correlation_id: String,
    recipient: String,
    rx: oneshot::Receiver<Arc<Message>>,
    router: Arc<ReplyRouter>,
}

impl PendingReply {
    /// Id of the request message.
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    pub async fn wait(self, timeout: Duration) -> Option<Arc<Message>> {
        self.wait_until(Instant::now() + timeout).await
    }

    /// Waits until `deadline`; `None` on timeout.
    pub async fn wait_until(mut self, deadline: Instant) -> Option<Arc<Message>> {
        match tokio::time::timeout_at(deadline, &mut self.rx).await {
            Ok(Ok(reply)) => Some(reply),
            _ => None,
        }
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        self.router.forget(&self.correlation_id);
    }
}

/// What an agent's behaviour gets to talk to the rest of the system.
#[derive(Debug, Clone)]
pub struct AgentContext {
    agent_id: String,
    bus: Arc<MessageBus>,
    replies: Arc<ReplyRouter>,
    request_timeout: Duration,
}

impl AgentContext {
    pub fn new(
        agent_id: impl Into<String>,
        bus: Arc<MessageBus>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            agent_id: agent_id.into(),
            bus,
            replies: Arc::new(ReplyRouter::default()),
            request_timeout,
        }
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn replies(&self) -> &Arc<ReplyRouter> {
        &self.replies
    }

    /// Default bound for waiting on a reply.
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Fire-and-forget send; false when `to` is unreachable.
    pub async fn send_message(
        &self,
        to: &str,
        payload: serde_json::Value,
        message_type: MessageType,
    ) -> bool {
        let message = Message::new(self.agent_id.clone(), to, message_type, payload);
        self.bus.send(message).await
    }

    /// Sends a message whose reply will be routed back to the returned
    /// handle. `None` when the message could not be delivered, or when no
    /// message loop is running to route the reply.
    pub async fn request(
        &self,
        to: &str,
        message_type: MessageType,
        payload: serde_json::Value,
    ) -> Option<PendingReply> {
        if !self.replies.is_active() {
            warn!(
                "Agent {} is not running, a reply from {} could never be received",
                self.agent_id, to
            );
            return None;
        }

        let message = Message::new(self.agent_id.clone(), to, message_type, payload);
        let pending = PendingReply {
            correlation_id: message.id.clone(),
            recipient: to.to_string(),
            rx: self.replies.register(message.id.clone()),
            router: self.replies.clone(),
        };

        // registered before sending so a fast reply cannot slip past
        if self.bus.send(message).await {
            Some(pending)
        } else {
            None
        }
    }

    /// Sends `task` as a TASK message to `to`.
    pub async fn request_task(&self, to: &str, task: &TaskInput) -> Option<PendingReply> {
        self.request(to, MessageType::Task, protocol::task_input(task)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_request_resolves_through_router() {
        let bus = Arc::new(MessageBus::default());
        let _own = bus.register_agent("asker").await;
        let mut peer = bus.register_agent("peer").await;
        let ctx = AgentContext::new("asker", bus.clone(), Duration::from_secs(1));
        ctx.replies().set_active(true);

        let pending = ctx
            .request("peer", MessageType::Request, serde_json::json!({"action": "ping"}))
            .await
            .unwrap();
        assert_eq!(ctx.replies().pending_count(), 1);

        let request = peer.recv().await.unwrap();
        let reply = Arc::new(
            request.reply(MessageType::Response, serde_json::json!({"pong": true})),
        );
        assert!(ctx.replies().route(&reply));

        let received = pending.wait(Duration::from_millis(100)).await.unwrap();
        assert_eq!(received.payload["pong"], true);
        assert_eq!(ctx.replies().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_timeout_forgets_pending_entry() {
        let bus = Arc::new(MessageBus::default());
        let _peer = bus.register_agent("peer").await;
        let ctx = AgentContext::new("asker", bus, Duration::from_secs(1));
        ctx.replies().set_active(true);

        let pending = ctx
            .request("peer", MessageType::Request, serde_json::json!({}))
            .await
            .unwrap();
        assert!(pending.wait(Duration::from_millis(20)).await.is_none());
        assert_eq!(ctx.replies().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_request_to_unknown_agent() {
        let bus = Arc::new(MessageBus::default());
        let ctx = AgentContext::new("asker", bus, Duration::from_secs(1));
        ctx.replies().set_active(true);

        assert!(ctx.request("nobody", MessageType::Task, serde_json::json!({})).await.is_none());
        assert_eq!(ctx.replies().pending_count(), 0);
    }

    #[tokio::test]
    async fn test_request_without_running_loop() {
        let bus = Arc::new(MessageBus::default());
        let _peer = bus.register_agent("peer").await;
        let ctx = AgentContext::new("asker", bus.clone(), Duration::from_secs(1));

        assert!(ctx.request("peer", MessageType::Task, serde_json::json!({})).await.is_none());
        assert!(bus.get_history(None, None).await.is_empty());
    }

    #[test]
    fn test_uncorrelated_message_is_not_routed() {
        let router = ReplyRouter::default();
        let msg = Arc::new(Message::new("a", "b", MessageType::Result, serde_json::json!({})));
        assert!(!router.route(&msg));
    }
}
