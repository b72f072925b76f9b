use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::multi_agent::communication::inbox::{InboxSender, MessageReceiver, inbox};
use crate::multi_agent::communication::message::{Message, MessageFilter, MessageType};

/// Message bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageBusConfig {
    /// Upper bound between two history scans in [`MessageBus::wait_for`]
    pub poll_interval_ms: u64,
}

impl Default for MessageBusConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
        }
    }
}

impl MessageBusConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Delivery counters
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MessageBusStats {
    pub total_messages: u64,
    pub p2p_messages: u64,
    pub broadcast_messages: u64,
    pub failed_deliveries: u64,
}

/// Everything the bus mutates, behind one lock.
///
/// History is append-only and unbounded for the lifetime of the bus (only
/// [`MessageBus::clear_history`] shrinks it); long-running processes are
/// expected to clear it themselves.
#[derive(Default)]
struct BusState {
    inboxes: HashMap<String, InboxSender>,
    history: Vec<Arc<Message>>,
    /// correlation id -> positions in `history`
    correlation_index: HashMap<String, Vec<usize>>,
    /// bumped by `clear_history` so waiters drop stale cursors
    epoch: u64,
    stats: MessageBusStats,
}

impl BusState {
    fn append(&mut self, message: Arc<Message>) {
        if let Some(ref correlation_id) = message.correlation_id {
            self.correlation_index
                .entry(correlation_id.clone())
                .or_default()
                .push(self.history.len());
        }
        self.history.push(message);
    }
}

/// Where a `wait_for` caller stopped scanning.
#[derive(Debug, Clone, Copy)]
struct ScanCursor {
    epoch: u64,
    scanned: usize,
}

/// Central router between agent inboxes.
pub struct MessageBus {
    state: RwLock<BusState>,
    /// history length after every append, wakes `wait_for` callers
    appended: watch::Sender<usize>,
    config: MessageBusConfig,
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(MessageBusConfig::default())
    }
}

impl MessageBus {
    pub fn new(config: MessageBusConfig) -> Self {
        let (appended, _) = watch::channel(0);
        Self {
            state: RwLock::new(BusState::default()),
            appended,
            config,
        }
    }

    pub fn config(&self) -> &MessageBusConfig {
        &self.config
    }

    /// Makes `agent_id` reachable through `inbox`, replacing any previous inbox.
    pub async fn register(&self, agent_id: impl Into<String>, inbox: InboxSender) {
        let agent_id = agent_id.into();
        let mut state = self.state.write().await;
        if state.inboxes.insert(agent_id.clone(), inbox).is_some() {
            warn!("Agent {} already registered, replacing inbox", agent_id);
        }
        info!("Agent {} registered to message bus", agent_id);
    }

    /// Creates an inbox, registers it and hands back the receiving end.
    pub async fn register_agent(&self, agent_id: impl Into<String>) -> MessageReceiver {
        let agent_id = agent_id.into();
        let (sender, receiver) = inbox(agent_id.clone());
        self.register(agent_id, sender).await;
        receiver
    }

    /// Removes the mapping for `agent_id`; unknown ids are ignored.
    pub async fn unregister(&self, agent_id: &str) {
        if self.state.write().await.inboxes.remove(agent_id).is_some() {
            info!("Agent {} unregistered from message bus", agent_id);
        }
    }

    /// Delivers `message` to `message.receiver_id`.
    ///
    /// Returns false, leaving history untouched, when the recipient is not
    /// registered or its inbox is closed. Lookup, enqueue and the history
    /// append happen under the same write lock, so a concurrent unregister
    /// either fully precedes or fully follows the delivery.
    pub async fn send(&self, message: Message) -> bool {
        let message = Arc::new(message);
        let mut state = self.state.write().await;

        let Some(inbox) = state.inboxes.get(&message.receiver_id) else {
            warn!("Agent {} not found, dropping {}", message.receiver_id, message);
            state.stats.failed_deliveries += 1;
            return false;
        };

        if !inbox.deliver(message.clone()) {
            warn!("Inbox of agent {} is closed, dropping {}", message.receiver_id, message);
            state.stats.failed_deliveries += 1;
            return false;
        }

        debug!(
            "Message sent: {} -> {} ({})",
            message.sender_id, message.receiver_id, message.message_type
        );
        state.append(message);
        state.stats.total_messages += 1;
        state.stats.p2p_messages += 1;
        let len = state.history.len();
        drop(state);

        self.appended.send_replace(len);
        true
    }

    /// Sends a BROADCAST copy of `message` to every registered agent except
    /// the sender and `exclude`. The original, not the copies, is recorded
    /// once in history. Returns the number of inboxes reached.
    pub async fn broadcast(&self, message: Message, exclude: &HashSet<String>) -> usize {
        let message = Arc::new(message);
        let mut state = self.state.write().await;
        let mut delivered = 0;
        let mut failed = 0;

        for (agent_id, inbox) in &state.inboxes {
            if agent_id == &message.sender_id || exclude.contains(agent_id) {
                continue;
            }

            let mut copy = Message::new(
                message.sender_id.clone(),
                agent_id.clone(),
                MessageType::Broadcast,
                message.payload.clone(),
            );
            copy.metadata = message.metadata.clone();

            if inbox.deliver(Arc::new(copy)) {
                delivered += 1;
            } else {
                warn!("Inbox of agent {} is closed, skipping broadcast copy", agent_id);
                failed += 1;
            }
        }

        debug!("Broadcast from {} to {} agents", message.sender_id, delivered);
        state.append(message);
        state.stats.total_messages += 1;
        state.stats.broadcast_messages += 1;
        state.stats.failed_deliveries += failed;
        let len = state.history.len();
        drop(state);

        self.appended.send_replace(len);
        delivered
    }

    /// Messages sent or received by `agent_id` (all when `None`), oldest
    /// first, trimmed to the last `limit`.
    pub async fn get_history(
        &self,
        agent_id: Option<&str>,
        limit: Option<usize>,
    ) -> Vec<Arc<Message>> {
        let state = self.state.read().await;
        let mut history: Vec<Arc<Message>> = match agent_id {
            Some(agent_id) => state
                .history
                .iter()
                .filter(|msg| msg.involves(agent_id))
                .cloned()
                .collect(),
            None => state.history.clone(),
        };
        drop(state);

        if let Some(limit) = limit
            && history.len() > limit
        {
            history.drain(..history.len() - limit);
        }
        history
    }

    pub async fn get_history_filtered(&self, filter: &MessageFilter) -> Vec<Arc<Message>> {
        self.state
            .read()
            .await
            .history
            .iter()
            .filter(|msg| filter.matches(msg))
            .cloned()
            .collect()
    }

    /// Polls history for the newest message sent by `agent_id`, optionally
    /// answering `correlation_id`. Gives up after `timeout`.
    ///
    /// Correlated waits use the correlation index; uncorrelated waits only
    /// rescan what was appended since the previous tick. Between ticks the
    /// caller sleeps until the next append or `poll_interval`, whichever
    /// comes first.
    pub async fn wait_for(
        &self,
        agent_id: &str,
        correlation_id: Option<&str>,
        timeout: Duration,
    ) -> Option<Arc<Message>> {
        let deadline = Instant::now() + timeout;
        let mut appended = self.appended.subscribe();
        let mut cursor: Option<ScanCursor> = None;

        loop {
            let _ = appended.borrow_and_update();
            if let Some(found) = self.scan_history(agent_id, correlation_id, &mut cursor).await {
                return Some(found);
            }

            let now = Instant::now();
            if now >= deadline {
                debug!("Timed out waiting for message from {}", agent_id);
                return None;
            }

            let nap = self.config.poll_interval().min(deadline - now);
            let _ = tokio::time::timeout(nap, appended.changed()).await;
        }
    }

    async fn scan_history(
        &self,
        agent_id: &str,
        correlation_id: Option<&str>,
        cursor: &mut Option<ScanCursor>,
    ) -> Option<Arc<Message>> {
        let state = self.state.read().await;

        if let Some(correlation_id) = correlation_id {
            return state
                .correlation_index
                .get(correlation_id)?
                .iter()
                .rev()
                .map(|&pos| &state.history[pos])
                .find(|msg| msg.sender_id == agent_id)
                .cloned();
        }

        let start = match *cursor {
            Some(c) if c.epoch == state.epoch => c.scanned.min(state.history.len()),
            _ => 0,
        };
        *cursor = Some(ScanCursor {
            epoch: state.epoch,
            scanned: state.history.len(),
        });

        state.history[start..]
            .iter()
            .rev()
            .find(|msg| msg.sender_id == agent_id)
            .cloned()
    }

    pub async fn clear_history(&self) {
        let mut state = self.state.write().await;
        state.history.clear();
        state.correlation_index.clear();
        state.epoch += 1;
        drop(state);

        self.appended.send_replace(0);
        info!("Message history cleared");
    }

    pub async fn get_registered_agents(&self) -> Vec<String> {
        self.state.read().await.inboxes.keys().cloned().collect()
    }

    pub async fn is_registered(&self, agent_id: &str) -> bool {
        self.state.read().await.inboxes.contains_key(agent_id)
    }

    pub async fn get_stats(&self) -> MessageBusStats {
        self.state.read().await.stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(from: &str, to: &str) -> Message {
        Message::new(from, to, MessageType::Task, serde_json::json!({"task": "test"}))
    }

    #[tokio::test]
    async fn test_message_bus_registration() {
        let bus = MessageBus::default();

        let receiver = bus.register_agent("agent1").await;
        assert_eq!(receiver.agent_id, "agent1");

        let agents = bus.get_registered_agents().await;
        assert_eq!(agents, vec!["agent1".to_string()]);
    }

    #[tokio::test]
    async fn test_register_twice_replaces_inbox() {
        let bus = MessageBus::default();
        let (first_tx, mut first_rx) = inbox("agent1");
        let (second_tx, mut second_rx) = inbox("agent1");

        bus.register("agent1", first_tx).await;
        bus.register("agent1", second_tx).await;
        assert_eq!(bus.get_registered_agents().await.len(), 1);

        assert!(bus.send(task("agent2", "agent1")).await);
        assert!(first_rx.try_recv().is_none());
        assert!(second_rx.try_recv().is_some());
    }

    #[tokio::test]
    async fn test_unregister_unknown_is_noop() {
        let bus = MessageBus::default();
        bus.unregister("ghost").await;
        assert!(bus.get_registered_agents().await.is_empty());
    }

    #[tokio::test]
    async fn test_p2p_messaging_delivers_same_message() {
        let bus = MessageBus::default();
        let mut receiver = bus.register_agent("agent1").await;

        assert!(bus.send(task("agent2", "agent1")).await);

        let received = receiver.recv().await.unwrap();
        let history = bus.get_history(None, None).await;
        assert_eq!(history.len(), 1);
        assert!(Arc::ptr_eq(&received, &history[0]));
        assert_eq!(received.sender_id, "agent2");
    }

    #[tokio::test]
    async fn test_send_to_unknown_agent() {
        let bus = MessageBus::default();
        let _receiver = bus.register_agent("agent1").await;

        assert!(!bus.send(task("agent1", "nobody")).await);
        assert!(bus.get_history(None, None).await.is_empty());
        assert_eq!(bus.get_stats().await.failed_deliveries, 1);
    }

    #[tokio::test]
    async fn test_send_after_unregister_fails() {
        let bus = MessageBus::default();
        let _receiver = bus.register_agent("agent1").await;
        bus.unregister("agent1").await;

        assert!(!bus.send(task("agent2", "agent1")).await);
    }

    #[tokio::test]
    async fn test_send_to_dropped_receiver() {
        let bus = MessageBus::default();
        drop(bus.register_agent("agent1").await);

        assert!(!bus.send(task("agent2", "agent1")).await);
        assert!(bus.get_history(None, None).await.is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_messaging() {
        let bus = MessageBus::default();
        let mut master = bus.register_agent("master").await;
        let mut receiver1 = bus.register_agent("agent1").await;
        let mut receiver2 = bus.register_agent("agent2").await;
        let mut receiver3 = bus.register_agent("agent3").await;

        let msg = Message::broadcast("master", serde_json::json!({"status": "ready"}))
            .with_metadata("round", serde_json::json!(7));
        let original_id = msg.id.clone();
        let exclude: HashSet<String> = ["agent3".to_string(), "unknown".to_string()].into();

        let count = bus.broadcast(msg, &exclude).await;
        assert_eq!(count, 2);

        let received1 = receiver1.recv().await.unwrap();
        let received2 = receiver2.recv().await.unwrap();
        assert!(master.try_recv().is_none());
        assert!(receiver3.try_recv().is_none());

        assert_eq!(received1.sender_id, "master");
        assert_eq!(received1.receiver_id, "agent1");
        assert_eq!(received2.receiver_id, "agent2");
        assert!(received1.is_broadcast());
        assert_eq!(received1.payload["status"], "ready");
        assert_eq!(received1.metadata["round"], 7);

        let history = bus.get_history(None, None).await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].id, original_id);
    }

    #[tokio::test]
    async fn test_history_filter_and_limit() {
        let bus = MessageBus::default();
        let _a = bus.register_agent("a").await;
        let _b = bus.register_agent("b").await;
        let _c = bus.register_agent("c").await;

        bus.send(task("a", "b")).await;
        bus.send(task("b", "c")).await;
        bus.send(task("c", "a")).await;
        bus.send(task("b", "a")).await;

        let for_c = bus.get_history(Some("c"), None).await;
        assert_eq!(for_c.len(), 2);
        assert_eq!(for_c[0].sender_id, "b");
        assert_eq!(for_c[1].sender_id, "c");

        let last_two = bus.get_history(None, Some(2)).await;
        assert_eq!(last_two.len(), 2);
        assert_eq!(last_two[0].sender_id, "c");
        assert_eq!(last_two[1].sender_id, "b");

        let filtered = bus
            .get_history_filtered(&MessageFilter::new().from_sender("b"))
            .await;
        assert_eq!(filtered.len(), 2);
    }

    #[tokio::test]
    async fn test_wait_for_existing_message() {
        let bus = MessageBus::default();
        let _a = bus.register_agent("a").await;
        let _b = bus.register_agent("b").await;

        let request = task("a", "b");
        let reply = request.reply(MessageType::Result, serde_json::json!({"n": 1}));
        bus.send(request.clone()).await;
        bus.send(reply).await;

        let found = bus
            .wait_for("b", Some(&request.id), Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(found.payload["n"], 1);

        let newest = bus.wait_for("a", None, Duration::ZERO).await.unwrap();
        assert_eq!(newest.id, request.id);
    }

    #[tokio::test]
    async fn test_wait_for_message_sent_later() {
        let bus = Arc::new(MessageBus::default());
        let _a = bus.register_agent("a").await;
        let _b = bus.register_agent("b").await;

        let request = task("a", "b");
        let request_id = request.id.clone();
        bus.send(request.clone()).await;

        let sender = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            sender.send(task("b", "a")).await;
            sender
                .send(request.reply(MessageType::Result, serde_json::json!({"late": true})))
                .await;
        });

        let found = bus
            .wait_for("b", Some(&request_id), Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(found.payload["late"], true);
    }

    #[tokio::test]
    async fn test_wait_for_times_out() {
        let bus = MessageBus::default();
        let started = Instant::now();

        let found = bus.wait_for("silent", Some("nope"), Duration::from_millis(200)).await;

        assert!(found.is_none());
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_millis(200) + bus.config().poll_interval() * 3);
    }

    #[tokio::test]
    async fn test_clear_history() {
        let bus = MessageBus::default();
        let _b = bus.register_agent("b").await;
        bus.send(task("a", "b")).await;

        bus.clear_history().await;

        assert!(bus.get_history(None, None).await.is_empty());
        assert!(bus.wait_for("a", None, Duration::ZERO).await.is_none());
        assert_eq!(bus.get_stats().await.total_messages, 1);
    }
}
