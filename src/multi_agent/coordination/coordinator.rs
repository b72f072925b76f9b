use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::agent::types::AgentStatus;
use crate::multi_agent::communication::{
    Message, MessageBus, MessageReceiver, MessageType, protocol,
};
use crate::multi_agent::coordination::task::{Task, TaskStatus};

/// Bus id a [`Coordinator`] registers under unless told otherwise.
pub const COORDINATOR_ID: &str = "coordinator";

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// How long `gather_agent_status` waits for STATUS replies
    pub status_timeout_ms: u64,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            status_timeout_ms: 1_000,
        }
    }
}

impl CoordinatorConfig {
    pub fn status_timeout(&self) -> Duration {
        Duration::from_millis(self.status_timeout_ms)
    }
}

#[derive(Debug)]
struct Assignment {
    task: Task,
    agent_id: String,
    /// id of the TASK message, replies correlate to it
    message_id: String,
}

#[derive(Debug, Default)]
struct Ledger {
    assignments: HashMap<String, Assignment>,
    /// TASK message id -> task id
    by_message: HashMap<String, String>,
}

impl Ledger {
    /// True when `correlation_id` belongs to a task still waiting for its reply.
    fn awaits(&self, correlation_id: &str) -> bool {
        self.by_message
            .get(correlation_id)
            .and_then(|task_id| self.assignments.get(task_id))
            .is_some_and(|a| a.task.status() == &TaskStatus::InProgress)
    }
}

struct Mailbox {
    receiver: MessageReceiver,
    /// task replies that arrived while waiting for something else
    stash: HashMap<String, Arc<Message>>,
}

/// Assigns externally built [`Task`]s to agents and tracks them to a
/// terminal state.
///
/// The coordinator is not an agent: it has its own inbox on the bus and
/// reads it only while a caller waits for results or statuses. Waits are
/// serialized, a second caller blocks until the first is done; a status
/// gather holds the inbox from its first request on.
pub struct Coordinator {
    id: String,
    bus: Arc<MessageBus>,
    config: CoordinatorConfig,
    mailbox: Mutex<Mailbox>,
    ledger: RwLock<Ledger>,
    agent_status: RwLock<HashMap<String, AgentStatus>>,
}

impl Coordinator {
    pub async fn new(bus: Arc<MessageBus>, config: CoordinatorConfig) -> Self {
        Self::with_id(COORDINATOR_ID, bus, config).await
    }

    pub async fn with_id(
        id: impl Into<String>,
        bus: Arc<MessageBus>,
        config: CoordinatorConfig,
    ) -> Self {
        let id = id.into();
        let receiver = bus.register_agent(id.clone()).await;
        Self {
            id,
            bus,
            config,
            mailbox: Mutex::new(Mailbox {
                receiver,
                stash: HashMap::new(),
            }),
            ledger: RwLock::new(Ledger::default()),
            agent_status: RwLock::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Sends `task` to `agent_id`. On delivery the task is tracked and moves
    /// to `InProgress`; on failure it is dropped and false is returned.
    pub async fn assign(&self, mut task: Task, agent_id: &str) -> bool {
        if task.status() != &TaskStatus::Pending {
            warn!("Task {} is {}, not assigning it", task.id, task.status());
            return false;
        }

        let message = Message::new(
            self.id.clone(),
            agent_id,
            MessageType::Task,
            protocol::task_request(&task),
        );
        let message_id = message.id.clone();
        if !self.bus.send(message).await {
            warn!("Could not assign task {} to {}", task.id, agent_id);
            return false;
        }

        if let Err(e) = task.update_status(TaskStatus::InProgress) {
            warn!("Task {}: {}", task.id, e);
        }
        info!("Assigned task {} to {}", task.id, agent_id);

        let mut ledger = self.ledger.write().await;
        ledger.by_message.insert(message_id.clone(), task.id.clone());
        ledger.assignments.insert(
            task.id.clone(),
            Assignment {
                task,
                agent_id: agent_id.to_string(),
                message_id,
            },
        );
        true
    }

    /// Waits up to `timeout` for the given in-progress tasks.
    ///
    /// RESULT replies complete their task and are returned, ERROR replies
    /// fail it. Tasks without a reply by the deadline are marked failed and
    /// left out. Unknown or no longer in-progress ids are skipped.
    pub async fn wait_for_results(
        &self,
        task_ids: &[String],
        timeout: Duration,
    ) -> HashMap<String, Value> {
        let deadline = Instant::now() + timeout;
        let mut waiting: HashMap<String, String> = HashMap::new();
        {
            let ledger = self.ledger.read().await;
            for task_id in task_ids {
                match ledger.assignments.get(task_id) {
                    Some(a) if a.task.status() == &TaskStatus::InProgress => {
                        waiting.insert(a.message_id.clone(), task_id.clone());
                    }
                    Some(a) => debug!("Task {} is already {}", task_id, a.task.status()),
                    None => warn!("Task {} was never assigned", task_id),
                }
            }
        }

        let mut results = HashMap::new();
        let mut mailbox = self.mailbox.lock().await;

        let stashed: Vec<String> = waiting
            .keys()
            .filter(|id| mailbox.stash.contains_key(*id))
            .cloned()
            .collect();
        for message_id in stashed {
            if let (Some(task_id), Some(reply)) =
                (waiting.remove(&message_id), mailbox.stash.remove(&message_id))
            {
                self.settle(&task_id, &reply, &mut results).await;
            }
        }

        while !waiting.is_empty() {
            let Some(message) = Self::next_before(&mut mailbox, deadline).await else {
                break;
            };
            let claimed = message
                .correlation_id
                .as_ref()
                .and_then(|correlation_id| waiting.remove(correlation_id));
            match claimed {
                Some(task_id) => self.settle(&task_id, &message, &mut results).await,
                None => self.keep_for_later(&mut mailbox, message).await,
            }
        }
        drop(mailbox);

        if !waiting.is_empty() {
            let mut ledger = self.ledger.write().await;
            for task_id in waiting.values() {
                warn!("Task {} timed out", task_id);
                if let Some(a) = ledger.assignments.get_mut(task_id) {
                    let _ = a.task.update_status(TaskStatus::Failed("timed out".into()));
                }
            }
        }

        results
    }

    /// Asks every agent in `agent_ids` (all registered agents when `None`)
    /// for its status and caches the answers that arrive within the status
    /// timeout.
    pub async fn gather_agent_status(
        &self,
        agent_ids: Option<Vec<String>>,
    ) -> HashMap<String, AgentStatus> {
        let agent_ids = match agent_ids {
            Some(ids) => ids,
            None => self
                .bus
                .get_registered_agents()
                .await
                .into_iter()
                .filter(|id| id != &self.id)
                .collect(),
        };

        // held across the sends, so no other wait can read and discard the replies
        let mut mailbox = self.mailbox.lock().await;

        let requests = agent_ids.into_iter().map(|agent_id| {
            let request = Message::new(
                self.id.clone(),
                agent_id.clone(),
                MessageType::Request,
                protocol::status_request(),
            );
            let request_id = request.id.clone();
            async move { (agent_id, request_id, self.bus.send(request).await) }
        });

        let mut pending: HashMap<String, String> = HashMap::new();
        for (agent_id, request_id, sent) in join_all(requests).await {
            if sent {
                pending.insert(request_id, agent_id);
            } else {
                warn!("Could not ask {} for its status", agent_id);
            }
        }

        let deadline = Instant::now() + self.config.status_timeout();
        let mut statuses = HashMap::new();

        while !pending.is_empty() {
            let Some(message) = Self::next_before(&mut mailbox, deadline).await else {
                break;
            };
            let claimed = message
                .correlation_id
                .as_ref()
                .and_then(|correlation_id| pending.remove(correlation_id));
            let Some(agent_id) = claimed else {
                self.keep_for_later(&mut mailbox, message).await;
                continue;
            };

            match serde_json::from_value::<AgentStatus>(message.payload.clone()) {
                Ok(status) if message.message_type == MessageType::Status => {
                    statuses.insert(agent_id, status);
                }
                Ok(_) | Err(_) => warn!("Unusable status reply from {}: {}", agent_id, message),
            }
        }
        drop(mailbox);

        for agent_id in pending.values() {
            debug!("No status from {}", agent_id);
        }

        self.agent_status
            .write()
            .await
            .extend(statuses.iter().map(|(id, status)| (id.clone(), status.clone())));
        statuses
    }

    pub async fn get_task_status(&self, task_id: &str) -> Option<TaskStatus> {
        self.ledger
            .read()
            .await
            .assignments
            .get(task_id)
            .map(|a| a.task.status().clone())
    }

    pub async fn get_task(&self, task_id: &str) -> Option<Task> {
        self.ledger
            .read()
            .await
            .assignments
            .get(task_id)
            .map(|a| a.task.clone())
    }

    /// Agent a tracked task was assigned to
    pub async fn assigned_agent(&self, task_id: &str) -> Option<String> {
        self.ledger
            .read()
            .await
            .assignments
            .get(task_id)
            .map(|a| a.agent_id.clone())
    }

    /// Tracked tasks that are still pending or in progress.
    pub async fn get_active_tasks(&self) -> Vec<Task> {
        self.ledger
            .read()
            .await
            .assignments
            .values()
            .filter(|a| !a.task.status().is_terminal())
            .map(|a| a.task.clone())
            .collect()
    }

    /// Cancels a tracked task. False when it is unknown or already finished;
    /// a reply arriving later is ignored.
    pub async fn cancel(&self, task_id: &str) -> bool {
        let mut ledger = self.ledger.write().await;
        let Some(assignment) = ledger.assignments.get_mut(task_id) else {
            return false;
        };
        match assignment.task.update_status(TaskStatus::Cancelled) {
            Ok(()) => {
                info!("Cancelled task {}", task_id);
                true
            }
            Err(_) => false,
        }
    }

    /// Last status reported by `agent_id`.
    pub async fn agent_status(&self, agent_id: &str) -> Option<AgentStatus> {
        self.agent_status.read().await.get(agent_id).cloned()
    }

    /// Among agents with a cached status covering the task's required
    /// capabilities, the one with the lowest workload.
    pub async fn select_agent(&self, task: &Task) -> Option<String> {
        self.agent_status
            .read()
            .await
            .values()
            .filter(|status| status.covers(&task.required_capabilities))
            .min_by(|a, b| {
                a.workload
                    .total_cmp(&b.workload)
                    .then_with(|| a.agent_id.cmp(&b.agent_id))
            })
            .map(|status| status.agent_id.clone())
    }

    /// Removes the coordinator's inbox from the bus.
    pub async fn shutdown(&self) {
        self.bus.unregister(&self.id).await;
    }

    async fn next_before(mailbox: &mut Mailbox, deadline: Instant) -> Option<Arc<Message>> {
        tokio::time::timeout_at(deadline, mailbox.receiver.recv())
            .await
            .ok()
            .flatten()
    }

    async fn settle(&self, task_id: &str, reply: &Message, results: &mut HashMap<String, Value>) {
        let mut ledger = self.ledger.write().await;
        let Some(assignment) = ledger.assignments.get_mut(task_id) else {
            return;
        };

        match reply.message_type {
            MessageType::Result => {
                let result = reply.payload.get("result").cloned().unwrap_or(Value::Null);
                match assignment.task.complete(result.clone()) {
                    Ok(()) => {
                        info!("Received result for task {}", task_id);
                        results.insert(task_id.to_string(), result);
                    }
                    Err(_) => debug!("Ignoring late result for task {}", task_id),
                }
            }
            MessageType::Error => {
                let error = reply
                    .payload
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string();
                warn!("Task {} failed: {}", task_id, error);
                let _ = assignment.task.update_status(TaskStatus::Failed(error));
            }
            other => warn!("Unexpected {} reply for task {}", other, task_id),
        }
    }

    async fn keep_for_later(&self, mailbox: &mut Mailbox, message: Arc<Message>) {
        if let Some(correlation_id) = message.correlation_id.as_deref()
            && self.ledger.read().await.awaits(correlation_id)
        {
            mailbox.stash.insert(correlation_id.to_string(), message);
            return;
        }
        debug!("Discarding {}", message);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Map, json};

    use super::*;
    use crate::agent::types::{AgentCapability, AgentState};

    fn task(description: &str) -> Task {
        Task::new(description, "general", Map::new())
    }

    async fn answer(
        bus: &MessageBus,
        inbox: &mut MessageReceiver,
        message_type: MessageType,
        payload: Value,
    ) {
        let request = inbox.recv_timeout(Duration::from_secs(1)).await.unwrap();
        bus.send(request.reply(message_type, payload)).await;
    }

    #[tokio::test]
    async fn test_assign_and_collect_result() {
        let bus = Arc::new(MessageBus::default());
        let mut worker = bus.register_agent("worker").await;
        let coordinator = Coordinator::new(bus.clone(), CoordinatorConfig::default()).await;

        let t = task("Count words");
        let id = t.id.clone();
        assert!(coordinator.assign(t, "worker").await);
        assert_eq!(coordinator.get_task_status(&id).await, Some(TaskStatus::InProgress));
        assert_eq!(coordinator.assigned_agent(&id).await.as_deref(), Some("worker"));
        assert_eq!(coordinator.get_active_tasks().await.len(), 1);

        let payload = protocol::task_result(Some(id.clone()), json!(42));
        answer(&bus, &mut worker, MessageType::Result, payload).await;

        let results = coordinator.wait_for_results(&[id.clone()], Duration::from_secs(1)).await;
        assert_eq!(results.get(&id), Some(&json!(42)));
        assert_eq!(coordinator.get_task_status(&id).await, Some(TaskStatus::Completed));
        assert_eq!(coordinator.get_task(&id).await.unwrap().result, Some(json!(42)));
        assert!(coordinator.get_active_tasks().await.is_empty());
    }

    #[tokio::test]
    async fn test_assign_to_unknown_agent() {
        let bus = Arc::new(MessageBus::default());
        let coordinator = Coordinator::new(bus, CoordinatorConfig::default()).await;

        let t = task("Nobody home");
        let id = t.id.clone();
        assert!(!coordinator.assign(t, "ghost").await);
        assert_eq!(coordinator.get_task_status(&id).await, None);
    }

    #[tokio::test]
    async fn test_error_and_timeout_fail_tasks() {
        let bus = Arc::new(MessageBus::default());
        let mut worker = bus.register_agent("worker").await;
        let _silent = bus.register_agent("silent").await;
        let coordinator = Coordinator::new(bus.clone(), CoordinatorConfig::default()).await;

        let failing = task("Will fail");
        let failing_id = failing.id.clone();
        let stalled = task("Never answered");
        let stalled_id = stalled.id.clone();
        coordinator.assign(failing, "worker").await;
        coordinator.assign(stalled, "silent").await;

        let request = worker.recv().await.unwrap();
        bus.send(request.reply(MessageType::Error, protocol::error("disk full", &request.id)))
            .await;

        let results = coordinator
            .wait_for_results(&[failing_id.clone(), stalled_id.clone()], Duration::from_millis(200))
            .await;
        assert!(results.is_empty());
        assert_eq!(
            coordinator.get_task_status(&failing_id).await,
            Some(TaskStatus::Failed("disk full".into()))
        );
        assert_eq!(
            coordinator.get_task_status(&stalled_id).await,
            Some(TaskStatus::Failed("timed out".into()))
        );
    }

    #[tokio::test]
    async fn test_cancel_ignores_late_result() {
        let bus = Arc::new(MessageBus::default());
        let mut worker = bus.register_agent("worker").await;
        let coordinator = Coordinator::new(bus.clone(), CoordinatorConfig::default()).await;

        let t = task("Cancel me");
        let id = t.id.clone();
        coordinator.assign(t, "worker").await;

        assert!(coordinator.cancel(&id).await);
        assert!(!coordinator.cancel(&id).await);
        assert!(!coordinator.cancel("unknown").await);

        let payload = protocol::task_result(Some(id.clone()), json!("late"));
        answer(&bus, &mut worker, MessageType::Result, payload).await;
        let results = coordinator.wait_for_results(&[id.clone()], Duration::from_millis(100)).await;
        assert!(results.is_empty());
        assert_eq!(coordinator.get_task_status(&id).await, Some(TaskStatus::Cancelled));
    }

    #[tokio::test]
    async fn test_reply_for_other_task_is_kept() {
        let bus = Arc::new(MessageBus::default());
        let mut worker = bus.register_agent("worker").await;
        let coordinator = Coordinator::new(bus.clone(), CoordinatorConfig::default()).await;

        let first = task("first");
        let first_id = first.id.clone();
        let second = task("second");
        let second_id = second.id.clone();
        coordinator.assign(first, "worker").await;
        coordinator.assign(second, "worker").await;

        answer(&bus, &mut worker, MessageType::Result, protocol::task_result(None, json!(1))).await;
        answer(&bus, &mut worker, MessageType::Result, protocol::task_result(None, json!(2))).await;

        // waiting on the second consumes, and keeps, the first reply
        let second_results = coordinator
            .wait_for_results(&[second_id.clone()], Duration::from_secs(1))
            .await;
        assert_eq!(second_results.get(&second_id), Some(&json!(2)));

        let first_results = coordinator
            .wait_for_results(&[first_id.clone()], Duration::from_millis(50))
            .await;
        assert_eq!(first_results.get(&first_id), Some(&json!(1)));
    }

    #[tokio::test]
    async fn test_gather_status_and_select_agent() {
        let bus = Arc::new(MessageBus::default());
        let mut busy = bus.register_agent("busy").await;
        let mut idle = bus.register_agent("idle").await;
        let _mute = bus.register_agent("mute").await;
        let coordinator = Coordinator::new(
            bus.clone(),
            CoordinatorConfig {
                status_timeout_ms: 200,
            },
        )
        .await;

        let status = |id: &str, state: AgentState, workload: f32| AgentStatus {
            agent_id: id.to_string(),
            state,
            current_task: None,
            capabilities: vec![AgentCapability::Research],
            workload,
        };
        let busy_status = status("busy", AgentState::Busy, 0.5);
        let idle_status = status("idle", AgentState::Idle, 0.0);

        let responders = {
            let bus = bus.clone();
            tokio::spawn(async move {
                let payload = protocol::status_response(&busy_status);
                answer(&bus, &mut busy, MessageType::Status, payload).await;
                let payload = protocol::status_response(&idle_status);
                answer(&bus, &mut idle, MessageType::Status, payload).await;
            })
        };

        let statuses = coordinator.gather_agent_status(None).await;
        responders.await.unwrap();

        assert_eq!(statuses.len(), 2);
        assert!(statuses["idle"].is_idle());
        assert!(!statuses.contains_key("mute"));
        assert_eq!(coordinator.agent_status("busy").await.unwrap().workload, 0.5);

        let research = task("dig").requiring(AgentCapability::Research);
        assert_eq!(coordinator.select_agent(&research).await.as_deref(), Some("idle"));
        let writing = task("write").requiring(AgentCapability::Writing);
        assert_eq!(coordinator.select_agent(&writing).await, None);
    }

    #[tokio::test]
    async fn test_status_gather_waits_out_result_wait() {
        let bus = Arc::new(MessageBus::default());
        let _silent = bus.register_agent("silent").await;
        let mut peer = bus.register_agent("peer").await;
        let coordinator = Arc::new(
            Coordinator::new(
                bus.clone(),
                CoordinatorConfig {
                    status_timeout_ms: 1_000,
                },
            )
            .await,
        );

        let stalled = task("Never answered");
        let stalled_id = stalled.id.clone();
        assert!(coordinator.assign(stalled, "silent").await);

        let waiter = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .wait_for_results(&[stalled_id], Duration::from_millis(300))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let peer_status = AgentStatus {
            agent_id: "peer".into(),
            state: AgentState::Idle,
            current_task: None,
            capabilities: vec![AgentCapability::Analysis],
            workload: 0.0,
        };
        let responder = {
            let bus = bus.clone();
            tokio::spawn(async move {
                let payload = protocol::status_response(&peer_status);
                answer(&bus, &mut peer, MessageType::Status, payload).await;
            })
        };

        let statuses = coordinator
            .gather_agent_status(Some(vec!["peer".to_string()]))
            .await;
        responder.await.unwrap();

        assert!(waiter.await.unwrap().is_empty());
        assert_eq!(statuses.len(), 1);
        assert!(statuses["peer"].is_idle());
    }
}
