use std::any::Any;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::{
    agent::{
        context::AgentContext,
        core::base_agent::AgentBehavior,
        types::{AgentLifecycleState, AgentState, AgentStatus},
    },
    error::{Error, Result, agent_error::AgentError},
    multi_agent::{
        communication::{Message, MessageBus, MessageReceiver, MessageType, protocol},
        coordination::task::TaskInput,
    },
};

/// Workload reported while at least one task is running.
const BUSY_WORKLOAD: f32 = 0.5;

/// Agent runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Longest the loop blocks on an empty inbox before re-checking for stop
    pub recv_timeout_ms: u64,
    /// Default wait for correlated replies to requests made by the agent
    pub request_timeout_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            recv_timeout_ms: 500,
            request_timeout_ms: 10_000,
        }
    }
}

impl RuntimeConfig {
    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Default)]
struct Activity {
    /// ids of the tasks being processed, in start order
    running: Vec<String>,
}

impl Activity {
    fn begin(&mut self, task_id: String) {
        self.running.push(task_id);
    }

    fn finish(&mut self, task_id: &str) {
        if let Some(pos) = self.running.iter().position(|id| id == task_id) {
            self.running.remove(pos);
        }
    }

    fn is_busy(&self) -> bool {
        !self.running.is_empty()
    }

    /// Most recently started task that is still running.
    fn current_task(&self) -> Option<String> {
        self.running.last().cloned()
    }
}

async fn snapshot<B: AgentBehavior>(behavior: &B, activity: &RwLock<Activity>) -> AgentStatus {
    let activity = activity.read().await;
    let busy = activity.is_busy();
    AgentStatus {
        agent_id: behavior.get_id().to_string(),
        state: if busy { AgentState::Busy } else { AgentState::Idle },
        current_task: activity.current_task(),
        capabilities: behavior.get_capabilities().to_vec(),
        workload: if busy { BUSY_WORKLOAD } else { 0.0 },
    }
}

/// Hosts one [`AgentBehavior`]: inbox registration, message loop, lifecycle.
///
/// A runtime goes `Created -> Running -> Stopping -> Stopped` exactly once;
/// build a new one to run the agent again. Stopping abandons a task that
/// is still being processed: no RESULT or ERROR is sent for it.
pub struct AgentRuntime<B: AgentBehavior> {
    behavior: Arc<B>,
    ctx: AgentContext,
    config: RuntimeConfig,
    activity: Arc<RwLock<Activity>>,
    lifecycle: RwLock<AgentLifecycleState>,
    stop_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<B: AgentBehavior> AgentRuntime<B> {
    pub fn new(behavior: B, bus: Arc<MessageBus>, config: RuntimeConfig) -> Self {
        let ctx = AgentContext::new(behavior.get_id(), bus, config.request_timeout());
        let (stop_tx, _) = watch::channel(false);
        Self {
            behavior: Arc::new(behavior),
            ctx,
            config,
            activity: Arc::new(RwLock::new(Activity::default())),
            lifecycle: RwLock::new(AgentLifecycleState::Created),
            stop_tx,
            handle: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &str {
        self.ctx.agent_id()
    }

    pub fn behavior(&self) -> &Arc<B> {
        &self.behavior
    }

    pub fn context(&self) -> &AgentContext {
        &self.ctx
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub async fn lifecycle_state(&self) -> AgentLifecycleState {
        *self.lifecycle.read().await
    }

    pub async fn is_running(&self) -> bool {
        self.lifecycle_state().await == AgentLifecycleState::Running
    }

    /// Registers the inbox on the bus and spawns the message loop.
    ///
    /// Registration has completed when this returns, so messages sent to the
    /// agent afterwards are never lost.
    pub async fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.write().await;
        if *lifecycle != AgentLifecycleState::Created {
            return Err(AgentError::InvalidLifecycle {
                agent_id: self.id().to_string(),
                action: "start",
                state: lifecycle.to_string(),
            }
            .into());
        }

        let receiver = self.ctx.bus().register_agent(self.id()).await;
        self.ctx.replies().set_active(true);

        let message_loop = MessageLoop {
            behavior: self.behavior.clone(),
            ctx: self.ctx.clone(),
            activity: self.activity.clone(),
            stop_rx: self.stop_tx.subscribe(),
            recv_timeout: self.config.recv_timeout(),
            receiver,
            inbox_closed: false,
            backlog: VecDeque::new(),
        };
        let span = info_span!("agent", agent_id = %self.id());
        *self.handle.lock().await = Some(tokio::spawn(message_loop.run().instrument(span)));

        *lifecycle = AgentLifecycleState::Running;
        info!("Agent {} ({}) started", self.id(), self.behavior.get_type());
        Ok(())
    }

    /// Signals the loop, waits for it to exit, then unregisters from the bus.
    /// Calling it again, or on an agent that never started, does nothing.
    pub async fn stop(&self) {
        {
            let mut lifecycle = self.lifecycle.write().await;
            match *lifecycle {
                AgentLifecycleState::Running => *lifecycle = AgentLifecycleState::Stopping,
                AgentLifecycleState::Created => {
                    *lifecycle = AgentLifecycleState::Stopped;
                    return;
                }
                AgentLifecycleState::Stopping | AgentLifecycleState::Stopped => return,
            }
        }

        self.stop_tx.send_replace(true);
        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            error!("Agent {} message loop failed: {}", self.id(), e);
        }

        self.ctx.replies().set_active(false);
        self.ctx.bus().unregister(self.id()).await;
        *self.lifecycle.write().await = AgentLifecycleState::Stopped;
        info!("Agent {} stopped", self.id());
    }

    /// Current state, workload and task, read from memory.
    pub async fn get_status(&self) -> AgentStatus {
        snapshot(self.behavior.as_ref(), &self.activity).await
    }

    /// Runs a task directly, bypassing the bus. The agent reports busy while
    /// it runs.
    pub async fn process_task(&self, task: TaskInput) -> Result<Value> {
        let task_id = task
            .task_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        self.activity.write().await.begin(task_id.clone());
        let result = self.behavior.process_task(&self.ctx, task).await;
        self.activity.write().await.finish(&task_id);
        result
    }
}

impl<B: AgentBehavior> Drop for AgentRuntime<B> {
    fn drop(&mut self) {
        // lets the loop exit; unregistering needs `stop()`
        self.stop_tx.send_replace(true);
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    let reason = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown cause".to_string());
    format!("handler panicked: {reason}")
}

/// Turns a panic in `work` into an execution error, so one bad message
/// cannot take the loop down.
async fn guarded<T>(work: impl Future<Output = Result<T>>) -> Result<T> {
    match AssertUnwindSafe(work).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => Err(Error::execution(panic_message(panic.as_ref()))),
    }
}

enum Next {
    Message(Arc<Message>),
    Idle,
    Stop,
}

enum Drive<T> {
    Done(T),
    Inbox(Option<Arc<Message>>),
    Stop,
}

/// State owned by the spawned loop task.
struct MessageLoop<B: AgentBehavior> {
    behavior: Arc<B>,
    ctx: AgentContext,
    activity: Arc<RwLock<Activity>>,
    stop_rx: watch::Receiver<bool>,
    recv_timeout: Duration,
    receiver: MessageReceiver,
    inbox_closed: bool,
    /// messages that arrived while a handler was running
    backlog: VecDeque<Arc<Message>>,
}

impl<B: AgentBehavior> MessageLoop<B> {
    async fn run(mut self) {
        debug!("Message loop started");

        while !self.stopping() {
            let message = match self.backlog.pop_front() {
                Some(message) => message,
                None => match self.next_message().await {
                    Next::Message(message) => message,
                    Next::Idle => continue,
                    Next::Stop => break,
                },
            };
            self.dispatch(message).await;
        }

        let dropped = self.backlog.len() + self.receiver.drain().len();
        if dropped > 0 {
            warn!("Dropping {} unprocessed messages on shutdown", dropped);
        }
        debug!("Message loop exited");
    }

    fn stopping(&self) -> bool {
        *self.stop_rx.borrow()
    }

    async fn next_message(&mut self) -> Next {
        let next = tokio::select! {
            _ = self.stop_rx.changed() => Next::Stop,
            received = tokio::time::timeout(self.recv_timeout, self.receiver.recv()),
                if !self.inbox_closed =>
            {
                match received {
                    Ok(Some(message)) => Next::Message(message),
                    Ok(None) => {
                        warn!("Inbox closed, waiting for stop");
                        self.inbox_closed = true;
                        Next::Idle
                    }
                    Err(_) => Next::Idle,
                }
            }
        };
        next
    }

    /// Polls `work` to completion while keeping the inbox drained: replies to
    /// outstanding requests are routed, status requests are answered, the
    /// rest waits in the backlog. `None` when stop was signalled first.
    async fn drive<T>(&mut self, work: impl Future<Output = T>) -> Option<T> {
        tokio::pin!(work);
        loop {
            let event = tokio::select! {
                biased;
                _ = self.stop_rx.changed() => Drive::Stop,
                out = &mut work => Drive::Done(out),
                received = self.receiver.recv(), if !self.inbox_closed => Drive::Inbox(received),
            };

            match event {
                Drive::Done(out) => return Some(out),
                Drive::Stop => return None,
                Drive::Inbox(None) => self.inbox_closed = true,
                Drive::Inbox(Some(message)) => {
                    if self.ctx.replies().route(&message) {
                        continue;
                    }
                    if Self::is_status_request(&message) {
                        self.reply_status(&message).await;
                    } else {
                        self.backlog.push_back(message);
                    }
                }
            }
        }
    }

    fn is_status_request(message: &Message) -> bool {
        message.message_type == MessageType::Request
            && protocol::is_status_request(&message.payload)
    }

    async fn dispatch(&mut self, message: Arc<Message>) {
        debug!("Handling {}", message);
        if self.ctx.replies().route(&message) {
            return;
        }

        match message.message_type {
            MessageType::Task => self.handle_task(message).await,
            MessageType::Request if protocol::is_status_request(&message.payload) => {
                self.reply_status(&message).await
            }
            _ => self.handle_other(message).await,
        }
    }

    async fn handle_task(&mut self, message: Arc<Message>) {
        let input: TaskInput = match serde_json::from_value(message.payload.clone()) {
            Ok(input) => input,
            Err(e) => {
                warn!("Malformed task payload in {}: {}", message, e);
                let error = AgentError::ParseError(e.to_string()).to_string();
                self.reply(&message, MessageType::Error, protocol::error(error, &message.id))
                    .await;
                return;
            }
        };

        let task_id = input.task_id.clone().unwrap_or_else(|| message.id.clone());
        info!("Processing task {}", task_id);
        self.activity.write().await.begin(task_id.clone());

        let behavior = self.behavior.clone();
        let ctx = self.ctx.clone();
        let outcome = self
            .drive(guarded(async move { behavior.process_task(&ctx, input).await }))
            .await;

        // idle before the reply goes out, so a requester never sees a stale busy
        self.activity.write().await.finish(&task_id);

        match outcome {
            Some(Ok(result)) => {
                info!("Task {} completed", task_id);
                let payload = protocol::task_result(Some(task_id), result);
                self.reply(&message, MessageType::Result, payload).await;
            }
            Some(Err(e)) => {
                error!("Task {} failed: {}", task_id, e);
                let payload = protocol::error(e.to_string(), &message.id);
                self.reply(&message, MessageType::Error, payload).await;
            }
            None => warn!("Task {} abandoned, agent is stopping", task_id),
        }
    }

    async fn handle_other(&mut self, message: Arc<Message>) {
        let behavior = self.behavior.clone();
        let ctx = self.ctx.clone();
        let incoming = message.clone();
        let outcome = self
            .drive(guarded(async move { behavior.handle_message(&ctx, incoming).await }))
            .await;

        if let Some(Err(e)) = outcome {
            error!("Error handling {}: {}", message, e);
            // an ERROR answering an ERROR could bounce forever
            if message.message_type != MessageType::Error {
                let payload = protocol::error(e.to_string(), &message.id);
                self.reply(&message, MessageType::Error, payload).await;
            }
        }
    }

    async fn reply_status(&self, message: &Message) {
        let status = snapshot(self.behavior.as_ref(), &self.activity).await;
        self.reply(message, MessageType::Status, protocol::status_response(&status))
            .await;
    }

    async fn reply(&self, original: &Message, message_type: MessageType, payload: Value) {
        if !self.ctx.bus().send(original.reply(message_type, payload)).await {
            warn!(
                "Could not deliver {} reply to {}",
                message_type, original.sender_id
            );
        }
    }
}
