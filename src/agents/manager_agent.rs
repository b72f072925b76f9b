use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::agent::{
    context::{AgentContext, PendingReply},
    core::{
        base_agent::{AgentBehavior, BaseAgent},
        runtime::AgentRuntime,
    },
    types::{AgentCapability, AgentType},
};
use crate::agents::{ANALYZER_AGENT_ID, MANAGER_AGENT_ID, RESEARCH_AGENT_ID, WRITER_AGENT_ID};
use crate::error::{Result, agent_error::AgentError};
use crate::multi_agent::{
    communication::{MessageType, protocol},
    coordination::task::TaskInput,
};

const RESEARCH_KEYWORDS: &[&str] = &["research", "gather", "find", "investigate"];
const ANALYSIS_KEYWORDS: &[&str] = &["analyze", "insights", "trends", "patterns"];
const WRITING_KEYWORDS: &[&str] = &["write", "create", "report", "document"];

/// Manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Shared deadline for all subtask results of one task
    pub gather_timeout_ms: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            gather_timeout_ms: 60_000,
        }
    }
}

impl ManagerConfig {
    pub fn gather_timeout(&self) -> Duration {
        Duration::from_millis(self.gather_timeout_ms)
    }
}

/// Category of a subtask, also used as its `task_type` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubtaskKind {
    Research,
    Analysis,
    Writing,
    General,
}

impl SubtaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubtaskKind::Research => "research",
            SubtaskKind::Analysis => "analysis",
            SubtaskKind::Writing => "writing",
            SubtaskKind::General => "general",
        }
    }
}

impl fmt::Display for SubtaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Subtask {
    pub kind: SubtaskKind,
    pub description: String,
    pub parameters: Map<String, Value>,
}

/// Splits `description` into subtasks by keyword, always in the order
/// research, analysis, writing. Without any keyword the whole description
/// becomes one `general` subtask.
pub fn decompose(description: &str, parameters: &Map<String, Value>) -> Vec<Subtask> {
    let lowered = description.to_lowercase();
    let mentions = |keywords: &[&str]| keywords.iter().any(|k| lowered.contains(k));

    let mut parts = Vec::new();
    if mentions(RESEARCH_KEYWORDS) {
        parts.push((SubtaskKind::Research, format!("Research: {description}")));
    }
    if mentions(ANALYSIS_KEYWORDS) {
        parts.push((SubtaskKind::Analysis, format!("Analyze data for: {description}")));
    }
    if mentions(WRITING_KEYWORDS) {
        parts.push((SubtaskKind::Writing, format!("Write content for: {description}")));
    }
    if parts.is_empty() {
        parts.push((SubtaskKind::General, description.to_string()));
    }

    parts
        .into_iter()
        .map(|(kind, description)| Subtask {
            kind,
            description,
            parameters: parameters.clone(),
        })
        .collect()
}

/// Agent that handles a task type; anything unknown goes to research.
pub fn route(task_type: &str) -> &'static str {
    match task_type {
        "analysis" => ANALYZER_AGENT_ID,
        "writing" => WRITER_AGENT_ID,
        _ => RESEARCH_AGENT_ID,
    }
}

/// Result of one subtask that answered in time.
#[derive(Debug, Clone, PartialEq)]
pub struct SubtaskResult {
    pub subtask_id: String,
    pub kind: SubtaskKind,
    pub result: Value,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Bucket {
    Research,
    Analysis,
    Content,
}

impl SubtaskResult {
    /// Dispatched kind decides; `general` results fall back to looking at
    /// the serialized text, which is only a rough guess.
    fn bucket(&self) -> Option<Bucket> {
        match self.kind {
            SubtaskKind::Research => Some(Bucket::Research),
            SubtaskKind::Analysis => Some(Bucket::Analysis),
            SubtaskKind::Writing => Some(Bucket::Content),
            SubtaskKind::General => {
                if !self.result.is_object() {
                    return None;
                }
                let text = self.result.to_string().to_lowercase();
                if text.contains("research") {
                    Some(Bucket::Research)
                } else if text.contains("analysis") || text.contains("insights") {
                    Some(Bucket::Analysis)
                } else if text.contains("content") {
                    Some(Bucket::Content)
                } else {
                    None
                }
            }
        }
    }
}

/// Combines whatever subtask results arrived into one report.
pub fn synthesize(results: &[SubtaskResult]) -> Value {
    let subtask_results: Map<String, Value> = results
        .iter()
        .map(|r| (r.subtask_id.clone(), r.result.clone()))
        .collect();

    let mut synthesized = json!({
        "summary": "Task completed with multiple subtask results",
        "subtask_count": results.len(),
        "subtask_results": subtask_results,
        "status": protocol::COMPLETED,
    });

    for (bucket, key) in [
        (Bucket::Research, "research"),
        (Bucket::Analysis, "analysis"),
        (Bucket::Content, "content"),
    ] {
        let matching: Vec<Value> = results
            .iter()
            .filter(|r| r.bucket() == Some(bucket))
            .map(|r| r.result.clone())
            .collect();
        if !matching.is_empty() {
            synthesized[key] = Value::Array(matching);
        }
    }

    synthesized
}

struct Dispatched {
    subtask_id: String,
    kind: SubtaskKind,
    reply: PendingReply,
}

/// Decomposes tasks, delegates the parts to the specialists and merges
/// their answers.
pub struct ManagerAgent {
    base: BaseAgent,
    config: ManagerConfig,
    /// parent task id -> dispatched subtask ids. Entries stay for the
    /// lifetime of the agent unless released with
    /// [`ManagerAgent::forget_subtasks`].
    subtasks: RwLock<HashMap<String, Vec<String>>>,
}

impl ManagerAgent {
    pub fn new(config: ManagerConfig) -> Self {
        Self::with_id(MANAGER_AGENT_ID, config)
    }

    pub fn with_id(id: impl Into<String>, config: ManagerConfig) -> Self {
        Self {
            base: BaseAgent::new(
                id,
                AgentType::Manager,
                vec![
                    AgentCapability::Coordination,
                    AgentCapability::TaskDecomposition,
                    AgentCapability::Synthesis,
                ],
            ),
            config,
            subtasks: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Subtask ids dispatched for `task_id`.
    pub async fn subtasks_of(&self, task_id: &str) -> Vec<String> {
        self.subtasks
            .read()
            .await
            .get(task_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Drops the record for `task_id` and returns what it held.
    pub async fn forget_subtasks(&self, task_id: &str) -> Vec<String> {
        self.subtasks
            .write()
            .await
            .remove(task_id)
            .unwrap_or_default()
    }

    async fn dispatch(
        &self,
        ctx: &AgentContext,
        task_id: &str,
        subtasks: Vec<Subtask>,
    ) -> Vec<Dispatched> {
        let mut dispatched = Vec::with_capacity(subtasks.len());

        for subtask in subtasks {
            let agent_id = route(subtask.kind.as_str());
            let subtask_id = uuid::Uuid::new_v4().to_string();
            let input = TaskInput::new(subtask.description)
                .with_task_id(subtask_id.clone())
                .with_task_type(subtask.kind.as_str())
                .with_parameters(subtask.parameters);

            self.subtasks
                .write()
                .await
                .entry(task_id.to_string())
                .or_default()
                .push(subtask_id.clone());

            match ctx.request_task(agent_id, &input).await {
                Some(reply) => {
                    info!("Dispatched {} subtask {} to {}", subtask.kind, subtask_id, agent_id);
                    dispatched.push(Dispatched {
                        subtask_id,
                        kind: subtask.kind,
                        reply,
                    });
                }
                None => warn!(
                    "Could not dispatch {} subtask {} to {}",
                    subtask.kind, subtask_id, agent_id
                ),
            }
        }

        dispatched
    }

    /// Collects replies until `deadline`. Errors and missing replies are
    /// logged and left out.
    async fn gather(&self, dispatched: Vec<Dispatched>, deadline: Instant) -> Vec<SubtaskResult> {
        let waits = dispatched.into_iter().map(|d| async move {
            let reply = d.reply.wait_until(deadline).await;
            (d.subtask_id, d.kind, reply)
        });

        let mut results = Vec::new();
        for (subtask_id, kind, reply) in join_all(waits).await {
            match reply {
                Some(reply) if reply.message_type == MessageType::Result => {
                    info!("Received result for subtask {}", subtask_id);
                    results.push(SubtaskResult {
                        subtask_id,
                        kind,
                        result: reply.payload.get("result").cloned().unwrap_or(Value::Null),
                    });
                }
                Some(reply) => warn!(
                    "Subtask {} answered with {}: {}",
                    subtask_id, reply.message_type, reply.payload
                ),
                None => warn!("Timed out waiting for subtask {}", subtask_id),
            }
        }
        results
    }
}

#[async_trait]
impl AgentBehavior for ManagerAgent {
    fn get_id(&self) -> &str {
        &self.base.id
    }

    fn get_type(&self) -> AgentType {
        self.base.agent_type
    }

    fn get_capabilities(&self) -> &[AgentCapability] {
        &self.base.capabilities
    }

    async fn process_task(&self, ctx: &AgentContext, task: TaskInput) -> Result<Value> {
        let task_id = task
            .task_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        info!("Manager processing task {}: {}", task_id, task.description);

        let subtasks = decompose(&task.description, &task.parameters);
        info!("Decomposed into {} subtasks", subtasks.len());

        let deadline = Instant::now() + self.config.gather_timeout();
        let dispatched = self.dispatch(ctx, &task_id, subtasks).await;
        let results = self.gather(dispatched, deadline).await;

        Ok(synthesize(&results))
    }
}

impl AgentRuntime<ManagerAgent> {
    /// Runs `description` through decomposition, delegation and synthesis.
    /// The manager must be running so that replies reach it.
    pub async fn delegate(
        &self,
        description: &str,
        parameters: Map<String, Value>,
    ) -> Result<Value> {
        if !self.is_running().await {
            return Err(AgentError::InvalidLifecycle {
                agent_id: self.id().to_string(),
                action: "delegate",
                state: self.lifecycle_state().await.to_string(),
            }
            .into());
        }

        let task = TaskInput::new(description)
            .with_task_id(uuid::Uuid::new_v4().to_string())
            .with_parameters(parameters);
        self.process_task(task).await
    }
}
