use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::agent::types::AgentCapability;
use crate::error::agent_error::AgentError;
use crate::error::{Error, Result};

/// Default priority on the 0..=10 scale, higher is more urgent.
pub const DEFAULT_PRIORITY: u8 = 5;

/// Task lifecycle. `Completed`, `Failed` and `Cancelled` are terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed(String),
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed(_) | TaskStatus::Cancelled
        )
    }

    fn can_become(&self, next: &TaskStatus) -> bool {
        match (self, next) {
            (TaskStatus::Pending, TaskStatus::InProgress)
            | (TaskStatus::Pending, TaskStatus::Failed(_))
            | (TaskStatus::Pending, TaskStatus::Cancelled) => true,
            (TaskStatus::InProgress, next) => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed(reason) => write!(f, "failed ({reason})"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Unit of work tracked by the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub description: String,
    pub task_type: String,
    pub parameters: Map<String, Value>,
    /// Carried along with the task; scheduling does not look at it.
    pub priority: u8,
    pub required_capabilities: BTreeSet<AgentCapability>,
    status: TaskStatus,
    pub result: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        description: impl Into<String>,
        task_type: impl Into<String>,
        parameters: Map<String, Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            description: description.into(),
            task_type: task_type.into(),
            parameters,
            priority: DEFAULT_PRIORITY,
            required_capabilities: BTreeSet::new(),
            status: TaskStatus::Pending,
            result: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn requiring(mut self, capability: AgentCapability) -> Self {
        self.required_capabilities.insert(capability);
        self
    }

    pub fn status(&self) -> &TaskStatus {
        &self.status
    }

    /// Moves the task to `next`, refusing anything that leaves a terminal state.
    pub fn update_status(&mut self, next: TaskStatus) -> Result<()> {
        if !self.status.can_become(&next) {
            return Err(Error::AgentError(AgentError::InvalidStateTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            }));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Records the outcome and marks the task completed.
    pub fn complete(&mut self, result: Value) -> Result<()> {
        self.update_status(TaskStatus::Completed)?;
        self.result = Some(result);
        Ok(())
    }

    pub fn to_input(&self) -> TaskInput {
        TaskInput {
            task_id: Some(self.id.clone()),
            description: self.description.clone(),
            task_type: Some(self.task_type.clone()),
            parameters: self.parameters.clone(),
        }
    }
}

/// What a specialist receives: the payload of a TASK message, or the
/// argument of a direct `process_task` call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_type: Option<String>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl TaskInput {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Self::default()
        }
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    pub fn with_task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = Some(task_type.into());
        self
    }

    pub fn with_parameters(mut self, parameters: Map<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.parameters.get(key)
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }

    pub fn param_bool(&self, key: &str) -> Option<bool> {
        self.parameters.get(key).and_then(Value::as_bool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_task_defaults() {
        let task = Task::new("Summarize", "general", Map::new());
        assert_eq!(task.priority, DEFAULT_PRIORITY);
        assert!(task.required_capabilities.is_empty());
        assert_eq!(task.status(), &TaskStatus::Pending);
        assert!(task.result.is_none());
    }

    #[test]
    fn test_status_lifecycle() {
        let mut task = Task::new("Summarize", "general", Map::new());
        task.update_status(TaskStatus::InProgress).unwrap();
        task.complete(serde_json::json!({"ok": true})).unwrap();

        assert_eq!(task.status(), &TaskStatus::Completed);
        assert_eq!(task.result, Some(serde_json::json!({"ok": true})));
    }

    #[test]
    fn test_terminal_status_is_final() {
        let mut task = Task::new("Summarize", "general", Map::new());
        task.update_status(TaskStatus::Cancelled).unwrap();

        assert!(task.update_status(TaskStatus::InProgress).is_err());
        assert!(task.update_status(TaskStatus::Completed).is_err());
        assert!(task.complete(serde_json::json!(1)).is_err());
        assert_eq!(task.status(), &TaskStatus::Cancelled);
        assert!(task.result.is_none());
    }

    #[test]
    fn test_pending_cannot_complete_directly() {
        let mut task = Task::new("Summarize", "general", Map::new());
        assert!(task.update_status(TaskStatus::Completed).is_err());
    }

    #[test]
    fn test_task_input_from_payload() {
        let input: TaskInput = serde_json::from_value(serde_json::json!({
            "task_id": "t-1",
            "description": "Research rust",
            "parameters": {"query": "rust", "needs_research": false}
        }))
        .unwrap();

        assert_eq!(input.task_id.as_deref(), Some("t-1"));
        assert_eq!(input.param_str("query"), Some("rust"));
        assert_eq!(input.param_bool("needs_research"), Some(false));
        assert!(input.task_type.is_none());

        let sparse: TaskInput = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(sparse.description, "");
        assert!(sparse.parameters.is_empty());
    }

    #[test]
    fn test_to_input_carries_fields() {
        let task = Task::new("Analyze", "analysis", Map::new()).with_id("t-9");
        let input = task.to_input();
        assert_eq!(input.task_id.as_deref(), Some("t-9"));
        assert_eq!(input.task_type.as_deref(), Some("analysis"));
        assert_eq!(input.description, "Analyze");
    }
}
