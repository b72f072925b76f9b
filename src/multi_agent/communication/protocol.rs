//! Payload shapes carried in [`Message::payload`](super::Message).

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::types::AgentStatus;
use crate::multi_agent::coordination::task::{Task, TaskInput};

/// `action` value of a status REQUEST.
pub const STATUS_ACTION: &str = "status";

/// Status reported in a RESULT payload for successful processing.
pub const COMPLETED: &str = "completed";

/// Content of a RESULT message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResultPayload {
    pub task_id: Option<String>,
    pub result: Value,
    pub status: String,
}

impl TaskResultPayload {
    pub fn completed(task_id: Option<String>, result: Value) -> Self {
        Self {
            task_id,
            result,
            status: COMPLETED.to_string(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == COMPLETED
    }
}

/// Content of an ERROR message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub error: String,
    pub original_message_id: String,
}

/// Payload of a TASK message for `task`.
pub fn task_request(task: &Task) -> Value {
    task_input(&task.to_input())
}

pub fn task_input(input: &TaskInput) -> Value {
    serde_json::json!(input)
}

pub fn task_result(task_id: Option<String>, result: Value) -> Value {
    serde_json::json!(TaskResultPayload::completed(task_id, result))
}

pub fn error(error: impl Into<String>, original_message_id: impl Into<String>) -> Value {
    serde_json::json!(ErrorPayload {
        error: error.into(),
        original_message_id: original_message_id.into(),
    })
}

pub fn status_request() -> Value {
    serde_json::json!({ "action": STATUS_ACTION })
}

pub fn status_response(status: &AgentStatus) -> Value {
    serde_json::json!(status)
}

/// Action named by a REQUEST payload, if any.
pub fn action(payload: &Value) -> Option<&str> {
    payload.get("action").and_then(Value::as_str)
}

pub fn is_status_request(payload: &Value) -> bool {
    matches!(action(payload), Some(STATUS_ACTION) | Some("status_request"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_payload_shape() {
        let payload = task_result(Some("t-1".into()), serde_json::json!({"answer": 42}));
        assert_eq!(payload["task_id"], "t-1");
        assert_eq!(payload["status"], "completed");
        assert_eq!(payload["result"]["answer"], 42);

        let parsed: TaskResultPayload = serde_json::from_value(payload).unwrap();
        assert!(parsed.is_completed());
    }

    #[test]
    fn test_status_request_detection() {
        assert!(is_status_request(&status_request()));
        assert!(is_status_request(&serde_json::json!({"action": "status_request"})));
        assert!(!is_status_request(&serde_json::json!({"action": "summarize"})));
        assert!(!is_status_request(&serde_json::json!("status")));
    }
}
