use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::session_of;

/// Authoritative event vocabulary. Serialized names are the wire
/// `eventType` strings delivered to `/events` subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    TaskCreated,
    TaskUpdated,
    TaskCompleted,
    TaskFailed,
    TaskCanceled,
    MessageChunk,
    Message,
    MessageComplete,
    FinalResponse,
    FileUploaded,
    RemoteAgentActivity,
    OutgoingAgentMessage,
    WorkflowStepStarted,
    WorkflowStepCompleted,
    ActiveWorkflowChanged,
    ActiveWorkflowsChanged,
    Error,
}

impl EventType {
    /// Terminal events must never be dropped by the bus.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EventType::MessageComplete
                | EventType::FinalResponse
                | EventType::TaskCompleted
                | EventType::TaskFailed
                | EventType::TaskCanceled
        )
    }

    /// High-frequency progress events the bus may coalesce under pressure.
    pub fn coalescable(self) -> bool {
        matches!(self, EventType::TaskUpdated | EventType::MessageChunk)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventType::TaskCreated => "task_created",
            EventType::TaskUpdated => "task_updated",
            EventType::TaskCompleted => "task_completed",
            EventType::TaskFailed => "task_failed",
            EventType::TaskCanceled => "task_canceled",
            EventType::MessageChunk => "message_chunk",
            EventType::Message => "message",
            EventType::MessageComplete => "message_complete",
            EventType::FinalResponse => "final_response",
            EventType::FileUploaded => "file_uploaded",
            EventType::RemoteAgentActivity => "remote_agent_activity",
            EventType::OutgoingAgentMessage => "outgoing_agent_message",
            EventType::WorkflowStepStarted => "workflow_step_started",
            EventType::WorkflowStepCompleted => "workflow_step_completed",
            EventType::ActiveWorkflowChanged => "active_workflow_changed",
            EventType::ActiveWorkflowsChanged => "active_workflows_changed",
            EventType::Error => "error",
        }
    }
}

/// One bus event. The wire frame (`eventType`/`contextId`/`data`) is what
/// WebSocket subscribers receive; the partition key routes it and stays
/// internal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub event_type: EventType,
    /// `session::conversation`, or a bare session id for session-scoped
    /// broadcasts such as `active_workflow_changed`.
    pub context_id: String,
    #[serde(skip, default)]
    pub partition_key: String,
    pub data: Value,
}

impl Event {
    pub fn new(event_type: EventType, context_id: impl Into<String>, data: Value) -> Self {
        let context_id = context_id.into();
        let partition_key = session_of(&context_id).to_string();
        Event {
            event_type,
            context_id,
            partition_key,
            data,
        }
    }

    pub fn error(context_id: impl Into<String>, kind: &str, detail: &str) -> Self {
        Event::new(
            EventType::Error,
            context_id,
            serde_json::json!({ "success": false, "error": format!("{kind}: {detail}") }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn partition_key_derives_from_context_prefix() {
        let ev = Event::new(EventType::MessageChunk, "sess::conv", json!({}));
        assert_eq!(ev.partition_key, "sess");
        let bare = Event::new(EventType::ActiveWorkflowChanged, "sess", json!({}));
        assert_eq!(bare.partition_key, "sess");
    }

    #[test]
    fn wire_frame_shape() {
        let ev = Event::new(EventType::FinalResponse, "s::c", json!({"result": "ok"}));
        let v = serde_json::to_value(&ev).unwrap();
        assert_eq!(v["eventType"], "final_response");
        assert_eq!(v["contextId"], "s::c");
        assert_eq!(v["data"]["result"], "ok");
        assert!(v.get("partitionKey").is_none());
    }

    #[test]
    fn terminal_and_coalescable_split() {
        assert!(EventType::FinalResponse.is_terminal());
        assert!(EventType::TaskFailed.is_terminal());
        assert!(!EventType::TaskUpdated.is_terminal());
        assert!(EventType::TaskUpdated.coalescable());
        assert!(EventType::MessageChunk.coalescable());
        assert!(!EventType::MessageComplete.coalescable());
    }
}
