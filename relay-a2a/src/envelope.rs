use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body POSTed to `<agent.url>/message/send`.
#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema)]
pub struct SendRequest {
    pub params: MessageSendParams,
}

#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MessageSendParams {
    pub message_id: String,
    pub context_id: String,
    pub role: Role,
    pub parts: Vec<WirePart>,
    #[serde(default)]
    pub agent_mode: bool,
    #[serde(default)]
    pub enable_inter_agent_memory: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<String>,
    #[serde(
        default,
        rename = "available_workflows",
        skip_serializing_if = "Option::is_none"
    )]
    pub available_workflows: Option<Vec<WorkflowListing>>,
}

/// Workflow summary offered to an agent for intent routing.
#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema)]
pub struct WorkflowListing {
    pub id: String,
    pub name: String,
    pub goal: String,
    pub workflow: String,
    #[serde(default)]
    pub agents: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    User,
    Agent,
    System,
}

/// Outbound part, always serialized in the nested `root.kind` shape.
/// Inbound parsing of both shapes lives in [`crate::normalize`].
#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema)]
pub struct WirePart {
    pub root: RawPart,
}

impl From<Part> for WirePart {
    fn from(part: Part) -> Self {
        WirePart { root: part.into() }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RawPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "file")]
    File { file: FileObject },
    #[serde(rename = "data")]
    Data { data: Value },
}

#[derive(Serialize, Deserialize, Debug, Clone, JsonSchema)]
pub struct FileObject {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Some agents inline small payloads instead of referencing a URI.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<String>,
}

/// Normalized part union. Every boundary matches exhaustively on this.
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    Text(TextPart),
    File(FilePart),
    Data(DataPart),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextPart {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilePart {
    pub name: String,
    pub uri: String,
    pub mime_type: String,
    pub role: FileRole,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataPart {
    pub payload: Value,
}

impl DataPart {
    /// A data part may reference a stored artifact instead of carrying one inline.
    pub fn artifact_uri(&self) -> Option<&str> {
        self.payload.get("artifact-uri").and_then(Value::as_str)
    }
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text(TextPart { text: text.into() })
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text(t) => Some(&t.text),
            _ => None,
        }
    }
}

/// File-part role for image edit workflows. Roles the host does not know
/// are carried through opaquely rather than rejected.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FileRole {
    Base,
    Mask,
    Overlay,
    Result,
    #[default]
    None,
    Other(String),
}

impl FileRole {
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            None | Some("") => FileRole::None,
            Some("base") => FileRole::Base,
            Some("mask") => FileRole::Mask,
            Some("overlay") => FileRole::Overlay,
            Some("result") => FileRole::Result,
            Some(other) => FileRole::Other(other.to_string()),
        }
    }

    pub fn as_wire(&self) -> Option<String> {
        match self {
            FileRole::Base => Some("base".to_string()),
            FileRole::Mask => Some("mask".to_string()),
            FileRole::Overlay => Some("overlay".to_string()),
            FileRole::Result => Some("result".to_string()),
            FileRole::None => None,
            FileRole::Other(s) => Some(s.clone()),
        }
    }
}

impl From<Part> for RawPart {
    fn from(part: Part) -> Self {
        match part {
            Part::Text(t) => RawPart::Text { text: t.text },
            Part::File(f) => RawPart::File {
                file: FileObject {
                    name: Some(f.name),
                    uri: Some(f.uri),
                    mime_type: Some(f.mime_type),
                    role: f.role.as_wire(),
                    bytes: None,
                },
            },
            Part::Data(d) => RawPart::Data { data: d.payload },
        }
    }
}

/// One server event from a remote agent's `message/send` stream.
/// `event_type` drives the transport state machine; unknown types are
/// forwarded untouched so heterogeneous agents keep working.
#[derive(Deserialize, Serialize, Debug, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AgentStreamFrame {
    pub event_type: String,
    #[serde(default)]
    pub context_id: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub parts: Option<Vec<Value>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_serializes_spec_field_names() {
        let params = MessageSendParams {
            message_id: "m1".into(),
            context_id: "sess::conv".into(),
            role: Role::User,
            parts: vec![Part::text("hello").into()],
            agent_mode: true,
            enable_inter_agent_memory: true,
            workflow: Some("1. [A] do".into()),
            available_workflows: None,
        };
        let value = serde_json::to_value(SendRequest { params }).unwrap();
        let p = &value["params"];
        assert_eq!(p["messageId"], "m1");
        assert_eq!(p["contextId"], "sess::conv");
        assert_eq!(p["agentMode"], true);
        assert_eq!(p["enableInterAgentMemory"], true);
        assert_eq!(p["parts"][0]["root"]["kind"], "text");
        assert_eq!(p["parts"][0]["root"]["text"], "hello");
    }

    #[test]
    fn file_part_round_trips_role() {
        let part = Part::File(FilePart {
            name: "img.png".into(),
            uri: "https://blob/img.png".into(),
            mime_type: "image/png".into(),
            role: FileRole::Base,
        });
        let wire: WirePart = part.into();
        let value = serde_json::to_value(&wire).unwrap();
        assert_eq!(value["root"]["kind"], "file");
        assert_eq!(value["root"]["file"]["role"], "base");
        assert_eq!(value["root"]["file"]["mime_type"], "image/png");
    }

    #[test]
    fn unknown_roles_pass_through() {
        let role = FileRole::parse(Some("reference"));
        assert_eq!(role, FileRole::Other("reference".into()));
        assert_eq!(role.as_wire().as_deref(), Some("reference"));
    }
}
