use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::error::OpenAIError;
use async_openai::types::chat::{
    ChatCompletionMessageToolCall, ChatCompletionMessageToolCalls,
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestToolMessage,
    ChatCompletionRequestToolMessageContent, ChatCompletionRequestUserMessageArgs,
    ChatCompletionTool, ChatCompletionTools, CreateChatCompletionRequest, FunctionObject,
};
use async_openai::Client;
use relay_types::HostError;
use serde_json::json;

pub const DEFAULT_MODEL: &str = "gpt-4.1-mini";
pub const MAX_RETRIES: u32 = 3;

/// Name of the single tool the host exposes to its LLM: dispatch a message
/// to an enabled remote agent.
pub const DISPATCH_TOOL: &str = "send_message";

/// Conversation turn as the host LLM sees it.
#[derive(Debug, Clone)]
pub enum ChatMessage {
    System { content: String },
    User { content: String },
    Assistant {
        content: String,
        dispatches: Vec<DispatchCall>,
    },
    ToolResult { call_id: String, content: String },
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage::User {
            content: content.into(),
        }
    }
}

/// One `send_message` tool call emitted by the host LLM.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchCall {
    pub call_id: String,
    pub agent_name: String,
    pub message: String,
    /// Names of previously produced artifacts to attach.
    pub attachments: Vec<String>,
}

/// Outcome of one LLM call: either a final textual answer (no dispatches)
/// or one or more dispatch tool calls.
#[derive(Debug, Clone)]
pub struct LlmTurn {
    pub content: String,
    pub dispatches: Vec<DispatchCall>,
    pub token_usage: Option<u32>,
}

impl LlmTurn {
    pub fn is_final(&self) -> bool {
        self.dispatches.is_empty()
    }
}

#[async_trait::async_trait]
pub trait LlmExecutor: Send + Sync + std::fmt::Debug {
    async fn execute(&self, messages: &[ChatMessage]) -> Result<LlmTurn, HostError>;
}

/// Host LLM over the OpenAI-compatible chat completions API with native
/// tool calling. Rate limiting is retried with exponential backoff before
/// surfacing as a quota error.
#[derive(Debug)]
pub struct OpenAiExecutor {
    client: Client<OpenAIConfig>,
    model: String,
    max_retries: u32,
}

impl OpenAiExecutor {
    pub fn new(model: Option<String>) -> Self {
        OpenAiExecutor {
            client: Client::new(),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            max_retries: MAX_RETRIES,
        }
    }

    pub fn with_config(config: OpenAIConfig, model: String) -> Self {
        OpenAiExecutor {
            client: Client::with_config(config),
            model,
            max_retries: MAX_RETRIES,
        }
    }

    fn dispatch_tool() -> ChatCompletionTools {
        ChatCompletionTools::Function(ChatCompletionTool {
            function: FunctionObject {
                name: DISPATCH_TOOL.to_string(),
                description: Some(
                    "Send a message to one of the enabled remote agents and wait for its reply."
                        .to_string(),
                ),
                parameters: Some(json!({
                    "type": "object",
                    "properties": {
                        "agent_name": {
                            "type": "string",
                            "description": "Name of the enabled agent to dispatch to"
                        },
                        "message": {
                            "type": "string",
                            "description": "Instruction or question for the agent"
                        },
                        "attachments": {
                            "type": "array",
                            "items": { "type": "string" },
                            "description": "File names of earlier artifacts to forward"
                        }
                    },
                    "required": ["agent_name", "message"]
                })),
                strict: None,
            },
        })
    }

    fn map_messages(messages: &[ChatMessage]) -> Vec<ChatCompletionRequestMessage> {
        let mut mapped = Vec::with_capacity(messages.len());
        for message in messages {
            match message {
                ChatMessage::System { content } => {
                    let mut msg = ChatCompletionRequestSystemMessageArgs::default();
                    msg.content(content.as_str());
                    mapped.push(ChatCompletionRequestMessage::System(msg.build().unwrap()));
                }
                ChatMessage::User { content } => {
                    let mut msg = ChatCompletionRequestUserMessageArgs::default();
                    msg.content(content.as_str());
                    mapped.push(ChatCompletionRequestMessage::User(msg.build().unwrap()));
                }
                ChatMessage::Assistant {
                    content,
                    dispatches,
                } => {
                    let mut msg = ChatCompletionRequestAssistantMessageArgs::default();
                    if !content.is_empty() {
                        msg.content(content.as_str());
                    }
                    if !dispatches.is_empty() {
                        let tool_calls: Vec<ChatCompletionMessageToolCalls> = dispatches
                            .iter()
                            .map(|d| {
                                ChatCompletionMessageToolCalls::Function(
                                    ChatCompletionMessageToolCall {
                                        id: d.call_id.clone(),
                                        function: async_openai::types::chat::FunctionCall {
                                            name: DISPATCH_TOOL.to_string(),
                                            arguments: json!({
                                                "agent_name": d.agent_name,
                                                "message": d.message,
                                                "attachments": d.attachments,
                                            })
                                            .to_string(),
                                        },
                                    },
                                )
                            })
                            .collect();
                        msg.tool_calls(tool_calls);
                    }
                    mapped.push(ChatCompletionRequestMessage::Assistant(
                        msg.build().unwrap(),
                    ));
                }
                ChatMessage::ToolResult { call_id, content } => {
                    mapped.push(ChatCompletionRequestMessage::Tool(
                        ChatCompletionRequestToolMessage {
                            content: ChatCompletionRequestToolMessageContent::Text(
                                content.clone(),
                            ),
                            tool_call_id: call_id.clone(),
                        },
                    ));
                }
            }
        }
        mapped
    }

    fn map_dispatch(tool_call: &ChatCompletionMessageToolCalls) -> Option<DispatchCall> {
        let ChatCompletionMessageToolCalls::Function(call) = tool_call else {
            return None;
        };
        if call.function.name != DISPATCH_TOOL {
            return None;
        }
        let args: serde_json::Value = serde_json::from_str(&call.function.arguments).ok()?;
        Some(DispatchCall {
            call_id: call.id.clone(),
            agent_name: args.get("agent_name")?.as_str()?.to_string(),
            message: args
                .get("message")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default()
                .to_string(),
            attachments: args
                .get("attachments")
                .and_then(serde_json::Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default(),
        })
    }

    fn is_rate_limited(err: &OpenAIError) -> bool {
        match err {
            OpenAIError::ApiError(api) => {
                api.code.as_deref() == Some("429")
                    || api
                        .r#type
                        .as_deref()
                        .map(|t| t.contains("rate_limit"))
                        .unwrap_or(false)
                    || api.message.to_lowercase().contains("rate limit")
            }
            _ => false,
        }
    }
}

#[async_trait::async_trait]
impl LlmExecutor for OpenAiExecutor {
    async fn execute(&self, messages: &[ChatMessage]) -> Result<LlmTurn, HostError> {
        let request = CreateChatCompletionRequest {
            model: self.model.clone(),
            messages: Self::map_messages(messages),
            tools: Some(vec![Self::dispatch_tool()]),
            ..Default::default()
        };

        let mut backoff = Duration::from_secs(2);
        let mut attempt = 0;
        let response = loop {
            match self.client.chat().create(request.clone()).await {
                Ok(response) => break response,
                Err(err) if Self::is_rate_limited(&err) && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        "host LLM rate limited, retry {attempt}/{} in {backoff:?}",
                        self.max_retries
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(Duration::from_secs(45));
                }
                Err(err) if Self::is_rate_limited(&err) => {
                    return Err(HostError::Quota(err.to_string()));
                }
                Err(err) => return Err(HostError::Other(anyhow::anyhow!(err))),
            }
        };

        let token_usage = response.usage.as_ref().map(|u| u.total_tokens);
        let choice = response
            .choices
            .first()
            .ok_or_else(|| HostError::Protocol("LLM response carried no choices".into()))?;
        let content = choice.message.content.clone().unwrap_or_default();
        let dispatches = choice
            .message
            .tool_calls
            .as_ref()
            .map(|calls| calls.iter().filter_map(Self::map_dispatch).collect())
            .unwrap_or_default();

        Ok(LlmTurn {
            content,
            dispatches,
            token_usage,
        })
    }
}
