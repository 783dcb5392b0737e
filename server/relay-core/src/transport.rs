use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures_util::StreamExt;
use relay_a2a::{
    normalize_parts, AgentStreamFrame, DataPart, FilePart, FileRole, MessageSendParams, Part, Role,
    SendRequest, TaskState, WirePart, WorkflowListing, HUMAN_ESCALATION_SENTINEL,
};
use relay_artifacts::ArtifactStore;
use relay_types::config::timeouts;
use relay_types::session::session_of;
use relay_types::{EnabledAgent, Event, EventType, HostError, ToolApprovalPolicy};
use reqwest_eventsource::{Error as EsError, Event as EsEvent, RequestBuilderExt};
use serde_json::{json, Value};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::bus::EventBus;

/// Consecutive `requires_action` rounds without fresh tool calls before the
/// task is failed as stuck.
const MAX_STUCK_APPROVALS: u32 = 3;
const RETRY_BASE: Duration = Duration::from_secs(2);
const RETRY_CAP: Duration = Duration::from_secs(45);
const MAX_RETRIES: u32 = 3;

/// Transcript line shown to the human operator on escalation.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TranscriptLine {
    pub speaker: String,
    pub text: String,
}

#[derive(Debug, Clone)]
pub enum AttachmentSource {
    Uri(String),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct OutboundAttachment {
    pub name: String,
    pub mime_type: String,
    pub role: FileRole,
    pub source: AttachmentSource,
}

#[derive(Debug, Clone)]
pub struct SendOptions {
    pub timeout: Duration,
    pub collect_artifacts: bool,
    pub workflow_text: Option<String>,
    pub workflow_goal: Option<String>,
    pub available_workflows: Option<Vec<WorkflowListing>>,
    /// Conversation so far, used as the escalation payload.
    pub transcript: Vec<TranscriptLine>,
    pub escalation_timeout: Duration,
    pub cancel: CancellationToken,
}

impl Default for SendOptions {
    fn default() -> Self {
        SendOptions {
            timeout: timeouts::READ,
            collect_artifacts: true,
            workflow_text: None,
            workflow_goal: None,
            available_workflows: None,
            transcript: Vec::new(),
            escalation_timeout: timeouts::HUMAN_ESCALATION,
            cancel: CancellationToken::new(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AgentReply {
    pub text: String,
    pub file_parts: Vec<FilePart>,
    pub data_parts: Vec<DataPart>,
    pub tools_used: Vec<String>,
    pub token_usage: Option<u32>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct EscalationInfo {
    pub task_id: String,
    pub context_id: String,
    pub agent_name: String,
    pub transcript: Vec<TranscriptLine>,
    pub requested_at: chrono::DateTime<chrono::Utc>,
}

struct PendingEscalation {
    info: EscalationInfo,
    responder: oneshot::Sender<String>,
}

struct ActiveTask {
    task_id: String,
    state: TaskState,
    cancel: CancellationToken,
}

/// Sends A2A messages to remote agents and translates their event streams
/// into bus events. Owns the per-context in-flight guard: a context accepts
/// no new message until its active task reaches a terminal state or is
/// canceled.
pub struct Transport {
    http: reqwest::Client,
    bus: EventBus,
    artifacts: Arc<ArtifactStore>,
    active: DashMap<String, ActiveTask>,
    escalations: DashMap<String, PendingEscalation>,
    retry_base: Duration,
    max_retries: u32,
}

impl Transport {
    pub fn new(bus: EventBus, artifacts: Arc<ArtifactStore>) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(timeouts::CONNECT)
            .build()
            .expect("failed to build http client");
        Transport {
            http,
            bus,
            artifacts,
            active: DashMap::new(),
            escalations: DashMap::new(),
            retry_base: RETRY_BASE,
            max_retries: MAX_RETRIES,
        }
    }

    pub fn with_retry(mut self, base: Duration, max_retries: u32) -> Self {
        self.retry_base = base;
        self.max_retries = max_retries;
        self
    }

    /// Dispatch one message to a remote agent and stream its reply.
    pub async fn send(
        &self,
        agent: &EnabledAgent,
        context_id: &str,
        text: &str,
        attachments: Vec<OutboundAttachment>,
        opts: SendOptions,
    ) -> Result<AgentReply, HostError> {
        let task_id = uuid::Uuid::new_v4().to_string();
        // The same token is watched by the stream loop, so cancel_context
        // aborts the in-flight dispatch.
        self.begin_task(context_id, &task_id, opts.cancel.clone())?;
        let _guard = TaskGuard {
            transport: self,
            context_id: context_id.to_string(),
        };

        self.bus.publish(Event::new(
            EventType::TaskCreated,
            context_id,
            json!({ "taskId": task_id, "agentName": agent.descriptor.name }),
        ));
        self.bus.publish(Event::new(
            EventType::OutgoingAgentMessage,
            context_id,
            json!({ "taskId": task_id, "agentName": agent.descriptor.name, "text": text }),
        ));

        let result = self
            .send_inner(agent, context_id, &task_id, text, attachments, &opts)
            .await;

        match &result {
            Ok(reply) => {
                self.set_state(context_id, TaskState::Completed);
                self.publish_state(context_id, &task_id, TaskState::Completed, None);
                self.bus.publish(Event::new(
                    EventType::TaskCompleted,
                    context_id,
                    json!({
                        "taskId": task_id,
                        "agentName": agent.descriptor.name,
                        "artifacts": reply.file_parts.iter().map(|f| &f.uri).collect::<Vec<_>>(),
                    }),
                ));
            }
            Err(err) if opts.cancel.is_cancelled() => {
                self.set_state(context_id, TaskState::Canceled);
                self.bus.publish(Event::new(
                    EventType::TaskCanceled,
                    context_id,
                    json!({ "taskId": task_id, "error": err.user_message() }),
                ));
            }
            Err(HostError::Timeout(detail)) => {
                self.set_state(context_id, TaskState::Failed);
                self.publish_state(context_id, &task_id, TaskState::Failed, Some(detail.as_str()));
                self.bus.publish(Event::new(
                    EventType::TaskFailed,
                    context_id,
                    json!({ "taskId": task_id, "error": format!("TimeoutError: {detail}") }),
                ));
            }
            Err(err) => {
                self.set_state(context_id, TaskState::Failed);
                self.publish_state(
                    context_id,
                    &task_id,
                    TaskState::Failed,
                    Some(&err.user_message()),
                );
                self.bus.publish(Event::new(
                    EventType::TaskFailed,
                    context_id,
                    json!({ "taskId": task_id, "error": err.user_message() }),
                ));
            }
        }
        result
    }

    async fn send_inner(
        &self,
        agent: &EnabledAgent,
        context_id: &str,
        task_id: &str,
        text: &str,
        attachments: Vec<OutboundAttachment>,
        opts: &SendOptions,
    ) -> Result<AgentReply, HostError> {
        let session_id = session_of(context_id);
        let mut parts: Vec<Part> = Vec::new();
        if !text.is_empty() {
            parts.push(Part::text(text));
        }
        for attachment in attachments {
            parts.push(self.normalize_attachment(session_id, attachment).await?);
        }

        let mut transcript = opts.transcript.clone();
        transcript.push(TranscriptLine {
            speaker: "user".to_string(),
            text: text.to_string(),
        });

        let mut outbound = parts;
        loop {
            let reply = self
                .stream_with_retry(agent, context_id, task_id, &outbound, opts)
                .await?;

            if reply.text.trim() != HUMAN_ESCALATION_SENTINEL {
                return Ok(reply);
            }

            // The agent asked for a human. Park the task as input_required
            // and wait for the resume callback.
            let human_text = self
                .escalate(agent, context_id, task_id, &transcript, opts)
                .await?;
            transcript.push(TranscriptLine {
                speaker: "human".to_string(),
                text: human_text.clone(),
            });
            self.set_state(context_id, TaskState::Running);
            self.publish_state(context_id, task_id, TaskState::Running, None);
            outbound = vec![Part::text(human_text)];
        }
    }

    async fn escalate(
        &self,
        agent: &EnabledAgent,
        context_id: &str,
        task_id: &str,
        transcript: &[TranscriptLine],
        opts: &SendOptions,
    ) -> Result<String, HostError> {
        const TRANSCRIPT_WINDOW: usize = 20;
        let window: Vec<TranscriptLine> = transcript
            .iter()
            .rev()
            .take(TRANSCRIPT_WINDOW)
            .rev()
            .cloned()
            .collect();

        let info = EscalationInfo {
            task_id: task_id.to_string(),
            context_id: context_id.to_string(),
            agent_name: agent.descriptor.name.clone(),
            transcript: window,
            requested_at: chrono::Utc::now(),
        };

        self.set_state(context_id, TaskState::InputRequired);
        self.bus.publish(Event::new(
            EventType::TaskUpdated,
            context_id,
            json!({
                "taskId": task_id,
                "state": TaskState::InputRequired,
                "agentName": info.agent_name,
                "transcript": info.transcript,
            }),
        ));

        let (responder, waiter) = oneshot::channel();
        self.escalations.insert(
            task_id.to_string(),
            PendingEscalation { info, responder },
        );

        let waited = tokio::select! {
            response = waiter => response,
            _ = tokio::time::sleep(opts.escalation_timeout) => {
                self.escalations.remove(task_id);
                return Err(HostError::EscalationTimeout(format!(
                    "no human response for task {task_id} within {:?}",
                    opts.escalation_timeout
                )));
            }
            _ = opts.cancel.cancelled() => {
                self.escalations.remove(task_id);
                return Err(HostError::Timeout("task canceled".into()));
            }
        };
        waited.map_err(|_| {
            HostError::EscalationTimeout(format!("escalation responder dropped for {task_id}"))
        })
    }

    /// Resume a task parked in `input_required` with the human's response.
    pub fn resume(&self, task_id: &str, response: String) -> Result<(), HostError> {
        let (_, pending) = self
            .escalations
            .remove(task_id)
            .ok_or_else(|| HostError::NotFound(format!("no pending escalation for {task_id}")))?;
        pending
            .responder
            .send(response)
            .map_err(|_| HostError::Conflict(format!("task {task_id} is no longer waiting")))
    }

    /// All tasks currently waiting on a human, not just the first.
    pub fn pending_escalations(&self) -> Vec<EscalationInfo> {
        self.escalations
            .iter()
            .map(|entry| entry.value().info.clone())
            .collect()
    }

    /// Abort the in-flight task on a context, if any.
    pub fn cancel_context(&self, context_id: &str) -> bool {
        if let Some(active) = self.active.get(context_id) {
            active.cancel.cancel();
            true
        } else {
            false
        }
    }

    pub fn active_state(&self, context_id: &str) -> Option<TaskState> {
        self.active.get(context_id).map(|t| t.state)
    }

    async fn stream_with_retry(
        &self,
        agent: &EnabledAgent,
        context_id: &str,
        task_id: &str,
        parts: &[Part],
        opts: &SendOptions,
    ) -> Result<AgentReply, HostError> {
        let mut backoff = self.retry_base;
        let mut attempt = 0;
        loop {
            match self
                .stream_once(agent, context_id, task_id, parts, opts)
                .await
            {
                Err(HostError::AgentUnreachable(detail)) if attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(
                        "agent {} unreachable ({detail}), retry {attempt}/{} in {backoff:?}",
                        agent.descriptor.name,
                        self.max_retries
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        _ = opts.cancel.cancelled() => {
                            return Err(HostError::Timeout("task canceled".into()));
                        }
                    }
                    backoff = (backoff * 2).min(RETRY_CAP);
                }
                other => return other,
            }
        }
    }

    async fn stream_once(
        &self,
        agent: &EnabledAgent,
        context_id: &str,
        task_id: &str,
        parts: &[Part],
        opts: &SendOptions,
    ) -> Result<AgentReply, HostError> {
        let params = MessageSendParams {
            message_id: uuid::Uuid::new_v4().to_string(),
            context_id: context_id.to_string(),
            role: Role::User,
            parts: parts.iter().cloned().map(WirePart::from).collect(),
            agent_mode: true,
            enable_inter_agent_memory: true,
            workflow: opts.workflow_text.clone(),
            available_workflows: opts.available_workflows.clone(),
        };

        let url = format!("{}/message/send", agent.url.trim_end_matches('/'));
        let mut es = self
            .http
            .post(&url)
            .json(&SendRequest { params })
            .eventsource()
            .map_err(|e| HostError::Protocol(e.to_string()))?;

        self.set_state(context_id, TaskState::Running);
        self.publish_state(context_id, task_id, TaskState::Running, None);

        let deadline = tokio::time::Instant::now() + opts.timeout;
        let mut reply = AgentReply::default();
        let mut chunks = String::new();
        let mut complete_text: Option<String> = None;
        let mut stuck_rounds: u32 = 0;
        let mut last_approved: Vec<String> = Vec::new();

        loop {
            let event = tokio::select! {
                event = es.next() => event,
                _ = opts.cancel.cancelled() => {
                    es.close();
                    self.abort_remote(agent, task_id).await;
                    return Err(HostError::Timeout("task canceled".into()));
                }
                _ = tokio::time::sleep_until(deadline) => {
                    es.close();
                    self.abort_remote(agent, task_id).await;
                    return Err(HostError::Timeout(format!(
                        "agent {} did not finish within {:?}",
                        agent.descriptor.name, opts.timeout
                    )));
                }
            };

            let Some(event) = event else { break };
            match event {
                Ok(EsEvent::Open) => continue,
                Ok(EsEvent::Message(message)) => {
                    if message.data.trim().is_empty() {
                        continue;
                    }
                    let frame: AgentStreamFrame = serde_json::from_str(&message.data)
                        .map_err(|e| HostError::Protocol(format!("malformed frame: {e}")))?;
                    match self
                        .handle_frame(
                            agent, context_id, task_id, frame, &mut reply, &mut chunks,
                            &mut complete_text, &mut stuck_rounds, &mut last_approved,
                        )
                        .await?
                    {
                        FrameOutcome::Continue => {}
                        FrameOutcome::Finished => break,
                    }
                }
                Err(EsError::StreamEnded) => break,
                Err(EsError::InvalidStatusCode(status, _)) if status.is_server_error() => {
                    return Err(HostError::AgentUnreachable(format!(
                        "{} answered {status}",
                        agent.descriptor.name
                    )));
                }
                Err(EsError::InvalidStatusCode(status, _)) => {
                    return Err(HostError::Protocol(format!(
                        "{} answered {status}",
                        agent.descriptor.name
                    )));
                }
                Err(EsError::Transport(err)) => {
                    return Err(HostError::AgentUnreachable(err.to_string()));
                }
                Err(err) => return Err(HostError::Protocol(err.to_string())),
            }
        }

        reply.text = complete_text.unwrap_or(chunks);
        Ok(reply)
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_frame(
        &self,
        agent: &EnabledAgent,
        context_id: &str,
        task_id: &str,
        frame: AgentStreamFrame,
        reply: &mut AgentReply,
        chunks: &mut String,
        complete_text: &mut Option<String>,
        stuck_rounds: &mut u32,
        last_approved: &mut Vec<String>,
    ) -> Result<FrameOutcome, HostError> {
        match frame.event_type.as_str() {
            "message_chunk" => {
                let delta = frame
                    .data
                    .as_ref()
                    .and_then(|d| d.get("text"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                chunks.push_str(delta);
                self.bus.publish(Event::new(
                    EventType::MessageChunk,
                    context_id,
                    json!({ "taskId": task_id, "text": delta }),
                ));
            }
            "message" | "message_complete" => {
                let parts = frame
                    .parts
                    .as_deref()
                    .map(normalize_parts)
                    .unwrap_or_default();
                self.collect_parts(context_id, task_id, &parts, reply, complete_text);
                let event_type = if frame.event_type == "message" {
                    EventType::Message
                } else {
                    EventType::MessageComplete
                };
                self.bus.publish(Event::new(
                    event_type,
                    context_id,
                    json!({ "taskId": task_id, "agentName": agent.descriptor.name }),
                ));
                if frame.event_type == "message_complete" {
                    return Ok(FrameOutcome::Finished);
                }
            }
            "task_updated" | "status_update" => {
                let state = frame
                    .data
                    .as_ref()
                    .and_then(|d| d.get("state"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if state == "requires_action" {
                    self.approve_tools(
                        agent,
                        context_id,
                        task_id,
                        frame.data.as_ref(),
                        stuck_rounds,
                        last_approved,
                    )
                    .await?;
                } else {
                    self.bus.publish(Event::new(
                        EventType::TaskUpdated,
                        context_id,
                        json!({ "taskId": task_id, "state": state }),
                    ));
                    if state == "failed" {
                        let detail = frame
                            .data
                            .as_ref()
                            .and_then(|d| d.get("error"))
                            .and_then(Value::as_str)
                            .unwrap_or("remote agent reported failure");
                        return Err(HostError::AgentUnreachable(detail.to_string()));
                    }
                }
            }
            "tool_call" | "remote_agent_activity" => {
                if let Some(name) = frame
                    .data
                    .as_ref()
                    .and_then(|d| d.get("tool"))
                    .and_then(Value::as_str)
                {
                    reply.tools_used.push(name.to_string());
                }
                self.bus.publish(Event::new(
                    EventType::RemoteAgentActivity,
                    context_id,
                    json!({
                        "taskId": task_id,
                        "agentName": agent.descriptor.name,
                        "activity": frame.data,
                    }),
                ));
            }
            "file_uploaded" => {
                let parts = frame
                    .parts
                    .as_deref()
                    .map(normalize_parts)
                    .unwrap_or_default();
                self.collect_parts(context_id, task_id, &parts, reply, complete_text);
            }
            "token_usage" => {
                reply.token_usage = frame
                    .data
                    .as_ref()
                    .and_then(|d| d.get("total_tokens"))
                    .and_then(Value::as_u64)
                    .map(|t| t as u32);
            }
            "error" => {
                let detail = frame
                    .data
                    .as_ref()
                    .and_then(|d| d.get("error"))
                    .and_then(Value::as_str)
                    .unwrap_or("remote agent error");
                return Err(HostError::Protocol(detail.to_string()));
            }
            other => {
                tracing::debug!("ignoring unrecognized agent event type {other:?}");
            }
        }
        Ok(FrameOutcome::Continue)
    }

    fn collect_parts(
        &self,
        context_id: &str,
        task_id: &str,
        parts: &[Part],
        reply: &mut AgentReply,
        complete_text: &mut Option<String>,
    ) {
        for part in parts {
            match part {
                Part::Text(text) => {
                    *complete_text = Some(text.text.clone());
                }
                Part::File(file) => {
                    self.bus.publish(Event::new(
                        EventType::FileUploaded,
                        context_id,
                        json!({
                            "taskId": task_id,
                            "name": file.name,
                            "uri": file.uri,
                            "mimeType": file.mime_type,
                        }),
                    ));
                    reply.file_parts.push(file.clone());
                }
                Part::Data(data) => reply.data_parts.push(data.clone()),
            }
        }
    }

    /// Auto-approve every surfaced tool call; repeated identical approval
    /// rounds mean the agent is stuck.
    async fn approve_tools(
        &self,
        agent: &EnabledAgent,
        context_id: &str,
        task_id: &str,
        data: Option<&Value>,
        stuck_rounds: &mut u32,
        last_approved: &mut Vec<String>,
    ) -> Result<(), HostError> {
        if agent.descriptor.tool_approval == ToolApprovalPolicy::Deny {
            return Err(HostError::Protocol(format!(
                "agent {} requested tool approval but its policy denies it",
                agent.descriptor.name
            )));
        }

        let call_ids: Vec<String> = data
            .and_then(|d| d.get("tool_calls"))
            .and_then(Value::as_array)
            .map(|calls| {
                calls
                    .iter()
                    .filter_map(|c| {
                        c.get("id")
                            .or_else(|| c.get("toolCallId"))
                            .and_then(Value::as_str)
                            .map(str::to_string)
                    })
                    .collect()
            })
            .unwrap_or_default();

        if call_ids == *last_approved {
            *stuck_rounds += 1;
            if *stuck_rounds >= MAX_STUCK_APPROVALS {
                return Err(HostError::AgentUnreachable(format!(
                    "agent {} stuck in requires_action after {MAX_STUCK_APPROVALS} approval rounds",
                    agent.descriptor.name
                )));
            }
        } else {
            *stuck_rounds = 0;
            *last_approved = call_ids.clone();
        }

        let url = format!("{}/tool-approval", agent.url.trim_end_matches('/'));
        let body = json!({
            "taskId": task_id,
            "contextId": context_id,
            "approvals": call_ids
                .iter()
                .map(|id| json!({ "toolCallId": id, "approved": true }))
                .collect::<Vec<_>>(),
        });
        self.http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| HostError::AgentUnreachable(e.to_string()))?
            .error_for_status()
            .map_err(|e| HostError::Protocol(e.to_string()))?;
        Ok(())
    }

    async fn abort_remote(&self, agent: &EnabledAgent, task_id: &str) {
        let url = format!(
            "{}/tasks/{task_id}/cancel",
            agent.url.trim_end_matches('/')
        );
        if let Err(err) = self.http.post(&url).send().await {
            tracing::debug!("abort of task {task_id} not delivered: {err}");
        }
    }

    async fn normalize_attachment(
        &self,
        session_id: &str,
        attachment: OutboundAttachment,
    ) -> Result<Part, HostError> {
        let uri = match attachment.source {
            AttachmentSource::Bytes(bytes) => {
                let put = self
                    .artifacts
                    .put(session_id, &attachment.name, bytes, &attachment.mime_type)
                    .await
                    .map_err(|e| HostError::Store(e.to_string()))?;
                put.uri
            }
            AttachmentSource::Uri(uri) => {
                // Store-owned URIs get a fresh signature so the agent can
                // reach them for the task's whole lifetime.
                match self.artifacts.fresh_uri(&uri).await {
                    Ok(fresh) => fresh,
                    Err(_) => uri,
                }
            }
        };
        Ok(Part::File(FilePart {
            name: attachment.name,
            uri,
            mime_type: attachment.mime_type,
            role: attachment.role,
        }))
    }

    fn begin_task(
        &self,
        context_id: &str,
        task_id: &str,
        cancel: CancellationToken,
    ) -> Result<(), HostError> {
        match self.active.entry(context_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(entry) if !entry.get().state.is_terminal() => {
                Err(HostError::Conflict(format!(
                    "task {} is still in flight on context {context_id}",
                    entry.get().task_id
                )))
            }
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                entry.insert(ActiveTask {
                    task_id: task_id.to_string(),
                    state: TaskState::Submitted,
                    cancel,
                });
                Ok(())
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(ActiveTask {
                    task_id: task_id.to_string(),
                    state: TaskState::Submitted,
                    cancel,
                });
                Ok(())
            }
        }
    }

    fn set_state(&self, context_id: &str, state: TaskState) {
        if let Some(mut active) = self.active.get_mut(context_id) {
            if active.state.can_transition_to(state) || active.state == state {
                active.state = state;
            }
        }
    }

    fn publish_state(
        &self,
        context_id: &str,
        task_id: &str,
        state: TaskState,
        error: Option<&str>,
    ) {
        let mut data = json!({ "taskId": task_id, "state": state });
        if let Some(error) = error {
            data["error"] = Value::String(error.to_string());
        }
        self.bus
            .publish(Event::new(EventType::TaskUpdated, context_id, data));
    }
}

enum FrameOutcome {
    Continue,
    Finished,
}

/// Clears the in-flight slot when `send` unwinds.
struct TaskGuard<'a> {
    transport: &'a Transport,
    context_id: String,
}

impl Drop for TaskGuard<'_> {
    fn drop(&mut self) {
        self.transport.active.remove(&self.context_id);
    }
}
