use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use relay_a2a::{FilePart, WorkflowListing};
use relay_types::config::timeouts;
use relay_types::{ContextId, EnabledAgent, Event, EventType, HostError};
use serde_json::json;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::bus::EventBus;
use crate::llm::{ChatMessage, DispatchCall, LlmExecutor};
use crate::registry::SessionRegistry;
use crate::transport::{
    AttachmentSource, OutboundAttachment, SendOptions, TranscriptLine, Transport,
};

pub const MAX_ITERATIONS: usize = 25;
pub const MAX_PARALLEL_AGENT_CALLS: usize = 8;

/// Notified as the orchestrator dispatches to agents; the workflow
/// executor uses this to tie dispatches back to plan entries.
pub trait DispatchObserver: Send + Sync {
    fn dispatch_started(&self, agent_name: &str);
    fn dispatch_finished(&self, agent_name: &str, success: bool);
}

#[derive(Clone)]
pub struct TurnRequest {
    pub session_id: String,
    pub conversation_id: String,
    pub message: String,
    pub attachments: Vec<OutboundAttachment>,
    pub workflow_text: Option<String>,
    pub workflow_goal: Option<String>,
    pub available_workflows: Option<Vec<WorkflowListing>>,
    pub timeout: Duration,
    pub cancel: CancellationToken,
    pub observer: Option<Arc<dyn DispatchObserver>>,
}

impl TurnRequest {
    pub fn new(session_id: &str, conversation_id: &str, message: &str) -> Self {
        TurnRequest {
            session_id: session_id.to_string(),
            conversation_id: conversation_id.to_string(),
            message: message.to_string(),
            attachments: Vec::new(),
            workflow_text: None,
            workflow_goal: None,
            available_workflows: None,
            timeout: timeouts::LLM_TURN,
            cancel: CancellationToken::new(),
            observer: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DispatchRecord {
    pub agent_name: String,
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TurnOutcome {
    pub text: String,
    pub artifacts: Vec<FilePart>,
    pub dispatched: Vec<DispatchRecord>,
}

/// Drives one conversation turn: the host LLM decides, dispatches fan out
/// to remote agents in parallel, replies feed back as tool results, and
/// the loop ends on a final textual answer.
pub struct HostOrchestrator {
    llm: Arc<dyn LlmExecutor>,
    transport: Arc<Transport>,
    sessions: Arc<SessionRegistry>,
    bus: EventBus,
    turn_locks: DashMap<String, Arc<Mutex<()>>>,
    dispatch_permits: Arc<Semaphore>,
    max_iterations: usize,
}

impl HostOrchestrator {
    pub fn new(
        llm: Arc<dyn LlmExecutor>,
        transport: Arc<Transport>,
        sessions: Arc<SessionRegistry>,
        bus: EventBus,
    ) -> Self {
        HostOrchestrator {
            llm,
            transport,
            sessions,
            bus,
            turn_locks: DashMap::new(),
            dispatch_permits: Arc::new(Semaphore::new(MAX_PARALLEL_AGENT_CALLS)),
            max_iterations: MAX_ITERATIONS,
        }
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.transport
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub async fn run_turn(&self, request: TurnRequest) -> Result<TurnOutcome, HostError> {
        let context = ContextId::new(&request.session_id, &request.conversation_id)?;
        let context_id = context.as_str().to_string();

        // One turn at a time per context; a second user message while a
        // task is in flight is rejected, not queued.
        let lock = self
            .turn_locks
            .entry(context_id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _turn = lock.try_lock_owned().map_err(|_| {
            HostError::Conflict(format!("a task is already in flight on {context_id}"))
        })?;

        let enabled = self.sessions.snapshot(&request.session_id);
        let deadline = Instant::now() + request.timeout;

        let result = self
            .turn_loop(&request, &context_id, &enabled, deadline)
            .await;

        match &result {
            Ok(outcome) => {
                self.bus.publish(Event::new(
                    EventType::FinalResponse,
                    context_id.clone(),
                    json!({
                        "contextId": context_id,
                        "conversationId": request.conversation_id,
                        "result": truncate(&outcome.text, 500),
                        "isComplete": true,
                    }),
                ));
            }
            Err(err) => {
                self.bus
                    .publish(Event::error(context_id.clone(), err.kind(), &err.to_string()));
            }
        }
        result
    }

    async fn turn_loop(
        &self,
        request: &TurnRequest,
        context_id: &str,
        enabled: &HashMap<String, EnabledAgent>,
        deadline: Instant,
    ) -> Result<TurnOutcome, HostError> {
        let mut messages = vec![
            ChatMessage::system(self.system_prompt(request, enabled)),
            ChatMessage::user(request.message.clone()),
        ];
        let mut outcome = TurnOutcome::default();
        // Artifacts available for later dispatches, keyed by file name.
        let mut artifact_pool: HashMap<String, FilePart> = HashMap::new();

        for iteration in 0..self.max_iterations {
            if request.cancel.is_cancelled() {
                return Err(HostError::Timeout("turn canceled".into()));
            }
            let turn = tokio::time::timeout_at(deadline, self.llm.execute(&messages))
                .await
                .map_err(|_| {
                    HostError::Timeout(format!(
                        "LLM turn exceeded {:?} after {iteration} iterations",
                        request.timeout
                    ))
                })??;

            if turn.is_final() {
                outcome.text = turn.content;
                return Ok(outcome);
            }

            let dispatches = turn.dispatches.clone();
            messages.push(ChatMessage::Assistant {
                content: turn.content.clone(),
                dispatches: dispatches.clone(),
            });

            let transcript = transcript_of(&messages);
            let results = self
                .fan_out(request, context_id, enabled, &dispatches, &artifact_pool, &transcript, deadline)
                .await;

            for (dispatch, result) in dispatches.iter().zip(results) {
                let (content, record) = match result {
                    Ok(reply) => {
                        for file in &reply.file_parts {
                            artifact_pool.insert(file.name.clone(), file.clone());
                            outcome.artifacts.push(file.clone());
                        }
                        let mut summary = json!({ "text": reply.text });
                        if !reply.file_parts.is_empty() {
                            summary["files"] = json!(reply
                                .file_parts
                                .iter()
                                .map(|f| json!({ "name": f.name, "uri": f.uri }))
                                .collect::<Vec<_>>());
                        }
                        if !reply.data_parts.is_empty() {
                            summary["data"] = json!(reply
                                .data_parts
                                .iter()
                                .map(|d| d.payload.clone())
                                .collect::<Vec<_>>());
                        }
                        (
                            summary.to_string(),
                            DispatchRecord {
                                agent_name: dispatch.agent_name.clone(),
                                success: true,
                                error: None,
                            },
                        )
                    }
                    Err(err) => {
                        // A failed dispatch does not abort the turn; the
                        // LLM sees the error and may retry or route around.
                        let message = err.user_message();
                        (
                            json!({ "error": message }).to_string(),
                            DispatchRecord {
                                agent_name: dispatch.agent_name.clone(),
                                success: false,
                                error: Some(message),
                            },
                        )
                    }
                };
                outcome.dispatched.push(record);
                messages.push(ChatMessage::ToolResult {
                    call_id: dispatch.call_id.clone(),
                    content,
                });
            }

            if !turn.content.is_empty() {
                outcome.text = turn.content;
            }
        }

        tracing::warn!(
            "turn on {context_id} hit the iteration cap ({}) without a final answer",
            self.max_iterations
        );
        Ok(outcome)
    }

    #[allow(clippy::too_many_arguments)]
    async fn fan_out(
        &self,
        request: &TurnRequest,
        context_id: &str,
        enabled: &HashMap<String, EnabledAgent>,
        dispatches: &[DispatchCall],
        artifact_pool: &HashMap<String, FilePart>,
        transcript: &[TranscriptLine],
        deadline: Instant,
    ) -> Vec<Result<crate::transport::AgentReply, HostError>> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let futures: Vec<_> = dispatches
            .iter()
            .map(|dispatch| {
                let permits = self.dispatch_permits.clone();
                let transport = self.transport.clone();
                let agent = enabled.get(&dispatch.agent_name).cloned();
                let attachments =
                    self.attachments_for(request, dispatch, artifact_pool);
                let opts = SendOptions {
                    timeout: remaining.min(timeouts::READ),
                    workflow_text: request.workflow_text.clone(),
                    workflow_goal: request.workflow_goal.clone(),
                    available_workflows: request.available_workflows.clone(),
                    transcript: transcript.to_vec(),
                    cancel: request.cancel.child_token(),
                    ..SendOptions::default()
                };
                let observer = request.observer.clone();
                // Each dispatch targets its own sub-context so parallel
                // siblings never trip the per-context in-flight guard.
                let dispatch_context =
                    format!("{context_id}--{}", &dispatch.call_id);
                let dispatch = dispatch.clone();
                async move {
                    let _permit = permits
                        .acquire()
                        .await
                        .map_err(|_| HostError::Timeout("dispatch pool closed".into()))?;
                    let Some(agent) = agent else {
                        return Err(HostError::NotFound(format!(
                            "agent {} is not enabled for this session",
                            dispatch.agent_name
                        )));
                    };
                    if let Some(observer) = &observer {
                        observer.dispatch_started(&dispatch.agent_name);
                    }
                    let result = transport
                        .send(
                            &agent,
                            &dispatch_context,
                            &dispatch.message,
                            attachments,
                            opts,
                        )
                        .await;
                    if let Some(observer) = &observer {
                        observer.dispatch_finished(&dispatch.agent_name, result.is_ok());
                    }
                    result
                }
            })
            .collect();

        futures::future::join_all(futures).await
    }

    /// The user's own files ride along on every dispatch; produced
    /// artifacts are forwarded when the LLM names them, roles preserved.
    fn attachments_for(
        &self,
        request: &TurnRequest,
        dispatch: &DispatchCall,
        artifact_pool: &HashMap<String, FilePart>,
    ) -> Vec<OutboundAttachment> {
        let mut attachments = request.attachments.clone();
        for name in &dispatch.attachments {
            if let Some(file) = artifact_pool.get(name) {
                attachments.push(OutboundAttachment {
                    name: file.name.clone(),
                    mime_type: file.mime_type.clone(),
                    role: file.role.clone(),
                    source: AttachmentSource::Uri(file.uri.clone()),
                });
            }
        }
        attachments
    }

    fn system_prompt(
        &self,
        request: &TurnRequest,
        enabled: &HashMap<String, EnabledAgent>,
    ) -> String {
        let mut agents: Vec<&EnabledAgent> = enabled.values().collect();
        agents.sort_by(|a, b| a.descriptor.name.cmp(&b.descriptor.name));

        let mut prompt = String::from(
            "You are the host orchestrator for a set of remote agents. \
             Use the send_message tool to delegate work to an agent; answer \
             directly only when no agent is needed or all results are in.\n\n\
             Enabled agents:\n",
        );
        for agent in agents {
            prompt.push_str(&format!("- {}\n", agent.descriptor.capability_line()));
        }

        if let Some(goal) = &request.workflow_goal {
            prompt.push_str(&format!("\nGoal: {goal}\n"));
        }
        if let Some(workflow) = &request.workflow_text {
            prompt.push_str(&format!(
                "\nFollow this workflow plan, step by step. Steps sharing a \
                 number (2a, 2b) may run in parallel in a single response; a \
                 step labeled EVALUATE is answered by you with true or false, \
                 then only the matching branch runs and the other is skipped.\n\
                 {workflow}\n"
            ));
        } else if let Some(workflows) = &request.available_workflows {
            prompt.push_str(
                "\nClassify the user's intent against these workflows. If one \
                 matches, follow its plan; if several match, pick the first \
                 declared; otherwise answer directly.\n",
            );
            for listing in workflows {
                prompt.push_str(&format!(
                    "- {} (goal: {})\n{}\n",
                    listing.name, listing.goal, listing.workflow
                ));
            }
        }

        if !request.attachments.is_empty() {
            prompt.push_str("\nThe user attached these files (forwarded to every agent you dispatch):\n");
            for attachment in &request.attachments {
                prompt.push_str(&format!(
                    "- {} ({})\n",
                    attachment.name, attachment.mime_type
                ));
            }
        }
        prompt
    }
}

fn transcript_of(messages: &[ChatMessage]) -> Vec<TranscriptLine> {
    messages
        .iter()
        .filter_map(|m| match m {
            ChatMessage::User { content } => Some(TranscriptLine {
                speaker: "user".to_string(),
                text: content.clone(),
            }),
            ChatMessage::Assistant { content, .. } if !content.is_empty() => {
                Some(TranscriptLine {
                    speaker: "assistant".to_string(),
                    text: content.clone(),
                })
            }
            _ => None,
        })
        .collect()
}

fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        text.to_string()
    } else {
        text.chars().take(limit).collect()
    }
}
