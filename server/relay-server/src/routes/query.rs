use std::time::{Duration, Instant};

use actix_web::{web, HttpResponse};
use relay_a2a::{FileRole, WorkflowListing};
use relay_core::{compile, TurnRequest};
use relay_core::transport::{AttachmentSource, OutboundAttachment};
use relay_stores::{ActiveWorkflowRepo, WorkflowRepo};
use relay_types::{HostError, Workflow};
use serde::Deserialize;
use serde_json::json;

use crate::auth::AuthedUser;
use crate::error::{error_response, store_err};
use crate::state::AppState;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/query").route(web::post().to(query)));
}

#[derive(Debug, Deserialize)]
struct QueryRequest {
    query: String,
    user_id: String,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default = "default_timeout")]
    timeout: u64,
    #[serde(default = "default_true")]
    enable_routing: bool,
    #[serde(default)]
    activated_workflow_ids: Vec<String>,
    /// Explicit plan text pins the workflow and disables routing.
    #[serde(default)]
    workflow: Option<String>,
    #[serde(default)]
    files: Vec<QueryFile>,
}

#[derive(Debug, Deserialize)]
struct QueryFile {
    uri: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    role: Option<String>,
}

fn default_timeout() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

/// Synchronous orchestrated query: blocks until the final response or the
/// configured timeout, while subscribers watch the same turn stream live
/// over `/events`.
async fn query(
    state: web::Data<AppState>,
    user: AuthedUser,
    body: web::Json<QueryRequest>,
) -> HttpResponse {
    let body = body.into_inner();
    if body.user_id != user.user_id {
        return error_response(&HostError::Auth(
            "user_id does not match the authenticated user".into(),
        ));
    }
    if body.query.trim().is_empty() {
        return error_response(&HostError::Validation("query must not be empty".into()));
    }

    let session_id = body.session_id.clone().unwrap_or_else(|| body.user_id.clone());
    let conversation_id = body
        .conversation_id
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    ensure_session_agents(&state, &session_id).await;

    let mut request = TurnRequest::new(&session_id, &conversation_id, &body.query);
    request.timeout = Duration::from_secs(body.timeout);
    request.attachments = body
        .files
        .iter()
        .map(|file| OutboundAttachment {
            name: file
                .name
                .clone()
                .or_else(|| file.uri.rsplit('/').next().map(str::to_string))
                .unwrap_or_else(|| "file".to_string()),
            mime_type: file
                .mime_type
                .clone()
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            role: FileRole::parse(file.role.as_deref()),
            source: AttachmentSource::Uri(file.uri.clone()),
        })
        .collect();

    if let Some(workflow) = &body.workflow {
        request.workflow_text = Some(workflow.clone());
    } else if body.enable_routing {
        match routing_candidates(&state, &session_id, &body.activated_workflow_ids).await {
            Ok(candidates) if !candidates.is_empty() => {
                request.available_workflows = Some(candidates);
            }
            Ok(_) => {}
            Err(err) => return error_response(&err),
        }
    }

    let started = Instant::now();
    match state.orchestrator.run_turn(request).await {
        Ok(outcome) => HttpResponse::Ok().json(json!({
            "success": true,
            "query": body.query,
            "result": outcome.text,
            "execution_time_seconds": round2(started.elapsed().as_secs_f64()),
            "session_id": session_id,
            "conversation_id": conversation_id,
        })),
        Err(err) => error_response(&err),
    }
}

/// Routing candidates in first-declaration order: either the explicitly
/// activated workflows, or everything activated for the session.
async fn routing_candidates(
    state: &AppState,
    session_id: &str,
    activated_ids: &[String],
) -> Result<Vec<WorkflowListing>, HostError> {
    let mut workflows: Vec<Workflow> = Vec::new();
    if activated_ids.is_empty() {
        let active = state
            .stores
            .active_workflows
            .get_list(session_id)
            .await
            .map_err(store_err)?;
        for entry in active {
            if let Some(id) = entry.get("id").and_then(serde_json::Value::as_str) {
                if let Some(workflow) =
                    state.stores.workflows.get(id).await.map_err(store_err)?
                {
                    workflows.push(workflow);
                }
            }
        }
    } else {
        for id in activated_ids {
            if let Some(workflow) = state.stores.workflows.get(id).await.map_err(store_err)? {
                workflows.push(workflow);
            }
        }
    }

    let mut listings = Vec::with_capacity(workflows.len());
    for workflow in workflows {
        let plan = compile(&workflow.steps, &workflow.edges)?;
        listings.push(WorkflowListing {
            id: workflow.id.clone(),
            name: workflow.name.clone(),
            goal: workflow.goal.clone(),
            workflow: plan.to_prompt_text(),
            agents: workflow
                .required_agents()
                .into_iter()
                .map(str::to_string)
                .collect(),
        });
    }
    Ok(listings)
}

/// A fresh session starts with every globally registered agent enabled on
/// its dev URL; per-session enable/disable refines from there.
async fn ensure_session_agents(state: &AppState, session_id: &str) {
    if !state.sessions.snapshot(session_id).is_empty() {
        return;
    }
    for descriptor in state.agents.list() {
        if let Some(url) = descriptor.dev_url().map(str::to_string) {
            state.sessions.enable(session_id, descriptor, url).await;
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
