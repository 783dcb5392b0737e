use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use crate::error::error_response;
use crate::state::AppState;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/escalations").route(web::get().to(list)))
        .service(
            web::resource("/api/escalations/{task_id}/respond").route(web::post().to(respond)),
        );
}

/// Every task currently waiting on a human, with its transcript.
async fn list(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "escalations": state.orchestrator.transport().pending_escalations(),
    }))
}

#[derive(Debug, Deserialize)]
struct RespondBody {
    response: String,
}

/// The human-response callback: resumes the parked task.
async fn respond(
    state: web::Data<AppState>,
    task_id: web::Path<String>,
    body: web::Json<RespondBody>,
) -> HttpResponse {
    match state
        .orchestrator
        .transport()
        .resume(&task_id, body.into_inner().response)
    {
        Ok(()) => HttpResponse::Ok().json(json!({ "success": true })),
        Err(err) => error_response(&err),
    }
}
