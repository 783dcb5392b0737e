use actix_web::{web, HttpResponse};
use relay_stores::{ActiveWorkflow, ActiveWorkflowRepo};
use relay_types::{Event, EventType};
use serde::Deserialize;
use serde_json::json;

use crate::error::{error_response, store_err};
use crate::state::AppState;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/api/active-workflow")
            .route(web::get().to(get_single))
            .route(web::post().to(set_single))
            .route(web::delete().to(clear_single)),
    )
    .service(
        web::resource("/api/active-workflows")
            .route(web::get().to(get_list))
            .route(web::post().to(set_list))
            .route(web::delete().to(clear_list)),
    )
    .service(web::resource("/api/active-workflows/add").route(web::post().to(add_to_list)))
    .service(
        web::resource("/api/active-workflows/{workflow_id}")
            .route(web::delete().to(remove_from_list)),
    );
}

#[derive(Debug, Deserialize)]
struct SessionQuery {
    session_id: String,
}

async fn get_single(state: web::Data<AppState>, q: web::Query<SessionQuery>) -> HttpResponse {
    match state.stores.active_workflows.get(&q.session_id).await {
        Ok(active) => HttpResponse::Ok().json(active),
        Err(err) => error_response(&store_err(err)),
    }
}

async fn set_single(
    state: web::Data<AppState>,
    q: web::Query<SessionQuery>,
    body: web::Json<ActiveWorkflow>,
) -> HttpResponse {
    let active = body.into_inner();
    if let Err(err) = state
        .stores
        .active_workflows
        .set(&q.session_id, active.clone())
        .await
    {
        return error_response(&store_err(err));
    }
    // Everyone collaborating in the session sees the change live.
    state.bus.publish(Event::new(
        EventType::ActiveWorkflowChanged,
        q.session_id.clone(),
        json!({
            "contextId": q.session_id,
            "workflow": active.workflow,
            "name": active.name,
            "goal": active.goal,
        }),
    ));
    HttpResponse::Ok().json(json!({ "success": true, "session_id": q.session_id }))
}

async fn clear_single(state: web::Data<AppState>, q: web::Query<SessionQuery>) -> HttpResponse {
    if let Err(err) = state.stores.active_workflows.clear(&q.session_id).await {
        return error_response(&store_err(err));
    }
    state.bus.publish(Event::new(
        EventType::ActiveWorkflowChanged,
        q.session_id.clone(),
        json!({ "contextId": q.session_id, "workflow": "", "name": "", "goal": "" }),
    ));
    HttpResponse::Ok().json(json!({ "success": true, "session_id": q.session_id }))
}

async fn get_list(state: web::Data<AppState>, q: web::Query<SessionQuery>) -> HttpResponse {
    match state.stores.active_workflows.get_list(&q.session_id).await {
        Ok(workflows) => HttpResponse::Ok().json(json!({ "workflows": workflows })),
        Err(err) => error_response(&store_err(err)),
    }
}

#[derive(Debug, Deserialize)]
struct SetListBody {
    #[serde(default)]
    workflows: Vec<serde_json::Value>,
}

async fn set_list(
    state: web::Data<AppState>,
    q: web::Query<SessionQuery>,
    body: web::Json<SetListBody>,
) -> HttpResponse {
    match state
        .stores
        .active_workflows
        .set_list(&q.session_id, body.into_inner().workflows)
        .await
    {
        Ok(workflows) => {
            broadcast_list(&state, &q.session_id, &workflows);
            HttpResponse::Ok().json(json!({ "success": true, "workflows": workflows }))
        }
        Err(err) => error_response(&store_err(err)),
    }
}

async fn add_to_list(
    state: web::Data<AppState>,
    q: web::Query<SessionQuery>,
    body: web::Json<serde_json::Value>,
) -> HttpResponse {
    match state
        .stores
        .active_workflows
        .add_to_list(&q.session_id, body.into_inner())
        .await
    {
        Ok(workflows) => {
            broadcast_list(&state, &q.session_id, &workflows);
            HttpResponse::Ok().json(json!({ "success": true, "workflows": workflows }))
        }
        Err(err) => error_response(&store_err(err)),
    }
}

async fn remove_from_list(
    state: web::Data<AppState>,
    workflow_id: web::Path<String>,
    q: web::Query<SessionQuery>,
) -> HttpResponse {
    match state
        .stores
        .active_workflows
        .remove_from_list(&q.session_id, &workflow_id)
        .await
    {
        Ok(workflows) => {
            broadcast_list(&state, &q.session_id, &workflows);
            HttpResponse::Ok().json(json!({ "success": true, "workflows": workflows }))
        }
        Err(err) => error_response(&store_err(err)),
    }
}

async fn clear_list(state: web::Data<AppState>, q: web::Query<SessionQuery>) -> HttpResponse {
    if let Err(err) = state.stores.active_workflows.clear_list(&q.session_id).await {
        return error_response(&store_err(err));
    }
    broadcast_list(&state, &q.session_id, &[]);
    HttpResponse::Ok().json(json!({ "success": true, "workflows": [] }))
}

fn broadcast_list(state: &AppState, session_id: &str, workflows: &[serde_json::Value]) {
    state.bus.publish(Event::new(
        EventType::ActiveWorkflowsChanged,
        session_id.to_string(),
        json!({ "contextId": session_id, "workflows": workflows }),
    ));
}
