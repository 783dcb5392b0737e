use actix_web::{web, HttpResponse};
use relay_stores::WorkflowRepo;
use relay_types::{Edge, HostError, Step, Workflow};
use serde::Deserialize;
use serde_json::json;

use crate::auth::AuthedUser;
use crate::error::{error_response, store_err};
use crate::state::AppState;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/workflows/all").route(web::get().to(list_all)))
        .service(
            web::resource("/api/workflows")
                .route(web::get().to(list_mine))
                .route(web::post().to(create)),
        )
        .service(
            web::resource("/api/workflows/{id}")
                .route(web::get().to(get))
                .route(web::put().to(update))
                .route(web::delete().to(delete)),
        );
}

#[derive(Debug, Deserialize)]
struct WorkflowBody {
    name: String,
    #[serde(default)]
    goal: String,
    #[serde(default)]
    category: Option<String>,
    steps: Vec<Step>,
    #[serde(default)]
    edges: Vec<Edge>,
}

async fn list_mine(state: web::Data<AppState>, user: AuthedUser) -> HttpResponse {
    match state.stores.workflows.list_for_owner(&user.user_id).await {
        Ok(workflows) => HttpResponse::Ok().json(workflows),
        Err(err) => error_response(&store_err(err)),
    }
}

/// Unscoped listing used by routing and dashboards; deliberately
/// unauthenticated.
async fn list_all(state: web::Data<AppState>) -> HttpResponse {
    match state.stores.workflows.list_all().await {
        Ok(workflows) => HttpResponse::Ok().json(workflows),
        Err(err) => error_response(&store_err(err)),
    }
}

async fn get(state: web::Data<AppState>, _user: AuthedUser, id: web::Path<String>) -> HttpResponse {
    match state.stores.workflows.get(&id).await {
        Ok(Some(workflow)) => HttpResponse::Ok().json(workflow),
        Ok(None) => error_response(&HostError::NotFound(format!("unknown workflow {id}"))),
        Err(err) => error_response(&store_err(err)),
    }
}

async fn create(
    state: web::Data<AppState>,
    user: AuthedUser,
    body: web::Json<WorkflowBody>,
) -> HttpResponse {
    let body = body.into_inner();

    // Reject invalid DAGs at save time, not first run.
    if let Err(err) = relay_core::compile(&body.steps, &body.edges) {
        return error_response(&err);
    }

    let now = chrono::Utc::now();
    let workflow = Workflow {
        id: uuid::Uuid::new_v4().to_string(),
        name: body.name,
        goal: body.goal,
        category: body.category,
        owner_id: user.user_id,
        steps: body.steps,
        edges: body.edges,
        created_at: now,
        updated_at: now,
    };
    let id = workflow.id.clone();
    match state.stores.workflows.store(workflow).await {
        Ok(()) => HttpResponse::Ok().json(json!({ "success": true, "id": id })),
        Err(err) => error_response(&store_err(err)),
    }
}

async fn update(
    state: web::Data<AppState>,
    user: AuthedUser,
    id: web::Path<String>,
    body: web::Json<WorkflowBody>,
) -> HttpResponse {
    let body = body.into_inner();
    if let Err(err) = relay_core::compile(&body.steps, &body.edges) {
        return error_response(&err);
    }

    let existing = match state.stores.workflows.get(&id).await {
        Ok(Some(workflow)) => workflow,
        Ok(None) => {
            return error_response(&HostError::NotFound(format!("unknown workflow {id}")))
        }
        Err(err) => return error_response(&store_err(err)),
    };
    if existing.owner_id != user.user_id {
        return error_response(&HostError::Auth(
            "workflow belongs to a different user".into(),
        ));
    }

    let workflow = Workflow {
        id: existing.id,
        name: body.name,
        goal: body.goal,
        category: body.category,
        owner_id: existing.owner_id,
        steps: body.steps,
        edges: body.edges,
        created_at: existing.created_at,
        updated_at: chrono::Utc::now(),
    };
    match state.stores.workflows.store(workflow).await {
        Ok(()) => HttpResponse::Ok().json(json!({ "success": true })),
        Err(err) => error_response(&store_err(err)),
    }
}

async fn delete(
    state: web::Data<AppState>,
    user: AuthedUser,
    id: web::Path<String>,
) -> HttpResponse {
    match state.stores.workflows.get(&id).await {
        Ok(Some(workflow)) if workflow.owner_id != user.user_id => {
            return error_response(&HostError::Auth(
                "workflow belongs to a different user".into(),
            ))
        }
        Ok(_) => {}
        Err(err) => return error_response(&store_err(err)),
    }
    match state.stores.workflows.delete(&id).await {
        Ok(()) => HttpResponse::Ok().json(json!({ "success": true })),
        Err(err) => error_response(&store_err(err)),
    }
}
