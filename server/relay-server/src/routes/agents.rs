use actix_web::{web, HttpResponse};
use relay_types::config::timeouts;
use relay_types::AgentDescriptor;
use serde_json::json;

use crate::error::error_response;
use crate::state::AppState;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/api/agents")
            .route(web::get().to(list_agents))
            .route(web::post().to(create_agent))
            .route(web::patch().to(upsert_agent)),
    )
    .service(
        web::resource("/api/agents/health/{url:.*}").route(web::get().to(agent_health)),
    )
    .service(
        web::resource("/api/agents/{name}")
            .route(web::get().to(get_agent))
            .route(web::put().to(update_agent))
            .route(web::delete().to(delete_agent)),
    );
}

async fn list_agents(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.agents.list())
}

async fn get_agent(state: web::Data<AppState>, name: web::Path<String>) -> HttpResponse {
    match state.agents.get(&name) {
        Some(agent) => HttpResponse::Ok().json(agent),
        None => HttpResponse::NotFound().json(json!({
            "success": false,
            "error": format!("NotFound: unknown agent: {name}"),
        })),
    }
}

async fn create_agent(
    state: web::Data<AppState>,
    body: web::Json<AgentDescriptor>,
) -> HttpResponse {
    let descriptor = body.into_inner();
    let name = descriptor.name.clone();
    match state.agents.register(descriptor) {
        Ok(()) => HttpResponse::Ok().json(json!({ "success": true, "name": name })),
        Err(err) => error_response(&err),
    }
}

/// PATCH is upsert: create when missing, replace when present.
async fn upsert_agent(
    state: web::Data<AppState>,
    body: web::Json<AgentDescriptor>,
) -> HttpResponse {
    let descriptor = body.into_inner();
    let name = descriptor.name.clone();
    state.agents.upsert(descriptor);
    HttpResponse::Ok().json(json!({ "success": true, "name": name }))
}

async fn update_agent(
    state: web::Data<AppState>,
    name: web::Path<String>,
    body: web::Json<AgentDescriptor>,
) -> HttpResponse {
    let mut descriptor = body.into_inner();
    descriptor.name = name.into_inner();
    match state.agents.update(descriptor) {
        Ok(()) => HttpResponse::Ok().json(json!({ "success": true })),
        Err(err) => error_response(&err),
    }
}

async fn delete_agent(state: web::Data<AppState>, name: web::Path<String>) -> HttpResponse {
    match state.agents.remove(&name) {
        Ok(()) => HttpResponse::Ok().json(json!({ "success": true })),
        Err(err) => error_response(&err),
    }
}

/// Proxy liveness check against a remote agent, with the short wake-up
/// timeout so a cold container does not hang the dashboard.
async fn agent_health(url: web::Path<String>) -> HttpResponse {
    let url = url.into_inner();
    let target = if url.starts_with("http://") || url.starts_with("https://") {
        url
    } else {
        format!("https://{url}")
    };

    let client = match reqwest::Client::builder().timeout(timeouts::AGENT_PING).build() {
        Ok(client) => client,
        Err(err) => {
            return HttpResponse::InternalServerError().json(json!({
                "success": false,
                "error": format!("StoreError: {err}"),
            }))
        }
    };

    match client.get(&target).send().await {
        Ok(response) => HttpResponse::Ok().json(json!({
            "healthy": response.status().is_success(),
            "status": response.status().as_u16(),
            "url": target,
        })),
        Err(err) => HttpResponse::Ok().json(json!({
            "healthy": false,
            "error": err.to_string(),
            "url": target,
        })),
    }
}
