use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::state::AppState;

mod active_workflow;
mod agents;
mod auth_routes;
mod escalations;
mod files;
mod query;
mod schedules;
mod workflows;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/health").route(web::get().to(health)))
        .configure(auth_routes::configure)
        .configure(agents::configure)
        .configure(workflows::configure)
        .configure(query::configure)
        .configure(active_workflow::configure)
        .configure(schedules::configure)
        .configure(escalations::configure)
        .configure(files::configure)
        .service(web::resource("/events").route(web::get().to(crate::ws::events)));
}

async fn health(state: web::Data<AppState>) -> HttpResponse {
    let _ = state; // liveness only; no dependencies are touched
    HttpResponse::Ok().json(json!({
        "status": "ok",
        "websocket_enabled": true,
        "auth_method": "bearer",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
