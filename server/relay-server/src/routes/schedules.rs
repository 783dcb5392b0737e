use actix_web::{web, HttpResponse};
use chrono::Utc;
use relay_stores::{ScheduleRepo, WorkflowRepo};
use relay_types::{HostError, Schedule, ScheduleSpec};
use serde::Deserialize;
use serde_json::json;

use crate::error::{error_response, store_err};
use crate::state::AppState;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/api/schedules")
            .route(web::get().to(list))
            .route(web::post().to(create)),
    )
    .service(web::resource("/api/schedules/history").route(web::get().to(history)))
    .service(web::resource("/api/schedules/upcoming").route(web::get().to(upcoming)))
    .service(web::resource("/api/schedules/{id}/toggle").route(web::post().to(toggle)))
    .service(web::resource("/api/schedules/{id}/run-now").route(web::post().to(run_now)))
    .service(
        web::resource("/api/schedules/{id}")
            .route(web::get().to(get))
            .route(web::put().to(update))
            .route(web::delete().to(delete)),
    );
}

#[derive(Debug, Deserialize)]
struct ScheduleBody {
    workflow_id: String,
    #[serde(default)]
    workflow_name: String,
    session_id: String,
    #[serde(flatten)]
    spec: ScheduleSpec,
    #[serde(default)]
    timezone: Option<String>,
    #[serde(default)]
    enabled: Option<bool>,
    #[serde(default)]
    max_runs: Option<u32>,
    #[serde(default)]
    timeout_s: Option<u64>,
    #[serde(default)]
    retry_on_failure: Option<bool>,
    #[serde(default)]
    max_retries: Option<u32>,
}

impl ScheduleBody {
    fn into_schedule(self, id: String, created_at: chrono::DateTime<Utc>) -> Schedule {
        Schedule {
            id,
            workflow_id: self.workflow_id,
            workflow_name: self.workflow_name,
            session_id: self.session_id,
            spec: self.spec,
            timezone: self.timezone.unwrap_or_else(|| "UTC".to_string()),
            enabled: self.enabled.unwrap_or(true),
            run_count: 0,
            max_runs: self.max_runs,
            timeout_s: self.timeout_s.unwrap_or(120),
            retry_on_failure: self.retry_on_failure.unwrap_or(false),
            max_retries: self.max_retries.unwrap_or(3),
            created_at,
            last_run_at: None,
        }
    }
}

async fn list(state: web::Data<AppState>) -> HttpResponse {
    match state.stores.schedules.list().await {
        Ok(schedules) => HttpResponse::Ok().json(schedules),
        Err(err) => error_response(&store_err(err)),
    }
}

async fn get(state: web::Data<AppState>, id: web::Path<String>) -> HttpResponse {
    match state.stores.schedules.get(&id).await {
        Ok(Some(schedule)) => HttpResponse::Ok().json(schedule),
        Ok(None) => error_response(&HostError::NotFound(format!("unknown schedule {id}"))),
        Err(err) => error_response(&store_err(err)),
    }
}

async fn create(state: web::Data<AppState>, body: web::Json<ScheduleBody>) -> HttpResponse {
    let body = body.into_inner();

    // The workflow must exist before it can be scheduled.
    match state.stores.workflows.get(&body.workflow_id).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            return error_response(&HostError::NotFound(format!(
                "unknown workflow {}",
                body.workflow_id
            )))
        }
        Err(err) => return error_response(&store_err(err)),
    }

    let schedule = body.into_schedule(uuid::Uuid::new_v4().to_string(), Utc::now());
    if let Some(timezone) = validate_timezone(&schedule.timezone) {
        return error_response(&timezone);
    }
    let id = schedule.id.clone();
    match state.stores.schedules.create(schedule).await {
        Ok(()) => HttpResponse::Ok().json(json!({ "success": true, "id": id })),
        Err(err) => error_response(&store_err(err)),
    }
}

async fn update(
    state: web::Data<AppState>,
    id: web::Path<String>,
    body: web::Json<ScheduleBody>,
) -> HttpResponse {
    let existing = match state.stores.schedules.get(&id).await {
        Ok(Some(schedule)) => schedule,
        Ok(None) => {
            return error_response(&HostError::NotFound(format!("unknown schedule {id}")))
        }
        Err(err) => return error_response(&store_err(err)),
    };

    let mut schedule = body.into_inner().into_schedule(existing.id, existing.created_at);
    schedule.run_count = existing.run_count;
    schedule.last_run_at = existing.last_run_at;
    if let Some(timezone) = validate_timezone(&schedule.timezone) {
        return error_response(&timezone);
    }
    match state.stores.schedules.update(schedule).await {
        Ok(()) => HttpResponse::Ok().json(json!({ "success": true })),
        Err(err) => error_response(&store_err(err)),
    }
}

async fn delete(state: web::Data<AppState>, id: web::Path<String>) -> HttpResponse {
    match state.stores.schedules.delete(&id).await {
        Ok(()) => HttpResponse::Ok().json(json!({ "success": true })),
        Err(err) => error_response(&store_err(err)),
    }
}

async fn toggle(state: web::Data<AppState>, id: web::Path<String>) -> HttpResponse {
    let mut schedule = match state.stores.schedules.get(&id).await {
        Ok(Some(schedule)) => schedule,
        Ok(None) => {
            return error_response(&HostError::NotFound(format!("unknown schedule {id}")))
        }
        Err(err) => return error_response(&store_err(err)),
    };
    schedule.enabled = !schedule.enabled;
    let enabled = schedule.enabled;
    match state.stores.schedules.update(schedule).await {
        Ok(()) => HttpResponse::Ok().json(json!({ "success": true, "enabled": enabled })),
        Err(err) => error_response(&store_err(err)),
    }
}

async fn run_now(state: web::Data<AppState>, id: web::Path<String>) -> HttpResponse {
    match state.scheduler.run_now(&id).await {
        Ok(()) => HttpResponse::Ok().json(json!({ "success": true, "status": "started" })),
        Err(err) => error_response(&err),
    }
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    #[serde(default)]
    schedule_id: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    50
}

async fn history(state: web::Data<AppState>, q: web::Query<HistoryQuery>) -> HttpResponse {
    match state
        .stores
        .schedules
        .history(q.schedule_id.as_deref(), q.session_id.as_deref(), q.limit)
        .await
    {
        Ok(records) => HttpResponse::Ok().json(records),
        Err(err) => error_response(&store_err(err)),
    }
}

#[derive(Debug, Deserialize)]
struct UpcomingQuery {
    #[serde(default = "default_limit")]
    limit: usize,
}

async fn upcoming(state: web::Data<AppState>, q: web::Query<UpcomingQuery>) -> HttpResponse {
    match state.scheduler.upcoming(q.limit).await {
        Ok(upcoming) => {
            let rows: Vec<_> = upcoming
                .into_iter()
                .map(|(schedule, at)| {
                    json!({
                        "schedule_id": schedule.id,
                        "workflow_id": schedule.workflow_id,
                        "workflow_name": schedule.workflow_name,
                        "next_run_at": at,
                    })
                })
                .collect();
            HttpResponse::Ok().json(rows)
        }
        Err(err) => error_response(&err),
    }
}

fn validate_timezone(timezone: &str) -> Option<HostError> {
    if timezone.parse::<chrono_tz::Tz>().is_err() {
        return Some(HostError::Validation(format!(
            "unknown timezone: {timezone}"
        )));
    }
    None
}
