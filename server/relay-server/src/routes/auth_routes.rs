use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use crate::error::error_response;
use crate::state::AppState;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/auth/login").route(web::post().to(login)))
        .service(web::resource("/api/auth/register").route(web::post().to(register)));
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

async fn login(state: web::Data<AppState>, body: web::Json<LoginRequest>) -> HttpResponse {
    match state.auth.login(&body.email, &body.password).await {
        Ok((token, user)) => HttpResponse::Ok().json(json!({
            "success": true,
            "token": token,
            "user": user,
        })),
        Err(err) => error_response(&err),
    }
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    email: String,
    password: String,
    name: String,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    skills: Vec<String>,
    #[serde(default)]
    color: Option<String>,
}

async fn register(state: web::Data<AppState>, body: web::Json<RegisterRequest>) -> HttpResponse {
    let body = body.into_inner();
    match state
        .auth
        .register(
            &body.email,
            &body.password,
            &body.name,
            body.role,
            body.description,
            body.skills,
            body.color,
        )
        .await
    {
        Ok(user) => HttpResponse::Ok().json(json!({ "success": true, "user": user })),
        Err(err) => error_response(&err),
    }
}
