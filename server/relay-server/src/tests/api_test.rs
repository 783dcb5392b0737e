use actix_web::{test, web, App};
use relay_types::HostConfig;
use serde_json::{json, Value};

use crate::routes;
use crate::state::AppState;

fn test_state(dir: &tempfile::TempDir) -> AppState {
    let config = HostConfig {
        data_dir: dir.path().to_string_lossy().to_string(),
        ..HostConfig::default()
    };
    AppState::build(config).unwrap()
}

macro_rules! app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($state.clone()))
                .configure(routes::configure),
        )
        .await
    };
}

#[actix_web::test]
async fn health_reports_version_and_auth_method() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);
    let app = app!(state);

    let resp = test::call_service(&app, test::TestRequest::get().uri("/health").to_request()).await;
    assert!(resp.status().is_success());
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["auth_method"], "bearer");
    assert_eq!(body["websocket_enabled"], true);
    assert!(body["version"].as_str().is_some());
}

#[actix_web::test]
async fn register_login_and_scoped_workflow_crud() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);
    let app = app!(state);

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/auth/register")
            .set_json(json!({
                "email": "ada@example.com",
                "password": "s3cret",
                "name": "Ada"
            }))
            .to_request(),
    )
    .await;
    assert!(resp.status().is_success());

    // Wrong password is rejected.
    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/auth/login")
            .set_json(json!({ "email": "ada@example.com", "password": "wrong" }))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status().as_u16(), 401);

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/auth/login")
            .set_json(json!({ "email": "ada@example.com", "password": "s3cret" }))
            .to_request(),
    )
    .await;
    let body: Value = test::read_body_json(resp).await;
    let token = body["token"].as_str().unwrap().to_string();

    // Workflows require the bearer.
    let resp = test::call_service(
        &app,
        test::TestRequest::get().uri("/api/workflows").to_request(),
    )
    .await;
    assert_eq!(resp.status().as_u16(), 401);

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/workflows")
            .insert_header(("Authorization", format!("Bearer {token}")))
            .set_json(json!({
                "name": "report",
                "goal": "write a report",
                "steps": [
                    { "id": "s1", "order": 0, "agent_name": "writer", "description": "draft" }
                ],
                "edges": []
            }))
            .to_request(),
    )
    .await;
    assert!(resp.status().is_success());
    let body: Value = test::read_body_json(resp).await;
    let workflow_id = body["id"].as_str().unwrap().to_string();

    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri("/api/workflows")
            .insert_header(("Authorization", format!("Bearer {token}")))
            .to_request(),
    )
    .await;
    let listed: Value = test::read_body_json(resp).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);
    assert_eq!(listed[0]["id"], workflow_id.as_str());

    // The unscoped listing needs no auth.
    let resp = test::call_service(
        &app,
        test::TestRequest::get().uri("/api/workflows/all").to_request(),
    )
    .await;
    assert!(resp.status().is_success());
}

#[actix_web::test]
async fn invalid_dag_is_rejected_at_save_time() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);
    let app = app!(state);

    test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/auth/register")
            .set_json(json!({ "email": "u@x.y", "password": "pw", "name": "U" }))
            .to_request(),
    )
    .await;
    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/auth/login")
            .set_json(json!({ "email": "u@x.y", "password": "pw" }))
            .to_request(),
    )
    .await;
    let body: Value = test::read_body_json(resp).await;
    let token = body["token"].as_str().unwrap().to_string();

    // Conditional edge out of a non-EVALUATE step.
    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/workflows")
            .insert_header(("Authorization", format!("Bearer {token}")))
            .set_json(json!({
                "name": "bad",
                "steps": [
                    { "id": "a", "order": 0, "agent_name": "x", "description": "" },
                    { "id": "b", "order": 1, "agent_name": "y", "description": "" }
                ],
                "edges": [
                    { "from_step_id": "a", "to_step_id": "b", "condition": "true" }
                ]
            }))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status().as_u16(), 400);
    let body: Value = test::read_body_json(resp).await;
    assert!(body["error"].as_str().unwrap().starts_with("ValidationError"));
}

#[actix_web::test]
async fn agent_registry_crud_with_duplicate_conflict() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);
    let app = app!(state);

    let descriptor = json!({
        "name": "painter",
        "description": "draws things",
        "urls": { "dev": "http://localhost:9999", "production": null },
        "streaming": true
    });

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/agents")
            .set_json(&descriptor)
            .to_request(),
    )
    .await;
    assert!(resp.status().is_success());

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/agents")
            .set_json(&descriptor)
            .to_request(),
    )
    .await;
    assert_eq!(resp.status().as_u16(), 409);

    // PATCH is upsert, so the same payload is fine there.
    let resp = test::call_service(
        &app,
        test::TestRequest::patch()
            .uri("/api/agents")
            .set_json(&descriptor)
            .to_request(),
    )
    .await;
    assert!(resp.status().is_success());

    let resp = test::call_service(
        &app,
        test::TestRequest::get().uri("/api/agents").to_request(),
    )
    .await;
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body.as_array().unwrap().len(), 1);
}

#[actix_web::test]
async fn active_workflow_state_round_trips_per_session() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);
    let app = app!(state);

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/api/active-workflow?session_id=abc")
            .set_json(json!({
                "workflow": "1. [writer] draft",
                "name": "report",
                "goal": "write"
            }))
            .to_request(),
    )
    .await;
    assert!(resp.status().is_success());

    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri("/api/active-workflow?session_id=abc")
            .to_request(),
    )
    .await;
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["name"], "report");

    // A different session sees nothing.
    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri("/api/active-workflow?session_id=other")
            .to_request(),
    )
    .await;
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["name"], "");
}

#[actix_web::test]
async fn upload_requires_session_header() {
    let dir = tempfile::tempdir().unwrap();
    let state = test_state(&dir);
    let app = app!(state);

    let resp = test::call_service(
        &app,
        test::TestRequest::post().uri("/upload").to_request(),
    )
    .await;
    assert_eq!(resp.status().as_u16(), 400);
}
