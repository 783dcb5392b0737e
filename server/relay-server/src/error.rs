use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use relay_types::HostError;
use serde_json::json;

/// Uniform wire shape for failures: `{ success:false, error:"<kind>: <detail>" }`.
pub fn error_response(err: &HostError) -> HttpResponse {
    let status = StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    HttpResponse::build(status).json(json!({
        "success": false,
        "error": err.user_message(),
    }))
}

pub fn store_err(err: anyhow::Error) -> HostError {
    HostError::Store(err.to_string())
}
