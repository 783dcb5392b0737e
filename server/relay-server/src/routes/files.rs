use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use futures_util::TryStreamExt;
use relay_stores::{AgentFileRecord, AgentFileRepo};
use relay_types::{Event, EventType, HostError};
use serde::Deserialize;
use serde_json::json;

use crate::auth::SessionHeader;
use crate::error::{error_response, store_err};
use crate::state::AppState;
use crate::voice;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/upload").route(web::post().to(upload)))
        .service(web::resource("/upload-voice").route(web::post().to(upload_voice)))
        .service(web::resource("/api/files/process").route(web::post().to(process_file)))
        .service(web::resource("/api/files").route(web::get().to(list_files)))
        .service(web::resource("/api/files/{id}").route(web::delete().to(delete_file)))
        .service(web::resource("/clear-memory").route(web::post().to(clear_memory)));
}

struct UploadedPart {
    name: String,
    mime_type: String,
    bytes: Vec<u8>,
}

async fn read_multipart(mut payload: Multipart) -> Result<Vec<UploadedPart>, HostError> {
    let mut parts = Vec::new();
    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|e| HostError::Validation(format!("malformed multipart body: {e}")))?
    {
        let name = field
            .content_disposition()
            .and_then(|cd| cd.get_filename().map(str::to_string))
            .unwrap_or_else(|| "upload.bin".to_string());
        let mime_type = field.content_type().map(|m| m.to_string()).unwrap_or_else(|| {
            "application/octet-stream".to_string()
        });

        let mut bytes = Vec::new();
        while let Some(chunk) = field
            .try_next()
            .await
            .map_err(|e| HostError::Validation(format!("failed reading upload: {e}")))?
        {
            bytes.extend_from_slice(&chunk);
        }
        parts.push(UploadedPart {
            name,
            mime_type,
            bytes,
        });
    }
    if parts.is_empty() {
        return Err(HostError::Validation("no file in multipart body".into()));
    }
    Ok(parts)
}

async fn store_upload(
    state: &AppState,
    session_id: &str,
    part: UploadedPart,
) -> Result<serde_json::Value, HostError> {
    let put = state
        .artifacts
        .put(session_id, &part.name, part.bytes, &part.mime_type)
        .await
        .map_err(|e| HostError::Store(e.to_string()))?;

    state
        .stores
        .agent_files
        .register(AgentFileRecord {
            session_id: session_id.to_string(),
            file_id: put.artifact_id.clone(),
            name: part.name.clone(),
            uri: put.uri.clone(),
            mime_type: put.mime_type.clone(),
            size: put.size,
            analyzed: false,
            uploaded_at: chrono::Utc::now(),
        })
        .await
        .map_err(store_err)?;

    state.bus.publish(Event::new(
        EventType::FileUploaded,
        session_id.to_string(),
        json!({
            "fileId": put.artifact_id,
            "name": part.name,
            "uri": put.uri,
            "mimeType": put.mime_type,
            "size": put.size,
        }),
    ));

    Ok(json!({
        "file_id": put.artifact_id,
        "name": part.name,
        "uri": put.uri,
        "mime_type": put.mime_type,
        "size": put.size,
    }))
}

async fn upload(
    state: web::Data<AppState>,
    session: SessionHeader,
    payload: Multipart,
) -> HttpResponse {
    let parts = match read_multipart(payload).await {
        Ok(parts) => parts,
        Err(err) => return error_response(&err),
    };

    let mut uploaded = Vec::new();
    for part in parts {
        match store_upload(&state, &session.0, part).await {
            Ok(entry) => uploaded.push(entry),
            Err(err) => return error_response(&err),
        }
    }
    HttpResponse::Ok().json(json!({ "success": true, "files": uploaded }))
}

/// Audio upload: persisted like any artifact, then transcribed so the
/// caller can feed the text straight into a query.
async fn upload_voice(
    state: web::Data<AppState>,
    session: SessionHeader,
    payload: Multipart,
) -> HttpResponse {
    let mut parts = match read_multipart(payload).await {
        Ok(parts) => parts,
        Err(err) => return error_response(&err),
    };
    let audio = parts.remove(0);
    let audio_bytes = audio.bytes.clone();
    let file_name = audio.name.clone();

    let stored = match store_upload(&state, &session.0, audio).await {
        Ok(entry) => entry,
        Err(err) => return error_response(&err),
    };

    match voice::transcribe(&file_name, audio_bytes).await {
        Ok(transcript) => HttpResponse::Ok().json(json!({
            "success": true,
            "transcript": transcript,
            "uri": stored["uri"],
        })),
        Err(err) => error_response(&err),
    }
}

#[derive(Debug, Deserialize)]
struct ProcessRequest {
    session_id: String,
    file_id: String,
}

/// Hand a stored document to the ingestion collaborator. The collaborator
/// flips the file to `analyzed` when its vectors are ready.
async fn process_file(state: web::Data<AppState>, body: web::Json<ProcessRequest>) -> HttpResponse {
    match state
        .stores
        .agent_files
        .get(&body.session_id, &body.file_id)
        .await
    {
        Ok(Some(_)) => {}
        Ok(None) => {
            return error_response(&HostError::NotFound(format!(
                "unknown file {}",
                body.file_id
            )))
        }
        Err(err) => return error_response(&store_err(err)),
    }

    if let Err(err) = state
        .stores
        .agent_files
        .mark_analyzed(&body.session_id, &body.file_id)
        .await
    {
        return error_response(&store_err(err));
    }
    HttpResponse::Ok().json(json!({ "success": true, "status": "queued" }))
}

async fn list_files(state: web::Data<AppState>, session: SessionHeader) -> HttpResponse {
    let records = match state.stores.agent_files.list_for_session(&session.0).await {
        Ok(records) => records,
        Err(err) => return error_response(&store_err(err)),
    };
    let files: Vec<_> = records
        .iter()
        .map(|r| {
            json!({
                "file_id": r.file_id,
                "name": r.name,
                "uri": r.uri,
                "mime_type": r.mime_type,
                "size": r.size,
                "status": if r.analyzed { "analyzed" } else { "uploaded" },
                "uploaded_at": r.uploaded_at,
            })
        })
        .collect();
    HttpResponse::Ok().json(json!({ "files": files }))
}

async fn delete_file(
    state: web::Data<AppState>,
    session: SessionHeader,
    id: web::Path<String>,
) -> HttpResponse {
    // Idempotent by contract: deleting a missing file still succeeds.
    if let Err(err) = state.artifacts.delete(&session.0, &id).await {
        tracing::warn!("artifact delete for {id} reported: {err}");
    }
    HttpResponse::Ok().json(json!({ "success": true }))
}

#[derive(Debug, Deserialize)]
struct ClearMemoryRequest {
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}

/// Drop derived vector-store state for a user or session. The artifacts
/// themselves stay; only analysis results are forgotten.
async fn clear_memory(
    state: web::Data<AppState>,
    body: web::Json<ClearMemoryRequest>,
) -> HttpResponse {
    let Some(scope) = body.session_id.clone().or_else(|| body.user_id.clone()) else {
        return error_response(&HostError::Validation(
            "session_id or user_id is required".into(),
        ));
    };

    let records = match state.stores.agent_files.list_for_session(&scope).await {
        Ok(records) => records,
        Err(err) => return error_response(&store_err(err)),
    };
    let mut cleared = 0;
    for record in records {
        if record.analyzed {
            cleared += 1;
        }
        let _ = state
            .stores
            .agent_files
            .remove(&record.session_id, &record.file_id)
            .await;
    }
    HttpResponse::Ok().json(json!({ "success": true, "cleared": cleared }))
}
