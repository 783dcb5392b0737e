use actix_web::{web, HttpRequest, HttpResponse};
use actix_ws::Message;
use futures_util::StreamExt;
use relay_types::session::session_of;
use serde::Deserialize;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    Subscribe {
        #[serde(rename = "contextId")]
        context_id: String,
    },
    Unsubscribe {
        #[serde(rename = "contextId")]
        context_id: String,
    },
}

/// `/events`: one socket may hold any number of subscriptions. A frame
/// `{type:"subscribe", contextId}` subscribes to either a bare session id
/// (all of its events) or a full context id (that conversation only).
pub async fn events(
    req: HttpRequest,
    body: web::Payload,
    state: web::Data<AppState>,
) -> actix_web::Result<HttpResponse> {
    let (response, session, mut msg_stream) = actix_ws::handle(&req, body)?;

    actix_web::rt::spawn(async move {
        let mut subscriptions: Vec<(String, tokio::task::JoinHandle<()>)> = Vec::new();

        while let Some(Ok(message)) = msg_stream.next().await {
            match message {
                Message::Text(text) => {
                    let frame: ClientFrame = match serde_json::from_str(&text) {
                        Ok(frame) => frame,
                        Err(err) => {
                            tracing::debug!("ignoring malformed /events frame: {err}");
                            continue;
                        }
                    };
                    match frame {
                        ClientFrame::Subscribe { context_id } => {
                            if subscriptions.iter().any(|(key, _)| key == &context_id) {
                                continue;
                            }
                            let handle = spawn_forwarder(
                                state.get_ref().clone(),
                                context_id.clone(),
                                session.clone(),
                            );
                            subscriptions.push((context_id, handle));
                        }
                        ClientFrame::Unsubscribe { context_id } => {
                            subscriptions.retain(|(key, handle)| {
                                if key == &context_id {
                                    handle.abort();
                                    false
                                } else {
                                    true
                                }
                            });
                        }
                    }
                }
                Message::Ping(payload) => {
                    let mut session = session.clone();
                    let _ = session.pong(&payload).await;
                }
                Message::Close(_) => break,
                _ => {}
            }
        }

        for (_, handle) in subscriptions {
            handle.abort();
        }
        let _ = session.close(None).await;
    });

    Ok(response)
}

/// Deliver every event whose context matches the subscription exactly or
/// whose partition key equals the subscribed session id.
fn spawn_forwarder(
    state: AppState,
    subscribed: String,
    mut session: actix_ws::Session,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let session_key = session_of(&subscribed).to_string();
        let (mut receiver, _subscription) = state.bus.subscribe(&session_key);

        while let Some(event) = receiver.recv().await {
            // Parallel dispatches refine a conversation context with a
            // `--<call>` suffix; they belong to the same subscription.
            let wanted = event.context_id == subscribed
                || event.partition_key == subscribed
                || event
                    .context_id
                    .strip_prefix(subscribed.as_str())
                    .map(|rest| rest.starts_with("--"))
                    .unwrap_or(false);
            if !wanted {
                continue;
            }
            let Ok(payload) = serde_json::to_string(&event) else {
                continue;
            };
            if session.text(payload).await.is_err() {
                break;
            }
        }
    })
}
