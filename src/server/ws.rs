//! WebSocket progress stream.
//!
//! `GET /ws/executions` upgrades to a socket that receives every
//! [`ExecutionEvent`](crate::event_bus::ExecutionEvent) as a JSON text
//! frame. Clients authenticate on the upgrade request — bearer header or
//! `?token=` query parameter — before the handshake completes.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use serde::Deserialize;
use tracing::debug;

use crate::event_bus::EventStream;
use crate::server::{ApiError, AppState};

#[derive(Deserialize, Default)]
pub struct WsAuthQuery {
    #[serde(default)]
    pub token: Option<String>,
}

/// `GET /ws/executions`.
pub async fn executions(
    State(state): State<AppState>,
    Query(query): Query<WsAuthQuery>,
    headers: HeaderMap,
    upgrade: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let header_token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    let token = query.token.as_deref().or(header_token);
    let authenticated = token.map(|t| state.auth.verify_token(t)).unwrap_or(false);
    if !authenticated {
        return Err(ApiError::unauthorized("Not authenticated"));
    }

    let events = state.engine.hub().subscribe();
    Ok(upgrade.on_upgrade(move |socket| relay(socket, events)))
}

/// Pump hub events into the socket until either side closes.
async fn relay(mut socket: WebSocket, mut events: EventStream) {
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                let Ok(frame) = serde_json::to_string(&event) else { continue };
                if socket.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // Pings are answered by axum; other frames are ignored.
                    _ => {}
                }
            }
        }
    }
    debug!("execution event subscriber disconnected");
}
