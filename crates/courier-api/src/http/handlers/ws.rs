//! WebSocket handler for real-time messaging event streaming.
//!
//! The `/ws/events` endpoint upgrades an HTTP connection to a WebSocket and
//! pushes every `MessagingEvent` from the runtime's event bus as a JSON
//! text frame. `?org=<id>` restricts the stream to one organization.
//!
//! Clients may send `{"type":"ping"}`; the server answers `{"type":"pong"}`.
//! Lagged receivers skip the missed events and keep streaming.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;

use courier_types::organization::OrganizationId;

use super::parse_org;
use crate::http::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct EventFilter {
    #[serde(default)]
    pub org: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsCommand {
    Ping,
}

/// Upgrade an HTTP request to a WebSocket connection for messaging events.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(filter): Query<EventFilter>,
) -> Result<impl IntoResponse, AppError> {
    let org = filter.org.as_deref().map(parse_org).transpose()?;
    Ok(ws.on_upgrade(move |socket| handle_ws_connection(socket, state, org)))
}

async fn handle_ws_connection(socket: WebSocket, state: AppState, org: Option<OrganizationId>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let mut event_rx = state.runtime.events.subscribe_filtered(org);
    tracing::debug!(organization_id = ?org, "WebSocket subscriber connected");

    loop {
        tokio::select! {
            event_result = event_rx.recv() => {
                match event_result {
                    Ok(event) => match serde_json::to_string(&event) {
                        Ok(json) => {
                            if ws_sender.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => tracing::warn!("Failed to serialize MessagingEvent: {err}"),
                    },
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "WebSocket subscriber lagged, skipping {n} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            msg_result = ws_receiver.next() => {
                match msg_result {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<WsCommand>(&text) {
                        Ok(WsCommand::Ping) => {
                            let pong = r#"{"type":"pong"}"#;
                            if ws_sender.send(Message::Text(pong.into())).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "Ignoring malformed WebSocket command");
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        tracing::debug!("WebSocket receive error: {err}");
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    tracing::debug!("WebSocket connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_command_parses() {
        assert!(matches!(
            serde_json::from_str::<WsCommand>(r#"{"type":"ping"}"#),
            Ok(WsCommand::Ping)
        ));
    }

    #[test]
    fn unknown_command_is_rejected() {
        assert!(serde_json::from_str::<WsCommand>(r#"{"type":"subscribe"}"#).is_err());
    }
}
