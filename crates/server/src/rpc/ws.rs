// The per-file realtime channel. One socket per (session, file); the
// session id is minted at upgrade time and lives until disconnect.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Extension, Path, Query, State,
    },
    middleware,
    response::IntoResponse,
    routing::get,
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error};
use uuid::Uuid;

use coedit_common::protocol::ws::WsMessage;

use crate::coordinator::SyncCoordinator;
use crate::rpc::auth::{require_user_identity, AuthenticatedUser};

const DEFAULT_CURSOR_COLOR: &str = "#888888";

#[derive(Clone)]
pub struct WsState {
    pub coordinator: Arc<SyncCoordinator>,
    pub max_frame_bytes: usize,
}

pub fn router(coordinator: Arc<SyncCoordinator>, max_frame_bytes: usize) -> Router {
    Router::new()
        .route("/ws/{file_id}", get(ws_upgrade))
        .layer(middleware::from_fn(require_user_identity))
        .with_state(WsState { coordinator, max_frame_bytes })
}

#[derive(Debug, Deserialize)]
struct PresenceParams {
    name: Option<String>,
    color: Option<String>,
}

async fn ws_upgrade(
    Path(file_id): Path<Uuid>,
    Query(params): Query<PresenceParams>,
    Extension(user): Extension<AuthenticatedUser>,
    State(state): State<WsState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let display_name = params
        .name
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| "anonymous".to_string());
    let color = params.color.unwrap_or_else(|| DEFAULT_CURSOR_COLOR.to_string());

    ws.max_frame_size(state.max_frame_bytes).on_upgrade(move |socket| {
        handle_socket(state.coordinator, socket, user.user_id, file_id, display_name, color)
    })
}

async fn handle_socket(
    coordinator: Arc<SyncCoordinator>,
    mut socket: WebSocket,
    user_id: Uuid,
    file_id: Uuid,
    display_name: String,
    color: String,
) {
    let session_id = Uuid::new_v4();
    let (outbound_sender, mut outbound_receiver) = mpsc::unbounded_channel::<WsMessage>();

    // Attach delivers the sync backlog and peer presence through the
    // outbound channel before any live traffic.
    if let Err(rejection) = coordinator
        .attach(user_id, file_id, session_id, display_name, color, outbound_sender)
        .await
    {
        let _ = send_ws_message(
            &mut socket,
            &WsMessage::Error {
                code: rejection.code().to_string(),
                message: rejection.to_string(),
            },
        )
        .await;
        let _ = socket.send(Message::Close(None)).await;
        return;
    }

    loop {
        tokio::select! {
            maybe_outbound = outbound_receiver.recv() => {
                match maybe_outbound {
                    Some(outbound) => {
                        if send_ws_message(&mut socket, &outbound).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            maybe_message = socket.recv() => {
                let Some(message) = maybe_message else {
                    break;
                };

                match message {
                    Ok(Message::Text(raw)) => {
                        let inbound: WsMessage = match serde_json::from_str(&raw) {
                            Ok(inbound) => inbound,
                            Err(_) => {
                                if send_ws_message(&mut socket, &WsMessage::Error {
                                    code: "INVALID_MESSAGE".to_string(),
                                    message: "invalid websocket frame payload".to_string(),
                                })
                                .await
                                .is_err()
                                {
                                    break;
                                }
                                continue;
                            }
                        };

                        match inbound {
                            WsMessage::Op { operation } => {
                                // A rejected edit answers in-band; the
                                // connection stays open for reads.
                                if let Err(rejection) = coordinator
                                    .apply(user_id, file_id, session_id, operation, Utc::now())
                                    .await
                                {
                                    if send_ws_message(&mut socket, &WsMessage::Error {
                                        code: rejection.code().to_string(),
                                        message: rejection.to_string(),
                                    })
                                    .await
                                    .is_err()
                                    {
                                        break;
                                    }
                                }
                            }
                            WsMessage::Presence { cursor, seq } => {
                                coordinator.update_cursor(file_id, session_id, cursor, seq).await;
                            }
                            _ => {
                                if send_ws_message(&mut socket, &WsMessage::Error {
                                    code: "UNSUPPORTED_MESSAGE".to_string(),
                                    message: "message type is server-to-client only".to_string(),
                                })
                                .await
                                .is_err()
                                {
                                    break;
                                }
                            }
                        }
                    }
                    Ok(Message::Ping(payload)) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(_) => break,
                }
            }
        }
    }

    debug!(%file_id, %session_id, "socket closed");
    if let Err(detach_error) = coordinator.detach(file_id, session_id).await {
        error!(%file_id, %session_id, error = %detach_error, "failed to persist on detach");
    }
}

async fn send_ws_message(socket: &mut WebSocket, message: &WsMessage) -> Result<(), axum::Error> {
    match serde_json::to_string(message) {
        Ok(raw) => socket.send(Message::Text(raw.into())).await,
        Err(encode_error) => {
            error!(error = %encode_error, "failed to encode outbound frame");
            Ok(())
        }
    }
}
