//! WebSocket handling for arena clients.
//!
//! Each socket is authenticated with a bearer token before anything else
//! happens, then bound to its user. Handlers call the use cases and decide
//! which frames follow from their typed results.

use std::{sync::Arc, time::Duration};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::{header::AUTHORIZATION, HeaderMap},
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

mod ws_battle;
mod ws_queue;
mod ws_session;
mod ws_timers;


pub mod error_sanitizer;

pub use ws_timers::run_timer_dispatch;

use arena_domain::{BattleId, ConnectionId, UserId};
use arena_shared::{ClientMessage, ErrorCode, ServerMessage};

use super::connections::ConnectionManager;
use crate::app::App;
use crate::infrastructure::ports::AuthError;

/// Buffer size for per-connection message channel.
const CONNECTION_CHANNEL_BUFFER: usize = 256;

/// How long a closing connection may take to flush its queued frames.
const SEND_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Combined state for WebSocket handlers.
pub struct WsState {
    pub app: Arc<App>,
    pub connections: Arc<ConnectionManager>,
}

impl WsState {
    pub fn new(app: Arc<App>, connections: Arc<ConnectionManager>) -> Self {
        Self { app, connections }
    }
}

/// Query parameters accepted on the upgrade request.
#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    token: Option<String>,
}

/// WebSocket upgrade handler. The token comes from `?token=` or an
/// `Authorization: Bearer` header.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<WsState>>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
) -> Response {
    let token = params
        .token
        .or_else(|| bearer_token(&headers))
        .unwrap_or_default();
    ws.on_upgrade(move |socket| handle_socket(socket, state, token))
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
}

/// Handle an individual WebSocket connection.
async fn handle_socket(socket: WebSocket, state: Arc<WsState>, token: String) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let user_id = match state.app.auth.verify(&token).await {
        Ok(user_id) => user_id,
        Err(e) => {
            tracing::warn!(error = %e, "Rejected unauthenticated WebSocket connection");
            let code = match e {
                AuthError::MissingToken => ErrorCode::NoToken,
                AuthError::InvalidToken => ErrorCode::InvalidToken,
            };
            if let Ok(json) = serde_json::to_string(&ServerMessage::error(code, e.to_string())) {
                let _ = ws_sender.send(Message::Text(json.into())).await;
            }
            let _ = ws_sender.send(Message::Close(None)).await;
            return;
        }
    };

    let connection_id = ConnectionId::new();
    let close = CancellationToken::new();

    // Create a bounded channel for sending messages to this client
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(CONNECTION_CHANNEL_BUFFER);

    state
        .connections
        .register(connection_id, user_id, tx.clone(), close.clone())
        .await;

    tracing::info!(
        connection_id = %connection_id,
        user_id = %user_id,
        "WebSocket connection established"
    );

    // Forward queued frames until every sender is gone, then close the socket.
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if let Ok(json) = serde_json::to_string(&msg) {
                if ws_sender.send(Message::Text(json.into())).await.is_err() {
                    return;
                }
            }
        }
        let _ = ws_sender.send(Message::Close(None)).await;
    });

    if let Err(error) = ws_session::handle_connect(&state, connection_id, user_id).await {
        let _ = tx.try_send(error);
        close.cancel();
    }

    // Handle incoming messages
    loop {
        let frame = tokio::select! {
            _ = close.cancelled() => {
                tracing::info!(connection_id = %connection_id, "WebSocket closed by server");
                break;
            }
            frame = ws_receiver.next() => frame,
        };
        let Some(result) = frame else {
            break;
        };

        match result {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(text.as_str()) {
                Ok(msg) => {
                    if let Some(response) =
                        handle_message(msg, &state, connection_id, user_id).await
                    {
                        if tx.try_send(response).is_err() {
                            tracing::warn!(
                                connection_id = %connection_id,
                                "Failed to send response, channel full or closed"
                            );
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(connection_id = %connection_id, error = %e, "Failed to parse message");
                    let error = ServerMessage::error(
                        ErrorCode::ParseError,
                        format!("Invalid message format: {}", e),
                    );
                    let _ = tx.try_send(error);
                }
            },
            Ok(Message::Ping(_)) => {
                let _ = tx.try_send(ServerMessage::Pong);
            }
            Ok(Message::Close(_)) => {
                tracing::info!(connection_id = %connection_id, "WebSocket closed by client");
                break;
            }
            Err(e) => {
                tracing::error!(connection_id = %connection_id, error = %e, "WebSocket error");
                break;
            }
            _ => {}
        }
    }

    // Clean up
    state.connections.unregister(connection_id).await;
    drop(tx);
    let abort = send_task.abort_handle();
    if tokio::time::timeout(SEND_DRAIN_TIMEOUT, send_task)
        .await
        .is_err()
    {
        abort.abort();
    }

    ws_session::handle_disconnect(&state, connection_id, user_id).await;

    tracing::info!(connection_id = %connection_id, "WebSocket connection terminated");
}

/// Dispatch a parsed client message to the appropriate handler.
async fn handle_message(
    msg: ClientMessage,
    state: &WsState,
    connection_id: ConnectionId,
    user_id: UserId,
) -> Option<ServerMessage> {
    match msg {
        ClientMessage::Heartbeat => Some(ServerMessage::Pong),

        // Queue
        ClientMessage::QueueJoin => ws_queue::handle_join(state, connection_id, user_id).await,
        ClientMessage::QueueLeave => ws_queue::handle_leave(state, user_id).await,

        // Battle
        ClientMessage::BattleReady { battle_id } => {
            ws_battle::handle_ready(state, user_id, BattleId::from_uuid(battle_id)).await
        }
        ClientMessage::BattleAction { request_id, .. } => {
            ws_battle::handle_action(state, user_id, request_id).await
        }

        ClientMessage::Unknown => {
            tracing::debug!(connection_id = %connection_id, "Unknown message type");
            Some(ServerMessage::error(
                ErrorCode::ParseError,
                error_sanitizer::messages::UNKNOWN_MESSAGE,
            ))
        }
    }
}
