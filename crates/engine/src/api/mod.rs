//! API layer - HTTP and WebSocket entry points.

use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

pub mod connections;
pub mod http;
pub mod websocket;

pub use connections::{ConnectionManager, Room};

use crate::app::App;
use websocket::WsState;

/// Build the router with separate states for HTTP and WebSocket.
pub fn router(app: Arc<App>, ws_state: Arc<WsState>) -> Router {
    http::routes()
        .with_state(app)
        .route("/ws", get(websocket::ws_handler).with_state(ws_state))
        .layer(TraceLayer::new_for_http())
}
