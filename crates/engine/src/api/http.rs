//! HTTP routes.

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use arena_shared::UserSummary;

use crate::app::App;
use crate::use_cases::auth::{GuestLoginError, GuestLoginInput};

/// Create all HTTP routes.
pub fn routes() -> Router<Arc<App>> {
    Router::new()
        .route("/", get(root))
        .route("/api/health", get(health))
        .route("/api/auth/guest", post(guest_login))
}

async fn root() -> &'static str {
    "OK"
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
    pub stats: HealthStats,
}

#[derive(Debug, Serialize)]
pub struct HealthStats {
    pub online_users: usize,
    pub active_sessions: usize,
    pub queue: QueueHealth,
    pub battles: BattleHealth,
    pub handshakes: HandshakeHealth,
}

#[derive(Debug, Serialize)]
pub struct QueueHealth {
    pub length: usize,
    pub average_wait_seconds: f64,
    pub armed_timeouts: usize,
}

#[derive(Debug, Serialize)]
pub struct BattleHealth {
    pub active: usize,
    pub armed_timeouts: usize,
    pub tracked_idempotency_sets: usize,
}

#[derive(Debug, Serialize)]
pub struct HandshakeHealth {
    pub pending: usize,
    pub armed_timeouts: usize,
}

async fn health(State(app): State<Arc<App>>) -> Result<Json<HealthResponse>, ApiError> {
    let stats = app
        .stats()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(HealthResponse {
        status: "ok",
        timestamp: stats.timestamp.to_rfc3339(),
        stats: HealthStats {
            online_users: stats.online_users,
            active_sessions: stats.active_sessions,
            queue: QueueHealth {
                length: stats.queue_length,
                average_wait_seconds: stats.average_wait_seconds,
                armed_timeouts: stats.queue_timeouts,
            },
            battles: BattleHealth {
                active: stats.active_battles,
                armed_timeouts: stats.action_timeouts,
                tracked_idempotency_sets: stats.tracked_idempotency_sets,
            },
            handshakes: HandshakeHealth {
                pending: stats.pending_handshakes,
                armed_timeouts: stats.handshake_timeouts,
            },
        },
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct GuestLoginRequest {
    #[serde(default)]
    pub wallet_address: Option<String>,
    #[serde(default)]
    pub nickname: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GuestLoginResponse {
    pub token: String,
    pub user: UserSummary,
    pub created: bool,
}

async fn guest_login(
    State(app): State<Arc<App>>,
    Json(body): Json<GuestLoginRequest>,
) -> Result<Json<GuestLoginResponse>, ApiError> {
    let result = app
        .use_cases
        .guest_login
        .execute(GuestLoginInput {
            wallet_address: body.wallet_address,
            nickname: body.nickname,
        })
        .await?;

    Ok(Json(GuestLoginResponse {
        token: result.token,
        user: UserSummary {
            id: result.user.id().to_uuid(),
            nickname: result.user.nickname().to_string(),
            level: result.user.creature().level(),
        },
        created: result.created,
    }))
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Internal(String),
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        match self {
            ApiError::BadRequest(msg) => {
                (axum::http::StatusCode::BAD_REQUEST, msg).into_response()
            }
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "HTTP request failed");
                (
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal error",
                )
                    .into_response()
            }
        }
    }
}

impl From<GuestLoginError> for ApiError {
    fn from(e: GuestLoginError) -> Self {
        match e {
            GuestLoginError::Validation(e) => ApiError::BadRequest(e.to_string()),
            GuestLoginError::Repo(e) => ApiError::Internal(e.to_string()),
        }
    }
}
