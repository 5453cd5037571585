//! Error sanitization for client-facing messages.
//!
//! Prevents leaking internal details (storage errors, ids of other users) to clients.

use arena_shared::{ErrorCode, ServerMessage};

/// Sanitize an error for client consumption.
///
/// Logs the full error server-side, returns generic message for client.
pub fn sanitize_error<E: std::fmt::Display>(error: &E, context: &str) -> String {
    tracing::error!(
        error = %error,
        context = context,
        "Internal error occurred"
    );

    format!("An error occurred while {}", context)
}

/// Build an error frame whose message has been sanitized.
pub fn sanitized_error<E: std::fmt::Display>(
    code: ErrorCode,
    error: &E,
    context: &str,
) -> ServerMessage {
    ServerMessage::error(code, sanitize_error(error, context))
}

/// Common error messages for client consumption.
pub mod messages {
    pub const ALREADY_IN_BATTLE: &str = "You are already in a battle";
    pub const USER_NOT_FOUND: &str = "User not found";
    pub const UNKNOWN_MESSAGE: &str = "Unknown message type";
    pub const SESSION_REPLACED: &str = "Signed in from another connection";
    pub const QUEUE_TIMEOUT: &str = "QUEUE_TIMEOUT";
    pub const SETUP_TIMEOUT: &str = "Players not ready in time";
}
