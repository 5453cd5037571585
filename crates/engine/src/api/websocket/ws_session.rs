use super::*;

use arena_shared::UserSummary;

use crate::use_cases::session::{DisconnectOutcome, SessionError};

/// Bind a freshly authenticated connection to its user.
///
/// Evicts an older connection of the same user and resumes a live battle.
/// On error the caller must close the connection.
pub(super) async fn handle_connect(
    state: &WsState,
    connection_id: ConnectionId,
    user_id: UserId,
) -> Result<(), ServerMessage> {
    let outcome = state
        .app
        .use_cases
        .session
        .connect(user_id, connection_id)
        .await
        .map_err(connect_error)?;

    if let Some(evicted) = outcome.evicted {
        tracing::info!(
            user_id = %user_id,
            evicted_connection_id = %evicted,
            connection_id = %connection_id,
            "Evicting superseded connection"
        );
        state
            .connections
            .send_to(
                evicted,
                ServerMessage::SessionReplaced {
                    message: error_sanitizer::messages::SESSION_REPLACED.to_string(),
                },
            )
            .await;
        state.connections.close(evicted).await;
    }

    state
        .connections
        .send_to(
            connection_id,
            ServerMessage::Connected {
                user: UserSummary {
                    id: outcome.user.id().to_uuid(),
                    nickname: outcome.user.nickname().to_string(),
                    level: outcome.user.creature().level(),
                },
                timestamp: state.app.clock.now().to_rfc3339(),
            },
        )
        .await;

    if let Some(snapshot) = outcome.resume {
        state
            .connections
            .move_to_battle(connection_id, snapshot.battle_id)
            .await;
        state
            .connections
            .send_to(
                connection_id,
                ServerMessage::BattleResume {
                    battle_id: snapshot.battle_id.to_uuid(),
                    snapshot: ws_battle::snapshot_data(&snapshot),
                },
            )
            .await;
    }

    Ok(())
}

/// Clean up after a closed connection. Must run after it was unregistered.
pub(super) async fn handle_disconnect(
    state: &WsState,
    connection_id: ConnectionId,
    user_id: UserId,
) {
    match state
        .app
        .use_cases
        .session
        .disconnect(user_id, connection_id)
        .await
    {
        Ok(DisconnectOutcome::Cleaned {
            forfeited: Some(ended),
            ..
        }) => ws_battle::finish_battle(state, &ended).await,
        Ok(_) => {}
        Err(e) => {
            tracing::error!(
                user_id = %user_id,
                connection_id = %connection_id,
                error = %e,
                "Failed to clean up session"
            );
        }
    }
}

fn connect_error(e: SessionError) -> ServerMessage {
    match e {
        SessionError::UserNotFound(_) => ServerMessage::error(
            ErrorCode::UserNotFound,
            error_sanitizer::messages::USER_NOT_FOUND,
        ),
        other => {
            error_sanitizer::sanitized_error(ErrorCode::InternalError, &other, "connecting")
        }
    }
}
