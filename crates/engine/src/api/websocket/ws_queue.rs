use super::*;

use arena_domain::User;
use arena_shared::OpponentSummary;

use crate::use_cases::matchmaking::{FormedMatch, MatchmakingError};

pub(super) async fn handle_join(
    state: &WsState,
    connection_id: ConnectionId,
    user_id: UserId,
) -> Option<ServerMessage> {
    let ticket = match state.app.use_cases.matchmaking.join_queue(user_id).await {
        Ok(ticket) => ticket,
        Err(e) => return Some(join_error(e)),
    };

    state
        .connections
        .send_to(
            connection_id,
            ServerMessage::QueuePosition {
                position: ticket.position,
                queue_length: ticket.queue_length,
            },
        )
        .await;

    match run_matchmaking(state).await {
        Ok(()) => None,
        Err(e) => Some(error_sanitizer::sanitized_error(
            ErrorCode::MatchSetupFailed,
            &e,
            "setting up the match",
        )),
    }
}

pub(super) async fn handle_leave(state: &WsState, user_id: UserId) -> Option<ServerMessage> {
    state.app.use_cases.matchmaking.leave_queue(user_id).await;
    Some(ServerMessage::QueueLeft)
}

/// Form matches until the queue has no valid pair left.
pub(super) async fn run_matchmaking(state: &WsState) -> Result<(), MatchmakingError> {
    while let Some(formed) = state.app.use_cases.matchmaking.try_form_match().await? {
        announce_match(state, formed).await;
    }
    Ok(())
}

/// Open the ready handshake and move both players into the battle room.
async fn announce_match(state: &WsState, formed: FormedMatch) {
    let battle_id = formed.battle.id();
    state
        .app
        .use_cases
        .handshake
        .open(battle_id, [formed.player1.id(), formed.player2.id()]);

    for (player, opponent) in [
        (&formed.player1, &formed.player2),
        (&formed.player2, &formed.player1),
    ] {
        let Some(connection_id) = state.app.sessions.lookup(player.id()) else {
            tracing::warn!(
                battle_id = %battle_id,
                user_id = %player.id(),
                "Matched player has no live connection"
            );
            continue;
        };
        state
            .connections
            .move_to_battle(connection_id, battle_id)
            .await;
        state
            .connections
            .send_to(
                connection_id,
                ServerMessage::MatchFound {
                    battle_id: battle_id.to_uuid(),
                    opponent: opponent_summary(opponent),
                },
            )
            .await;
    }
}

fn opponent_summary(user: &User) -> OpponentSummary {
    let creature = user.creature();
    OpponentSummary {
        id: user.id().to_uuid(),
        nickname: user.nickname().to_string(),
        level: creature.level(),
        hp: creature.hp(),
        max_hp: creature.max_hp(),
    }
}

fn join_error(e: MatchmakingError) -> ServerMessage {
    match e {
        MatchmakingError::AlreadyInBattle(user_id) => {
            tracing::debug!(user_id = %user_id, "Queue join rejected, already in battle");
            ServerMessage::error(
                ErrorCode::AlreadyInBattle,
                error_sanitizer::messages::ALREADY_IN_BATTLE,
            )
        }
        MatchmakingError::UserNotFound(_) => ServerMessage::error(
            ErrorCode::UserNotFound,
            error_sanitizer::messages::USER_NOT_FOUND,
        ),
        other => {
            error_sanitizer::sanitized_error(ErrorCode::MatchJoinFailed, &other, "joining the queue")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::ports::RepoError;

    #[test]
    fn join_errors_map_to_codes() {
        let code = |msg: ServerMessage| match msg {
            ServerMessage::Error { code, .. } => code,
            other => panic!("expected an error frame, got {other:?}"),
        };
        assert_eq!(
            code(join_error(MatchmakingError::AlreadyInBattle(UserId::new()))),
            ErrorCode::AlreadyInBattle
        );
        assert_eq!(
            code(join_error(MatchmakingError::UserNotFound(UserId::new()))),
            ErrorCode::UserNotFound
        );
        assert_eq!(
            code(join_error(MatchmakingError::Repo(RepoError::database(
                "find_by_id",
                "offline"
            )))),
            ErrorCode::MatchJoinFailed
        );
    }
}
