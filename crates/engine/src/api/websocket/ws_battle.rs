use super::*;

use arena_domain::{BattleSnapshot, EndReason, FighterSnapshot, RequestId};
use arena_shared::{BattleEndReason, BattleSnapshotData, FighterData, LevelChange};

use crate::use_cases::battle::{BattleEndOutcome, TurnOutcome};
use crate::use_cases::handshake::ReadyOutcome;

pub(super) async fn handle_ready(
    state: &WsState,
    user_id: UserId,
    battle_id: BattleId,
) -> Option<ServerMessage> {
    if state
        .app
        .use_cases
        .handshake
        .signal_ready(battle_id, user_id)
        != ReadyOutcome::Started
    {
        return None;
    }

    // Turns start now, not at match formation.
    state.app.use_cases.battle.restart_turn_clock(battle_id);

    match state.app.use_cases.battle.snapshot(battle_id).await {
        Ok(Some(snapshot)) => {
            state
                .connections
                .broadcast_to_battle(
                    battle_id,
                    ServerMessage::BattleBegin {
                        battle_id: battle_id.to_uuid(),
                        snapshot: snapshot_data(&snapshot),
                    },
                )
                .await;
        }
        Ok(None) => {
            tracing::debug!(battle_id = %battle_id, "Battle ended before it could begin");
        }
        Err(e) => {
            tracing::error!(battle_id = %battle_id, error = %e, "Failed to load battle snapshot");
        }
    }
    None
}

pub(super) async fn handle_action(
    state: &WsState,
    user_id: UserId,
    request_id: String,
) -> Option<ServerMessage> {
    let request_id = match RequestId::new(request_id) {
        Ok(id) => id,
        Err(e) => {
            return Some(ServerMessage::error(
                ErrorCode::BattleActionFailed,
                e.to_string(),
            ))
        }
    };

    let battles = &state.app.use_cases.battle;
    let battle_id = match battles.active_battle_id(user_id).await {
        Ok(Some(id)) => id,
        Ok(None) => {
            tracing::debug!(user_id = %user_id, "Action without a live battle ignored");
            return None;
        }
        Err(e) => {
            return Some(error_sanitizer::sanitized_error(
                ErrorCode::BattleActionFailed,
                &e,
                "processing the action",
            ))
        }
    };

    if state.app.use_cases.handshake.is_pending(battle_id) {
        tracing::debug!(
            battle_id = %battle_id,
            user_id = %user_id,
            "Action before battle begin ignored"
        );
        return None;
    }

    match battles.process_action(battle_id, user_id, request_id).await {
        Ok(Some(turn)) => {
            state
                .connections
                .broadcast_to_battle(battle_id, turn_message(&turn))
                .await;
            if let Some(ended) = &turn.ended {
                finish_battle(state, ended).await;
            }
            None
        }
        Ok(None) => None,
        Err(e) => Some(error_sanitizer::sanitized_error(
            ErrorCode::BattleActionFailed,
            &e,
            "processing the action",
        )),
    }
}

/// Announce a finished battle and send its room back to the lobby.
pub(super) async fn finish_battle(state: &WsState, ended: &BattleEndOutcome) {
    state
        .connections
        .broadcast_to_battle(ended.battle_id, end_message(ended))
        .await;
    state
        .connections
        .return_battle_to_lobby(ended.battle_id)
        .await;
    state.app.use_cases.handshake.cancel(ended.battle_id);
}

fn turn_message(turn: &TurnOutcome) -> ServerMessage {
    ServerMessage::BattleTurn {
        battle_id: turn.battle_id.to_uuid(),
        damage: turn.damage,
        crit: turn.crit,
        resulting_hp: turn.resulting_hp,
        log_line: turn.log_line.clone(),
        acting_player: turn.acting_player.to_uuid(),
        next_player: turn.next_player.to_uuid(),
    }
}

fn end_message(ended: &BattleEndOutcome) -> ServerMessage {
    ServerMessage::BattleEnd {
        battle_id: ended.battle_id.to_uuid(),
        winner_id: ended.winner_id.to_uuid(),
        new_levels: ended
            .new_levels
            .iter()
            .map(|(user_id, level)| LevelChange {
                user_id: user_id.to_uuid(),
                level: *level,
            })
            .collect(),
        reason: end_reason(ended.reason),
    }
}

fn end_reason(reason: EndReason) -> BattleEndReason {
    match reason {
        EndReason::Ko => BattleEndReason::Ko,
        EndReason::AfkTimeout => BattleEndReason::AfkTimeout,
        EndReason::Disconnect => BattleEndReason::Disconnect,
        EndReason::SetupTimeout => BattleEndReason::SetupTimeout,
    }
}

fn fighter_data(fighter: &FighterSnapshot) -> FighterData {
    FighterData {
        user_id: fighter.user_id.to_uuid(),
        hp: fighter.hp,
        max_hp: fighter.max_hp,
        level: fighter.level,
    }
}

pub(super) fn snapshot_data(snapshot: &BattleSnapshot) -> BattleSnapshotData {
    BattleSnapshotData {
        battle_id: snapshot.battle_id.to_uuid(),
        player1: fighter_data(&snapshot.player1),
        player2: fighter_data(&snapshot.player2),
        current_turn_owner: snapshot.current_turn_owner.to_uuid(),
        turn_count: snapshot.turn_count,
    }
}
