//! Fired-timer dispatch.
//!
//! One task drains the scheduler's channel. Every handler claims the timer
//! generation through the owning use case before it mutates anything, so a
//! timer that raced a success path is dropped here.

use super::*;

use crate::infrastructure::timers::{TimerFired, TimerKey};

/// Drain fired timers until the scheduler is dropped.
pub async fn run_timer_dispatch(
    state: Arc<WsState>,
    mut fired: mpsc::UnboundedReceiver<TimerFired>,
) {
    while let Some(timer) = fired.recv().await {
        tracing::debug!(key = ?timer.key, generation = timer.generation, "Timer fired");
        match timer.key {
            TimerKey::QueueWait(user_id) => {
                on_queue_timeout(&state, user_id, timer.generation).await
            }
            TimerKey::BattleAction(battle_id) => {
                on_action_timeout(&state, battle_id, timer.generation).await
            }
            TimerKey::ReadyHandshake(battle_id) => {
                on_ready_timeout(&state, battle_id, timer.generation).await
            }
        }
    }
    tracing::info!("Timer dispatcher stopped");
}

async fn on_queue_timeout(state: &WsState, user_id: UserId, generation: u64) {
    if !state
        .app
        .use_cases
        .matchmaking
        .handle_queue_timeout(user_id, generation)
        .await
    {
        return;
    }
    if let Some(connection_id) = state.app.sessions.lookup(user_id) {
        state
            .connections
            .send_to(
                connection_id,
                ServerMessage::QueueTimeout {
                    reason: error_sanitizer::messages::QUEUE_TIMEOUT.to_string(),
                },
            )
            .await;
    }
}

async fn on_action_timeout(state: &WsState, battle_id: BattleId, generation: u64) {
    match state
        .app
        .use_cases
        .battle
        .handle_action_timeout(battle_id, generation)
        .await
    {
        Ok(Some(ended)) => ws_battle::finish_battle(state, &ended).await,
        Ok(None) => {}
        Err(e) => {
            tracing::error!(battle_id = %battle_id, error = %e, "Failed to end AFK battle");
        }
    }
}

async fn on_ready_timeout(state: &WsState, battle_id: BattleId, generation: u64) {
    let Some(expired) = state.app.use_cases.handshake.expire(battle_id, generation) else {
        return;
    };

    // Clean battle and queue state before anyone is told to move on.
    if let Err(e) = state
        .app
        .use_cases
        .battle
        .abort_setup(battle_id, &expired.ready)
        .await
    {
        tracing::error!(battle_id = %battle_id, error = %e, "Failed to abort battle setup");
    }
    for user_id in expired.expected {
        state.app.use_cases.matchmaking.leave_queue(user_id).await;
    }
    state
        .connections
        .broadcast_to_battle(
            battle_id,
            ServerMessage::BattleSetupTimeout {
                battle_id: battle_id.to_uuid(),
                reason: error_sanitizer::messages::SETUP_TIMEOUT.to_string(),
                ready_count: expired.ready.len(),
                expected_count: expired.expected.len(),
            },
        )
        .await;

    state.connections.return_battle_to_lobby(battle_id).await;
}
