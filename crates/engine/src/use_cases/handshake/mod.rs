//! Ready handshake - synchronizes two clients into one battle start.
//!
//! A record is opened when a match forms. Each client signals ready on its
//! own; the second signal starts the battle exactly once and cancels the
//! window. If the window elapses first, the dispatcher calls [`ReadyCoordinator::expire`].

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use arena_domain::{BattleId, UserId};
use dashmap::DashMap;

use crate::infrastructure::timers::{TimerKey, TimerScheduler};

#[derive(Debug)]
struct ReadyState {
    expected: [UserId; 2],
    ready: HashSet<UserId>,
    started: bool,
}

/// Why a ready signal had no effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    UnknownBattle,
    NotExpected,
    AlreadyStarted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyOutcome {
    Ignored(IgnoreReason),
    /// Recorded; still waiting for the other client
    Waiting {
        ready_count: usize,
        expected_count: usize,
    },
    /// Both clients are ready. Returned to exactly one caller.
    Started,
}

/// A handshake whose window elapsed before both clients were ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupExpired {
    pub battle_id: BattleId,
    pub expected: [UserId; 2],
    pub ready: Vec<UserId>,
}

pub struct ReadyCoordinator {
    pending: DashMap<BattleId, ReadyState>,
    timers: Arc<TimerScheduler>,
    window: Duration,
}

impl ReadyCoordinator {
    pub fn new(timers: Arc<TimerScheduler>, window: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            timers,
            window,
        }
    }

    /// Open the handshake for a freshly formed battle and arm its window.
    pub fn open(&self, battle_id: BattleId, expected: [UserId; 2]) {
        self.pending.insert(
            battle_id,
            ReadyState {
                expected,
                ready: HashSet::new(),
                started: false,
            },
        );
        self.timers
            .arm(TimerKey::ReadyHandshake(battle_id), self.window);
        tracing::info!(
            battle_id = %battle_id,
            player1_id = %expected[0],
            player2_id = %expected[1],
            "Ready handshake opened"
        );
    }

    pub fn signal_ready(&self, battle_id: BattleId, user_id: UserId) -> ReadyOutcome {
        let outcome = {
            let Some(mut state) = self.pending.get_mut(&battle_id) else {
                tracing::debug!(battle_id = %battle_id, user_id = %user_id, "Ready for unknown battle ignored");
                return ReadyOutcome::Ignored(IgnoreReason::UnknownBattle);
            };
            if state.started {
                tracing::debug!(battle_id = %battle_id, user_id = %user_id, "Ready after start ignored");
                return ReadyOutcome::Ignored(IgnoreReason::AlreadyStarted);
            }
            if !state.expected.contains(&user_id) {
                tracing::warn!(battle_id = %battle_id, user_id = %user_id, "Ready from unexpected user ignored");
                return ReadyOutcome::Ignored(IgnoreReason::NotExpected);
            }

            state.ready.insert(user_id);
            let expected = state.expected;
            if expected.iter().all(|id| state.ready.contains(id)) {
                state.started = true;
                ReadyOutcome::Started
            } else {
                ReadyOutcome::Waiting {
                    ready_count: state.ready.len(),
                    expected_count: expected.len(),
                }
            }
        };

        match outcome {
            ReadyOutcome::Started => {
                self.timers.cancel(&TimerKey::ReadyHandshake(battle_id));
                self.pending.remove(&battle_id);
                tracing::info!(battle_id = %battle_id, "Both players ready, battle begins");
            }
            ReadyOutcome::Waiting { ready_count, .. } => {
                tracing::debug!(battle_id = %battle_id, user_id = %user_id, ready_count, "Player ready");
            }
            ReadyOutcome::Ignored(_) => {}
        }
        outcome
    }

    /// The window for `battle_id` elapsed.
    ///
    /// Returns the expired handshake only if it is still pending and
    /// `generation` is the armed one.
    pub fn expire(&self, battle_id: BattleId, generation: u64) -> Option<SetupExpired> {
        let key = TimerKey::ReadyHandshake(battle_id);
        let (_, state) = self
            .pending
            .remove_if(&battle_id, |_, state| {
                !state.started && self.timers.claim(&key, generation)
            })?;

        tracing::info!(
            battle_id = %battle_id,
            ready_count = state.ready.len(),
            "Ready handshake expired"
        );
        let ready = state
            .expected
            .iter()
            .copied()
            .filter(|id| state.ready.contains(id))
            .collect();
        Some(SetupExpired {
            battle_id,
            expected: state.expected,
            ready,
        })
    }

    /// Drop a pending handshake (the battle ended some other way).
    pub fn cancel(&self, battle_id: BattleId) -> bool {
        self.timers.cancel(&TimerKey::ReadyHandshake(battle_id));
        self.pending.remove(&battle_id).is_some()
    }

    pub fn is_pending(&self, battle_id: BattleId) -> bool {
        self.pending.contains_key(&battle_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
