//! Results returned by the battle engine.

use arena_domain::{BattleId, EndReason, UserId};

/// A terminated battle, ready to broadcast as `battle.end`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BattleEndOutcome {
    pub battle_id: BattleId,
    pub winner_id: UserId,
    pub loser_id: UserId,
    /// Level of each participant after the battle, winner first
    pub new_levels: Vec<(UserId, u32)>,
    pub reason: EndReason,
}

/// One accepted attack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub battle_id: BattleId,
    pub damage: u32,
    pub crit: bool,
    /// Defender hp after the hit, before any end-of-battle revive
    pub resulting_hp: u32,
    pub log_line: String,
    pub acting_player: UserId,
    pub next_player: UserId,
    pub turn_count: u32,
    /// Set when the hit was lethal
    pub ended: Option<BattleEndOutcome>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BattleStats {
    pub active_battles: usize,
    pub armed_timeouts: usize,
    pub tracked_idempotency_sets: usize,
}
