//! Damage roll for a single attack.
//!
//! The roll is pure: randomness is injected as a closure with the same
//! contract as `RandomPort::gen_range` (inclusive bounds), so tests can
//! script exact outcomes.

use serde::{Deserialize, Serialize};

/// Lowest base damage an attack can roll.
pub const MIN_BASE_DAMAGE: i32 = 10;

/// Highest base damage an attack can roll.
pub const MAX_BASE_DAMAGE: i32 = 60;

/// Chance (in percent) that an attack is a critical hit.
pub const CRIT_CHANCE_PERCENT: i32 = 10;

/// Outcome of one damage roll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DamageRoll {
    base: u32,
    is_crit: bool,
}

impl DamageRoll {
    /// Roll base damage uniformly in `[MIN_BASE_DAMAGE, MAX_BASE_DAMAGE]`, then
    /// roll `1..=100` against `CRIT_CHANCE_PERCENT` for the critical multiplier.
    pub fn roll(mut gen_range: impl FnMut(i32, i32) -> i32) -> Self {
        let base = gen_range(MIN_BASE_DAMAGE, MAX_BASE_DAMAGE).clamp(MIN_BASE_DAMAGE, MAX_BASE_DAMAGE);
        let is_crit = gen_range(1, 100) <= CRIT_CHANCE_PERCENT;
        Self {
            base: base.unsigned_abs(),
            is_crit,
        }
    }

    /// Build a roll from known values.
    pub fn fixed(base: u32, is_crit: bool) -> Self {
        Self { base, is_crit }
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn is_crit(&self) -> bool {
        self.is_crit
    }

    /// Final damage: critical hits deal 1.5x, floored.
    pub fn damage(&self) -> u32 {
        if self.is_crit {
            self.base * 3 / 2
        } else {
            self.base
        }
    }
}
