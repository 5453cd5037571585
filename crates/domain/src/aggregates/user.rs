//! User aggregate - a registered player and the creature they fight with
//!
//! # Invariants
//!
//! - `0 <= creature.hp <= creature.max_hp`
//! - `creature.max_hp == 50 + 5 * creature.level`
//! - `1 <= creature.level <= 100`
//!
//! The in-battle flag and the bound connection are owned by the orchestrator;
//! the aggregate only stores them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ConnectionId, UserId};
use crate::value_objects::{Nickname, Position};

/// Highest level a creature can reach.
pub const MAX_LEVEL: u32 = 100;

const BASE_MAX_HP: u32 = 50;
const HP_PER_LEVEL: u32 = 5;
const STARTER_NAME: &str = "Starter Creature";

// ============================================================================
// Creature
// ============================================================================

/// Result of applying damage to a creature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DamageOutcome {
    /// Creature is still standing with the given hp
    Wounded { remaining_hp: u32 },
    /// Creature hp reached zero
    Fainted,
}

/// Result of a level-up attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelUpOutcome {
    Leveled { from: u32, to: u32 },
    AlreadyAtCap,
}

/// A player's creature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Creature {
    name: String,
    hp: u32,
    max_hp: u32,
    level: u32,
    is_fainted: bool,
}

impl Creature {
    /// Level-1 creature at full health.
    pub fn starter() -> Self {
        let max_hp = Self::max_hp_for_level(1);
        Self {
            name: STARTER_NAME.to_string(),
            hp: max_hp,
            max_hp,
            level: 1,
            is_fainted: false,
        }
    }

    /// Rebuild a creature from stored values, restoring the invariants.
    pub fn from_parts(name: impl Into<String>, hp: u32, level: u32, is_fainted: bool) -> Self {
        let level = level.clamp(1, MAX_LEVEL);
        let max_hp = Self::max_hp_for_level(level);
        Self {
            name: name.into(),
            hp: hp.min(max_hp),
            max_hp,
            level,
            is_fainted,
        }
    }

    pub fn max_hp_for_level(level: u32) -> u32 {
        BASE_MAX_HP + HP_PER_LEVEL * level
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hp(&self) -> u32 {
        self.hp
    }

    pub fn max_hp(&self) -> u32 {
        self.max_hp
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn is_fainted(&self) -> bool {
        self.is_fainted
    }

    /// Subtract damage, flooring hp at zero.
    pub fn apply_damage(&mut self, damage: u32) -> DamageOutcome {
        self.hp = self.hp.saturating_sub(damage);
        if self.hp == 0 {
            DamageOutcome::Fainted
        } else {
            DamageOutcome::Wounded {
                remaining_hp: self.hp,
            }
        }
    }

    /// Gain one level (capped), recomputing max hp and clamping current hp.
    pub fn level_up(&mut self) -> LevelUpOutcome {
        if self.level >= MAX_LEVEL {
            return LevelUpOutcome::AlreadyAtCap;
        }
        let from = self.level;
        self.level += 1;
        self.max_hp = Self::max_hp_for_level(self.level);
        self.hp = self.hp.min(self.max_hp);
        LevelUpOutcome::Leveled {
            from,
            to: self.level,
        }
    }

    pub fn faint(&mut self) {
        self.hp = 0;
        self.is_fainted = true;
    }

    /// Bring the creature back with 1 hp.
    pub fn revive(&mut self) {
        self.hp = 1;
        self.is_fainted = false;
    }
}

// ============================================================================
// User
// ============================================================================

/// Partial update of user profile fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserPatch {
    pub nickname: Option<Nickname>,
    pub last_login_at: Option<DateTime<Utc>>,
}

/// A registered player.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    id: UserId,
    nickname: Nickname,
    wallet_address: Option<String>,
    position: Position,
    creature: Creature,
    in_battle: bool,
    connection_id: Option<ConnectionId>,
    created_at: DateTime<Utc>,
    last_login_at: DateTime<Utc>,
}

impl User {
    /// New user at the origin with a starter creature.
    pub fn new(nickname: Nickname, wallet_address: Option<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: UserId::new(),
            nickname,
            wallet_address,
            position: Position::default(),
            creature: Creature::starter(),
            in_battle: false,
            connection_id: None,
            created_at: now,
            last_login_at: now,
        }
    }

    pub fn with_id(mut self, id: UserId) -> Self {
        self.id = id;
        self
    }

    pub fn with_creature(mut self, creature: Creature) -> Self {
        self.creature = creature;
        self
    }

    // Accessors

    pub fn id(&self) -> UserId {
        self.id
    }

    pub fn nickname(&self) -> &Nickname {
        &self.nickname
    }

    pub fn wallet_address(&self) -> Option<&str> {
        self.wallet_address.as_deref()
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn creature(&self) -> &Creature {
        &self.creature
    }

    pub fn is_in_battle(&self) -> bool {
        self.in_battle
    }

    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.connection_id
    }

    pub fn is_online(&self) -> bool {
        self.connection_id.is_some()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_login_at(&self) -> DateTime<Utc> {
        self.last_login_at
    }

    // Mutations (applied by storage adapters)

    pub fn apply_patch(&mut self, patch: UserPatch) {
        if let Some(nickname) = patch.nickname {
            self.nickname = nickname;
        }
        if let Some(at) = patch.last_login_at {
            self.last_login_at = at;
        }
    }

    pub fn set_connection(&mut self, connection_id: Option<ConnectionId>) {
        self.connection_id = connection_id;
    }

    pub fn set_in_battle(&mut self, in_battle: bool) {
        self.in_battle = in_battle;
    }

    pub fn replace_creature(&mut self, creature: Creature) {
        self.creature = creature;
    }

    pub fn move_to(&mut self, position: Position) {
        self.position = position;
    }
}
