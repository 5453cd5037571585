//! Arena domain - pure types and rules for the battle arena.
//!
//! No async, no I/O. Randomness is injected by callers.

pub mod aggregates;
pub mod error;
pub mod ids;
pub mod value_objects;

pub use aggregates::{
    Battle, BattlePatch, BattleSnapshot, BattleState, Creature, DamageOutcome, EndReason,
    FighterSnapshot, LevelUpOutcome, TurnSlot, User, UserPatch, MAX_LEVEL,
};
pub use error::DomainError;
pub use ids::{BattleId, ConnectionId, UserId};
pub use value_objects::{
    DamageRoll, Nickname, Position, RequestId, CRIT_CHANCE_PERCENT, MAX_BASE_DAMAGE,
    MIN_BASE_DAMAGE,
};
