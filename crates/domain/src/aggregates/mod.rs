//! Aggregate roots - domain objects that own their related data
//!
//! Each aggregate:
//! - Has a unique identity
//! - Keeps its fields private and exposes behavior through methods
//! - Returns outcome enums from mutations where callers need to branch

pub mod battle;
pub mod user;

pub use battle::{
    Battle, BattlePatch, BattleSnapshot, BattleState, EndReason, FighterSnapshot, TurnSlot,
};
pub use user::{Creature, DamageOutcome, LevelUpOutcome, User, UserPatch, MAX_LEVEL};
