//! Battle use cases.
//!
//! The engine owns the turn state machine: battle creation, idempotent
//! action processing, and every way a battle ends (KO, AFK, disconnect,
//! failed setup).

mod engine;
mod error;
mod types;

pub use engine::BattleEngine;
pub use error::BattleError;
pub use types::{BattleEndOutcome, BattleStats, TurnOutcome};
