//! Arena Shared - wire types for engine and client communication
//!
//! # Design Principles
//!
//! 1. **Minimal dependencies** - only serde, serde_json and uuid
//! 2. **No business logic** - pure data types and serialization
//! 3. **No domain IDs** - use raw `uuid::Uuid` in DTOs

pub mod messages;

pub use messages::{
    BattleActionKind, BattleEndReason, BattleSnapshotData, ClientMessage, ErrorCode, FighterData,
    LevelChange, OpponentSummary, ServerMessage, UserSummary,
};
