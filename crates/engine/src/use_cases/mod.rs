//! Use cases - User story orchestration.
//!
//! Each module contains use cases for a specific area. The API layer calls
//! these and decides which broadcasts follow from their typed results.

pub mod auth;
pub mod battle;
pub mod handshake;
pub mod matchmaking;
pub mod session;

pub use auth::GuestLogin;
pub use battle::BattleEngine;
pub use handshake::ReadyCoordinator;
pub use matchmaking::Matchmaking;
pub use session::SessionLifecycle;
