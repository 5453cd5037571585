//! Port traits for infrastructure boundaries.
//!
//! These are the ONLY abstractions in the engine. Everything else is concrete types.
//! Ports exist for:
//! - User and battle storage (in-memory today, could swap to a database)
//! - Bearer-token verification (guest tokens today, wallet auth later)
//! - Clock/Random (for testing)

mod auth;
mod error;
mod repos;
mod testing;

// =============================================================================
// Repository Ports
// =============================================================================
pub use repos::{BattleRepo, UserRepo};

#[cfg(test)]
pub use repos::{MockBattleRepo, MockUserRepo};

// =============================================================================
// Authentication Port
// =============================================================================
pub use auth::TokenVerifier;

// =============================================================================
// Testing Ports
// =============================================================================
pub use testing::{ClockPort, RandomPort};

#[cfg(test)]
pub use testing::MockClockPort;

// =============================================================================
// Error Types
// =============================================================================
pub use error::{AuthError, RepoError};
