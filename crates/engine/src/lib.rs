//! Arena Engine library.
//!
//! Server-side code for the two-player battle arena.
//!
//! ## Structure
//!
//! - `stores/` - Process-wide in-memory state (session registry)
//! - `use_cases/` - Matchmaking, battle engine, ready handshake, session lifecycle
//! - `infrastructure/` - External dependency implementations (ports + adapters)
//! - `api/` - HTTP and WebSocket entry points
//! - `app` - Application composition

pub mod api;
pub mod app;
pub mod infrastructure;
pub mod stores;
pub mod use_cases;

pub use app::App;
