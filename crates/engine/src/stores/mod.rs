//! In-memory state storage modules.
//!
//! Stores manage runtime state that doesn't belong in the user/battle store:
//! - `SessionRegistry` - user to live connection binding

pub mod session;

pub use session::SessionRegistry;
