//! Session use cases.
//!
//! Connection lifecycle: binding a user on connect (evicting an older
//! connection), and the cleanup that follows a disconnect.

mod lifecycle;

pub use lifecycle::{ConnectOutcome, DisconnectOutcome, SessionError, SessionLifecycle};
