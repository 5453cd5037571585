//! Infrastructure implementations.
//!
//! Contains port trait implementations and process-level plumbing
//! (configuration, timers).

pub mod auth;
pub mod clock;
pub mod config;
pub mod memory;
pub mod ports;
pub mod timers;
