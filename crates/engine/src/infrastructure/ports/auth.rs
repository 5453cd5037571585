//! Bearer-token verification port.

use arena_domain::UserId;
use async_trait::async_trait;

use super::error::AuthError;

/// Resolves a bearer token presented at connection time to a user.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<UserId, AuthError>;
}
