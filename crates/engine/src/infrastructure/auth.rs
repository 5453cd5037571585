//! Guest bearer tokens for local play.
//!
//! Tokens are opaque random strings held in memory. Restarting the engine
//! invalidates every issued token.

use std::sync::Arc;

use arena_domain::UserId;
use async_trait::async_trait;
use dashmap::DashMap;

use crate::infrastructure::ports::{AuthError, RandomPort, TokenVerifier};

pub struct GuestTokens {
    tokens: DashMap<String, UserId>,
    random: Arc<dyn RandomPort>,
}

impl GuestTokens {
    pub fn new(random: Arc<dyn RandomPort>) -> Self {
        Self {
            tokens: DashMap::new(),
            random,
        }
    }

    /// Issue a fresh token for `user_id`. Earlier tokens for the user stay valid.
    pub fn issue(&self, user_id: UserId) -> String {
        let token = self.random.gen_uuid().simple().to_string();
        self.tokens.insert(token.clone(), user_id);
        tracing::debug!(user_id = %user_id, "Issued guest token");
        token
    }

    pub fn revoke(&self, token: &str) -> bool {
        self.tokens.remove(token).is_some()
    }
}

#[async_trait]
impl TokenVerifier for GuestTokens {
    async fn verify(&self, token: &str) -> Result<UserId, AuthError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        self.tokens
            .get(token)
            .map(|entry| *entry.value())
            .ok_or(AuthError::InvalidToken)
    }
}
