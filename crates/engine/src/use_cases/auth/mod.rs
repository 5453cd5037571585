//! Auth use cases.
//!
//! Guest login for local play: find or create a user and hand out a bearer
//! token accepted by the WebSocket endpoint.

use std::sync::Arc;

use arena_domain::{DomainError, Nickname, User, UserPatch};

use crate::infrastructure::auth::GuestTokens;
use crate::infrastructure::ports::{ClockPort, RandomPort, RepoError, UserRepo};

#[derive(Debug, thiserror::Error)]
pub enum GuestLoginError {
    #[error("Validation error: {0}")]
    Validation(#[from] DomainError),
    #[error("Repository error: {0}")]
    Repo(#[from] RepoError),
}

#[derive(Debug, Clone, Default)]
pub struct GuestLoginInput {
    pub wallet_address: Option<String>,
    pub nickname: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GuestLoginResult {
    pub token: String,
    pub user: User,
    pub created: bool,
}

pub struct GuestLogin {
    users: Arc<dyn UserRepo>,
    tokens: Arc<GuestTokens>,
    clock: Arc<dyn ClockPort>,
    random: Arc<dyn RandomPort>,
}

impl GuestLogin {
    pub fn new(
        users: Arc<dyn UserRepo>,
        tokens: Arc<GuestTokens>,
        clock: Arc<dyn ClockPort>,
        random: Arc<dyn RandomPort>,
    ) -> Self {
        Self {
            users,
            tokens,
            clock,
            random,
        }
    }

    /// Reuse the user owning `wallet_address` if there is one, otherwise
    /// create a new user. A missing nickname becomes `PlayerNNNN`.
    pub async fn execute(&self, input: GuestLoginInput) -> Result<GuestLoginResult, GuestLoginError> {
        let now = self.clock.now();
        let nickname = input.nickname.map(Nickname::new).transpose()?;
        let wallet = input
            .wallet_address
            .map(|w| w.trim().to_string())
            .filter(|w| !w.is_empty());

        let existing = match &wallet {
            Some(wallet) => self.users.find_by_wallet(wallet).await?,
            None => None,
        };

        let (user, created) = match existing {
            Some(mut user) => {
                let patch = UserPatch {
                    nickname,
                    last_login_at: Some(now),
                };
                self.users.patch(user.id(), patch.clone()).await?;
                user.apply_patch(patch);
                (user, false)
            }
            None => {
                let nickname = match nickname {
                    Some(nickname) => nickname,
                    None => Nickname::new(format!("Player{:04}", self.random.gen_range(0, 9999)))?,
                };
                let user = User::new(nickname, wallet, now);
                self.users.create(&user).await?;
                (user, true)
            }
        };

        let token = self.tokens.issue(user.id());
        tracing::info!(user_id = %user.id(), created, "Guest login");

        Ok(GuestLoginResult {
            token,
            user,
            created,
        })
    }
}
