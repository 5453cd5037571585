//! Battle operation errors.

use arena_domain::{DomainError, UserId};

use crate::infrastructure::ports::RepoError;

#[derive(Debug, thiserror::Error)]
pub enum BattleError {
    #[error("User not found: {0}")]
    UserNotFound(UserId),
    #[error("Battle rule violated: {0}")]
    Domain(#[from] DomainError),
    #[error("Repository error: {0}")]
    Repo(#[from] RepoError),
}
