//! Repository port traits for storage access.

use arena_domain::{
    Battle, BattleId, BattlePatch, ConnectionId, Creature, Position, User, UserId, UserPatch,
};
use async_trait::async_trait;

use super::error::RepoError;

// =============================================================================
// User Storage
// =============================================================================

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserRepo: Send + Sync {
    // Lookup
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepoError>;
    async fn find_by_wallet(&self, wallet: &str) -> Result<Option<User>, RepoError>;
    async fn list_online(&self) -> Result<Vec<User>, RepoError>;

    // Writes
    async fn create(&self, user: &User) -> Result<(), RepoError>;
    async fn patch(&self, id: UserId, patch: UserPatch) -> Result<(), RepoError>;
    async fn set_connection(
        &self,
        id: UserId,
        connection_id: Option<ConnectionId>,
    ) -> Result<(), RepoError>;
    async fn upsert_creature(&self, id: UserId, creature: &Creature) -> Result<(), RepoError>;
    async fn set_in_battle(&self, id: UserId, in_battle: bool) -> Result<(), RepoError>;
    async fn update_position(&self, id: UserId, position: Position) -> Result<(), RepoError>;
}

// =============================================================================
// Battle Storage
// =============================================================================

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BattleRepo: Send + Sync {
    // CRUD
    async fn create(&self, battle: &Battle) -> Result<(), RepoError>;
    async fn get(&self, id: BattleId) -> Result<Option<Battle>, RepoError>;
    async fn delete(&self, id: BattleId) -> Result<(), RepoError>;

    // Turn state
    async fn patch(&self, id: BattleId, patch: BattlePatch) -> Result<(), RepoError>;
    async fn append_log(&self, id: BattleId, line: &str) -> Result<(), RepoError>;
    async fn end_battle(&self, id: BattleId, winner_id: UserId) -> Result<(), RepoError>;

    // Queries
    /// Every stored battle the user took part in, newest first.
    async fn find_by_participant(&self, user_id: UserId) -> Result<Vec<Battle>, RepoError>;
    /// Battles that have not ended.
    async fn list_active(&self) -> Result<Vec<Battle>, RepoError>;
}
