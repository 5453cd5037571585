//! In-memory user storage.

use std::collections::HashMap;

use arena_domain::{ConnectionId, Creature, Position, User, UserId, UserPatch};
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::infrastructure::ports::{RepoError, UserRepo};

#[derive(Default)]
struct UserTable {
    users: HashMap<UserId, User>,
    by_wallet: HashMap<String, UserId>,
}

/// Process-local user store. Each call is atomic with respect to the others.
#[derive(Default)]
pub struct InMemoryUserRepo {
    table: RwLock<UserTable>,
}

impl InMemoryUserRepo {
    pub fn new() -> Self {
        Self::default()
    }

    async fn update<F>(&self, id: UserId, f: F) -> Result<(), RepoError>
    where
        F: FnOnce(&mut User) + Send,
    {
        let mut table = self.table.write().await;
        let user = table
            .users
            .get_mut(&id)
            .ok_or_else(|| RepoError::not_found("User", id))?;
        f(user);
        Ok(())
    }
}

#[async_trait]
impl UserRepo for InMemoryUserRepo {
    async fn find_by_id(&self, id: UserId) -> Result<Option<User>, RepoError> {
        Ok(self.table.read().await.users.get(&id).cloned())
    }

    async fn find_by_wallet(&self, wallet: &str) -> Result<Option<User>, RepoError> {
        let table = self.table.read().await;
        Ok(table
            .by_wallet
            .get(wallet)
            .and_then(|id| table.users.get(id))
            .cloned())
    }

    async fn list_online(&self) -> Result<Vec<User>, RepoError> {
        let table = self.table.read().await;
        Ok(table
            .users
            .values()
            .filter(|user| user.is_online())
            .cloned()
            .collect())
    }

    async fn create(&self, user: &User) -> Result<(), RepoError> {
        let mut table = self.table.write().await;
        if table.users.contains_key(&user.id()) {
            return Err(RepoError::constraint(format!(
                "user {} already exists",
                user.id()
            )));
        }
        if let Some(wallet) = user.wallet_address() {
            if table.by_wallet.contains_key(wallet) {
                return Err(RepoError::constraint(format!(
                    "wallet {} already registered",
                    wallet
                )));
            }
            table.by_wallet.insert(wallet.to_string(), user.id());
        }
        table.users.insert(user.id(), user.clone());
        Ok(())
    }

    async fn patch(&self, id: UserId, patch: UserPatch) -> Result<(), RepoError> {
        self.update(id, move |user| user.apply_patch(patch)).await
    }

    async fn set_connection(
        &self,
        id: UserId,
        connection_id: Option<ConnectionId>,
    ) -> Result<(), RepoError> {
        self.update(id, |user| user.set_connection(connection_id))
            .await
    }

    async fn upsert_creature(&self, id: UserId, creature: &Creature) -> Result<(), RepoError> {
        let creature = creature.clone();
        self.update(id, move |user| user.replace_creature(creature))
            .await
    }

    async fn set_in_battle(&self, id: UserId, in_battle: bool) -> Result<(), RepoError> {
        self.update(id, |user| user.set_in_battle(in_battle)).await
    }

    async fn update_position(&self, id: UserId, position: Position) -> Result<(), RepoError> {
        self.update(id, |user| user.move_to(position)).await
    }
}
