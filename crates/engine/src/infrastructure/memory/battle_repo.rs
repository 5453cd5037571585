//! In-memory battle storage with a participant index.

use std::collections::HashMap;

use arena_domain::{Battle, BattleId, BattlePatch, UserId};
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::infrastructure::ports::{BattleRepo, RepoError};

#[derive(Default)]
struct BattleTable {
    battles: HashMap<BattleId, Battle>,
    by_participant: HashMap<UserId, Vec<BattleId>>,
}

/// Process-local battle store. Ended battles are kept as history.
#[derive(Default)]
pub struct InMemoryBattleRepo {
    table: RwLock<BattleTable>,
}

impl InMemoryBattleRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

fn domain_failure(operation: &'static str, err: arena_domain::DomainError) -> RepoError {
    RepoError::database(operation, err)
}

#[async_trait]
impl BattleRepo for InMemoryBattleRepo {
    async fn create(&self, battle: &Battle) -> Result<(), RepoError> {
        let mut table = self.table.write().await;
        if table.battles.contains_key(&battle.id()) {
            return Err(RepoError::constraint(format!(
                "battle {} already exists",
                battle.id()
            )));
        }
        for user_id in battle.participants() {
            table
                .by_participant
                .entry(user_id)
                .or_default()
                .push(battle.id());
        }
        table.battles.insert(battle.id(), battle.clone());
        Ok(())
    }

    async fn get(&self, id: BattleId) -> Result<Option<Battle>, RepoError> {
        Ok(self.table.read().await.battles.get(&id).cloned())
    }

    async fn delete(&self, id: BattleId) -> Result<(), RepoError> {
        let mut table = self.table.write().await;
        if let Some(battle) = table.battles.remove(&id) {
            for user_id in battle.participants() {
                if let Some(ids) = table.by_participant.get_mut(&user_id) {
                    ids.retain(|b| *b != id);
                }
            }
        }
        Ok(())
    }

    async fn patch(&self, id: BattleId, patch: BattlePatch) -> Result<(), RepoError> {
        let mut table = self.table.write().await;
        let battle = table
            .battles
            .get_mut(&id)
            .ok_or_else(|| RepoError::not_found("Battle", id))?;
        battle
            .apply_patch(patch)
            .map_err(|e| domain_failure("patch_battle", e))
    }

    async fn append_log(&self, id: BattleId, line: &str) -> Result<(), RepoError> {
        let mut table = self.table.write().await;
        let battle = table
            .battles
            .get_mut(&id)
            .ok_or_else(|| RepoError::not_found("Battle", id))?;
        battle.append_log(line);
        Ok(())
    }

    async fn end_battle(&self, id: BattleId, winner_id: UserId) -> Result<(), RepoError> {
        let mut table = self.table.write().await;
        let battle = table
            .battles
            .get_mut(&id)
            .ok_or_else(|| RepoError::not_found("Battle", id))?;
        battle
            .end(winner_id)
            .map_err(|e| domain_failure("end_battle", e))
    }

    async fn find_by_participant(&self, user_id: UserId) -> Result<Vec<Battle>, RepoError> {
        let table = self.table.read().await;
        let mut battles: Vec<Battle> = table
            .by_participant
            .get(&user_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| table.battles.get(id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        battles.sort_by_key(|b| std::cmp::Reverse(b.created_at()));
        Ok(battles)
    }

    async fn list_active(&self) -> Result<Vec<Battle>, RepoError> {
        let table = self.table.read().await;
        Ok(table
            .battles
            .values()
            .filter(|b| !b.is_ended())
            .cloned()
            .collect())
    }
}
