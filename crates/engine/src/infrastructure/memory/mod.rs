//! In-memory storage adapters (the only `STORAGE_DRIVER` shipped today).

mod battle_repo;
mod user_repo;

pub use battle_repo::InMemoryBattleRepo;
pub use user_repo::InMemoryUserRepo;
