use std::sync::Arc;

use arena_domain::{BattleSnapshot, ConnectionId, User, UserId};

use crate::infrastructure::ports::{RepoError, UserRepo};
use crate::stores::SessionRegistry;
use crate::use_cases::battle::{BattleEndOutcome, BattleEngine, BattleError};
use crate::use_cases::handshake::ReadyCoordinator;
use crate::use_cases::matchmaking::Matchmaking;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("User not found: {0}")]
    UserNotFound(UserId),
    #[error("Repository error: {0}")]
    Repo(#[from] RepoError),
    #[error("Battle error: {0}")]
    Battle(#[from] BattleError),
}

#[derive(Debug, Clone)]
pub struct ConnectOutcome {
    pub user: User,
    /// Older connection of the same user; the caller must notify and close it
    pub evicted: Option<ConnectionId>,
    /// Live battle to resume on the new connection
    pub resume: Option<BattleSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectOutcome {
    /// A newer connection owns the user; nothing was cleaned up
    Superseded,
    Cleaned {
        left_queue: bool,
        forfeited: Option<BattleEndOutcome>,
    },
}

pub struct SessionLifecycle {
    users: Arc<dyn UserRepo>,
    sessions: Arc<SessionRegistry>,
    matchmaking: Arc<Matchmaking>,
    battles: Arc<BattleEngine>,
    handshake: Arc<ReadyCoordinator>,
}

impl SessionLifecycle {
    pub fn new(
        users: Arc<dyn UserRepo>,
        sessions: Arc<SessionRegistry>,
        matchmaking: Arc<Matchmaking>,
        battles: Arc<BattleEngine>,
        handshake: Arc<ReadyCoordinator>,
    ) -> Self {
        Self {
            users,
            sessions,
            matchmaking,
            battles,
            handshake,
        }
    }

    /// Bind an authenticated connection to its user.
    pub async fn connect(
        &self,
        user_id: UserId,
        connection_id: ConnectionId,
    ) -> Result<ConnectOutcome, SessionError> {
        let mut user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(SessionError::UserNotFound(user_id))?;

        let evicted = self.sessions.bind(user_id, connection_id);
        self.users
            .set_connection(user_id, Some(connection_id))
            .await?;
        user.set_connection(Some(connection_id));

        let resume = self.battles.find_active_battle_for(user_id).await?;
        if let Some(snapshot) = &resume {
            tracing::info!(
                user_id = %user_id,
                battle_id = %snapshot.battle_id,
                "Reconnected into live battle"
            );
        }

        Ok(ConnectOutcome {
            user,
            evicted,
            resume,
        })
    }

    /// Clean up after a closed connection.
    ///
    /// A connection that was superseded by a newer one for the same user
    /// leaves the user's queue entry and battle alone.
    pub async fn disconnect(
        &self,
        user_id: UserId,
        connection_id: ConnectionId,
    ) -> Result<DisconnectOutcome, SessionError> {
        if !self.sessions.unbind(user_id, connection_id) {
            tracing::debug!(
                user_id = %user_id,
                connection_id = %connection_id,
                "Superseded connection closed"
            );
            return Ok(DisconnectOutcome::Superseded);
        }

        if self.sessions.lookup(user_id).is_none() {
            self.users.set_connection(user_id, None).await?;
        }

        let left_queue = self.matchmaking.leave_queue(user_id).await;
        let forfeited = self.battles.forfeit(user_id).await?;
        if let Some(ended) = &forfeited {
            self.handshake.cancel(ended.battle_id);
        }

        tracing::info!(
            user_id = %user_id,
            connection_id = %connection_id,
            left_queue,
            forfeited = forfeited.is_some(),
            "Session cleaned up"
        );
        Ok(DisconnectOutcome::Cleaned {
            left_queue,
            forfeited,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::clock::{FixedClock, ScriptedRandom};
    use crate::infrastructure::memory::{InMemoryBattleRepo, InMemoryUserRepo};
    use crate::infrastructure::timers::TimerScheduler;
    use arena_domain::{EndReason, Nickname, RequestId};
    use chrono::Utc;
    use std::time::Duration;

    struct Harness {
        lifecycle: SessionLifecycle,
        users: Arc<InMemoryUserRepo>,
        matchmaking: Arc<Matchmaking>,
        battles: Arc<BattleEngine>,
        handshake: Arc<ReadyCoordinator>,
        random: Arc<ScriptedRandom>,
    }

    fn harness() -> Harness {
        let users = Arc::new(InMemoryUserRepo::new());
        let sessions = Arc::new(SessionRegistry::new());
        let random = Arc::new(ScriptedRandom::new([]));
        let clock = Arc::new(FixedClock(Utc::now()));
        let (timers, _fired) = TimerScheduler::channel();
        let battles = Arc::new(BattleEngine::new(
            users.clone(),
            Arc::new(InMemoryBattleRepo::new()),
            clock.clone(),
            random.clone(),
            timers.clone(),
            Duration::from_secs(60),
        ));
        let matchmaking = Arc::new(Matchmaking::new(
            users.clone(),
            sessions.clone(),
            battles.clone(),
            clock,
            random.clone(),
            timers.clone(),
            Duration::from_secs(60),
        ));
        let handshake = Arc::new(ReadyCoordinator::new(timers, Duration::from_secs(10)));
        let lifecycle = SessionLifecycle::new(
            users.clone(),
            sessions,
            matchmaking.clone(),
            battles.clone(),
            handshake.clone(),
        );
        Harness {
            lifecycle,
            users,
            matchmaking,
            battles,
            handshake,
            random,
        }
    }

    async fn seed(h: &Harness, name: &str) -> UserId {
        let user = User::new(Nickname::new(name).unwrap(), None, Utc::now());
        h.users.create(&user).await.unwrap();
        user.id()
    }

    /// Two connected users matched into a battle; player 1 moves first.
    async fn in_battle(h: &Harness) -> (UserId, ConnectionId, UserId, ConnectionId) {
        let (a, b) = (seed(h, "Ash").await, seed(h, "Gary").await);
        let (ca, cb) = (ConnectionId::new(), ConnectionId::new());
        h.lifecycle.connect(a, ca).await.unwrap();
        h.lifecycle.connect(b, cb).await.unwrap();
        h.matchmaking.join_queue(a).await.unwrap();
        h.matchmaking.join_queue(b).await.unwrap();
        h.random.push([0]);
        let formed = h.matchmaking.try_form_match().await.unwrap().unwrap();
        h.handshake
            .open(formed.battle.id(), [formed.player1.id(), formed.player2.id()]);
        (a, ca, b, cb)
    }

    #[tokio::test]
    async fn connect_marks_user_online() {
        let h = harness();
        let a = seed(&h, "Ash").await;
        let conn = ConnectionId::new();

        let outcome = h.lifecycle.connect(a, conn).await.unwrap();
        assert_eq!(outcome.evicted, None);
        assert!(outcome.resume.is_none());
        assert_eq!(outcome.user.connection_id(), Some(conn));
        assert_eq!(
            h.users.find_by_id(a).await.unwrap().unwrap().connection_id(),
            Some(conn)
        );
    }

    #[tokio::test]
    async fn unknown_user_cannot_connect() {
        let h = harness();
        let err = h
            .lifecycle
            .connect(UserId::new(), ConnectionId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::UserNotFound(_)));
    }

    #[tokio::test]
    async fn replacement_connection_resumes_the_battle() {
        let h = harness();
        let (a, old_conn, b, _) = in_battle(&h).await;

        h.random.push([20, 100]);
        let battle_id = h.battles.active_battle_id(a).await.unwrap().unwrap();
        h.battles
            .process_action(battle_id, a, RequestId::new("r1").unwrap())
            .await
            .unwrap()
            .unwrap();
        let before = h.battles.snapshot(battle_id).await.unwrap().unwrap();

        let new_conn = ConnectionId::new();
        let outcome = h.lifecycle.connect(a, new_conn).await.unwrap();
        assert_eq!(outcome.evicted, Some(old_conn));
        assert_eq!(outcome.resume, Some(before));

        // The evicted socket closing afterwards must not end the battle.
        assert_eq!(
            h.lifecycle.disconnect(a, old_conn).await.unwrap(),
            DisconnectOutcome::Superseded
        );
        assert_eq!(h.battles.active_battle_id(a).await.unwrap(), Some(battle_id));

        // The new connection keeps playing: it is Gary's turn, then Ash's.
        h.random.push([10, 100, 10, 100]);
        assert!(h
            .battles
            .process_action(battle_id, b, RequestId::new("g1").unwrap())
            .await
            .unwrap()
            .is_some());
        assert!(h
            .battles
            .process_action(battle_id, a, RequestId::new("r2").unwrap())
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn disconnect_forfeits_battle_to_opponent() {
        let h = harness();
        let (a, ca, b, _) = in_battle(&h).await;
        let battle_id = h.battles.active_battle_id(a).await.unwrap().unwrap();

        let outcome = h.lifecycle.disconnect(a, ca).await.unwrap();
        let DisconnectOutcome::Cleaned {
            left_queue,
            forfeited: Some(ended),
        } = outcome
        else {
            panic!("expected a forfeited battle");
        };
        assert!(!left_queue);
        assert_eq!(ended.battle_id, battle_id);
        assert_eq!(ended.winner_id, b);
        assert_eq!(ended.reason, EndReason::Disconnect);
        assert!(!h.handshake.is_pending(battle_id));

        let a_after = h.users.find_by_id(a).await.unwrap().unwrap();
        let b_after = h.users.find_by_id(b).await.unwrap().unwrap();
        assert!(!a_after.is_in_battle());
        assert!(!b_after.is_in_battle());
        assert_eq!(a_after.connection_id(), None);
    }

    #[tokio::test]
    async fn disconnect_leaves_the_queue() {
        let h = harness();
        let a = seed(&h, "Ash").await;
        let conn = ConnectionId::new();
        h.lifecycle.connect(a, conn).await.unwrap();
        h.matchmaking.join_queue(a).await.unwrap();

        assert_eq!(
            h.lifecycle.disconnect(a, conn).await.unwrap(),
            DisconnectOutcome::Cleaned {
                left_queue: true,
                forfeited: None
            }
        );
        assert!(!h.matchmaking.is_queued(a).await);
    }
}
