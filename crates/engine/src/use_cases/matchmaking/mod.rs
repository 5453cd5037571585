//! Matchmaking use cases.
//!
//! Owns the waiting list and turns pairs of eligible users into battles.
//! Joining, leaving and pair formation are serialized by one formation lock,
//! so a user is never matched into two battles.

mod queue;

pub use queue::{MatchQueue, QueueEntry};

use std::sync::Arc;
use std::time::Duration;

use arena_domain::{Battle, User, UserId};
use tokio::sync::Mutex;

use crate::infrastructure::ports::{ClockPort, RandomPort, RepoError, UserRepo};
use crate::infrastructure::timers::{TimerKey, TimerKind, TimerScheduler};
use crate::stores::SessionRegistry;
use crate::use_cases::battle::{BattleEngine, BattleError};

#[derive(Debug, thiserror::Error)]
pub enum MatchmakingError {
    #[error("User not found: {0}")]
    UserNotFound(UserId),
    #[error("User {0} is already in a battle")]
    AlreadyInBattle(UserId),
    #[error("Repository error: {0}")]
    Repo(#[from] RepoError),
    #[error("Battle setup failed: {0}")]
    Battle(#[from] BattleError),
}

/// Where a user landed in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueTicket {
    pub position: usize,
    pub queue_length: usize,
}

/// Two users removed from the queue and placed into a fresh battle.
#[derive(Debug, Clone)]
pub struct FormedMatch {
    pub battle: Battle,
    pub player1: User,
    pub player2: User,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueueStats {
    pub length: usize,
    pub average_wait_seconds: f64,
    pub armed_timeouts: usize,
}

pub struct Matchmaking {
    users: Arc<dyn UserRepo>,
    sessions: Arc<SessionRegistry>,
    battles: Arc<BattleEngine>,
    clock: Arc<dyn ClockPort>,
    random: Arc<dyn RandomPort>,
    timers: Arc<TimerScheduler>,
    queue: Mutex<MatchQueue>,
    formation: Mutex<()>,
    queue_timeout: Duration,
}

impl Matchmaking {
    pub fn new(
        users: Arc<dyn UserRepo>,
        sessions: Arc<SessionRegistry>,
        battles: Arc<BattleEngine>,
        clock: Arc<dyn ClockPort>,
        random: Arc<dyn RandomPort>,
        timers: Arc<TimerScheduler>,
        queue_timeout: Duration,
    ) -> Self {
        Self {
            users,
            sessions,
            battles,
            clock,
            random,
            timers,
            queue: Mutex::new(MatchQueue::new()),
            formation: Mutex::new(()),
            queue_timeout,
        }
    }

    /// Enqueue a user (rejoining resets the position) and arm the queue timeout.
    pub async fn join_queue(&self, user_id: UserId) -> Result<QueueTicket, MatchmakingError> {
        let _formation = self.formation.lock().await;

        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .ok_or(MatchmakingError::UserNotFound(user_id))?;
        if user.is_in_battle() {
            return Err(MatchmakingError::AlreadyInBattle(user_id));
        }

        let ticket = {
            let mut queue = self.queue.lock().await;
            let position = queue.join(user_id, self.clock.now());
            QueueTicket {
                position,
                queue_length: queue.len(),
            }
        };
        self.timers
            .arm(TimerKey::QueueWait(user_id), self.queue_timeout);

        tracing::info!(
            user_id = %user_id,
            position = ticket.position,
            queue_length = ticket.queue_length,
            "User joined queue"
        );
        Ok(ticket)
    }

    /// Remove a user from the queue. Returns whether they were queued.
    pub async fn leave_queue(&self, user_id: UserId) -> bool {
        let _formation = self.formation.lock().await;
        let removed = self.queue.lock().await.leave(user_id);
        self.timers.cancel(&TimerKey::QueueWait(user_id));
        if removed {
            tracing::info!(user_id = %user_id, "User left queue");
        }
        removed
    }

    /// The user's queue-wait timer fired. Returns whether they were removed.
    pub async fn handle_queue_timeout(&self, user_id: UserId, generation: u64) -> bool {
        let _formation = self.formation.lock().await;
        if !self.timers.claim(&TimerKey::QueueWait(user_id), generation) {
            tracing::debug!(user_id = %user_id, generation, "Stale queue timeout ignored");
            return false;
        }
        let removed = self.queue.lock().await.leave(user_id);
        if removed {
            tracing::info!(user_id = %user_id, "Queue wait timed out");
        }
        removed
    }

    /// Form at most one battle from the head of the queue.
    ///
    /// Candidates that no longer exist, are already in a battle, or have no
    /// live connection are evicted and the search continues. A valid partner
    /// of an evicted candidate keeps its place. If the battle cannot be
    /// created, both users go back to their old places with fresh wait timers.
    pub async fn try_form_match(&self) -> Result<Option<FormedMatch>, MatchmakingError> {
        let _formation = self.formation.lock().await;

        loop {
            let selected = self.queue.lock().await.select_pair(self.random.as_ref());
            let Some([first_id, second_id]) = selected else {
                return Ok(None);
            };

            let first = self.eligible(first_id).await?;
            let second = self.eligible(second_id).await?;

            let (player1, player2) = match (first, second) {
                (Some(p1), Some(p2)) => (p1, p2),
                (first, second) => {
                    let invalid: Vec<UserId> = [
                        first.is_none().then_some(first_id),
                        second.is_none().then_some(second_id),
                    ]
                    .into_iter()
                    .flatten()
                    .collect();
                    self.queue.lock().await.remove(&invalid);
                    for user_id in &invalid {
                        self.timers.cancel(&TimerKey::QueueWait(*user_id));
                        tracing::info!(user_id = %user_id, "Discarded stale queue candidate");
                    }
                    continue;
                }
            };

            let taken = self.queue.lock().await.take(&[first_id, second_id]);
            self.timers.cancel(&TimerKey::QueueWait(first_id));
            self.timers.cancel(&TimerKey::QueueWait(second_id));

            let battle = match self.battles.create_battle(&player1, &player2).await {
                Ok(battle) => battle,
                Err(e) => {
                    self.queue.lock().await.restore(taken);
                    for user_id in [first_id, second_id] {
                        self.timers
                            .arm(TimerKey::QueueWait(user_id), self.queue_timeout);
                    }
                    tracing::warn!(
                        player1_id = %first_id,
                        player2_id = %second_id,
                        error = %e,
                        "Battle creation failed, pair returned to the queue"
                    );
                    return Err(e.into());
                }
            };
            tracing::info!(
                battle_id = %battle.id(),
                player1_id = %first_id,
                player2_id = %second_id,
                "Match formed"
            );
            return Ok(Some(FormedMatch {
                battle,
                player1,
                player2,
            }));
        }
    }

    pub async fn is_queued(&self, user_id: UserId) -> bool {
        self.queue.lock().await.contains(user_id)
    }

    pub async fn stats(&self) -> QueueStats {
        let queue = self.queue.lock().await;
        QueueStats {
            length: queue.len(),
            average_wait_seconds: queue.average_wait_seconds(self.clock.now()),
            armed_timeouts: self.timers.armed_count(TimerKind::QueueWait),
        }
    }

    async fn eligible(&self, user_id: UserId) -> Result<Option<User>, MatchmakingError> {
        let Some(user) = self.users.find_by_id(user_id).await? else {
            return Ok(None);
        };
        if user.is_in_battle() || self.sessions.lookup(user_id).is_none() {
            return Ok(None);
        }
        Ok(Some(user))
    }
}
