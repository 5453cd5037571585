//! Application state and composition.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::infrastructure::{
    auth::GuestTokens,
    clock::{SystemClock, SystemRandom},
    config::{EngineConfig, StorageDriver},
    memory::{InMemoryBattleRepo, InMemoryUserRepo},
    ports::{BattleRepo, ClockPort, RandomPort, RepoError, TokenVerifier, UserRepo},
    timers::{TimerFired, TimerKind, TimerScheduler},
};
use crate::stores::SessionRegistry;
use crate::use_cases::{
    battle::BattleError, BattleEngine, GuestLogin, Matchmaking, ReadyCoordinator,
    SessionLifecycle,
};

/// Main application state.
///
/// Holds the repositories, the use cases and the process-wide stores.
/// Passed to HTTP/WebSocket handlers via Axum state.
pub struct App {
    pub config: EngineConfig,
    pub repositories: Repositories,
    pub use_cases: UseCases,
    pub sessions: Arc<SessionRegistry>,
    pub auth: Arc<dyn TokenVerifier>,
    pub clock: Arc<dyn ClockPort>,
    pub timers: Arc<TimerScheduler>,
}

/// Storage ports.
pub struct Repositories {
    pub user: Arc<dyn UserRepo>,
    pub battle: Arc<dyn BattleRepo>,
}

/// Container for all use cases.
pub struct UseCases {
    pub matchmaking: Arc<Matchmaking>,
    pub battle: Arc<BattleEngine>,
    pub handshake: Arc<ReadyCoordinator>,
    pub session: Arc<SessionLifecycle>,
    pub guest_login: Arc<GuestLogin>,
}

/// Process counters reported by the health endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineStats {
    pub timestamp: DateTime<Utc>,
    pub online_users: usize,
    pub active_sessions: usize,
    pub queue_length: usize,
    pub average_wait_seconds: f64,
    pub queue_timeouts: usize,
    pub active_battles: usize,
    pub action_timeouts: usize,
    pub tracked_idempotency_sets: usize,
    pub pending_handshakes: usize,
    pub handshake_timeouts: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum StatsError {
    #[error("Repository error: {0}")]
    Repo(#[from] RepoError),
    #[error("Battle error: {0}")]
    Battle(#[from] BattleError),
}

impl App {
    /// Create a new App with all dependencies wired up.
    pub fn new(
        config: EngineConfig,
        user_repo: Arc<dyn UserRepo>,
        battle_repo: Arc<dyn BattleRepo>,
        clock: Arc<dyn ClockPort>,
        random: Arc<dyn RandomPort>,
        timers: Arc<TimerScheduler>,
    ) -> Self {
        let sessions = Arc::new(SessionRegistry::new());
        let tokens = Arc::new(GuestTokens::new(random.clone()));

        let battle = Arc::new(BattleEngine::new(
            user_repo.clone(),
            battle_repo.clone(),
            clock.clone(),
            random.clone(),
            timers.clone(),
            config.battle_timeout,
        ));
        let matchmaking = Arc::new(Matchmaking::new(
            user_repo.clone(),
            sessions.clone(),
            battle.clone(),
            clock.clone(),
            random.clone(),
            timers.clone(),
            config.match_timeout,
        ));
        let handshake = Arc::new(ReadyCoordinator::new(timers.clone(), config.ready_timeout));
        let session = Arc::new(SessionLifecycle::new(
            user_repo.clone(),
            sessions.clone(),
            matchmaking.clone(),
            battle.clone(),
            handshake.clone(),
        ));
        let guest_login = Arc::new(GuestLogin::new(
            user_repo.clone(),
            tokens.clone(),
            clock.clone(),
            random,
        ));

        Self {
            config,
            repositories: Repositories {
                user: user_repo,
                battle: battle_repo,
            },
            use_cases: UseCases {
                matchmaking,
                battle,
                handshake,
                session,
                guest_login,
            },
            sessions,
            auth: tokens,
            clock,
            timers,
        }
    }

    /// Build the app on the configured storage driver with the system clock
    /// and RNG. Returns the receiving end of the timer channel for the dispatcher.
    pub fn from_config(config: EngineConfig) -> (Self, mpsc::UnboundedReceiver<TimerFired>) {
        let (user_repo, battle_repo): (Arc<dyn UserRepo>, Arc<dyn BattleRepo>) =
            match config.storage_driver {
                StorageDriver::Memory => (
                    Arc::new(InMemoryUserRepo::new()),
                    Arc::new(InMemoryBattleRepo::new()),
                ),
            };
        let (timers, fired) = TimerScheduler::channel();
        let app = Self::new(
            config,
            user_repo,
            battle_repo,
            Arc::new(SystemClock::new()),
            Arc::new(SystemRandom::new()),
            timers,
        );
        (app, fired)
    }

    pub async fn stats(&self) -> Result<EngineStats, StatsError> {
        let online_users = self.repositories.user.list_online().await?.len();
        let queue = self.use_cases.matchmaking.stats().await;
        let battles = self.use_cases.battle.stats().await?;

        Ok(EngineStats {
            timestamp: self.clock.now(),
            online_users,
            active_sessions: self.sessions.len(),
            queue_length: queue.length,
            average_wait_seconds: queue.average_wait_seconds,
            queue_timeouts: queue.armed_timeouts,
            active_battles: battles.active_battles,
            action_timeouts: battles.armed_timeouts,
            tracked_idempotency_sets: battles.tracked_idempotency_sets,
            pending_handshakes: self.use_cases.handshake.pending_count(),
            handshake_timeouts: self.timers.armed_count(TimerKind::ReadyHandshake),
        })
    }
}
