//! Cancellable, re-armable timers.
//!
//! Every timeout in the engine (queue wait, battle action, ready handshake) is
//! armed here under a [`TimerKey`]. Arming a key replaces the previous timer for
//! that key and hands out a new generation. A timer that elapses does not call
//! back into the owning component; it emits [`TimerFired`] on a channel drained
//! by a single dispatcher task. The handler must [`TimerScheduler::claim`] the
//! generation before acting, which fails if the timer was re-armed or
//! cancelled in the meantime.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arena_domain::{BattleId, UserId};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// What a timer guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKey {
    /// A queued user waiting for a match
    QueueWait(UserId),
    /// The turn owner's window to act
    BattleAction(BattleId),
    /// The window for both clients to signal ready
    ReadyHandshake(BattleId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    QueueWait,
    BattleAction,
    ReadyHandshake,
}

impl TimerKey {
    pub fn kind(&self) -> TimerKind {
        match self {
            TimerKey::QueueWait(_) => TimerKind::QueueWait,
            TimerKey::BattleAction(_) => TimerKind::BattleAction,
            TimerKey::ReadyHandshake(_) => TimerKind::ReadyHandshake,
        }
    }
}

/// Emitted when an armed timer elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub key: TimerKey,
    pub generation: u64,
}

struct ArmedTimer {
    generation: u64,
    cancel: CancellationToken,
}

/// Owns every armed timer in the process.
pub struct TimerScheduler {
    armed: DashMap<TimerKey, ArmedTimer>,
    next_generation: AtomicU64,
    fired_tx: mpsc::UnboundedSender<TimerFired>,
}

impl TimerScheduler {
    /// Create a scheduler and the receiving end of its fired-timer channel.
    pub fn channel() -> (Arc<Self>, mpsc::UnboundedReceiver<TimerFired>) {
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        let scheduler = Arc::new(Self {
            armed: DashMap::new(),
            next_generation: AtomicU64::new(0),
            fired_tx,
        });
        (scheduler, fired_rx)
    }

    /// Arm (or re-arm) the timer for `key`. Returns the new generation.
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm(&self, key: TimerKey, after: Duration) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = CancellationToken::new();

        if let Some(previous) = self.armed.insert(
            key,
            ArmedTimer {
                generation,
                cancel: cancel.clone(),
            },
        ) {
            previous.cancel.cancel();
        }

        let fired_tx = self.fired_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(after) => {
                    if fired_tx.send(TimerFired { key, generation }).is_err() {
                        tracing::debug!(?key, "Timer fired after dispatcher shut down");
                    }
                }
            }
        });

        tracing::trace!(?key, generation, ?after, "Timer armed");
        generation
    }

    /// Cancel the timer for `key`. Returns whether one was armed.
    pub fn cancel(&self, key: &TimerKey) -> bool {
        match self.armed.remove(key) {
            Some((_, timer)) => {
                timer.cancel.cancel();
                tracing::trace!(?key, generation = timer.generation, "Timer cancelled");
                true
            }
            None => false,
        }
    }

    /// Take ownership of a fired timer.
    ///
    /// Succeeds only if `generation` is still the armed generation for `key`,
    /// and disarms it. A stale firing (re-armed or cancelled since) returns false.
    pub fn claim(&self, key: &TimerKey, generation: u64) -> bool {
        self.armed
            .remove_if(key, |_, timer| timer.generation == generation)
            .is_some()
    }

    pub fn is_armed(&self, key: &TimerKey) -> bool {
        self.armed.contains_key(key)
    }

    /// Number of armed timers of one kind.
    pub fn armed_count(&self, kind: TimerKind) -> usize {
        self.armed
            .iter()
            .filter(|entry| entry.key().kind() == kind)
            .count()
    }
}
