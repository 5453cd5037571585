//! Waiting list of users looking for an opponent.
//!
//! Pure data structure; the owning use case serializes access.

use arena_domain::UserId;
use chrono::{DateTime, Utc};

use crate::infrastructure::ports::RandomPort;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueEntry {
    pub user_id: UserId,
    pub joined_at: DateTime<Utc>,
}

/// FIFO queue with a random tie-break among simultaneous joiners.
///
/// A user appears at most once.
#[derive(Debug, Default)]
pub struct MatchQueue {
    entries: Vec<QueueEntry>,
}

impl MatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue `user_id` at `now`, resetting the position if already queued.
    ///
    /// Returns the 1-based position.
    pub fn join(&mut self, user_id: UserId, now: DateTime<Utc>) -> usize {
        self.entries.retain(|e| e.user_id != user_id);
        self.entries.push(QueueEntry {
            user_id,
            joined_at: now,
        });
        self.sort();
        self.position(user_id).unwrap_or(self.entries.len())
    }

    pub fn leave(&mut self, user_id: UserId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.user_id != user_id);
        self.entries.len() != before
    }

    /// Remove every listed user, queued or not.
    pub fn remove(&mut self, user_ids: &[UserId]) {
        self.entries.retain(|e| !user_ids.contains(&e.user_id));
    }

    /// Remove and return the entries of the listed users.
    pub fn take(&mut self, user_ids: &[UserId]) -> Vec<QueueEntry> {
        let (taken, kept) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|e| user_ids.contains(&e.user_id));
        self.entries = kept;
        taken
    }

    /// Put taken entries back at the place their join time gives them.
    pub fn restore(&mut self, entries: Vec<QueueEntry>) {
        for entry in entries {
            self.entries.retain(|e| e.user_id != entry.user_id);
            self.entries.push(entry);
        }
        self.sort();
    }

    pub fn contains(&self, user_id: UserId) -> bool {
        self.entries.iter().any(|e| e.user_id == user_id)
    }

    /// 1-based position in join order.
    pub fn position(&self, user_id: UserId) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.user_id == user_id)
            .map(|i| i + 1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Mean time spent waiting by the queued users, in seconds.
    pub fn average_wait_seconds(&self, now: DateTime<Utc>) -> f64 {
        if self.entries.is_empty() {
            return 0.0;
        }
        let total_ms: i64 = self
            .entries
            .iter()
            .map(|e| (now - e.joined_at).num_milliseconds().max(0))
            .sum();
        total_ms as f64 / self.entries.len() as f64 / 1000.0
    }

    /// Pick the next two candidates without removing them.
    ///
    /// Strict FIFO, except that when more than two users share the earliest
    /// join timestamp, two of them are picked uniformly at random.
    pub fn select_pair(&self, random: &dyn RandomPort) -> Option<[UserId; 2]> {
        if self.entries.len() < 2 {
            return None;
        }

        let earliest = self.entries[0].joined_at;
        let group: Vec<UserId> = self
            .entries
            .iter()
            .take_while(|e| e.joined_at == earliest)
            .map(|e| e.user_id)
            .collect();

        if group.len() > 2 {
            let mut pool = group;
            let first = pool.swap_remove(pick_index(random, pool.len()));
            let second = pool.swap_remove(pick_index(random, pool.len()));
            return Some([first, second]);
        }

        Some([self.entries[0].user_id, self.entries[1].user_id])
    }

    // Stable, so equal timestamps keep insertion order.
    fn sort(&mut self) {
        self.entries.sort_by_key(|e| e.joined_at);
    }
}

fn pick_index(random: &dyn RandomPort, len: usize) -> usize {
    let max = i32::try_from(len.saturating_sub(1)).unwrap_or(i32::MAX);
    usize::try_from(random.gen_range(0, max))
        .unwrap_or(0)
        .min(len.saturating_sub(1))
}
