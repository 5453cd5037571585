//! Battle aggregate - the two-party turn state machine
//!
//! # Invariants
//!
//! - `player1_id != player2_id`
//! - State only moves forward: `Waiting -> Active -> Ended` or `Waiting -> Ended`
//! - `winner_id` is set iff the state is `Ended`, and names a participant
//! - The turn owner flips and `turn_count` grows by one on every completed action

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::ids::{BattleId, UserId};

/// Lifecycle state of a battle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BattleState {
    Waiting,
    Active,
    Ended,
}

impl BattleState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Ended)
    }
}

impl std::fmt::Display for BattleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Ended => "ended",
        };
        write!(f, "{}", s)
    }
}

/// Which side holds the turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnSlot {
    Player1,
    Player2,
}

impl TurnSlot {
    pub fn other(self) -> Self {
        match self {
            Self::Player1 => Self::Player2,
            Self::Player2 => Self::Player1,
        }
    }
}

/// Why a battle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EndReason {
    /// A hit brought the defender to zero hp
    Ko,
    /// The turn owner did not act within the action window
    AfkTimeout,
    /// A participant disconnected
    Disconnect,
    /// The ready handshake expired before both clients were ready
    SetupTimeout,
}

/// Persisted turn fields of a battle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BattlePatch {
    pub current_turn: TurnSlot,
    pub turn_count: u32,
}

/// One fighter as seen by a reconnecting client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FighterSnapshot {
    pub user_id: UserId,
    pub hp: u32,
    pub max_hp: u32,
    pub level: u32,
}

/// Read-only view of a live battle, enough to resume without replaying the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BattleSnapshot {
    pub battle_id: BattleId,
    pub player1: FighterSnapshot,
    pub player2: FighterSnapshot,
    pub current_turn_owner: UserId,
    pub turn_count: u32,
}

/// A two-party battle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Battle {
    id: BattleId,
    player1_id: UserId,
    player2_id: UserId,
    current_turn: TurnSlot,
    turn_count: u32,
    state: BattleState,
    winner_id: Option<UserId>,
    created_at: DateTime<Utc>,
    log: Vec<String>,
}

impl Battle {
    /// Create a battle in the `Waiting` state.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` when both players are the same user.
    pub fn new(
        id: BattleId,
        player1_id: UserId,
        player2_id: UserId,
        first_turn: TurnSlot,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        if player1_id == player2_id {
            return Err(DomainError::validation(
                "A battle needs two distinct players",
            ));
        }
        Ok(Self {
            id,
            player1_id,
            player2_id,
            current_turn: first_turn,
            turn_count: 0,
            state: BattleState::Waiting,
            winner_id: None,
            created_at: now,
            log: Vec::new(),
        })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn id(&self) -> BattleId {
        self.id
    }

    pub fn player1_id(&self) -> UserId {
        self.player1_id
    }

    pub fn player2_id(&self) -> UserId {
        self.player2_id
    }

    pub fn participants(&self) -> [UserId; 2] {
        [self.player1_id, self.player2_id]
    }

    pub fn current_turn(&self) -> TurnSlot {
        self.current_turn
    }

    pub fn turn_count(&self) -> u32 {
        self.turn_count
    }

    pub fn state(&self) -> BattleState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == BattleState::Active
    }

    pub fn is_ended(&self) -> bool {
        self.state == BattleState::Ended
    }

    pub fn winner_id(&self) -> Option<UserId> {
        self.winner_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn log(&self) -> &[String] {
        &self.log
    }

    pub fn is_participant(&self, user_id: UserId) -> bool {
        user_id == self.player1_id || user_id == self.player2_id
    }

    /// The user who may act next.
    pub fn current_turn_owner(&self) -> UserId {
        self.user_in(self.current_turn)
    }

    /// The other participant, or `None` for outsiders.
    pub fn opponent_of(&self, user_id: UserId) -> Option<UserId> {
        if user_id == self.player1_id {
            Some(self.player2_id)
        } else if user_id == self.player2_id {
            Some(self.player1_id)
        } else {
            None
        }
    }

    fn user_in(&self, slot: TurnSlot) -> UserId {
        match slot {
            TurnSlot::Player1 => self.player1_id,
            TurnSlot::Player2 => self.player2_id,
        }
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    pub fn activate(&mut self) -> Result<(), DomainError> {
        match self.state {
            BattleState::Waiting => {
                self.state = BattleState::Active;
                Ok(())
            }
            other => Err(DomainError::invalid_state_transition(format!(
                "{} -> active",
                other
            ))),
        }
    }

    /// Hand the turn to the other player after a completed action.
    pub fn advance_turn(&mut self) -> Result<(), DomainError> {
        if self.state != BattleState::Active {
            return Err(DomainError::invalid_state_transition(format!(
                "cannot advance turn while {}",
                self.state
            )));
        }
        self.current_turn = self.current_turn.other();
        self.turn_count += 1;
        Ok(())
    }

    /// Terminate the battle with a winner. Only possible once.
    pub fn end(&mut self, winner_id: UserId) -> Result<(), DomainError> {
        if self.state == BattleState::Ended {
            return Err(DomainError::invalid_state_transition("ended -> ended"));
        }
        if !self.is_participant(winner_id) {
            return Err(DomainError::constraint(format!(
                "winner {} is not a participant of battle {}",
                winner_id, self.id
            )));
        }
        self.state = BattleState::Ended;
        self.winner_id = Some(winner_id);
        Ok(())
    }

    pub fn append_log(&mut self, line: impl Into<String>) {
        self.log.push(line.into());
    }

    pub fn turn_patch(&self) -> BattlePatch {
        BattlePatch {
            current_turn: self.current_turn,
            turn_count: self.turn_count,
        }
    }

    /// Overwrite the persisted turn fields. Rejected once the battle has ended.
    pub fn apply_patch(&mut self, patch: BattlePatch) -> Result<(), DomainError> {
        if self.state == BattleState::Ended {
            return Err(DomainError::invalid_state_transition(
                "cannot patch an ended battle",
            ));
        }
        self.current_turn = patch.current_turn;
        self.turn_count = patch.turn_count;
        Ok(())
    }
}
