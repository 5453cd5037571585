//! WebSocket message types for engine-client communication
//!
//! Every frame is a JSON object whose `type` field names the message
//! (`queue.join`, `battle.turn`, ...). Payload fields are snake_case.
//!
//! ## Versioning Policy
//!
//! - New variants can be added at the end (forward compatible)
//! - Renaming a `type` string is a breaking change
//! - Unknown client message types deserialize to `ClientMessage::Unknown`

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// =============================================================================
// Client Messages (client -> engine)
// =============================================================================

/// The only attack kind today; kept explicit so new kinds stay wire compatible.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BattleActionKind {
    #[default]
    Attack,
}

/// Messages from a client to the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Enter the matchmaking queue
    #[serde(rename = "queue.join")]
    QueueJoin,
    /// Leave the matchmaking queue
    #[serde(rename = "queue.leave")]
    QueueLeave,
    /// The client has entered the battle view
    #[serde(rename = "battle.ready")]
    BattleReady { battle_id: Uuid },
    /// Submit one attack; `request_id` makes retransmissions harmless
    #[serde(rename = "battle.action")]
    BattleAction {
        request_id: String,
        #[serde(default)]
        action: BattleActionKind,
    },
    /// Keep-alive
    #[serde(rename = "heartbeat")]
    Heartbeat,
    /// Any message type this engine does not know
    #[serde(other)]
    Unknown,
}

// =============================================================================
// Shared payload types
// =============================================================================

/// Public view of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub nickname: String,
    pub level: u32,
}

/// What a matched player learns about their opponent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpponentSummary {
    pub id: Uuid,
    pub nickname: String,
    pub level: u32,
    pub hp: u32,
    pub max_hp: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FighterData {
    pub user_id: Uuid,
    pub hp: u32,
    pub max_hp: u32,
    pub level: u32,
}

/// Authoritative state of a live battle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BattleSnapshotData {
    pub battle_id: Uuid,
    pub player1: FighterData,
    pub player2: FighterData,
    pub current_turn_owner: Uuid,
    pub turn_count: u32,
}

/// Level of one participant after a battle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelChange {
    pub user_id: Uuid,
    pub level: u32,
}

/// Why a battle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BattleEndReason {
    /// Lethal hit
    Ko,
    /// Turn owner did not act in time
    AfkTimeout,
    /// A participant's connection was lost
    Disconnect,
    /// The ready handshake did not complete
    SetupTimeout,
}

// =============================================================================
// Error Codes
// =============================================================================

/// Error classification codes sent in `ServerMessage::Error`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Connection presented no bearer token
    NoToken,
    /// Bearer token was not recognised
    InvalidToken,
    AlreadyInBattle,
    UserNotFound,
    BattleActionFailed,
    MatchJoinFailed,
    MatchSetupFailed,
    /// Frame was not a valid client message
    ParseError,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NoToken => "NO_TOKEN",
            ErrorCode::InvalidToken => "INVALID_TOKEN",
            ErrorCode::AlreadyInBattle => "ALREADY_IN_BATTLE",
            ErrorCode::UserNotFound => "USER_NOT_FOUND",
            ErrorCode::BattleActionFailed => "BATTLE_ACTION_FAILED",
            ErrorCode::MatchJoinFailed => "MATCH_JOIN_FAILED",
            ErrorCode::MatchSetupFailed => "MATCH_SETUP_FAILED",
            ErrorCode::ParseError => "PARSE_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Server Messages (engine -> client)
// =============================================================================

/// Messages from the engine to a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Sent once after authentication succeeds
    #[serde(rename = "connected")]
    Connected { user: UserSummary, timestamp: String },

    // === Queue ===
    #[serde(rename = "queue.position")]
    QueuePosition { position: usize, queue_length: usize },
    #[serde(rename = "queue.left")]
    QueueLeft,
    /// Waited too long without a match; the user is no longer queued
    #[serde(rename = "queue.timeout")]
    QueueTimeout { reason: String },
    #[serde(rename = "match.found")]
    MatchFound {
        battle_id: Uuid,
        opponent: OpponentSummary,
    },

    // === Battle ===
    /// Both clients are ready; turns may start
    #[serde(rename = "battle.begin")]
    BattleBegin {
        battle_id: Uuid,
        snapshot: BattleSnapshotData,
    },
    #[serde(rename = "battle.turn")]
    BattleTurn {
        battle_id: Uuid,
        damage: u32,
        crit: bool,
        resulting_hp: u32,
        log_line: String,
        acting_player: Uuid,
        next_player: Uuid,
    },
    #[serde(rename = "battle.end")]
    BattleEnd {
        battle_id: Uuid,
        winner_id: Uuid,
        new_levels: Vec<LevelChange>,
        reason: BattleEndReason,
    },
    /// The ready handshake expired; both clients are back in the lobby
    #[serde(rename = "battle.setup-timeout")]
    BattleSetupTimeout {
        battle_id: Uuid,
        reason: String,
        ready_count: usize,
        expected_count: usize,
    },
    /// Sent to a reconnecting client that still has a live battle
    #[serde(rename = "battle.resume")]
    BattleResume {
        battle_id: Uuid,
        snapshot: BattleSnapshotData,
    },

    // === Session ===
    /// This connection was superseded by a newer one for the same user
    #[serde(rename = "session.replaced")]
    SessionReplaced { message: String },

    #[serde(rename = "error")]
    Error { code: ErrorCode, message: String },

    #[serde(rename = "pong")]
    Pong,
}

impl ServerMessage {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }
}
