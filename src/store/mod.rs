//! Persisted Game Log
//!
//! Append-only, per-game ordered history of moves and chat. The relay reads it
//! in full when a client joins a game room (replay) and appends to it before
//! every live move/chat broadcast.
//!
//! Two implementations ship with the crate:
//! - [`MemoryLog`]: process-local, used when no database is configured and in tests
//! - [`SqliteLog`]: durable, backed by an sqlx SQLite pool

pub mod memory;
pub mod sqlite;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{GameId, UserId};

pub use memory::MemoryLog;
pub use sqlite::SqliteLog;

/// Insertion sequence assigned by the log. Strictly increasing per log.
pub type LogSeq = i64;

// =============================================================================
// RECORDS
// =============================================================================

/// Which of the two players made a move.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlayerSlot {
    /// First player, `"p1"` on the wire.
    #[serde(rename = "p1")]
    First,
    /// Second player, `"p2"` on the wire.
    #[serde(rename = "p2")]
    Second,
}

impl PlayerSlot {
    /// Wire and storage representation.
    pub fn as_str(self) -> &'static str {
        match self {
            PlayerSlot::First => "p1",
            PlayerSlot::Second => "p2",
        }
    }
}

impl fmt::Display for PlayerSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PlayerSlot {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "p1" => Ok(PlayerSlot::First),
            "p2" => Ok(PlayerSlot::Second),
            other => Err(LogError::Corrupt(format!("unknown player slot {other:?}"))),
        }
    }
}

/// A move to append.
#[derive(Debug, Clone, Copy)]
pub struct NewMove<'a> {
    /// Game the move belongs to.
    pub game_id: &'a GameId,
    /// Player who sent it.
    pub user_id: UserId,
    /// Board edge claimed.
    pub edge_id: &'a str,
    /// Side the move is played for.
    pub slot: PlayerSlot,
}

/// A chat line to append.
#[derive(Debug, Clone, Copy)]
pub struct NewChat<'a> {
    /// Game room the line was sent in.
    pub game_id: &'a GameId,
    /// Sender.
    pub user_id: UserId,
    /// Label shown next to the line.
    pub display_name: &'a str,
    /// Message body.
    pub text: &'a str,
    /// Relay-assigned send time (millisecond precision).
    pub sent_at: DateTime<Utc>,
}

/// A persisted move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveRecord {
    /// Insertion sequence.
    pub seq: LogSeq,
    /// Owning game.
    pub game_id: GameId,
    /// Player who sent it.
    pub user_id: UserId,
    /// Board edge claimed.
    pub edge_id: String,
    /// Side the move is played for.
    pub slot: PlayerSlot,
}

/// A persisted chat line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRecord {
    /// Insertion sequence.
    pub seq: LogSeq,
    /// Owning game.
    pub game_id: GameId,
    /// Sender.
    pub user_id: UserId,
    /// Label shown next to the line.
    pub display_name: String,
    /// Message body.
    pub text: String,
    /// Relay-assigned send time.
    pub sent_at: DateTime<Utc>,
}

/// Position of a live frame in the log it mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogCursor {
    /// Sequence of a persisted move.
    Move(LogSeq),
    /// Sequence of a persisted chat line.
    Chat(LogSeq),
}

// =============================================================================
// LOG INTERFACE
// =============================================================================

/// Append/query interface over the move and chat history.
///
/// Sessions are independent: no ordering is promised across games.
#[async_trait]
pub trait GameLog: Send + Sync {
    /// Append a move, returning its sequence.
    async fn append_move(&self, mv: NewMove<'_>) -> Result<LogSeq, LogError>;

    /// All moves of a game in insertion order.
    async fn list_moves(&self, game_id: &GameId) -> Result<Vec<MoveRecord>, LogError>;

    /// Append a chat line, returning its sequence.
    async fn append_chat(&self, chat: NewChat<'_>) -> Result<LogSeq, LogError>;

    /// All chat lines of a game ordered by `(sent_at, seq)`.
    async fn list_chat(&self, game_id: &GameId) -> Result<Vec<ChatRecord>, LogError>;
}

/// Log failures. Never fatal to the live path.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// Filesystem problem while opening the store.
    #[error("I/O error: {0}")]
    Io(String),

    /// Could not open or reach the database.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Schema migration failed.
    #[error("Migration error: {0}")]
    Migration(String),

    /// Statement failed.
    #[error("Query error: {0}")]
    Query(String),

    /// A stored row could not be decoded.
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for LogError {
    fn from(e: sqlx::Error) -> Self {
        LogError::Query(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_player_slot_wire_names() {
        assert_eq!(serde_json::to_string(&PlayerSlot::First).unwrap(), "\"p1\"");
        assert_eq!(serde_json::to_string(&PlayerSlot::Second).unwrap(), "\"p2\"");
        assert_eq!("p2".parse::<PlayerSlot>().unwrap(), PlayerSlot::Second);
        assert!(matches!("p3".parse::<PlayerSlot>(), Err(LogError::Corrupt(_))));
    }
}
