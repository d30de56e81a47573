//! SQLite-backed game log.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use tracing::info;

use super::{ChatRecord, GameLog, LogError, LogSeq, MoveRecord, NewChat, NewMove, PlayerSlot};
use crate::core::time::{from_millis, now_millis};
use crate::core::{GameId, UserId};

#[derive(sqlx::FromRow)]
struct MoveRow {
    id: i64,
    game_id: String,
    user_id: i64,
    edge_id: String,
    player_slot: String,
}

impl TryFrom<MoveRow> for MoveRecord {
    type Error = LogError;

    fn try_from(row: MoveRow) -> Result<Self, Self::Error> {
        Ok(MoveRecord {
            seq: row.id,
            game_id: GameId::from(row.game_id),
            user_id: UserId(row.user_id),
            edge_id: row.edge_id,
            slot: row.player_slot.parse::<PlayerSlot>()?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ChatRow {
    id: i64,
    game_id: String,
    user_id: i64,
    display_name: String,
    message: String,
    sent_at: i64,
}

impl TryFrom<ChatRow> for ChatRecord {
    type Error = LogError;

    fn try_from(row: ChatRow) -> Result<Self, Self::Error> {
        let sent_at = from_millis(row.sent_at)
            .ok_or_else(|| LogError::Corrupt(format!("chat {} has invalid timestamp {}", row.id, row.sent_at)))?;
        Ok(ChatRecord {
            seq: row.id,
            game_id: GameId::from(row.game_id),
            user_id: UserId(row.user_id),
            display_name: row.display_name,
            text: row.message,
            sent_at,
        })
    }
}

/// Durable log stored in a single SQLite file.
#[derive(Clone)]
pub struct SqliteLog {
    pool: Pool<Sqlite>,
}

impl SqliteLog {
    /// Open (creating if needed) the database at `path` and apply migrations.
    pub async fn open(path: &Path) -> Result<Self, LogError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LogError::Io(e.to_string()))?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))
            .map_err(|e| LogError::Connection(e.to_string()))?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| LogError::Connection(e.to_string()))?;

        info!(path = %path.display(), "Game log opened");

        let log = Self { pool };
        log.run_migrations().await?;
        Ok(log)
    }

    /// Private in-memory database, one connection so every query sees the same data.
    pub async fn open_in_memory() -> Result<Self, LogError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| LogError::Connection(e.to_string()))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| LogError::Connection(e.to_string()))?;

        let log = Self { pool };
        log.run_migrations().await?;
        Ok(log)
    }

    async fn run_migrations(&self) -> Result<(), LogError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| LogError::Migration(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl GameLog for SqliteLog {
    async fn append_move(&self, mv: NewMove<'_>) -> Result<LogSeq, LogError> {
        let result = sqlx::query(
            "INSERT INTO moves (game_id, user_id, edge_id, player_slot, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(mv.game_id.as_str())
        .bind(mv.user_id.get())
        .bind(mv.edge_id)
        .bind(mv.slot.as_str())
        .bind(now_millis().timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn list_moves(&self, game_id: &GameId) -> Result<Vec<MoveRecord>, LogError> {
        let rows = sqlx::query_as::<_, MoveRow>(
            "SELECT id, game_id, user_id, edge_id, player_slot FROM moves WHERE game_id = ? ORDER BY id ASC",
        )
        .bind(game_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(MoveRecord::try_from).collect()
    }

    async fn append_chat(&self, chat: NewChat<'_>) -> Result<LogSeq, LogError> {
        let result = sqlx::query(
            "INSERT INTO chat_messages (game_id, user_id, display_name, message, room_type, sent_at) VALUES (?, ?, ?, ?, 'game', ?)",
        )
        .bind(chat.game_id.as_str())
        .bind(chat.user_id.get())
        .bind(chat.display_name)
        .bind(chat.text)
        .bind(chat.sent_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn list_chat(&self, game_id: &GameId) -> Result<Vec<ChatRecord>, LogError> {
        let rows = sqlx::query_as::<_, ChatRow>(
            "SELECT id, game_id, user_id, display_name, message, sent_at FROM chat_messages \
             WHERE game_id = ? AND room_type = 'game' ORDER BY sent_at ASC, id ASC",
        )
        .bind(game_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(ChatRecord::try_from).collect()
    }
}
