//! In-memory game log.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ChatRecord, GameLog, LogError, LogSeq, MoveRecord, NewChat, NewMove};
use crate::core::GameId;

#[derive(Default)]
struct MemoryState {
    last_seq: LogSeq,
    moves: BTreeMap<GameId, Vec<MoveRecord>>,
    chat: BTreeMap<GameId, Vec<ChatRecord>>,
}

impl MemoryState {
    fn next_seq(&mut self) -> LogSeq {
        self.last_seq += 1;
        self.last_seq
    }
}

/// Process-local log. History is lost on restart.
#[derive(Default)]
pub struct MemoryLog {
    state: RwLock<MemoryState>,
}

impl MemoryLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GameLog for MemoryLog {
    async fn append_move(&self, mv: NewMove<'_>) -> Result<LogSeq, LogError> {
        let mut state = self.state.write().await;
        let seq = state.next_seq();
        state.moves.entry(mv.game_id.clone()).or_default().push(MoveRecord {
            seq,
            game_id: mv.game_id.clone(),
            user_id: mv.user_id,
            edge_id: mv.edge_id.to_string(),
            slot: mv.slot,
        });
        Ok(seq)
    }

    async fn list_moves(&self, game_id: &GameId) -> Result<Vec<MoveRecord>, LogError> {
        let state = self.state.read().await;
        Ok(state.moves.get(game_id).cloned().unwrap_or_default())
    }

    async fn append_chat(&self, chat: NewChat<'_>) -> Result<LogSeq, LogError> {
        let mut state = self.state.write().await;
        let seq = state.next_seq();
        state.chat.entry(chat.game_id.clone()).or_default().push(ChatRecord {
            seq,
            game_id: chat.game_id.clone(),
            user_id: chat.user_id,
            display_name: chat.display_name.to_string(),
            text: chat.text.to_string(),
            sent_at: chat.sent_at,
        });
        Ok(seq)
    }

    async fn list_chat(&self, game_id: &GameId) -> Result<Vec<ChatRecord>, LogError> {
        let state = self.state.read().await;
        let mut lines = state.chat.get(game_id).cloned().unwrap_or_default();
        lines.sort_by_key(|line| (line.sent_at, line.seq));
        Ok(lines)
    }
}
