//! Game Session Registry
//!
//! Remembers which two users were paired into each game. Entries are created
//! when a challenge is accepted and are never removed; the registry lives in
//! memory and is lost on restart.
//!
//! Backed by a concurrent map so the synchronous WebSocket handshake can ask
//! whether a user belongs to a game without going through a hub.

use dashmap::DashMap;
use tracing::info;

use crate::core::{GameId, UserId};

/// The pairing behind one game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    /// Game id shared with both players.
    pub game_id: GameId,
    /// Accepting user first, then the challenger.
    pub participants: [UserId; 2],
}

impl SessionRecord {
    /// Whether `user` is one of the two participants.
    pub fn includes(&self, user: UserId) -> bool {
        self.participants.contains(&user)
    }
}

/// Concurrent map of game id to pairing.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<GameId, SessionRecord>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a pairing. An existing entry for the same id is replaced.
    pub fn register(&self, game_id: GameId, first: UserId, second: UserId) -> SessionRecord {
        let record = SessionRecord {
            game_id: game_id.clone(),
            participants: [first, second],
        };
        if self.sessions.insert(game_id, record.clone()).is_some() {
            info!(game = %record.game_id, "Replaced existing session");
        }
        record
    }

    /// Whether `user` was paired into `game_id`. Unknown games answer false.
    pub fn is_participant(&self, game_id: &GameId, user: UserId) -> bool {
        self.sessions
            .get(game_id)
            .is_some_and(|record| record.includes(user))
    }

    /// Look up a pairing.
    pub fn get(&self, game_id: &GameId) -> Option<SessionRecord> {
        self.sessions.get(game_id).map(|record| record.clone())
    }

    /// Number of recorded games.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
