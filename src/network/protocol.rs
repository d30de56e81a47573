//! Protocol Messages
//!
//! Wire format for lobby and game rooms over WebSocket. Every message is a
//! single JSON object whose `type` field selects the variant; field names
//! are camelCase.
//!
//! Inbound enums carry a catch-all `Unknown` arm so unrecognised tags decode
//! successfully and are ignored by the room, matching the relay's silent-drop
//! policy for anything it does not understand.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::core::{GameId, UserId};
use crate::store::{ChatRecord, MoveRecord, PlayerSlot};

// =============================================================================
// LOBBY
// =============================================================================

/// Messages a lobby member sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum LobbyInbound {
    /// Free-text lobby chat.
    Chat {
        #[serde(default, deserialize_with = "null_as_default")]
        text: String,
    },

    /// Offer a game to another user.
    Challenge {
        #[serde(default, deserialize_with = "null_as_default")]
        target_user_id: UserId,
    },

    /// Accept an offer received from `opponent_user_id`.
    ChallengeAccept {
        #[serde(default, deserialize_with = "null_as_default")]
        opponent_user_id: UserId,
    },

    /// Any tag the lobby does not handle.
    #[serde(other)]
    Unknown,
}

/// One entry of the presence list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyUser {
    /// Account id.
    pub user_id: UserId,
    /// Label to show.
    pub display_name: String,
}

/// Messages the lobby broadcasts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum LobbyOutbound {
    /// Full replacement list of who is online.
    Presence { users: Vec<LobbyUser> },

    /// A chat line.
    Chat {
        user_id: UserId,
        display_name: String,
        text: String,
        sent_at: DateTime<Utc>,
    },

    /// A challenge, visible to the whole lobby.
    ChallengeOffer {
        from_user_id: UserId,
        from_name: String,
        target_user_id: UserId,
    },

    /// A challenge was accepted and a game session created.
    StartGame {
        game_id: GameId,
        player_ids: [UserId; 2],
    },
}

/// Decode an explicit `null` the same as an absent field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

// =============================================================================
// GAME
// =============================================================================

/// Messages a game-room member sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum GameInbound {
    /// Claim an edge. Dropped unless both fields are present and valid.
    Move {
        #[serde(default, deserialize_with = "null_as_default")]
        edge_id: String,
        #[serde(default)]
        player_slot: Option<PlayerSlot>,
    },

    /// In-game chat with an optional client-chosen label.
    Chat {
        #[serde(default, deserialize_with = "null_as_default")]
        text: String,
        #[serde(default, deserialize_with = "null_as_default")]
        display_name: String,
    },

    /// Advisory end-of-game notice.
    EndGame {
        #[serde(default, deserialize_with = "null_as_default")]
        text: String,
    },

    /// Any tag the game room does not handle.
    #[serde(other)]
    Unknown,
}

/// Messages a game room broadcasts and replays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum GameOutbound {
    /// Canonical move, rebuilt from server-chosen fields only.
    Move {
        game_id: GameId,
        edge_id: String,
        player_slot: PlayerSlot,
    },

    /// Chat line.
    Chat {
        game_id: GameId,
        user_id: UserId,
        display_name: String,
        text: String,
        sent_at: DateTime<Utc>,
    },

    /// A player ended the game.
    EndGame { game_id: GameId, text: String },
}

impl From<&MoveRecord> for GameOutbound {
    fn from(record: &MoveRecord) -> Self {
        GameOutbound::Move {
            game_id: record.game_id.clone(),
            edge_id: record.edge_id.clone(),
            player_slot: record.slot,
        }
    }
}

impl From<&ChatRecord> for GameOutbound {
    fn from(record: &ChatRecord) -> Self {
        GameOutbound::Chat {
            game_id: record.game_id.clone(),
            user_id: record.user_id,
            display_name: record.display_name.clone(),
            text: record.text.clone(),
            sent_at: record.sent_at,
        }
    }
}

// =============================================================================
// ERRORS
// =============================================================================

/// Why an inbound frame was discarded.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Not valid JSON, or a field had the wrong type or value.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Binary frames are not part of the protocol.
    #[error("binary frames are not supported")]
    Binary,
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

macro_rules! json_codec {
    ($($ty:ty),*) => {$(
        impl $ty {
            /// Serialize to JSON string.
            pub fn to_json(&self) -> Result<String, serde_json::Error> {
                serde_json::to_string(self)
            }

            /// Deserialize from JSON string.
            pub fn from_json(s: &str) -> Result<Self, ProtocolError> {
                Ok(serde_json::from_str(s)?)
            }
        }
    )*};
}

json_codec!(LobbyInbound, LobbyOutbound, GameInbound, GameOutbound);
