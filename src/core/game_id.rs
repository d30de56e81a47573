//! Game Session Identifier

use std::fmt;
use serde::{Deserialize, Serialize};

/// Opaque identifier of a game session and of its room.
///
/// Minted as a UUID v4 string when a challenge is accepted, but any
/// non-empty string supplied by a client is accepted as-is.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameId(String);

impl GameId {
    /// Mint a fresh random id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Accept a client-supplied id. Returns `None` for blank input.
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.trim().is_empty() {
            None
        } else {
            Some(Self(raw.to_string()))
        }
    }

    /// Borrow the raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GameId {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl From<String> for GameId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique() {
        let a = GameId::generate();
        let b = GameId::generate();
        assert_ne!(a, b);
        assert!(uuid::Uuid::parse_str(a.as_str()).is_ok());
    }

    #[test]
    fn test_parse_rejects_blank() {
        assert!(GameId::parse("").is_none());
        assert!(GameId::parse("  ").is_none());
        assert_eq!(GameId::parse("S1"), Some(GameId::from("S1")));
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let json = serde_json::to_string(&GameId::from("S1")).unwrap();
        assert_eq!(json, "\"S1\"");
    }
}
