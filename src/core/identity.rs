//! Caller Identity
//!
//! Identities are resolved externally (see `network::auth`) and only
//! referenced by hub entities, never owned by them.

use std::fmt;
use serde::{Deserialize, Serialize};

/// Label used when neither a display name nor a username is known.
pub const DEFAULT_DISPLAY_NAME: &str = "Player";

// =============================================================================
// USER ID
// =============================================================================

/// Numeric user identifier issued by the account service.
///
/// Zero is never a valid user; inbound frames use it to mean "absent".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl UserId {
    /// Wrap a raw id.
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Raw numeric value.
    pub const fn get(self) -> i64 {
        self.0
    }

    /// True for the zero placeholder sent by clients that omit the field.
    pub const fn is_unset(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// IDENTITY
// =============================================================================

/// A resolved caller: user id plus the label other users see.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    /// Account identifier.
    pub user_id: UserId,
    /// Human-readable label.
    pub display_name: String,
}

impl Identity {
    /// Create an identity with an explicit label.
    pub fn new(user_id: UserId, display_name: impl Into<String>) -> Self {
        Self {
            user_id,
            display_name: display_name.into(),
        }
    }

    /// Pick the best available label: display name, then username, then
    /// [`DEFAULT_DISPLAY_NAME`]. Blank values count as missing.
    pub fn from_names(user_id: UserId, display_name: Option<&str>, username: Option<&str>) -> Self {
        let label = [display_name, username]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|name| !name.is_empty())
            .unwrap_or(DEFAULT_DISPLAY_NAME);

        Self::new(user_id, label)
    }
}
