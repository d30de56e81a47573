//! Core value types shared by every layer.

pub mod game_id;
pub mod identity;
pub mod time;

// Re-export core types
pub use game_id::GameId;
pub use identity::{Identity, UserId, DEFAULT_DISPLAY_NAME};
pub use time::now_millis;
