//! # Dotbox Relay
//!
//! Real-time relay for a two-player dots-and-boxes game: a lobby with
//! presence, chat and challenges, plus game rooms that relay moves and chat
//! and replay the stored history to anyone who joins.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       DOTBOX RELAY                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Shared value types                        │
//! │  ├── identity.rs - User ids and display labels               │
//! │  ├── game_id.rs  - Opaque game identifiers                   │
//! │  └── time.rs     - Millisecond timestamps                    │
//! │                                                              │
//! │  hub/            - Room fan-out (one task per hub)           │
//! │  ├── handle.rs   - Per-connection outbound queues            │
//! │  ├── room.rs     - Membership and non-blocking broadcast     │
//! │  ├── presence.rs - Lobby presence snapshots                  │
//! │  ├── lobby.rs    - The lobby hub                             │
//! │  └── game.rs     - Game room hub                             │
//! │                                                              │
//! │  store/          - Persisted move and chat log               │
//! │  ├── memory.rs   - In-process log                            │
//! │  └── sqlite.rs   - SQLite log (sqlx)                         │
//! │                                                              │
//! │  network/        - WebSocket surface                         │
//! │  ├── server.rs   - Listener and handshake admission          │
//! │  ├── client.rs   - Per-connection reader/writer and replay   │
//! │  ├── protocol.rs - JSON message types                        │
//! │  ├── auth.rs     - JWT validation                            │
//! │  └── session.rs  - Game pairings                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Delivery Guarantees
//!
//! - A hub never waits on a client: a full outbound queue evicts that client
//! - Every member of a room sees broadcasts in the order the hub applied them
//! - A game joiner receives stored moves, then stored chat, then live traffic,
//!   with each persisted event delivered exactly once

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod hub;
pub mod network;
pub mod store;

// Re-export commonly used types
pub use crate::core::{GameId, Identity, UserId};
pub use hub::{GameHub, LobbyHub};
pub use network::{RelayServer, ServerConfig};
pub use store::{GameLog, MemoryLog, SqliteLog};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
