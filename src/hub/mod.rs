//! Hubs
//!
//! Fan-out rooms for the lobby and for games. Each hub is one task that owns
//! its rooms outright; everything else talks to it through a cloneable
//! handle that enqueues commands.
//!
//! Members hang off a room as [`ConnectionHandle`]s: a bounded queue plus the
//! member's identity. Delivery never waits on a member. A queue that is full
//! or closed gets its member evicted on the spot, which drops the handle and
//! closes the queue for that member's writer.

pub mod game;
pub mod handle;
pub mod lobby;
pub mod presence;
pub(crate) mod room;

pub use game::GameHub;
pub use handle::{ConnectionHandle, ConnectionId, OutboundFrame};
pub use lobby::LobbyHub;
