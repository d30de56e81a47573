//! Network Layer
//!
//! WebSocket endpoints, handshake admission, the per-connection client actor
//! and the wire protocol. Room state itself lives in `hub/`.

pub mod auth;
pub mod client;
pub mod protocol;
pub mod server;
pub mod session;

pub use auth::{validate_token, AuthConfig, AuthError, IdentityResolver, JwtResolver, TokenClaims};
pub use client::{ActorOptions, FrameHandler, GameMember, LobbyMember, ReplayWatermark};
pub use protocol::{GameInbound, GameOutbound, LobbyInbound, LobbyOutbound, LobbyUser, ProtocolError};
pub use server::{open_log, Admission, AdmissionError, RelayServer, RelayServerError, ServerConfig};
pub use session::{SessionRecord, SessionRegistry};
