//! WebSocket Relay Server
//!
//! Accepts TCP connections, admits them during the WebSocket handshake and
//! hands each admitted connection to a client actor for the lobby or for one
//! game room.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};
use url::form_urlencoded;

use crate::core::{GameId, Identity, UserId};
use crate::hub::{GameHub, LobbyHub};
use crate::network::auth::{AuthError, IdentityResolver};
use crate::network::client::{serve_game, serve_lobby, ActorOptions, GameMember, LobbyMember};
use crate::network::session::SessionRegistry;
use crate::store::{GameLog, LogError, MemoryLog, SqliteLog};

/// Lobby endpoint.
pub const LOBBY_PATH: &str = "/ws/lobby";
/// Game room endpoint.
pub const GAME_PATH: &str = "/ws/game";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Outbound frames a connection may have queued before it is evicted.
    pub outbound_capacity: usize,
    /// Close connections that send nothing for this long.
    pub idle_timeout: Option<Duration>,
    /// Only admit the two paired users to a game.
    pub require_participant: bool,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8090)),
            max_connections: 1000,
            outbound_capacity: 256,
            idle_timeout: None,
            require_participant: false,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    fn actor_options(&self) -> ActorOptions {
        ActorOptions {
            outbound_capacity: self.outbound_capacity,
            idle_timeout: self.idle_timeout,
        }
    }
}

/// Relay server errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    Bind(#[from] std::io::Error),

    /// WebSocket handshake or transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The move/chat log could not be opened.
    #[error("Store error: {0}")]
    Store(#[from] LogError),
}

/// Open the SQLite log at `db_path`, or an in-memory log when none is given.
pub async fn open_log(db_path: Option<&Path>) -> Result<Arc<dyn GameLog>, RelayServerError> {
    match db_path {
        Some(path) => Ok(Arc::new(SqliteLog::open(path).await?)),
        None => {
            info!("No database configured, history is kept in memory");
            Ok(Arc::new(MemoryLog::new()))
        }
    }
}

// =============================================================================
// ADMISSION
// =============================================================================

/// Where an admitted connection goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Lobby member.
    Lobby(Identity),
    /// Member of one game room.
    Game(Identity, GameId),
}

/// Why a handshake was refused.
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    /// Path is neither endpoint.
    #[error("no endpoint at {0}")]
    NotFound(String),

    /// Token missing or not acceptable.
    #[error("unauthorized: {0}")]
    Unauthorized(#[from] AuthError),

    /// Game endpoint without a `gameId`.
    #[error("missing gameId")]
    MissingGameId,

    /// Caller was not paired into the requested game.
    #[error("user {user} is not a participant in game {game}")]
    NotParticipant {
        /// Caller.
        user: UserId,
        /// Requested game.
        game: GameId,
    },
}

impl AdmissionError {
    /// HTTP status answered to the client.
    pub fn status(&self) -> StatusCode {
        match self {
            AdmissionError::NotFound(_) => StatusCode::NOT_FOUND,
            AdmissionError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AdmissionError::MissingGameId => StatusCode::BAD_REQUEST,
            AdmissionError::NotParticipant { .. } => StatusCode::FORBIDDEN,
        }
    }

    fn into_response(self) -> ErrorResponse {
        let mut response = ErrorResponse::new(Some(self.to_string()));
        *response.status_mut() = self.status();
        response
    }
}

/// First value of `name` in a query string, percent-decoded. Empty values
/// count as missing.
fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    form_urlencoded::parse(query?.as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

/// Decide where a handshake request goes, or why it is refused.
pub fn admit(
    request: &Request,
    resolver: &dyn IdentityResolver,
    sessions: &SessionRegistry,
    require_participant: bool,
) -> Result<Admission, AdmissionError> {
    let path = request.uri().path();
    if path != LOBBY_PATH && path != GAME_PATH {
        return Err(AdmissionError::NotFound(path.to_string()));
    }

    let query = request.uri().query();
    let token = query_param(query, "token").ok_or(AuthError::MissingToken)?;
    let identity = resolver.resolve(&token)?;

    if path == LOBBY_PATH {
        return Ok(Admission::Lobby(identity));
    }

    let game_id = query_param(query, "gameId")
        .and_then(|raw| GameId::parse(&raw))
        .ok_or(AdmissionError::MissingGameId)?;

    if require_participant && !sessions.is_participant(&game_id, identity.user_id) {
        return Err(AdmissionError::NotParticipant {
            user: identity.user_id,
            game: game_id,
        });
    }

    Ok(Admission::Game(identity, game_id))
}

// =============================================================================
// SERVER
// =============================================================================

/// Held by each live connection; frees its slot on drop.
struct ConnectionSlot(Arc<AtomicUsize>);

impl ConnectionSlot {
    fn acquire(counter: &Arc<AtomicUsize>, limit: usize) -> Option<Self> {
        if counter.fetch_add(1, Ordering::SeqCst) >= limit {
            counter.fetch_sub(1, Ordering::SeqCst);
            return None;
        }
        Some(Self(counter.clone()))
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The relay server.
///
/// Must be created inside a tokio runtime: construction starts the lobby and
/// game hubs.
pub struct RelayServer {
    /// Server configuration.
    config: ServerConfig,
    /// Token validation.
    resolver: Arc<dyn IdentityResolver>,
    /// Move and chat history.
    log: Arc<dyn GameLog>,
    /// Game pairings.
    sessions: Arc<SessionRegistry>,
    lobby: LobbyHub,
    games: GameHub,
    /// Live connection count.
    connections: Arc<AtomicUsize>,
    /// Shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl RelayServer {
    /// Create a new relay server.
    pub fn new(config: ServerConfig, resolver: Arc<dyn IdentityResolver>, log: Arc<dyn GameLog>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            resolver,
            log,
            sessions: Arc::new(SessionRegistry::new()),
            lobby: LobbyHub::spawn(),
            games: GameHub::spawn(),
            connections: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
        }
    }

    /// Bind the configured address and serve until shutdown.
    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<(), RelayServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve connections from an already bound listener until shutdown.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), RelayServerError> {
        info!(
            addr = %listener.local_addr()?,
            version = %self.config.version,
            "Relay listening on {} and {}",
            LOBBY_PATH,
            GAME_PATH
        );
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => self.handle_connection(stream, addr),
                        Err(e) => error!("Accept error: {}", e),
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Handle a new TCP connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let Some(slot) = ConnectionSlot::acquire(&self.connections, self.config.max_connections) else {
            warn!("Connection limit reached, rejecting {}", addr);
            return;
        };

        let resolver = self.resolver.clone();
        let log = self.log.clone();
        let sessions = self.sessions.clone();
        let lobby = self.lobby.clone();
        let games = self.games.clone();
        let require_participant = self.config.require_participant;
        let options = self.config.actor_options();
        let shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let _slot = slot;
            let mut admission = None;

            let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                match admit(request, resolver.as_ref(), &sessions, require_participant) {
                    Ok(admitted) => {
                        admission = Some(admitted);
                        Ok(response)
                    }
                    Err(e) => {
                        info!(%addr, status = %e.status(), "Rejected connection: {}", e);
                        Err(e.into_response())
                    }
                }
            };

            let ws_stream = match accept_hdr_async(stream, callback).await.map_err(RelayServerError::from) {
                Ok(ws) => ws,
                Err(e) => {
                    debug!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };
            let Some(admission) = admission else {
                return;
            };
            let (sink, stream) = ws_stream.split();

            match admission {
                Admission::Lobby(identity) => {
                    let span = info_span!("lobby", user = %identity.user_id, %addr);
                    async {
                        info!("Client connected");
                        let member = LobbyMember::new(identity, lobby, sessions);
                        serve_lobby(sink, stream, member, &options, shutdown_rx).await;
                        info!("Client disconnected");
                    }
                    .instrument(span)
                    .await;
                }
                Admission::Game(identity, game_id) => {
                    let span = info_span!("game", game = %game_id, user = %identity.user_id, %addr);
                    async {
                        info!("Client connected");
                        let member = GameMember::new(identity, game_id, games, log);
                        serve_game(sink, stream, member, &options, shutdown_rx).await;
                        info!("Client disconnected");
                    }
                    .instrument(span)
                    .await;
                }
            }
        });
    }

    /// Stop accepting connections and close every open one.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Get live connection count.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Game pairings created in the lobby.
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Lobby hub.
    pub fn lobby(&self) -> &LobbyHub {
        &self.lobby
    }

    /// Game rooms hub.
    pub fn games(&self) -> &GameHub {
        &self.games
    }
}
