//! Client Actor
//!
//! Drives one admitted WebSocket connection. The connection task reads
//! frames and hands text to the room's [`FrameHandler`]; a spawned writer
//! drains the connection's outbound queue onto the socket.
//!
//! Game connections replay the persisted history before the writer starts.
//! The handle is attached to the room first so live frames queue up behind
//! the replay, and the writer then skips any queued frame whose log cursor
//! the replay already covered.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tokio::time::error::Elapsed;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::core::{now_millis, GameId, Identity};
use crate::hub::{ConnectionHandle, GameHub, LobbyHub, OutboundFrame};
use crate::network::protocol::{GameInbound, GameOutbound, LobbyInbound, LobbyOutbound, ProtocolError};
use crate::network::session::SessionRegistry;
use crate::store::{GameLog, LogCursor, LogSeq, NewChat, NewMove};

/// Text broadcast when `endGame` arrives without one.
pub const DEFAULT_END_TEXT: &str = "Game ended by a player";

/// Per-connection tuning.
#[derive(Debug, Clone)]
pub struct ActorOptions {
    /// Frames a connection may have queued before it counts as slow.
    pub outbound_capacity: usize,
    /// Close connections that send nothing for this long.
    pub idle_timeout: Option<Duration>,
}

impl Default for ActorOptions {
    fn default() -> Self {
        Self {
            outbound_capacity: 256,
            idle_timeout: None,
        }
    }
}

/// Room-specific handling of inbound text frames.
#[async_trait]
pub trait FrameHandler: Send + Sync {
    /// Act on one text frame. Frames that cannot be used are dropped.
    async fn on_text(&self, text: &str);
}

// =============================================================================
// LOBBY
// =============================================================================

/// A connection's view of the lobby.
pub struct LobbyMember {
    identity: Identity,
    lobby: LobbyHub,
    sessions: Arc<SessionRegistry>,
}

impl LobbyMember {
    /// Lobby member acting as `identity`.
    pub fn new(identity: Identity, lobby: LobbyHub, sessions: Arc<SessionRegistry>) -> Self {
        Self { identity, lobby, sessions }
    }

    /// Who this member is.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    fn handle(&self, message: LobbyInbound) {
        match message {
            LobbyInbound::Chat { text } => {
                if text.trim().is_empty() {
                    return;
                }
                self.lobby.broadcast(LobbyOutbound::Chat {
                    user_id: self.identity.user_id,
                    display_name: self.identity.display_name.clone(),
                    text,
                    sent_at: now_millis(),
                });
            }
            LobbyInbound::Challenge { target_user_id } => {
                if target_user_id.is_unset() {
                    return;
                }
                self.lobby.broadcast(LobbyOutbound::ChallengeOffer {
                    from_user_id: self.identity.user_id,
                    from_name: self.identity.display_name.clone(),
                    target_user_id,
                });
            }
            LobbyInbound::ChallengeAccept { opponent_user_id } => {
                if opponent_user_id.is_unset() {
                    return;
                }
                let game_id = GameId::generate();
                let record = self.sessions.register(game_id.clone(), self.identity.user_id, opponent_user_id);
                info!(game = %game_id, user = %self.identity.user_id, opponent = %opponent_user_id, "Challenge accepted");
                self.lobby.broadcast(LobbyOutbound::StartGame {
                    game_id,
                    player_ids: record.participants,
                });
            }
            LobbyInbound::Unknown => {
                debug!(user = %self.identity.user_id, "Ignoring unknown lobby message");
            }
        }
    }
}

#[async_trait]
impl FrameHandler for LobbyMember {
    async fn on_text(&self, text: &str) {
        match LobbyInbound::from_json(text) {
            Ok(message) => self.handle(message),
            Err(e) => debug!(user = %self.identity.user_id, "Dropping lobby frame: {}", e),
        }
    }
}

// =============================================================================
// GAME
// =============================================================================

/// A connection's view of one game room.
pub struct GameMember {
    identity: Identity,
    game_id: GameId,
    games: GameHub,
    log: Arc<dyn GameLog>,
}

impl GameMember {
    /// Member of `game_id` acting as `identity`.
    pub fn new(identity: Identity, game_id: GameId, games: GameHub, log: Arc<dyn GameLog>) -> Self {
        Self { identity, game_id, games, log }
    }

    /// Who this member is.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Game this member plays in.
    pub fn game_id(&self) -> &GameId {
        &self.game_id
    }

    async fn handle(&self, message: GameInbound) {
        match message {
            GameInbound::Move { edge_id, player_slot } => {
                let Some(slot) = player_slot else {
                    debug!(game = %self.game_id, "Dropping move without player slot");
                    return;
                };
                if edge_id.is_empty() {
                    debug!(game = %self.game_id, "Dropping move without edge");
                    return;
                }

                let appended = self
                    .log
                    .append_move(NewMove {
                        game_id: &self.game_id,
                        user_id: self.identity.user_id,
                        edge_id: &edge_id,
                        slot,
                    })
                    .await;
                let cursor = match appended {
                    Ok(seq) => Some(LogCursor::Move(seq)),
                    Err(e) => {
                        warn!(game = %self.game_id, "Failed to persist move: {}", e);
                        None
                    }
                };

                self.games.broadcast(
                    self.game_id.clone(),
                    GameOutbound::Move {
                        game_id: self.game_id.clone(),
                        edge_id,
                        player_slot: slot,
                    },
                    cursor,
                );
            }
            GameInbound::Chat { text, display_name } => {
                let text = text.trim();
                if text.is_empty() {
                    return;
                }
                let label = if display_name.trim().is_empty() {
                    self.identity.display_name.as_str()
                } else {
                    display_name.as_str()
                };
                let sent_at = now_millis();

                let appended = self
                    .log
                    .append_chat(NewChat {
                        game_id: &self.game_id,
                        user_id: self.identity.user_id,
                        display_name: label,
                        text,
                        sent_at,
                    })
                    .await;
                let cursor = match appended {
                    Ok(seq) => Some(LogCursor::Chat(seq)),
                    Err(e) => {
                        warn!(game = %self.game_id, "Failed to persist chat: {}", e);
                        None
                    }
                };

                self.games.broadcast(
                    self.game_id.clone(),
                    GameOutbound::Chat {
                        game_id: self.game_id.clone(),
                        user_id: self.identity.user_id,
                        display_name: label.to_string(),
                        text: text.to_string(),
                        sent_at,
                    },
                    cursor,
                );
            }
            GameInbound::EndGame { text } => {
                let text = match text.trim() {
                    "" => DEFAULT_END_TEXT,
                    trimmed => trimmed,
                };
                info!(game = %self.game_id, user = %self.identity.user_id, "Game ended");
                self.games.broadcast(
                    self.game_id.clone(),
                    GameOutbound::EndGame {
                        game_id: self.game_id.clone(),
                        text: text.to_string(),
                    },
                    None,
                );
            }
            GameInbound::Unknown => {
                debug!(game = %self.game_id, "Ignoring unknown game message");
            }
        }
    }
}

#[async_trait]
impl FrameHandler for GameMember {
    async fn on_text(&self, text: &str) {
        match GameInbound::from_json(text) {
            Ok(message) => self.handle(message).await,
            Err(e) => debug!(game = %self.game_id, "Dropping game frame: {}", e),
        }
    }
}

// =============================================================================
// REPLAY
// =============================================================================

/// Highest log sequences a connection has already been sent by replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayWatermark {
    /// Last replayed move.
    pub moves: Option<LogSeq>,
    /// Last replayed chat line.
    pub chat: Option<LogSeq>,
}

impl ReplayWatermark {
    /// Whether a live frame at `cursor` was already part of the replay.
    pub fn covers(&self, cursor: Option<LogCursor>) -> bool {
        match cursor {
            Some(LogCursor::Move(seq)) => self.moves.is_some_and(|last| seq <= last),
            Some(LogCursor::Chat(seq)) => self.chat.is_some_and(|last| seq <= last),
            None => false,
        }
    }
}

/// Write a game's stored moves, then its stored chat, straight to `sink`.
///
/// A failed log query skips that half of the history. Only a write failure
/// is returned.
pub async fn replay_history<W>(sink: &mut W, log: &dyn GameLog, game_id: &GameId) -> Result<ReplayWatermark, W::Error>
where
    W: Sink<Message> + Unpin,
{
    let mut watermark = ReplayWatermark::default();

    match log.list_moves(game_id).await {
        Ok(moves) => {
            for record in &moves {
                feed_json(sink, &GameOutbound::from(record)).await?;
                watermark.moves = watermark.moves.max(Some(record.seq));
            }
        }
        Err(e) => warn!(game = %game_id, "Skipping move replay: {}", e),
    }

    match log.list_chat(game_id).await {
        Ok(lines) => {
            for record in &lines {
                feed_json(sink, &GameOutbound::from(record)).await?;
                watermark.chat = watermark.chat.max(Some(record.seq));
            }
        }
        Err(e) => warn!(game = %game_id, "Skipping chat replay: {}", e),
    }

    sink.flush().await?;
    debug!(game = %game_id, ?watermark, "Replay complete");
    Ok(watermark)
}

async fn feed_json<W>(sink: &mut W, message: &GameOutbound) -> Result<(), W::Error>
where
    W: Sink<Message> + Unpin,
{
    match message.to_json() {
        Ok(text) => sink.feed(Message::Text(text)).await,
        Err(e) => {
            error!("Failed to serialize replayed message: {}", e);
            Ok(())
        }
    }
}

// =============================================================================
// CONNECTION DUTIES
// =============================================================================

/// Drain `outbound` onto `sink` until the queue closes or a write fails.
async fn run_writer<W>(mut sink: W, mut outbound: mpsc::Receiver<OutboundFrame>, watermark: ReplayWatermark)
where
    W: Sink<Message> + Unpin,
    W::Error: fmt::Display,
{
    while let Some(frame) = outbound.recv().await {
        if watermark.covers(frame.cursor) {
            debug!(cursor = ?frame.cursor, "Skipping frame already replayed");
            continue;
        }
        if let Err(e) = sink.send(Message::Text(frame.text.to_string())).await {
            debug!("Write failed: {}", e);
            break;
        }
    }
    let _ = sink.close().await;
}

async fn next_frame<R>(stream: &mut R, idle_timeout: Option<Duration>) -> Result<Option<R::Item>, Elapsed>
where
    R: Stream + Unpin,
{
    match idle_timeout {
        Some(limit) => tokio::time::timeout(limit, stream.next()).await,
        None => Ok(stream.next().await),
    }
}

/// Feed text frames to `handler` until the peer goes away, the connection
/// idles out or the server shuts down.
async fn run_reader<R, E, H>(
    mut stream: R,
    handler: &H,
    idle_timeout: Option<Duration>,
    shutdown: &mut broadcast::Receiver<()>,
) where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
    H: FrameHandler,
{
    loop {
        let frame = tokio::select! {
            frame = next_frame(&mut stream, idle_timeout) => frame,
            _ = shutdown.recv() => {
                debug!("Server shutting down, closing connection");
                return;
            }
        };

        match frame {
            Ok(Some(Ok(Message::Text(text)))) => handler.on_text(&text).await,
            Ok(Some(Ok(Message::Binary(_)))) => debug!("Dropping frame: {}", ProtocolError::Binary),
            Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                debug!("Peer closed connection");
                return;
            }
            Ok(Some(Ok(_))) => {}
            Ok(Some(Err(e))) => {
                debug!("Connection error: {}", e);
                return;
            }
            Err(_) => {
                debug!("Idle timeout");
                return;
            }
        }
    }
}

/// Run a lobby connection to completion.
pub async fn serve_lobby<W, R, E>(
    sink: W,
    stream: R,
    member: LobbyMember,
    options: &ActorOptions,
    mut shutdown: broadcast::Receiver<()>,
) where
    W: Sink<Message> + Unpin + Send + 'static,
    W::Error: fmt::Display + Send,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
{
    let (handle, outbound) = ConnectionHandle::channel(member.identity.clone(), options.outbound_capacity);
    let id = handle.id();

    let writer = tokio::spawn(run_writer(sink, outbound, ReplayWatermark::default()));
    member.lobby.register(handle);

    run_reader(stream, &member, options.idle_timeout, &mut shutdown).await;

    member.lobby.unregister(id);
    let _ = writer.await;
}

/// Run a game connection to completion, starting with the history replay.
pub async fn serve_game<W, R, E>(
    mut sink: W,
    stream: R,
    member: GameMember,
    options: &ActorOptions,
    mut shutdown: broadcast::Receiver<()>,
) where
    W: Sink<Message> + Unpin + Send + 'static,
    W::Error: fmt::Display + Send,
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
{
    let (handle, outbound) = ConnectionHandle::channel(member.identity.clone(), options.outbound_capacity);
    let id = handle.id();

    // Held: live frames queue behind the replay until the writer starts.
    member.games.attach(member.game_id.clone(), handle).await;

    let watermark = match replay_history(&mut sink, member.log.as_ref(), &member.game_id).await {
        Ok(watermark) => watermark,
        Err(e) => {
            debug!(game = %member.game_id, "Replay write failed: {}", e);
            member.games.unregister(member.game_id.clone(), id);
            return;
        }
    };

    let writer = tokio::spawn(run_writer(sink, outbound, watermark));

    run_reader(stream, &member, options.idle_timeout, &mut shutdown).await;

    member.games.unregister(member.game_id.clone(), id);
    let _ = writer.await;
}
