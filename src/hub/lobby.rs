//! Lobby Hub
//!
//! One process-wide room. Every membership change republishes the full
//! presence list to all members.

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::handle::{ConnectionHandle, ConnectionId, OutboundFrame};
use super::presence;
use super::room::Room;
use crate::network::protocol::{LobbyOutbound, LobbyUser};

enum LobbyCommand {
    Register(ConnectionHandle),
    Unregister(ConnectionId),
    Broadcast(LobbyOutbound),
    Members(oneshot::Sender<Vec<ConnectionId>>),
    Presence(oneshot::Sender<Vec<LobbyUser>>),
}

/// Cloneable handle to the lobby's control loop.
///
/// All methods enqueue a command and return immediately; commands are applied
/// one at a time in the order they were issued.
#[derive(Clone)]
pub struct LobbyHub {
    commands: mpsc::UnboundedSender<LobbyCommand>,
}

impl LobbyHub {
    /// Start the control loop on the current tokio runtime.
    ///
    /// The loop stops once every clone of the returned hub is dropped.
    pub fn spawn() -> Self {
        let (commands, inbox) = mpsc::unbounded_channel();
        tokio::spawn(LobbyLoop { room: Room::default(), inbox }.run());
        Self { commands }
    }

    /// Admit a connection to the lobby.
    pub fn register(&self, handle: ConnectionHandle) {
        self.send(LobbyCommand::Register(handle));
    }

    /// Remove a connection. Unknown ids are ignored.
    pub fn unregister(&self, id: ConnectionId) {
        self.send(LobbyCommand::Unregister(id));
    }

    /// Deliver a message to every member.
    pub fn broadcast(&self, message: LobbyOutbound) {
        self.send(LobbyCommand::Broadcast(message));
    }

    /// Ids of current members, as seen after every earlier command.
    pub async fn members(&self) -> Vec<ConnectionId> {
        let (reply, rx) = oneshot::channel();
        self.send(LobbyCommand::Members(reply));
        rx.await.unwrap_or_default()
    }

    /// Current presence list.
    pub async fn presence(&self) -> Vec<LobbyUser> {
        let (reply, rx) = oneshot::channel();
        self.send(LobbyCommand::Presence(reply));
        rx.await.unwrap_or_default()
    }

    fn send(&self, command: LobbyCommand) {
        if self.commands.send(command).is_err() {
            warn!("Lobby hub stopped, dropping command");
        }
    }
}

struct LobbyLoop {
    room: Room,
    inbox: mpsc::UnboundedReceiver<LobbyCommand>,
}

impl LobbyLoop {
    async fn run(mut self) {
        while let Some(command) = self.inbox.recv().await {
            self.apply(command);
        }
        debug!("Lobby hub stopped");
    }

    fn apply(&mut self, command: LobbyCommand) {
        match command {
            LobbyCommand::Register(handle) => {
                info!(connection = %handle.id(), user = %handle.identity().user_id, "Joined lobby");
                self.room.insert(handle);
                self.publish_presence();
            }
            LobbyCommand::Unregister(id) => {
                if self.room.remove(id).is_some() {
                    info!(connection = %id, "Left lobby");
                    self.publish_presence();
                }
            }
            LobbyCommand::Broadcast(message) => {
                let frame = match OutboundFrame::encode(&message, None) {
                    Ok(frame) => frame,
                    Err(e) => {
                        error!("Failed to serialize lobby message: {}", e);
                        return;
                    }
                };
                if !self.room.fan_out(&frame).is_empty() {
                    self.publish_presence();
                }
            }
            LobbyCommand::Members(reply) => {
                let _ = reply.send(self.room.ids());
            }
            LobbyCommand::Presence(reply) => {
                let _ = reply.send(presence::snapshot(self.room.identities()));
            }
        }
    }

    /// Send the full presence list. Evictions caused by this broadcast change
    /// presence again, so repeat until a round evicts nobody.
    fn publish_presence(&mut self) {
        loop {
            let users = presence::snapshot(self.room.identities());
            let frame = match OutboundFrame::encode(&LobbyOutbound::Presence { users }, None) {
                Ok(frame) => frame,
                Err(e) => {
                    error!("Failed to serialize presence: {}", e);
                    return;
                }
            };
            if self.room.fan_out(&frame).is_empty() {
                return;
            }
        }
    }
}
