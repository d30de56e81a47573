//! Game Hub
//!
//! Owns every game room, keyed by game id. A room exists only while it has
//! members: it is created by the first registration and discarded when the
//! last member leaves or is evicted.

use std::collections::BTreeMap;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::handle::{ConnectionHandle, ConnectionId, OutboundFrame};
use super::room::Room;
use crate::core::GameId;
use crate::network::protocol::GameOutbound;
use crate::store::LogCursor;

enum GameCommand {
    Register {
        game_id: GameId,
        handle: ConnectionHandle,
        attached: Option<oneshot::Sender<()>>,
    },
    Unregister {
        game_id: GameId,
        id: ConnectionId,
    },
    Broadcast {
        game_id: GameId,
        message: GameOutbound,
        cursor: Option<LogCursor>,
    },
    Members {
        game_id: GameId,
        reply: oneshot::Sender<Vec<ConnectionId>>,
    },
    RoomCount(oneshot::Sender<usize>),
}

/// Cloneable handle to the game rooms' control loop.
#[derive(Clone)]
pub struct GameHub {
    commands: mpsc::UnboundedSender<GameCommand>,
}

impl GameHub {
    /// Start the control loop on the current tokio runtime.
    pub fn spawn() -> Self {
        let (commands, inbox) = mpsc::unbounded_channel();
        tokio::spawn(GameLoop { rooms: BTreeMap::new(), inbox }.run());
        Self { commands }
    }

    /// Attach a connection to a game room, creating the room if needed.
    pub fn register(&self, game_id: GameId, handle: ConnectionHandle) {
        self.send(GameCommand::Register { game_id, handle, attached: None });
    }

    /// Like [`register`](Self::register), but resolves only once the room
    /// holds the handle, so every broadcast applied afterwards reaches it.
    pub async fn attach(&self, game_id: GameId, handle: ConnectionHandle) {
        let (attached, rx) = oneshot::channel();
        self.send(GameCommand::Register { game_id, handle, attached: Some(attached) });
        let _ = rx.await;
    }

    /// Detach a connection. Unknown rooms or ids are ignored.
    pub fn unregister(&self, game_id: GameId, id: ConnectionId) {
        self.send(GameCommand::Unregister { game_id, id });
    }

    /// Deliver a message to every member of one room. `cursor` is the log
    /// position of the persisted event the message mirrors, if it was stored.
    pub fn broadcast(&self, game_id: GameId, message: GameOutbound, cursor: Option<LogCursor>) {
        self.send(GameCommand::Broadcast { game_id, message, cursor });
    }

    /// Ids attached to one room, as seen after every earlier command.
    pub async fn members(&self, game_id: &GameId) -> Vec<ConnectionId> {
        let (reply, rx) = oneshot::channel();
        self.send(GameCommand::Members { game_id: game_id.clone(), reply });
        rx.await.unwrap_or_default()
    }

    /// Number of live rooms.
    pub async fn room_count(&self) -> usize {
        let (reply, rx) = oneshot::channel();
        self.send(GameCommand::RoomCount(reply));
        rx.await.unwrap_or_default()
    }

    fn send(&self, command: GameCommand) {
        if self.commands.send(command).is_err() {
            warn!("Game hub stopped, dropping command");
        }
    }
}

struct GameLoop {
    rooms: BTreeMap<GameId, Room>,
    inbox: mpsc::UnboundedReceiver<GameCommand>,
}

impl GameLoop {
    async fn run(mut self) {
        while let Some(command) = self.inbox.recv().await {
            self.apply(command);
        }
        debug!("Game hub stopped");
    }

    fn apply(&mut self, command: GameCommand) {
        match command {
            GameCommand::Register { game_id, handle, attached } => {
                info!(game = %game_id, connection = %handle.id(), user = %handle.identity().user_id, "Joined game room");
                self.rooms.entry(game_id).or_default().insert(handle);
                if let Some(attached) = attached {
                    let _ = attached.send(());
                }
            }
            GameCommand::Unregister { game_id, id } => {
                let Some(room) = self.rooms.get_mut(&game_id) else {
                    return;
                };
                if room.remove(id).is_some() {
                    info!(game = %game_id, connection = %id, "Left game room");
                }
                self.discard_if_empty(&game_id);
            }
            GameCommand::Broadcast { game_id, message, cursor } => {
                let Some(room) = self.rooms.get_mut(&game_id) else {
                    debug!(game = %game_id, "Broadcast to a room with no members");
                    return;
                };
                let frame = match OutboundFrame::encode(&message, cursor) {
                    Ok(frame) => frame,
                    Err(e) => {
                        error!("Failed to serialize game message: {}", e);
                        return;
                    }
                };
                room.fan_out(&frame);
                self.discard_if_empty(&game_id);
            }
            GameCommand::Members { game_id, reply } => {
                let ids = self.rooms.get(&game_id).map(Room::ids).unwrap_or_default();
                let _ = reply.send(ids);
            }
            GameCommand::RoomCount(reply) => {
                let _ = reply.send(self.rooms.len());
            }
        }
    }

    fn discard_if_empty(&mut self, game_id: &GameId) {
        if self.rooms.get(game_id).is_some_and(Room::is_empty) {
            self.rooms.remove(game_id);
            info!(game = %game_id, "Game room closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Identity, UserId};
    use crate::store::PlayerSlot;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    fn member(user: i64, capacity: usize) -> (ConnectionHandle, mpsc::Receiver<OutboundFrame>) {
        ConnectionHandle::channel(Identity::new(UserId(user), format!("user{user}")), capacity)
    }

    fn mv(game: &str, edge: &str) -> GameOutbound {
        GameOutbound::Move {
            game_id: GameId::from(game),
            edge_id: edge.into(),
            player_slot: PlayerSlot::First,
        }
    }

    #[tokio::test]
    async fn test_rooms_created_and_discarded() {
        let games = GameHub::spawn();
        let g = GameId::from("S1");
        let (a, _ra) = member(7, 8);
        let (b, _rb) = member(9, 8);
        let (a_id, b_id) = (a.id(), b.id());

        games.register(g.clone(), a);
        games.register(g.clone(), b);
        assert_eq!(games.room_count().await, 1);
        assert_eq!(games.members(&g).await.len(), 2);

        games.unregister(g.clone(), a_id);
        assert_eq!(games.room_count().await, 1);
        games.unregister(g.clone(), b_id);
        assert_eq!(games.room_count().await, 0);
        assert!(games.members(&g).await.is_empty());
    }

    #[tokio::test]
    async fn test_attach_resolves_after_insert() {
        let games = GameHub::spawn();
        let g = GameId::from("S1");
        let (a, mut ra) = member(7, 8);
        let a_id = a.id();

        games.attach(g.clone(), a).await;
        assert_eq!(games.members(&g).await, vec![a_id]);

        games.broadcast(g.clone(), mv("S1", "a1"), None);
        assert!(ra.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_broadcast_is_scoped_to_room() {
        let games = GameHub::spawn();
        let (a, mut ra) = member(7, 8);
        let (b, mut rb) = member(9, 8);
        games.register(GameId::from("S1"), a);
        games.register(GameId::from("S2"), b);

        games.broadcast(GameId::from("S1"), mv("S1", "a1"), Some(LogCursor::Move(1)));
        games.room_count().await;

        let frame = ra.try_recv().unwrap();
        assert_eq!(frame.cursor, Some(LogCursor::Move(1)));
        assert_eq!(GameOutbound::from_json(&frame.text).unwrap(), mv("S1", "a1"));
        assert!(rb.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_eviction_of_last_member_discards_room() {
        let games = GameHub::spawn();
        let g = GameId::from("S1");
        let (slow, mut rx) = member(7, 1);
        games.register(g.clone(), slow);

        games.broadcast(g.clone(), mv("S1", "a1"), None);
        games.broadcast(g.clone(), mv("S1", "a2"), None);
        assert_eq!(games.room_count().await, 0);

        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_members_match_registrations(ops in proptest::collection::vec((0usize..3, any::<bool>()), 1..40)) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            rt.block_on(async move {
                let games = GameHub::spawn();
                let rooms = [GameId::from("A"), GameId::from("B"), GameId::from("C")];
                let mut expected: [BTreeSet<ConnectionId>; 3] = Default::default();
                let mut receivers = Vec::new();

                for (room, leave_later) in &ops {
                    let (handle, rx) = member(1, 64);
                    let id = handle.id();
                    games.register(rooms[*room].clone(), handle);
                    receivers.push(rx);
                    if *leave_later {
                        games.unregister(rooms[*room].clone(), id);
                    } else {
                        expected[*room].insert(id);
                    }
                }

                for (room, ids) in rooms.iter().zip(&expected) {
                    let got: BTreeSet<_> = games.members(room).await.into_iter().collect();
                    assert_eq!(&got, ids);
                }
                let live = expected.iter().filter(|ids| !ids.is_empty()).count();
                assert_eq!(games.room_count().await, live);
            });
        }
    }
}
