//! End-to-end tests against a relay listening on localhost.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use dotbox::network::{AuthConfig, JwtResolver, TokenClaims};
use dotbox::{GameId, GameLog, MemoryLog, RelayServer, ServerConfig, UserId};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SECRET: &str = "relay-integration-secret";

fn token(user: i64, name: &str) -> String {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs();
    let claims = TokenClaims {
        user_id: user,
        display_name: Some(name.into()),
        username: None,
        exp: now + 3600,
        iat: now,
        iss: None,
        aud: None,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
}

struct Relay {
    server: Arc<RelayServer>,
    log: Arc<MemoryLog>,
    addr: SocketAddr,
}

impl Relay {
    async fn start(require_participant: bool) -> Self {
        let auth = AuthConfig {
            secret: Some(SECRET.into()),
            ..Default::default()
        };
        let config = ServerConfig {
            require_participant,
            ..Default::default()
        };
        let log = Arc::new(MemoryLog::new());
        let server = Arc::new(RelayServer::new(config, Arc::new(JwtResolver::new(auth)), log.clone()));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let serving = server.clone();
        tokio::spawn(async move { serving.serve(listener).await });

        Self { server, log, addr }
    }

    async fn lobby(&self, user: i64, name: &str) -> Client {
        let url = format!("ws://{}/ws/lobby?token={}", self.addr, token(user, name));
        connect_async(url).await.unwrap().0
    }

    async fn game(&self, user: i64, name: &str, game: &str) -> Client {
        let url = format!("ws://{}/ws/game?token={}&gameId={}", self.addr, token(user, name), game);
        connect_async(url).await.unwrap().0
    }

    async fn rejection(&self, path_and_query: &str) -> StatusCode {
        match connect_async(format!("ws://{}{}", self.addr, path_and_query)).await {
            Err(WsError::Http(response)) => response.status(),
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("connection to {path_and_query} was accepted"),
        }
    }

    async fn wait_for_game_members(&self, game: &str, count: usize) {
        let game = GameId::from(game);
        tokio::time::timeout(Duration::from_secs(2), async {
            while self.server.games().members(&game).await.len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("players did not join in time");
    }
}

async fn next_json(client: &mut Client) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("connection closed")
            .expect("transport error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// Next message of type `kind`, skipping anything else.
async fn next_of_type(client: &mut Client, kind: &str) -> Value {
    loop {
        let message = next_json(client).await;
        if message["type"] == kind {
            return message;
        }
    }
}

async fn send(client: &mut Client, message: Value) {
    client.send(Message::Text(message.to_string())).await.unwrap();
}

#[tokio::test]
async fn test_lobby_presence_and_chat() {
    let relay = Relay::start(false).await;

    let mut ada = relay.lobby(7, "Ada").await;
    assert_eq!(
        next_json(&mut ada).await,
        json!({"type": "presence", "users": [{"userId": 7, "displayName": "Ada"}]})
    );

    let mut bob = relay.lobby(9, "Bob").await;
    let both = json!({"type": "presence", "users": [
        {"userId": 7, "displayName": "Ada"},
        {"userId": 9, "displayName": "Bob"},
    ]});
    assert_eq!(next_json(&mut ada).await, both);
    assert_eq!(next_json(&mut bob).await, both);

    send(&mut ada, json!({"type": "chat", "text": "hello lobby"})).await;
    let chat = next_of_type(&mut bob, "chat").await;
    assert_eq!(chat["userId"], 7);
    assert_eq!(chat["displayName"], "Ada");
    assert_eq!(chat["text"], "hello lobby");
    assert!(chat["sentAt"].is_string());

    ada.close(None).await.unwrap();
    assert_eq!(
        next_of_type(&mut bob, "presence").await,
        json!({"type": "presence", "users": [{"userId": 9, "displayName": "Bob"}]})
    );
}

#[tokio::test]
async fn test_challenge_accept_starts_game() {
    let relay = Relay::start(false).await;
    let mut ada = relay.lobby(7, "Ada").await;
    let mut bob = relay.lobby(9, "Bob").await;

    send(&mut ada, json!({"type": "challenge", "targetUserId": 9})).await;
    let offer = next_of_type(&mut bob, "challengeOffer").await;
    assert_eq!(offer, json!({"type": "challengeOffer", "fromUserId": 7, "fromName": "Ada", "targetUserId": 9}));

    send(&mut bob, json!({"type": "challengeAccept", "opponentUserId": 7})).await;
    let start_for_ada = next_of_type(&mut ada, "startGame").await;
    let start_for_bob = next_of_type(&mut bob, "startGame").await;
    assert_eq!(start_for_ada, start_for_bob);
    assert_eq!(start_for_ada["playerIds"], json!([9, 7]));

    let game_id = GameId::from(start_for_ada["gameId"].as_str().unwrap());
    let sessions = relay.server.sessions();
    assert!(sessions.is_participant(&game_id, UserId(7)));
    assert!(sessions.is_participant(&game_id, UserId(9)));
}

#[tokio::test]
async fn test_game_moves_relay_persist_and_replay() {
    let relay = Relay::start(false).await;
    let mut ada = relay.game(7, "Ada", "S1").await;
    let mut bob = relay.game(9, "Bob", "S1").await;
    relay.wait_for_game_members("S1", 2).await;

    send(&mut ada, json!({"type": "move", "edgeId": "a1", "playerSlot": "p1", "extra": "ignored"})).await;
    let expected = json!({"type": "move", "gameId": "S1", "edgeId": "a1", "playerSlot": "p1"});
    assert_eq!(next_json(&mut ada).await, expected);
    assert_eq!(next_json(&mut bob).await, expected);

    let stored = relay.log.list_moves(&GameId::from("S1")).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].user_id, UserId(7));

    send(&mut bob, json!({"type": "chat", "text": " nice "})).await;
    let chat = next_json(&mut ada).await;
    assert_eq!(chat["text"], "nice");
    assert_eq!(chat["displayName"], "Bob");

    // A late joiner sees the history in order, then live traffic.
    let mut carol = relay.game(5, "Carol", "S1").await;
    assert_eq!(next_json(&mut carol).await, expected);
    assert_eq!(next_json(&mut carol).await["text"], "nice");
    relay.wait_for_game_members("S1", 3).await;

    send(&mut ada, json!({"type": "endGame"})).await;
    assert_eq!(
        next_json(&mut carol).await,
        json!({"type": "endGame", "gameId": "S1", "text": "Game ended by a player"})
    );
}

#[tokio::test]
async fn test_handshake_rejections() {
    let relay = Relay::start(false).await;
    let good = token(7, "Ada");

    assert_eq!(relay.rejection("/ws/lobby").await, StatusCode::UNAUTHORIZED);
    assert_eq!(relay.rejection("/ws/lobby?token=not.a.jwt").await, StatusCode::UNAUTHORIZED);
    assert_eq!(relay.rejection(&format!("/ws/elsewhere?token={good}")).await, StatusCode::NOT_FOUND);
    assert_eq!(relay.rejection(&format!("/ws/game?token={good}")).await, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_participant_only_game_admission() {
    let relay = Relay::start(true).await;
    relay.server.sessions().register(GameId::from("S1"), UserId(9), UserId(7));

    let stranger = token(8, "Eve");
    assert_eq!(
        relay.rejection(&format!("/ws/game?token={stranger}&gameId=S1")).await,
        StatusCode::FORBIDDEN
    );

    let _ada = relay.game(7, "Ada", "S1").await;
    relay.wait_for_game_members("S1", 1).await;
}

#[tokio::test]
async fn test_closed_connections_release_their_slot() {
    let relay = Relay::start(false).await;
    let mut ada = relay.lobby(7, "Ada").await;
    next_json(&mut ada).await;
    assert_eq!(relay.server.connection_count(), 1);

    ada.close(None).await.unwrap();
    tokio::time::timeout(Duration::from_secs(2), async {
        while relay.server.connection_count() > 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("connection slot was not released");
    assert!(relay.server.lobby().members().await.is_empty());
}
