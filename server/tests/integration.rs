//! Integration tests for the labyrinth server.
//!
//! These tests start a real server instance and connect via WebSocket
//! to verify end-to-end behavior.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use labyrinth_server::config::ServerConfig;
use labyrinth_server::hub::{spawn_hub, Hub};
use labyrinth_server::ws::{router, AppState};
use labyrinth_shared::maze::Tile;
use labyrinth_shared::protocol::{
    ChatMessageIn, ClientMsg, MovePlayerMsg, PlayerId, ServerMsg, SyncWorldMsg,
};
use labyrinth_shared::vec3::vec3;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

const QUIET: Duration = Duration::from_millis(300);

fn test_config() -> ServerConfig {
    ServerConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        // 2x2 always generates: the exit opens right below the entrance.
        maze_width: 2,
        maze_height: 2,
        rng_seed: Some(12345),
        ..Default::default()
    }
}

/// Start a test server on a random available port and return the WebSocket URL.
async fn start_test_server(config: ServerConfig) -> String {
    let listener = TcpListener::bind(&config.listen_addr).await.unwrap();
    let addr = listener.local_addr().unwrap();

    let hub = Hub::new(&config).expect("maze generation failed");
    let hub_handle = spawn_hub(hub, config.hub_queue_capacity);
    let app = router(AppState::new(hub_handle, &config));

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("ws://{}/ws", addr)
}

struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    /// Messages already read from a coalesced frame.
    pending: VecDeque<ServerMsg>,
}

impl TestClient {
    async fn connect(url: &str) -> Self {
        let (ws, _) = connect_async(url).await.expect("Failed to connect");
        Self {
            ws,
            pending: VecDeque::new(),
        }
    }

    async fn send(&mut self, msg: &ClientMsg) {
        let json = serde_json::to_string(msg).unwrap();
        self.ws.send(Message::Text(json.into())).await.unwrap();
    }

    async fn send_raw(&mut self, text: &str) {
        self.ws.send(Message::Text(text.to_string().into())).await.unwrap();
    }

    /// Read the next server message, splitting coalesced frames.
    async fn recv(&mut self) -> ServerMsg {
        loop {
            if let Some(msg) = self.pending.pop_front() {
                return msg;
            }
            match self.ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    for line in text.as_str().lines() {
                        let msg = serde_json::from_str(line)
                            .expect("Failed to parse server message");
                        self.pending.push_back(msg);
                    }
                }
                Some(Ok(_)) => continue, // Skip ping/pong
                Some(Err(e)) => panic!("WebSocket error: {}", e),
                None => panic!("WebSocket closed unexpectedly"),
            }
        }
    }

    async fn recv_timeout(&mut self, timeout: Duration) -> Option<ServerMsg> {
        tokio::time::timeout(timeout, self.recv()).await.ok()
    }

    /// Request the world and wait for the reply. Once it arrives the session
    /// is registered with the hub.
    async fn sync_world(&mut self) -> SyncWorldMsg {
        self.send(&ClientMsg::SyncWorld).await;
        loop {
            if let ServerMsg::SyncWorld(world) = self.recv().await {
                return world;
            }
        }
    }

    /// True once the server has closed the connection. Anything still
    /// buffered ahead of the close is read and discarded.
    async fn is_disconnected(&mut self) -> bool {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            match tokio::time::timeout_at(deadline, self.ws.next()).await {
                Ok(Some(Ok(Message::Close(_)))) | Ok(None) | Ok(Some(Err(_))) => return true,
                Ok(Some(Ok(_))) => continue,
                Err(_) => return false,
            }
        }
    }
}

async fn join(url: &str, name: &str, color: &str) -> TestClient {
    let mut client = TestClient::connect(&format!("{}?name={}&color={}", url, name, color)).await;
    client.sync_world().await;
    client
}

/// Wait on `client` for the playerJoin announcing someone else.
async fn expect_join(client: &mut TestClient) -> PlayerId {
    match client.recv().await {
        ServerMsg::PlayerJoin(j) => j.player.id,
        other => panic!("Expected PlayerJoin, got {:?}", other),
    }
}

fn mentions(msg: &ServerMsg, id: PlayerId) -> bool {
    match msg {
        ServerMsg::PlayerJoin(m) => m.player.id == id,
        ServerMsg::PlayerQuit(m) => m.player.id == id,
        ServerMsg::Update(m) => m.players.iter().any(|p| p.id == id),
        ServerMsg::SyncWorld(m) => m.players.iter().any(|p| p.id == id),
        ServerMsg::ChatMessage(m) => m.player.id == id,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_sync_world_returns_grid_and_other_players() {
    let url = start_test_server(test_config()).await;

    let mut alice = TestClient::connect(&format!("{}?name=alice&color=red", url)).await;
    let world = alice.sync_world().await;
    assert!(world.players.is_empty());
    assert_eq!(world.grid.width(), 2);
    assert_eq!(world.grid.height(), 2);
    assert_eq!(world.grid.get(1, 1), Some(Tile::Passage));
    assert_eq!(world.grid.get(1, 0), Some(Tile::Wall));

    let mut bob = TestClient::connect(&format!("{}?name=bob&color=blue", url)).await;
    let world = bob.sync_world().await;
    assert_eq!(world.players.len(), 1);
    assert_eq!(world.players[0].id, 1);
    assert_eq!(world.players[0].name, "alice");
    assert_eq!(world.players[0].color, "red");
    assert_eq!(world.players[0].current_animation, "Idle");
}

#[tokio::test]
async fn test_missing_query_params_default_to_empty() {
    let url = start_test_server(test_config()).await;

    let mut anon = TestClient::connect(&url).await;
    anon.sync_world().await;

    let mut bob = join(&url, "bob", "blue").await;
    let world = bob.sync_world().await;
    assert_eq!(world.players.len(), 1);
    assert_eq!(world.players[0].name, "");
    assert_eq!(world.players[0].color, "");
}

#[tokio::test]
async fn test_join_is_announced_to_existing_players() {
    let url = start_test_server(test_config()).await;

    let mut alice = join(&url, "alice", "red").await;
    let mut bob = join(&url, "bob", "blue").await;

    match alice.recv().await {
        ServerMsg::PlayerJoin(j) => {
            assert_eq!(j.player.id, 2);
            assert_eq!(j.player.name, "bob");
        }
        other => panic!("Expected PlayerJoin, got {:?}", other),
    }
    assert!(bob.recv_timeout(QUIET).await.is_none(), "Own join must not be echoed");
}

#[tokio::test]
async fn test_move_is_relayed_to_others_only() {
    let url = start_test_server(test_config()).await;

    let mut a = join(&url, "a", "red").await;
    let mut b = join(&url, "b", "blue").await;
    assert_eq!(expect_join(&mut a).await, 2);

    a.send(&ClientMsg::MovePlayer(MovePlayerMsg {
        position: vec3(1.0, 2.0, 3.0),
        rotation: vec3(0.0, 0.5, 0.0),
        current_animation: "Walk".to_string(),
    }))
    .await;

    match b.recv().await {
        ServerMsg::Update(u) => {
            assert_eq!(u.players.len(), 1);
            assert_eq!(u.players[0].id, 1);
            assert_eq!(u.players[0].position, vec3(1.0, 2.0, 3.0));
            assert_eq!(u.players[0].current_animation, "Walk");
        }
        other => panic!("Expected Update, got {:?}", other),
    }
    assert!(b.recv_timeout(QUIET).await.is_none(), "Exactly one update expected");
    assert!(a.recv_timeout(QUIET).await.is_none(), "Mover must not see its own update");

    // The hub snapshot follows the move.
    let world = b.sync_world().await;
    assert_eq!(world.players[0].position, vec3(1.0, 2.0, 3.0));
}

#[tokio::test]
async fn test_chat_reaches_everyone_including_sender() {
    let url = start_test_server(test_config()).await;

    let mut a = join(&url, "a", "red").await;
    let mut b = join(&url, "b", "blue").await;
    expect_join(&mut a).await;

    a.send(&ClientMsg::ChatMessage(ChatMessageIn {
        message: "hello maze".to_string(),
    }))
    .await;

    for client in [&mut a, &mut b] {
        match client.recv().await {
            ServerMsg::ChatMessage(c) => {
                assert_eq!(c.player.id, 1);
                assert_eq!(c.player.name, "a");
                assert_eq!(c.message, "hello maze");
            }
            other => panic!("Expected ChatMessage, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_bad_messages_are_dropped_and_session_survives() {
    let url = start_test_server(test_config()).await;

    let mut a = join(&url, "a", "red").await;
    let mut b = join(&url, "b", "blue").await;
    expect_join(&mut a).await;

    a.send_raw("not valid json").await;
    a.send_raw(r#"{"name":"getConnectedPlayers","data":{}}"#).await;
    a.send_raw(r#"{"name":"movePlayer","data":{"position":"north"}}"#).await;

    assert!(b.recv_timeout(QUIET).await.is_none(), "Nothing should be relayed");
    let world = a.sync_world().await;
    assert_eq!(world.players.len(), 1);
}

#[tokio::test]
async fn test_unclean_disconnect_broadcasts_quit_once() {
    let url = start_test_server(test_config()).await;

    let a = join(&url, "a", "red").await;
    let mut b = join(&url, "b", "blue").await;

    // Drop without a close handshake.
    drop(a);

    match b.recv().await {
        ServerMsg::PlayerQuit(q) => {
            assert_eq!(q.player.id, 1);
            assert_eq!(q.player.name, "a");
        }
        other => panic!("Expected PlayerQuit, got {:?}", other),
    }
    while let Some(msg) = b.recv_timeout(QUIET).await {
        assert!(!mentions(&msg, 1), "Unexpected message about departed player: {:?}", msg);
    }

    let world = b.sync_world().await;
    assert!(world.players.is_empty());
}

#[tokio::test]
async fn test_clean_close_broadcasts_quit() {
    let url = start_test_server(test_config()).await;

    let mut a = join(&url, "a", "red").await;
    let mut b = join(&url, "b", "blue").await;
    expect_join(&mut a).await;

    a.ws.close(None).await.unwrap();

    match b.recv().await {
        ServerMsg::PlayerQuit(q) => assert_eq!(q.player.id, 1),
        other => panic!("Expected PlayerQuit, got {:?}", other),
    }
}

#[tokio::test]
async fn test_silent_client_is_timed_out_under_traffic() {
    let config = ServerConfig {
        ping_interval: Duration::from_millis(50),
        pong_timeout: Duration::from_millis(250),
        ..test_config()
    };
    let url = start_test_server(config).await;

    // `silent` is never polled again, so it never answers a ping.
    let mut silent = join(&url, "silent", "grey").await;
    let mut b = join(&url, "b", "blue").await;

    // `b` keeps chatting through the timeout window, so broadcasts to
    // `silent` race with its teardown.
    let mut quits = 0;
    let mut chats = 0;
    let mut sent = 0;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        b.send(&ClientMsg::ChatMessage(ChatMessageIn {
            message: format!("tick {}", sent),
        }))
        .await;
        sent += 1;
        while let Some(msg) = b.recv_timeout(Duration::from_millis(20)).await {
            match msg {
                ServerMsg::PlayerQuit(q) => {
                    assert_eq!(q.player.id, 1);
                    quits += 1;
                }
                ServerMsg::ChatMessage(c) => {
                    assert_eq!(c.player.id, 2);
                    chats += 1;
                }
                other => panic!("Unexpected message: {:?}", other),
            }
        }
    }
    assert_eq!(quits, 1, "Silent player should be torn down exactly once");
    assert!(chats > 0);

    // `b` kept answering pings and is still connected.
    let world = b.sync_world().await;
    assert!(world.players.is_empty());
    assert!(silent.is_disconnected().await);
}

#[tokio::test]
async fn test_slow_consumer_is_evicted_once() {
    let config = ServerConfig {
        send_queue_capacity: 32,
        write_timeout: Duration::from_millis(300),
        max_message_size: 64 * 1024,
        ..test_config()
    };
    let url = start_test_server(config).await;

    // `slow` stops reading after joining, so its socket buffers and then its
    // outbound queue fill up.
    let mut slow = join(&url, "slow", "grey").await;
    let mut reader = join(&url, "reader", "blue").await;
    let mut flooder = join(&url, "flooder", "red").await;
    assert_eq!(expect_join(&mut reader).await, 3);
    let slow_id = 1;

    let stop = Arc::new(AtomicBool::new(false));
    let flood = tokio::spawn({
        let stop = Arc::clone(&stop);
        async move {
            let animation = "w".repeat(16 * 1024);
            let mut i = 0;
            while !stop.load(Ordering::Relaxed) && i < 5000 {
                flooder
                    .send(&ClientMsg::MovePlayer(MovePlayerMsg {
                        position: vec3(i as f32, 0.0, 0.0),
                        rotation: vec3(0.0, 0.0, 0.0),
                        current_animation: animation.clone(),
                    }))
                    .await;
                i += 1;
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            flooder
        }
    });

    let mut quits = 0;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    while quits == 0 && tokio::time::Instant::now() < deadline {
        match reader.recv_timeout(Duration::from_millis(500)).await {
            Some(ServerMsg::PlayerQuit(q)) => {
                assert_eq!(q.player.id, slow_id);
                quits += 1;
            }
            Some(msg) => assert!(!mentions(&msg, slow_id), "Unexpected {:?}", msg),
            None => {}
        }
    }
    assert_eq!(quits, 1, "Slow consumer was never evicted");

    stop.store(true, Ordering::Relaxed);
    let _flooder = flood.await.unwrap();

    // Nothing about the evicted player follows its quit.
    while let Some(msg) = reader.recv_timeout(QUIET).await {
        assert!(!mentions(&msg, slow_id), "Unexpected {:?} after quit", msg);
    }
    let world = reader.sync_world().await;
    let ids: Vec<PlayerId> = world.players.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![3]);

    assert!(slow.is_disconnected().await);
}

#[tokio::test]
async fn test_oversized_message_disconnects_client() {
    let url = start_test_server(test_config()).await;
    let mut a = join(&url, "a", "red").await;
    let mut b = join(&url, "b", "blue").await;
    expect_join(&mut a).await;

    // Send a message over the 512 byte limit
    let huge = "x".repeat(2000);
    let msg = format!(r#"{{"name":"chatMessage","data":{{"message":"{}"}}}}"#, huge);
    let _ = a.ws.send(Message::Text(msg.into())).await;

    assert!(
        a.is_disconnected().await,
        "Client should be disconnected after oversized message"
    );
    match b.recv().await {
        ServerMsg::PlayerQuit(q) => assert_eq!(q.player.id, 1),
        other => panic!("Expected PlayerQuit, got {:?}", other),
    }
}

#[tokio::test]
async fn test_ids_are_not_reused() {
    let url = start_test_server(test_config()).await;

    let a = join(&url, "a", "red").await;
    let mut b = join(&url, "b", "blue").await;
    drop(a);
    match b.recv().await {
        ServerMsg::PlayerQuit(q) => assert_eq!(q.player.id, 1),
        other => panic!("Expected PlayerQuit, got {:?}", other),
    }

    let _c = join(&url, "c", "green").await;
    assert_eq!(expect_join(&mut b).await, 3);
}
