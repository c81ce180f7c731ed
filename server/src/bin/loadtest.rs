//! Load test for the labyrinth server.
//!
//! Spawns multiple fake WebSocket clients that:
//! - Connect to the server and request the world
//! - Periodically send movePlayer messages
//! - Receive and count update broadcasts
//!
//! Usage: cargo run --bin loadtest -- [OPTIONS]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use labyrinth_shared::protocol::{ClientMsg, MovePlayerMsg, ServerMsg};
use labyrinth_shared::vec3::vec3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio_tungstenite::{connect_async, tungstenite::Message};

#[derive(Parser, Debug)]
#[command(name = "loadtest", about = "Load test for the labyrinth server")]
struct Args {
    /// Number of clients to spawn
    #[arg(long, default_value_t = 100)]
    clients: u32,

    /// Test duration in seconds
    #[arg(long, default_value_t = 30)]
    duration: u64,

    /// movePlayer messages per second per client
    #[arg(long, default_value_t = 5.0)]
    move_rate: f64,

    /// Server URL
    #[arg(long, default_value = "ws://127.0.0.1:8080/ws")]
    url: String,
}

#[derive(Default)]
struct Metrics {
    connected: AtomicU64,
    frames_received: AtomicU64,
    messages_received: AtomicU64,
    updates_received: AtomicU64,
    joins_received: AtomicU64,
    quits_received: AtomicU64,
    moves_sent: AtomicU64,
    errors: AtomicU64,
    latency_sum_ms: AtomicU64,
    latency_count: AtomicU64,
}

impl Metrics {
    fn count_frame(&self, text: &str) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        // Frames may carry several messages, one per line.
        for line in text.lines() {
            self.messages_received.fetch_add(1, Ordering::Relaxed);
            match serde_json::from_str::<ServerMsg>(line) {
                Ok(ServerMsg::Update(_)) => {
                    self.updates_received.fetch_add(1, Ordering::Relaxed);
                }
                Ok(ServerMsg::PlayerJoin(_)) => {
                    self.joins_received.fetch_add(1, Ordering::Relaxed);
                }
                Ok(ServerMsg::PlayerQuit(_)) => {
                    self.quits_received.fetch_add(1, Ordering::Relaxed);
                }
                Ok(_) => {}
                Err(_) => {
                    self.errors.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }
}

fn encode(msg: &ClientMsg) -> Message {
    // ClientMsg only holds strings and floats, so encoding cannot fail.
    Message::Text(serde_json::to_string(msg).unwrap_or_default().into())
}

async fn run_client(
    client_id: u32,
    url: String,
    move_rate: f64,
    duration: Duration,
    metrics: Arc<Metrics>,
) {
    let connect_start = Instant::now();
    let color = client_id.wrapping_mul(2654435) % 0xffffff;
    let url = format!("{}?name=bot{}&color=%23{:06x}", url, client_id, color);

    let (mut ws, _) = match connect_async(&url).await {
        Ok(conn) => conn,
        Err(e) => {
            if client_id < 5 {
                eprintln!("Client {} failed to connect: {}", client_id, e);
            }
            metrics.errors.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };

    // The syncWorld reply means the hub has registered us.
    if ws.send(encode(&ClientMsg::SyncWorld)).await.is_err() {
        metrics.errors.fetch_add(1, Ordering::Relaxed);
        return;
    }
    let synced = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(msg) = ws.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    let text = text.as_str();
                    metrics.count_frame(text);
                    if text.contains("\"name\":\"syncWorld\"") {
                        return true;
                    }
                }
                Ok(Message::Close(_)) | Err(_) => return false,
                _ => {}
            }
        }
        false
    })
    .await;

    if !matches!(synced, Ok(true)) {
        if client_id < 3 {
            eprintln!("Client {} never received syncWorld", client_id);
        }
        metrics.errors.fetch_add(1, Ordering::Relaxed);
        return;
    }

    metrics
        .latency_sum_ms
        .fetch_add(connect_start.elapsed().as_millis() as u64, Ordering::Relaxed);
    metrics.latency_count.fetch_add(1, Ordering::Relaxed);
    metrics.connected.fetch_add(1, Ordering::Relaxed);

    let move_interval = if move_rate > 0.0 {
        Duration::from_secs_f64(1.0 / move_rate)
    } else {
        Duration::from_secs(3600)
    };
    let mut move_timer = tokio::time::interval(move_interval);
    move_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let mut rng = ChaCha8Rng::seed_from_u64(client_id as u64);
    let mut position = vec3(1.0, 0.0, 0.0);
    let test_end = tokio::time::Instant::now() + duration;

    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(test_end) => break,

            _ = move_timer.tick() => {
                position.x += rng.gen_range(-0.5..0.5);
                position.z += rng.gen_range(-0.5..0.5);
                let msg = ClientMsg::MovePlayer(MovePlayerMsg {
                    position,
                    rotation: vec3(0.0, rng.gen_range(0.0..std::f32::consts::TAU), 0.0),
                    current_animation: "Walk".to_string(),
                });
                if ws.send(encode(&msg)).await.is_ok() {
                    metrics.moves_sent.fetch_add(1, Ordering::Relaxed);
                } else {
                    metrics.errors.fetch_add(1, Ordering::Relaxed);
                    break;
                }
            }

            msg = ws.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => metrics.count_frame(text.as_str()),
                    Some(Ok(Message::Close(frame))) => {
                        if client_id < 3 {
                            eprintln!("Client {} got Close: {:?}", client_id, frame);
                        }
                        break;
                    }
                    None => break,
                    Some(Err(e)) => {
                        if client_id < 3 {
                            eprintln!("Client {} error: {}", client_id, e);
                        }
                        metrics.errors.fetch_add(1, Ordering::Relaxed);
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    let _ = ws.close(None).await;
    metrics.connected.fetch_sub(1, Ordering::Relaxed);
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    println!("=== Labyrinth Server Load Test ===");
    println!("Clients: {}", args.clients);
    println!("Duration: {}s", args.duration);
    println!("Move rate: {}/s per client", args.move_rate);
    println!("URL: {}", args.url);
    println!();

    let metrics = Arc::new(Metrics::default());
    let duration = Duration::from_secs(args.duration);

    let mut handles = Vec::with_capacity(args.clients as usize);
    println!("Spawning {} clients...", args.clients);
    let spawn_start = Instant::now();

    for client_id in 0..args.clients {
        let url = args.url.clone();
        let metrics = Arc::clone(&metrics);
        handles.push(tokio::spawn(run_client(client_id, url, args.move_rate, duration, metrics)));

        // Stagger spawns slightly to avoid thundering herd
        if client_id % 50 == 49 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    println!("All clients spawned in {:?}", spawn_start.elapsed());
    println!();

    let stats_metrics = Arc::clone(&metrics);
    let stats_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));
        let start = Instant::now();
        loop {
            interval.tick().await;
            println!(
                "[{:3}s] connected={}, frames={}, msgs={}, updates={}, moves={}, errors={}",
                start.elapsed().as_secs(),
                stats_metrics.connected.load(Ordering::Relaxed),
                stats_metrics.frames_received.load(Ordering::Relaxed),
                stats_metrics.messages_received.load(Ordering::Relaxed),
                stats_metrics.updates_received.load(Ordering::Relaxed),
                stats_metrics.moves_sent.load(Ordering::Relaxed),
                stats_metrics.errors.load(Ordering::Relaxed),
            );
        }
    });

    for handle in handles {
        let _ = handle.await;
    }
    stats_handle.abort();

    println!();
    println!("=== Final Results ===");
    let frames = metrics.frames_received.load(Ordering::Relaxed);
    let msgs = metrics.messages_received.load(Ordering::Relaxed);
    let updates = metrics.updates_received.load(Ordering::Relaxed);
    let moves = metrics.moves_sent.load(Ordering::Relaxed);
    let latency_sum = metrics.latency_sum_ms.load(Ordering::Relaxed);
    let latency_count = metrics.latency_count.load(Ordering::Relaxed);

    println!("Total frames received: {}", frames);
    println!("Total messages received: {}", msgs);
    println!("Total update messages: {}", updates);
    println!("Total playerJoin messages: {}", metrics.joins_received.load(Ordering::Relaxed));
    println!("Total playerQuit messages: {}", metrics.quits_received.load(Ordering::Relaxed));
    println!("Total movePlayer sent: {}", moves);
    println!("Total errors: {}", metrics.errors.load(Ordering::Relaxed));
    if latency_count > 0 {
        println!("Average time to syncWorld: {}ms", latency_sum / latency_count);
    }
    if frames > 0 {
        println!("Messages per frame: {:.2}", msgs as f64 / frames as f64);
    }

    // Every move should reach every other client once.
    let expected = moves * u64::from(args.clients.saturating_sub(1));
    println!();
    println!("Messages/sec (total): {:.0}", msgs as f64 / args.duration.max(1) as f64);
    println!("Expected updates: {}", expected);
    if expected > 0 {
        println!("Delivery rate: {:.1}%", updates as f64 / expected as f64 * 100.0);
    }
}
