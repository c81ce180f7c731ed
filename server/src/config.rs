use std::time::Duration;

use crate::cli::CliArgs;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub maze_width: usize,
    pub maze_height: usize,
    /// Seed for maze generation. `None` draws from OS entropy.
    pub rng_seed: Option<u64>,
    /// Pending outbound messages per session before it counts as unresponsive.
    pub send_queue_capacity: usize,
    pub hub_queue_capacity: usize,
    /// Ping period. Must be shorter than `pong_timeout`.
    pub ping_interval: Duration,
    /// Time allowed between inbound frames (including pongs).
    pub pong_timeout: Duration,
    /// Time allowed to write one frame to the peer.
    pub write_timeout: Duration,
    /// Largest inbound message accepted, in bytes.
    pub max_message_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let pong_timeout = Duration::from_secs(60);
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            maze_width: 16,
            maze_height: 16,
            rng_seed: None,
            send_queue_capacity: 256,
            hub_queue_capacity: 256,
            ping_interval: pong_timeout * 9 / 10,
            pong_timeout,
            write_timeout: Duration::from_secs(10),
            max_message_size: 512,
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by command-line flags and `PORT`.
    pub fn from_args(args: &CliArgs) -> Self {
        Self {
            listen_addr: args.listen_addr(),
            maze_width: args.maze_width,
            maze_height: args.maze_height,
            rng_seed: args.seed,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.maze_width < 2 || self.maze_height < 2 {
            return Err(format!(
                "maze must be at least 2x2, got {}x{}",
                self.maze_width, self.maze_height
            ));
        }
        if self.send_queue_capacity == 0 || self.hub_queue_capacity == 0 {
            return Err("queue capacities must be > 0".to_string());
        }
        if self.ping_interval.is_zero() || self.ping_interval >= self.pong_timeout {
            return Err("ping_interval must be > 0 and shorter than pong_timeout".to_string());
        }
        if self.write_timeout.is_zero() {
            return Err("write_timeout must be > 0".to_string());
        }
        if self.max_message_size == 0 {
            return Err("max_message_size must be > 0".to_string());
        }
        Ok(())
    }
}
