//! Command-line flags for the server binary.

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "labyrinth-server", version, about = "Multiplayer maze sync server")]
pub struct CliArgs {
    /// HTTP service address. A leading `:` listens on all interfaces.
    #[arg(long, default_value = ":8080")]
    pub addr: String,

    /// Port to listen on all interfaces; replaces --addr when set
    #[arg(long, env = "PORT")]
    pub port: Option<u16>,

    #[arg(long, default_value_t = 16)]
    pub maze_width: usize,

    #[arg(long, default_value_t = 16)]
    pub maze_height: usize,

    /// Maze seed; random when omitted
    #[arg(long)]
    pub seed: Option<u64>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl CliArgs {
    /// Address to bind, with `PORT` taking precedence over `--addr`.
    pub fn listen_addr(&self) -> String {
        match self.port {
            Some(port) => format!("0.0.0.0:{}", port),
            None => normalize_addr(&self.addr),
        }
    }
}

/// `:8080` -> `0.0.0.0:8080`
fn normalize_addr(addr: &str) -> String {
    if addr.starts_with(':') {
        format!("0.0.0.0{}", addr)
    } else {
        addr.to_string()
    }
}
