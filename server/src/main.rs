use clap::Parser;
use labyrinth_server::cli::CliArgs;
use labyrinth_server::config::ServerConfig;
use labyrinth_server::hub::{spawn_hub, Hub};
use labyrinth_server::logging;
use labyrinth_server::ws::{router, AppState};

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();
    logging::init(&args.log_level);

    let config = ServerConfig::from_args(&args);

    // Validate configuration before starting
    if let Err(e) = config.validate() {
        eprintln!("Invalid server configuration: {}", e);
        std::process::exit(1);
    }

    // The maze is generated once and served for the lifetime of the process.
    let hub = match Hub::new(&config) {
        Ok(hub) => hub,
        Err(e) => {
            tracing::error!(error = %e, "Failed to generate maze");
            std::process::exit(1);
        }
    };
    let hub_handle = spawn_hub(hub, config.hub_queue_capacity);

    let app = router(AppState::new(hub_handle, &config));

    tracing::info!("Starting labyrinth server on {}", config.listen_addr);
    println!("Server running at: http://{}", config.listen_addr);

    let listener = match tokio::net::TcpListener::bind(&config.listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(error = %e, addr = %config.listen_addr, "Failed to bind");
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "Server error");
        std::process::exit(1);
    }
}
