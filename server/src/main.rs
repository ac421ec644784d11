use clap::Parser;
use log::{error, info};
use server::config::ServerConfig;
use server::server::Server;
use server::storage::FileLevelStorage;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Main-method of the application.
/// Loads the configuration, applies command-line overrides, then serves until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Path to the TOML configuration file
        #[clap(short, long, default_value = "server.toml")]
        config: PathBuf,
        /// Server IP address to bind to
        #[clap(short = 'H', long)]
        host: Option<String>,
        /// Server port to listen on
        #[clap(short, long)]
        port: Option<u16>,
        /// Maximum number of players
        #[clap(short, long)]
        max_players: Option<usize>,
        /// World tick rate (updates per second)
        #[clap(short, long)]
        tick_rate: Option<u32>,
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = ServerConfig::load(&args.config)?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(max_players) = args.max_players {
        config.max_players = max_players;
    }
    if let Some(tick_rate) = args.tick_rate {
        config.tick_interval_ms = 1000 / u64::from(tick_rate.max(1));
    }

    let listener = TcpListener::bind(config.bind_address()).await?;
    let storage = Arc::new(FileLevelStorage::new(&config.level_dir));
    let server = Server::new(config, storage);

    // Stop serving on Ctrl+C; serve() then saves and disconnects everyone
    {
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received Ctrl+C, shutting down gracefully...");
                    server.shutdown();
                }
                Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
            }
        });
    }

    server.serve(listener).await?;
    Ok(())
}
