use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use stardeck::cli::{Cli, Commands};
use stardeck::config::Config;
use stardeck::handlers::SharedStorage;
use stardeck::storage::{MemoryStore, RedisStore};

#[tokio::main]
async fn main() {
    // Default to INFO level if RUST_LOG is not set
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    // Check if running as watch client
    if let Some(Commands::Watch { url, sheet }) = cli.command {
        if let Err(e) = stardeck::cli::run_watch_client(url, sheet).await {
            error!("watch client error: {}", e);
            std::process::exit(1);
        }
        return;
    }

    // Otherwise, run as server
    let config = Config::from_env();
    info!("starting stardeck sheet server on port {}", config.port);

    let storage: SharedStorage = match &config.redis_url {
        Some(url) => {
            info!("redis url: {}", url);
            match RedisStore::connect(url).await {
                Ok(store) => Arc::new(store),
                Err(e) => {
                    error!("failed to connect to redis: {}", e);
                    std::process::exit(1);
                }
            }
        }
        None => {
            info!("REDIS_URL not set; sheets will live in memory only");
            Arc::new(MemoryStore::new())
        }
    };

    let app = stardeck::router(storage);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind to address");

    info!("stardeck listening on {}", addr);

    axum::serve(listener, app)
        .await
        .expect("failed to start server");
}
