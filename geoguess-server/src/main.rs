use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use geoguess_core::{AgentSimulator, CityCatalog, GameEventBus, GameEventHandler};
use geoguess_persistence::{GameRepository, connect_and_migrate};
use geoguess_server::{
    config::Config, create_routes, game_manager::GameManager, websocket::ConnectionManager,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting GeoGuess server...");

    let config = Config::new();
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        std::process::exit(1);
    }

    let catalog = match &config.cities_file {
        Some(path) => match CityCatalog::load(path) {
            Ok(catalog) => catalog,
            Err(e) => {
                error!("Failed to load cities from '{}': {:#}", path, e);
                std::process::exit(1);
            }
        },
        None => CityCatalog::builtin(),
    };
    if catalog.is_empty() {
        error!("City catalog is empty, no round could ever start");
        std::process::exit(1);
    }
    info!("Loaded {} cities", catalog.len());

    let db = match connect_and_migrate(&config.database_url).await {
        Ok(db) => db,
        Err(e) => {
            error!("Failed to connect to database and run migrations: {:#}", e);
            std::process::exit(1);
        }
    };

    let connection_manager = Arc::new(ConnectionManager::new());
    let mut event_bus = GameEventBus::new();
    event_bus.add_handler(connection_manager.clone() as Arc<dyn GameEventHandler>);

    let game_manager = Arc::new(GameManager::new(
        Arc::new(GameRepository::new(db)),
        Arc::new(catalog),
        Arc::new(AgentSimulator::new(None)),
        event_bus,
        config.manager_config(),
    ));

    let routes = create_routes(connection_manager.clone(), game_manager.clone());

    let cleanup_connection_manager = connection_manager.clone();
    let cleanup_game_manager = game_manager.clone();
    let connection_timeout = config.connection_timeout();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        loop {
            interval.tick().await;
            cleanup_connection_manager.cleanup_inactive_connections(connection_timeout);
            let evicted = cleanup_game_manager.cleanup_games().await;
            if evicted > 0 {
                info!(
                    "Evicted {} games, {} still active",
                    evicted,
                    cleanup_game_manager.active_game_count().await
                );
            }
        }
    });

    let addr: std::net::IpAddr = match config.host.parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!("Invalid HOST '{}': {}", config.host, e);
            std::process::exit(1);
        }
    };

    info!("Server starting on {}:{}", config.host, config.port);

    let (addr, server) =
        warp::serve(routes).bind_with_graceful_shutdown((addr, config.port), async {
            #[cfg(unix)]
            {
                let mut sigint = match signal::unix::signal(signal::unix::SignalKind::interrupt()) {
                    Ok(stream) => stream,
                    Err(e) => {
                        error!("Failed to listen for SIGINT: {}", e);
                        return;
                    }
                };
                let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(stream) => stream,
                    Err(e) => {
                        error!("Failed to listen for SIGTERM: {}", e);
                        return;
                    }
                };

                tokio::select! {
                    _ = sigint.recv() => {
                        info!("Received SIGINT, shutting down gracefully...");
                    }
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, shutting down gracefully...");
                    }
                }
            }

            #[cfg(not(unix))]
            {
                if let Err(e) = signal::ctrl_c().await {
                    error!("Failed to listen for ctrl+c: {}", e);
                    return;
                }
                info!("Received Ctrl+C, shutting down gracefully...");
            }
        });

    info!("Server started successfully on {}. Press Ctrl+C to stop.", addr);
    server.await;
    info!("Server shutdown complete.");
}
