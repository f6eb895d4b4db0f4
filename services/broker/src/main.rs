use broker::config::BrokerConfig;
use broker::secrets::EnvSecrets;
use broker::state::AppState;
use ov_store::SqliteStore;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "broker starting");

    let config = match BrokerConfig::load(&EnvSecrets) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: failed to load config: {e}");
            std::process::exit(1);
        }
    };

    let store = match SqliteStore::open(&config.store_path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            eprintln!("FATAL: failed to open store: {e}");
            std::process::exit(1);
        }
    };

    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(config, store);

    // No sessions survive a restart; tenants still marked live are
    // corrected lazily by the room multiplexer's stale-live check on join.

    let router = broker::build_router(state.clone());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("failed to bind");
    info!(addr = %bind_addr, "broker listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // Intake has stopped; close the chat and upstream sessions cleanly.
    state.supervisor.shutdown_all().await;
    info!("broker shut down gracefully");
}

/// Waits for SIGTERM or Ctrl-C (SIGINT) and returns to trigger graceful shutdown.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
