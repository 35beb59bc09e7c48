//! Marketwire realtime server binary.
//!
//! Entry point for the WebSocket market data server.

use std::env;
use std::sync::Arc;

use anyhow::Context;
use marketwire_realtime::{
    Clock, DataStore, FeedConfig, MemoryStore, PgStore, Server, StaticTokenValidator, SystemClock,
};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,marketwire_realtime=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = FeedConfig::from_env().context("invalid configuration")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let auth = StaticTokenValidator::from_list(
        &env::var("MARKETWIRE_AUTH_TOKENS").unwrap_or_default(),
    )
    .with_clock(Arc::clone(&clock));
    if auth.is_empty() {
        warn!("MARKETWIRE_AUTH_TOKENS is empty; every authentication will fail");
    }

    let store: Arc<dyn DataStore> = match &config.database_url {
        Some(url) => Arc::new(
            PgStore::connect(url)
                .await
                .context("failed to connect to database")?,
        ),
        None => {
            info!("DATABASE_URL not set, using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    info!(
        "Starting Marketwire realtime server on {}",
        config.bind_address()
    );

    let server = Server::new(config, store, Arc::new(auth), clock)?;
    server.run(shutdown_signal()).await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C"),
        () = terminate => info!("Received terminate signal"),
    }
}
