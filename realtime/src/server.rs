//! HTTP server and component wiring.
//!
//! Builds the connection manager, batcher and publishers from a
//! [`FeedConfig`] and serves `/ws`, `/metrics` and `/health`.

use std::future::Future;
use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::AuthValidator;
use crate::batcher::MessageBatcher;
use crate::clock::Clock;
use crate::config::{ConfigError, FeedConfig};
use crate::publishers::Publishers;
use crate::rate_limiter::RateLimiter;
use crate::store::DataStore;
use crate::ws::handler::{ws_handler, WsState};
use crate::ws::manager::ConnectionManager;
use crate::ws::metrics::MetricsCollector;

/// Creates the HTTP router.
pub fn create_router(state: WsState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Metrics snapshot handler.
async fn metrics_handler(State(state): State<WsState>) -> impl IntoResponse {
    Json(state.metrics.get_metrics())
}

/// Health check handler.
async fn health_handler(State(state): State<WsState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "connections": state.manager.connection_count().await,
        "subscriptions": state.manager.total_subscriptions().await,
    }))
}

/// The realtime server.
#[derive(Debug)]
pub struct Server {
    config: FeedConfig,
    state: WsState,
    rate_limiter: Arc<RateLimiter>,
    batcher: Arc<MessageBatcher>,
    publishers: Publishers,
}

impl Server {
    /// Wires every component from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(
        config: FeedConfig,
        store: Arc<dyn DataStore>,
        auth: Arc<dyn AuthValidator>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let metrics = Arc::new(MetricsCollector::new(
            config.latency_capacity,
            Arc::clone(&clock),
        ));
        let rate_limiter = Arc::new(RateLimiter::new(
            config.rate_limit_max_requests,
            config.rate_limit_window(),
            Arc::clone(&clock),
        ));
        let manager = Arc::new(ConnectionManager::new(
            Arc::clone(&rate_limiter),
            auth,
            metrics,
            Arc::clone(&clock),
        ));
        let batcher = Arc::new(MessageBatcher::from_config(
            &config,
            Arc::clone(&manager),
            Arc::clone(&clock),
        ));
        let publishers = Publishers::new(
            store,
            Arc::clone(&manager),
            Some(Arc::clone(&batcher)),
            clock,
        );
        let state = WsState::new(manager).with_client_buffer(config.client_buffer_size);

        Ok(Self {
            config,
            state,
            rate_limiter,
            batcher,
            publishers,
        })
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &FeedConfig {
        &self.config
    }

    /// Returns the shared WebSocket state.
    #[must_use]
    pub const fn state(&self) -> &WsState {
        &self.state
    }

    /// Returns the domain publishers.
    #[must_use]
    pub const fn publishers(&self) -> &Publishers {
        &self.publishers
    }

    /// Returns the message batcher.
    #[must_use]
    pub fn batcher(&self) -> Arc<MessageBatcher> {
        Arc::clone(&self.batcher)
    }

    /// Returns the HTTP router.
    #[must_use]
    pub fn router(&self) -> Router {
        create_router(self.state.clone())
    }

    /// Starts the background tasks and serves until `shutdown` resolves.
    ///
    /// Pending batches are flushed before returning.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound or the server fails.
    pub async fn run<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.config.bind_address();
        let listener = TcpListener::bind(&addr).await?;

        self.batcher.start();
        self.publishers
            .market
            .start_periodic_updates(self.config.publish_interval());
        let cleanup = self.rate_limiter.spawn_cleanup(std::time::Duration::from_millis(
            self.config.rate_limit_cleanup_ms,
        ));

        info!("Realtime server listening on {}", addr);

        let result = axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown)
            .await;

        info!("Shutting down background tasks");
        self.publishers.market.stop();
        cleanup.abort();
        let flushed = self.batcher.stop().await;
        info!(flushed, "Realtime server stopped");

        result
    }
}
