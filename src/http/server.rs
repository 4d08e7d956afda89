//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router owned by this server instance
//! - Wire up middleware (request ID, tracing, metrics, timeout, request gate)
//! - Bind server to listener
//! - Graceful shutdown on the lifecycle broadcast

use std::sync::Arc;
use std::time::Duration;

use axum::{middleware, routing::any, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::calendar::ResourceKey;
use crate::config::ProxyConfig;
use crate::extract::RaplaExtractor;
use crate::http::gate::require_get;
use crate::http::pipeline::{calendar_handler, AppState};
use crate::http::request::{propagate_request_id_layer, set_request_id_layer, track_requests};
use crate::lifecycle::startup::StartupError;

/// HTTP server for the calendar proxy.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
}

impl HttpServer {
    /// Create a server backed by the Rapla extractor.
    pub fn new(config: ProxyConfig) -> Result<Self, StartupError> {
        let resource_key = ResourceKey::new(config.upstream.resource_key.as_str())?;
        let extractor = Arc::new(RaplaExtractor::new(&config.upstream, &config.timeouts)?);
        let state = AppState::new(
            extractor,
            resource_key,
            Duration::from_secs(config.timeouts.extract_secs),
        );
        Ok(Self::with_state(config, state))
    }

    /// Create a server with explicit collaborators.
    pub fn with_state(config: ProxyConfig, state: AppState) -> Self {
        let router = Self::build_router(&config, state);
        Self { router, config }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    pub fn build_router(config: &ProxyConfig, state: AppState) -> Router {
        Router::new()
            .route("/", any(calendar_handler))
            .route_layer(middleware::from_fn(require_get))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(set_request_id_layer())
                    .layer(TraceLayer::new_for_http())
                    .layer(middleware::from_fn(track_requests))
                    .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
                    .layer(propagate_request_id_layer()),
            )
    }

    /// Run the server, accepting connections on the given listener until
    /// `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            key = %self.config.upstream.resource_key,
            "HTTP server starting"
        );

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }
}
