//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize subsystems in dependency order
//! - Bind the listener and begin accepting traffic
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listener binds last (traffic only when ready)

use thiserror::Error;
use tokio::net::TcpListener;

use crate::calendar::EmptyResourceKey;
use crate::config::{ConfigError, ProxyConfig};
use crate::extract::ExtractError;
use crate::http::HttpServer;
use crate::lifecycle::{signals, Shutdown};
use crate::observability::metrics;

/// Errors that abort process startup.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid resource key: {0}")]
    ResourceKey(#[from] EmptyResourceKey),

    #[error("extractor setup failed: {0}")]
    Extractor(#[from] ExtractError),

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },

    #[error("invalid metrics address '{address}': {source}")]
    MetricsAddress {
        address: String,
        source: std::net::AddrParseError,
    },

    #[error("metrics exporter failed: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Start the proxy and serve until a shutdown signal arrives.
pub async fn start(config: ProxyConfig) -> Result<(), StartupError> {
    tracing::info!(
        bind_address = %config.listener.bind_address,
        upstream = %config.upstream.base_url,
        key = %config.upstream.resource_key,
        extract_timeout_secs = config.timeouts.extract_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        let address = &config.observability.metrics_address;
        let addr = address
            .parse()
            .map_err(|source| StartupError::MetricsAddress {
                address: address.clone(),
                source,
            })?;
        metrics::init_metrics(addr)?;
    }

    let server = HttpServer::new(config)?;

    let address = server.config().listener.bind_address.clone();
    let listener = TcpListener::bind(&address)
        .await
        .map_err(|source| StartupError::Bind { address, source })?;

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        signals::shutdown_signal().await;
        shutdown.trigger();
    });

    server.run(listener, server_shutdown).await.map_err(StartupError::Serve)
}
