//! Quote Relay Binary
//!
//! Starts the upstream quote relay.
//!
//! # Usage
//!
//! ```bash
//! QUOTES_ENDPOINT=http://localhost:8081 cargo run --bin quote-relay
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `QUOTES_ENDPOINT`: Upstream base URL; the feed is read from `{endpoint}/quotes`
//!
//! ## Optional
//! - `QUOTE_RELAY_HTTP_PORT`: SSE feed port (default: 8080)
//! - `QUOTE_RELAY_HEALTH_PORT`: Health check and metrics port (default: 8082)
//! - `QUOTE_RELAY_BROADCAST_CAPACITY`: Broadcast ring size (default: 1024)
//! - `QUOTE_RELAY_CLIENT_BUFFER`: Per-client event buffer (default: 256)
//! - `QUOTE_RELAY_SSE_KEEPALIVE_SECS`: SSE keep-alive interval (default: 15)
//! - `QUOTE_RELAY_UPSTREAM_CONNECT_TIMEOUT_MS`: Upstream connect timeout (default: 10000)
//! - `QUOTE_RELAY_MAX_RECORD_BYTES`: Maximum upstream record size (default: 262144)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `OTEL_SERVICE_NAME`: Service name (default: quote-relay)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use quote_relay::infrastructure::telemetry;
use quote_relay::{
    FeedServer, FeedServerState, HealthServer, HealthServerState, HttpQuoteSource, QuoteRelay,
    QuoteSource, RelayConfig, RelayServiceConfig, UpstreamClientConfig, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let telemetry_guard = telemetry::init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        otlp = telemetry_guard.is_exporting(),
        "Starting Quote Relay"
    );

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    let config = RelayServiceConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    // Upstream source; nothing connects until the first client arrives
    let source = HttpQuoteSource::new(&UpstreamClientConfig::from_settings(&config.upstream))?;
    tracing::info!(url = %source.url(), "Upstream quote source configured");
    let source: Arc<dyn QuoteSource> = Arc::new(source);

    let relay = QuoteRelay::new(
        source,
        RelayConfig::from(config.broadcast),
        shutdown_token.clone(),
    );

    // Initialize health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        relay.clone(),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );

    // Initialize SSE feed server
    let feed_state = FeedServerState::new(relay, &config.server, &config.broadcast);
    let feed_server = FeedServer::new(
        config.server.http_port,
        feed_state,
        shutdown_token.clone(),
    );

    // Spawn health server
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    // Spawn feed server
    let feed_handle = tokio::spawn(async move {
        if let Err(e) = feed_server.run().await {
            tracing::error!(error = %e, "Feed server error");
        }
    });

    tracing::info!("Quote relay ready");

    await_shutdown(shutdown_token).await;

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, feed_handle)
        .await
        .is_err()
    {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Feed server did not stop in time"
        );
    }

    tracing::info!("Quote relay stopped");
    Ok(())
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &RelayServiceConfig) {
    tracing::info!(
        endpoint = %config.upstream.endpoint,
        http_port = config.server.http_port,
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        broadcast_capacity = config.broadcast.capacity,
        client_buffer = config.broadcast.client_buffer,
        keep_alive_secs = config.server.sse_keep_alive.as_secs(),
        connect_timeout_ms = config.upstream.connect_timeout.as_millis(),
        max_record_bytes = config.upstream.max_record_bytes,
        "Relay limits"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
