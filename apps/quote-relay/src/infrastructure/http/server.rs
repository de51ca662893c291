//! SSE Feed Server Implementation
//!
//! # Endpoints
//!
//! - `GET /quotes/feed` - `text/event-stream`, one event per quote
//! - `GET /quotes` - the quotes view identifier as plain text

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    Router,
    extract::State,
    response::sse::{Event, KeepAlive, KeepAliveStream, Sse},
    routing::get,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::infrastructure::broadcast::QuoteRelay;
use crate::infrastructure::config::{BroadcastSettings, ServerSettings};
use crate::infrastructure::metrics;

/// Identifier returned by `GET /quotes`.
pub const QUOTES_VIEW: &str = "quotes";

type EventStream = ReceiverStream<Result<Event, Infallible>>;

// =============================================================================
// Server State
// =============================================================================

/// State shared by the feed handlers.
#[derive(Debug, Clone)]
pub struct FeedServerState {
    /// Shared upstream relay.
    pub relay: QuoteRelay,
    /// Interval between keep-alive comments on idle streams.
    pub keep_alive: Duration,
    /// Events buffered per client before the forwarding task waits.
    pub client_buffer: usize,
}

impl FeedServerState {
    /// Create state from server and broadcast settings.
    #[must_use]
    pub fn new(relay: QuoteRelay, server: &ServerSettings, broadcast: &BroadcastSettings) -> Self {
        Self {
            relay,
            keep_alive: server.sse_keep_alive,
            client_buffer: broadcast.client_buffer.max(1),
        }
    }
}

/// Build the feed router.
pub fn router(state: FeedServerState) -> Router {
    Router::new()
        .route("/quotes/feed", get(quote_feed_handler))
        .route("/quotes", get(quotes_view_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// Feed Server
// =============================================================================

/// SSE feed HTTP server.
pub struct FeedServer {
    port: u16,
    state: FeedServerState,
    cancel: CancellationToken,
}

impl FeedServer {
    /// Create a new feed server.
    #[must_use]
    pub const fn new(port: u16, state: FeedServerState, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Bind `0.0.0.0:port` and serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `FeedServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), FeedServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| FeedServerError::BindFailed(self.port, e.to_string()))?;

        self.serve(listener).await
    }

    /// Serve on an already bound listener until cancelled.
    ///
    /// Open feeds end once the relay's shutdown token fires, which lets the
    /// graceful shutdown complete.
    ///
    /// # Errors
    ///
    /// Returns `FeedServerError::ServerFailed` on a fatal server error.
    pub async fn serve(self, listener: TcpListener) -> Result<(), FeedServerError> {
        let local_addr = listener.local_addr().ok();
        tracing::info!(addr = ?local_addr, "Feed server listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| FeedServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Feed server stopped");
        Ok(())
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn quotes_view_handler() -> &'static str {
    QUOTES_VIEW
}

async fn quote_feed_handler(
    State(state): State<FeedServerState>,
) -> Sse<KeepAliveStream<EventStream>> {
    let mut subscription = state.relay.subscribe();
    let consumer_id = subscription.consumer_id();
    let (tx, rx) = mpsc::channel(state.client_buffer);

    tokio::spawn(async move {
        let mut sent: u64 = 0;

        loop {
            let quote = tokio::select! {
                () = tx.closed() => {
                    tracing::debug!(consumer_id, sent, "Feed client disconnected");
                    break;
                }
                next = subscription.recv() => match next {
                    Some(quote) => quote,
                    None => {
                        tracing::debug!(consumer_id, sent, "Upstream session ended, closing feed");
                        break;
                    }
                },
            };

            let event = match Event::default().json_data(&*quote) {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(consumer_id, error = %e, "Failed to serialize quote");
                    continue;
                }
            };

            if tx.send(Ok(event)).await.is_err() {
                tracing::debug!(consumer_id, sent, "Feed client went away");
                break;
            }
            sent += 1;
            metrics::record_quote_sent();
        }

        drop(subscription);
    });

    Sse::new(ReceiverStream::new(rx)).keep_alive(KeepAlive::new().interval(state.keep_alive))
}

// =============================================================================
// Errors
// =============================================================================

/// Feed server errors.
#[derive(Debug, thiserror::Error)]
pub enum FeedServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================
