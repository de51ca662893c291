#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::cast_precision_loss,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Quote Relay - Streaming Quote Multiplexer
//!
//! An HTTP service that keeps a single streaming connection to an upstream
//! quote feed and republishes every record to any number of browser
//! clients as server-sent events.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core relay types
//!   - `quote`: The relayed record, an open JSON object
//!   - `subscription`: Subscriber registry for the shared subscription
//!
//! - **Application**: Port definitions
//!   - `ports`: `QuoteSource` and its error taxonomy
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `upstream`: HTTP quote source and line-delimited JSON codec
//!   - `broadcast`: `QuoteRelay`, one upstream session fanned out to many
//!   - `http`: SSE feed server (`/quotes/feed`, `/quotes`)
//!   - `config`: Environment-driven configuration
//!   - `health`: Health, readiness and metrics endpoint
//!
//! # Data Flow
//!
//! ```text
//!                    ┌─────────────┐     ┌─────────────┐
//! Upstream feed ────►│ QuoteRelay  │────►│ SSE server  │──► Client 1
//! GET /quotes        │ (1 session) │     │ /quotes/feed│──► Client 2
//! stream+json        └─────────────┘     └─────────────┘──► Client N
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core relay types with no I/O.
pub mod domain;

/// Application layer - Port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::quote::Quote;
pub use domain::subscription::{ConsumerId, SubscriberRegistry, SubscriberStats};

// Ports
pub use application::ports::{QuoteSource, QuoteStream, SourceError};

// Infrastructure config
pub use infrastructure::config::{
    BroadcastSettings, ConfigError, RelayServiceConfig, ServerSettings, UpstreamSettings,
};

// Upstream adapter
pub use infrastructure::upstream::{
    ConnectionState, HttpQuoteSource, UpstreamClientConfig, UpstreamState,
};

// Relay (for integration tests)
pub use infrastructure::broadcast::{QuoteRelay, QuoteSubscription, RelayConfig, RelayStats};

// Feed server
pub use infrastructure::http::{FeedServer, FeedServerError, FeedServerState};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
