//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - `QuoteSource`: opens the upstream quote stream. The HTTP adapter lives
//!   in `infrastructure::upstream`; tests plug in channel-backed sources.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::domain::quote::Quote;

/// Lazily produced sequence of upstream quotes, in arrival order.
///
/// An `Err` item is terminal: the stream yields nothing after it.
pub type QuoteStream = BoxStream<'static, Result<Quote, SourceError>>;

/// Upstream quote source.
#[async_trait]
pub trait QuoteSource: Send + Sync + 'static {
    /// Open a new upstream stream.
    ///
    /// Every call opens a fresh connection. The relay never holds more than
    /// one open stream at a time.
    ///
    /// # Errors
    ///
    /// Returns `SourceError` if the connection cannot be established or the
    /// upstream rejects the request.
    async fn open(&self) -> Result<QuoteStream, SourceError>;

    /// Human readable description of the upstream, for logs.
    fn describe(&self) -> String;
}

/// Upstream failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    /// Connection could not be established (DNS, connect, TLS).
    #[error("upstream connection failed: {0}")]
    Connect(String),

    /// Upstream answered with a non-success status.
    #[error("upstream {url} returned status {status}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Requested URL.
        url: String,
    },

    /// Connection broke while reading the body.
    #[error("upstream transport error: {0}")]
    Transport(String),

    /// A record could not be decoded.
    #[error("upstream record decode failed: {0}")]
    Decode(String),

    /// The configured endpoint is not a usable URL.
    #[error("invalid upstream endpoint: {0}")]
    InvalidEndpoint(String),
}

impl SourceError {
    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::Status { .. } => "status",
            Self::Transport(_) => "transport",
            Self::Decode(_) => "decode",
            Self::InvalidEndpoint(_) => "endpoint",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(SourceError::Connect("x".into()).kind(), "connect");
        assert_eq!(
            SourceError::Status {
                status: 503,
                url: "http://u/quotes".into()
            }
            .kind(),
            "status"
        );
        assert_eq!(SourceError::Transport("x".into()).kind(), "transport");
        assert_eq!(SourceError::Decode("x".into()).kind(), "decode");
        assert_eq!(SourceError::InvalidEndpoint("x".into()).kind(), "endpoint");
    }

    #[test]
    fn status_message_names_url() {
        let err = SourceError::Status {
            status: 404,
            url: "http://upstream/quotes".into(),
        };
        assert_eq!(
            err.to_string(),
            "upstream http://upstream/quotes returned status 404"
        );
    }
}
