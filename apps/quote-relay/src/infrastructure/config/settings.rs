//! Relay Configuration Settings
//!
//! Configuration types for the quote relay, loaded from environment variables.

use std::time::Duration;

use reqwest::Url;

use crate::infrastructure::upstream::DEFAULT_MAX_RECORD_BYTES;

/// Environment variable holding the upstream base URL.
pub const QUOTES_ENDPOINT_VAR: &str = "QUOTES_ENDPOINT";

/// Upstream feed settings.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    /// Upstream base URL; the stream is read from `{endpoint}/quotes`.
    pub endpoint: String,
    /// Connection establishment timeout.
    pub connect_timeout: Duration,
    /// Maximum size of one upstream record.
    pub max_record_bytes: usize,
}

impl UpstreamSettings {
    /// Settings for the given endpoint with default limits.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            connect_timeout: Duration::from_secs(10),
            max_record_bytes: DEFAULT_MAX_RECORD_BYTES,
        }
    }
}

/// Broadcast channel settings.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastSettings {
    /// Capacity of the quote broadcast channel.
    pub capacity: usize,
    /// Per-client buffer of serialized events waiting to be written.
    pub client_buffer: usize,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            capacity: 1024,
            client_buffer: 256,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// SSE feed HTTP port.
    pub http_port: u16,
    /// Health check HTTP port.
    pub health_port: u16,
    /// Interval between SSE keep-alive comments.
    pub sse_keep_alive: Duration,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            http_port: 8080,
            health_port: 8082,
            sse_keep_alive: Duration::from_secs(15),
        }
    }
}

/// Complete relay configuration.
#[derive(Debug, Clone)]
pub struct RelayServiceConfig {
    /// Upstream feed settings.
    pub upstream: UpstreamSettings,
    /// Server port settings.
    pub server: ServerSettings,
    /// Broadcast channel settings.
    pub broadcast: BroadcastSettings,
}

impl RelayServiceConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `QUOTES_ENDPOINT` is missing, empty, or not an
    /// absolute URL.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let endpoint = lookup(QUOTES_ENDPOINT_VAR)
            .ok_or_else(|| ConfigError::MissingEnvVar(QUOTES_ENDPOINT_VAR.to_string()))?;
        let endpoint = endpoint.trim().to_string();

        if endpoint.is_empty() {
            return Err(ConfigError::EmptyValue(QUOTES_ENDPOINT_VAR.to_string()));
        }

        Url::parse(&endpoint).map_err(|e| ConfigError::InvalidUrl {
            key: QUOTES_ENDPOINT_VAR.to_string(),
            reason: e.to_string(),
        })?;

        let upstream_defaults = UpstreamSettings::new(String::new());
        let upstream = UpstreamSettings {
            endpoint,
            connect_timeout: parse_duration_millis(
                &lookup,
                "QUOTE_RELAY_UPSTREAM_CONNECT_TIMEOUT_MS",
                upstream_defaults.connect_timeout,
            ),
            max_record_bytes: parse_or(
                &lookup,
                "QUOTE_RELAY_MAX_RECORD_BYTES",
                upstream_defaults.max_record_bytes,
            ),
        };

        let server = ServerSettings {
            http_port: parse_or(
                &lookup,
                "QUOTE_RELAY_HTTP_PORT",
                ServerSettings::default().http_port,
            ),
            health_port: parse_or(
                &lookup,
                "QUOTE_RELAY_HEALTH_PORT",
                ServerSettings::default().health_port,
            ),
            sse_keep_alive: parse_duration_secs(
                &lookup,
                "QUOTE_RELAY_SSE_KEEPALIVE_SECS",
                ServerSettings::default().sse_keep_alive,
            ),
        };

        let broadcast = BroadcastSettings {
            capacity: parse_nonzero(
                &lookup,
                "QUOTE_RELAY_BROADCAST_CAPACITY",
                BroadcastSettings::default().capacity,
            ),
            client_buffer: parse_nonzero(
                &lookup,
                "QUOTE_RELAY_CLIENT_BUFFER",
                BroadcastSettings::default().client_buffer,
            ),
        };

        Ok(Self {
            upstream,
            server,
            broadcast,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable is not a valid URL.
    #[error("environment variable {key} is not a valid URL: {reason}")]
    InvalidUrl {
        /// Variable name.
        key: String,
        /// Parser message.
        reason: String,
    },
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

// Broadcast channels panic on zero capacity and mpsc on zero buffer.
fn parse_nonzero<F>(lookup: &F, key: &str, default: usize) -> usize
where
    F: Fn(&str) -> Option<String>,
{
    match parse_or(lookup, key, default) {
        0 => default,
        n => n,
    }
}

fn parse_duration_secs<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_duration_millis<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
