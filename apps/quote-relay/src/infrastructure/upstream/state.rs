//! Upstream Connection State
//!
//! Observable status of the shared upstream connection. Written by the relay
//! session task, read by the health endpoint.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

/// Connection state of the shared upstream subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No session running (no subscribers yet, or all left).
    #[default]
    Idle,
    /// Session started, request in flight.
    Connecting,
    /// Upstream responded and records are flowing.
    Connected,
    /// Last session ended with an error.
    Failed,
}

impl ConnectionState {
    /// State name used in health responses.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Failed => "failed",
        }
    }
}

/// Tracks the state of the upstream feed connection.
#[derive(Debug, Default)]
pub struct UpstreamState {
    state: RwLock<ConnectionState>,
    last_connected_at: RwLock<Option<DateTime<Utc>>>,
    error_message: RwLock<Option<String>>,
    sessions_started: AtomicU64,
    quotes_received: AtomicU64,
}

impl UpstreamState {
    /// Create a new state tracker in `Idle`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connection state.
    pub fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
        if state == ConnectionState::Connected {
            *self.last_connected_at.write() = Some(Utc::now());
            *self.error_message.write() = None;
        }
    }

    /// Record a failed session.
    pub fn set_error(&self, message: String) {
        *self.state.write() = ConnectionState::Failed;
        *self.error_message.write() = Some(message);
    }

    /// Record a new session start.
    pub fn increment_sessions(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one received quote.
    pub fn increment_quotes(&self) {
        self.quotes_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Current connection state.
    #[must_use]
    pub fn get_state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Time of the last successful connect.
    #[must_use]
    pub fn last_connected_at(&self) -> Option<DateTime<Utc>> {
        *self.last_connected_at.read()
    }

    /// Message of the last failure, cleared on reconnect.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.error_message.read().clone()
    }

    /// Sessions started since startup.
    #[must_use]
    pub fn get_sessions_started(&self) -> u64 {
        self.sessions_started.load(Ordering::Relaxed)
    }

    /// Quotes received since startup.
    #[must_use]
    pub fn get_quotes_received(&self) -> u64 {
        self.quotes_received.load(Ordering::Relaxed)
    }
}
