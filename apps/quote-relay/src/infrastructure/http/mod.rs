//! HTTP Feed Server
//!
//! Serves the relayed quote stream to browser clients as server-sent events.
//!
//! # Architecture
//!
//! Each `GET /quotes/feed` request:
//!
//! 1. Attaches a subscriber to the shared `QuoteRelay`
//! 2. Spawns a forwarding task that serializes each quote into an SSE event
//! 3. Streams those events to the client through a bounded channel
//! 4. Detaches when the upstream session ends or the client goes away

pub mod server;

pub use server::{FeedServer, FeedServerError, FeedServerState, QUOTES_VIEW, router};
