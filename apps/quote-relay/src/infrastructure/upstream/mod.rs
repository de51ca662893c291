//! Upstream Quote Feed Adapter
//!
//! Implements the `QuoteSource` port over HTTP:
//!
//! - **client**: streaming `GET {base}/quotes` with reqwest
//! - **codec**: line-delimited JSON decoding of the response body
//! - **state**: connection status shared with the health endpoint

pub mod client;
pub mod codec;
pub mod state;

pub use client::{
    DEFAULT_QUOTES_PATH, HttpQuoteSource, STREAM_JSON, UpstreamClientConfig, decode_body,
    endpoint_url,
};
pub use codec::{CodecError, DEFAULT_MAX_RECORD_BYTES, NdjsonCodec};
pub use state::{ConnectionState, UpstreamState};
