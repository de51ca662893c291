//! Upstream HTTP Client
//!
//! Opens `GET {base}/quotes` with `Accept: application/stream+json` and
//! turns the streaming response body into a sequence of quotes.
//!
//! # Failure semantics
//!
//! No retries. A connect failure, a non-success status, a broken body or a
//! record that fails to decode ends the stream with a single `Err` item,
//! after every record decoded before the failure has been yielded.

use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use futures_util::StreamExt;
use reqwest::Url;
use reqwest::header::ACCEPT;

use super::codec::{DEFAULT_MAX_RECORD_BYTES, NdjsonCodec};
use crate::application::ports::{QuoteSource, QuoteStream, SourceError};
use crate::domain::quote::Quote;

/// Media type requested from the upstream.
pub const STREAM_JSON: &str = "application/stream+json";

/// Path of the quote stream relative to the configured base URL.
pub const DEFAULT_QUOTES_PATH: &str = "/quotes";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the upstream client.
#[derive(Debug, Clone)]
pub struct UpstreamClientConfig {
    /// Upstream base URL.
    pub base_url: String,
    /// Stream path appended to the base URL.
    pub path: String,
    /// `Accept` header value.
    pub accept: String,
    /// Connection establishment timeout. An open stream has no read timeout.
    pub connect_timeout: Duration,
    /// Maximum size of one record.
    pub max_record_bytes: usize,
}

impl UpstreamClientConfig {
    /// Create a configuration with default path, media type and limits.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            path: DEFAULT_QUOTES_PATH.to_string(),
            accept: STREAM_JSON.to_string(),
            connect_timeout: Duration::from_secs(10),
            max_record_bytes: DEFAULT_MAX_RECORD_BYTES,
        }
    }

    /// Create configuration from `UpstreamSettings`.
    #[must_use]
    pub fn from_settings(settings: &crate::UpstreamSettings) -> Self {
        Self {
            connect_timeout: settings.connect_timeout,
            max_record_bytes: settings.max_record_bytes,
            ..Self::new(settings.endpoint.clone())
        }
    }
}

/// Join the base URL and the stream path.
///
/// # Errors
///
/// Returns `SourceError::InvalidEndpoint` if the result is not an
/// `http`/`https` URL.
pub fn endpoint_url(base: &str, path: &str) -> Result<Url, SourceError> {
    let joined = format!(
        "{}/{}",
        base.trim().trim_end_matches('/'),
        path.trim_start_matches('/')
    );

    let url =
        Url::parse(&joined).map_err(|e| SourceError::InvalidEndpoint(format!("{joined}: {e}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(SourceError::InvalidEndpoint(format!(
            "{joined}: unsupported scheme {}",
            url.scheme()
        )));
    }

    Ok(url)
}

// =============================================================================
// HTTP Quote Source
// =============================================================================

/// `QuoteSource` backed by a streaming HTTP GET.
#[derive(Debug, Clone)]
pub struct HttpQuoteSource {
    client: reqwest::Client,
    url: Url,
    accept: String,
    max_record_bytes: usize,
}

impl HttpQuoteSource {
    /// Create a new source.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint is invalid or the HTTP client
    /// cannot be built.
    pub fn new(config: &UpstreamClientConfig) -> Result<Self, SourceError> {
        let url = endpoint_url(&config.base_url, &config.path)?;

        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| SourceError::Connect(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url,
            accept: config.accept.clone(),
            max_record_bytes: config.max_record_bytes,
        })
    }

    /// Full upstream stream URL.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl QuoteSource for HttpQuoteSource {
    async fn open(&self) -> Result<QuoteStream, SourceError> {
        tracing::info!(url = %self.url, accept = %self.accept, "Opening upstream quote stream");

        let response = self
            .client
            .get(self.url.clone())
            .header(ACCEPT, &self.accept)
            .send()
            .await
            .map_err(|e| SourceError::Connect(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                status: status.as_u16(),
                url: self.url.to_string(),
            });
        }

        tracing::debug!(
            status = status.as_u16(),
            content_type = ?response.headers().get(reqwest::header::CONTENT_TYPE),
            "Upstream responded"
        );

        Ok(decode_body(
            response.bytes_stream(),
            NdjsonCodec::new(self.max_record_bytes),
        ))
    }

    fn describe(&self) -> String {
        self.url.to_string()
    }
}

// =============================================================================
// Body Decoding
// =============================================================================

struct BodyDecoder<S> {
    body: Pin<Box<S>>,
    codec: NdjsonCodec,
    pending: VecDeque<Quote>,
    failure: Option<SourceError>,
    done: bool,
}

/// Turn a chunked byte stream into a quote stream.
///
/// Generic over the chunk and error types so any body stream can be fed
/// through the codec.
pub fn decode_body<S, B, E>(body: S, codec: NdjsonCodec) -> QuoteStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let decoder = BodyDecoder {
        body: Box::pin(body),
        codec,
        pending: VecDeque::new(),
        failure: None,
        done: false,
    };

    futures::stream::unfold(decoder, |mut st| async move {
        loop {
            if let Some(quote) = st.pending.pop_front() {
                return Some((Ok(quote), st));
            }
            if let Some(err) = st.failure.take() {
                return Some((Err(err), st));
            }
            if st.done {
                return None;
            }

            let mut decoded = Vec::new();
            let result = match st.body.next().await {
                Some(Ok(chunk)) => st.codec.decode_into(chunk.as_ref(), &mut decoded),
                Some(Err(e)) => {
                    st.done = true;
                    st.failure = Some(SourceError::Transport(e.to_string()));
                    Ok(())
                }
                None => {
                    st.done = true;
                    st.codec.finish().map(|quotes| decoded.extend(quotes))
                }
            };

            st.pending.extend(decoded);
            if let Err(e) = result {
                st.done = true;
                st.failure = Some(e.into());
            }
        }
    })
    .boxed()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use futures::stream;
    use test_case::test_case;

    use super::*;

    #[test_case("http://localhost:8081", "/quotes", "http://localhost:8081/quotes" ; "plain base")]
    #[test_case("http://localhost:8081/", "/quotes", "http://localhost:8081/quotes" ; "trailing slash")]
    #[test_case("https://feed.example.com/api", "/quotes", "https://feed.example.com/api/quotes" ; "base with path")]
    #[test_case(" http://h:1 ", "quotes", "http://h:1/quotes" ; "whitespace and bare path")]
    fn joins_endpoint(base: &str, path: &str, expected: &str) {
        assert_eq!(endpoint_url(base, path).unwrap().as_str(), expected);
    }

    #[test_case("not a url" ; "garbage")]
    #[test_case("ftp://host" ; "wrong scheme")]
    #[test_case("" ; "empty")]
    fn rejects_bad_endpoint(base: &str) {
        let err = endpoint_url(base, "/quotes").unwrap_err();
        assert_eq!(err.kind(), "endpoint");
    }

    #[test]
    fn config_defaults() {
        let config = UpstreamClientConfig::new("http://localhost:8081");
        assert_eq!(config.path, "/quotes");
        assert_eq!(config.accept, "application/stream+json");
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.max_record_bytes, 256 * 1024);
    }

    #[test]
    fn source_exposes_url() {
        let source = HttpQuoteSource::new(&UpstreamClientConfig::new("http://localhost:8081")).unwrap();
        assert_eq!(source.url().as_str(), "http://localhost:8081/quotes");
        assert_eq!(source.describe(), "http://localhost:8081/quotes");
    }

    fn chunks(parts: &[&'static str]) -> Vec<Result<&'static [u8], String>> {
        parts.iter().map(|p| Ok(p.as_bytes())).collect()
    }

    async fn collect(stream: QuoteStream) -> Vec<Result<Quote, SourceError>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn decodes_records_across_chunks() {
        let body = stream::iter(chunks(&[
            "{\"symbol\":\"ABC\",\"pr",
            "ice\":10.0}\n{\"symbol\":\"XYZ\",\"price\":20.5}",
        ]));

        let items = collect(decode_body(body, NdjsonCodec::default())).await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap().symbol(), Some("ABC"));
        assert_eq!(items[1].as_ref().unwrap().symbol(), Some("XYZ"));
    }

    #[tokio::test]
    async fn transport_error_terminates_after_records() {
        let body = stream::iter(vec![
            Ok(&b"{\"symbol\":\"A\"}\n"[..]),
            Err("connection reset".to_string()),
            Ok(&b"{\"symbol\":\"B\"}\n"[..]),
        ]);

        let items = collect(decode_body(body, NdjsonCodec::default())).await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap().symbol(), Some("A"));
        assert_eq!(
            items[1].as_ref().unwrap_err(),
            &SourceError::Transport("connection reset".to_string())
        );
    }

    #[tokio::test]
    async fn decode_error_terminates_after_preceding_records() {
        let body = stream::iter(chunks(&[
            "{\"symbol\":\"A\"}\n{\"symbol\":\"B\"}\n{oops}\n{\"symbol\":\"C\"}\n",
        ]));

        let items = collect(decode_body(body, NdjsonCodec::default())).await;

        assert_eq!(items.len(), 3);
        assert_eq!(items[1].as_ref().unwrap().symbol(), Some("B"));
        assert_eq!(items[2].as_ref().unwrap_err().kind(), "decode");
    }

    #[tokio::test]
    async fn trailing_garbage_at_end_of_body_is_an_error() {
        let body = stream::iter(chunks(&["{\"symbol\":\"A\"}\n{\"sym"]));

        let items = collect(decode_body(body, NdjsonCodec::default())).await;

        assert_eq!(items.len(), 2);
        assert!(items[1].is_err());
    }

    #[tokio::test]
    async fn empty_body_is_empty_stream() {
        let body = stream::iter(chunks(&[]));
        let items = collect(decode_body(body, NdjsonCodec::default())).await;
        assert!(items.is_empty());
    }
}
