//! Broadcast Relay
//!
//! Shares one upstream quote stream between any number of subscribers
//! using a tokio broadcast channel for fan-out.
//!
//! # Architecture
//!
//! ```text
//!                  ┌──────────────┐   broadcast   ┌─► QuoteSubscription 1
//! QuoteSource ───► │ session task │ ────────────► ├─► QuoteSubscription 2
//!   (open once)    └──────────────┘               └─► QuoteSubscription N
//! ```
//!
//! - The first subscriber starts a session: one task that opens the source
//!   and publishes every decoded quote.
//! - Later subscribers join the running session and only see quotes
//!   published after they joined.
//! - When the session ends (upstream completed or failed) its channel is
//!   closed; attached subscribers drain what was already published and then
//!   observe the end. The next subscriber starts a fresh session.
//! - When the last subscriber leaves, the session is cancelled and the
//!   upstream request dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::BroadcastSettings;
use crate::application::ports::QuoteSource;
use crate::domain::quote::Quote;
use crate::domain::subscription::{
    ConsumerId, Detachment, SessionId, SubscriberRegistry, SubscriberStats,
};
use crate::infrastructure::metrics;
use crate::infrastructure::upstream::{ConnectionState, UpstreamState};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the relay.
#[derive(Debug, Clone, Copy)]
pub struct RelayConfig {
    /// Broadcast ring size. Subscribers falling further behind skip quotes.
    pub capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

impl From<BroadcastSettings> for RelayConfig {
    fn from(settings: BroadcastSettings) -> Self {
        Self {
            capacity: settings.capacity,
        }
    }
}

// =============================================================================
// Relay State
// =============================================================================

/// One upstream connection lifetime.
struct Session {
    id: SessionId,
    tx: broadcast::Sender<Arc<Quote>>,
    cancel: CancellationToken,
}

#[derive(Default)]
struct RelayState {
    session: Option<Session>,
    registry: SubscriberRegistry,
}

struct RelayInner {
    source: Arc<dyn QuoteSource>,
    config: RelayConfig,
    state: Mutex<RelayState>,
    upstream: Arc<UpstreamState>,
    shutdown: CancellationToken,
    next_session_id: AtomicU64,
    quotes_published: AtomicU64,
}

// =============================================================================
// Quote Relay
// =============================================================================

/// Shared-subscription relay for the upstream quote feed.
///
/// Cloning is cheap; clones share the same session and subscribers.
///
/// # Example
///
/// ```rust,ignore
/// let relay = QuoteRelay::new(source, RelayConfig::default(), shutdown.clone());
///
/// let mut subscription = relay.subscribe();
/// while let Some(quote) = subscription.recv().await {
///     println!("{quote:?}");
/// }
/// ```
#[derive(Clone)]
pub struct QuoteRelay {
    inner: Arc<RelayInner>,
}

impl std::fmt::Debug for QuoteRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuoteRelay")
            .field("source", &self.inner.source.describe())
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl QuoteRelay {
    /// Create a new relay. No upstream connection is made until the first
    /// subscriber arrives.
    #[must_use]
    pub fn new(
        source: Arc<dyn QuoteSource>,
        config: RelayConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(RelayInner {
                source,
                config,
                state: Mutex::new(RelayState::default()),
                upstream: Arc::new(UpstreamState::new()),
                shutdown,
                next_session_id: AtomicU64::new(1),
                quotes_published: AtomicU64::new(0),
            }),
        }
    }

    /// Attach a new subscriber.
    ///
    /// Starts an upstream session if none is running. The subscriber
    /// receives quotes published after this call.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn subscribe(&self) -> QuoteSubscription {
        let consumer_id = uuid::Uuid::new_v4().as_u64_pair().0;

        let (rx, subscribers) = {
            let mut state = self.inner.state.lock();

            let live = state
                .session
                .as_ref()
                .filter(|s| !s.cancel.is_cancelled())
                .map(|s| (s.tx.subscribe(), s.id));

            let (rx, session_id) = match live {
                Some(joined) => joined,
                None => {
                    let (session, rx) = self.inner.start_session();
                    let session_id = session.id;
                    state.session = Some(session);
                    (rx, session_id)
                }
            };

            let on_session = state
                .registry
                .attach(consumer_id, session_id, Utc::now())
                .unwrap_or_default();
            tracing::debug!(consumer_id, session_id, on_session, "Joined upstream session");
            (rx, state.registry.len())
        };

        metrics::set_sse_clients(subscribers);
        tracing::info!(consumer_id, subscribers, "Subscriber attached");

        QuoteSubscription {
            consumer_id,
            rx,
            inner: Arc::clone(&self.inner),
        }
    }

    /// Upstream connection status.
    #[must_use]
    pub fn upstream(&self) -> Arc<UpstreamState> {
        Arc::clone(&self.inner.upstream)
    }

    /// Number of attached subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.state.lock().registry.len()
    }

    /// Relay statistics.
    #[must_use]
    pub fn stats(&self) -> RelayStats {
        let state = self.inner.state.lock();
        RelayStats {
            subscribers: state.registry.stats(),
            session_active: state.session.is_some(),
            sessions_started: self.inner.upstream.get_sessions_started(),
            quotes_published: self.inner.quotes_published.load(Ordering::Relaxed),
        }
    }
}

impl RelayInner {
    /// Create a session and spawn its task. Called with the state lock held.
    ///
    /// The first receiver exists before the task can publish anything.
    fn start_session(self: &Arc<Self>) -> (Session, broadcast::Receiver<Arc<Quote>>) {
        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = broadcast::channel(self.config.capacity);
        let cancel = self.shutdown.child_token();

        self.upstream.increment_sessions();
        self.upstream.set_state(ConnectionState::Connecting);
        metrics::record_upstream_session();

        tokio::spawn(run_session(
            Arc::clone(self),
            id,
            tx.clone(),
            cancel.clone(),
        ));

        (Session { id, tx, cancel }, rx)
    }

    /// Remove the session if it is still the current one and run `finish`
    /// unless a newer session already owns the upstream status.
    fn end_session(&self, id: SessionId, finish: impl FnOnce()) {
        let mut state = self.state.lock();
        match state.session.as_ref() {
            Some(current) if current.id != id => {}
            Some(_) => {
                state.session = None;
                finish();
            }
            None => finish(),
        }
    }

    fn detach(&self, consumer_id: ConsumerId) {
        let (detachment, subscribers, stopped) = {
            let mut state = self.state.lock();
            let detachment = state.registry.detach(consumer_id);
            // Consumers of an ended session never stop the current one.
            let stopped = match detachment {
                Detachment::Last(session_id)
                    if state.session.as_ref().is_some_and(|s| s.id == session_id) =>
                {
                    state.session.take()
                }
                _ => None,
            };
            (detachment, state.registry.len(), stopped)
        };

        if detachment == Detachment::Unknown {
            return;
        }

        metrics::set_sse_clients(subscribers);
        tracing::info!(consumer_id, subscribers, "Subscriber detached");

        if let Some(session) = stopped {
            tracing::info!(
                session_id = session.id,
                "Last subscriber left, closing upstream"
            );
            session.cancel.cancel();
        }
    }
}

/// Session task: read, decode, publish.
async fn run_session(
    inner: Arc<RelayInner>,
    session_id: SessionId,
    tx: broadcast::Sender<Arc<Quote>>,
    cancel: CancellationToken,
) {
    let upstream = Arc::clone(&inner.upstream);
    tracing::info!(session_id, source = %inner.source.describe(), "Upstream session starting");

    let opened = tokio::select! {
        biased;
        () = cancel.cancelled() => None,
        result = inner.source.open() => Some(result),
    };

    let outcome = match opened {
        None => SessionOutcome::Cancelled,
        Some(Err(e)) => SessionOutcome::Failed(e),
        Some(Ok(mut stream)) => {
            upstream.set_state(ConnectionState::Connected);
            metrics::set_upstream_connected(true);
            tracing::info!(session_id, "Upstream connected");

            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break SessionOutcome::Cancelled,
                    item = stream.next() => match item {
                        Some(Ok(quote)) => {
                            tracing::debug!(
                                session_id,
                                symbol = quote.symbol().unwrap_or("-"),
                                price = ?quote.price(),
                                fields = quote.len(),
                                "Quote received"
                            );
                            upstream.increment_quotes();
                            metrics::record_quote_received();

                            let receivers = tx.send(Arc::new(quote)).unwrap_or(0);
                            inner.quotes_published.fetch_add(1, Ordering::Relaxed);
                            tracing::trace!(session_id, receivers, "Quote published");
                        }
                        Some(Err(e)) => break SessionOutcome::Failed(e),
                        None => break SessionOutcome::Completed,
                    },
                }
            }
        }
    };

    let failure = match outcome {
        SessionOutcome::Completed => {
            tracing::info!(session_id, "Upstream stream completed");
            None
        }
        SessionOutcome::Cancelled => {
            tracing::info!(session_id, "Upstream session cancelled");
            None
        }
        SessionOutcome::Failed(e) => {
            metrics::record_upstream_error(e.kind());
            tracing::error!(session_id, kind = e.kind(), error = %e, "Upstream session failed");
            Some(e.to_string())
        }
    };

    inner.end_session(session_id, || {
        metrics::set_upstream_connected(false);
        match failure {
            Some(message) => upstream.set_error(message),
            None => upstream.set_state(ConnectionState::Idle),
        }
    });

    // Subscribers drain what was published, then see the end.
    drop(tx);
}

enum SessionOutcome {
    Completed,
    Cancelled,
    Failed(crate::application::ports::SourceError),
}

// =============================================================================
// Subscription
// =============================================================================

/// A subscriber's view of the shared stream.
///
/// Dropping it detaches the subscriber; dropping the last one closes the
/// upstream connection.
pub struct QuoteSubscription {
    consumer_id: ConsumerId,
    rx: broadcast::Receiver<Arc<Quote>>,
    inner: Arc<RelayInner>,
}

impl std::fmt::Debug for QuoteSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuoteSubscription")
            .field("consumer_id", &self.consumer_id)
            .finish_non_exhaustive()
    }
}

impl QuoteSubscription {
    /// Consumer identifier.
    #[must_use]
    pub const fn consumer_id(&self) -> ConsumerId {
        self.consumer_id
    }

    /// Next quote, or `None` once the session has ended.
    ///
    /// Cancel safe.
    pub async fn recv(&mut self) -> Option<Arc<Quote>> {
        loop {
            match self.rx.recv().await {
                Ok(quote) => return Some(quote),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(consumer_id = self.consumer_id, lagged = n, "Quote receiver lagged");
                    metrics::record_quotes_dropped(n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for QuoteSubscription {
    fn drop(&mut self) {
        self.inner.detach(self.consumer_id);
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Relay statistics.
#[derive(Debug, Clone, Default)]
pub struct RelayStats {
    /// Subscriber registry snapshot.
    pub subscribers: SubscriberStats,
    /// Whether an upstream session is running.
    pub session_active: bool,
    /// Sessions started since startup.
    pub sessions_started: u64,
    /// Quotes published since startup.
    pub quotes_published: u64,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::mpsc;
    use tokio::time::timeout;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    use super::*;
    use crate::application::ports::{QuoteStream, SourceError};

    type Feed = mpsc::UnboundedSender<Result<Quote, SourceError>>;

    /// Source whose streams are driven by the test.
    struct ChannelSource {
        opened: AtomicUsize,
        feeds: mpsc::UnboundedSender<Feed>,
    }

    #[async_trait]
    impl QuoteSource for ChannelSource {
        async fn open(&self) -> Result<QuoteStream, SourceError> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = mpsc::unbounded_channel();
            let _ = self.feeds.send(tx);
            Ok(UnboundedReceiverStream::new(rx).boxed())
        }

        fn describe(&self) -> String {
            "channel".to_string()
        }
    }

    struct FailingSource;

    #[async_trait]
    impl QuoteSource for FailingSource {
        async fn open(&self) -> Result<QuoteStream, SourceError> {
            Err(SourceError::Connect("refused".to_string()))
        }

        fn describe(&self) -> String {
            "failing".to_string()
        }
    }

    fn setup() -> (QuoteRelay, Arc<ChannelSource>, mpsc::UnboundedReceiver<Feed>) {
        let (feeds_tx, feeds_rx) = mpsc::unbounded_channel();
        let source = Arc::new(ChannelSource {
            opened: AtomicUsize::new(0),
            feeds: feeds_tx,
        });
        let relay = QuoteRelay::new(
            Arc::clone(&source) as Arc<dyn QuoteSource>,
            RelayConfig::default(),
            CancellationToken::new(),
        );
        (relay, source, feeds_rx)
    }

    fn quote(symbol: &str, price: f64) -> Quote {
        Quote::from_value(serde_json::json!({"symbol": symbol, "price": price})).unwrap()
    }

    async fn next_feed(feeds: &mut mpsc::UnboundedReceiver<Feed>) -> Feed {
        timeout(Duration::from_secs(2), feeds.recv())
            .await
            .expect("timeout waiting for upstream open")
            .expect("source dropped")
    }

    async fn recv(sub: &mut QuoteSubscription) -> Option<Arc<Quote>> {
        timeout(Duration::from_secs(2), sub.recv())
            .await
            .expect("timeout waiting for quote")
    }

    async fn wait_until(mut check: impl FnMut() -> bool) {
        timeout(Duration::from_secs(2), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    #[test]
    fn default_config() {
        assert_eq!(RelayConfig::default().capacity, 1024);
    }

    #[tokio::test]
    async fn no_upstream_without_subscribers() {
        let (relay, source, _feeds) = setup();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(source.opened.load(Ordering::SeqCst), 0);
        assert!(!relay.stats().session_active);
        assert_eq!(relay.upstream().get_state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn single_subscriber_receives_in_order() {
        let (relay, _source, mut feeds) = setup();
        let mut sub = relay.subscribe();
        let feed = next_feed(&mut feeds).await;

        for (i, symbol) in ["A", "B", "C"].iter().enumerate() {
            feed.send(Ok(quote(symbol, i as f64))).unwrap();
        }

        assert_eq!(recv(&mut sub).await.unwrap().symbol(), Some("A"));
        assert_eq!(recv(&mut sub).await.unwrap().symbol(), Some("B"));
        assert_eq!(recv(&mut sub).await.unwrap().symbol(), Some("C"));
        assert_eq!(relay.stats().quotes_published, 3);
    }

    #[tokio::test]
    async fn subscribers_share_one_upstream() {
        let (relay, source, mut feeds) = setup();
        let mut sub1 = relay.subscribe();
        let mut sub2 = relay.subscribe();
        let feed = next_feed(&mut feeds).await;

        feed.send(Ok(quote("ABC", 10.0))).unwrap();

        assert_eq!(recv(&mut sub1).await.unwrap().symbol(), Some("ABC"));
        assert_eq!(recv(&mut sub2).await.unwrap().symbol(), Some("ABC"));
        assert_eq!(source.opened.load(Ordering::SeqCst), 1);
        assert_eq!(relay.subscriber_count(), 2);
        assert_eq!(relay.stats().sessions_started, 1);
    }

    #[tokio::test]
    async fn late_subscriber_gets_no_history() {
        let (relay, _source, mut feeds) = setup();
        let mut early = relay.subscribe();
        let feed = next_feed(&mut feeds).await;

        feed.send(Ok(quote("OLD", 1.0))).unwrap();
        assert_eq!(recv(&mut early).await.unwrap().symbol(), Some("OLD"));

        let mut late = relay.subscribe();
        feed.send(Ok(quote("NEW", 2.0))).unwrap();

        assert_eq!(recv(&mut late).await.unwrap().symbol(), Some("NEW"));
        assert_eq!(recv(&mut early).await.unwrap().symbol(), Some("NEW"));
    }

    #[tokio::test]
    async fn upstream_error_ends_subscribers_after_delivered_quotes() {
        let (relay, _source, mut feeds) = setup();
        let mut sub1 = relay.subscribe();
        let mut sub2 = relay.subscribe();
        let feed = next_feed(&mut feeds).await;

        feed.send(Ok(quote("A", 1.0))).unwrap();
        feed.send(Ok(quote("B", 2.0))).unwrap();
        feed.send(Err(SourceError::Decode("bad record".to_string())))
            .unwrap();

        for sub in [&mut sub1, &mut sub2] {
            assert_eq!(recv(sub).await.unwrap().symbol(), Some("A"));
            assert_eq!(recv(sub).await.unwrap().symbol(), Some("B"));
            assert!(recv(sub).await.is_none());
        }

        let upstream = relay.upstream();
        wait_until(|| upstream.get_state() == ConnectionState::Failed).await;
        assert!(upstream.last_error().unwrap().contains("bad record"));
    }

    #[tokio::test]
    async fn upstream_completion_ends_subscribers() {
        let (relay, _source, mut feeds) = setup();
        let mut sub = relay.subscribe();
        let feed = next_feed(&mut feeds).await;

        feed.send(Ok(quote("A", 1.0))).unwrap();
        drop(feed);

        assert_eq!(recv(&mut sub).await.unwrap().symbol(), Some("A"));
        assert!(recv(&mut sub).await.is_none());
    }

    #[tokio::test]
    async fn new_subscriber_after_session_end_reopens_upstream() {
        let (relay, source, mut feeds) = setup();
        let mut first = relay.subscribe();
        drop(next_feed(&mut feeds).await);
        assert!(recv(&mut first).await.is_none());

        wait_until(|| !relay.stats().session_active).await;

        let mut second = relay.subscribe();
        let feed = next_feed(&mut feeds).await;
        feed.send(Ok(quote("AGAIN", 3.0))).unwrap();

        assert_eq!(recv(&mut second).await.unwrap().symbol(), Some("AGAIN"));
        assert_eq!(source.opened.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn last_subscriber_leaving_closes_upstream() {
        let (relay, source, mut feeds) = setup();
        let sub1 = relay.subscribe();
        let sub2 = relay.subscribe();
        let feed = next_feed(&mut feeds).await;

        drop(sub1);
        assert!(relay.stats().session_active);
        assert!(!feed.is_closed());

        drop(sub2);
        assert!(!relay.stats().session_active);
        timeout(Duration::from_secs(2), feed.closed())
            .await
            .expect("upstream stream was not dropped");

        let _sub3 = relay.subscribe();
        let _feed = next_feed(&mut feeds).await;
        assert_eq!(source.opened.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn subscriber_of_ended_session_does_not_hold_next_session() {
        let (relay, source, mut feeds) = setup();
        let stale = relay.subscribe();
        let first = next_feed(&mut feeds).await;
        drop(first);
        wait_until(|| !relay.stats().session_active).await;

        let current = relay.subscribe();
        let second = next_feed(&mut feeds).await;
        assert_eq!(source.opened.load(Ordering::SeqCst), 2);
        assert_eq!(relay.subscriber_count(), 2);

        drop(current);
        assert!(!relay.stats().session_active);
        timeout(Duration::from_secs(2), second.closed())
            .await
            .expect("upstream stayed open with no subscriber of its session");

        assert_eq!(relay.subscriber_count(), 1);
        drop(stale);
        assert_eq!(relay.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn dropping_one_subscriber_does_not_affect_others() {
        let (relay, _source, mut feeds) = setup();
        let sub1 = relay.subscribe();
        let mut sub2 = relay.subscribe();
        let feed = next_feed(&mut feeds).await;

        drop(sub1);
        feed.send(Ok(quote("STILL", 5.0))).unwrap();

        assert_eq!(recv(&mut sub2).await.unwrap().symbol(), Some("STILL"));
        assert_eq!(relay.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_but_continues() {
        let (feeds_tx, mut feeds) = mpsc::unbounded_channel();
        let source = Arc::new(ChannelSource {
            opened: AtomicUsize::new(0),
            feeds: feeds_tx,
        });
        let relay = QuoteRelay::new(
            source as Arc<dyn QuoteSource>,
            RelayConfig { capacity: 2 },
            CancellationToken::new(),
        );

        let mut sub = relay.subscribe();
        let feed = next_feed(&mut feeds).await;
        for i in 0..5 {
            feed.send(Ok(quote(&format!("S{i}"), 1.0))).unwrap();
        }
        wait_until(|| relay.stats().quotes_published == 5).await;

        // Oldest quotes were overwritten; the newest two remain.
        assert_eq!(recv(&mut sub).await.unwrap().symbol(), Some("S3"));
        assert_eq!(recv(&mut sub).await.unwrap().symbol(), Some("S4"));
    }

    #[tokio::test]
    async fn open_failure_ends_subscriber() {
        let relay = QuoteRelay::new(
            Arc::new(FailingSource),
            RelayConfig::default(),
            CancellationToken::new(),
        );

        let mut sub = relay.subscribe();
        assert!(recv(&mut sub).await.is_none());

        let upstream = relay.upstream();
        wait_until(|| upstream.get_state() == ConnectionState::Failed).await;
        assert!(upstream.last_error().unwrap().contains("refused"));
    }

    #[tokio::test]
    async fn shutdown_ends_subscribers() {
        let (feeds_tx, mut feeds) = mpsc::unbounded_channel();
        let source = Arc::new(ChannelSource {
            opened: AtomicUsize::new(0),
            feeds: feeds_tx,
        });
        let shutdown = CancellationToken::new();
        let relay = QuoteRelay::new(
            source as Arc<dyn QuoteSource>,
            RelayConfig::default(),
            shutdown.clone(),
        );

        let mut sub = relay.subscribe();
        let _feed = next_feed(&mut feeds).await;

        shutdown.cancel();
        assert!(recv(&mut sub).await.is_none());
    }
}
