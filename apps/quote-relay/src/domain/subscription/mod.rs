//! Subscriber Registry
//!
//! Tracks which downstream consumers are attached to the shared upstream
//! subscription, and to which upstream session each one belongs.
//!
//! # Design
//!
//! The registry only reports lifecycle transitions; it does not own any
//! channels. Consumers are counted per session: when the last consumer of
//! a session detaches, the relay stops that session. A consumer still held
//! by a session that already ended never keeps a newer session open.
//!
//! The registry is not internally synchronized. The relay keeps it under
//! the same lock as its session slot so transitions and session changes
//! are observed atomically.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use chrono::{DateTime, Utc};

// =============================================================================
// Types
// =============================================================================

/// Unique identifier for a consumer (one SSE connection).
pub type ConsumerId = u64;

/// Identifier of one upstream session.
pub type SessionId = u64;

/// Result of detaching a consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detachment {
    /// The consumer was the last one attached to this session.
    Last(SessionId),
    /// Other consumers of the same session remain attached.
    Remaining,
    /// The consumer was not attached.
    Unknown,
}

#[derive(Debug, Clone, Copy)]
struct Attached {
    session: SessionId,
    at: DateTime<Utc>,
}

// =============================================================================
// Subscriber Registry
// =============================================================================

/// Set of attached consumers, grouped by session.
///
/// # Example
///
/// ```rust
/// use chrono::Utc;
/// use quote_relay::domain::subscription::{Detachment, SubscriberRegistry};
///
/// let mut registry = SubscriberRegistry::new();
///
/// assert_eq!(registry.attach(1, 10, Utc::now()), Some(1));
/// assert_eq!(registry.attach(2, 10, Utc::now()), Some(2));
///
/// assert_eq!(registry.detach(1), Detachment::Remaining);
/// assert_eq!(registry.detach(2), Detachment::Last(10));
/// ```
#[derive(Debug, Default)]
pub struct SubscriberRegistry {
    consumers: HashMap<ConsumerId, Attached>,
    sessions: HashMap<SessionId, usize>,
    total_attached: u64,
}

impl SubscriberRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a consumer to a session.
    ///
    /// Returns the number of consumers now attached to that session, or
    /// `None` if the consumer was already attached.
    pub fn attach(
        &mut self,
        consumer: ConsumerId,
        session: SessionId,
        at: DateTime<Utc>,
    ) -> Option<usize> {
        match self.consumers.entry(consumer) {
            Entry::Occupied(_) => return None,
            Entry::Vacant(slot) => {
                slot.insert(Attached { session, at });
            }
        }
        self.total_attached += 1;

        let count = self.sessions.entry(session).or_insert(0);
        *count += 1;
        Some(*count)
    }

    /// Detach a consumer.
    pub fn detach(&mut self, consumer: ConsumerId) -> Detachment {
        let Some(attached) = self.consumers.remove(&consumer) else {
            return Detachment::Unknown;
        };

        match self.sessions.entry(attached.session) {
            Entry::Occupied(mut count) if *count.get() > 1 => {
                *count.get_mut() -= 1;
                Detachment::Remaining
            }
            Entry::Occupied(count) => {
                count.remove();
                Detachment::Last(attached.session)
            }
            Entry::Vacant(_) => Detachment::Last(attached.session),
        }
    }

    /// Number of consumers attached to a session.
    #[must_use]
    pub fn session_len(&self, session: SessionId) -> usize {
        self.sessions.get(&session).copied().unwrap_or(0)
    }

    /// Number of attached consumers across all sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.consumers.len()
    }

    /// Whether no consumer is attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }

    /// Registry statistics.
    #[must_use]
    pub fn stats(&self) -> SubscriberStats {
        SubscriberStats {
            attached: self.consumers.len(),
            total_attached: self.total_attached,
            oldest_attached_at: self.consumers.values().map(|a| a.at).min(),
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Snapshot of registry state.
#[derive(Debug, Clone, Default)]
pub struct SubscriberStats {
    /// Currently attached consumers.
    pub attached: usize,
    /// Consumers attached since startup.
    pub total_attached: u64,
    /// Attach time of the longest-connected consumer.
    pub oldest_attached_at: Option<DateTime<Utc>>,
}

// =============================================================================
// Tests
// =============================================================================
