//! Domain Layer - Core relay types.
//!
//! This layer holds the record type being relayed and the bookkeeping
//! for attached subscribers. Nothing here performs I/O.

/// The relayed quote record.
pub mod quote;

/// Subscriber tracking for the shared upstream subscription.
pub mod subscription;
