//! Application Layer - Port definitions.
//!
//! This layer defines how the relay talks to the outside world without
//! depending on any particular transport.

/// Port interfaces for external systems (upstream quote source).
pub mod ports;
