//! Configuration Module
//!
//! Configuration loading for the relay service. Values are passed
//! explicitly into constructors; nothing reads configuration globally.

mod settings;

pub use settings::{
    BroadcastSettings, ConfigError, QUOTES_ENDPOINT_VAR, RelayServiceConfig, ServerSettings,
    UpstreamSettings,
};
