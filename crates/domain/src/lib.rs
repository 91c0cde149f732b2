//! Shared domain types for the Intermud-3 gateway: configuration, the
//! common error type, the event model, and retry/backoff strategies.

pub mod config;
pub mod error;
pub mod event;
pub mod retry;

pub use config::{Config, ConfigError, ConfigSeverity};
pub use error::{Error, Result};
pub use event::{Event, EventScope};
