//! Downstream API: JSON-RPC 2.0 over WebSocket and line-delimited TCP,
//! plus the health/metrics HTTP surface.

pub mod auth;
pub mod health;
pub mod methods;
pub mod tcp;
pub mod ws;

pub use methods::ApiContext;
