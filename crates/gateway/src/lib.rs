//! The Intermud-3 gateway: MudMode/LPC upstream to an I3 router,
//! JSON-RPC 2.0 downstream over WebSocket and line-delimited TCP.

pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod dispatch;
pub mod events;
pub mod link;
pub mod metrics;
pub mod services;
pub mod shutdown;
pub mod state;
pub mod store;
