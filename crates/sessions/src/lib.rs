//! Downstream client sessions: the store, the per-session offline event
//! queue, and the per-session rate limiter.

pub mod offline;
pub mod ratelimit;
pub mod store;

pub use offline::OfflineQueue;
pub use ratelimit::{MethodClass, RateLimiterMap};
pub use store::{SessionEntry, SessionStore, Transport};
