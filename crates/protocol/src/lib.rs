//! Wire protocols spoken by the gateway.
//!
//! Upstream: the Intermud-3 "MudMode" protocol — length-prefixed,
//! LPC-encoded arrays over TCP ([`lpc`], [`framing`], [`packet`]).
//! Downstream: JSON-RPC 2.0 over WebSocket or line-delimited TCP ([`rpc`]).

pub mod framing;
pub mod lpc;
pub mod packet;
pub mod rpc;

pub use framing::{CodecError, MudModeCodec};
pub use lpc::{LpcError, LpcValue};
pub use packet::{Header, Packet, PacketError, PacketKind};
