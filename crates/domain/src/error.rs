/// Shared error type used across all gateway crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("protocol: {0}")]
    Protocol(String),

    #[error("frame of {0} bytes exceeds the maximum frame size")]
    FrameTooLarge(usize),

    #[error("router link: {0}")]
    Link(String),

    #[error("handshake timed out")]
    HandshakeTimeout,

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("unknown mud: {0}")]
    MudUnknown(String),

    #[error("unknown user: {0}")]
    UserUnknown(String),

    #[error("unknown channel: {0}")]
    ChannelUnknown(String),

    #[error("target mud is offline: {0}")]
    TargetOffline(String),

    #[error("not authenticated")]
    NotAuthenticated,

    #[error("session expired")]
    SessionExpired,

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("outbound queue full")]
    Backpressure,

    #[error("client too slow to drain its outbound queue")]
    SlowClient,

    #[error("config: {0}")]
    Config(String),

    #[error("internal: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
