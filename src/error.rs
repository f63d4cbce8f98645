use thiserror::Error;

/// Crate-wide error type for the engine and its components.
///
/// Every public operation returns `Result<_, EngineError>` rather than
/// panicking; spec-level "the callback fires with false" semantics are
/// expressed as `Ok(false)` for boolean operations and reserved for
/// expected, recoverable conditions. A variant here means the failure was
/// not recoverable by the caller without retrying or reconfiguring.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("redis connection error: {0}")]
    Connection(#[from] redis::RedisError),

    #[error("connection pool exhausted or closed")]
    PoolExhausted,

    #[error("failed to decode message: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("script execution failed: {0}")]
    Script(String),

    #[error("pubsub subscriber stopped after exhausting reconnect attempts")]
    SubscriberStopped,

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    /// True for errors the connection pool's retry loop should retry:
    /// connection refused, timeouts, and EOF-during-command. False for
    /// protocol errors, auth failures, and anything else that retrying
    /// won't fix.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connection(e) => e.is_io_error() || e.is_timeout() || e.is_connection_dropped(),
            _ => false,
        }
    }
}
