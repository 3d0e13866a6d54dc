use thiserror::Error;

/// Failures produced by the automation core and the bridge clients.
#[derive(Debug, Error)]
pub enum Error {
    #[error("action timeout: deadline exceeded")]
    DeadlineExceeded,

    #[error("action cancelled")]
    Cancelled,

    #[error("executor closed")]
    ExecutorClosed,

    #[error("bridge request failed status={status} body={body}")]
    BridgeStatus { status: u16, body: String },

    #[error("bridge transport error: {0}")]
    Transport(String),

    #[error("malformed bridge response: {0}")]
    InvalidResponse(String),

    #[error("device discovery failed: {0}")]
    Discovery(String),

    #[error("{0}")]
    Setup(String),

    #[error("{0}")]
    InvalidTarget(String),
}
