use thiserror::Error;

/// Errors produced by the parley protocol layer.
#[derive(Debug, Error)]
pub enum ParleyError {
    #[error("malformed command: {0}")]
    MalformedCommand(String),

    #[error("malformed handshake: {0}")]
    MalformedHandshake(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("user already connected: {0}")]
    DuplicateUser(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type ParleyResult<T> = Result<T, ParleyError>;
