use thiserror::Error;

/// Excavator client error types
#[derive(Error, Debug)]
pub enum ExcavatorError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("API error in {method}: {message}")]
    Api { method: String, message: String },

    #[error("Failed to spawn excavator: {0}")]
    Spawn(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] tokio_util::codec::LinesCodecError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timeout waiting for response")]
    Timeout,

    #[error("Not connected")]
    NotConnected,
}

pub type Result<T> = std::result::Result<T, ExcavatorError>;
