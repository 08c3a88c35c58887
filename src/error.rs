//! Error types for inkstream

use thiserror::Error;

/// Main error type for the inkstream library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Transport-level send error
    #[error("transport error: {0}")]
    Transport(String),

    /// WebSocket protocol error
    #[error("socket error: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Result type alias for inkstream
pub type Result<T> = std::result::Result<T, Error>;
