//! Error types for the stream bridge

use tapline_external_media::Encapsulation;
use thiserror::Error;
use tokio_tungstenite::tungstenite;
use uuid::Uuid;

/// Result type for stream bridge operations
pub type Result<T> = std::result::Result<T, StreamError>;

#[derive(Debug, Error)]
pub enum StreamError {
    /// No stream session registered under this id
    #[error("Stream session not found: {0}")]
    NotFound(Uuid),

    /// The session already has a switch connection
    #[error("Switch socket already attached to stream session {0}")]
    AlreadyAttached(Uuid),

    /// No converter exists for this encapsulation
    #[error("Unsupported encapsulation: {0}")]
    UnsupportedEncapsulation(Encapsulation),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),

    /// The peer is gone
    #[error("Socket closed")]
    Closed,

    /// Frame that cannot be encoded, or an unexpected frame where a
    /// specific kind is required
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),
}

impl StreamError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedFrame(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
