//! Error types for the WebSocket transport

use thiserror::Error;

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// WebSocket handshake or framing failure
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The coordinator rejected the connection
    #[error("Coordinator error: {0}")]
    Core(#[from] matchpoint_core::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
