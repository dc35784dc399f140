//! Map sync error types.

use std::time::Duration;

use thiserror::Error;

/// Failure delivering a message through a renderer transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The renderer side has gone away.
    #[error("renderer transport closed")]
    Closed,
    /// Any other delivery failure.
    #[error("renderer transport failed: {0}")]
    Failed(String),
}

/// Errors from the map sync channel.
#[derive(Debug, Error)]
pub enum MapSyncError {
    /// The renderer did not send `Ready` in time.
    #[error("renderer did not become ready within {0:?}")]
    RendererHandshakeTimeout(Duration),

    /// The renderer sent something that violates the protocol.
    #[error("renderer protocol violation: {0}")]
    RendererProtocolViolation(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("handshake wait cancelled")]
    Cancelled,
}

impl From<tokio_tungstenite::tungstenite::Error> for MapSyncError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(err.to_string())
    }
}
