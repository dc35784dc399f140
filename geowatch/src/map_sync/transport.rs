//! Renderer transports.
//!
//! The channel never talks to a renderer directly. It hands serialized
//! messages to a [`RendererTransport`], which must not block: embedders
//! typically forward into a queue drained by the renderer's own task.

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;

use super::error::TransportError;

/// Sink for serialized host-to-renderer messages.
pub trait RendererTransport: Send + Sync {
    /// Hand one JSON message to the renderer.
    fn deliver(&self, message: String) -> Result<(), TransportError>;
}

/// Identifier of an attached renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RendererId(pub(crate) u64);

impl fmt::Display for RendererId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "renderer-{}", self.0)
    }
}

/// The channel's exclusive reference to the current renderer surface.
pub(crate) struct RendererHandle {
    pub(crate) id: RendererId,
    transport: Arc<dyn RendererTransport>,
}

impl RendererHandle {
    pub(crate) fn new(id: RendererId, transport: Arc<dyn RendererTransport>) -> Self {
        Self { id, transport }
    }

    pub(crate) fn deliver(&self, message: String) -> Result<(), TransportError> {
        self.transport.deliver(message)
    }
}

impl fmt::Debug for RendererHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RendererHandle")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// In-process transport over an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelTransport {
    /// Create a transport and the receiver the renderer reads from.
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl RendererTransport for ChannelTransport {
    fn deliver(&self, message: String) -> Result<(), TransportError> {
        self.tx.send(message).map_err(|_| TransportError::Closed)
    }
}
