//! Synchronization with an embedded map renderer.
//!
//! The renderer is a separate, asynchronously loaded surface that can reload
//! at any time. [`MapSyncChannel`] speaks a small JSON protocol with it,
//! queues messages until the renderer's `Ready` handshake, and resends a
//! full snapshot whenever the renderer comes back with a new session.

mod channel;
mod error;
mod protocol;
mod transport;
mod websocket;

pub use channel::{
    ChannelPhase, HandlerId, InboundDisposition, MapSyncChannel, MapSyncConfig, RendererEvent,
    SendDisposition, Topic, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_ZOOM, MAX_PENDING_MESSAGES,
};
pub use error::{MapSyncError, TransportError};
pub use protocol::{
    parse_inbound, GeofencePayload, Inbound, MapCenter, MarkerUpdate, OutboundMessage,
    RendererMessage, ShapePayload, SyncReason, PROTOCOL_VERSION,
};
pub use transport::{ChannelTransport, RendererId, RendererTransport};
pub use websocket::{run_websocket_server, serve_websocket};
