//! WebSocket bridge for out-of-process renderers.
//!
//! Each accepted connection becomes the channel's current renderer. Text
//! frames from the socket are fed to [`MapSyncChannel::handle_inbound`];
//! outbound messages are written as text frames. The renderer is released
//! when the socket closes or the token is cancelled, and the socket is
//! closed once the channel stops using this renderer.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::channel::MapSyncChannel;
use super::error::MapSyncError;
use super::transport::ChannelTransport;

/// Serve one renderer connection until it closes or `cancel` fires.
pub async fn serve_websocket<S>(
    stream: S,
    channel: Arc<MapSyncChannel>,
    cancel: CancellationToken,
) -> Result<(), MapSyncError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut sink, mut stream) = ws.split();

    let (transport, mut outbound) = ChannelTransport::pair();
    let renderer = channel.attach_renderer(Arc::new(transport));

    let result = loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                break Ok(());
            }
            message = outbound.recv() => match message {
                Some(text) => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        break Err(MapSyncError::from(e));
                    }
                }
                // The channel dropped this renderer's handle.
                None => {
                    debug!(renderer = %renderer, "Renderer replaced, closing connection");
                    let _ = sink.send(Message::Close(None)).await;
                    break Ok(());
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    channel.handle_inbound(&text);
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => {
                        channel.handle_inbound(&text);
                    }
                    Err(_) => warn!(renderer = %renderer, "Dropping non-UTF-8 binary frame"),
                },
                Some(Ok(Message::Close(_))) | None => break Ok(()),
                // Ping/Pong handled by tungstenite.
                Some(Ok(_)) => {}
                Some(Err(e)) => break Err(MapSyncError::from(e)),
            },
        }
    };

    channel.release_renderer(renderer);
    debug!(renderer = %renderer, ok = result.is_ok(), "Renderer connection closed");
    result
}

/// Accept renderer connections on `listener` until `cancel` fires.
///
/// Connections are served one at a time; a newer connection replaces the
/// previous renderer only after the previous one has closed.
pub async fn run_websocket_server(
    listener: TcpListener,
    channel: Arc<MapSyncChannel>,
    cancel: CancellationToken,
) -> Result<(), MapSyncError> {
    let local: Option<SocketAddr> = listener.local_addr().ok();
    info!(addr = ?local, "Map renderer bridge listening");

    loop {
        let (stream, peer) = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            accepted = listener.accept() => match accepted {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "Failed to accept renderer connection");
                    continue;
                }
            },
        };

        info!(peer = %peer, "Renderer connected");
        if let Err(e) = serve_websocket(stream, Arc::clone(&channel), cancel.child_token()).await {
            warn!(peer = %peer, error = %e, "Renderer connection ended with error");
        }
    }
}
