//! Host side of the renderer message channel.
//!
//! # State Machine
//!
//! ```text
//! Detached --[attach_renderer]--> AwaitingReady --[Ready]--> Ready
//! AwaitingReady --[handshake timeout]--> Failed --[late Ready]--> Ready
//! Ready --[Ready, new token]--> Ready (snapshot resent)
//! Ready --[transport failure | release_renderer]--> Detached
//! ```
//!
//! While not `Ready`, outbound messages are queued in send order and flushed
//! on the first `Ready`. After the renderer has been synchronized once, any
//! later handshake (reload, reconnect, late `Ready` after a timeout) discards
//! the queue and sends a full snapshot instead: every marker, the current
//! geofences with reason `refresh`, and the last camera target.
//!
//! In `Failed` outbound messages are dropped; the snapshot state is still
//! tracked so a late renderer can recover.
//!
//! The queue is bounded. Once it has overflowed, the first `Ready` gets a
//! snapshot with reason `initial` instead of the truncated queue.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::error::MapSyncError;
use super::protocol::{
    parse_inbound, GeofencePayload, Inbound, MapCenter, MarkerUpdate, OutboundMessage,
    RendererMessage, SyncReason, PROTOCOL_VERSION,
};
use super::transport::{RendererHandle, RendererId, RendererTransport};
use crate::geo::LatLng;
use crate::geofence::Geofence;

/// Default time to wait for the renderer's `Ready`.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default zoom for `CenterOn`.
pub const DEFAULT_ZOOM: f64 = 15.0;

/// Upper bound on messages queued before the handshake.
pub const MAX_PENDING_MESSAGES: usize = 1024;

/// Map sync configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct MapSyncConfig {
    /// How long `wait_until_ready` waits before failing the renderer.
    pub handshake_timeout: Duration,
    /// Zoom used when the caller does not pick one.
    pub default_zoom: f64,
}

impl Default for MapSyncConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            default_zoom: DEFAULT_ZOOM,
        }
    }
}

impl MapSyncConfig {
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    pub fn with_default_zoom(mut self, zoom: f64) -> Self {
        self.default_zoom = zoom;
        self
    }
}

/// Channel phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelPhase {
    /// No renderer attached.
    Detached,
    /// Renderer attached, handshake pending.
    AwaitingReady,
    /// Handshake complete, messages go straight through.
    Ready,
    /// Handshake timed out; outbound messages are dropped.
    Failed,
}

/// Renderer event delivered to handlers.
#[derive(Debug, Clone, PartialEq)]
pub enum RendererEvent {
    Loaded,
    MarkerTapped { id: String },
    Error { message: String },
}

/// Handler subscription topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topic {
    Loaded,
    /// Marker taps, optionally for one marker id only.
    MarkerTapped(Option<String>),
    Error,
}

impl Topic {
    fn matches(&self, event: &RendererEvent) -> bool {
        match (self, event) {
            (Topic::Loaded, RendererEvent::Loaded) => true,
            (Topic::Error, RendererEvent::Error { .. }) => true,
            (Topic::MarkerTapped(None), RendererEvent::MarkerTapped { .. }) => true,
            (Topic::MarkerTapped(Some(wanted)), RendererEvent::MarkerTapped { id }) => {
                wanted == id
            }
            _ => false,
        }
    }
}

/// Identifier returned by [`MapSyncChannel::on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type Handler = Arc<dyn Fn(&RendererEvent) + Send + Sync>;

/// What the channel did with one inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundDisposition {
    /// First handshake; `flushed` queued messages were sent.
    Synchronized { flushed: usize },
    /// Re-handshake; a snapshot of `sent` messages replaced the queue.
    Resynchronized { sent: usize },
    /// Delivered to this many handlers.
    Dispatched { handlers: usize },
    /// Duplicate `Ready`, `Ready` without a renderer, or unknown type.
    Ignored,
    /// Malformed message, logged and dropped.
    Violation,
}

/// What happened to one outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendDisposition {
    Delivered,
    Queued,
    /// Channel is `Failed`.
    Dropped,
    /// Delivery failed; the renderer was detached and the message queued.
    TransportFailed,
}

#[derive(Debug)]
struct ChannelState {
    phase: ChannelPhase,
    renderer: Option<RendererHandle>,
    next_renderer_id: u64,
    queue: VecDeque<OutboundMessage>,
    overflowed: bool,
    session_token: Option<String>,
    synchronized_once: bool,
    markers: BTreeMap<String, MarkerUpdate>,
    geofences: Option<Vec<GeofencePayload>>,
    last_center: Option<MapCenter>,
}

impl ChannelState {
    fn new() -> Self {
        Self {
            phase: ChannelPhase::Detached,
            renderer: None,
            next_renderer_id: 1,
            queue: VecDeque::new(),
            overflowed: false,
            session_token: None,
            synchronized_once: false,
            markers: BTreeMap::new(),
            geofences: None,
            last_center: None,
        }
    }

    fn transition(&mut self, to: ChannelPhase) {
        if self.phase != to {
            debug!(from = ?self.phase, to = ?to, "Map channel phase change");
            self.phase = to;
        }
    }

    fn remember(&mut self, message: &OutboundMessage) {
        match message {
            OutboundMessage::UpdateMarker(marker) => {
                self.markers.insert(marker.id.clone(), marker.clone());
            }
            OutboundMessage::ReplaceGeofences { geofences, .. } => {
                self.geofences = Some(geofences.clone());
            }
            OutboundMessage::CenterOn(center) => self.last_center = Some(*center),
        }
    }

    fn enqueue(&mut self, message: OutboundMessage) {
        if self.queue.len() >= MAX_PENDING_MESSAGES {
            if let Some(dropped) = self.queue.pop_front() {
                warn!(kind = dropped.kind(), "Map channel queue full, dropping oldest");
                self.overflowed = true;
            }
        }
        self.queue.push_back(message);
    }

    fn clear_queue(&mut self) {
        self.queue.clear();
        self.overflowed = false;
    }

    fn snapshot(&self, reason: SyncReason) -> Vec<OutboundMessage> {
        let mut messages: Vec<OutboundMessage> = self
            .markers
            .values()
            .cloned()
            .map(OutboundMessage::UpdateMarker)
            .collect();
        if let Some(geofences) = &self.geofences {
            messages.push(OutboundMessage::ReplaceGeofences {
                geofences: geofences.clone(),
                reason,
            });
        }
        if let Some(center) = self.last_center {
            messages.push(OutboundMessage::CenterOn(center));
        }
        messages
    }

    /// Deliver through the current renderer. On failure the renderer is
    /// detached and the message goes back to the queue.
    fn deliver(&mut self, message: OutboundMessage) -> SendDisposition {
        let Some(renderer) = &self.renderer else {
            self.enqueue(message);
            return SendDisposition::Queued;
        };
        let json = match message.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!(kind = message.kind(), error = %e, "Failed to encode map message");
                return SendDisposition::Dropped;
            }
        };
        match renderer.deliver(json) {
            Ok(()) => {
                trace!(kind = message.kind(), renderer = %renderer.id, "Map message delivered");
                SendDisposition::Delivered
            }
            Err(e) => {
                warn!(renderer = %renderer.id, error = %e, "Renderer transport failed, detaching");
                self.renderer = None;
                self.transition(ChannelPhase::Detached);
                self.enqueue(message);
                SendDisposition::TransportFailed
            }
        }
    }

    /// Deliver a batch in order, stopping at the first transport failure.
    fn deliver_all(&mut self, messages: impl IntoIterator<Item = OutboundMessage>) -> usize {
        let mut delivered = 0;
        let mut messages = messages.into_iter();
        for message in messages.by_ref() {
            match self.deliver(message) {
                SendDisposition::Delivered => delivered += 1,
                SendDisposition::Dropped => {}
                SendDisposition::Queued | SendDisposition::TransportFailed => break,
            }
        }
        for rest in messages {
            self.enqueue(rest);
        }
        delivered
    }
}

/// Versioned message channel to an embedded map renderer.
///
/// Owns the renderer handle and all state needed to resynchronize it.
pub struct MapSyncChannel {
    config: MapSyncConfig,
    state: Mutex<ChannelState>,
    ready_tx: watch::Sender<bool>,
    handlers: Mutex<Vec<(HandlerId, Topic, Handler)>>,
    next_handler_id: Mutex<u64>,
}

impl std::fmt::Debug for MapSyncChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapSyncChannel")
            .field("config", &self.config)
            .field("state", &*self.state.lock())
            .finish_non_exhaustive()
    }
}

impl Default for MapSyncChannel {
    fn default() -> Self {
        Self::new(MapSyncConfig::default())
    }
}

impl MapSyncChannel {
    pub fn new(config: MapSyncConfig) -> Self {
        let (ready_tx, _) = watch::channel(false);
        Self {
            config,
            state: Mutex::new(ChannelState::new()),
            ready_tx,
            handlers: Mutex::new(Vec::new()),
            next_handler_id: Mutex::new(1),
        }
    }

    pub fn config(&self) -> &MapSyncConfig {
        &self.config
    }

    pub fn phase(&self) -> ChannelPhase {
        self.state.lock().phase
    }

    pub fn is_ready(&self) -> bool {
        self.phase() == ChannelPhase::Ready
    }

    /// Token of the renderer session last seen in `Ready`.
    pub fn session_token(&self) -> Option<String> {
        self.state.lock().session_token.clone()
    }

    /// Messages waiting for the handshake.
    pub fn pending_len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Attach a renderer, replacing (and invalidating) any previous one.
    ///
    /// The channel waits for this renderer's `Ready` before sending.
    pub fn attach_renderer(&self, transport: Arc<dyn RendererTransport>) -> RendererId {
        let mut state = self.state.lock();
        let id = RendererId(state.next_renderer_id);
        state.next_renderer_id += 1;

        if let Some(previous) = state.renderer.replace(RendererHandle::new(id, transport)) {
            debug!(previous = %previous.id, "Replacing renderer handle");
        }
        if state.phase != ChannelPhase::Failed {
            state.transition(ChannelPhase::AwaitingReady);
        }
        drop(state);

        self.ready_tx.send_replace(false);
        info!(renderer = %id, "Renderer attached, awaiting Ready");
        id
    }

    /// Release a renderer. No-op if `id` is no longer current.
    pub fn release_renderer(&self, id: RendererId) -> bool {
        let mut state = self.state.lock();
        if state.renderer.as_ref().map(|r| r.id) != Some(id) {
            return false;
        }
        state.renderer = None;
        state.transition(ChannelPhase::Detached);
        drop(state);

        self.ready_tx.send_replace(false);
        info!(renderer = %id, "Renderer released");
        true
    }

    /// Release whichever renderer is attached.
    pub fn detach_renderer(&self) -> Option<RendererId> {
        let id = self.state.lock().renderer.as_ref().map(|r| r.id)?;
        self.release_renderer(id).then_some(id)
    }

    /// Send a message, queueing it until the renderer is ready.
    pub fn send(&self, message: OutboundMessage) -> SendDisposition {
        let mut state = self.state.lock();
        state.remember(&message);

        let disposition = match state.phase {
            ChannelPhase::Ready => state.deliver(message),
            ChannelPhase::Detached | ChannelPhase::AwaitingReady => {
                state.enqueue(message);
                SendDisposition::Queued
            }
            ChannelPhase::Failed => {
                trace!(kind = message.kind(), "Renderer failed, dropping message");
                SendDisposition::Dropped
            }
        };
        let detached = disposition == SendDisposition::TransportFailed;
        drop(state);

        if detached {
            self.ready_tx.send_replace(false);
        }
        disposition
    }

    pub fn update_marker(&self, marker: MarkerUpdate) -> SendDisposition {
        self.send(OutboundMessage::UpdateMarker(marker))
    }

    pub fn replace_geofences(&self, geofences: &[Geofence], reason: SyncReason) -> SendDisposition {
        self.send(OutboundMessage::replace_geofences(geofences, reason))
    }

    /// Center the camera, using the configured zoom when `zoom` is `None`.
    pub fn center_on(&self, at: LatLng, zoom: Option<f64>) -> SendDisposition {
        let zoom = zoom.unwrap_or(self.config.default_zoom);
        self.send(OutboundMessage::CenterOn(MapCenter::new(at, zoom)))
    }

    /// Forget a marker so later snapshots no longer carry it.
    ///
    /// Queued updates for the marker are dropped too. Returns false if the
    /// marker was unknown.
    pub fn remove_marker(&self, id: &str) -> bool {
        let mut state = self.state.lock();
        let known = state.markers.remove(id).is_some();
        state
            .queue
            .retain(|message| !matches!(message, OutboundMessage::UpdateMarker(m) if m.id == id));
        if known {
            debug!(marker = %id, "Marker removed");
        }
        known
    }

    /// Process one raw message from the renderer.
    ///
    /// Never fails: malformed input is logged and reported as
    /// [`InboundDisposition::Violation`].
    pub fn handle_inbound(&self, raw: &str) -> InboundDisposition {
        match parse_inbound(raw) {
            Ok(Inbound::Known(message)) => self.handle_message(message),
            Ok(Inbound::Unknown(kind)) => {
                debug!(kind = %kind, "Ignoring unknown renderer message");
                InboundDisposition::Ignored
            }
            Err(e) => {
                warn!(error = %e, "Dropping renderer message");
                InboundDisposition::Violation
            }
        }
    }

    /// Process one parsed message from the renderer.
    pub fn handle_message(&self, message: RendererMessage) -> InboundDisposition {
        match message {
            RendererMessage::Ready {
                session_token,
                protocol_version,
            } => self.handle_ready(session_token, protocol_version),
            RendererMessage::Loaded {} => self.dispatch(RendererEvent::Loaded),
            RendererMessage::MarkerTapped { id } => {
                self.dispatch(RendererEvent::MarkerTapped { id })
            }
            RendererMessage::Error { message } => {
                warn!(message = %message, "Renderer reported an error");
                self.dispatch(RendererEvent::Error { message })
            }
        }
    }

    fn handle_ready(&self, token: String, protocol_version: Option<u32>) -> InboundDisposition {
        if let Some(version) = protocol_version {
            if version != PROTOCOL_VERSION {
                warn!(
                    renderer_version = version,
                    host_version = PROTOCOL_VERSION,
                    "Renderer protocol version mismatch"
                );
            }
        }

        let mut state = self.state.lock();
        if state.renderer.is_none() {
            warn!(token = %token, "Ready received with no renderer attached");
            return InboundDisposition::Ignored;
        }
        if state.phase == ChannelPhase::Ready
            && state.session_token.as_deref() == Some(token.as_str())
        {
            debug!(token = %token, "Duplicate Ready ignored");
            return InboundDisposition::Ignored;
        }

        let previous_phase = state.phase;
        let resync = state.synchronized_once || previous_phase == ChannelPhase::Failed;
        state.session_token = Some(token.clone());
        state.transition(ChannelPhase::Ready);
        state.synchronized_once = true;

        let disposition = if resync {
            state.clear_queue();
            let reason = if state.geofences.is_some() {
                SyncReason::Refresh
            } else {
                SyncReason::Initial
            };
            let snapshot = state.snapshot(reason);
            let sent = state.deliver_all(snapshot);
            info!(
                token = %token,
                after = ?previous_phase,
                sent,
                "Renderer resynchronized"
            );
            InboundDisposition::Resynchronized { sent }
        } else if state.overflowed {
            state.clear_queue();
            let snapshot = state.snapshot(SyncReason::Initial);
            let flushed = state.deliver_all(snapshot);
            info!(token = %token, flushed, "Renderer ready, queue overflowed, sent snapshot");
            InboundDisposition::Synchronized { flushed }
        } else {
            let queued: Vec<_> = state.queue.drain(..).collect();
            let flushed = state.deliver_all(queued);
            info!(token = %token, flushed, "Renderer ready");
            InboundDisposition::Synchronized { flushed }
        };
        let ready = state.phase == ChannelPhase::Ready;
        drop(state);

        self.ready_tx.send_replace(ready);
        disposition
    }

    /// Wait for the renderer handshake.
    ///
    /// # Errors
    ///
    /// - [`MapSyncError::RendererHandshakeTimeout`] after the configured
    ///   timeout; the channel moves to [`ChannelPhase::Failed`]
    /// - [`MapSyncError::Cancelled`] if `cancel` fires first
    pub async fn wait_until_ready(&self, cancel: &CancellationToken) -> Result<(), MapSyncError> {
        let mut rx = self.ready_tx.subscribe();
        let timeout = self.config.handshake_timeout;

        let waited = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(MapSyncError::Cancelled),
            result = tokio::time::timeout(timeout, rx.wait_for(|ready| *ready)) => {
                result.map(|waited| waited.map(|_| ()))
            }
        };

        match waited {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(MapSyncError::Cancelled),
            Err(_) => {
                let mut state = self.state.lock();
                if state.phase == ChannelPhase::Ready {
                    return Ok(());
                }
                state.clear_queue();
                state.transition(ChannelPhase::Failed);
                drop(state);
                warn!(timeout_ms = timeout.as_millis() as u64, "Renderer handshake timed out");
                Err(MapSyncError::RendererHandshakeTimeout(timeout))
            }
        }
    }

    /// Register a handler for renderer events on `topic`.
    pub fn on<F>(&self, topic: Topic, handler: F) -> HandlerId
    where
        F: Fn(&RendererEvent) + Send + Sync + 'static,
    {
        let id = {
            let mut next = self.next_handler_id.lock();
            let id = HandlerId(*next);
            *next += 1;
            id
        };
        self.handlers.lock().push((id, topic, Arc::new(handler)));
        id
    }

    /// Remove a handler. Returns false if it was not registered.
    pub fn off(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers.lock();
        let before = handlers.len();
        handlers.retain(|(hid, _, _)| *hid != id);
        handlers.len() != before
    }

    fn dispatch(&self, event: RendererEvent) -> InboundDisposition {
        let matching: Vec<Handler> = self
            .handlers
            .lock()
            .iter()
            .filter(|(_, topic, _)| topic.matches(&event))
            .map(|(_, _, handler)| Arc::clone(handler))
            .collect();
        for handler in &matching {
            handler(&event);
        }
        InboundDisposition::Dispatched {
            handlers: matching.len(),
        }
    }
}
