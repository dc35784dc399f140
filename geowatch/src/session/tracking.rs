//! Tracking session: wires location, geofences and the map together.
//!
//! One session per screen. The session owns the cancellation token for all
//! of its background work and a liveness flag that late callbacks check
//! before touching the engine or the channel.
//!
//! ```text
//! LocationOrchestrator --position--> GeofenceEngine --events--> SessionEvent
//!                           \------> MapSyncChannel (marker, follow)
//! GeofenceSource --refresh--> GeofenceEngine + MapSyncChannel (ReplaceGeofences)
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::{SessionConfig, SELF_MARKER_ID};
use super::error::SessionError;
use super::events::SessionEvent;
use crate::geofence::{
    EvaluationOutcome, Geofence, GeofenceEngine, GeofenceSource, ReplaceSummary, Subject,
};
use crate::location::{LocationError, LocationOrchestrator, Position, PositionSource};
use crate::map_sync::{MapSyncChannel, MapSyncError, MarkerUpdate, SyncReason};

struct SessionInner {
    config: SessionConfig,
    orchestrator: LocationOrchestrator,
    engine: GeofenceEngine,
    channel: Arc<MapSyncChannel>,
    source: RwLock<Option<Arc<dyn GeofenceSource>>>,
    events: broadcast::Sender<SessionEvent>,
    cancel: CancellationToken,
    alive: AtomicBool,
    geofences_sent: AtomicBool,
}

impl SessionInner {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn emit(&self, event: SessionEvent) {
        if self.is_alive() {
            // No subscribers is fine.
            let _ = self.events.send(event);
        }
    }

    fn apply_position(
        &self,
        subject: &Subject,
        position: Position,
        source: Option<PositionSource>,
    ) -> EvaluationOutcome {
        let outcome = self.engine.update_position(subject, position);
        if !matches!(outcome, EvaluationOutcome::Applied { .. }) {
            return outcome;
        }

        let mut marker = MarkerUpdate::new(marker_id(subject), position.lat_lng());
        if *subject == Subject::SelfDevice {
            if let Some(label) = &self.config.self_marker_label {
                marker = marker.with_label(label.clone());
            }
        }
        self.channel.update_marker(marker);
        if *subject == Subject::SelfDevice && self.config.follow_self {
            self.channel
                .center_on(position.lat_lng(), self.config.follow_zoom);
        }

        self.emit(SessionEvent::PositionUpdated {
            subject: subject.clone(),
            position,
            source,
        });
        for event in outcome.events() {
            info!(event = %event, "Geofence transition");
            self.emit(SessionEvent::Geofence(event.clone()));
        }
        outcome
    }

    fn replace_geofences(&self, geofences: Vec<Geofence>) -> ReplaceSummary {
        let summary = self.engine.replace_geofences(geofences);
        let reason = if self.geofences_sent.swap(true, Ordering::SeqCst) {
            SyncReason::Refresh
        } else {
            SyncReason::Initial
        };
        self.channel
            .replace_geofences(&self.engine.geofences(), reason);
        self.emit(SessionEvent::GeofencesReplaced {
            summary: summary.clone(),
        });
        summary
    }

    async fn track(self: Arc<Self>) {
        match self.orchestrator.acquire(&self.cancel).await {
            Ok(acquisition) if self.is_alive() => {
                self.apply_position(
                    &Subject::SelfDevice,
                    acquisition.position,
                    Some(acquisition.source),
                );
            }
            Ok(_) | Err(LocationError::Cancelled) => return,
            Err(LocationError::AllProvidersExhausted { attempts }) => {
                self.emit(SessionEvent::LocationUnavailable { attempts });
            }
            Err(e) => warn!(error = %e, "Initial position unavailable"),
        }

        let mut subscription = match self.orchestrator.subscribe(&self.cancel).await {
            Ok(subscription) => subscription,
            Err(LocationError::AllProvidersExhausted { attempts }) => {
                self.emit(SessionEvent::LocationUnavailable { attempts });
                return;
            }
            Err(LocationError::Cancelled) => return,
            Err(e) => {
                warn!(error = %e, "Could not start position subscription");
                return;
            }
        };

        while let Some(position) = subscription.next().await {
            if !self.is_alive() {
                break;
            }
            self.apply_position(&Subject::SelfDevice, position, None);
        }

        if !self.cancel.is_cancelled() {
            self.emit(SessionEvent::TrackingStopped {
                reason: subscription.ended_reason().cloned(),
            });
        }
        debug!("Tracking loop finished");
    }

    async fn await_map(self: Arc<Self>) {
        match self.channel.wait_until_ready(&self.cancel).await {
            Ok(()) => self.emit(SessionEvent::MapReady),
            Err(MapSyncError::RendererHandshakeTimeout(timeout)) => {
                self.emit(SessionEvent::MapUnavailable { timeout })
            }
            Err(e) => debug!(error = %e, "Map handshake wait ended"),
        }
    }
}

fn marker_id(subject: &Subject) -> String {
    match subject {
        Subject::SelfDevice => SELF_MARKER_ID.to_string(),
        Subject::Remote(name) => name.clone(),
    }
}

/// Composition root for one tracking view.
pub struct TrackingSession {
    inner: Arc<SessionInner>,
    started: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for TrackingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingSession")
            .field("config", &self.inner.config)
            .field("alive", &self.inner.is_alive())
            .field("started", &self.started.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl TrackingSession {
    pub fn new(
        orchestrator: LocationOrchestrator,
        channel: Arc<MapSyncChannel>,
        config: SessionConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(SessionInner {
                config,
                orchestrator,
                engine: GeofenceEngine::new(),
                channel,
                source: RwLock::new(None),
                events,
                cancel: CancellationToken::new(),
                alive: AtomicBool::new(true),
                geofences_sent: AtomicBool::new(false),
            }),
            started: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Attach the geofence source used by [`refresh`](Self::refresh).
    pub fn with_geofence_source(self, source: Arc<dyn GeofenceSource>) -> Self {
        self.set_geofence_source(source);
        self
    }

    /// Replace the geofence source. The next refresh uses it.
    pub fn set_geofence_source(&self, source: Arc<dyn GeofenceSource>) {
        *self.inner.source.write() = Some(source);
    }

    /// Receive session events. Subscribe before [`start`](Self::start) to
    /// see everything.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn engine(&self) -> &GeofenceEngine {
        &self.inner.engine
    }

    pub fn channel(&self) -> &Arc<MapSyncChannel> {
        &self.inner.channel
    }

    pub fn orchestrator(&self) -> &LocationOrchestrator {
        &self.inner.orchestrator
    }

    pub fn is_alive(&self) -> bool {
        self.inner.is_alive()
    }

    /// Load geofences, then start the handshake wait and position tracking
    /// in the background.
    ///
    /// A failed geofence load is reported as
    /// [`SessionEvent::GeofenceLoadFailed`] and does not stop the session.
    pub async fn start(&self) -> Result<(), SessionError> {
        if !self.is_alive() {
            return Err(SessionError::ShutDown);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(SessionError::AlreadyStarted);
        }
        info!("Starting tracking session");

        let has_source = self.inner.source.read().is_some();
        if has_source {
            if let Err(e) = self.refresh().await {
                warn!(error = %e, "Initial geofence load failed");
            }
        }

        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(Arc::clone(&self.inner).await_map()));
        tasks.push(tokio::spawn(Arc::clone(&self.inner).track()));
        Ok(())
    }

    /// Reload geofences from the source and push them to the engine and map.
    pub async fn refresh(&self) -> Result<ReplaceSummary, SessionError> {
        if !self.is_alive() {
            return Err(SessionError::ShutDown);
        }
        let source = self
            .inner
            .source
            .read()
            .clone()
            .ok_or(SessionError::NoGeofenceSource)?;

        let loaded = tokio::select! {
            _ = self.inner.cancel.cancelled() => return Err(SessionError::ShutDown),
            loaded = source.load() => loaded,
        };

        match loaded {
            Ok(geofences) if self.is_alive() => Ok(self.inner.replace_geofences(geofences)),
            Ok(_) => Err(SessionError::ShutDown),
            Err(e) => {
                self.inner.emit(SessionEvent::GeofenceLoadFailed {
                    message: e.to_string(),
                });
                Err(e.into())
            }
        }
    }

    /// Replace the geofence set directly.
    pub fn replace_geofences(&self, geofences: Vec<Geofence>) -> Result<ReplaceSummary, SessionError> {
        if !self.is_alive() {
            return Err(SessionError::ShutDown);
        }
        Ok(self.inner.replace_geofences(geofences))
    }

    /// Apply a position reported for another subject.
    pub fn report_subject_position(
        &self,
        subject: &Subject,
        position: Position,
    ) -> Result<EvaluationOutcome, SessionError> {
        if !self.is_alive() {
            return Err(SessionError::ShutDown);
        }
        Ok(self.inner.apply_position(subject, position, None))
    }

    /// Forget a subject: its containment state and its map marker.
    ///
    /// Returns whether the engine knew the subject.
    pub fn remove_subject(&self, subject: &Subject) -> Result<bool, SessionError> {
        if !self.is_alive() {
            return Err(SessionError::ShutDown);
        }
        let known = self.inner.engine.remove_subject(subject);
        self.inner.channel.remove_marker(&marker_id(subject));
        debug!(subject = %subject, known, "Subject removed");
        Ok(known)
    }

    /// Stop all background work and release the renderer.
    ///
    /// After this returns no further events are published. Idempotent.
    pub async fn shutdown(&self) {
        if !self.inner.alive.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down tracking session");
        self.inner.cancel.cancel();

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                warn!(error = %e, "Session task ended abnormally");
            }
        }
        self.inner.channel.detach_renderer();
    }
}

impl Drop for TrackingSession {
    fn drop(&mut self) {
        self.inner.alive.store(false, Ordering::SeqCst);
        self.inner.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::geo::LatLng;
    use crate::geofence::{GeofenceShape, StaticGeofenceSource};
    use crate::location::{
        AcquisitionOptions, ProviderChain, ProviderDescriptor, ProviderKind, ProviderOutcome,
        ScriptedLocationProvider,
    };
    use crate::map_sync::MapSyncConfig;

    fn zone() -> Geofence {
        Geofence::new(
            "z1",
            "Zone",
            GeofenceShape::circle("z1", LatLng::new(0.0, 0.0), 1_000.0).unwrap(),
        )
    }

    fn session_with(provider: ScriptedLocationProvider) -> TrackingSession {
        let chain = ProviderChain::new().with(
            ProviderDescriptor::new("scripted", ProviderKind::Legacy),
            Arc::new(provider),
        );
        let orchestrator = LocationOrchestrator::new(
            chain,
            AcquisitionOptions::default().with_max_cache_age(Duration::ZERO),
        );
        let channel = Arc::new(MapSyncChannel::new(
            MapSyncConfig::default().with_handshake_timeout(Duration::from_millis(30)),
        ));
        TrackingSession::new(orchestrator, channel, SessionConfig::default())
    }

    #[tokio::test]
    async fn test_remote_subject_positions_emit_geofence_events() {
        let session = session_with(ScriptedLocationProvider::new());
        session.replace_geofences(vec![zone()]).unwrap();
        let mut events = session.events();

        let unit = Subject::remote("unit-7");
        let outcome = session
            .report_subject_position(&unit, Position::new(0.001, 0.0, 1))
            .unwrap();
        assert_eq!(outcome.events().len(), 1);

        assert!(matches!(
            events.recv().await.unwrap(),
            SessionEvent::PositionUpdated { .. }
        ));
        match events.recv().await.unwrap() {
            SessionEvent::Geofence(event) => assert_eq!(event.subject, unit),
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(session.channel().pending_len(), 2);
    }

    #[tokio::test]
    async fn test_refresh_requires_source() {
        let session = session_with(ScriptedLocationProvider::new());
        assert!(matches!(
            session.refresh().await,
            Err(SessionError::NoGeofenceSource)
        ));
    }

    #[tokio::test]
    async fn test_refresh_replaces_and_tags_reason() {
        let session = session_with(ScriptedLocationProvider::new())
            .with_geofence_source(Arc::new(StaticGeofenceSource::new(vec![zone()])));

        let summary = session.refresh().await.unwrap();
        assert_eq!(summary.added, 1);
        let summary = session.refresh().await.unwrap();
        assert_eq!(summary.retained, 1);
        assert_eq!(session.engine().geofences().len(), 1);
    }

    #[tokio::test]
    async fn test_source_attached_after_start_is_used() {
        let session = session_with(ScriptedLocationProvider::always(ProviderOutcome::Timeout));
        session.start().await.unwrap();

        let session =
            session.with_geofence_source(Arc::new(StaticGeofenceSource::new(vec![zone()])));
        let summary = session.refresh().await.unwrap();
        assert_eq!(summary.added, 1);

        session.set_geofence_source(Arc::new(StaticGeofenceSource::new(Vec::new())));
        let summary = session.refresh().await.unwrap();
        assert_eq!(summary.removed, 1);
        session.shutdown().await;
    }

    #[tokio::test]
    async fn test_removed_subject_leaves_map_snapshot() {
        let session = session_with(ScriptedLocationProvider::new());
        session.replace_geofences(vec![zone()]).unwrap();
        let unit = Subject::remote("unit-7");
        session
            .report_subject_position(&unit, Position::new(0.001, 0.0, 1))
            .unwrap();

        assert!(session.remove_subject(&unit).unwrap());
        assert!(!session.remove_subject(&unit).unwrap());
        assert_eq!(session.engine().containment(&unit, "z1"), None);

        let (transport, mut rx) = crate::map_sync::ChannelTransport::pair();
        session.channel().attach_renderer(Arc::new(transport));
        session
            .channel()
            .handle_inbound(r#"{"type":"Ready","sessionToken":"t1"}"#);
        let mut kinds = Vec::new();
        while let Ok(raw) = rx.try_recv() {
            let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
            assert_ne!(value["id"], "unit-7");
            kinds.push(value["type"].as_str().unwrap().to_string());
        }
        assert_eq!(kinds, vec!["ReplaceGeofences"]);
    }

    #[tokio::test]
    async fn test_start_twice_and_after_shutdown() {
        let session = session_with(ScriptedLocationProvider::always(ProviderOutcome::Timeout));
        session.start().await.unwrap();
        assert!(matches!(
            session.start().await,
            Err(SessionError::AlreadyStarted)
        ));

        session.shutdown().await;
        assert!(!session.is_alive());
        assert!(matches!(
            session.report_subject_position(&Subject::SelfDevice, Position::new(0.0, 0.0, 1)),
            Err(SessionError::ShutDown)
        ));
        assert!(!session.orchestrator().is_subscribed());
    }
}
