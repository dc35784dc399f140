//! Integration tests for the tracking session.
//!
//! These tests drive a complete session end to end:
//! - scripted providers → orchestrator fallback → geofence engine
//! - engine transitions → session events
//! - positions and geofences → map channel → in-process renderer
//!
//! Run with: `cargo test --test tracking_session_integration`

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};

use geowatch::geo::LatLng;
use geowatch::geofence::{
    Geofence, GeofenceShape, StaticGeofenceSource, Subject, TransitionKind,
};
use geowatch::location::{
    AcquisitionOptions, FailureReason, LocationOrchestrator, Position, PositionSource,
    ProviderChain, ProviderDescriptor, ProviderKind, ProviderOutcome, ScriptedLocationProvider,
};
use geowatch::map_sync::{
    ChannelPhase, ChannelTransport, MapSyncChannel, MapSyncConfig, OutboundMessage,
    RendererMessage, SyncReason,
};
use geowatch::session::{SessionConfig, SessionError, SessionEvent, TrackingSession};

// ============================================================================
// Helper Functions
// ============================================================================

const WAIT: Duration = Duration::from_secs(5);
const STEP: Duration = Duration::from_millis(20);

/// The square (0,0),(0,2),(2,2),(2,0).
fn campus() -> Geofence {
    let shape = GeofenceShape::polygon(
        "campus",
        vec![
            LatLng::new(0.0, 0.0),
            LatLng::new(0.0, 2.0),
            LatLng::new(2.0, 2.0),
            LatLng::new(2.0, 0.0),
        ],
    )
    .unwrap();
    Geofence::new("campus", "Campus", shape)
}

fn at(lat: f64, lng: f64, millis: i64) -> Position {
    Position::new(lat, lng, millis)
}

/// Outside → inside → outside the campus square.
fn walk_through_campus() -> Vec<Position> {
    vec![at(3.0, 3.0, 1_000), at(1.0, 1.0, 2_000), at(3.0, 3.0, 3_000)]
}

/// A provider that serves `track[0]` once and streams the rest.
fn playback(track: &[Position]) -> ScriptedLocationProvider {
    ScriptedLocationProvider::always(ProviderOutcome::Success(track[0])).with_watch(
        track[1..]
            .iter()
            .copied()
            .map(ProviderOutcome::Success)
            .collect(),
        STEP,
    )
}

/// Enhanced provider times out, legacy provider replays `track`.
fn fallback_orchestrator(track: &[Position]) -> LocationOrchestrator {
    let chain = ProviderChain::new()
        .with(
            ProviderDescriptor::new("fused", ProviderKind::Enhanced),
            Arc::new(ScriptedLocationProvider::always(ProviderOutcome::Timeout)),
        )
        .with(
            ProviderDescriptor::new("gps", ProviderKind::Legacy),
            Arc::new(playback(track)),
        );
    LocationOrchestrator::new(chain, AcquisitionOptions::default())
}

/// Attach an in-process renderer and complete its handshake.
fn attach_ready_renderer(
    channel: &MapSyncChannel,
    token: &str,
) -> mpsc::UnboundedReceiver<String> {
    let (transport, rx) = ChannelTransport::pair();
    channel.attach_renderer(Arc::new(transport));
    channel.handle_inbound(&RendererMessage::ready(token).to_json().unwrap());
    rx
}

fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<OutboundMessage> {
    let mut messages = Vec::new();
    while let Ok(raw) = rx.try_recv() {
        messages.push(serde_json::from_str(&raw).unwrap());
    }
    messages
}

/// Collect events until `done` matches one (inclusive).
async fn collect_until(
    events: &mut broadcast::Receiver<SessionEvent>,
    done: impl Fn(&SessionEvent) -> bool,
) -> Vec<SessionEvent> {
    let mut seen = Vec::new();
    let result = tokio::time::timeout(WAIT, async {
        loop {
            let event = events.recv().await.unwrap();
            let finished = done(&event);
            seen.push(event);
            if finished {
                break;
            }
        }
    })
    .await;
    assert!(result.is_ok(), "timed out; events so far: {:#?}", seen);
    seen
}

fn is_tracking_stopped(event: &SessionEvent) -> bool {
    matches!(event, SessionEvent::TrackingStopped { .. })
}

fn geofence_transitions(events: &[SessionEvent]) -> Vec<(TransitionKind, String)> {
    events
        .iter()
        .filter_map(|event| match event {
            SessionEvent::Geofence(e) => Some((e.kind, e.geofence_id.clone())),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Integration Tests
// ============================================================================

/// A walk through the campus with a failing primary provider.
///
/// 1. Geofences load from the source and reach the renderer as `initial`
/// 2. The enhanced provider times out, the legacy one answers
/// 3. Subscription updates cross the boundary in and out once each
/// 4. The stream ends and the session reports it
#[tokio::test]
async fn test_walk_through_geofence_with_provider_fallback() {
    let channel = Arc::new(MapSyncChannel::default());
    let mut renderer = attach_ready_renderer(&channel, "page-1");

    let session = TrackingSession::new(
        fallback_orchestrator(&walk_through_campus()),
        Arc::clone(&channel),
        SessionConfig::default(),
    )
    .with_geofence_source(Arc::new(StaticGeofenceSource::new(vec![campus()])));
    let mut events = session.events();

    session.start().await.unwrap();
    let seen = collect_until(&mut events, is_tracking_stopped).await;

    match &seen[0] {
        SessionEvent::GeofencesReplaced { summary } => assert_eq!(summary.added, 1),
        other => panic!("expected GeofencesReplaced first, got {:?}", other),
    }

    let first_fix = seen
        .iter()
        .find_map(|event| match event {
            SessionEvent::PositionUpdated {
                source: Some(source),
                ..
            } => Some(source.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(
        first_fix,
        PositionSource::Provider {
            id: "gps".to_string(),
            kind: ProviderKind::Legacy,
        }
    );

    assert_eq!(
        geofence_transitions(&seen),
        vec![
            (TransitionKind::Entered, "campus".to_string()),
            (TransitionKind::Exited, "campus".to_string()),
        ]
    );
    assert_eq!(
        seen.last(),
        Some(&SessionEvent::TrackingStopped { reason: None })
    );

    let messages = drain(&mut renderer);
    assert!(matches!(
        &messages[0],
        OutboundMessage::ReplaceGeofences {
            reason: SyncReason::Initial,
            ..
        }
    ));
    let markers = messages
        .iter()
        .filter(|m| matches!(m, OutboundMessage::UpdateMarker(u) if u.id == "self"))
        .count();
    assert_eq!(markers, 3);

    session.shutdown().await;
}

/// Every provider failing surfaces one event listing each attempt.
#[tokio::test]
async fn test_all_providers_failing_reports_attempts() {
    let chain = ProviderChain::new()
        .with(
            ProviderDescriptor::new("fused", ProviderKind::Enhanced),
            Arc::new(ScriptedLocationProvider::always(ProviderOutcome::Timeout)),
        )
        .with(
            ProviderDescriptor::new("gps", ProviderKind::Legacy),
            Arc::new(ScriptedLocationProvider::always(ProviderOutcome::Timeout)),
        );
    let session = TrackingSession::new(
        LocationOrchestrator::new(chain, AcquisitionOptions::default()),
        Arc::new(MapSyncChannel::default()),
        SessionConfig::default(),
    );
    let mut events = session.events();

    session.start().await.unwrap();
    let seen = collect_until(&mut events, |e| {
        matches!(e, SessionEvent::LocationUnavailable { .. })
    })
    .await;

    match seen.last() {
        Some(SessionEvent::LocationUnavailable { attempts }) => {
            let ids: Vec<&str> = attempts.iter().map(|a| a.provider_id.as_str()).collect();
            assert_eq!(ids, vec!["fused", "gps"]);
            assert!(attempts
                .iter()
                .all(|a| a.reason == FailureReason::ProviderTimeout));
        }
        other => panic!("expected LocationUnavailable, got {:?}", other),
    }

    session.shutdown().await;
}

/// Positions reported for other subjects run through the same engine and
/// get their own marker.
#[tokio::test]
async fn test_remote_subject_transitions_are_independent() {
    let channel = Arc::new(MapSyncChannel::default());
    let mut renderer = attach_ready_renderer(&channel, "page-1");
    let session = TrackingSession::new(
        LocationOrchestrator::new(ProviderChain::new(), AcquisitionOptions::default()),
        Arc::clone(&channel),
        SessionConfig::default(),
    );
    session.replace_geofences(vec![campus()]).unwrap();

    let alice = Subject::remote("alice");
    let entered = session
        .report_subject_position(&alice, at(1.0, 1.0, 10))
        .unwrap();
    assert_eq!(entered.events().len(), 1);
    assert_eq!(entered.events()[0].kind, TransitionKind::Entered);

    // Stale report: ignored, no marker move.
    let stale = session
        .report_subject_position(&alice, at(3.0, 3.0, 5))
        .unwrap();
    assert!(stale.events().is_empty());

    assert_eq!(session.engine().inside_of(&alice), vec!["campus".to_string()]);
    assert!(session.engine().inside_of(&Subject::SelfDevice).is_empty());

    let markers: Vec<String> = drain(&mut renderer)
        .into_iter()
        .filter_map(|m| match m {
            OutboundMessage::UpdateMarker(u) => Some(u.id),
            _ => None,
        })
        .collect();
    assert_eq!(markers, vec!["alice".to_string()]);
}

/// A silent renderer fails the handshake; a late one still gets the full
/// current state.
#[tokio::test]
async fn test_handshake_timeout_then_late_renderer_resyncs() {
    let channel = Arc::new(MapSyncChannel::new(
        MapSyncConfig::default().with_handshake_timeout(Duration::from_millis(50)),
    ));
    let track = vec![at(1.0, 1.0, 1_000)];
    let chain = ProviderChain::new().with(
        ProviderDescriptor::new("gps", ProviderKind::Legacy),
        Arc::new(playback(&track)),
    );
    let session = TrackingSession::new(
        LocationOrchestrator::new(chain, AcquisitionOptions::default()),
        Arc::clone(&channel),
        SessionConfig::default(),
    )
    .with_geofence_source(Arc::new(StaticGeofenceSource::new(vec![campus()])));
    let mut events = session.events();

    session.start().await.unwrap();
    let seen = collect_until(&mut events, |e| {
        matches!(e, SessionEvent::MapUnavailable { .. })
    })
    .await;
    assert!(seen
        .iter()
        .any(|e| matches!(e, SessionEvent::PositionUpdated { .. })));
    assert_eq!(channel.phase(), ChannelPhase::Failed);
    assert_eq!(channel.pending_len(), 0);

    let mut renderer = attach_ready_renderer(&channel, "late");
    assert!(channel.is_ready());

    let messages = drain(&mut renderer);
    let kinds: Vec<&str> = messages.iter().map(|m| m.kind()).collect();
    assert_eq!(kinds, vec!["UpdateMarker", "ReplaceGeofences", "CenterOn"]);
    assert!(matches!(
        &messages[1],
        OutboundMessage::ReplaceGeofences {
            reason: SyncReason::Refresh,
            ..
        }
    ));

    session.shutdown().await;
}

/// A broken geofence source is reported and tracking goes on.
#[tokio::test]
async fn test_geofence_load_failure_is_not_fatal() {
    let temp = tempfile::TempDir::new().unwrap();
    let missing = temp.path().join("missing.json");

    let session = TrackingSession::new(
        fallback_orchestrator(&walk_through_campus()),
        Arc::new(MapSyncChannel::default()),
        SessionConfig::default(),
    )
    .with_geofence_source(Arc::new(StaticGeofenceSource::from_file(&missing)));
    let mut events = session.events();

    session.start().await.unwrap();
    let seen = collect_until(&mut events, is_tracking_stopped).await;

    assert!(matches!(
        &seen[0],
        SessionEvent::GeofenceLoadFailed { .. }
    ));
    let positions = seen
        .iter()
        .filter(|e| matches!(e, SessionEvent::PositionUpdated { .. }))
        .count();
    assert_eq!(positions, 3);
    assert!(geofence_transitions(&seen).is_empty());

    // The file appears later; an explicit refresh picks it up.
    std::fs::write(
        &missing,
        r#"[{"id": "campus", "name": "Campus", "polygon": [[0,0],[0,2],[2,2],[2,0]], "is_active": true}]"#,
    )
    .unwrap();
    let summary = session.refresh().await.unwrap();
    assert_eq!(summary.added, 1);

    session.shutdown().await;
}

/// Shutdown stops every emission and the session cannot be restarted.
#[tokio::test]
async fn test_shutdown_is_final() {
    let channel = Arc::new(MapSyncChannel::default());
    let _renderer = attach_ready_renderer(&channel, "page-1");
    let slow_track: Vec<Position> = (0..50)
        .map(|i| at(3.0 + i as f64 * 0.01, 3.0, 1_000 + i * 1_000))
        .collect();
    let chain = ProviderChain::new().with(
        ProviderDescriptor::new("gps", ProviderKind::Legacy),
        Arc::new(
            ScriptedLocationProvider::always(ProviderOutcome::Success(slow_track[0])).with_watch(
                slow_track[1..]
                    .iter()
                    .copied()
                    .map(ProviderOutcome::Success)
                    .collect(),
                Duration::from_millis(200),
            ),
        ),
    );
    let session = TrackingSession::new(
        LocationOrchestrator::new(chain, AcquisitionOptions::default()),
        Arc::clone(&channel),
        SessionConfig::default(),
    );
    let mut events = session.events();

    session.start().await.unwrap();
    assert!(matches!(
        session.start().await,
        Err(SessionError::AlreadyStarted)
    ));
    collect_until(&mut events, |e| {
        matches!(e, SessionEvent::PositionUpdated { .. })
    })
    .await;

    session.shutdown().await;
    assert!(!session.is_alive());
    assert!(!session.orchestrator().is_subscribed());
    assert_eq!(channel.phase(), ChannelPhase::Detached);

    tokio::time::sleep(Duration::from_millis(300)).await;
    loop {
        match events.try_recv() {
            Ok(SessionEvent::MapReady) | Ok(SessionEvent::PositionUpdated { .. }) => {}
            Ok(other) => panic!("unexpected event after shutdown: {:?}", other),
            Err(broadcast::error::TryRecvError::Empty)
            | Err(broadcast::error::TryRecvError::Closed) => break,
            Err(e) => panic!("unexpected receive error: {:?}", e),
        }
    }

    assert!(matches!(session.start().await, Err(SessionError::ShutDown)));
    assert!(matches!(
        session.report_subject_position(&Subject::remote("bob"), at(1.0, 1.0, 1)),
        Err(SessionError::ShutDown)
    ));
}
