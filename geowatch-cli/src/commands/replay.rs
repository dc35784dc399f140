//! Replay command - play a recorded track through a full tracking session.
//!
//! The map renderer is simulated in-process: a loopback transport answers
//! the handshake and optionally prints every protocol message it receives.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use console::style;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use geowatch::geofence::Subject;
use geowatch::location::PositionSource;
use geowatch::map_sync::{ChannelTransport, MapSyncChannel, RendererMessage};
use geowatch::session::{SessionEvent, TrackingSession};

use super::common::{geofence_source, load_config, replay_orchestrator, ReplayArgs, Track};
use crate::error::CliError;

/// Arguments for the replay command.
#[derive(Debug, Args)]
pub struct ReplayCommandArgs {
    #[command(flatten)]
    pub replay: ReplayArgs,

    /// Print every message sent to the simulated map renderer
    #[arg(long)]
    pub show_messages: bool,
}

/// When the event loop should stop on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum StopWhen {
    /// After position tracking ends.
    TrackingEnds,
    /// Only on Ctrl+C.
    Interrupted,
}

/// Run the replay command.
pub async fn run(args: ReplayCommandArgs, config_path: Option<PathBuf>) -> Result<(), CliError> {
    let config = load_config(config_path.as_deref())?;
    let track = Track::load(&args.replay.track, args.replay.interval_ms)?;
    let channel = Arc::new(MapSyncChannel::new(config.map_sync_config()));
    let session = build_session(&args.replay, &track, &config, Arc::clone(&channel))?;

    println!(
        "Replaying {} positions, {} ms apart",
        track.positions.len(),
        track.interval.as_millis()
    );

    let renderer = spawn_loopback_renderer(channel, args.show_messages)?;
    let result = drive_session(&session, StopWhen::TrackingEnds).await;
    renderer.abort();
    result
}

/// Build a session replaying `track`, with the configured geofence source.
pub(super) fn build_session(
    args: &ReplayArgs,
    track: &Track,
    config: &geowatch::config::ConfigFile,
    channel: Arc<MapSyncChannel>,
) -> Result<TrackingSession, CliError> {
    let orchestrator = replay_orchestrator(track, args.fail_primary, config);
    let mut session = TrackingSession::new(orchestrator, channel, config.session_config());
    if let Some(source) = geofence_source(args.geofences.as_deref(), config)? {
        session = session.with_geofence_source(source);
    }
    Ok(session)
}

/// Attach an in-process renderer that completes the handshake at once.
fn spawn_loopback_renderer(
    channel: Arc<MapSyncChannel>,
    show_messages: bool,
) -> Result<JoinHandle<()>, CliError> {
    let (transport, mut outbound) = ChannelTransport::pair();
    let renderer = channel.attach_renderer(Arc::new(transport));

    let token = format!("loopback-{}", chrono::Utc::now().timestamp_millis());
    let ready = RendererMessage::ready(token)
        .to_json()
        .map_err(|e| CliError::Config(format!("cannot encode handshake: {}", e)))?;
    channel.handle_inbound(&ready);
    info!(renderer = %renderer, "Loopback renderer attached");

    Ok(tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            if show_messages {
                println!("  {} {}", style("map <-").cyan(), message);
            }
        }
    }))
}

/// Start `session` and print its events until `stop` says otherwise.
pub(super) async fn drive_session(
    session: &TrackingSession,
    stop: StopWhen,
) -> Result<(), CliError> {
    let mut events = session.events();
    session.start().await?;

    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);

    loop {
        tokio::select! {
            _ = &mut interrupted => {
                println!();
                println!("Interrupted");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => {
                    println!("{}", describe(&event));
                    let finished = matches!(
                        event,
                        SessionEvent::TrackingStopped { .. } | SessionEvent::LocationUnavailable { .. }
                    );
                    if finished && stop == StopWhen::TrackingEnds {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event printer fell behind");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    let inside = session.engine().inside_of(&Subject::SelfDevice);
    session.shutdown().await;

    println!();
    if inside.is_empty() {
        println!("Finished outside all geofences");
    } else {
        println!("Finished inside: {}", inside.join(", "));
    }
    Ok(())
}

/// One line per session event.
pub(super) fn describe(event: &SessionEvent) -> String {
    match event {
        SessionEvent::PositionUpdated {
            subject,
            position,
            source,
        } => {
            let via = match source {
                Some(PositionSource::Provider { id, kind }) => format!(" via {} ({})", id, kind),
                Some(PositionSource::Cache) => " from cache".to_string(),
                None => String::new(),
            };
            let accuracy = position
                .accuracy_meters
                .map(|a| format!(" ±{:.0} m", a))
                .unwrap_or_default();
            format!(
                "{} {} at {}{}{}",
                style("position").blue(),
                subject,
                position.lat_lng(),
                accuracy,
                via
            )
        }
        SessionEvent::Geofence(event) => {
            format!("{} {}", style("geofence").green().bold(), event)
        }
        SessionEvent::LocationUnavailable { attempts } => {
            let mut line = format!("{} every provider failed", style("location").red());
            for attempt in attempts {
                line.push_str(&format!("\n    {}", attempt));
            }
            line
        }
        SessionEvent::TrackingStopped { reason } => match reason {
            Some(reason) => format!("{} tracking stopped: {}", style("location").yellow(), reason),
            None => format!("{} tracking ended", style("location").dim()),
        },
        SessionEvent::GeofencesReplaced { summary } => format!(
            "{} {} added, {} retained, {} removed, {} inactive",
            style("geofences").cyan(),
            summary.added,
            summary.retained,
            summary.removed,
            summary.inactive
        ),
        SessionEvent::GeofenceLoadFailed { message } => {
            format!("{} load failed: {}", style("geofences").red(), message)
        }
        SessionEvent::MapReady => format!("{} renderer ready", style("map").cyan()),
        SessionEvent::MapUnavailable { timeout } => format!(
            "{} renderer did not answer within {:?}",
            style("map").red(),
            timeout
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geowatch::geofence::{GeofenceEvent, TransitionKind};
    use geowatch::location::{Position, ProviderKind};

    #[test]
    fn test_describe_position_names_provider() {
        console::set_colors_enabled(false);
        let line = describe(&SessionEvent::PositionUpdated {
            subject: Subject::SelfDevice,
            position: Position::new(1.0, 2.0, 10).with_accuracy(4.0),
            source: Some(PositionSource::Provider {
                id: "legacy".to_string(),
                kind: ProviderKind::Legacy,
            }),
        });
        assert!(line.starts_with("position self at "));
        assert!(line.contains("±4 m"));
        assert!(line.ends_with("via legacy (legacy)"));
    }

    #[test]
    fn test_describe_geofence_event() {
        console::set_colors_enabled(false);
        let line = describe(&SessionEvent::Geofence(GeofenceEvent {
            kind: TransitionKind::Entered,
            subject: Subject::SelfDevice,
            geofence_id: "z1".to_string(),
            geofence_name: "Campus".to_string(),
            position: Position::new(1.0, 1.0, 1),
        }));
        assert!(line.starts_with("geofence self entered 'Campus' (z1)"));
    }

    #[test]
    fn test_describe_tracking_end() {
        console::set_colors_enabled(false);
        assert_eq!(
            describe(&SessionEvent::TrackingStopped { reason: None }),
            "location tracking ended"
        );
    }
}
