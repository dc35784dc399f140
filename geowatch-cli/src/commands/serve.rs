//! Serve command - expose the map protocol over WebSocket while replaying.
//!
//! A browser page (or any WebSocket client speaking the renderer side of
//! the protocol) connects to the listen address, sends `Ready`, and from
//! then on receives markers, geofences and camera moves. Reloading the
//! page triggers a full resync.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use geowatch::map_sync::{run_websocket_server, MapSyncChannel};

use super::common::{load_config, ReplayArgs, Track};
use super::replay::{build_session, drive_session, StopWhen};
use crate::error::CliError;

/// Arguments for the serve command.
#[derive(Debug, Args)]
pub struct ServeArgs {
    #[command(flatten)]
    pub replay: ReplayArgs,

    /// Listen address (overrides [map] listen)
    #[arg(long)]
    pub listen: Option<String>,
}

/// Run the serve command.
pub async fn run(args: ServeArgs, config_path: Option<PathBuf>) -> Result<(), CliError> {
    let config = load_config(config_path.as_deref())?;
    let track = Track::load(&args.replay.track, args.replay.interval_ms)?;
    let addr = args.listen.unwrap_or_else(|| config.map.listen.clone());

    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|error| CliError::Bind {
            addr: addr.clone(),
            error,
        })?;

    let channel = Arc::new(MapSyncChannel::new(config.map_sync_config()));
    let session = build_session(&args.replay, &track, &config, Arc::clone(&channel))?;

    let cancel = CancellationToken::new();
    let server = tokio::spawn(run_websocket_server(
        listener,
        Arc::clone(&channel),
        cancel.clone(),
    ));

    println!("Renderer bridge listening on ws://{}", addr);
    println!("Replaying {} positions. Press Ctrl+C to stop.", track.positions.len());
    println!();

    let result = drive_session(&session, StopWhen::Interrupted).await;

    cancel.cancel();
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(e.into()),
        Err(e) => warn!(error = %e, "Renderer bridge task ended abnormally"),
    }
    result
}
