//! Geowatch - live location tracking with geofences and map synchronization
//!
//! The library combines three concerns behind one [`session::TrackingSession`]:
//!
//! - [`location`]: best-effort device position from an ordered chain of
//!   unreliable, permission-gated providers
//! - [`geofence`]: edge-triggered enter/exit detection against circular and
//!   polygonal zones
//! - [`map_sync`]: a versioned JSON protocol keeping a detached map renderer
//!   in step across reloads
//!
//! [`geo`] holds the pure distance and containment math they share.

pub mod config;
pub mod geo;
pub mod geofence;
pub mod location;
pub mod logging;
pub mod map_sync;
pub mod session;
