//! Location acquisition with provider fallback.
//!
//! The [`LocationOrchestrator`] walks an ordered [`ProviderChain`] of
//! [`LocationProvider`]s, running each through an authorization and
//! acquisition step with a bounded timeout, and reports every failed attempt
//! when nothing succeeds. It also owns the last-known fix cache and the
//! single continuous [`PositionSubscription`].
//!
//! # Example
//!
//! ```ignore
//! let chain = ProviderChain::new()
//!     .with(ProviderDescriptor::new("fused", ProviderKind::Enhanced), fused)
//!     .with(ProviderDescriptor::new("gps", ProviderKind::Legacy), gps)
//!     .ordered_for(Platform::Android);
//! let orchestrator = LocationOrchestrator::new(chain, AcquisitionOptions::default());
//! let fix = orchestrator.acquire(&cancel).await?;
//! ```

mod clock;
mod error;
mod orchestrator;
mod provider;
mod scripted;
mod subscription;
mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{FailureReason, LocationError, ProviderAttempt, Remediation};
pub use orchestrator::{
    Acquisition, LocationOrchestrator, PositionSource, ProviderChain, ProviderEntry,
};
pub use provider::{
    BoxFuture, LocationProvider, NullLocationProvider, PositionWatch, WATCH_CHANNEL_CAPACITY,
};
pub use scripted::{ScriptedCounters, ScriptedLocationProvider};
pub use subscription::PositionSubscription;
pub use types::{
    AcquisitionOptions, AuthorizationResult, Platform, Position, ProviderDescriptor,
    ProviderKind, ProviderOutcome, DEFAULT_MAX_CACHE_AGE, DEFAULT_MIN_DISTANCE_FILTER_METERS,
    DEFAULT_TIMEOUT,
};
