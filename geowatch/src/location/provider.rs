//! Location capability abstraction.
//!
//! A [`LocationProvider`] wraps one native location backend. Presence of the
//! backend is resolved once at startup: hosts without a capability register a
//! [`NullLocationProvider`] instead, so the orchestrator never performs
//! presence checks itself.
//!
//! The trait uses boxed futures so providers can be stored as
//! `Arc<dyn LocationProvider>` in a fallback chain.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::types::{AcquisitionOptions, AuthorizationResult, ProviderOutcome};

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Capacity of the channel between a provider watch and its consumer.
pub const WATCH_CHANNEL_CAPACITY: usize = 16;

/// A live provider watch.
///
/// The provider pushes outcomes into `updates` until its cancellation token
/// fires. Cancelling (or dropping) the watch signals the provider to release
/// its native handle and closes the receiving side so nothing more is read.
#[derive(Debug)]
pub struct PositionWatch {
    updates: mpsc::Receiver<ProviderOutcome>,
    cancel: CancellationToken,
}

impl PositionWatch {
    /// Create a watch from the provider's update channel and the token the
    /// provider observes.
    pub fn new(updates: mpsc::Receiver<ProviderOutcome>, cancel: CancellationToken) -> Self {
        Self { updates, cancel }
    }

    /// Create a linked channel and token for a provider implementation.
    ///
    /// The provider keeps the sender and a clone of the token; the returned
    /// watch is handed to the orchestrator.
    pub fn channel() -> (mpsc::Sender<ProviderOutcome>, CancellationToken, Self) {
        let (tx, rx) = mpsc::channel(WATCH_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        (tx, cancel.clone(), Self::new(rx, cancel))
    }

    /// Receive the next pushed outcome, or `None` once the watch is closed.
    pub async fn recv(&mut self) -> Option<ProviderOutcome> {
        self.updates.recv().await
    }

    /// Stop the watch. Idempotent.
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.updates.close();
    }

    /// Returns true once the watch has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for PositionWatch {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// One device location backend.
pub trait LocationProvider: Send + Sync {
    /// Ask the user (or platform) for location access.
    ///
    /// May suspend indefinitely while a prompt is shown; callers bound it
    /// with cancellation, not a timeout.
    fn request_authorization(&self) -> BoxFuture<'_, AuthorizationResult>;

    /// Obtain a single fix.
    fn get_current_position(&self, options: AcquisitionOptions) -> BoxFuture<'_, ProviderOutcome>;

    /// Start pushing fixes until the returned watch is cancelled.
    ///
    /// Returns the failure outcome if the watch cannot be opened.
    fn watch_position(&self, options: AcquisitionOptions)
        -> Result<PositionWatch, ProviderOutcome>;
}

/// Null object for hosts without a location capability.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLocationProvider;

impl NullLocationProvider {
    const REASON: &'static str = "location capability not present";
}

impl LocationProvider for NullLocationProvider {
    fn request_authorization(&self) -> BoxFuture<'_, AuthorizationResult> {
        Box::pin(async { AuthorizationResult::Granted })
    }

    fn get_current_position(&self, _options: AcquisitionOptions) -> BoxFuture<'_, ProviderOutcome> {
        Box::pin(async { ProviderOutcome::Unavailable(Self::REASON.to_string()) })
    }

    fn watch_position(
        &self,
        _options: AcquisitionOptions,
    ) -> Result<PositionWatch, ProviderOutcome> {
        Err(ProviderOutcome::Unavailable(Self::REASON.to_string()))
    }
}
