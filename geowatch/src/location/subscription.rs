//! Continuous position subscription.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::FailureReason;
use super::orchestrator::record_last_known;
use super::provider::PositionWatch;
use super::types::{Position, ProviderOutcome};
use crate::geo::haversine_meters;

/// Holds the orchestrator's single-subscription flag until dropped.
#[derive(Debug)]
pub(crate) struct SubscriptionGuard {
    flag: Arc<AtomicBool>,
}

impl SubscriptionGuard {
    /// Claim the flag, or `None` if another subscription holds it.
    pub(crate) fn acquire(flag: Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Stream of filtered positions from one provider watch.
///
/// Positions are delivered in strictly increasing capture-time order and only
/// after moving at least the configured distance from the previous emission.
/// After [`cancel`](Self::cancel) (or when the parent token fires),
/// [`next`](Self::next) returns `None` and the provider watch is released.
#[derive(Debug)]
pub struct PositionSubscription {
    provider_id: String,
    watch: PositionWatch,
    cancel: CancellationToken,
    min_distance_meters: f64,
    last_emitted: Option<Position>,
    last_known: Arc<RwLock<Option<Position>>>,
    ended_reason: Option<FailureReason>,
    guard: Option<SubscriptionGuard>,
}

impl PositionSubscription {
    pub(crate) fn new(
        provider_id: String,
        watch: PositionWatch,
        cancel: CancellationToken,
        min_distance_meters: f64,
        last_known: Arc<RwLock<Option<Position>>>,
        guard: SubscriptionGuard,
    ) -> Self {
        Self {
            provider_id,
            watch,
            cancel,
            min_distance_meters,
            last_emitted: None,
            last_known,
            ended_reason: None,
            guard: Some(guard),
        }
    }

    /// Provider feeding this subscription.
    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    /// Why the stream ended on its own, if it did.
    pub fn ended_reason(&self) -> Option<&FailureReason> {
        self.ended_reason.as_ref()
    }

    /// Returns true once no further positions will be delivered.
    pub fn is_finished(&self) -> bool {
        self.guard.is_none()
    }

    /// Token that stops this subscription when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the next accepted position.
    ///
    /// Returns `None` once the subscription is cancelled, the provider closes
    /// its watch, or the provider reports a failure that needs the user
    /// (permission revoked, services switched off).
    pub async fn next(&mut self) -> Option<Position> {
        loop {
            if self.is_finished() {
                return None;
            }

            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    self.finish();
                    return None;
                }
                outcome = self.watch.recv() => outcome,
            };

            match outcome {
                None => {
                    debug!(provider = %self.provider_id, "Provider watch closed");
                    self.finish();
                    return None;
                }
                Some(ProviderOutcome::Success(position)) => {
                    if let Some(accepted) = self.accept(position) {
                        return Some(accepted);
                    }
                }
                Some(failure) => {
                    let Some(reason) = FailureReason::from_outcome(&failure) else {
                        continue;
                    };
                    if reason.is_user_recoverable() {
                        warn!(
                            provider = %self.provider_id,
                            reason = %reason,
                            "Position subscription ended"
                        );
                        self.ended_reason = Some(reason);
                        self.finish();
                        return None;
                    }
                    debug!(
                        provider = %self.provider_id,
                        reason = %reason,
                        "Transient watch failure, waiting for next fix"
                    );
                }
            }
        }
    }

    /// Stop the subscription. Idempotent.
    pub fn cancel(&mut self) {
        if !self.is_finished() {
            info!(provider = %self.provider_id, "Position subscription cancelled");
        }
        self.cancel.cancel();
        self.finish();
    }

    fn accept(&mut self, position: Position) -> Option<Position> {
        if !position.lat_lng().is_valid() {
            debug!(provider = %self.provider_id, "Dropping fix with invalid coordinates");
            return None;
        }
        if let Some(previous) = self.last_emitted {
            if !position.is_newer_than(&previous) {
                debug!(
                    provider = %self.provider_id,
                    ts = position.captured_at_millis,
                    last_ts = previous.captured_at_millis,
                    "Dropping out-of-order fix"
                );
                return None;
            }
            let moved = haversine_meters(previous.lat_lng(), position.lat_lng());
            if moved < self.min_distance_meters {
                return None;
            }
        }

        self.last_emitted = Some(position);
        record_last_known(&self.last_known, position);
        Some(position)
    }

    fn finish(&mut self) {
        self.watch.cancel();
        self.guard = None;
    }
}

impl Drop for PositionSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::location::orchestrator::{LocationOrchestrator, ProviderChain};
    use crate::location::scripted::ScriptedLocationProvider;
    use crate::location::types::{AcquisitionOptions, ProviderDescriptor, ProviderKind};
    use crate::location::LocationError;

    fn orchestrator_with(provider: Arc<ScriptedLocationProvider>) -> LocationOrchestrator {
        let chain =
            ProviderChain::new().with(ProviderDescriptor::new("p", ProviderKind::Legacy), provider);
        LocationOrchestrator::new(chain, AcquisitionOptions::default().with_min_distance_filter(10.0))
    }

    #[tokio::test]
    async fn test_filters_small_moves_and_stale_fixes() {
        let provider = Arc::new(ScriptedLocationProvider::new().with_watch(
            vec![
                ProviderOutcome::Success(Position::new(0.0, 0.0, 1)),
                // ~1 m away: filtered
                ProviderOutcome::Success(Position::new(0.00001, 0.0, 2)),
                // older: filtered
                ProviderOutcome::Success(Position::new(1.0, 0.0, 0)),
                ProviderOutcome::Timeout,
                ProviderOutcome::Success(Position::new(0.001, 0.0, 3)),
            ],
            Duration::from_millis(1),
        ));
        let orchestrator = orchestrator_with(provider);
        let mut sub = orchestrator.subscribe(&CancellationToken::new()).await.unwrap();

        assert_eq!(sub.next().await, Some(Position::new(0.0, 0.0, 1)));
        assert_eq!(sub.next().await, Some(Position::new(0.001, 0.0, 3)));
        assert_eq!(sub.next().await, None);
        assert_eq!(
            orchestrator.last_known_position(),
            Some(Position::new(0.001, 0.0, 3))
        );
    }

    #[tokio::test]
    async fn test_second_subscription_rejected_until_first_cancelled() {
        let provider = Arc::new(ScriptedLocationProvider::new().with_watch(
            vec![ProviderOutcome::Success(Position::new(0.0, 0.0, 1))],
            Duration::from_millis(1),
        ));
        let orchestrator = orchestrator_with(provider.clone());
        let cancel = CancellationToken::new();

        let mut first = orchestrator.subscribe(&cancel).await.unwrap();
        let second = orchestrator.subscribe(&cancel).await;
        assert!(matches!(second, Err(LocationError::SubscriptionAlreadyActive)));
        assert!(orchestrator.is_subscribed());
        assert_eq!(provider.counters().watches_started(), 1);

        first.cancel();
        assert!(!orchestrator.is_subscribed());
        assert!(orchestrator.subscribe(&cancel).await.is_ok());
    }

    #[tokio::test]
    async fn test_cancel_stops_emissions() {
        let positions = (0..50)
            .map(|i| ProviderOutcome::Success(Position::new(i as f64 * 0.01, 0.0, i + 1)))
            .collect();
        let provider = Arc::new(
            ScriptedLocationProvider::new().with_watch(positions, Duration::from_millis(5)),
        );
        let orchestrator = orchestrator_with(provider.clone());
        let mut sub = orchestrator.subscribe(&CancellationToken::new()).await.unwrap();

        assert!(sub.next().await.is_some());
        sub.cancel();
        assert!(sub.is_finished());
        assert_eq!(sub.next().await, None);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(provider.counters().active_watches(), 0);
    }

    #[tokio::test]
    async fn test_permission_revoked_ends_stream() {
        let provider = Arc::new(ScriptedLocationProvider::new().with_watch(
            vec![
                ProviderOutcome::Success(Position::new(0.0, 0.0, 1)),
                ProviderOutcome::PermissionDenied,
                ProviderOutcome::Success(Position::new(1.0, 0.0, 2)),
            ],
            Duration::from_millis(1),
        ));
        let orchestrator = orchestrator_with(provider);
        let mut sub = orchestrator.subscribe(&CancellationToken::new()).await.unwrap();

        assert!(sub.next().await.is_some());
        assert_eq!(sub.next().await, None);
        assert_eq!(sub.ended_reason(), Some(&FailureReason::PermissionDenied));
        assert!(!orchestrator.is_subscribed());
    }

    #[tokio::test]
    async fn test_parent_token_cancels_subscription() {
        let provider = Arc::new(ScriptedLocationProvider::new().with_watch(
            vec![ProviderOutcome::Success(Position::new(0.0, 0.0, 1))],
            Duration::from_secs(60),
        ));
        let orchestrator = orchestrator_with(provider);
        let parent = CancellationToken::new();
        let mut sub = orchestrator.subscribe(&parent).await.unwrap();

        parent.cancel();
        assert_eq!(sub.next().await, None);
        assert!(!orchestrator.is_subscribed());
    }
}
