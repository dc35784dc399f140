//! Scripted provider for replays and tests.
//!
//! Plays back a fixed sequence of outcomes, which makes fallback behaviour
//! reproducible without device hardware. The CLI `replay` command builds its
//! chain from these.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::trace;

use super::provider::{BoxFuture, LocationProvider, PositionWatch};
use super::types::{AcquisitionOptions, AuthorizationResult, ProviderOutcome};

/// Call counters observed on a scripted provider.
#[derive(Debug, Default)]
pub struct ScriptedCounters {
    authorization_requests: AtomicUsize,
    fix_requests: AtomicUsize,
    watches_started: AtomicUsize,
    active_watches: AtomicUsize,
}

impl ScriptedCounters {
    pub fn authorization_requests(&self) -> usize {
        self.authorization_requests.load(Ordering::SeqCst)
    }

    pub fn fix_requests(&self) -> usize {
        self.fix_requests.load(Ordering::SeqCst)
    }

    pub fn watches_started(&self) -> usize {
        self.watches_started.load(Ordering::SeqCst)
    }

    /// Watches whose playback task is still running.
    pub fn active_watches(&self) -> usize {
        self.active_watches.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
struct WatchScript {
    outcomes: Vec<ProviderOutcome>,
    interval: Duration,
}

/// Location provider driven by a script of outcomes.
///
/// One-shot requests pop queued outcomes in order and fall back to a default
/// once the queue is empty.
#[derive(Debug)]
pub struct ScriptedLocationProvider {
    queued: Mutex<VecDeque<ProviderOutcome>>,
    fallback: ProviderOutcome,
    authorization: AuthorizationResult,
    fix_delay: Duration,
    watch: Option<WatchScript>,
    counters: Arc<ScriptedCounters>,
}

impl Default for ScriptedLocationProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedLocationProvider {
    /// Provider with an empty script. Requests report `Unavailable`.
    pub fn new() -> Self {
        Self::always(ProviderOutcome::Unavailable(
            "no scripted outcome".to_string(),
        ))
    }

    /// Provider that answers every request with `outcome`.
    pub fn always(outcome: ProviderOutcome) -> Self {
        Self {
            queued: Mutex::new(VecDeque::new()),
            fallback: outcome,
            authorization: AuthorizationResult::Granted,
            fix_delay: Duration::ZERO,
            watch: None,
            counters: Arc::new(ScriptedCounters::default()),
        }
    }

    /// Queue an outcome ahead of the fallback.
    pub fn then(self, outcome: ProviderOutcome) -> Self {
        self.queued.lock().push_back(outcome);
        self
    }

    /// Answer authorization requests with `result`.
    pub fn with_authorization(mut self, result: AuthorizationResult) -> Self {
        self.authorization = result;
        self
    }

    /// Delay every one-shot answer.
    pub fn with_fix_delay(mut self, delay: Duration) -> Self {
        self.fix_delay = delay;
        self
    }

    /// Script the outcomes pushed by a watch, `interval` apart.
    ///
    /// The watch closes after the last outcome.
    pub fn with_watch(mut self, outcomes: Vec<ProviderOutcome>, interval: Duration) -> Self {
        self.watch = Some(WatchScript { outcomes, interval });
        self
    }

    pub fn counters(&self) -> &ScriptedCounters {
        &self.counters
    }

    fn next_outcome(&self) -> ProviderOutcome {
        self.queued
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

impl LocationProvider for ScriptedLocationProvider {
    fn request_authorization(&self) -> BoxFuture<'_, AuthorizationResult> {
        self.counters
            .authorization_requests
            .fetch_add(1, Ordering::SeqCst);
        let result = self.authorization;
        Box::pin(async move { result })
    }

    fn get_current_position(&self, _options: AcquisitionOptions) -> BoxFuture<'_, ProviderOutcome> {
        self.counters.fix_requests.fetch_add(1, Ordering::SeqCst);
        let outcome = self.next_outcome();
        let delay = self.fix_delay;
        Box::pin(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            outcome
        })
    }

    fn watch_position(
        &self,
        _options: AcquisitionOptions,
    ) -> Result<PositionWatch, ProviderOutcome> {
        let Some(script) = self.watch.clone() else {
            return Err(ProviderOutcome::Unavailable(
                "watch not scripted".to_string(),
            ));
        };

        let (tx, cancel, watch) = PositionWatch::channel();
        let counters = Arc::clone(&self.counters);
        counters.watches_started.fetch_add(1, Ordering::SeqCst);
        counters.active_watches.fetch_add(1, Ordering::SeqCst);

        tokio::spawn(async move {
            for (index, outcome) in script.outcomes.into_iter().enumerate() {
                if index > 0 {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(script.interval) => {}
                    }
                }
                if cancel.is_cancelled() || tx.send(outcome).await.is_err() {
                    break;
                }
            }
            trace!("Scripted watch finished");
            counters.active_watches.fetch_sub(1, Ordering::SeqCst);
        });

        Ok(watch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::Position;

    #[tokio::test]
    async fn test_queued_outcomes_then_fallback() {
        let provider = ScriptedLocationProvider::always(ProviderOutcome::Timeout)
            .then(ProviderOutcome::ServicesDisabled);
        let options = AcquisitionOptions::default();

        assert_eq!(
            provider.get_current_position(options.clone()).await,
            ProviderOutcome::ServicesDisabled
        );
        assert_eq!(
            provider.get_current_position(options).await,
            ProviderOutcome::Timeout
        );
        assert_eq!(provider.counters().fix_requests(), 2);
    }

    #[tokio::test]
    async fn test_watch_plays_script_then_closes() {
        let provider = ScriptedLocationProvider::new().with_watch(
            vec![
                ProviderOutcome::Success(Position::new(1.0, 1.0, 1)),
                ProviderOutcome::Timeout,
            ],
            Duration::from_millis(1),
        );
        let mut watch = provider
            .watch_position(AcquisitionOptions::default())
            .unwrap();

        assert!(watch.recv().await.unwrap().is_success());
        assert_eq!(watch.recv().await, Some(ProviderOutcome::Timeout));
        assert_eq!(watch.recv().await, None);
        assert_eq!(provider.counters().watches_started(), 1);
    }

    #[test]
    fn test_unscripted_watch_is_refused() {
        let provider = ScriptedLocationProvider::new();
        assert!(provider
            .watch_position(AcquisitionOptions::default())
            .is_err());
    }
}
