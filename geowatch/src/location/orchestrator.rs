//! Location provider orchestrator.
//!
//! Produces a best-effort current [`Position`] from an ordered chain of
//! unreliable, permission-gated providers.
//!
//! # Per-Provider State Machine
//!
//! ```text
//! Idle --> RequestingPermission --> Denied --------------------------> next provider
//!   |                          \--> Granted --> Acquiring --> Success
//!   \--------(no prompt needed)--------------/          \--> Timeout ---> next provider
//!                                                        \--> Unavailable -> next provider
//! ```
//!
//! Only diagnostic context ([`ProviderAttempt`]) is carried from one provider
//! to the next. When the chain is exhausted the caller receives
//! [`LocationError::AllProvidersExhausted`] listing every attempt.
//!
//! # Cache
//!
//! The orchestrator owns the single last-known fix. A request is answered
//! from it when it is younger than `max_cache_age`, trading accuracy for
//! latency; the returned [`Acquisition`] says so via [`PositionSource::Cache`].

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use super::error::{FailureReason, LocationError, ProviderAttempt};
use super::provider::LocationProvider;
use super::subscription::{PositionSubscription, SubscriptionGuard};
use super::types::{
    AcquisitionOptions, AuthorizationResult, Platform, Position, ProviderDescriptor, ProviderKind,
    ProviderOutcome,
};

/// A provider bound to its descriptor.
#[derive(Clone)]
pub struct ProviderEntry {
    pub descriptor: ProviderDescriptor,
    pub provider: Arc<dyn LocationProvider>,
}

impl fmt::Debug for ProviderEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderEntry")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Ordered fallback chain of providers.
#[derive(Debug, Clone, Default)]
pub struct ProviderChain {
    entries: Vec<ProviderEntry>,
}

impl ProviderChain {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a provider (registration order is the default priority).
    pub fn with(
        mut self,
        descriptor: ProviderDescriptor,
        provider: Arc<dyn LocationProvider>,
    ) -> Self {
        self.entries.push(ProviderEntry {
            descriptor,
            provider,
        });
        self
    }

    /// Reorder for a platform's preferred fallback order.
    ///
    /// The sort is stable, so providers of the same kind keep their
    /// registration order.
    pub fn ordered_for(mut self, platform: Platform) -> Self {
        self.entries
            .sort_by_key(|entry| platform.rank(entry.descriptor.kind));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Descriptors in priority order.
    pub fn descriptors(&self) -> impl Iterator<Item = &ProviderDescriptor> {
        self.entries.iter().map(|entry| &entry.descriptor)
    }

    pub(crate) fn entries(&self) -> &[ProviderEntry] {
        &self.entries
    }
}

/// Where an acquired position came from.
#[derive(Debug, Clone, PartialEq)]
pub enum PositionSource {
    /// A fresh fix from the named provider.
    Provider { id: String, kind: ProviderKind },
    /// The orchestrator's last-known fix.
    Cache,
}

/// A successful acquisition.
#[derive(Debug, Clone, PartialEq)]
pub struct Acquisition {
    pub position: Position,
    pub source: PositionSource,
    /// Providers that failed before the successful one.
    pub attempts: Vec<ProviderAttempt>,
}

/// Phases of a single provider attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptPhase {
    Idle,
    RequestingPermission,
    Acquiring,
}

fn transition(descriptor: &ProviderDescriptor, from: AttemptPhase, to: AttemptPhase) -> AttemptPhase {
    debug!(
        provider = %descriptor.id,
        kind = %descriptor.kind,
        from = ?from,
        to = ?to,
        "Provider attempt transition"
    );
    to
}

/// Location provider orchestrator.
///
/// One instance per tracking session. Owns the last-known fix and enforces a
/// single active subscription.
pub struct LocationOrchestrator {
    chain: ProviderChain,
    options: AcquisitionOptions,
    clock: Arc<dyn Clock>,
    last_known: Arc<RwLock<Option<Position>>>,
    subscription_active: Arc<AtomicBool>,
}

impl fmt::Debug for LocationOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocationOrchestrator")
            .field("chain", &self.chain)
            .field("options", &self.options)
            .field("last_known", &self.last_known)
            .finish_non_exhaustive()
    }
}

impl LocationOrchestrator {
    /// Create an orchestrator using the system clock.
    pub fn new(chain: ProviderChain, options: AcquisitionOptions) -> Self {
        Self::with_clock(chain, options, Arc::new(SystemClock))
    }

    /// Create an orchestrator with an explicit clock.
    pub fn with_clock(
        chain: ProviderChain,
        options: AcquisitionOptions,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            chain,
            options,
            clock,
            last_known: Arc::new(RwLock::new(None)),
            subscription_active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Acquisition parameters in effect.
    pub fn options(&self) -> &AcquisitionOptions {
        &self.options
    }

    /// The provider chain in priority order.
    pub fn chain(&self) -> &ProviderChain {
        &self.chain
    }

    /// The most recent fix seen by this orchestrator, if any.
    pub fn last_known_position(&self) -> Option<Position> {
        *self.last_known.read()
    }

    /// Returns true while a subscription is open.
    pub fn is_subscribed(&self) -> bool {
        self.subscription_active.load(Ordering::SeqCst)
    }

    /// Acquire a single position, walking the fallback chain.
    ///
    /// # Errors
    ///
    /// - [`LocationError::AllProvidersExhausted`] if every provider failed
    /// - [`LocationError::NoProvidersConfigured`] for an empty chain with no
    ///   usable cache
    /// - [`LocationError::Cancelled`] if `cancel` fires first
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<Acquisition, LocationError> {
        if let Some(cached) = self.fresh_cached_fix() {
            debug!(
                age_ms = self.clock.now_millis() - cached.captured_at_millis,
                "Serving position from last-known cache"
            );
            return Ok(Acquisition {
                position: cached,
                source: PositionSource::Cache,
                attempts: Vec::new(),
            });
        }

        if self.chain.is_empty() {
            return Err(LocationError::NoProvidersConfigured);
        }

        let mut attempts = Vec::new();
        for entry in self.chain.entries() {
            let started = Instant::now();
            let outcome = self.attempt(entry, cancel).await?;
            let elapsed = started.elapsed();

            match outcome {
                ProviderOutcome::Success(position) => {
                    self.record_fix(position);
                    info!(
                        provider = %entry.descriptor.id,
                        lat = position.latitude,
                        lon = position.longitude,
                        accuracy_m = ?position.accuracy_meters,
                        failed_before = attempts.len(),
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Position acquired"
                    );
                    return Ok(Acquisition {
                        position,
                        source: PositionSource::Provider {
                            id: entry.descriptor.id.clone(),
                            kind: entry.descriptor.kind,
                        },
                        attempts,
                    });
                }
                failure => {
                    let reason = FailureReason::from_outcome(&failure)
                        .unwrap_or(FailureReason::Unavailable("unknown".to_string()));
                    debug!(
                        provider = %entry.descriptor.id,
                        reason = %reason,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Provider failed, advancing to next"
                    );
                    attempts.push(attempt_record(&entry.descriptor, reason, elapsed));
                }
            }
        }

        warn!(
            attempts = attempts.len(),
            "All location providers exhausted"
        );
        Err(LocationError::AllProvidersExhausted { attempts })
    }

    /// Open the single continuous position subscription.
    ///
    /// Tries providers in priority order (running the authorization step
    /// where required) and keeps the first watch that opens.
    ///
    /// # Errors
    ///
    /// - [`LocationError::SubscriptionAlreadyActive`] if a subscription is
    ///   still open; the existing one is left untouched
    /// - [`LocationError::AllProvidersExhausted`] if no provider could watch
    /// - [`LocationError::Cancelled`] if `cancel` fires during authorization
    pub async fn subscribe(
        &self,
        cancel: &CancellationToken,
    ) -> Result<PositionSubscription, LocationError> {
        let guard = SubscriptionGuard::acquire(Arc::clone(&self.subscription_active))
            .ok_or(LocationError::SubscriptionAlreadyActive)?;

        if self.chain.is_empty() {
            return Err(LocationError::NoProvidersConfigured);
        }

        let mut attempts = Vec::new();
        for entry in self.chain.entries() {
            let descriptor = &entry.descriptor;
            let started = Instant::now();

            if descriptor.requires_explicit_authorization {
                let auth = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(LocationError::Cancelled),
                    result = entry.provider.request_authorization() => result,
                };
                if auth == AuthorizationResult::Denied {
                    attempts.push(attempt_record(
                        descriptor,
                        FailureReason::PermissionDenied,
                        started.elapsed(),
                    ));
                    continue;
                }
            }

            match entry
                .provider
                .watch_position(self.options.for_provider(descriptor))
            {
                Ok(watch) => {
                    info!(
                        provider = %descriptor.id,
                        min_distance_m = self.options.min_distance_filter_meters,
                        "Position subscription started"
                    );
                    return Ok(PositionSubscription::new(
                        descriptor.id.clone(),
                        watch,
                        cancel.child_token(),
                        self.options.min_distance_filter_meters,
                        Arc::clone(&self.last_known),
                        guard,
                    ));
                }
                Err(outcome) => {
                    let reason = FailureReason::from_outcome(&outcome).unwrap_or(
                        FailureReason::Unavailable("watch refused".to_string()),
                    );
                    debug!(provider = %descriptor.id, reason = %reason, "Watch refused");
                    attempts.push(attempt_record(descriptor, reason, started.elapsed()));
                }
            }
        }

        warn!(
            attempts = attempts.len(),
            "No provider could start a position subscription"
        );
        Err(LocationError::AllProvidersExhausted { attempts })
    }

    /// Run one provider through its state machine.
    async fn attempt(
        &self,
        entry: &ProviderEntry,
        cancel: &CancellationToken,
    ) -> Result<ProviderOutcome, LocationError> {
        let descriptor = &entry.descriptor;
        let mut phase = AttemptPhase::Idle;

        if descriptor.requires_explicit_authorization {
            phase = transition(descriptor, phase, AttemptPhase::RequestingPermission);
            let auth = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(LocationError::Cancelled),
                result = entry.provider.request_authorization() => result,
            };
            if auth == AuthorizationResult::Denied {
                debug!(provider = %descriptor.id, "Authorization denied");
                return Ok(ProviderOutcome::PermissionDenied);
            }
        }

        transition(descriptor, phase, AttemptPhase::Acquiring);
        let options = self.options.for_provider(descriptor);
        let timeout = options.timeout;
        let request = tokio::time::timeout(timeout, entry.provider.get_current_position(options));

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(LocationError::Cancelled),
            result = request => result.unwrap_or(ProviderOutcome::Timeout),
        };

        Ok(match outcome {
            ProviderOutcome::Success(position) if !position.lat_lng().is_valid() => {
                ProviderOutcome::Unavailable(format!(
                    "invalid coordinates {}",
                    position.lat_lng()
                ))
            }
            other => other,
        })
    }

    fn fresh_cached_fix(&self) -> Option<Position> {
        if self.options.max_cache_age.is_zero() {
            return None;
        }
        let cached = (*self.last_known.read())?;
        let age = self.clock.now_millis() - cached.captured_at_millis;
        let max_age = i64::try_from(self.options.max_cache_age.as_millis()).unwrap_or(i64::MAX);
        (age >= 0 && age <= max_age).then_some(cached)
    }

    fn record_fix(&self, position: Position) {
        record_last_known(&self.last_known, position);
    }
}

/// Store `position` as last-known unless an equal-or-newer fix is already held.
pub(crate) fn record_last_known(slot: &RwLock<Option<Position>>, position: Position) {
    let mut last = slot.write();
    match *last {
        Some(existing) if !position.is_newer_than(&existing) => {}
        _ => *last = Some(position),
    }
}

fn attempt_record(
    descriptor: &ProviderDescriptor,
    reason: FailureReason,
    elapsed: Duration,
) -> ProviderAttempt {
    ProviderAttempt {
        provider_id: descriptor.id.clone(),
        kind: descriptor.kind,
        reason,
        elapsed,
    }
}
