//! Error types for location acquisition.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use super::types::{ProviderKind, ProviderOutcome};

/// What the user can do about a failed provider attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remediation {
    /// Deep-link into the app's permission settings.
    OpenSettings,
    /// Ask the user to switch device location services on.
    EnableLocationServices,
    /// Try again (optionally after moving to open sky).
    Retry,
}

/// Why a single provider attempt did not produce a position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    PermissionDenied,
    ServicesDisabled,
    ProviderTimeout,
    Unavailable(String),
}

impl FailureReason {
    /// Map a non-success outcome to a failure reason.
    ///
    /// Returns `None` for `Success`.
    pub fn from_outcome(outcome: &ProviderOutcome) -> Option<Self> {
        match outcome {
            ProviderOutcome::Success(_) => None,
            ProviderOutcome::PermissionDenied => Some(Self::PermissionDenied),
            ProviderOutcome::ServicesDisabled => Some(Self::ServicesDisabled),
            ProviderOutcome::Timeout => Some(Self::ProviderTimeout),
            ProviderOutcome::Unavailable(reason) => Some(Self::Unavailable(reason.clone())),
        }
    }

    /// Suggested user action.
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::PermissionDenied => Remediation::OpenSettings,
            Self::ServicesDisabled => Remediation::EnableLocationServices,
            Self::ProviderTimeout | Self::Unavailable(_) => Remediation::Retry,
        }
    }

    /// User-recoverable failures need the user to act before a retry helps.
    pub fn is_user_recoverable(&self) -> bool {
        matches!(self, Self::PermissionDenied | Self::ServicesDisabled)
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PermissionDenied => write!(f, "permission denied"),
            Self::ServicesDisabled => write!(f, "location services disabled"),
            Self::ProviderTimeout => write!(f, "timed out"),
            Self::Unavailable(reason) => write!(f, "unavailable ({})", reason),
        }
    }
}

/// Diagnostic record of one failed provider attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderAttempt {
    pub provider_id: String,
    pub kind: ProviderKind,
    pub reason: FailureReason,
    pub elapsed: Duration,
}

impl fmt::Display for ProviderAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.provider_id, self.kind, self.reason)
    }
}

/// Errors surfaced by the location orchestrator.
#[derive(Debug, Error)]
pub enum LocationError {
    /// Every provider in the fallback chain failed.
    #[error("all location providers failed: {}", format_attempts(.attempts))]
    AllProvidersExhausted { attempts: Vec<ProviderAttempt> },

    /// A subscription was requested while another one is still open.
    #[error("a position subscription is already active")]
    SubscriptionAlreadyActive,

    /// The provider chain is empty.
    #[error("no location providers configured")]
    NoProvidersConfigured,

    /// The caller cancelled the request.
    #[error("location request cancelled")]
    Cancelled,
}

impl LocationError {
    /// The per-provider failures, if this is an exhaustion error.
    pub fn attempts(&self) -> &[ProviderAttempt] {
        match self {
            Self::AllProvidersExhausted { attempts } => attempts,
            _ => &[],
        }
    }
}

fn format_attempts(attempts: &[ProviderAttempt]) -> String {
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
