//! Core value types for location acquisition.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::geo::LatLng;

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default maximum age of a cached fix that may satisfy a request.
pub const DEFAULT_MAX_CACHE_AGE: Duration = Duration::from_secs(10);

/// Default minimum movement between two emitted subscription positions.
pub const DEFAULT_MIN_DISTANCE_FILTER_METERS: f64 = 10.0;

/// A device position fix.
///
/// Immutable value. `accuracy_meters` is `None` when the provider does not
/// report an accuracy radius.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Horizontal accuracy radius in meters, if reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accuracy_meters: Option<f64>,
    /// Capture time in milliseconds since the Unix epoch.
    pub captured_at_millis: i64,
}

impl Position {
    /// Create a position without an accuracy estimate.
    pub fn new(latitude: f64, longitude: f64, captured_at_millis: i64) -> Self {
        Self {
            latitude,
            longitude,
            accuracy_meters: None,
            captured_at_millis,
        }
    }

    /// Attach an accuracy radius.
    pub fn with_accuracy(mut self, accuracy_meters: f64) -> Self {
        self.accuracy_meters = Some(accuracy_meters);
        self
    }

    /// The coordinate part of this fix.
    #[inline]
    pub fn lat_lng(&self) -> LatLng {
        LatLng::new(self.latitude, self.longitude)
    }

    /// Returns true if this fix was captured strictly after `other`.
    #[inline]
    pub fn is_newer_than(&self, other: &Position) -> bool {
        self.captured_at_millis > other.captured_at_millis
    }
}

/// Provider implementation family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    /// Platform's original location API.
    Legacy,
    /// Fused / enhanced location service.
    Enhanced,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Legacy => write!(f, "legacy"),
            Self::Enhanced => write!(f, "enhanced"),
        }
    }
}

/// Host platform, which decides the default fallback order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Platform {
    /// Enhanced (fused) provider first, legacy second.
    Android,
    /// Legacy provider first, enhanced second.
    Ios,
    /// Keep registration order.
    #[default]
    Other,
}

impl Platform {
    /// Rank used to sort providers for this platform (lower goes first).
    pub fn rank(&self, kind: ProviderKind) -> u8 {
        match (self, kind) {
            (Platform::Android, ProviderKind::Enhanced) => 0,
            (Platform::Android, ProviderKind::Legacy) => 1,
            (Platform::Ios, ProviderKind::Legacy) => 0,
            (Platform::Ios, ProviderKind::Enhanced) => 1,
            (Platform::Other, _) => 0,
        }
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "android" => Ok(Platform::Android),
            "ios" => Ok(Platform::Ios),
            "other" => Ok(Platform::Other),
            other => Err(format!("unknown platform '{}'", other)),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Android => write!(f, "android"),
            Self::Ios => write!(f, "ios"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Static description of one registered location provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderDescriptor {
    /// Stable identifier used in diagnostics.
    pub id: String,
    /// Implementation family.
    pub kind: ProviderKind,
    /// Whether an authorization prompt must precede acquisition.
    pub requires_explicit_authorization: bool,
    /// Per-attempt timeout for this provider.
    pub timeout: Duration,
    /// Maximum age of a provider-side cached fix.
    pub max_cache_age: Duration,
}

impl ProviderDescriptor {
    /// Create a descriptor with default timeouts and no authorization step.
    pub fn new(id: impl Into<String>, kind: ProviderKind) -> Self {
        Self {
            id: id.into(),
            kind,
            requires_explicit_authorization: false,
            timeout: DEFAULT_TIMEOUT,
            max_cache_age: DEFAULT_MAX_CACHE_AGE,
        }
    }

    /// Require an explicit authorization request before acquiring.
    pub fn with_authorization(mut self, required: bool) -> Self {
        self.requires_explicit_authorization = required;
        self
    }

    /// Set the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the provider-side cache age.
    pub fn with_max_cache_age(mut self, max_cache_age: Duration) -> Self {
        self.max_cache_age = max_cache_age;
        self
    }
}

/// Result of one provider attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderOutcome {
    /// A fix was obtained.
    Success(Position),
    /// The user refused location access.
    PermissionDenied,
    /// Device location services are switched off.
    ServicesDisabled,
    /// No fix within the configured timeout.
    Timeout,
    /// Provider could not serve the request.
    Unavailable(String),
}

impl ProviderOutcome {
    /// Returns true for `Success`.
    pub fn is_success(&self) -> bool {
        matches!(self, ProviderOutcome::Success(_))
    }
}

/// Result of an authorization request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationResult {
    Granted,
    Denied,
}

/// Acquisition parameters shared by one-shot requests and subscriptions.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionOptions {
    /// Request a high-accuracy (radio/GPS) fix.
    pub enable_high_accuracy: bool,
    /// Upper bound on any single provider attempt.
    pub timeout: Duration,
    /// A last-known fix younger than this satisfies a request without a new fix.
    ///
    /// `Duration::ZERO` disables the cache.
    pub max_cache_age: Duration,
    /// Minimum movement between two positions emitted by a subscription.
    pub min_distance_filter_meters: f64,
}

impl Default for AcquisitionOptions {
    fn default() -> Self {
        Self {
            enable_high_accuracy: true,
            timeout: DEFAULT_TIMEOUT,
            max_cache_age: DEFAULT_MAX_CACHE_AGE,
            min_distance_filter_meters: DEFAULT_MIN_DISTANCE_FILTER_METERS,
        }
    }
}

impl AcquisitionOptions {
    /// Set high accuracy mode.
    pub fn with_high_accuracy(mut self, enabled: bool) -> Self {
        self.enable_high_accuracy = enabled;
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the cache age.
    pub fn with_max_cache_age(mut self, max_cache_age: Duration) -> Self {
        self.max_cache_age = max_cache_age;
        self
    }

    /// Set the subscription distance filter.
    pub fn with_min_distance_filter(mut self, meters: f64) -> Self {
        self.min_distance_filter_meters = meters;
        self
    }

    /// Options narrowed to what a single provider is allowed.
    ///
    /// Timeout and cache age are the tighter of the request and descriptor
    /// values.
    pub fn for_provider(&self, descriptor: &ProviderDescriptor) -> Self {
        Self {
            enable_high_accuracy: self.enable_high_accuracy,
            timeout: self.timeout.min(descriptor.timeout),
            max_cache_age: self.max_cache_age.min(descriptor.max_cache_age),
            min_distance_filter_meters: self.min_distance_filter_meters,
        }
    }
}
