//! Cache Domain Types
//!
//! Entries, TTL classes and the freshness signal returned to consumers.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

// =============================================================================
// TTL Classes
// =============================================================================

/// Named category of cache keys that share one expiry duration.
///
/// The cache itself is class-agnostic: it only looks the duration up in a
/// [`TtlPolicy`]. The associated constants cover the classes the dashboard
/// uses; any other name can be configured.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TtlClass(Cow<'static, str>);

impl TtlClass {
    /// Slow-changing reference lists (coin lists, exchange metadata).
    pub const REFERENCE: Self = Self(Cow::Borrowed("reference"));
    /// Market overview data (market caps, dominance, global stats).
    pub const MARKET: Self = Self(Cow::Borrowed("market"));
    /// Fast-changing price ticks.
    pub const TICKER: Self = Self(Cow::Borrowed("ticker"));
    /// News and sentiment feeds.
    pub const NEWS: Self = Self(Cow::Borrowed("news"));

    /// Create a class with a custom name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    /// Class name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TtlClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-class TTL lookup with a fallback for unconfigured classes.
#[derive(Debug, Clone)]
pub struct TtlPolicy {
    ttls: HashMap<TtlClass, Duration>,
    default_ttl: Duration,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
            .with_class(TtlClass::REFERENCE, Duration::from_secs(60 * 60))
            .with_class(TtlClass::MARKET, Duration::from_secs(5 * 60))
            .with_class(TtlClass::TICKER, Duration::from_secs(30))
            .with_class(TtlClass::NEWS, Duration::from_secs(10 * 60))
    }
}

impl TtlPolicy {
    /// Empty policy where every class uses `default_ttl`.
    #[must_use]
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            ttls: HashMap::new(),
            default_ttl,
        }
    }

    /// Set the TTL for a class.
    #[must_use]
    pub fn with_class(mut self, class: TtlClass, ttl: Duration) -> Self {
        self.ttls.insert(class, ttl);
        self
    }

    /// TTL for `class`, falling back to the default.
    #[must_use]
    pub fn ttl_for(&self, class: &TtlClass) -> Duration {
        self.ttls.get(class).copied().unwrap_or(self.default_ttl)
    }

    /// Default TTL for classes without an explicit entry.
    #[must_use]
    pub const fn default_ttl(&self) -> Duration {
        self.default_ttl
    }
}

// =============================================================================
// Entries
// =============================================================================

/// Last successfully fetched value for a key.
///
/// Entries are replaced wholesale on every successful refresh and are never
/// deleted on expiry; an expired entry stays available as a stale fallback.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// Cache key.
    pub key: String,
    /// Cached payload.
    pub value: V,
    /// When the value was fetched.
    pub fetched_at: Instant,
    /// When the value stops being fresh.
    pub expires_at: Instant,
    /// TTL class the entry was stored under.
    pub class: TtlClass,
}

impl<V> CacheEntry<V> {
    /// Build an entry fetched at `now` with the given TTL.
    pub fn new(key: impl Into<String>, value: V, class: TtlClass, ttl: Duration, now: Instant) -> Self {
        Self {
            key: key.into(),
            value,
            fetched_at: now,
            expires_at: now + ttl,
            class,
        }
    }

    /// Whether the entry is still fresh at `now`.
    #[must_use]
    pub fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }

    /// Age of the entry at `now`.
    #[must_use]
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.fetched_at)
    }
}

// =============================================================================
// Results
// =============================================================================

/// Where a returned value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Served from an unexpired entry, no I/O.
    Cached,
    /// Fetched from upstream for this request.
    Fetched,
    /// Refresh failed; served a previously cached value past its expiry.
    Stale,
}

impl Freshness {
    /// Metric/log label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cached => "cached",
            Self::Fetched => "fetched",
            Self::Stale => "stale",
        }
    }
}

/// A value returned by the cache together with its freshness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheOutcome<V> {
    /// The value.
    pub value: V,
    /// How the value was obtained.
    pub freshness: Freshness,
}

impl<V> CacheOutcome<V> {
    /// Whether the consumer should flag the value as uncertain.
    #[must_use]
    pub const fn is_degraded(&self) -> bool {
        matches!(self.freshness, Freshness::Stale)
    }

    /// Discard the freshness signal.
    pub fn into_value(self) -> V {
        self.value
    }
}
