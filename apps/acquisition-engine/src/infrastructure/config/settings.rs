//! Acquisition Configuration Settings
//!
//! Configuration types for the acquisition engine, loaded from `ACQ_*`
//! environment variables. Every setting has a typed default; malformed
//! values fall back to the default with a warning.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::application::services::{DEFAULT_STALE_AFTER, ModeControllerConfig};
use crate::domain::cache::{TtlClass, TtlPolicy};
use crate::domain::mode::{DEFAULT_REVERT_AFTER, TriggerThresholds};
use crate::error::ConfigurationError;

/// Secret token for an HTTP backend.
#[derive(Clone)]
pub struct ApiKey(String);

impl ApiKey {
    /// Wrap a token.
    #[must_use]
    pub const fn new(key: String) -> Self {
        Self(key)
    }

    /// Get the token.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey([REDACTED])")
    }
}

/// One upstream HTTP source and its rate limit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamSettings {
    /// Limiter name, used to route fetches.
    pub name: String,
    /// Base URL requests are resolved against.
    pub base_url: String,
    /// Maximum requests per window.
    pub max_requests: usize,
    /// Sliding window length.
    pub window: Duration,
}

impl UpstreamSettings {
    /// Built-in defaults for known upstreams.
    #[must_use]
    pub fn defaults_for(name: &str) -> Self {
        let (base_url, max_requests, window) = match name {
            "coingecko" => ("https://api.coingecko.com/api/v3", 30, Duration::from_secs(60)),
            "binance" => ("https://api.binance.com/api/v3", 1_200, Duration::from_secs(60)),
            "feargreed" => ("https://api.alternative.me", 60, Duration::from_secs(60)),
            _ => ("", 60, Duration::from_secs(60)),
        };
        Self {
            name: name.to_string(),
            base_url: base_url.to_string(),
            max_requests,
            window,
        }
    }
}

/// TTL per cache class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    /// TTL for classes without an explicit entry.
    pub default_ttl: Duration,
    /// Reference lists.
    pub reference_ttl: Duration,
    /// Market overview data.
    pub market_ttl: Duration,
    /// Price ticks.
    pub ticker_ttl: Duration,
    /// News feeds.
    pub news_ttl: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        let policy = TtlPolicy::default();
        Self {
            default_ttl: policy.default_ttl(),
            reference_ttl: policy.ttl_for(&TtlClass::REFERENCE),
            market_ttl: policy.ttl_for(&TtlClass::MARKET),
            ticker_ttl: policy.ttl_for(&TtlClass::TICKER),
            news_ttl: policy.ttl_for(&TtlClass::NEWS),
        }
    }
}

impl CacheSettings {
    /// Build the TTL policy.
    #[must_use]
    pub fn to_policy(&self) -> TtlPolicy {
        TtlPolicy::new(self.default_ttl)
            .with_class(TtlClass::REFERENCE, self.reference_ttl)
            .with_class(TtlClass::MARKET, self.market_ttl)
            .with_class(TtlClass::TICKER, self.ticker_ttl)
            .with_class(TtlClass::NEWS, self.news_ttl)
    }
}

/// Mode controller settings.
#[derive(Debug, Clone, PartialEq)]
pub struct ModeSettings {
    /// Volatility trigger threshold.
    pub volatility_threshold: f64,
    /// Volume ratio trigger threshold.
    pub volume_spike_threshold: f64,
    /// Streaming period length.
    pub revert_after: Duration,
    /// Snapshot evaluation interval.
    pub evaluation_interval: Duration,
    /// Market snapshot endpoint (evaluation disabled when unset).
    pub snapshot_url: Option<String>,
}

impl Default for ModeSettings {
    fn default() -> Self {
        let thresholds = TriggerThresholds::default();
        Self {
            volatility_threshold: thresholds.volatility,
            volume_spike_threshold: thresholds.volume_spike,
            revert_after: DEFAULT_REVERT_AFTER,
            evaluation_interval: Duration::from_secs(60),
            snapshot_url: None,
        }
    }
}

impl ModeSettings {
    /// Build the controller configuration.
    #[must_use]
    pub const fn to_controller_config(&self) -> ModeControllerConfig {
        ModeControllerConfig {
            thresholds: TriggerThresholds {
                volatility: self.volatility_threshold,
                volume_spike: self.volume_spike_threshold,
            },
            revert_after: self.revert_after,
            evaluation_interval: self.evaluation_interval,
        }
    }
}

/// Session persistence settings.
#[derive(Debug, Clone)]
pub struct PersistenceSettings {
    /// Directory holding the local session files.
    pub local_dir: PathBuf,
    /// Age beyond which the local copy is no longer preferred.
    pub stale_after: Duration,
    /// Remote REST endpoint (in-memory remote when unset).
    pub remote_url: Option<String>,
    /// Remote API key.
    pub remote_api_key: Option<ApiKey>,
    /// Remote table name.
    pub remote_table: String,
    /// User whose session is restored at startup.
    pub user_id: Option<String>,
}

impl Default for PersistenceSettings {
    fn default() -> Self {
        Self {
            local_dir: PathBuf::from(".acquisition/sessions"),
            stale_after: DEFAULT_STALE_AFTER,
            remote_url: None,
            remote_api_key: None,
            remote_table: "session_states".to_string(),
            user_id: None,
        }
    }
}

/// Push feed connection settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// WebSocket endpoint (streaming disabled when unset).
    pub url: Option<String>,
    /// Key prefixes covered by the push feed.
    pub prefixes: Vec<String>,
    /// Heartbeat ping interval.
    pub heartbeat_interval: Duration,
    /// Heartbeat timeout before considering connection dead.
    pub heartbeat_timeout: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            url: None,
            prefixes: vec!["ticker:".to_string()],
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(60),
            reconnect_delay_initial: Duration::from_millis(500),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            max_reconnect_attempts: 0,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health check and metrics HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8082 }
    }
}

/// Complete acquisition configuration.
#[derive(Debug, Clone)]
pub struct AcquisitionConfig {
    /// Upstream sources and their rate limits.
    pub upstreams: Vec<UpstreamSettings>,
    /// Cache TTLs.
    pub cache: CacheSettings,
    /// Mode controller settings.
    pub mode: ModeSettings,
    /// Session persistence settings.
    pub persistence: PersistenceSettings,
    /// Push feed settings.
    pub stream: StreamSettings,
    /// Server port settings.
    pub server: ServerSettings,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            upstreams: vec![
                UpstreamSettings::defaults_for("coingecko"),
                UpstreamSettings::defaults_for("binance"),
            ],
            cache: CacheSettings::default(),
            mode: ModeSettings::default(),
            persistence: PersistenceSettings::default(),
            stream: StreamSettings::default(),
            server: ServerSettings::default(),
        }
    }
}

impl AcquisitionConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting configuration is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting configuration is invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = EnvReader { lookup: &lookup };
        let defaults = Self::default();

        let upstream_names = env.list("ACQ_UPSTREAMS").unwrap_or_else(|| {
            defaults
                .upstreams
                .iter()
                .map(|u| u.name.clone())
                .collect()
        });
        if upstream_names.is_empty() {
            return Err(ConfigError::EmptyValue("ACQ_UPSTREAMS".to_string()));
        }

        let upstreams = upstream_names
            .iter()
            .map(|name| {
                let base = UpstreamSettings::defaults_for(name);
                let prefix = format!("ACQ_UPSTREAM_{}", name.to_uppercase().replace('-', "_"));
                UpstreamSettings {
                    name: name.clone(),
                    base_url: env
                        .string(&format!("{prefix}_URL"))
                        .unwrap_or(base.base_url),
                    max_requests: env.parse(&format!("{prefix}_MAX_REQUESTS"), base.max_requests),
                    window: env.secs(&format!("{prefix}_WINDOW_SECS"), base.window),
                }
            })
            .collect();

        let cache = CacheSettings {
            default_ttl: env.secs("ACQ_CACHE_DEFAULT_TTL_SECS", defaults.cache.default_ttl),
            reference_ttl: env.secs("ACQ_CACHE_REFERENCE_TTL_SECS", defaults.cache.reference_ttl),
            market_ttl: env.secs("ACQ_CACHE_MARKET_TTL_SECS", defaults.cache.market_ttl),
            ticker_ttl: env.secs("ACQ_CACHE_TICKER_TTL_SECS", defaults.cache.ticker_ttl),
            news_ttl: env.secs("ACQ_CACHE_NEWS_TTL_SECS", defaults.cache.news_ttl),
        };

        let mode = ModeSettings {
            volatility_threshold: env.parse(
                "ACQ_MODE_VOLATILITY_THRESHOLD",
                defaults.mode.volatility_threshold,
            ),
            volume_spike_threshold: env.parse(
                "ACQ_MODE_VOLUME_SPIKE_THRESHOLD",
                defaults.mode.volume_spike_threshold,
            ),
            revert_after: env.secs("ACQ_MODE_REVERT_AFTER_SECS", defaults.mode.revert_after),
            evaluation_interval: env.secs(
                "ACQ_MODE_EVALUATION_INTERVAL_SECS",
                defaults.mode.evaluation_interval,
            ),
            snapshot_url: env.string("ACQ_MODE_SNAPSHOT_URL"),
        };

        let persistence = PersistenceSettings {
            local_dir: env
                .string("ACQ_SESSION_DIR")
                .map_or(defaults.persistence.local_dir, PathBuf::from),
            stale_after: env.secs("ACQ_SESSION_STALE_AFTER_SECS", defaults.persistence.stale_after),
            remote_url: env.string("ACQ_SESSION_REMOTE_URL"),
            remote_api_key: env.string("ACQ_SESSION_REMOTE_API_KEY").map(ApiKey::new),
            remote_table: env
                .string("ACQ_SESSION_REMOTE_TABLE")
                .unwrap_or(defaults.persistence.remote_table),
            user_id: env.string("ACQ_SESSION_USER_ID"),
        };

        let stream = StreamSettings {
            url: env.string("ACQ_STREAM_URL"),
            prefixes: env
                .list("ACQ_STREAM_PREFIXES")
                .unwrap_or(defaults.stream.prefixes),
            heartbeat_interval: env.secs(
                "ACQ_STREAM_HEARTBEAT_INTERVAL_SECS",
                defaults.stream.heartbeat_interval,
            ),
            heartbeat_timeout: env.secs(
                "ACQ_STREAM_HEARTBEAT_TIMEOUT_SECS",
                defaults.stream.heartbeat_timeout,
            ),
            reconnect_delay_initial: env.millis(
                "ACQ_STREAM_RECONNECT_DELAY_INITIAL_MS",
                defaults.stream.reconnect_delay_initial,
            ),
            reconnect_delay_max: env.secs(
                "ACQ_STREAM_RECONNECT_DELAY_MAX_SECS",
                defaults.stream.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: env.parse(
                "ACQ_STREAM_RECONNECT_DELAY_MULTIPLIER",
                defaults.stream.reconnect_delay_multiplier,
            ),
            max_reconnect_attempts: env.parse(
                "ACQ_STREAM_MAX_RECONNECT_ATTEMPTS",
                defaults.stream.max_reconnect_attempts,
            ),
        };

        let server = ServerSettings {
            health_port: env.parse("ACQ_HEALTH_PORT", defaults.server.health_port),
        };

        let config = Self {
            upstreams,
            cache,
            mode,
            persistence,
            stream,
            server,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check invariants that would otherwise fail at component construction.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for upstream in &self.upstreams {
            if upstream.max_requests == 0 {
                return Err(ConfigurationError::ZeroCapacity {
                    name: upstream.name.clone(),
                }
                .into());
            }
            if upstream.window.is_zero() {
                return Err(ConfigurationError::ZeroWindow {
                    name: upstream.name.clone(),
                    window: upstream.window,
                }
                .into());
            }
        }
        self.mode.to_controller_config().validate()?;
        if self.persistence.stale_after.is_zero() {
            return Err(ConfigurationError::NonPositiveDuration {
                setting: "ACQ_SESSION_STALE_AFTER_SECS",
            }
            .into());
        }
        Ok(())
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// A setting violates a component invariant.
    #[error(transparent)]
    Invalid(#[from] ConfigurationError),
}

struct EnvReader<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl EnvReader<'_> {
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn list(&self, key: &str) -> Option<Vec<String>> {
        self.string(key).map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
    }

    fn parse<T: FromStr>(&self, key: &str, default: T) -> T {
        let Some(raw) = self.string(key) else {
            return default;
        };
        raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "Ignoring malformed setting, using default");
            default
        })
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        self.string(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        self.string(key)
            .and_then(|v| v.parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }
}
