//! # Coordinator Configuration
//!
//! One struct per subsystem, grouped under `CoordinatorConfig`. Every
//! default matches the documented protocol constants; `from_env` overrides
//! them from `TABSYNC_*` variables and `validate` rejects combinations that
//! would break the election or refresh timing.
//!
//! | Variable | Field |
//! |----------|-------|
//! | `TABSYNC_API_URL` | `api.base_url` |
//! | `TABSYNC_API_TOKEN` | `api.bearer_token` |
//! | `TABSYNC_DEVICE_ID` | `api.device_id` |
//! | `TABSYNC_SHARED_DIR` | `storage.shared_dir` |
//! | `TABSYNC_LOCAL_DIR` | `storage.local_dir` |
//! | `TABSYNC_BROKER_ADDR` | `transport.broker_addr` |
//! | `TABSYNC_CHANNEL` | `transport.channel` (`true`/`false`) |
//! | `TABSYNC_SIGNING_SECRET` | `bus.signing_secret` (hex) |
//! | `TABSYNC_RENEWAL_INTERVAL_MS` | `elector.renewal_interval` |
//! | `TABSYNC_STALENESS_MULTIPLE` | `elector.staleness_multiple` |
//! | `TABSYNC_MESSAGE_TIMEOUT_MS` | `bus.message_timeout` |
//! | `TABSYNC_LIVENESS_INTERVAL_MS` | `bus.liveness_interval` |
//! | `TABSYNC_REFRESH_SKEW_MS` | `refresh.refresh_skew` |
//! | `TABSYNC_POLL_INTERVAL_MS` | `poller.poll_interval` |
//! | `TABSYNC_POLL_MAX_ATTEMPTS` | `poller.max_attempts` |
//! | `TABSYNC_HEARTBEAT_INTERVAL_MS` | `heartbeat.interval` |
//! | `TABSYNC_BREAKER_THRESHOLD` | `breaker.failure_threshold` |
//! | `TABSYNC_BREAKER_COOLDOWN_MS` | `breaker.cooldown` |
//! | `TABSYNC_JOURNAL_CAPACITY` | `journal_capacity` |

use shared_bus::BusConfig;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tc_01_circuit_breaker::CircuitBreakerConfig;
use tc_02_event_journal::DEFAULT_CAPACITY;
use tc_03_leader_election::ElectorConfig;
use tc_04_token_refresh::RefreshConfig;
use tc_05_fallback_poller::{HeartbeatConfig, PollerConfig};
use thiserror::Error;

/// Largest accepted proactive refresh margin.
pub const MAX_REFRESH_SKEW: Duration = Duration::from_secs(15 * 60);

/// Configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}={value:?} is not valid: {reason}")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0} must be non-zero")]
    Zero(&'static str),

    #[error("Staleness multiple must be at least 2, got {0}")]
    StalenessMultiple(u32),

    #[error("Refresh skew of {skew:?} exceeds the {max:?} limit")]
    RefreshSkewTooLarge { skew: Duration, max: Duration },

    #[error("Device id must not be empty")]
    EmptyDeviceId,
}

/// Remote session API settings.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub base_url: String,
    /// Stable device id. When unset, one is generated and kept in the
    /// shared store so every tab reports the same value.
    pub device_id: Option<String>,
    pub bearer_token: Option<String>,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            device_id: None,
            bearer_token: None,
            request_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(3),
        }
    }
}

/// Where the shared and context-local stores live.
///
/// `None` keeps the store in memory, which only coordinates tabs inside
/// one process.
#[derive(Debug, Clone, Default)]
pub struct StorageConfig {
    pub shared_dir: Option<PathBuf>,
    pub local_dir: Option<PathBuf>,
}

/// Push transport settings.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Broker address; no broker transport when unset.
    pub broker_addr: Option<String>,
    pub broker_connect_timeout: Duration,
    /// Offer the in-process channel transport to tabs sharing a process.
    pub channel: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            broker_addr: None,
            broker_connect_timeout: Duration::from_secs(2),
            channel: true,
        }
    }
}

/// Complete coordinator configuration.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub api: ApiConfig,
    pub storage: StorageConfig,
    pub transport: TransportConfig,
    pub bus: BusConfig,
    pub elector: ElectorConfig,
    pub refresh: RefreshConfig,
    pub poller: PollerConfig,
    pub heartbeat: HeartbeatConfig,
    pub breaker: CircuitBreakerConfig,
    pub journal_capacity: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            storage: StorageConfig::default(),
            transport: TransportConfig::default(),
            bus: BusConfig::default(),
            elector: ElectorConfig::default(),
            refresh: RefreshConfig::default(),
            poller: PollerConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            breaker: CircuitBreakerConfig::default(),
            journal_capacity: DEFAULT_CAPACITY,
        }
    }
}

impl CoordinatorConfig {
    /// Defaults overridden by `TABSYNC_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for a variable that does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Like `from_env`, reading variables through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for a variable that does not parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Lookup(lookup);
        let mut config = Self::default();

        if let Some(url) = env.string("TABSYNC_API_URL") {
            config.api.base_url = url;
        }
        config.api.bearer_token = env.string("TABSYNC_API_TOKEN");
        config.api.device_id = env.string("TABSYNC_DEVICE_ID");
        config.storage.shared_dir = env.string("TABSYNC_SHARED_DIR").map(PathBuf::from);
        config.storage.local_dir = env.string("TABSYNC_LOCAL_DIR").map(PathBuf::from);
        config.transport.broker_addr = env.string("TABSYNC_BROKER_ADDR");
        if let Some(channel) = env.parse("TABSYNC_CHANNEL")? {
            config.transport.channel = channel;
        }

        if let Some(secret) = env.string("TABSYNC_SIGNING_SECRET") {
            let bytes = hex::decode(&secret).map_err(|e| ConfigError::InvalidValue {
                var: "TABSYNC_SIGNING_SECRET",
                value: "<redacted>".to_string(),
                reason: e.to_string(),
            })?;
            config.bus.signing_secret = Some(bytes);
        }

        if let Some(d) = env.millis("TABSYNC_RENEWAL_INTERVAL_MS")? {
            config.elector.renewal_interval = d;
        }
        if let Some(n) = env.parse("TABSYNC_STALENESS_MULTIPLE")? {
            config.elector.staleness_multiple = n;
        }
        if let Some(d) = env.millis("TABSYNC_MESSAGE_TIMEOUT_MS")? {
            config.bus.message_timeout = d;
        }
        if let Some(d) = env.millis("TABSYNC_LIVENESS_INTERVAL_MS")? {
            config.bus.liveness_interval = d;
        }
        if let Some(d) = env.millis("TABSYNC_REFRESH_SKEW_MS")? {
            config.refresh.refresh_skew = d;
        }
        if let Some(d) = env.millis("TABSYNC_POLL_INTERVAL_MS")? {
            config.poller.poll_interval = d;
        }
        if let Some(n) = env.parse("TABSYNC_POLL_MAX_ATTEMPTS")? {
            config.poller.max_attempts = n;
        }
        if let Some(d) = env.millis("TABSYNC_HEARTBEAT_INTERVAL_MS")? {
            config.heartbeat.interval = d;
        }
        if let Some(n) = env.parse("TABSYNC_BREAKER_THRESHOLD")? {
            config.breaker.failure_threshold = n;
        }
        if let Some(d) = env.millis("TABSYNC_BREAKER_COOLDOWN_MS")? {
            config.breaker.cooldown = d;
        }
        if let Some(n) = env.parse("TABSYNC_JOURNAL_CAPACITY")? {
            config.journal_capacity = n;
        }

        Ok(config)
    }

    /// Reject values that break the coordination timing.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let intervals = [
            ("renewal_interval", self.elector.renewal_interval),
            ("message_timeout", self.bus.message_timeout),
            ("liveness_interval", self.bus.liveness_interval),
            ("storage_poll_interval", self.bus.storage_poll_interval),
            ("poll_interval", self.poller.poll_interval),
            ("heartbeat_interval", self.heartbeat.interval),
            ("follower_wait", self.refresh.follower_wait),
            ("breaker_cooldown", self.breaker.cooldown),
        ];
        for (name, interval) in intervals {
            if interval.is_zero() {
                return Err(ConfigError::Zero(name));
            }
        }

        if self.elector.staleness_multiple < 2 {
            return Err(ConfigError::StalenessMultiple(
                self.elector.staleness_multiple,
            ));
        }
        if self.refresh.refresh_skew > MAX_REFRESH_SKEW {
            return Err(ConfigError::RefreshSkewTooLarge {
                skew: self.refresh.refresh_skew,
                max: MAX_REFRESH_SKEW,
            });
        }
        if self.poller.max_attempts == 0 {
            return Err(ConfigError::Zero("max_attempts"));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::Zero("failure_threshold"));
        }
        if self.journal_capacity == 0 {
            return Err(ConfigError::Zero("journal_capacity"));
        }
        if self.bus.max_fallback_entries == 0 {
            return Err(ConfigError::Zero("max_fallback_entries"));
        }
        if matches!(&self.api.device_id, Some(id) if id.trim().is_empty()) {
            return Err(ConfigError::EmptyDeviceId);
        }
        Ok(())
    }
}

struct Lookup<F>(F);

impl<F: Fn(&str) -> Option<String>> Lookup<F> {
    fn string(&self, var: &str) -> Option<String> {
        (self.0)(var).filter(|v| !v.trim().is_empty())
    }

    fn parse<T>(&self, var: &'static str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.string(var) {
            Some(raw) => raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|e: T::Err| ConfigError::InvalidValue {
                    var,
                    value: raw.clone(),
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    fn millis(&self, var: &'static str) -> Result<Option<Duration>, ConfigError> {
        Ok(self.parse::<u64>(var)?.map(Duration::from_millis))
    }
}
