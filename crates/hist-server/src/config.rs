//! Historian configuration using Figment.
//!
//! Configuration is layered, later sources winning:
//! 1. Built-in defaults (see [`hist_core::limits`])
//! 2. A TOML file
//! 3. Environment variables prefixed with `HISTORIAN_`, nested keys split on `__`
//!
//! # Example
//! ```no_run
//! use hist_server::HistorianConfig;
//!
//! // HISTORIAN_REALTIME__POLL_INTERVAL=250ms overrides the file
//! let config = HistorianConfig::load_from("historian.toml")?;
//! println!("Polling every {:?}", config.realtime.poll_interval);
//! # Ok::<(), hist_core::HistError>(())
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use hist_core::limits::{
    DEFAULT_FANOUT_SHARDS, DEFAULT_HEARTBEAT_TIMEOUT, DEFAULT_POLL_INTERVAL,
    DEFAULT_QUERY_CHANNEL_CAPACITY, DEFAULT_REAPER_INTERVAL, DEFAULT_SUBSCRIPTION_BUFFER,
    DEFAULT_TOPIC_CHANNEL_CAPACITY, MAX_INTERVALS_PER_REQUEST, MAX_TAGS_PER_REQUEST,
};
use hist_core::{HistError, HistResult, QueryLimits};
use hist_realtime::FanoutConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "HISTORIAN_";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Top-level historian configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistorianConfig {
    /// Logging level used when `RUST_LOG` is unset.
    pub log_level: String,
    /// Emit logs as JSON lines.
    pub log_json: bool,
    /// Historical query settings.
    pub query: QueryConfig,
    /// Subscription settings.
    pub realtime: RealtimeConfig,
}

/// Historical query settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Bound of every query output channel.
    pub channel_capacity: usize,
    /// Maximum tags per batch request.
    pub max_tags_per_request: usize,
    /// Maximum intervals per aggregation or plot request.
    pub max_intervals_per_request: u64,
}

/// Subscription settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    /// Polling bridge period.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Idle time after which a connection is reaped.
    #[serde(with = "humantime_serde")]
    pub heartbeat_timeout: Duration,
    /// Reaper scan period.
    #[serde(with = "humantime_serde")]
    pub reaper_interval: Duration,
    /// Buffer of each topic channel.
    pub topic_channel_capacity: usize,
    /// Buffer of each subscription's merged output.
    pub subscription_buffer: usize,
    /// Number of fan-out owner tasks.
    pub fanout_shards: usize,
}

impl Default for HistorianConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_json: false,
            query: QueryConfig::default(),
            realtime: RealtimeConfig::default(),
        }
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_QUERY_CHANNEL_CAPACITY,
            max_tags_per_request: MAX_TAGS_PER_REQUEST,
            max_intervals_per_request: MAX_INTERVALS_PER_REQUEST,
        }
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            reaper_interval: DEFAULT_REAPER_INTERVAL,
            topic_channel_capacity: DEFAULT_TOPIC_CHANNEL_CAPACITY,
            subscription_buffer: DEFAULT_SUBSCRIPTION_BUFFER,
            fanout_shards: DEFAULT_FANOUT_SHARDS,
        }
    }
}

impl HistorianConfig {
    /// Load defaults, then `path`, then `HISTORIAN_*` environment variables.
    ///
    /// A missing file is not an error; the other layers still apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> HistResult<Self> {
        Self::from_figment(Self::figment(path.as_ref(), ENV_PREFIX))
    }

    /// Load defaults and environment variables only.
    pub fn from_env() -> HistResult<Self> {
        Self::from_figment(
            Figment::new()
                .merge(Serialized::defaults(HistorianConfig::default()))
                .merge(Env::prefixed(ENV_PREFIX).split("__")),
        )
    }

    /// Extract and validate a configuration from any figment.
    pub fn from_figment(figment: Figment) -> HistResult<Self> {
        let config: HistorianConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    fn figment(path: &Path, env_prefix: &str) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(HistorianConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(env_prefix).split("__"))
    }

    /// Semantic validation after extraction.
    pub fn validate(&self) -> HistResult<()> {
        if !VALID_LOG_LEVELS.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(HistError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.log_level,
                VALID_LOG_LEVELS.join(", ")
            )));
        }

        let positive_counts = [
            ("query.channel_capacity", self.query.channel_capacity as u64),
            ("query.max_tags_per_request", self.query.max_tags_per_request as u64),
            ("query.max_intervals_per_request", self.query.max_intervals_per_request),
            ("realtime.topic_channel_capacity", self.realtime.topic_channel_capacity as u64),
            ("realtime.subscription_buffer", self.realtime.subscription_buffer as u64),
            ("realtime.fanout_shards", self.realtime.fanout_shards as u64),
        ];
        for (key, value) in positive_counts {
            if value == 0 {
                return Err(HistError::Configuration(format!("{key} must be positive")));
            }
        }

        let positive_durations = [
            ("realtime.poll_interval", self.realtime.poll_interval),
            ("realtime.heartbeat_timeout", self.realtime.heartbeat_timeout),
            ("realtime.reaper_interval", self.realtime.reaper_interval),
        ];
        for (key, value) in positive_durations {
            if value.is_zero() {
                return Err(HistError::Configuration(format!("{key} must be positive")));
            }
        }

        Ok(())
    }

    /// Request limits for the query façade.
    pub fn limits(&self) -> QueryLimits {
        QueryLimits {
            max_tags: self.query.max_tags_per_request,
            max_intervals: self.query.max_intervals_per_request,
        }
    }

    /// Fan-out sizing.
    pub fn fanout(&self) -> FanoutConfig {
        FanoutConfig {
            shards: self.realtime.fanout_shards,
            channel_capacity: self.realtime.topic_channel_capacity,
        }
    }
}
