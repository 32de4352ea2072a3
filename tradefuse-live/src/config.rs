//! Live loop configuration, loaded once at start-up from TOML.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use tradefuse_core::fusion::FusionConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Submission retry schedule for transient venue failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
            max_delay_ms: 8_000,
        }
    }
}

/// Every tunable of the live worker. Missing keys take the defaults below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// Market symbol, `BASE/QUOTE`.
    pub pair: String,
    pub timeframe: String,
    pub order_amount: f64,
    pub decision_threshold: f64,
    pub min_confidence: f64,
    pub tick_interval_ms: u64,
    pub watchdog_interval_ms: u64,
    pub error_backoff_ms: u64,
    /// Timeout for each venue/provider call and each state write.
    pub poll_timeout_ms: u64,
    /// Minimum spacing between two actionable candidates.
    pub action_cooldown_ms: u64,
    pub fee_rate: f64,
    pub dry_run: bool,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub save_throttle_ms: u64,
    pub dedup_window_ms: u64,
    pub state_path: PathBuf,
    pub audit_path: PathBuf,
    pub events_path: PathBuf,
    /// Capacity of each JSONL write queue.
    pub queue_capacity: usize,
    pub retry: RetryConfig,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            pair: "BTC/EUR".to_string(),
            timeframe: "1h".to_string(),
            order_amount: 0.001,
            decision_threshold: 0.05,
            min_confidence: 0.3,
            tick_interval_ms: 60_000,
            watchdog_interval_ms: 300_000,
            error_backoff_ms: 15_000,
            poll_timeout_ms: 10_000,
            action_cooldown_ms: 300_000,
            fee_rate: 0.001,
            dry_run: true,
            stop_loss_pct: 0.02,
            take_profit_pct: 0.04,
            save_throttle_ms: 2_000,
            dedup_window_ms: 10_000,
            state_path: PathBuf::from("state/positions.json"),
            audit_path: PathBuf::from("state/orders.jsonl"),
            events_path: PathBuf::from("state/candidates.jsonl"),
            queue_capacity: 1_024,
            retry: RetryConfig::default(),
        }
    }
}

impl LiveConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_asset().is_none() || self.quote_asset().is_none() {
            return invalid("pair", format!("expected BASE/QUOTE, got '{}'", self.pair));
        }
        if self.timeframe.trim().is_empty() {
            return invalid("timeframe", "must not be empty".to_string());
        }
        if !(self.order_amount.is_finite() && self.order_amount > 0.0) {
            return invalid("order_amount", format!("must be positive, got {}", self.order_amount));
        }
        for (field, v) in [
            ("decision_threshold", self.decision_threshold),
            ("min_confidence", self.min_confidence),
            ("fee_rate", self.fee_rate),
            ("stop_loss_pct", self.stop_loss_pct),
            ("take_profit_pct", self.take_profit_pct),
        ] {
            if !(v.is_finite() && v >= 0.0) {
                return invalid(field, format!("must be zero or positive, got {v}"));
            }
        }
        if self.min_confidence > 1.0 {
            return invalid("min_confidence", format!("must be at most 1, got {}", self.min_confidence));
        }
        for (field, v) in [
            ("tick_interval_ms", self.tick_interval_ms),
            ("watchdog_interval_ms", self.watchdog_interval_ms),
            ("poll_timeout_ms", self.poll_timeout_ms),
        ] {
            if v == 0 {
                return invalid(field, "must be greater than zero".to_string());
            }
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts", "must be at least 1".to_string());
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return invalid(
                "retry.max_delay_ms",
                format!("must be >= base_delay_ms ({})", self.retry.base_delay_ms),
            );
        }
        if self.queue_capacity == 0 {
            return invalid("queue_capacity", "must be greater than zero".to_string());
        }
        Ok(())
    }

    pub fn base_asset(&self) -> Option<&str> {
        self.pair.split_once('/').map(|(b, _)| b.trim()).filter(|s| !s.is_empty())
    }

    pub fn quote_asset(&self) -> Option<&str> {
        self.pair.split_once('/').map(|(_, q)| q.trim()).filter(|s| !s.is_empty())
    }

    pub fn fusion_config(&self) -> FusionConfig {
        FusionConfig {
            decision_threshold: self.decision_threshold,
            min_confidence: self.min_confidence,
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn action_cooldown(&self) -> Duration {
        Duration::from_millis(self.action_cooldown_ms)
    }

    pub fn save_throttle(&self) -> Duration {
        Duration::from_millis(self.save_throttle_ms)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }
}

fn invalid(field: &'static str, reason: String) -> Result<(), ConfigError> {
    Err(ConfigError::Invalid { field, reason })
}
