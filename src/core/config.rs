//! Account-service configuration.
//!
//! Plain serde structs with JSON file loading. Every field has a default,
//! so a partial config file (or none at all) yields a runnable setup; the
//! binaries layer CLI overrides on top.

use crate::core::error::{self, ErrorCode, ErrorDomain};
use crate::order::SplitConfig;
use crate::risk::RiskConfig;
use crate::shm::{
    self, DAILY_ORDER_POOL_CAPACITY, DOWNSTREAM_ORDER_SHM_NAME, ORDERS_SHM_BASE_NAME,
    POSITIONS_SHM_NAME, STRATEGY_ORDER_SHM_NAME, TRADES_SHM_NAME,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Segment names and attach policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShmConfig {
    /// Upstream (strategy → account) segment name.
    pub upstream_shm_name: String,
    /// Downstream (account → gateway) segment name.
    pub downstream_shm_name: String,
    /// Trades (gateway → account) segment name.
    pub trades_shm_name: String,
    /// Order-pool segment base name; the trading day is appended.
    pub orders_shm_name: String,
    /// Positions segment name.
    pub positions_shm_name: String,
    /// Create missing segments instead of failing to attach.
    pub create_if_not_exist: bool,
    /// Directory segments live in; `None` means `/dev/shm`.
    pub runtime_dir: Option<String>,
}

impl Default for ShmConfig {
    fn default() -> Self {
        ShmConfig {
            upstream_shm_name: STRATEGY_ORDER_SHM_NAME.to_string(),
            downstream_shm_name: DOWNSTREAM_ORDER_SHM_NAME.to_string(),
            trades_shm_name: TRADES_SHM_NAME.to_string(),
            orders_shm_name: ORDERS_SHM_BASE_NAME.to_string(),
            positions_shm_name: POSITIONS_SHM_NAME.to_string(),
            create_if_not_exist: true,
            runtime_dir: None,
        }
    }
}

/// Event-loop pacing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct EventLoopConfig {
    /// Spin instead of sleeping when idle.
    pub busy_polling: bool,
    /// Max orders and responses drained per iteration.
    pub poll_batch_size: u32,
    /// Idle sleep in microseconds (when not busy-polling).
    pub idle_sleep_us: u32,
    /// Periodic stats interval in milliseconds; zero disables.
    pub stats_interval_ms: u32,
    /// Pin the loop thread to a core.
    pub pin_cpu: bool,
    /// Core to pin to; negative means unpinned.
    pub cpu_core: i32,
}

impl Default for EventLoopConfig {
    fn default() -> Self {
        EventLoopConfig {
            busy_polling: true,
            poll_batch_size: 64,
            idle_sleep_us: 0,
            stats_interval_ms: 1000,
            pin_cpu: false,
            cpu_core: -1,
        }
    }
}

/// Full account-service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Account identifier.
    pub account_id: u32,
    /// Trading day, `YYYYMMDD`; selects the dated order pool.
    pub trading_day: String,
    /// Order-pool slot capacity for the day.
    pub order_pool_capacity: u32,
    /// Segment names and attach policy.
    pub shm: ShmConfig,
    /// Event-loop pacing.
    pub event_loop: EventLoopConfig,
    /// Risk pipeline configuration.
    pub risk: RiskConfig,
    /// Order splitter configuration.
    pub split: SplitConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            account_id: 1,
            trading_day: "19700101".to_string(),
            order_pool_capacity: DAILY_ORDER_POOL_CAPACITY,
            shm: ShmConfig::default(),
            event_loop: EventLoopConfig::default(),
            risk: RiskConfig::default(),
            split: SplitConfig::default(),
        }
    }
}

/// Configuration loading/validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("config read failed for {path}: {source}")]
    Io {
        /// Offending path.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// The config file is not valid JSON for [`ServiceConfig`].
    #[error("config parse failed for {path}: {source}")]
    Parse {
        /// Offending path.
        path: String,
        /// Underlying parse error.
        source: serde_json::Error,
    },
    /// A field failed validation.
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl ServiceConfig {
    /// Load from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<ServiceConfig, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| {
            error::report(
                ErrorDomain::Config,
                ErrorCode::ConfigParseFailed,
                "config",
                format!("read failed for {}: {source}", path.display()),
            );
            ConfigError::Io {
                path: path.display().to_string(),
                source,
            }
        })?;
        let config: ServiceConfig = serde_json::from_str(&text).map_err(|source| {
            error::report(
                ErrorDomain::Config,
                ErrorCode::ConfigParseFailed,
                "config",
                format!("parse failed for {}: {source}", path.display()),
            );
            ConfigError::Parse {
                path: path.display().to_string(),
                source,
            }
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check semantic constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !shm::is_valid_trading_day(&self.trading_day) {
            error::report(
                ErrorDomain::Config,
                ErrorCode::ConfigValidateFailed,
                "config",
                format!("invalid trading day {:?}", self.trading_day),
            );
            return Err(ConfigError::Invalid(format!(
                "trading_day must be YYYYMMDD, got {:?}",
                self.trading_day
            )));
        }
        if self.order_pool_capacity == 0 {
            error::report(
                ErrorDomain::Config,
                ErrorCode::ConfigValidateFailed,
                "config",
                "order_pool_capacity is zero",
            );
            return Err(ConfigError::Invalid(
                "order_pool_capacity must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let mut config = ServiceConfig::default();
        config.trading_day = "20260801".to_string();
        assert!(config.validate().is_ok());
        assert_eq!(config.shm.upstream_shm_name, "/strategy_order_shm");
        assert_eq!(config.event_loop.poll_batch_size, 64);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: ServiceConfig = serde_json::from_str(
            r#"{"trading_day":"20260801","risk":{"max_order_volume":500}}"#,
        )
        .unwrap();
        assert_eq!(config.trading_day, "20260801");
        assert_eq!(config.risk.max_order_volume, 500);
        assert!(config.risk.enable_fund_check);
        assert_eq!(config.shm.trades_shm_name, "/trades_shm");
    }

    #[test]
    fn bad_trading_day_fails_validation() {
        let mut config = ServiceConfig::default();
        config.trading_day = "2026-08-01".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("service.json");
        let mut config = ServiceConfig::default();
        config.trading_day = "20260801".to_string();
        config.account_id = 7;
        std::fs::write(&path, serde_json::to_string_pretty(&config).unwrap()).unwrap();

        let loaded = ServiceConfig::load(&path).unwrap();
        assert_eq!(loaded.account_id, 7);
        assert_eq!(loaded.trading_day, "20260801");
    }
}
