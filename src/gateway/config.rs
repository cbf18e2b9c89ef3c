//! Gateway configuration.

use crate::shm::{
    DAILY_ORDER_POOL_CAPACITY, DOWNSTREAM_ORDER_SHM_NAME, ORDERS_SHM_BASE_NAME, TRADES_SHM_NAME,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which broker backend to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerType {
    /// The in-process simulated broker.
    #[default]
    Sim,
    /// A dynamically loaded plugin (requires `adapter_so`).
    Plugin,
}

/// Gateway process configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Account the gateway serves.
    pub account_id: u32,
    /// Downstream (account → gateway) segment name.
    pub downstream_shm_name: String,
    /// Trades (gateway → account) segment name.
    pub trades_shm_name: String,
    /// Order-pool segment base name; the trading day is appended.
    pub orders_shm_name: String,
    /// Trading day, `YYYYMMDD`.
    pub trading_day: String,
    /// Order-pool slot capacity, must match the account side.
    pub order_pool_capacity: u32,
    /// Broker backend.
    pub broker_type: BrokerType,
    /// Plugin path when `broker_type == Plugin`.
    pub adapter_so: Option<PathBuf>,
    /// Sim adapter: fill orders immediately.
    pub auto_fill: bool,
    /// Create missing segments instead of failing to attach.
    pub create_if_not_exist: bool,
    /// Max orders/events handled per loop iteration.
    pub poll_batch_size: u32,
    /// Idle sleep in microseconds.
    pub idle_sleep_us: u32,
    /// Periodic stats interval in milliseconds; zero disables.
    pub stats_interval_ms: u32,
    /// Max submit attempts per order.
    pub max_retry_attempts: u32,
    /// Delay between retries, microseconds.
    pub retry_interval_us: u32,
    /// Directory segments live in; `None` means `/dev/shm`.
    pub runtime_dir: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        GatewayConfig {
            account_id: 1,
            downstream_shm_name: DOWNSTREAM_ORDER_SHM_NAME.to_string(),
            trades_shm_name: TRADES_SHM_NAME.to_string(),
            orders_shm_name: ORDERS_SHM_BASE_NAME.to_string(),
            trading_day: "19700101".to_string(),
            order_pool_capacity: DAILY_ORDER_POOL_CAPACITY,
            broker_type: BrokerType::Sim,
            adapter_so: None,
            auto_fill: true,
            create_if_not_exist: false,
            poll_batch_size: 64,
            idle_sleep_us: 50,
            stats_interval_ms: 1000,
            max_retry_attempts: 3,
            retry_interval_us: 200,
            runtime_dir: None,
        }
    }
}
