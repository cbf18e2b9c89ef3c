//! Gateway orchestration: open segments, build the adapter, run the loop.

use crate::core::signals;
use crate::gateway::adapter::{BrokerAdapter, BrokerRuntimeConfig};
use crate::gateway::config::{BrokerType, GatewayConfig};
use crate::gateway::gateway_loop::GatewayLoop;
use crate::gateway::plugin::{PluginBrokerAdapter, PluginError};
use crate::gateway::sim::SimBrokerAdapter;
use crate::shm::{ShmError, ShmManager, ShmMode};
use thiserror::Error;
use tracing::info;

/// Why the gateway could not start.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// A shared-memory segment could not be opened or validated.
    #[error(transparent)]
    Shm(#[from] ShmError),
    /// The plugin adapter could not be loaded.
    #[error(transparent)]
    Plugin(#[from] PluginError),
    /// `broker_type = plugin` without an `adapter_so` path.
    #[error("broker type is plugin but no adapter path was given")]
    MissingAdapterPath,
    /// The adapter refused to initialize.
    #[error("broker adapter initialization failed")]
    AdapterInit,
}

/// Run the gateway until a stop signal or fatal queue failure.
/// Returns the process exit code.
pub fn run(config: &GatewayConfig) -> Result<i32, GatewayError> {
    let manager = match &config.runtime_dir {
        Some(dir) => ShmManager::with_base_dir(dir),
        None => ShmManager::new(),
    };
    let mode = if config.create_if_not_exist {
        ShmMode::OpenOrCreate
    } else {
        ShmMode::Open
    };

    let downstream = manager.open_downstream(&config.downstream_shm_name, mode)?;
    let trades = manager.open_trades(&config.trades_shm_name, mode)?;
    let orders_shm = manager.open_orders(
        &config.orders_shm_name,
        &config.trading_day,
        config.order_pool_capacity,
        mode,
    )?;

    let runtime_config = BrokerRuntimeConfig {
        account_id: config.account_id,
        auto_fill: config.auto_fill,
    };

    signals::install();
    info!(
        account_id = config.account_id,
        trading_day = %config.trading_day,
        broker = ?config.broker_type,
        "gateway running"
    );

    let exit_code = match config.broker_type {
        BrokerType::Sim => {
            let mut adapter = SimBrokerAdapter::new();
            if !adapter.initialize(&runtime_config) {
                return Err(GatewayError::AdapterInit);
            }
            let mut gateway_loop =
                GatewayLoop::new(config.clone(), &downstream, &trades, &orders_shm, adapter);
            let code = gateway_loop.run();
            gateway_loop.adapter_mut().shutdown();
            code
        }
        BrokerType::Plugin => {
            let path = config
                .adapter_so
                .as_ref()
                .ok_or(GatewayError::MissingAdapterPath)?;
            let mut adapter = PluginBrokerAdapter::load(path)?;
            if !adapter.initialize(&runtime_config) {
                return Err(GatewayError::AdapterInit);
            }
            let mut gateway_loop =
                GatewayLoop::new(config.clone(), &downstream, &trades, &orders_shm, adapter);
            let code = gateway_loop.run();
            gateway_loop.adapter_mut().shutdown();
            code
        }
    };

    info!(exit_code, "gateway stopped");
    Ok(exit_code)
}
