//! Account-service orchestration.
//!
//! Opens the five shared-memory segments, bootstraps the position table,
//! wires the book, risk pipeline, and router, and runs the event loop to
//! completion. Expressed as a run function so segment handles and the
//! components borrowing them share one scope.

use crate::core::config::ServiceConfig;
use crate::core::error::should_exit_process;
use crate::core::event_loop::EventLoop;
use crate::core::signals;
use crate::order::{OrderBook, OrderRouter};
use crate::portfolio::PositionManager;
use crate::risk::RiskManager;
use crate::shm::{ShmError, ShmManager, ShmMode};
use thiserror::Error;
use tracing::{error, info};

/// Why the service could not start or finish cleanly.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// A shared-memory segment could not be opened or validated.
    #[error(transparent)]
    Shm(#[from] ShmError),
    /// The position table could not be initialized.
    #[error("position table initialization failed")]
    PortfolioInit,
}

/// Run the account service until a stop signal or critical error.
/// Returns the process exit code.
pub fn run(config: &ServiceConfig) -> Result<i32, ServiceError> {
    let manager = match &config.shm.runtime_dir {
        Some(dir) => ShmManager::with_base_dir(dir),
        None => ShmManager::new(),
    };
    let mode = if config.shm.create_if_not_exist {
        ShmMode::OpenOrCreate
    } else {
        ShmMode::Open
    };

    let upstream = manager.open_upstream(&config.shm.upstream_shm_name, mode)?;
    let downstream = manager.open_downstream(&config.shm.downstream_shm_name, mode)?;
    let trades = manager.open_trades(&config.shm.trades_shm_name, mode)?;
    let positions_shm = manager.open_positions(&config.shm.positions_shm_name, mode)?;
    let orders_shm = manager.open_orders(
        &config.shm.orders_shm_name,
        &config.trading_day,
        config.order_pool_capacity,
        mode,
    )?;

    let mut positions = PositionManager::new(&positions_shm);
    if !positions.initialize() {
        return Err(ServiceError::PortfolioInit);
    }

    let book = OrderBook::new();
    let risk = RiskManager::new(config.risk);
    let router = OrderRouter::new(&book, &downstream, &orders_shm, config.split);

    let mut event_loop = EventLoop::new(
        config.event_loop,
        &upstream,
        &trades,
        &orders_shm,
        &book,
        router,
        positions,
        risk,
    );

    signals::install();
    info!(
        account_id = config.account_id,
        trading_day = %config.trading_day,
        "account service running"
    );

    event_loop.run();

    let stats = event_loop.stats();
    info!(
        iterations = stats.total_iterations,
        orders = stats.orders_processed,
        responses = stats.responses_processed,
        "account service stopped"
    );

    if should_exit_process() {
        error!("account service exiting after critical error");
        return Ok(1);
    }
    Ok(0)
}
