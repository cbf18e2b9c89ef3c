//! Gateway binary: drains the downstream queue into a broker adapter and
//! pushes trade responses back to the account service.

use account_service_rs::gateway::{self, BrokerType, GatewayConfig};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum BrokerTypeArg {
    /// In-process simulated broker.
    Sim,
    /// Dynamically loaded plugin (requires --adapter-so).
    Plugin,
}

#[derive(Debug, Parser)]
#[command(name = "account-gateway", about = "Broker gateway for the account service")]
struct Args {
    /// Account id.
    #[arg(long, default_value_t = 1)]
    account_id: u32,

    /// Downstream (account → gateway) segment name.
    #[arg(long, default_value = "/downstream_order_shm")]
    downstream_shm: String,

    /// Trades (gateway → account) segment name.
    #[arg(long, default_value = "/trades_shm")]
    trades_shm: String,

    /// Order-pool segment base name.
    #[arg(long, default_value = "/orders_shm")]
    orders_shm: String,

    /// Trading day, YYYYMMDD; selects the dated order pool.
    #[arg(long)]
    trading_day: String,

    /// Broker adapter type.
    #[arg(long, value_enum, default_value = "sim")]
    broker_type: BrokerTypeArg,

    /// Adapter plugin path (required when --broker-type plugin).
    #[arg(long)]
    adapter_so: Option<PathBuf>,

    /// Open-or-create segments instead of requiring them to exist.
    #[arg(long)]
    create_if_not_exist: bool,

    /// Max orders/events handled per loop iteration.
    #[arg(long, default_value_t = 64)]
    poll_batch_size: u32,

    /// Idle sleep in microseconds.
    #[arg(long, default_value_t = 50)]
    idle_sleep_us: u32,

    /// Periodic stats interval in milliseconds.
    #[arg(long, default_value_t = 1000)]
    stats_interval_ms: u32,

    /// Max submit attempts per order.
    #[arg(long, default_value_t = 3)]
    max_retries: u32,

    /// Delay between retries, microseconds.
    #[arg(long, default_value_t = 200)]
    retry_interval_us: u32,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let config = GatewayConfig {
        account_id: args.account_id,
        downstream_shm_name: args.downstream_shm,
        trades_shm_name: args.trades_shm,
        orders_shm_name: args.orders_shm,
        trading_day: args.trading_day,
        broker_type: match args.broker_type {
            BrokerTypeArg::Sim => BrokerType::Sim,
            BrokerTypeArg::Plugin => BrokerType::Plugin,
        },
        adapter_so: args.adapter_so,
        create_if_not_exist: args.create_if_not_exist,
        poll_batch_size: args.poll_batch_size,
        idle_sleep_us: args.idle_sleep_us,
        stats_interval_ms: args.stats_interval_ms,
        max_retry_attempts: args.max_retries,
        retry_interval_us: args.retry_interval_us,
        ..GatewayConfig::default()
    };

    if config.broker_type == BrokerType::Plugin && config.adapter_so.is_none() {
        error!("--broker-type plugin requires --adapter-so");
        std::process::exit(2);
    }

    match gateway::run(&config) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            error!("gateway failed: {err}");
            std::process::exit(1);
        }
    }
}
