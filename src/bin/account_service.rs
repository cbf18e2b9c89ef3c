//! Account-service binary: opens the shared-memory segments and runs the
//! account event loop.

use account_service_rs::core::{ServiceConfig, service};
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "account-service",
    about = "Shared-memory trading account service"
)]
struct Args {
    /// JSON configuration file; CLI flags override its values.
    #[arg(long)]
    config: Option<String>,

    /// Account id.
    #[arg(long)]
    account_id: Option<u32>,

    /// Trading day, YYYYMMDD.
    #[arg(long)]
    trading_day: Option<String>,

    /// Upstream (strategy → account) segment name.
    #[arg(long)]
    upstream_shm: Option<String>,

    /// Downstream (account → gateway) segment name.
    #[arg(long)]
    downstream_shm: Option<String>,

    /// Trades (gateway → account) segment name.
    #[arg(long)]
    trades_shm: Option<String>,

    /// Order-pool segment base name.
    #[arg(long)]
    orders_shm: Option<String>,

    /// Positions segment name.
    #[arg(long)]
    positions_shm: Option<String>,

    /// Create missing segments instead of failing to attach.
    #[arg(long)]
    create_if_not_exist: Option<bool>,

    /// Max orders/responses drained per loop iteration.
    #[arg(long)]
    poll_batch_size: Option<u32>,

    /// Idle sleep in microseconds (disables busy polling when set).
    #[arg(long)]
    idle_sleep_us: Option<u32>,

    /// Periodic stats interval in milliseconds.
    #[arg(long)]
    stats_interval_ms: Option<u32>,
}

fn build_config(args: &Args) -> Result<ServiceConfig, i32> {
    let mut config = match &args.config {
        Some(path) => ServiceConfig::load(path).map_err(|err| {
            error!("{err}");
            2
        })?,
        None => ServiceConfig::default(),
    };

    if let Some(account_id) = args.account_id {
        config.account_id = account_id;
    }
    if let Some(trading_day) = &args.trading_day {
        config.trading_day = trading_day.clone();
    }
    if let Some(name) = &args.upstream_shm {
        config.shm.upstream_shm_name = name.clone();
    }
    if let Some(name) = &args.downstream_shm {
        config.shm.downstream_shm_name = name.clone();
    }
    if let Some(name) = &args.trades_shm {
        config.shm.trades_shm_name = name.clone();
    }
    if let Some(name) = &args.orders_shm {
        config.shm.orders_shm_name = name.clone();
    }
    if let Some(name) = &args.positions_shm {
        config.shm.positions_shm_name = name.clone();
    }
    if let Some(create) = args.create_if_not_exist {
        config.shm.create_if_not_exist = create;
    }
    if let Some(batch) = args.poll_batch_size {
        config.event_loop.poll_batch_size = batch;
    }
    if let Some(sleep_us) = args.idle_sleep_us {
        config.event_loop.idle_sleep_us = sleep_us;
        config.event_loop.busy_polling = sleep_us == 0;
    }
    if let Some(interval) = args.stats_interval_ms {
        config.event_loop.stats_interval_ms = interval;
    }

    config.validate().map_err(|err| {
        error!("{err}");
        2
    })?;
    Ok(config)
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = match build_config(&args) {
        Ok(config) => config,
        Err(code) => std::process::exit(code),
    };

    match service::run(&config) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            error!("account service failed: {err}");
            std::process::exit(1);
        }
    }
}
