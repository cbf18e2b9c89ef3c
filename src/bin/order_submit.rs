//! Strategy-side submission tool: materializes one order in the pool and
//! enqueues its index upstream. Useful for exercising a running account
//! service end to end without a strategy process.

use account_service_rs::common::now_ns;
use account_service_rs::order::{Market, OrderRequest, OrderStatus, TradeSide};
use account_service_rs::portfolio::build_internal_security_id;
use account_service_rs::shm::{ShmManager, ShmMode, SlotSource, SlotStage};
use clap::{Parser, ValueEnum};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SideArg {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum MarketArg {
    Sz,
    Sh,
    Bj,
    Hk,
}

#[derive(Debug, Parser)]
#[command(name = "order-submit", about = "Submit one order to the account service")]
struct Args {
    /// Exchange security code, e.g. 000001.
    #[arg(long)]
    security: String,

    /// Buy or sell.
    #[arg(long, value_enum)]
    side: SideArg,

    /// Market venue.
    #[arg(long, value_enum)]
    market: MarketArg,

    /// Order volume.
    #[arg(long)]
    volume: u64,

    /// Limit price in yuan (converted to cents).
    #[arg(long)]
    price: f64,

    /// Internal order id; zero lets the service assign one.
    #[arg(long, default_value_t = 0)]
    order_id: u32,

    /// Market-data time driving the order, milliseconds.
    #[arg(long, default_value_t = 0)]
    md_time: u32,

    /// Upstream (strategy → account) segment name.
    #[arg(long, default_value = "/strategy_order_shm")]
    upstream_shm: String,

    /// Order-pool segment base name.
    #[arg(long, default_value = "/orders_shm")]
    orders_shm: String,

    /// Trading day, YYYYMMDD.
    #[arg(long)]
    trading_day: String,

    /// Order-pool slot capacity, must match the account side.
    #[arg(long, default_value_t = account_service_rs::shm::DAILY_ORDER_POOL_CAPACITY)]
    order_pool_capacity: u32,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let side = match args.side {
        SideArg::Buy => TradeSide::Buy,
        SideArg::Sell => TradeSide::Sell,
    };
    let market = match args.market {
        MarketArg::Sz => Market::Sz,
        MarketArg::Sh => Market::Sh,
        MarketArg::Bj => Market::Bj,
        MarketArg::Hk => Market::Hk,
    };

    if args.volume == 0 || args.price <= 0.0 {
        error!("volume and price must be positive");
        std::process::exit(2);
    }
    let dprice = (args.price * 100.0).round() as u64;

    let Some(internal_security_id) = build_internal_security_id(market, &args.security) else {
        error!(security = %args.security, "unusable security code");
        std::process::exit(2);
    };

    let manager = ShmManager::new();
    let upstream = match manager.open_upstream(&args.upstream_shm, ShmMode::Open) {
        Ok(shm) => shm,
        Err(err) => {
            error!("{err}");
            std::process::exit(1);
        }
    };
    let orders = match manager.open_orders(
        &args.orders_shm,
        &args.trading_day,
        args.order_pool_capacity,
        ShmMode::Open,
    ) {
        Ok(pool) => pool,
        Err(err) => {
            error!("{err}");
            std::process::exit(1);
        }
    };

    let mut request = OrderRequest::new();
    request.init_new(
        &args.security,
        internal_security_id,
        args.order_id,
        side,
        market,
        args.volume,
        dprice,
        args.md_time,
    );
    request.order_status = OrderStatus::StrategySubmitted;

    let Some(index) = orders.append(
        &request,
        SlotStage::UpstreamQueued,
        SlotSource::Strategy,
        now_ns(),
    ) else {
        error!("order pool is full");
        std::process::exit(1);
    };

    if !upstream.strategy_order_queue.try_push(&index) {
        orders.update_stage(index, SlotStage::QueuePushFailed, now_ns());
        error!("upstream queue is full");
        std::process::exit(1);
    }

    info!(
        index,
        order_id = request.internal_order_id,
        security = %args.security,
        volume = args.volume,
        price_cents = dprice,
        "order submitted"
    );
}
