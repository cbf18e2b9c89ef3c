//! Shared-memory substrate: SPSC queues, segment layouts, the segment
//! manager, and the seqlock-protected order pool.

pub mod layout;
mod manager;
mod order_pool;
mod spsc;

pub use layout::{
    DAILY_ORDER_POOL_CAPACITY, DOWNSTREAM_ORDER_SHM_NAME, DOWNSTREAM_QUEUE_CAPACITY,
    DownstreamShmLayout, INVALID_ORDER_INDEX, MAX_ACTIVE_ORDERS, MAX_POSITIONS, ORDERS_SHM_BASE_NAME,
    OrderIndex, POSITIONS_SHM_NAME, PositionsHeader, PositionsShmLayout, RESPONSE_QUEUE_CAPACITY,
    STRATEGY_ORDER_QUEUE_CAPACITY, STRATEGY_ORDER_SHM_NAME, ShmHeader, TRADES_SHM_NAME,
    TradeResponse, TradesShmLayout, UpstreamShmLayout,
};
pub use manager::{Shm, ShmError, ShmManager, ShmMode};
pub use order_pool::{
    OrderSlot, OrdersHeader, OrdersShm, SlotReadError, SlotSnapshot, SlotSource, SlotStage,
    extract_trading_day_from_name, is_valid_trading_day, make_orders_shm_name,
};
pub use spsc::SpscQueue;
