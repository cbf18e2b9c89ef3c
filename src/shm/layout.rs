//! Shared-memory segment layouts.
//!
//! Every segment begins with a 64-byte header carrying a 4-byte ASCII magic,
//! a version, and create/last-update timestamps. All structs here are
//! `repr(C)` with fixed offsets; the assertions at the bottom are part of
//! the cross-process contract. Fields that peers mutate after creation are
//! atomics; everything else is written once by the creator before the
//! segment is published.

use crate::order::{DPrice, DValue, InternalSecurityId, MdTime, OrderId, OrderStatus, TimestampNs, TradeSide, Volume};
use crate::portfolio::Position;
use crate::shm::SpscQueue;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize};

/// Upstream queue capacity (strategy → account), power of two.
pub const STRATEGY_ORDER_QUEUE_CAPACITY: usize = 65_536;
/// Downstream queue capacity (account → gateway), power of two.
pub const DOWNSTREAM_QUEUE_CAPACITY: usize = 65_536;
/// Trade-response queue capacity (gateway → account), power of two.
pub const RESPONSE_QUEUE_CAPACITY: usize = 131_072;
/// Position table capacity, FUND row included.
pub const MAX_POSITIONS: usize = 8_192;
/// Maximum concurrently active orders in the in-process book.
pub const MAX_ACTIVE_ORDERS: usize = 1 << 20;
/// Default per-day order pool capacity.
pub const DAILY_ORDER_POOL_CAPACITY: u32 = 1 << 20;

/// Default upstream segment name.
pub const STRATEGY_ORDER_SHM_NAME: &str = "/strategy_order_shm";
/// Default downstream segment name.
pub const DOWNSTREAM_ORDER_SHM_NAME: &str = "/downstream_order_shm";
/// Default trades segment name.
pub const TRADES_SHM_NAME: &str = "/trades_shm";
/// Default order-pool segment base name (a `_YYYYMMDD` suffix is appended).
pub const ORDERS_SHM_BASE_NAME: &str = "/orders_shm";
/// Default positions segment name.
pub const POSITIONS_SHM_NAME: &str = "/positions_shm";

/// Index of a slot in the order pool.
pub type OrderIndex = u32;
/// Sentinel for "no slot".
pub const INVALID_ORDER_INDEX: OrderIndex = OrderIndex::MAX;

/// Generic segment header (`"ACST"`).
#[repr(C, align(64))]
pub struct ShmHeader {
    /// Magic, [`ShmHeader::MAGIC`].
    pub magic: u32,
    /// Layout version, [`ShmHeader::VERSION`].
    pub version: u32,
    /// Creation time, wall-clock nanoseconds.
    pub create_time_ns: u64,
    /// Last mutation time, wall-clock nanoseconds.
    pub last_update_ns: AtomicU64,
    /// Order-id counter persisted across process restarts.
    pub next_order_id: AtomicU32,
    _pad0: u32,
    _reserved: [u64; 4],
}

impl ShmHeader {
    /// `"ACST"`.
    pub const MAGIC: u32 = 0x4143_5354;
    /// Current layout version.
    pub const VERSION: u32 = 3;

    /// Initialize a freshly created header.
    pub fn init(&mut self, now_ns: TimestampNs) {
        self.magic = Self::MAGIC;
        self.version = Self::VERSION;
        self.create_time_ns = now_ns;
        *self.last_update_ns.get_mut() = now_ns;
        *self.next_order_id.get_mut() = 1;
    }

    /// Whether magic and version match the current layout.
    pub fn is_valid(&self) -> bool {
        self.magic == Self::MAGIC && self.version == Self::VERSION
    }
}

/// Position-table segment header (`"ACST"`, dedicated field set).
#[repr(C, align(64))]
pub struct PositionsHeader {
    /// Magic, [`PositionsHeader::MAGIC`].
    pub magic: u32,
    /// Layout version, [`PositionsHeader::VERSION`].
    pub version: u32,
    /// `size_of::<PositionsHeader>()`, validated on open.
    pub header_size: u32,
    /// `size_of::<PositionsShmLayout>()`, validated on open.
    pub total_size: u32,
    /// Row capacity, validated on open.
    pub capacity: u32,
    /// 0 = initialization incomplete, 1 = readers may observe.
    pub init_state: AtomicU32,
    /// Creation time, wall-clock nanoseconds.
    pub create_time_ns: u64,
    /// Last mutation time, wall-clock nanoseconds.
    pub last_update_ns: AtomicU64,
    /// Next internal security id (row index of the next security).
    pub next_security_id: AtomicU32,
    _reserved: [u32; 3],
}

impl PositionsHeader {
    /// `"ACST"`.
    pub const MAGIC: u32 = 0x4143_5354;
    /// Current layout version.
    pub const VERSION: u32 = 3;
}

/// Trade report pushed by the gateway and applied by the account loop.
/// 128 bytes, bitwise-copyable; lives only inside the trades queue.
#[repr(C, align(64))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradeResponse {
    /// Order this report belongs to. Zero reports are dropped.
    pub internal_order_id: OrderId,
    /// Broker-side order id.
    pub broker_order_id: u32,
    /// Internal security key of the traded instrument.
    pub internal_security_id: InternalSecurityId,
    /// Side of the originating order.
    pub trade_side: TradeSide,
    /// Status the order transitions to.
    pub new_status: OrderStatus,
    _pad0: [u8; 6],
    /// Volume filled by this report.
    pub volume_traded: Volume,
    /// Fill price.
    pub dprice_traded: DPrice,
    /// Fill value.
    pub dvalue_traded: DValue,
    /// Fee charged for this fill.
    pub dfee: DValue,
    /// Market-data trade time.
    pub md_time_traded: MdTime,
    _pad1: u32,
    /// Local receive time at the gateway.
    pub recv_time_ns: TimestampNs,
}

impl TradeResponse {
    /// An all-zero response.
    pub const fn new() -> Self {
        TradeResponse {
            internal_order_id: 0,
            broker_order_id: 0,
            internal_security_id: InternalSecurityId::new(),
            trade_side: TradeSide::NotSet,
            new_status: OrderStatus::NotSet,
            _pad0: [0; 6],
            volume_traded: 0,
            dprice_traded: 0,
            dvalue_traded: 0,
            dfee: 0,
            md_time_traded: 0,
            _pad1: 0,
            recv_time_ns: 0,
        }
    }
}

impl Default for TradeResponse {
    fn default() -> Self {
        Self::new()
    }
}

/// Upstream segment: strategy → account order indices.
#[repr(C)]
pub struct UpstreamShmLayout {
    /// Segment header.
    pub header: ShmHeader,
    /// Index queue; elements refer to order-pool slots.
    pub strategy_order_queue: SpscQueue<OrderIndex, STRATEGY_ORDER_QUEUE_CAPACITY>,
}

/// Downstream segment: account → gateway order indices.
#[repr(C)]
pub struct DownstreamShmLayout {
    /// Segment header.
    pub header: ShmHeader,
    /// Index queue; elements refer to order-pool slots.
    pub order_queue: SpscQueue<OrderIndex, DOWNSTREAM_QUEUE_CAPACITY>,
}

/// Trades segment: gateway → account trade responses.
#[repr(C)]
pub struct TradesShmLayout {
    /// Segment header.
    pub header: ShmHeader,
    /// Trade-response queue.
    pub response_queue: SpscQueue<TradeResponse, RESPONSE_QUEUE_CAPACITY>,
}

#[repr(C, align(64))]
struct PaddedCount {
    count: AtomicUsize,
}

/// Positions segment: header, row count on its own cache line, then the
/// row array (row 0 is FUND).
#[repr(C, align(64))]
pub struct PositionsShmLayout {
    /// Segment header.
    pub header: PositionsHeader,
    position_count: PaddedCount,
    /// Row array; rows `1..=position_count` are securities.
    pub positions: [Position; MAX_POSITIONS],
}

impl PositionsShmLayout {
    /// Number of security rows currently populated.
    pub fn position_count(&self) -> &AtomicUsize {
        &self.position_count.count
    }
}

// Layout contract.
const _: () = assert!(std::mem::size_of::<ShmHeader>() == 64);
const _: () = assert!(std::mem::size_of::<PositionsHeader>() == 64);
const _: () = assert!(std::mem::size_of::<TradeResponse>() == 128);
const _: () = assert!(std::mem::align_of::<TradeResponse>() == 64);
const _: () = assert!(std::mem::size_of::<Position>() == 136);
const _: () = assert!(
    std::mem::size_of::<PositionsShmLayout>()
        == 128 + MAX_POSITIONS * std::mem::size_of::<Position>()
);
const _: () = assert!(std::mem::offset_of!(UpstreamShmLayout, strategy_order_queue) == 64);
const _: () = assert!(std::mem::offset_of!(TradesShmLayout, response_queue) == 64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_init_and_validate() {
        let mut header = unsafe { std::mem::zeroed::<ShmHeader>() };
        assert!(!header.is_valid());
        header.init(123);
        assert!(header.is_valid());
        assert_eq!(header.create_time_ns, 123);
        assert_eq!(*header.next_order_id.get_mut(), 1);
    }

    #[test]
    fn trade_response_layout_offsets() {
        assert_eq!(std::mem::size_of::<TradeResponse>(), 128);
        assert_eq!(std::mem::offset_of!(TradeResponse, volume_traded), 32);
        assert_eq!(std::mem::offset_of!(TradeResponse, recv_time_ns), 72);
    }
}
