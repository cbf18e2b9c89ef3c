//! The 192-byte order request shared between processes.
//!
//! `OrderRequest` is the payload of every order-pool slot and the unit the
//! strategy, account service, and gateway all agree on. Its layout is
//! load-bearing: three cache lines, fixed offsets, no heap references.
//! External monitors read these bytes directly, so the compile-time
//! assertions at the bottom of this file are part of the contract.

use crate::common::FixedString;
use std::fmt;
use std::mem::offset_of;

/// Internal order identifier, dense and non-zero once assigned.
pub type OrderId = u32;
/// Share volume.
pub type Volume = u64;
/// Price in cents (two implied decimals).
pub type DPrice = u64;
/// Money amount in cents.
pub type DValue = u64;
/// Intraday market-data time in milliseconds.
pub type MdTime = u32;
/// Wall-clock nanoseconds since the Unix epoch.
pub type TimestampNs = u64;
/// Strategy identifier.
pub type StrategyId = u16;
/// Account identifier.
pub type AccountId = u32;

/// Internal security key, formatted `"<MARKET>.<code>"` (e.g. `"SZ.000001"`).
pub type InternalSecurityId = FixedString<16>;
/// Exchange security code (e.g. `"000001"`).
pub type SecurityCode = FixedString<16>;

/// Kind of request.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderType {
    /// Unset.
    NotSet = 0,
    /// New order submission.
    New = 1,
    /// Cancellation of an earlier order.
    Cancel = 2,
    /// Unrecognized value.
    Unknown = 0xFF,
}

impl OrderType {
    /// Decode from a raw byte, mapping unrecognized values to `Unknown`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => OrderType::NotSet,
            1 => OrderType::New,
            2 => OrderType::Cancel,
            _ => OrderType::Unknown,
        }
    }
}

/// Buy or sell.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeSide {
    /// Unset.
    NotSet = 0,
    /// Buy.
    Buy = 1,
    /// Sell.
    Sell = 2,
}

impl TradeSide {
    /// Decode from a raw byte, mapping unrecognized values to `NotSet`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => TradeSide::Buy,
            2 => TradeSide::Sell,
            _ => TradeSide::NotSet,
        }
    }
}

/// Exchange venue.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Market {
    /// Unset.
    NotSet = 0,
    /// Shenzhen.
    Sz = 1,
    /// Shanghai.
    Sh = 2,
    /// Beijing.
    Bj = 3,
    /// Hong Kong.
    Hk = 4,
    /// Unrecognized value.
    Unknown = 0xFF,
}

impl Market {
    /// Decode from a raw byte, mapping unrecognized values to `Unknown`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Market::NotSet,
            1 => Market::Sz,
            2 => Market::Sh,
            3 => Market::Bj,
            4 => Market::Hk,
            _ => Market::Unknown,
        }
    }

    /// Uppercase internal-key prefix, empty for unset/unknown markets.
    pub fn prefix(self) -> &'static str {
        match self {
            Market::Sz => "SZ",
            Market::Sh => "SH",
            Market::Bj => "BJ",
            Market::Hk => "HK",
            _ => "",
        }
    }
}

/// Business status of an order. Byte values are part of the wire protocol.
///
/// Distinct from the slot *stage*, which tracks where an order-pool slot is
/// inside the IPC pipeline.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    /// Unset.
    NotSet = 0,
    /// Submitted by a strategy, not yet admitted.
    StrategySubmitted = 0x12,
    /// Waiting on the risk pipeline.
    RiskControllerPending = 0x20,
    /// Rejected by a risk rule. Terminal.
    RiskControllerRejected = 0x21,
    /// Passed the risk pipeline.
    RiskControllerAccepted = 0x22,
    /// Accepted by the trader layer, not yet sent downstream.
    TraderPending = 0x30,
    /// Rejected by the trader layer. Terminal.
    TraderRejected = 0x31,
    /// Enqueued to the gateway.
    TraderSubmitted = 0x32,
    /// The trader layer could not progress the order. Terminal.
    TraderError = 0x33,
    /// Rejected by the broker. Terminal.
    BrokerRejected = 0x41,
    /// Accepted by the broker.
    BrokerAccepted = 0x42,
    /// Rejected by the exchange. Terminal.
    MarketRejected = 0x51,
    /// Accepted (traded) at the exchange.
    MarketAccepted = 0x52,
    /// Fully filled or otherwise completed. Terminal.
    Finished = 0x62,
    /// Unrecognized value. Terminal.
    Unknown = 0xFF,
}

impl OrderStatus {
    /// Decode from a raw byte, mapping unrecognized values to `Unknown`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => OrderStatus::NotSet,
            0x12 => OrderStatus::StrategySubmitted,
            0x20 => OrderStatus::RiskControllerPending,
            0x21 => OrderStatus::RiskControllerRejected,
            0x22 => OrderStatus::RiskControllerAccepted,
            0x30 => OrderStatus::TraderPending,
            0x31 => OrderStatus::TraderRejected,
            0x32 => OrderStatus::TraderSubmitted,
            0x33 => OrderStatus::TraderError,
            0x41 => OrderStatus::BrokerRejected,
            0x42 => OrderStatus::BrokerAccepted,
            0x51 => OrderStatus::MarketRejected,
            0x52 => OrderStatus::MarketAccepted,
            0x62 => OrderStatus::Finished,
            _ => OrderStatus::Unknown,
        }
    }

    /// Whether no further transitions are expected.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::RiskControllerRejected
                | OrderStatus::TraderRejected
                | OrderStatus::TraderError
                | OrderStatus::BrokerRejected
                | OrderStatus::MarketRejected
                | OrderStatus::Finished
                | OrderStatus::Unknown
        )
    }

    /// Pipeline progress rank used for split-parent aggregation; higher
    /// means further along. Terminal and unset statuses rank zero.
    pub fn progress_rank(self) -> u8 {
        match self {
            OrderStatus::MarketAccepted => 7,
            OrderStatus::BrokerAccepted => 6,
            OrderStatus::TraderSubmitted => 5,
            OrderStatus::TraderPending => 4,
            OrderStatus::RiskControllerAccepted => 3,
            OrderStatus::RiskControllerPending => 2,
            OrderStatus::StrategySubmitted => 1,
            _ => 0,
        }
    }
}

/// Broker order id: a 32-byte text field whose first 8 bytes are also
/// readable as a numeric id. Brokers return one or the other; the overlay
/// keeps the slot layout identical either way.
#[repr(C)]
#[derive(Clone, Copy)]
pub union BrokerOrderId {
    text: FixedString<32>,
    numeric: u64,
}

impl BrokerOrderId {
    /// The zero id.
    pub const fn zero() -> Self {
        BrokerOrderId {
            text: FixedString::new(),
        }
    }

    /// Numeric view of the first 8 bytes.
    pub fn as_u64(&self) -> u64 {
        // SAFETY: both views are plain bytes; any bit pattern is a valid u64.
        unsafe { self.numeric }
    }

    /// Overwrite the numeric view. Clears the remaining text bytes.
    pub fn set_u64(&mut self, value: u64) {
        self.text = FixedString::new();
        self.numeric = value;
    }

    /// Text view of all 32 bytes.
    pub fn text(&self) -> &FixedString<32> {
        // SAFETY: any bit pattern is a valid byte array.
        unsafe { &self.text }
    }

    /// Overwrite the text view.
    pub fn set_text(&mut self, value: &str) {
        self.text = FixedString::from_str_truncated(value);
    }
}

impl Default for BrokerOrderId {
    fn default() -> Self {
        Self::zero()
    }
}

impl PartialEq for BrokerOrderId {
    fn eq(&self, other: &Self) -> bool {
        self.text().raw() == other.text().raw()
    }
}

impl Eq for BrokerOrderId {}

impl fmt::Debug for BrokerOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BrokerOrderId({})", self.as_u64())
    }
}

/// One order request: 192 bytes, three cache lines.
///
/// Cache line 0 holds identity and entrust terms, line 1 execution
/// aggregates, line 2 fees, timing, and status.
#[repr(C, align(64))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderRequest {
    // cache line 0
    /// Internal order id, unique within the trading day.
    pub internal_order_id: OrderId,
    _pad0: u8,
    /// Kind of request.
    pub order_type: OrderType,
    /// Buy or sell.
    pub trade_side: TradeSide,
    /// Venue.
    pub market: Market,
    /// Entrusted volume.
    pub volume_entrust: Volume,
    /// Entrusted price in cents.
    pub dprice_entrust: DPrice,
    /// Target order id; cancel requests only.
    pub orig_internal_order_id: OrderId,
    /// Internal security key (`"SZ.000001"`).
    pub internal_security_id: InternalSecurityId,
    /// Exchange security code (`"000001"`).
    pub security_id: SecurityCode,
    _pad1: [u8; 4],

    // cache line 1
    /// Broker-assigned order id (text/numeric overlay).
    pub broker_order_id: BrokerOrderId,
    /// Volume traded so far.
    pub volume_traded: Volume,
    /// Volume still outstanding.
    pub volume_remain: Volume,
    /// Traded value so far, in cents.
    pub dvalue_traded: DValue,
    /// Volume-weighted traded price.
    pub dprice_traded: DPrice,

    // cache line 2
    /// Estimated fee.
    pub dfee_estimate: DValue,
    /// Fee actually charged so far.
    pub dfee_executed: DValue,
    /// Market-data time that triggered the order.
    pub md_time_driven: MdTime,
    /// Entrust completion time, filled by the trader layer.
    pub md_time_entrust: MdTime,
    /// Local time a cancel was sent.
    pub md_time_cancel_sent: MdTime,
    /// Broker/market time a cancel completed.
    pub md_time_cancel_done: MdTime,
    /// Broker response time.
    pub md_time_broker_response: MdTime,
    /// Exchange response time.
    pub md_time_market_response: MdTime,
    /// First trade time.
    pub md_time_traded_first: MdTime,
    /// Latest trade time.
    pub md_time_traded_latest: MdTime,
    /// Current business status.
    pub order_status: OrderStatus,
    _pad2: [u8; 15],
}

impl OrderRequest {
    /// A fully zeroed request.
    pub const fn new() -> Self {
        OrderRequest {
            internal_order_id: 0,
            _pad0: 0,
            order_type: OrderType::NotSet,
            trade_side: TradeSide::NotSet,
            market: Market::NotSet,
            volume_entrust: 0,
            dprice_entrust: 0,
            orig_internal_order_id: 0,
            internal_security_id: FixedString::new(),
            security_id: FixedString::new(),
            _pad1: [0; 4],
            broker_order_id: BrokerOrderId::zero(),
            volume_traded: 0,
            volume_remain: 0,
            dvalue_traded: 0,
            dprice_traded: 0,
            dfee_estimate: 0,
            dfee_executed: 0,
            md_time_driven: 0,
            md_time_entrust: 0,
            md_time_cancel_sent: 0,
            md_time_cancel_done: 0,
            md_time_broker_response: 0,
            md_time_market_response: 0,
            md_time_traded_first: 0,
            md_time_traded_latest: 0,
            order_status: OrderStatus::NotSet,
            _pad2: [0; 15],
        }
    }

    /// Initialize as a new order.
    #[allow(clippy::too_many_arguments)]
    pub fn init_new(
        &mut self,
        security_id: &str,
        internal_security_id: InternalSecurityId,
        internal_id: OrderId,
        side: TradeSide,
        market: Market,
        volume: Volume,
        dprice: DPrice,
        md_time_driven: MdTime,
    ) {
        self.internal_order_id = internal_id;
        self.order_type = OrderType::New;
        self.trade_side = side;
        self.market = market;
        self.volume_entrust = volume;
        self.dprice_entrust = dprice;
        self.md_time_driven = md_time_driven;
        self.md_time_entrust = 0; // filled by the trader layer
        self.security_id.assign(security_id);
        self.internal_security_id = internal_security_id;
        self.md_time_cancel_sent = 0;
        self.md_time_cancel_done = 0;
        self.volume_traded = 0;
        self.volume_remain = volume;
        self.dvalue_traded = 0;
        self.dprice_traded = 0;
        self.dfee_estimate = 0;
        self.dfee_executed = 0;
    }

    /// Initialize as a cancel targeting `orig_internal_id`.
    pub fn init_cancel(
        &mut self,
        internal_id: OrderId,
        md_time_driven: MdTime,
        orig_internal_id: OrderId,
    ) {
        self.internal_order_id = internal_id;
        self.order_type = OrderType::Cancel;
        self.trade_side = TradeSide::NotSet;
        self.market = Market::NotSet;
        self.volume_entrust = 0;
        self.dprice_entrust = 0;
        self.md_time_driven = md_time_driven;
        self.md_time_entrust = 0;
        self.security_id.clear();
        self.internal_security_id.clear();
        self.orig_internal_order_id = orig_internal_id;
        self.md_time_cancel_sent = 0;
        self.md_time_cancel_done = 0;
        self.broker_order_id = BrokerOrderId::zero();
        self.volume_traded = 0;
        self.volume_remain = 0;
        self.dvalue_traded = 0;
        self.dprice_traded = 0;
        self.dfee_estimate = 0;
        self.dfee_executed = 0;
        self.md_time_broker_response = 0;
        self.md_time_market_response = 0;
        self.md_time_traded_first = 0;
        self.md_time_traded_latest = 0;
    }
}

impl Default for OrderRequest {
    fn default() -> Self {
        Self::new()
    }
}

// Layout contract: three cache lines at fixed offsets.
const _: () = assert!(std::mem::size_of::<OrderRequest>() == 192);
const _: () = assert!(std::mem::align_of::<OrderRequest>() == 64);
const _: () = assert!(offset_of!(OrderRequest, broker_order_id) == 64);
const _: () = assert!(offset_of!(OrderRequest, dfee_estimate) == 128);
const _: () = assert!(offset_of!(OrderRequest, order_status) == 176);
const _: () = assert!(std::mem::size_of::<BrokerOrderId>() == 32);
