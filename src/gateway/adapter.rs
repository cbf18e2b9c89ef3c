//! The broker-adapter contract.
//!
//! The gateway drives any broker through this surface: initialize, submit,
//! poll events, shutdown. Adapters are either in-process objects (the sim
//! adapter) or dynamically loaded plugins behind the C ABI in
//! [`crate::gateway::plugin`]; the wire structs here are `repr(C)` so both
//! paths share one definition.

use crate::common::FixedString;

/// ABI version a plugin must report to be loaded.
pub const BROKER_API_ABI_VERSION: u32 = 1;

/// Kind of broker request.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestType {
    /// Unrecognized.
    #[default]
    Unknown = 0,
    /// New order.
    New = 1,
    /// Cancellation.
    Cancel = 2,
}

/// Side of a broker request or event.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BrokerSide {
    /// Unrecognized.
    #[default]
    Unknown = 0,
    /// Buy.
    Buy = 1,
    /// Sell.
    Sell = 2,
}

/// Venue of a broker request.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BrokerMarket {
    /// Unrecognized.
    #[default]
    Unknown = 0,
    /// Shenzhen.
    Sz = 1,
    /// Shanghai.
    Sh = 2,
    /// Beijing.
    Bj = 3,
    /// Hong Kong.
    Hk = 4,
}

/// Kind of broker event.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventKind {
    /// No event.
    #[default]
    None = 0,
    /// Broker accepted the order.
    BrokerAccepted = 1,
    /// Broker rejected the order.
    BrokerRejected = 2,
    /// Exchange rejected the order.
    MarketRejected = 3,
    /// A (partial) fill.
    Trade = 4,
    /// The order finished.
    Finished = 5,
}

/// Runtime configuration handed to an adapter at initialization.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct BrokerRuntimeConfig {
    /// Account the gateway serves.
    pub account_id: u32,
    /// Sim adapters: emit fills immediately after acceptance.
    pub auto_fill: bool,
}

impl Default for BrokerRuntimeConfig {
    fn default() -> Self {
        BrokerRuntimeConfig {
            account_id: 1,
            auto_fill: true,
        }
    }
}

/// One order request as the broker sees it.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct BrokerOrderRequest {
    /// Internal order id; the correlation key for events.
    pub internal_order_id: u32,
    /// Target order id for cancels.
    pub orig_internal_order_id: u32,
    /// Kind of request.
    pub request_type: RequestType,
    /// Side.
    pub trade_side: BrokerSide,
    /// Venue.
    pub market: BrokerMarket,
    /// Volume.
    pub volume: u64,
    /// Price in cents.
    pub price: u64,
    /// Market-data time driving the request.
    pub md_time: u32,
    /// Exchange security code.
    pub security_id: FixedString<16>,
    /// Internal security key, passed through to events.
    pub internal_security_id: FixedString<16>,
}

/// Outcome of a submit call.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendResult {
    /// The broker took the order.
    pub accepted: bool,
    /// Worth retrying later.
    pub retryable: bool,
    /// Adapter-specific error code.
    pub error_code: i32,
}

impl SendResult {
    /// Accepted.
    pub const fn ok() -> Self {
        SendResult {
            accepted: true,
            retryable: false,
            error_code: 0,
        }
    }

    /// Transient failure; the gateway may retry.
    pub const fn retryable_error(code: i32) -> Self {
        SendResult {
            accepted: false,
            retryable: true,
            error_code: code,
        }
    }

    /// Permanent failure.
    pub const fn fatal_error(code: i32) -> Self {
        SendResult {
            accepted: false,
            retryable: false,
            error_code: code,
        }
    }
}

/// One event polled from an adapter.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct BrokerEvent {
    /// What happened.
    pub kind: EventKind,
    /// Order the event belongs to.
    pub internal_order_id: u32,
    /// Broker-side order id.
    pub broker_order_id: u32,
    /// Internal security key echoed from the request.
    pub internal_security_id: FixedString<16>,
    /// Side echoed from the request.
    pub trade_side: BrokerSide,
    /// Filled volume (trade events).
    pub volume_traded: u64,
    /// Fill price.
    pub price_traded: u64,
    /// Fill value.
    pub value_traded: u64,
    /// Fee charged.
    pub fee: u64,
    /// Market-data trade time.
    pub md_time_traded: u32,
    /// Receive time at the adapter, wall-clock nanoseconds.
    pub recv_time_ns: u64,
}

/// Capability set the gateway consumes from any broker backend.
pub trait BrokerAdapter {
    /// Prepare the adapter. Returns `false` when the backend is unusable.
    fn initialize(&mut self, config: &BrokerRuntimeConfig) -> bool;

    /// Submit one request.
    fn submit(&mut self, request: &BrokerOrderRequest) -> SendResult;

    /// Drain up to `out.len()` pending events into `out`; returns how many
    /// were written.
    fn poll_events(&mut self, out: &mut [BrokerEvent]) -> usize;

    /// Release backend resources. Idempotent.
    fn shutdown(&mut self);
}
