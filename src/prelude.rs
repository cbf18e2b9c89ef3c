//! Prelude module that re-exports commonly used types and traits.
//!
//! Instead of importing each type individually, you can use:
//!
//! ```rust
//! use account_service_rs::prelude::*;
//! ```

// Order domain
pub use crate::order::{
    BrokerOrderId, InternalSecurityId, Market, MdTime, OrderBook, OrderEntry, OrderId,
    OrderRequest, OrderRouter, OrderSplitter, OrderStatus, OrderType, RouterStats, SecurityCode,
    SplitConfig, SplitError, SplitStrategy, TimestampNs, TradeSide, Volume,
};

// Shared-memory substrate
pub use crate::shm::{
    DownstreamShmLayout, INVALID_ORDER_INDEX, OrderIndex, OrdersShm, PositionsShmLayout, Shm,
    ShmError, ShmManager, ShmMode, SlotReadError, SlotSnapshot, SlotSource, SlotStage, SpscQueue,
    TradeResponse, TradesShmLayout, UpstreamShmLayout,
};

// Portfolio
pub use crate::portfolio::{FundInfo, PositionManager, build_internal_security_id};

// Risk pipeline
pub use crate::risk::{RiskCheckResult, RiskConfig, RiskManager, RiskResult, RiskRule};

// Service core
pub use crate::core::{
    ErrorCode, ErrorDomain, ErrorSeverity, EventLoop, EventLoopConfig, EventLoopStats,
    ServiceConfig, ShmConfig,
};

// Gateway
pub use crate::gateway::{
    BrokerAdapter, BrokerEvent, BrokerOrderRequest, BrokerRuntimeConfig, EventKind, GatewayConfig,
    GatewayLoop, GatewayStats, SendResult, SimBrokerAdapter,
};

// Primitives
pub use crate::common::{FixedString, now_monotonic_ns, now_ns};
