//! Order domain: the shared request type, the in-process book, the
//! splitter, and the downstream router.

mod book;
pub(crate) mod request;
mod router;
mod splitter;

pub use book::{OrderBook, OrderEntry};
pub use request::{
    AccountId, BrokerOrderId, DPrice, DValue, InternalSecurityId, Market, MdTime, OrderId,
    OrderRequest, OrderStatus, OrderType, SecurityCode, StrategyId, TimestampNs, TradeSide, Volume,
};
pub use router::{OrderRouter, RouterStats};
pub use splitter::{OrderSplitter, SplitConfig, SplitError, SplitStrategy};
