//! # Shared-Memory Trading Account Service
//!
//! A single-account, low-latency account service that mediates between
//! strategy processes (upstream) and a broker gateway (downstream) through
//! shared-memory queues. The service enforces pre-trade risk, applies
//! order splitting, maintains authoritative fund and position state, and
//! exposes every order and position to external monitors through
//! seqlock-protected shared memory.
//!
//! ## Architecture
//!
//! Two cooperating processes share memory:
//!
//! ```text
//! strategy ──(upstream idx queue)──▶ account service ──(downstream idx queue)──▶ gateway
//!                                        ▲                                         │
//!                                        └───────(trades record queue)─────────────┘
//!                   (order pool + position table are mmapped, monitor-visible)
//! ```
//!
//! - **Order pool** — an append-only slot array in a dated segment; each
//!   slot guards its 192-byte request with a seqlock, and the index queues
//!   carry *only* slot indices.
//! - **Account event loop** — one cooperative single-threaded loop that
//!   drains upstream indices, runs the risk pipeline, routes (and splits)
//!   orders downstream, and applies trade responses back to fund and
//!   position state.
//! - **Gateway loop** — one single-threaded loop that drains downstream
//!   indices, submits to a broker adapter with bounded retry, and maps
//!   broker events into trade responses.
//! - **Order book** — an in-process slab mirror of live orders with
//!   parent↔children aggregation for split orders under a single spinlock.
//! - **Position table** — fixed-capacity rows in shared memory; row 0 is
//!   the FUND row, each row carries its own one-byte lock.
//!
//! No async runtime, no worker pools: all cross-process coordination is
//! SPSC queues, seqlock slots, and per-row/book spinlocks.
//!
//! ## Concurrency guarantees
//!
//! - Index queues are strictly FIFO; the gateway submits in the exact
//!   order the account service enqueued (modulo bounded retries).
//! - A seqlock reader either observes a coherent snapshot or retries; a
//!   torn request is never surfaced.
//! - `next_index` on the pool only grows; published slots never become
//!   invisible and indices are never reused within a trading day.
//! - Split-parent aggregates are refreshed inside the same locked section
//!   as the child mutation that triggered them.
//!
//! ## Error model
//!
//! Failures carry a domain, a code, and a severity derived from the code.
//! Recoverable failures are recorded and surfaced through return values;
//! critical and fatal codes additionally raise a process-wide shutdown
//! flag that both loops observe every iteration. See [`core::error`].

pub mod common;
pub mod core;
pub mod gateway;
pub mod order;
pub mod portfolio;
pub mod prelude;
pub mod risk;
pub mod shm;

pub use crate::common::FixedString;
pub use crate::core::{
    ConfigError, EventLoop, EventLoopConfig, EventLoopStats, ServiceConfig, ServiceError,
};
pub use crate::gateway::{BrokerAdapter, GatewayConfig, GatewayLoop, SimBrokerAdapter};
pub use crate::order::{
    OrderBook, OrderEntry, OrderRequest, OrderRouter, OrderSplitter, OrderStatus, OrderType,
    SplitConfig, SplitStrategy, TradeSide,
};
pub use crate::portfolio::{FundInfo, PositionManager};
pub use crate::risk::{RiskCheckResult, RiskConfig, RiskManager, RiskResult, RiskRule};
pub use crate::shm::{OrdersShm, ShmError, ShmManager, ShmMode, SpscQueue, TradeResponse};
