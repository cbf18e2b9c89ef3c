//! Gateway: the broker-adapter contract, the sim and plugin adapters, the
//! slot/event mappers, and the gateway loop.

mod adapter;
mod config;
mod gateway_loop;
pub mod mapper;
mod plugin;
mod runner;
mod sim;

pub use adapter::{
    BROKER_API_ABI_VERSION, BrokerAdapter, BrokerEvent, BrokerMarket, BrokerOrderRequest,
    BrokerRuntimeConfig, BrokerSide, EventKind, RequestType, SendResult,
};
pub use config::{BrokerType, GatewayConfig};
pub use gateway_loop::{GatewayLoop, GatewayStats};
pub use plugin::{BrokerAdapterVTable, PluginBrokerAdapter, PluginError};
pub use runner::{GatewayError, run};
pub use sim::SimBrokerAdapter;
