//! Service core: error taxonomy, configuration, signals, the account event
//! loop, and orchestration.

mod config;
pub mod error;
mod event_loop;
pub mod service;
pub mod signals;

pub use config::{ConfigError, EventLoopConfig, ServiceConfig, ShmConfig};
pub use error::{
    ErrorCode, ErrorDomain, ErrorPolicy, ErrorRegistry, ErrorSeverity, ErrorStatus, classify,
    clear_last_error, clear_shutdown_reason, global_error_registry, last_error, latest_error,
    record_error, request_shutdown, should_exit_process, should_stop_service, shutdown_reason,
};
pub use event_loop::{EventLoop, EventLoopStats};
pub use service::{ServiceError, run as run_account_service};
