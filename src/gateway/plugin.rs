//! Dynamically loaded broker adapters.
//!
//! A plugin is a shared object exposing exactly three symbols:
//!
//! - `acct_broker_plugin_abi_version() -> u32` — must equal
//!   [`BROKER_API_ABI_VERSION`];
//! - `acct_broker_create_adapter() -> *mut BrokerAdapterVTable` — builds an
//!   adapter instance and returns its vtable;
//! - `acct_broker_destroy_adapter(*mut BrokerAdapterVTable)` — tears the
//!   instance down.
//!
//! The vtable is the stable ABI surface: a context pointer plus C function
//! pointers mirroring the [`BrokerAdapter`] trait. The account-service core
//! never loads plugins; only the gateway does.

use crate::core::error::{self, ErrorCode, ErrorDomain};
use crate::gateway::adapter::{
    BROKER_API_ABI_VERSION, BrokerAdapter, BrokerEvent, BrokerOrderRequest, BrokerRuntimeConfig,
    SendResult,
};
use libloading::Library;
use std::ffi::c_void;
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// C-ABI adapter instance: context pointer plus operation table.
#[repr(C)]
pub struct BrokerAdapterVTable {
    /// Opaque adapter state, passed back on every call.
    pub ctx: *mut c_void,
    /// See [`BrokerAdapter::initialize`].
    pub initialize: unsafe extern "C" fn(*mut c_void, *const BrokerRuntimeConfig) -> bool,
    /// See [`BrokerAdapter::submit`].
    pub submit: unsafe extern "C" fn(*mut c_void, *const BrokerOrderRequest) -> SendResult,
    /// See [`BrokerAdapter::poll_events`]. Writes at most `max` events.
    pub poll_events: unsafe extern "C" fn(*mut c_void, *mut BrokerEvent, usize) -> usize,
    /// See [`BrokerAdapter::shutdown`].
    pub shutdown: unsafe extern "C" fn(*mut c_void),
}

type AbiVersionFn = unsafe extern "C" fn() -> u32;
type CreateFn = unsafe extern "C" fn() -> *mut BrokerAdapterVTable;
type DestroyFn = unsafe extern "C" fn(*mut BrokerAdapterVTable);

const ABI_VERSION_SYMBOL: &[u8] = b"acct_broker_plugin_abi_version";
const CREATE_SYMBOL: &[u8] = b"acct_broker_create_adapter";
const DESTROY_SYMBOL: &[u8] = b"acct_broker_destroy_adapter";

/// Why a plugin could not be loaded.
#[derive(Debug, Error)]
pub enum PluginError {
    /// The shared object could not be loaded.
    #[error("plugin load failed for {path}: {source}")]
    LoadFailed {
        /// Offending path.
        path: String,
        /// Loader error.
        source: libloading::Error,
    },
    /// A required symbol is missing.
    #[error("plugin symbol {symbol} missing in {path}: {source}")]
    SymbolMissing {
        /// Offending path.
        path: String,
        /// The missing symbol.
        symbol: &'static str,
        /// Loader error.
        source: libloading::Error,
    },
    /// The plugin reports an incompatible ABI version.
    #[error("plugin ABI mismatch: expected {expected}, got {actual}")]
    AbiMismatch {
        /// The version this build expects.
        expected: u32,
        /// The version the plugin reports.
        actual: u32,
    },
    /// The plugin's create function returned null.
    #[error("plugin create returned null")]
    CreateFailed,
}

/// A loaded plugin adapter. Dropping destroys the instance, then unloads
/// the library.
pub struct PluginBrokerAdapter {
    vtable: *mut BrokerAdapterVTable,
    destroy: DestroyFn,
    // Held last so the function pointers above outlive their code.
    _library: Library,
}

// SAFETY: the gateway drives the adapter from a single thread; the raw
// pointers are never shared.
unsafe impl Send for PluginBrokerAdapter {}

impl PluginBrokerAdapter {
    /// Load a plugin, check its ABI version, and create an instance.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PluginError> {
        let path = path.as_ref();
        let path_display = path.display().to_string();

        // SAFETY: loading executes the library's initializers; the plugin
        // contract is that they are side-effect free beyond registration.
        let library = unsafe {
            Library::new(path).map_err(|source| {
                error::report(
                    ErrorDomain::Api,
                    ErrorCode::ComponentUnavailable,
                    "adapter_loader",
                    format!("plugin load failed for {path_display}: {source}"),
                );
                PluginError::LoadFailed {
                    path: path_display.clone(),
                    source,
                }
            })?
        };

        // SAFETY: symbol types match the documented plugin contract.
        let (abi_version, create, destroy) = unsafe {
            let abi_version = library
                .get::<AbiVersionFn>(ABI_VERSION_SYMBOL)
                .map_err(|source| PluginError::SymbolMissing {
                    path: path_display.clone(),
                    symbol: "acct_broker_plugin_abi_version",
                    source,
                })?;
            let create =
                library
                    .get::<CreateFn>(CREATE_SYMBOL)
                    .map_err(|source| PluginError::SymbolMissing {
                        path: path_display.clone(),
                        symbol: "acct_broker_create_adapter",
                        source,
                    })?;
            let destroy =
                library
                    .get::<DestroyFn>(DESTROY_SYMBOL)
                    .map_err(|source| PluginError::SymbolMissing {
                        path: path_display.clone(),
                        symbol: "acct_broker_destroy_adapter",
                        source,
                    })?;
            (abi_version(), *create, *destroy)
        };

        if abi_version != BROKER_API_ABI_VERSION {
            error::report(
                ErrorDomain::Api,
                ErrorCode::ComponentUnavailable,
                "adapter_loader",
                format!(
                    "plugin ABI mismatch for {path_display}: expected {BROKER_API_ABI_VERSION}, got {abi_version}"
                ),
            );
            return Err(PluginError::AbiMismatch {
                expected: BROKER_API_ABI_VERSION,
                actual: abi_version,
            });
        }

        // SAFETY: the symbol matched the contract; a null return is the
        // plugin's failure signal.
        let vtable = unsafe { create() };
        if vtable.is_null() {
            return Err(PluginError::CreateFailed);
        }

        info!(path = %path_display, abi = abi_version, "broker plugin loaded");
        Ok(PluginBrokerAdapter {
            vtable,
            destroy,
            _library: library,
        })
    }
}

impl BrokerAdapter for PluginBrokerAdapter {
    fn initialize(&mut self, config: &BrokerRuntimeConfig) -> bool {
        // SAFETY: vtable is non-null for the adapter's lifetime.
        unsafe {
            let vtable = &*self.vtable;
            (vtable.initialize)(vtable.ctx, config)
        }
    }

    fn submit(&mut self, request: &BrokerOrderRequest) -> SendResult {
        // SAFETY: as above.
        unsafe {
            let vtable = &*self.vtable;
            (vtable.submit)(vtable.ctx, request)
        }
    }

    fn poll_events(&mut self, out: &mut [BrokerEvent]) -> usize {
        // SAFETY: as above; the callee writes at most `out.len()` events.
        let written = unsafe {
            let vtable = &*self.vtable;
            (vtable.poll_events)(vtable.ctx, out.as_mut_ptr(), out.len())
        };
        written.min(out.len())
    }

    fn shutdown(&mut self) {
        // SAFETY: as above.
        unsafe {
            let vtable = &*self.vtable;
            (vtable.shutdown)(vtable.ctx);
        }
    }
}

impl Drop for PluginBrokerAdapter {
    fn drop(&mut self) {
        // SAFETY: destroy matches create; called exactly once.
        unsafe {
            (self.destroy)(self.vtable);
        }
    }
}
