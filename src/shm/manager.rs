//! Creation, attachment, and validation of named shared-memory segments.
//!
//! Segments are files inside a runtime directory, opened read-write and
//! mapped shared. The default directory is `/dev/shm`, which is where
//! POSIX `shm_open` puts them on Linux. The mapping is size-exact:
//! attaching to an existing segment whose file size differs from the
//! expected layout is fatal.
//!
//! The manager never unlinks; [`ShmManager::unlink`] exists for tooling and
//! is always an explicit, separate operation.

use crate::common::now_ns;
use crate::core::error::{self, ErrorCode, ErrorDomain};
use crate::shm::layout::{
    DownstreamShmLayout, PositionsHeader, PositionsShmLayout, ShmHeader, TradesShmLayout,
    UpstreamShmLayout,
};
use crate::shm::order_pool::{OrdersShm, is_valid_trading_day, make_orders_shm_name};
use memmap2::MmapMut;
use std::fs::OpenOptions;
use std::marker::PhantomData;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// How to attach to a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShmMode {
    /// Create a new segment; fail if it already exists.
    Create,
    /// Attach to an existing segment; fail if it does not exist.
    Open,
    /// Try an exclusive create, fall back to opening.
    OpenOrCreate,
}

/// Failures while creating, attaching, or validating a segment.
#[derive(Debug, Error)]
pub enum ShmError {
    /// The segment could not be created or opened.
    #[error("shm open failed for {name}: {source}")]
    OpenFailed {
        /// Segment name.
        name: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The segment could not be sized.
    #[error("shm resize failed for {name}: {source}")]
    ResizeFailed {
        /// Segment name.
        name: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// An existing segment's size does not match the expected layout.
    #[error("shm size mismatch for {name}: expected {expected}, got {actual}")]
    SizeMismatch {
        /// Segment name.
        name: String,
        /// Expected size in bytes.
        expected: usize,
        /// Observed file size in bytes.
        actual: u64,
    },

    /// The segment could not be mapped.
    #[error("shm mmap failed for {name}: {source}")]
    MmapFailed {
        /// Segment name.
        name: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// An existing segment's header failed validation.
    #[error("shm header invalid for {name}")]
    HeaderInvalid {
        /// Segment name.
        name: String,
    },

    /// A trading day was not eight ASCII digits.
    #[error("invalid trading day {day:?}")]
    InvalidTradingDay {
        /// The offending value.
        day: String,
    },
}

/// A mapped segment typed as `T`. Owns the mapping; dereferences to the
/// layout struct, whose interior atomics and locks carry all mutation.
pub struct Shm<T> {
    mmap: MmapMut,
    _marker: PhantomData<T>,
}

// SAFETY: the layout types synchronize all shared access internally.
unsafe impl<T: Sync> Send for Shm<T> {}
unsafe impl<T: Sync> Sync for Shm<T> {}

impl<T> std::fmt::Debug for Shm<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shm")
            .field("len", &self.mmap.len())
            .finish()
    }
}

impl<T> Shm<T> {
    fn new(mmap: MmapMut) -> Self {
        debug_assert!(mmap.len() >= std::mem::size_of::<T>());
        Shm {
            mmap,
            _marker: PhantomData,
        }
    }

    fn get_mut(&mut self) -> &mut T {
        // SAFETY: sized and page-aligned by construction; exclusive borrow.
        unsafe { &mut *(self.mmap.as_mut_ptr() as *mut T) }
    }
}

impl<T> Deref for Shm<T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: sized and page-aligned by construction.
        unsafe { &*(self.mmap.as_ptr() as *const T) }
    }
}

/// Segment factory rooted at a runtime directory.
pub struct ShmManager {
    base_dir: PathBuf,
}

impl ShmManager {
    /// Manager over the default `/dev/shm` namespace.
    pub fn new() -> Self {
        Self::with_base_dir("/dev/shm")
    }

    /// Manager over an alternate directory (tests, non-Linux hosts).
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        ShmManager {
            base_dir: base_dir.into(),
        }
    }

    /// Directory segments live in.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.base_dir.join(name.trim_start_matches('/'))
    }

    /// Open or create a raw region of exactly `size` bytes.
    /// Returns the mapping and whether it was freshly created.
    fn open_region(
        &self,
        name: &str,
        size: usize,
        mode: ShmMode,
    ) -> Result<(MmapMut, bool), ShmError> {
        let path = self.path_for(name);

        let (file, is_new) = match mode {
            ShmMode::Create => {
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create_new(true)
                    .open(&path)
                    .map_err(|source| {
                        error::report(
                            ErrorDomain::Shm,
                            ErrorCode::ShmOpenFailed,
                            "shm_manager",
                            format!("create failed for {name}: {source}"),
                        );
                        ShmError::OpenFailed {
                            name: name.to_string(),
                            source,
                        }
                    })?;
                (file, true)
            }
            ShmMode::Open => {
                let file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .open(&path)
                    .map_err(|source| {
                        error::report(
                            ErrorDomain::Shm,
                            ErrorCode::ShmOpenFailed,
                            "shm_manager",
                            format!("open failed for {name}: {source}"),
                        );
                        ShmError::OpenFailed {
                            name: name.to_string(),
                            source,
                        }
                    })?;
                (file, false)
            }
            ShmMode::OpenOrCreate => {
                match OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create_new(true)
                    .open(&path)
                {
                    Ok(file) => (file, true),
                    Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                        let file = OpenOptions::new()
                            .read(true)
                            .write(true)
                            .open(&path)
                            .map_err(|source| {
                                error::report(
                                    ErrorDomain::Shm,
                                    ErrorCode::ShmOpenFailed,
                                    "shm_manager",
                                    format!("open failed for {name}: {source}"),
                                );
                                ShmError::OpenFailed {
                                    name: name.to_string(),
                                    source,
                                }
                            })?;
                        (file, false)
                    }
                    Err(source) => {
                        error::report(
                            ErrorDomain::Shm,
                            ErrorCode::ShmOpenFailed,
                            "shm_manager",
                            format!("create failed for {name}: {source}"),
                        );
                        return Err(ShmError::OpenFailed {
                            name: name.to_string(),
                            source,
                        });
                    }
                }
            }
        };

        if is_new {
            if let Err(source) = file.set_len(size as u64) {
                error::report(
                    ErrorDomain::Shm,
                    ErrorCode::ShmResizeFailed,
                    "shm_manager",
                    format!("set_len failed for {name}: {source}"),
                );
                let _ = std::fs::remove_file(&path);
                return Err(ShmError::ResizeFailed {
                    name: name.to_string(),
                    source,
                });
            }
        } else {
            let metadata = file.metadata().map_err(|source| {
                error::report(
                    ErrorDomain::Shm,
                    ErrorCode::ShmFstatFailed,
                    "shm_manager",
                    format!("metadata query failed for {name}: {source}"),
                );
                ShmError::OpenFailed {
                    name: name.to_string(),
                    source,
                }
            })?;
            if metadata.len() != size as u64 {
                error::report(
                    ErrorDomain::Shm,
                    ErrorCode::ShmResizeFailed,
                    "shm_manager",
                    format!(
                        "size mismatch for {name}: expected {size}, got {}",
                        metadata.len()
                    ),
                );
                return Err(ShmError::SizeMismatch {
                    name: name.to_string(),
                    expected: size,
                    actual: metadata.len(),
                });
            }
        }

        // SAFETY: the file is not truncated or remapped while this handle
        // is alive; peers only mutate through the in-layout protocols.
        let mmap = unsafe {
            MmapMut::map_mut(&file).map_err(|source| {
                error::report(
                    ErrorDomain::Shm,
                    ErrorCode::ShmMmapFailed,
                    "shm_manager",
                    format!("mmap failed for {name}: {source}"),
                );
                if is_new {
                    let _ = std::fs::remove_file(&path);
                }
                ShmError::MmapFailed {
                    name: name.to_string(),
                    source,
                }
            })?
        };

        info!(name, size, created = is_new, "shm segment mapped");
        Ok((mmap, is_new))
    }

    fn open_queue_layout<T>(&self, name: &str, mode: ShmMode) -> Result<Shm<T>, ShmError> {
        let size = std::mem::size_of::<T>();
        let (mmap, is_new) = self.open_region(name, size, mode)?;
        let mut shm: Shm<T> = Shm::new(mmap);
        // Every queue layout begins with the generic header.
        if is_new {
            let header = unsafe { &mut *(shm.get_mut() as *mut T as *mut ShmHeader) };
            header.init(now_ns());
        } else {
            let header = unsafe { &*(&*shm as *const T as *const ShmHeader) };
            if !header.is_valid() {
                error::report(
                    ErrorDomain::Shm,
                    ErrorCode::ShmHeaderInvalid,
                    "shm_manager",
                    format!("header validation failed for {name}"),
                );
                return Err(ShmError::HeaderInvalid {
                    name: name.to_string(),
                });
            }
        }
        Ok(shm)
    }

    /// Open or create the upstream (strategy → account) segment.
    pub fn open_upstream(
        &self,
        name: &str,
        mode: ShmMode,
    ) -> Result<Shm<UpstreamShmLayout>, ShmError> {
        self.open_queue_layout(name, mode)
    }

    /// Open or create the downstream (account → gateway) segment.
    pub fn open_downstream(
        &self,
        name: &str,
        mode: ShmMode,
    ) -> Result<Shm<DownstreamShmLayout>, ShmError> {
        self.open_queue_layout(name, mode)
    }

    /// Open or create the trades (gateway → account) segment.
    pub fn open_trades(
        &self,
        name: &str,
        mode: ShmMode,
    ) -> Result<Shm<TradesShmLayout>, ShmError> {
        self.open_queue_layout(name, mode)
    }

    /// Open or create the position-table segment.
    ///
    /// On creation the header is written with `init_state == 0`; the
    /// position manager finishes initialization and flips it to 1.
    pub fn open_positions(
        &self,
        name: &str,
        mode: ShmMode,
    ) -> Result<Shm<PositionsShmLayout>, ShmError> {
        let size = std::mem::size_of::<PositionsShmLayout>();
        let (mmap, is_new) = self.open_region(name, size, mode)?;
        let mut shm: Shm<PositionsShmLayout> = Shm::new(mmap);
        if is_new {
            let layout = shm.get_mut();
            let now = now_ns();
            layout.header.magic = PositionsHeader::MAGIC;
            layout.header.version = PositionsHeader::VERSION;
            layout.header.header_size = std::mem::size_of::<PositionsHeader>() as u32;
            layout.header.total_size = size as u32;
            layout.header.capacity = crate::shm::layout::MAX_POSITIONS as u32;
            layout.header.create_time_ns = now;
            *layout.header.last_update_ns.get_mut() = now;
            *layout.header.next_security_id.get_mut() = 1;
            *layout.header.init_state.get_mut() = 0;
        } else {
            let header = &shm.header;
            if header.magic != PositionsHeader::MAGIC || header.version != PositionsHeader::VERSION
            {
                error::report(
                    ErrorDomain::Shm,
                    ErrorCode::ShmHeaderInvalid,
                    "shm_manager",
                    format!("positions header validation failed for {name}"),
                );
                return Err(ShmError::HeaderInvalid {
                    name: name.to_string(),
                });
            }
        }
        Ok(shm)
    }

    /// Open or create the dated order-pool segment for `trading_day`.
    pub fn open_orders(
        &self,
        base_name: &str,
        trading_day: &str,
        capacity: u32,
        mode: ShmMode,
    ) -> Result<OrdersShm, ShmError> {
        if !is_valid_trading_day(trading_day) {
            error::report(
                ErrorDomain::Shm,
                ErrorCode::InvalidParam,
                "shm_manager",
                format!("invalid trading day {trading_day:?}"),
            );
            return Err(ShmError::InvalidTradingDay {
                day: trading_day.to_string(),
            });
        }

        let name = make_orders_shm_name(base_name, trading_day);
        let size = OrdersShm::layout_size(capacity);
        let (mmap, is_new) = self.open_region(&name, size, mode)?;
        if is_new {
            Ok(OrdersShm::init_created(mmap, capacity, trading_day))
        } else {
            OrdersShm::from_existing(mmap, capacity).ok_or(ShmError::HeaderInvalid { name })
        }
    }

    /// Remove a segment from the namespace. Tooling only; running services
    /// never unlink.
    pub fn unlink(&self, name: &str) -> std::io::Result<()> {
        std::fs::remove_file(self.path_for(name))
    }
}

impl Default for ShmManager {
    fn default() -> Self {
        Self::new()
    }
}
