//! The shared order pool: an append-only slot array with per-slot seqlocks.
//!
//! Each trading day gets its own dated segment (`<base>_YYYYMMDD`). Slots
//! are allocated by a CAS on `next_index` and never reused within the day;
//! the index queues carry slot indices, never full requests. Writers
//! bracket slot mutations with an odd/even sequence number; readers
//! (including external monitors) copy optimistically and retry on a
//! sequence mismatch.
//!
//! Concurrent writes to the *same* slot by different subsystems are not
//! permitted by the protocol: whichever subsystem owns the current stage is
//! the slot's sole writer.

use crate::common::now_ns;
use crate::core::error::{self, ErrorCode, ErrorDomain};
use crate::order::{OrderRequest, TimestampNs};
use crate::shm::layout::{INVALID_ORDER_INDEX, OrderIndex};
use memmap2::MmapMut;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering, fence};
use thiserror::Error;
use tracing::warn;

/// Pipeline position of an order-pool slot. Distinct from the business
/// status inside the request payload.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStage {
    /// Never written.
    Empty = 0,
    /// Allocated, not yet published.
    Reserved = 1,
    /// Pushed onto the upstream queue by a strategy.
    UpstreamQueued = 2,
    /// Popped from the upstream queue by the account loop.
    UpstreamDequeued = 3,
    /// Rejected by the risk pipeline.
    RiskRejected = 4,
    /// Pushed onto the downstream queue.
    DownstreamQueued = 5,
    /// Popped from the downstream queue by the gateway.
    DownstreamDequeued = 6,
    /// Reached a terminal business status.
    Terminal = 7,
    /// A queue push failed; the slot went nowhere.
    QueuePushFailed = 8,
}

impl SlotStage {
    /// Decode from a raw byte, mapping unrecognized values to `Empty`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => SlotStage::Reserved,
            2 => SlotStage::UpstreamQueued,
            3 => SlotStage::UpstreamDequeued,
            4 => SlotStage::RiskRejected,
            5 => SlotStage::DownstreamQueued,
            6 => SlotStage::DownstreamDequeued,
            7 => SlotStage::Terminal,
            8 => SlotStage::QueuePushFailed,
            _ => SlotStage::Empty,
        }
    }
}

/// Which subsystem created a slot.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotSource {
    /// Not recorded.
    Unknown = 0,
    /// Submitted by a strategy process.
    Strategy = 1,
    /// Synthesized inside the account service (split children, cancels).
    AccountInternal = 2,
}

impl SlotSource {
    /// Decode from a raw byte, mapping unrecognized values to `Unknown`.
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => SlotSource::Strategy,
            2 => SlotSource::AccountInternal,
            _ => SlotSource::Unknown,
        }
    }
}

/// Order-pool segment header (`"ACSO"`). 128 bytes.
#[repr(C, align(64))]
pub struct OrdersHeader {
    /// Magic, [`OrdersHeader::MAGIC`].
    pub magic: u32,
    /// Layout version, [`OrdersHeader::VERSION`].
    pub version: u32,
    /// `size_of::<OrdersHeader>()`.
    pub header_size: u32,
    /// Header plus slot array, in bytes.
    pub total_size: u32,
    /// Slot capacity for the day.
    pub capacity: u32,
    /// 0 = initialization incomplete, 1 = readable.
    pub init_state: u32,
    /// Creation time, wall-clock nanoseconds.
    pub create_time_ns: u64,
    /// Last slot mutation time.
    pub last_update_ns: AtomicU64,
    /// Published slot upper bound; only ever grows.
    pub next_index: AtomicU32,
    _pad0: u32,
    /// Allocation attempts rejected because the pool was full.
    pub full_reject_count: AtomicU64,
    /// Trading day this pool belongs to, `YYYYMMDD` + NUL.
    pub trading_day: [u8; 9],
    _reserved0: [u8; 7],
    _reserved: [u64; 3],
}

impl OrdersHeader {
    /// `"ACSO"`.
    pub const MAGIC: u32 = 0x4143_534F;
    /// Current layout version.
    pub const VERSION: u32 = 2;
}

/// One pool slot: seqlock word, bookkeeping, embedded request.
/// 64-byte aligned; the request starts at offset 64.
#[repr(C, align(64))]
pub struct OrderSlot {
    seq: AtomicU64,
    last_update_ns: UnsafeCell<TimestampNs>,
    stage: UnsafeCell<u8>,
    source: UnsafeCell<u8>,
    _reserved: [u8; 6],
    request: UnsafeCell<OrderRequest>,
}

// SAFETY: slot payload access follows the seqlock protocol; readers validate
// the sequence word around every copy and writers are externally serialized
// per slot.
unsafe impl Send for OrderSlot {}
unsafe impl Sync for OrderSlot {}

/// Coherent copy of one slot at a single writer moment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotSnapshot {
    /// The request payload.
    pub request: OrderRequest,
    /// Pipeline stage at snapshot time.
    pub stage: SlotStage,
    /// Slot origin.
    pub source: SlotSource,
    /// Last mutation time.
    pub last_update_ns: TimestampNs,
}

/// Why a slot read did not produce a snapshot.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SlotReadError {
    /// The writer kept the slot busy for all 32 attempts; try again later.
    #[error("slot read contended; retry")]
    Retry,
    /// The index is outside the published range.
    #[error("slot index not published")]
    NotFound,
}

/// Number of optimistic read attempts before surfacing `Retry`.
const SLOT_READ_ATTEMPTS: u32 = 32;

/// Check that a trading day is exactly eight ASCII digits.
pub fn is_valid_trading_day(trading_day: &str) -> bool {
    trading_day.len() == 8 && trading_day.bytes().all(|b| b.is_ascii_digit())
}

/// Build the dated segment name `<base>_<YYYYMMDD>`.
pub fn make_orders_shm_name(base_name: &str, trading_day: &str) -> String {
    format!("{base_name}_{trading_day}")
}

/// Recover the trading day from a dated segment name.
pub fn extract_trading_day_from_name(shm_name: &str) -> Option<&str> {
    let suffix = shm_name.rsplit('_').next()?;
    is_valid_trading_day(suffix).then_some(suffix)
}

/// Handle to a mapped order-pool segment.
///
/// Owns the mapping; all slot operations take `&self` and synchronize
/// through the seqlock and the header atomics.
pub struct OrdersShm {
    mmap: MmapMut,
    capacity: u32,
}

impl OrdersShm {
    /// Size in bytes of a pool with `capacity` slots.
    pub fn layout_size(capacity: u32) -> usize {
        std::mem::size_of::<OrdersHeader>()
            + capacity as usize * std::mem::size_of::<OrderSlot>()
    }

    /// Wrap a freshly created (zeroed) mapping and initialize its header.
    pub(crate) fn init_created(mut mmap: MmapMut, capacity: u32, trading_day: &str) -> Self {
        let now = now_ns();
        {
            // SAFETY: the mapping is exclusive until this handle is shared.
            let header = unsafe { &mut *(mmap.as_mut_ptr() as *mut OrdersHeader) };
            header.magic = OrdersHeader::MAGIC;
            header.version = OrdersHeader::VERSION;
            header.header_size = std::mem::size_of::<OrdersHeader>() as u32;
            header.total_size = Self::layout_size(capacity) as u32;
            header.capacity = capacity;
            header.create_time_ns = now;
            *header.last_update_ns.get_mut() = now;
            *header.next_index.get_mut() = 0;
            *header.full_reject_count.get_mut() = 0;
            header.trading_day = [0; 9];
            header.trading_day[..trading_day.len().min(8)]
                .copy_from_slice(&trading_day.as_bytes()[..trading_day.len().min(8)]);
            header.init_state = 1;
        }
        OrdersShm { mmap, capacity }
    }

    /// Wrap an existing mapping after validating its header.
    pub(crate) fn from_existing(mmap: MmapMut, expected_capacity: u32) -> Option<Self> {
        let header = unsafe { &*(mmap.as_ptr() as *const OrdersHeader) };
        if header.magic != OrdersHeader::MAGIC || header.version != OrdersHeader::VERSION {
            error::report(
                ErrorDomain::Shm,
                ErrorCode::ShmHeaderInvalid,
                "order_pool",
                format!(
                    "orders header magic/version mismatch: {:#010x}/{}",
                    header.magic, header.version
                ),
            );
            return None;
        }
        if header.header_size != std::mem::size_of::<OrdersHeader>() as u32
            || header.capacity != expected_capacity
            || header.total_size as usize != Self::layout_size(header.capacity)
            || header.total_size as usize != mmap.len()
            || header.init_state != 1
        {
            error::report(
                ErrorDomain::Shm,
                ErrorCode::ShmHeaderCorrupted,
                "order_pool",
                "orders header geometry inconsistent with mapping",
            );
            return None;
        }
        let capacity = header.capacity;
        Some(OrdersShm { mmap, capacity })
    }

    /// Segment header.
    pub fn header(&self) -> &OrdersHeader {
        // SAFETY: the mapping is at least layout_size(capacity) bytes and
        // page-aligned.
        unsafe { &*(self.mmap.as_ptr() as *const OrdersHeader) }
    }

    fn slots(&self) -> &[OrderSlot] {
        // SAFETY: the mapping holds exactly `capacity` slots after the
        // 128-byte header.
        unsafe {
            std::slice::from_raw_parts(
                self.mmap
                    .as_ptr()
                    .add(std::mem::size_of::<OrdersHeader>()) as *const OrderSlot,
                self.capacity as usize,
            )
        }
    }

    /// Slot capacity for the day.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Trading day this pool belongs to.
    pub fn trading_day(&self) -> &str {
        let day = &self.header().trading_day;
        let len = day.iter().position(|&b| b == 0).unwrap_or(day.len());
        std::str::from_utf8(&day[..len]).unwrap_or("")
    }

    /// Whether `index` refers to a published slot.
    pub fn index_exists(&self, index: OrderIndex) -> bool {
        if index == INVALID_ORDER_INDEX {
            return false;
        }
        let upper = self.header().next_index.load(Ordering::Acquire);
        index < upper && index < self.capacity
    }

    /// Allocate the next slot index. Indices are never reused; on a full
    /// pool the rejection counter is bumped and `None` is returned.
    pub fn try_allocate(&self) -> Option<OrderIndex> {
        let header = self.header();
        let mut current = header.next_index.load(Ordering::Acquire);
        loop {
            if current >= self.capacity {
                header.full_reject_count.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            let next = current + 1;
            match header.next_index.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    let warn80 = (u64::from(self.capacity) * 80 / 100) as u32;
                    let warn95 = (u64::from(self.capacity) * 95 / 100) as u32;
                    if next == warn80 {
                        warn!(capacity = self.capacity, "orders pool usage reached 80%");
                    } else if next == warn95 {
                        warn!(capacity = self.capacity, "orders pool usage reached 95%");
                    }
                    return Some(current);
                }
                Err(observed) => current = observed,
            }
        }
    }

    /// Run `mutator` on a slot under the seqlock write protocol.
    fn mutate_slot(&self, index: OrderIndex, mutator: impl FnOnce(&OrderSlot)) -> bool {
        if !self.index_exists(index) {
            return false;
        }
        let slot = &self.slots()[index as usize];

        let mut seq = slot.seq.load(Ordering::Relaxed);
        if seq & 1 != 0 {
            // The writer is the slot's sole owner; an odd value can only be
            // a remnant of an interrupted write. Step past it.
            seq += 1;
        }
        slot.seq.store(seq + 1, Ordering::Relaxed);
        fence(Ordering::Release);

        mutator(slot);

        slot.seq.store(seq + 2, Ordering::Release);
        self.header()
            .last_update_ns
            .store(now_ns(), Ordering::Relaxed);
        true
    }

    /// Overwrite a slot: request, stage, source, timestamp.
    pub fn write_order(
        &self,
        index: OrderIndex,
        request: &OrderRequest,
        stage: SlotStage,
        source: SlotSource,
        update_ns: TimestampNs,
    ) -> bool {
        self.mutate_slot(index, |slot| {
            // SAFETY: inside the seqlock write bracket.
            unsafe {
                *slot.request.get() = *request;
                *slot.stage.get() = stage as u8;
                *slot.source.get() = source as u8;
                *slot.last_update_ns.get() = update_ns;
            }
        })
    }

    /// Refresh a slot's request payload, leaving stage and source alone.
    pub fn sync_order(
        &self,
        index: OrderIndex,
        request: &OrderRequest,
        update_ns: TimestampNs,
    ) -> bool {
        self.mutate_slot(index, |slot| {
            // SAFETY: inside the seqlock write bracket.
            unsafe {
                *slot.request.get() = *request;
                *slot.last_update_ns.get() = update_ns;
            }
        })
    }

    /// Advance a slot's pipeline stage.
    pub fn update_stage(
        &self,
        index: OrderIndex,
        stage: SlotStage,
        update_ns: TimestampNs,
    ) -> bool {
        self.mutate_slot(index, |slot| {
            // SAFETY: inside the seqlock write bracket.
            unsafe {
                *slot.stage.get() = stage as u8;
                *slot.last_update_ns.get() = update_ns;
            }
        })
    }

    /// Allocate a slot and write `request` into it.
    pub fn append(
        &self,
        request: &OrderRequest,
        stage: SlotStage,
        source: SlotSource,
        update_ns: TimestampNs,
    ) -> Option<OrderIndex> {
        let index = self.try_allocate()?;
        self.write_order(index, request, stage, source, update_ns)
            .then_some(index)
    }

    /// Optimistically copy a slot. Retries up to 32 times before yielding
    /// [`SlotReadError::Retry`]; a reader never observes a torn request.
    pub fn read_snapshot(&self, index: OrderIndex) -> Result<SlotSnapshot, SlotReadError> {
        if !self.index_exists(index) {
            return Err(SlotReadError::NotFound);
        }
        let slot = &self.slots()[index as usize];

        for _ in 0..SLOT_READ_ATTEMPTS {
            let seq0 = slot.seq.load(Ordering::Acquire);
            if seq0 & 1 != 0 {
                continue;
            }

            let mut request = MaybeUninit::<OrderRequest>::uninit();
            // SAFETY: a racing writer may be mutating these bytes; the copy
            // targets a MaybeUninit buffer and is only assumed initialized
            // after the sequence word proves the copy was unbroken.
            let (stage_raw, source_raw, last_update) = unsafe {
                std::ptr::copy_nonoverlapping(
                    slot.request.get() as *const u8,
                    request.as_mut_ptr() as *mut u8,
                    std::mem::size_of::<OrderRequest>(),
                );
                (
                    std::ptr::read_volatile(slot.stage.get()),
                    std::ptr::read_volatile(slot.source.get()),
                    std::ptr::read_volatile(slot.last_update_ns.get()),
                )
            };

            fence(Ordering::Acquire);
            let seq1 = slot.seq.load(Ordering::Acquire);
            if seq0 == seq1 && seq1 & 1 == 0 {
                return Ok(SlotSnapshot {
                    // SAFETY: seq stable and even across the copy, so the
                    // bytes are a coherent writer-published request.
                    request: unsafe { request.assume_init() },
                    stage: SlotStage::from_u8(stage_raw),
                    source: SlotSource::from_u8(source_raw),
                    last_update_ns: last_update,
                });
            }
        }

        Err(SlotReadError::Retry)
    }
}

// Layout contract.
const _: () = assert!(std::mem::size_of::<OrdersHeader>() == 128);
const _: () = assert!(std::mem::align_of::<OrdersHeader>() == 64);
const _: () = assert!(std::mem::size_of::<OrderSlot>() == 256);
const _: () = assert!(std::mem::align_of::<OrderSlot>() == 64);
const _: () = assert!(std::mem::size_of::<OrderSlot>() % 64 == 0);
const _: () = assert!(std::mem::offset_of!(OrderSlot, request) == 64);
