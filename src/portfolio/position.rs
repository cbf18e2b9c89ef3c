//! Shared position rows.
//!
//! The position table is a fixed array of 136-byte rows in shared memory.
//! Row 0 is the FUND row; rows 1..=count are securities. Every row carries
//! its own one-byte spinlock, and all mutation goes through the row guard.
//!
//! The FUND row reuses the security layout and reinterprets four fields as
//! fund quantities. Monitors read through this exact mapping, so it is
//! fixed: `volume_available_t0 ↔ total_asset`, `available ↔ available`,
//! `volume_available_t1 ↔ frozen`, `volume_buy ↔ market_value`.

use crate::common::FixedString;
use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU8, Ordering};

/// Row index of the FUND row.
pub const FUND_POSITION_INDEX: usize = 0;
/// Row index of the first security row.
pub const FIRST_SECURITY_POSITION_INDEX: usize = 1;
/// Identity of the FUND row.
pub const FUND_POSITION_ID: &str = "FUND";

/// Counters of one position row. Plain data; only ever touched through a
/// held [`PositionGuard`].
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PositionData {
    /// Available fund in cents (FUND row only).
    pub available: u64,
    /// Sellable volume carried from before today (FUND: total asset).
    pub volume_available_t0: u64,
    /// Volume bought today, sellable tomorrow (FUND: frozen fund).
    pub volume_available_t1: u64,
    /// Cumulative buy volume (FUND: market value).
    pub volume_buy: u64,
    /// Cumulative buy value.
    pub dvalue_buy: u64,
    /// Buy volume actually traded.
    pub volume_buy_traded: u64,
    /// Buy value actually traded.
    pub dvalue_buy_traded: u64,
    /// Volume frozen for pending sells.
    pub volume_sell: u64,
    /// Value of pending sells.
    pub dvalue_sell: u64,
    /// Sell volume actually traded.
    pub volume_sell_traded: u64,
    /// Sell value actually traded.
    pub dvalue_sell_traded: u64,
    /// Orders touching this row.
    pub count_order: u64,
    /// Row key: `"FUND"` or an internal security key like `"SZ.000001"`.
    pub id: FixedString<16>,
    /// Display name.
    pub name: FixedString<16>,
}

impl PositionData {
    /// Zero all counters and clear identity.
    pub fn clear(&mut self) {
        *self = unsafe { std::mem::zeroed() };
    }

    /// FUND view: total asset.
    pub fn fund_total_asset(&self) -> u64 {
        self.volume_available_t0
    }

    /// FUND view: set total asset.
    pub fn set_fund_total_asset(&mut self, value: u64) {
        self.volume_available_t0 = value;
    }

    /// FUND view: frozen fund.
    pub fn fund_frozen(&self) -> u64 {
        self.volume_available_t1
    }

    /// FUND view: set frozen fund.
    pub fn set_fund_frozen(&mut self, value: u64) {
        self.volume_available_t1 = value;
    }

    /// FUND view: market value of held positions.
    pub fn fund_market_value(&self) -> u64 {
        self.volume_buy
    }

    /// FUND view: set market value.
    pub fn set_fund_market_value(&mut self, value: u64) {
        self.volume_buy = value;
    }
}

/// Snapshot of the FUND row, in cents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FundInfo {
    /// Total asset.
    pub total_asset: u64,
    /// Available fund.
    pub available: u64,
    /// Frozen fund.
    pub frozen: u64,
    /// Market value of held positions.
    pub market_value: u64,
}

/// Load the FUND snapshot from locked row data.
pub fn load_fund_info(data: &PositionData) -> FundInfo {
    FundInfo {
        total_asset: data.fund_total_asset(),
        available: data.available,
        frozen: data.fund_frozen(),
        market_value: data.fund_market_value(),
    }
}

/// Store a FUND snapshot into locked row data.
pub fn store_fund_info(data: &mut PositionData, fund: &FundInfo) {
    data.set_fund_total_asset(fund.total_asset);
    data.available = fund.available;
    data.set_fund_frozen(fund.frozen);
    data.set_fund_market_value(fund.market_value);
}

/// One row of the shared position table: a one-byte row lock plus the
/// counter payload. 136 bytes, layout fixed for monitors.
#[repr(C)]
pub struct Position {
    locked: AtomicU8,
    _pad: [u8; 7],
    data: UnsafeCell<PositionData>,
}

// SAFETY: `data` is only accessed while `locked` is held.
unsafe impl Send for Position {}
unsafe impl Sync for Position {}

impl Position {
    /// Acquire the row lock.
    pub fn lock(&self) -> PositionGuard<'_> {
        while self.locked.swap(1, Ordering::Acquire) != 0 {
            std::hint::spin_loop();
        }
        PositionGuard { row: self }
    }

    /// Row key without taking the lock. Identity is written once when the
    /// row is created and never changes afterwards.
    pub fn id_unlocked(&self) -> FixedString<16> {
        // SAFETY: id is write-once-before-publish; concurrent counter
        // mutation does not touch it.
        unsafe { (*self.data.get()).id }
    }
}

/// RAII row-lock guard dereferencing to the row payload.
pub struct PositionGuard<'a> {
    row: &'a Position,
}

impl Deref for PositionGuard<'_> {
    type Target = PositionData;

    fn deref(&self) -> &PositionData {
        // SAFETY: the guard holds the row lock.
        unsafe { &*self.row.data.get() }
    }
}

impl DerefMut for PositionGuard<'_> {
    fn deref_mut(&mut self) -> &mut PositionData {
        // SAFETY: the guard holds the row lock exclusively.
        unsafe { &mut *self.row.data.get() }
    }
}

impl Drop for PositionGuard<'_> {
    fn drop(&mut self) {
        self.row.locked.store(0, Ordering::Release);
    }
}

// Row layout: lock byte + padding + 12 counters + two 16-byte strings.
const _: () = assert!(std::mem::size_of::<PositionData>() == 128);
const _: () = assert!(std::mem::size_of::<Position>() == 136);
const _: () = assert!(std::mem::offset_of!(Position, data) == 8);
