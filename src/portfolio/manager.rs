//! Fund and position accounting over the shared position table.
//!
//! The manager owns the in-process `security key → row index` map and is
//! the only writer of the table in the account process. All row mutation
//! happens under the per-row lock; every arithmetic step is
//! overflow-checked and a `false` return means nothing was changed.

use crate::core::error::{self, ErrorCode, ErrorDomain};
use crate::common::now_ns;
use crate::order::{DPrice, DValue, InternalSecurityId, Market, OrderId, Volume};
use crate::portfolio::position::{
    FIRST_SECURITY_POSITION_INDEX, FUND_POSITION_ID, FUND_POSITION_INDEX, FundInfo, load_fund_info,
    store_fund_info,
};
use crate::shm::{MAX_POSITIONS, PositionsHeader, PositionsShmLayout};
use std::collections::HashMap;
use std::sync::atomic::Ordering;
use tracing::warn;

/// Default opening balance for a fresh table, in cents.
pub const DEFAULT_INITIAL_FUND: DValue = 100_000_000;

const MAX_SECURITY_POSITIONS: usize = MAX_POSITIONS - FIRST_SECURITY_POSITION_INDEX;

/// Build the internal security key `"<MARKET>.<code>"`.
///
/// Returns `None` for an empty/oversized code or an unset market; the code
/// is bounded so the key always fits the 16-byte field.
pub fn build_internal_security_id(market: Market, code: &str) -> Option<InternalSecurityId> {
    if code.is_empty() || code.len() > 12 {
        return None;
    }
    let prefix = market.prefix();
    if prefix.is_empty() {
        return None;
    }
    let mut key = InternalSecurityId::new();
    key.assign(&format!("{prefix}.{code}"));
    Some(key)
}

/// Manager over one mapped position table.
pub struct PositionManager<'shm> {
    shm: &'shm PositionsShmLayout,
    security_to_row: HashMap<InternalSecurityId, usize>,
}

impl<'shm> PositionManager<'shm> {
    /// Wrap a mapped table. Call [`Self::initialize`] before use.
    pub fn new(shm: &'shm PositionsShmLayout) -> Self {
        PositionManager {
            shm,
            security_to_row: HashMap::new(),
        }
    }

    fn header_compatible(header: &PositionsHeader) -> bool {
        header.magic == PositionsHeader::MAGIC
            && header.version == PositionsHeader::VERSION
            && header.header_size == std::mem::size_of::<PositionsHeader>() as u32
            && header.total_size == std::mem::size_of::<PositionsShmLayout>() as u32
            && header.capacity == MAX_POSITIONS as u32
    }

    fn clamp_security_count(count: usize) -> usize {
        count.min(MAX_SECURITY_POSITIONS)
    }

    fn next_security_id(security_count: usize) -> u32 {
        (security_count + FIRST_SECURITY_POSITION_INDEX) as u32
    }

    /// Bring the table to a usable state.
    ///
    /// A fresh table (`init_state == 0`, zero rows) gets the FUND identity
    /// and default balances and is published with `init_state = 1`. An
    /// initialized table has its row map rebuilt. `init_state == 0` with a
    /// non-zero row count is a corrupt header and fatal.
    pub fn initialize(&mut self) -> bool {
        self.security_to_row.clear();

        let header = &self.shm.header;
        if !Self::header_compatible(header) {
            error::report(
                ErrorDomain::Portfolio,
                ErrorCode::ShmHeaderInvalid,
                "position_manager",
                "positions shm header incompatible",
            );
            return false;
        }

        if header.init_state.load(Ordering::Acquire) != 1 {
            let existing = self.shm.position_count().load(Ordering::Relaxed);
            if existing != 0 {
                error::report(
                    ErrorDomain::Portfolio,
                    ErrorCode::ShmHeaderCorrupted,
                    "position_manager",
                    "positions init_state is 0 while row count is non-zero",
                );
                return false;
            }

            {
                let fund_row = &self.shm.positions[FUND_POSITION_INDEX];
                let mut fund = fund_row.lock();
                fund.clear();
                fund.id.assign(FUND_POSITION_ID);
                fund.name.assign(FUND_POSITION_ID);
                store_fund_info(
                    &mut fund,
                    &FundInfo {
                        total_asset: DEFAULT_INITIAL_FUND,
                        available: DEFAULT_INITIAL_FUND,
                        frozen: 0,
                        market_value: 0,
                    },
                );
            }

            header
                .next_security_id
                .store(Self::next_security_id(0), Ordering::Relaxed);
            header.init_state.store(1, Ordering::Release);
            header.last_update_ns.store(now_ns(), Ordering::Relaxed);
            return true;
        }

        // Already initialized: repair the FUND identity if a crashed writer
        // lost it, then rebuild the row map.
        {
            let fund_row = &self.shm.positions[FUND_POSITION_INDEX];
            let mut fund = fund_row.lock();
            fund.id.assign(FUND_POSITION_ID);
            fund.name.assign(FUND_POSITION_ID);
        }

        let mut count = self.shm.position_count().load(Ordering::Acquire);
        let clamped = Self::clamp_security_count(count);
        if clamped != count {
            count = clamped;
            self.shm.position_count().store(count, Ordering::Relaxed);
        }

        for row_index in FIRST_SECURITY_POSITION_INDEX..=count {
            if row_index >= MAX_POSITIONS {
                break;
            }
            let id = self.shm.positions[row_index].id_unlocked();
            if id.is_empty() {
                continue;
            }
            self.security_to_row.insert(id, row_index);
        }

        header
            .next_security_id
            .store(Self::next_security_id(count), Ordering::Relaxed);
        header.last_update_ns.store(now_ns(), Ordering::Relaxed);
        true
    }

    fn touch(&self) {
        self.shm
            .header
            .last_update_ns
            .store(now_ns(), Ordering::Relaxed);
    }

    // === fund operations ===

    /// Available fund, read under the FUND row lock.
    pub fn available_fund(&self) -> DValue {
        self.shm.positions[FUND_POSITION_INDEX].lock().available
    }

    /// Snapshot of the FUND row.
    pub fn fund_info(&self) -> FundInfo {
        load_fund_info(&self.shm.positions[FUND_POSITION_INDEX].lock())
    }

    /// Overwrite the FUND snapshot. Bootstrap loaders only.
    pub fn overwrite_fund_info(&self, fund: &FundInfo) -> bool {
        let mut row = self.shm.positions[FUND_POSITION_INDEX].lock();
        store_fund_info(&mut row, fund);
        drop(row);
        self.touch();
        true
    }

    /// Move `amount` from available into frozen.
    pub fn freeze_fund(&self, amount: DValue, _order_id: OrderId) -> bool {
        let mut fund = self.shm.positions[FUND_POSITION_INDEX].lock();
        if fund.available < amount {
            return false;
        }
        let Some(new_frozen) = fund.fund_frozen().checked_add(amount) else {
            return false;
        };
        fund.available -= amount;
        fund.set_fund_frozen(new_frozen);
        drop(fund);
        self.touch();
        true
    }

    /// Move `amount` from frozen back into available.
    pub fn unfreeze_fund(&self, amount: DValue, _order_id: OrderId) -> bool {
        let mut fund = self.shm.positions[FUND_POSITION_INDEX].lock();
        if fund.fund_frozen() < amount {
            return false;
        }
        let Some(new_available) = fund.available.checked_add(amount) else {
            return false;
        };
        let new_frozen = fund.fund_frozen() - amount;
        fund.set_fund_frozen(new_frozen);
        fund.available = new_available;
        drop(fund);
        self.touch();
        true
    }

    /// Consume `amount + fee` from frozen: the traded value becomes market
    /// value, the fee leaves total asset (saturating at zero).
    pub fn deduct_fund(&self, amount: DValue, fee: DValue, _order_id: OrderId) -> bool {
        let Some(total) = amount.checked_add(fee) else {
            return false;
        };

        let mut fund = self.shm.positions[FUND_POSITION_INDEX].lock();
        if fund.fund_frozen() < total {
            return false;
        }
        let Some(new_market_value) = fund.fund_market_value().checked_add(amount) else {
            return false;
        };

        let new_frozen = fund.fund_frozen() - total;
        let new_total_asset = fund.fund_total_asset().saturating_sub(fee);
        fund.set_fund_frozen(new_frozen);
        fund.set_fund_total_asset(new_total_asset);
        fund.set_fund_market_value(new_market_value);
        drop(fund);
        self.touch();
        true
    }

    /// Grow available and total asset by `amount`.
    pub fn add_fund(&self, amount: DValue, _order_id: OrderId) -> bool {
        let mut fund = self.shm.positions[FUND_POSITION_INDEX].lock();
        let Some(new_available) = fund.available.checked_add(amount) else {
            return false;
        };
        let Some(new_total) = fund.fund_total_asset().checked_add(amount) else {
            return false;
        };
        fund.available = new_available;
        fund.set_fund_total_asset(new_total);
        drop(fund);
        self.touch();
        true
    }

    // === security operations ===

    fn row_index(&self, security_id: &InternalSecurityId) -> Option<usize> {
        self.security_to_row.get(security_id).copied()
    }

    /// Whether a row exists for `security_id`.
    pub fn has_position(&self, security_id: &InternalSecurityId) -> bool {
        self.row_index(security_id).is_some()
    }

    /// Copy of a security row's counters.
    pub fn position_data(
        &self,
        security_id: &InternalSecurityId,
    ) -> Option<crate::portfolio::position::PositionData> {
        let row_index = self.row_index(security_id)?;
        Some(*self.shm.positions[row_index].lock())
    }

    /// Sellable volume: `t0 + t1`, read under the row lock.
    pub fn sellable_volume(&self, security_id: &InternalSecurityId) -> Volume {
        let Some(row_index) = self.row_index(security_id) else {
            return 0;
        };
        let row = self.shm.positions[row_index].lock();
        row.volume_available_t0 + row.volume_available_t1
    }

    /// Freeze `volume` for a pending sell, drawing from t1 before t0.
    pub fn freeze_position(
        &self,
        security_id: &InternalSecurityId,
        volume: Volume,
        _order_id: OrderId,
    ) -> bool {
        let Some(row_index) = self.row_index(security_id) else {
            return false;
        };
        let mut row = self.shm.positions[row_index].lock();

        let sellable = row.volume_available_t0 + row.volume_available_t1;
        if sellable < volume {
            return false;
        }

        let mut remaining = volume;
        if row.volume_available_t1 >= remaining {
            row.volume_available_t1 -= remaining;
        } else {
            remaining -= row.volume_available_t1;
            row.volume_available_t1 = 0;
            if row.volume_available_t0 < remaining {
                return false;
            }
            row.volume_available_t0 -= remaining;
        }

        row.volume_sell += volume;
        row.count_order += 1;
        drop(row);
        self.touch();
        true
    }

    /// Release a sell freeze back into t0.
    pub fn unfreeze_position(
        &self,
        security_id: &InternalSecurityId,
        volume: Volume,
        _order_id: OrderId,
    ) -> bool {
        let Some(row_index) = self.row_index(security_id) else {
            return false;
        };
        let mut row = self.shm.positions[row_index].lock();
        if row.volume_sell < volume {
            return false;
        }
        row.volume_sell -= volume;
        row.volume_available_t0 += volume;
        drop(row);
        self.touch();
        true
    }

    /// Apply a sell trade: consume the frozen sell volume, falling back to
    /// t1 then t0 when the freeze did not happen first.
    pub fn deduct_position(
        &self,
        security_id: &InternalSecurityId,
        volume: Volume,
        value: DValue,
        order_id: OrderId,
    ) -> bool {
        let Some(row_index) = self.row_index(security_id) else {
            return false;
        };
        let mut row = self.shm.positions[row_index].lock();

        if row.volume_sell >= volume {
            row.volume_sell -= volume;
        } else {
            // Compatibility path for trades without a prior freeze. The
            // stated invariant is that sells are pre-frozen, so flag it.
            warn!(
                security = %security_id,
                order_id,
                volume,
                frozen = row.volume_sell,
                "sell trade exceeds frozen volume; falling back to t1/t0"
            );
            let mut remaining = volume - row.volume_sell;
            row.volume_sell = 0;

            let sellable = row.volume_available_t0 + row.volume_available_t1;
            if sellable < remaining {
                return false;
            }
            if row.volume_available_t1 >= remaining {
                row.volume_available_t1 -= remaining;
            } else {
                remaining -= row.volume_available_t1;
                row.volume_available_t1 = 0;
                if row.volume_available_t0 < remaining {
                    return false;
                }
                row.volume_available_t0 -= remaining;
            }
        }

        row.volume_sell_traded += volume;
        row.dvalue_sell_traded += value;
        drop(row);
        self.touch();
        true
    }

    /// Apply a buy trade: grow traded counters and t1.
    pub fn add_position(
        &self,
        security_id: &InternalSecurityId,
        volume: Volume,
        price: DPrice,
        _order_id: OrderId,
    ) -> bool {
        let Some(row_index) = self.row_index(security_id) else {
            return false;
        };
        let mut row = self.shm.positions[row_index].lock();

        let value = if volume == 0 || price == 0 {
            0
        } else {
            volume * price
        };
        row.volume_buy += volume;
        row.dvalue_buy += value;
        row.volume_buy_traded += volume;
        row.dvalue_buy_traded += value;
        row.volume_available_t1 += volume;
        drop(row);
        self.touch();
        true
    }

    // === queries & row creation ===

    /// Number of security rows.
    pub fn position_count(&self) -> usize {
        Self::clamp_security_count(self.shm.position_count().load(Ordering::Acquire))
    }

    /// Keys of all populated security rows.
    pub fn security_ids(&self) -> Vec<InternalSecurityId> {
        self.security_to_row.keys().copied().collect()
    }

    /// Look up the internal key for an already-known security key string.
    pub fn find_security_id(&self, key: &str) -> Option<InternalSecurityId> {
        if key.is_empty() {
            return None;
        }
        let candidate = InternalSecurityId::from_str_truncated(key);
        self.security_to_row
            .contains_key(&candidate)
            .then_some(candidate)
    }

    /// Create (or find) the row for a security. Rows are never removed and
    /// the count only grows.
    pub fn add_security(
        &mut self,
        code: &str,
        name: &str,
        market: Market,
    ) -> Option<InternalSecurityId> {
        let security_id = build_internal_security_id(market, code)?;
        if self.security_to_row.contains_key(&security_id) {
            return Some(security_id);
        }

        let mut count = self.shm.position_count().load(Ordering::Acquire);
        let clamped = Self::clamp_security_count(count);
        if clamped != count {
            count = clamped;
            self.shm.position_count().store(count, Ordering::Relaxed);
        }
        if count >= MAX_SECURITY_POSITIONS {
            error::report(
                ErrorDomain::Portfolio,
                ErrorCode::PositionUpdateFailed,
                "position_manager",
                format!("position table full; cannot add {security_id}"),
            );
            return None;
        }

        let row_index = count + FIRST_SECURITY_POSITION_INDEX;
        {
            let mut row = self.shm.positions[row_index].lock();
            row.clear();
            row.id = security_id;
            row.name.assign(name);
        }

        self.security_to_row.insert(security_id, row_index);

        let new_count = count + 1;
        self.shm.position_count().store(new_count, Ordering::Release);
        self.shm
            .header
            .next_security_id
            .store(Self::next_security_id(new_count), Ordering::Relaxed);
        self.touch();
        Some(security_id)
    }
}
