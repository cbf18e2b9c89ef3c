//! In-process mirror of live orders.
//!
//! A fixed-capacity slab indexed by internal order id, with secondary
//! indexes by broker order id and security, and a parent↔children graph for
//! split orders. Everything sits under a single spinlock; every mutator
//! that touches a split child re-aggregates its parent inside the same
//! locked section, so parent state is never observably stale.
//!
//! Failure semantics: mutators return `false` and record an error status;
//! the caller must not assume the change happened.

use crate::common::{Spinlock, now_ns};
use crate::core::error::{self, ErrorCode, ErrorDomain};
use crate::order::request::{
    InternalSecurityId, OrderId, OrderRequest, OrderStatus, OrderType, StrategyId, TimestampNs,
};
use crate::risk::RiskResult;
use crate::shm::{INVALID_ORDER_INDEX, MAX_ACTIVE_ORDERS, OrderIndex};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};

/// An order as the account process tracks it: the shared request plus
/// in-process bookkeeping.
#[derive(Debug, Clone, Copy)]
pub struct OrderEntry {
    /// The request payload, kept in sync with the pool slot.
    pub request: OrderRequest,
    /// When the entry entered the book.
    pub submit_time_ns: TimestampNs,
    /// Last mutation time.
    pub last_update_ns: TimestampNs,
    /// Originating strategy.
    pub strategy_id: StrategyId,
    /// Outcome of the risk pipeline.
    pub risk_result: RiskResult,
    /// Gateway submit attempts (informational).
    pub retry_count: u8,
    /// Whether this entry was synthesized from a split parent.
    pub is_split_child: bool,
    /// Parent order id when `is_split_child`.
    pub parent_order_id: OrderId,
    /// Backing order-pool slot.
    pub shm_order_index: OrderIndex,
}

impl OrderEntry {
    /// An empty entry.
    pub const fn empty() -> Self {
        OrderEntry {
            request: OrderRequest::new(),
            submit_time_ns: 0,
            last_update_ns: 0,
            strategy_id: 0,
            risk_result: RiskResult::Pass,
            retry_count: 0,
            is_split_child: false,
            parent_order_id: 0,
            shm_order_index: INVALID_ORDER_INDEX,
        }
    }

    /// Build an entry for a request arriving now.
    pub fn from_request(request: OrderRequest, shm_order_index: OrderIndex) -> Self {
        let now = now_ns();
        OrderEntry {
            request,
            submit_time_ns: now,
            last_update_ns: now,
            shm_order_index,
            ..Self::empty()
        }
    }

    /// Whether the order has reached a terminal status.
    pub fn is_terminal(&self) -> bool {
        self.request.order_status.is_terminal()
    }

    /// Whether the order is still live.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl Default for OrderEntry {
    fn default() -> Self {
        Self::empty()
    }
}

struct BookInner {
    orders: Vec<OrderEntry>,
    free_slots: Vec<usize>,
    id_to_index: HashMap<OrderId, usize>,
    broker_id_map: HashMap<u64, OrderId>,
    security_orders: HashMap<InternalSecurityId, Vec<OrderId>>,
    parent_to_children: HashMap<OrderId, Vec<OrderId>>,
    child_to_parent: HashMap<OrderId, OrderId>,
    error_latched_parents: HashSet<OrderId>,
    active_count: usize,
}

/// The order book. All operations lock internally; `&self` is enough.
pub struct OrderBook {
    inner: Spinlock<BookInner>,
    next_order_id: AtomicU32,
}

impl OrderBook {
    /// An empty book.
    pub fn new() -> Self {
        OrderBook {
            inner: Spinlock::new(BookInner {
                orders: Vec::new(),
                free_slots: Vec::new(),
                id_to_index: HashMap::new(),
                broker_id_map: HashMap::new(),
                security_orders: HashMap::new(),
                parent_to_children: HashMap::new(),
                child_to_parent: HashMap::new(),
                error_latched_parents: HashSet::new(),
                active_count: 0,
            }),
            next_order_id: AtomicU32::new(1),
        }
    }

    /// Admit an order. Fails on a zero id, a duplicate id, or a full slab.
    pub fn add_order(&self, entry: &OrderEntry) -> bool {
        let order_id = entry.request.internal_order_id;
        if order_id == 0 {
            error::report(
                ErrorDomain::Order,
                ErrorCode::InvalidOrderId,
                "order_book",
                "order id is zero",
            );
            return false;
        }

        let mut inner = self.inner.lock();

        if inner.id_to_index.contains_key(&order_id) {
            error::report(
                ErrorDomain::Order,
                ErrorCode::DuplicateOrder,
                "order_book",
                format!("duplicate order id {order_id}"),
            );
            return false;
        }

        let index = match inner.free_slots.pop() {
            Some(index) => index,
            None if inner.orders.len() < MAX_ACTIVE_ORDERS => {
                inner.orders.push(OrderEntry::empty());
                inner.orders.len() - 1
            }
            None => {
                error::report(
                    ErrorDomain::Order,
                    ErrorCode::OrderBookFull,
                    "order_book",
                    "order book free slots exhausted",
                );
                return false;
            }
        };

        let mut stored = *entry;
        if stored.submit_time_ns == 0 {
            stored.submit_time_ns = now_ns();
        }
        if stored.last_update_ns == 0 {
            stored.last_update_ns = stored.submit_time_ns;
        }
        if stored.request.order_type == OrderType::New
            && stored.request.volume_remain == 0
            && stored.request.volume_entrust >= stored.request.volume_traded
        {
            stored.request.volume_remain =
                stored.request.volume_entrust - stored.request.volume_traded;
        }

        let broker_id = stored.request.broker_order_id.as_u64();
        let security_id = stored.request.internal_security_id;
        let is_split_child = stored.is_split_child;
        let parent_order_id = stored.parent_order_id;

        inner.orders[index] = stored;
        inner.id_to_index.insert(order_id, index);

        if broker_id != 0 {
            inner.broker_id_map.insert(broker_id, order_id);
        }
        if !security_id.is_empty() {
            inner
                .security_orders
                .entry(security_id)
                .or_default()
                .push(order_id);
        }
        if is_split_child && parent_order_id != 0 {
            inner
                .parent_to_children
                .entry(parent_order_id)
                .or_default()
                .push(order_id);
            inner.child_to_parent.insert(order_id, parent_order_id);
            inner.refresh_parent_from_children(parent_order_id);
        }

        inner.active_count += 1;
        true
    }

    /// Copy of an order, if present.
    pub fn get_order(&self, order_id: OrderId) -> Option<OrderEntry> {
        let inner = self.inner.lock();
        inner
            .id_to_index
            .get(&order_id)
            .map(|&index| inner.orders[index])
    }

    /// Copy of the order a broker id maps to, if any.
    pub fn find_by_broker_id(&self, broker_order_id: u64) -> Option<OrderEntry> {
        let inner = self.inner.lock();
        let order_id = inner.broker_id_map.get(&broker_order_id)?;
        inner
            .id_to_index
            .get(order_id)
            .map(|&index| inner.orders[index])
    }

    /// Move an order to a new business status.
    pub fn update_status(&self, order_id: OrderId, new_status: OrderStatus) -> bool {
        let mut inner = self.inner.lock();

        let Some(&index) = inner.id_to_index.get(&order_id) else {
            error::report(
                ErrorDomain::Order,
                ErrorCode::OrderNotFound,
                "order_book",
                format!("update_status: order {order_id} not found"),
            );
            return false;
        };

        let entry = &mut inner.orders[index];
        entry.request.order_status = new_status;
        entry.last_update_ns = now_ns();

        if new_status == OrderStatus::TraderError
            && inner.parent_to_children.contains_key(&order_id)
        {
            inner.error_latched_parents.insert(order_id);
        }

        if let Some(&parent_id) = inner.child_to_parent.get(&order_id) {
            inner.refresh_parent_from_children(parent_id);
        }
        true
    }

    /// Record the risk pipeline outcome on an order.
    pub fn set_risk_result(&self, order_id: OrderId, result: RiskResult) -> bool {
        let mut inner = self.inner.lock();
        let Some(&index) = inner.id_to_index.get(&order_id) else {
            return false;
        };
        inner.orders[index].risk_result = result;
        true
    }

    /// Apply a fill to an order: saturating aggregates, remaining-volume
    /// floor at zero, auto-`Finished` when nothing remains.
    pub fn update_trade(
        &self,
        order_id: OrderId,
        volume: u64,
        price: u64,
        value: u64,
        fee: u64,
    ) -> bool {
        let mut inner = self.inner.lock();

        let Some(&index) = inner.id_to_index.get(&order_id) else {
            error::report(
                ErrorDomain::Order,
                ErrorCode::OrderNotFound,
                "order_book",
                format!("update_trade: order {order_id} not found"),
            );
            return false;
        };

        {
            let request = &mut inner.orders[index].request;
            request.volume_traded = request.volume_traded.saturating_add(volume);
            if request.volume_entrust > 0 && request.volume_traded > request.volume_entrust {
                request.volume_traded = request.volume_entrust;
            }
            request.volume_remain = request.volume_remain.saturating_sub(volume);
            request.dvalue_traded = request.dvalue_traded.saturating_add(value);
            request.dfee_executed = request.dfee_executed.saturating_add(fee);

            if request.volume_traded > 0 {
                request.dprice_traded = if request.dvalue_traded > 0 {
                    request.dvalue_traded / request.volume_traded
                } else {
                    price
                };
            }

            if request.volume_remain == 0 && !request.order_status.is_terminal() {
                request.order_status = OrderStatus::Finished;
            }
        }
        inner.orders[index].last_update_ns = now_ns();

        if let Some(&parent_id) = inner.child_to_parent.get(&order_id) {
            inner.refresh_parent_from_children(parent_id);
        }
        true
    }

    /// Free an order's slab slot and drop it from the by-id, broker-id, and
    /// security indexes. Parent↔child links persist: `get_children` keeps
    /// returning archived child ids, and consumers filter as needed.
    pub fn archive_order(&self, order_id: OrderId) -> bool {
        let mut inner = self.inner.lock();

        let Some(&index) = inner.id_to_index.get(&order_id) else {
            error::report(
                ErrorDomain::Order,
                ErrorCode::OrderNotFound,
                "order_book",
                format!("archive_order: order {order_id} not found"),
            );
            return false;
        };

        let broker_id = inner.orders[index].request.broker_order_id.as_u64();
        let security_id = inner.orders[index].request.internal_security_id;

        if broker_id != 0 && inner.broker_id_map.get(&broker_id) == Some(&order_id) {
            inner.broker_id_map.remove(&broker_id);
        }

        if !security_id.is_empty() {
            if let Some(orders) = inner.security_orders.get_mut(&security_id) {
                orders.retain(|&id| id != order_id);
                if orders.is_empty() {
                    inner.security_orders.remove(&security_id);
                }
            }
        }

        inner.id_to_index.remove(&order_id);
        inner.orders[index] = OrderEntry::empty();
        inner.free_slots.push(index);
        inner.active_count = inner.active_count.saturating_sub(1);
        true
    }

    /// Ids of all live orders.
    pub fn get_active_order_ids(&self) -> Vec<OrderId> {
        self.inner.lock().id_to_index.keys().copied().collect()
    }

    /// Ids of live orders for a security.
    pub fn get_orders_by_security(&self, security_id: &InternalSecurityId) -> Vec<OrderId> {
        self.inner
            .lock()
            .security_orders
            .get(security_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Child ids of a split parent, archived children included.
    pub fn get_children(&self, parent_id: OrderId) -> Vec<OrderId> {
        self.inner
            .lock()
            .parent_to_children
            .get(&parent_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Parent id of a split child, if it is one.
    pub fn try_get_parent(&self, child_id: OrderId) -> Option<OrderId> {
        self.inner.lock().child_to_parent.get(&child_id).copied()
    }

    /// Number of live orders.
    pub fn active_count(&self) -> usize {
        self.inner.lock().active_count
    }

    /// Generate a fresh internal order id.
    pub fn next_order_id(&self) -> OrderId {
        self.next_order_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Drop everything. Initialization/tests only.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.orders.clear();
        inner.free_slots.clear();
        inner.id_to_index.clear();
        inner.broker_id_map.clear();
        inner.security_orders.clear();
        inner.parent_to_children.clear();
        inner.child_to_parent.clear();
        inner.error_latched_parents.clear();
        inner.active_count = 0;
    }
}

impl Default for OrderBook {
    fn default() -> Self {
        Self::new()
    }
}

impl BookInner {
    /// Recompute a split parent's aggregates and status from its `New`
    /// children. Runs inside the book lock.
    fn refresh_parent_from_children(&mut self, parent_id: OrderId) {
        let Some(&parent_index) = self.id_to_index.get(&parent_id) else {
            error::report(
                ErrorDomain::Order,
                ErrorCode::OrderInvariantBroken,
                "order_book",
                format!("parent {parent_id} missing while refreshing split state"),
            );
            return;
        };
        let Some(children) = self.parent_to_children.get(&parent_id) else {
            return;
        };

        let mut total_volume_traded: u64 = 0;
        let mut total_volume_remain: u64 = 0;
        let mut total_dvalue_traded: u64 = 0;
        let mut total_fee: u64 = 0;
        let mut latest_update_ns = self.orders[parent_index].last_update_ns;

        let mut all_terminal = true;
        let mut best_progress_status = OrderStatus::NotSet;
        let mut best_progress_rank: i32 = -1;
        let mut new_child_count = 0usize;

        for &child_id in children {
            let Some(&child_index) = self.id_to_index.get(&child_id) else {
                continue;
            };
            let child = &self.orders[child_index];
            if child.request.order_type != OrderType::New {
                continue;
            }

            new_child_count += 1;
            total_volume_traded = total_volume_traded.saturating_add(child.request.volume_traded);
            total_volume_remain = total_volume_remain.saturating_add(child.request.volume_remain);
            total_dvalue_traded = total_dvalue_traded.saturating_add(child.request.dvalue_traded);
            total_fee = total_fee.saturating_add(child.request.dfee_executed);
            latest_update_ns = latest_update_ns.max(child.last_update_ns);

            let child_status = child.request.order_status;
            if !child_status.is_terminal() {
                all_terminal = false;
            }
            let rank = i32::from(child_status.progress_rank());
            if rank > best_progress_rank {
                best_progress_rank = rank;
                best_progress_status = child_status;
            }
        }

        if new_child_count == 0 {
            return;
        }

        let error_latched = self.error_latched_parents.contains(&parent_id);
        let parent = &mut self.orders[parent_index];
        parent.request.volume_traded = total_volume_traded;
        parent.request.volume_remain = total_volume_remain;
        parent.request.dvalue_traded = total_dvalue_traded;
        parent.request.dfee_executed = total_fee;

        if total_volume_traded > 0 {
            parent.request.dprice_traded = total_dvalue_traded / total_volume_traded;
        }
        if parent.request.volume_entrust > 0
            && parent.request.volume_remain > parent.request.volume_entrust
        {
            parent.request.volume_remain = parent.request.volume_entrust;
        }
        parent.last_update_ns = latest_update_ns;

        // Latched error beats everything, then all-terminal, then the
        // best-progress child status.
        if error_latched {
            parent.request.order_status = OrderStatus::TraderError;
        } else if all_terminal {
            parent.request.order_status = OrderStatus::Finished;
        } else if best_progress_status != OrderStatus::NotSet {
            parent.request.order_status = best_progress_status;
        }
    }
}
