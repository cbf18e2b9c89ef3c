//! Order routing: risk-passed orders onto the downstream queue.
//!
//! The router is the only producer of the downstream index queue. A plain
//! order's slot index goes straight out; a split parent fans out into
//! freshly allocated child slots; a cancel targeting a split parent fans
//! out into one synthesized cancel per live child. Any partial failure
//! latches the parent into `TraderError` while already-submitted children
//! keep their state.

use crate::common::now_ns;
use crate::core::error::{self, ErrorCode, ErrorDomain};
use crate::order::book::{OrderBook, OrderEntry};
use crate::order::request::{MdTime, OrderId, OrderRequest, OrderStatus, OrderType};
use crate::order::splitter::{OrderSplitter, SplitConfig};
use crate::risk::RiskResult;
use crate::shm::{DownstreamShmLayout, INVALID_ORDER_INDEX, OrderIndex, OrdersShm, SlotSource, SlotStage};
use std::sync::atomic::Ordering;

/// Router counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct RouterStats {
    /// Orders handed to the router.
    pub orders_received: u64,
    /// Orders (or children) successfully enqueued downstream.
    pub orders_sent: u64,
    /// Parents that went through the splitter.
    pub orders_split: u64,
    /// Orders the router could not progress.
    pub orders_rejected: u64,
    /// Downstream pushes that failed on a full queue.
    pub queue_full_count: u64,
    /// Last routing activity, wall-clock nanoseconds.
    pub last_order_time_ns: u64,
}

/// Routes risk-passed orders to the gateway via the downstream queue.
pub struct OrderRouter<'shm> {
    book: &'shm OrderBook,
    downstream: &'shm DownstreamShmLayout,
    orders_shm: &'shm OrdersShm,
    splitter: OrderSplitter,
    stats: RouterStats,
}

impl<'shm> OrderRouter<'shm> {
    /// Router over the given book, downstream queue, and order pool.
    pub fn new(
        book: &'shm OrderBook,
        downstream: &'shm DownstreamShmLayout,
        orders_shm: &'shm OrdersShm,
        split_config: SplitConfig,
    ) -> Self {
        OrderRouter {
            book,
            downstream,
            orders_shm,
            splitter: OrderSplitter::new(split_config),
            stats: RouterStats::default(),
        }
    }

    /// Router counters.
    pub fn stats(&self) -> &RouterStats {
        &self.stats
    }

    /// Reset the counters.
    pub fn reset_stats(&mut self) {
        self.stats = RouterStats::default();
    }

    /// Splitter configuration in effect.
    pub fn split_config(&self) -> &SplitConfig {
        self.splitter.config()
    }

    /// Route one risk-passed order. Cancels fan out through
    /// [`Self::route_cancel`]; oversized news go through the splitter.
    pub fn route_order(&mut self, entry: &OrderEntry) -> bool {
        if entry.request.order_type == OrderType::Cancel {
            return self.route_cancel(
                entry.request.orig_internal_order_id,
                entry.request.internal_order_id,
                entry.request.md_time_driven,
            );
        }

        self.stats.orders_received += 1;
        self.stats.last_order_time_ns = now_ns();

        if self.splitter.should_split(&entry.request) {
            return self.handle_split_order(entry);
        }

        if entry.shm_order_index == INVALID_ORDER_INDEX {
            self.stats.orders_rejected += 1;
            self.book
                .update_status(entry.request.internal_order_id, OrderStatus::TraderError);
            error::report(
                ErrorDomain::Order,
                ErrorCode::OrderInvariantBroken,
                "order_router",
                "missing order shm index",
            );
            return false;
        }

        if !self.send_to_downstream(entry.shm_order_index) {
            self.stats.orders_rejected += 1;
            self.stats.queue_full_count += 1;
            self.book
                .update_status(entry.request.internal_order_id, OrderStatus::TraderError);
            error::report(
                ErrorDomain::Order,
                ErrorCode::QueuePushFailed,
                "order_router",
                "failed to push order to downstream",
            );
            return false;
        }

        self.stats.orders_sent += 1;
        self.book
            .update_status(entry.request.internal_order_id, OrderStatus::TraderSubmitted);
        true
    }

    /// Route a batch; returns how many succeeded.
    pub fn route_orders(&mut self, entries: &[OrderEntry]) -> usize {
        entries
            .iter()
            .filter(|entry| self.route_order(entry))
            .count()
    }

    /// Route a cancel for `orig_id`. A split parent produces one cancel per
    /// live `New` child (the first uses `cancel_id`, the rest draw fresh
    /// ids); an unsplit order produces a single cancel.
    pub fn route_cancel(&mut self, orig_id: OrderId, cancel_id: OrderId, md_time: MdTime) -> bool {
        self.stats.orders_received += 1;
        self.stats.last_order_time_ns = now_ns();

        let children = self.book.get_children(orig_id);
        if !children.is_empty() {
            let mut any_sent = false;
            let mut any_failed = false;
            let mut used_cancel_id = false;

            for child_id in children {
                let Some(child) = self.book.get_order(child_id) else {
                    continue;
                };
                if child.request.order_type != OrderType::New || child.is_terminal() {
                    continue;
                }

                let child_cancel_id = if used_cancel_id {
                    self.book.next_order_id()
                } else {
                    cancel_id
                };
                used_cancel_id = true;

                if self.submit_cancel(child_cancel_id, md_time, child_id, true, orig_id, child.strategy_id)
                {
                    any_sent = true;
                } else {
                    any_failed = true;
                }
            }

            if any_failed {
                self.book.update_status(orig_id, OrderStatus::TraderError);
            }
            return any_sent;
        }

        self.submit_cancel(cancel_id, md_time, orig_id, false, 0, 0)
    }

    /// Synthesize a cancel, materialize it in the pool and book, and send
    /// it downstream.
    fn submit_cancel(
        &mut self,
        cancel_id: OrderId,
        md_time: MdTime,
        orig_id: OrderId,
        is_split_child: bool,
        parent_order_id: OrderId,
        strategy_id: u16,
    ) -> bool {
        let mut cancel_request = OrderRequest::new();
        cancel_request.init_cancel(cancel_id, md_time, orig_id);
        cancel_request.order_status = OrderStatus::TraderPending;

        let Some(cancel_index) = self.create_internal_order_slot(&cancel_request) else {
            self.stats.orders_rejected += 1;
            error::report(
                ErrorDomain::Order,
                ErrorCode::OrderPoolFull,
                "order_router",
                "failed to allocate cancel order slot",
            );
            return false;
        };

        let mut cancel_entry = OrderEntry::from_request(cancel_request, cancel_index);
        cancel_entry.strategy_id = strategy_id;
        cancel_entry.risk_result = RiskResult::Pass;
        cancel_entry.is_split_child = is_split_child;
        cancel_entry.parent_order_id = parent_order_id;

        if !self.book.add_order(&cancel_entry) {
            self.orders_shm
                .update_stage(cancel_index, SlotStage::QueuePushFailed, now_ns());
            self.stats.orders_rejected += 1;
            error::report(
                ErrorDomain::Order,
                ErrorCode::OrderBookFull,
                "order_router",
                "failed to add cancel order",
            );
            return false;
        }

        if !self.send_to_downstream(cancel_index) {
            self.stats.orders_rejected += 1;
            self.stats.queue_full_count += 1;
            self.book.update_status(cancel_id, OrderStatus::TraderError);
            error::report(
                ErrorDomain::Order,
                ErrorCode::QueuePushFailed,
                "order_router",
                "failed to send cancel request",
            );
            return false;
        }

        self.stats.orders_sent += 1;
        self.book
            .update_status(cancel_id, OrderStatus::TraderSubmitted);
        true
    }

    /// Push a slot index to the gateway and advance the slot stage.
    fn send_to_downstream(&self, index: OrderIndex) -> bool {
        let pushed = self.downstream.order_queue.try_push(&index);
        if pushed {
            self.downstream
                .header
                .last_update_ns
                .store(now_ns(), Ordering::Relaxed);
            self.orders_shm
                .update_stage(index, SlotStage::DownstreamQueued, now_ns());
        } else {
            self.orders_shm
                .update_stage(index, SlotStage::QueuePushFailed, now_ns());
        }
        pushed
    }

    /// Split a parent and submit each child with its own pool slot. Any
    /// child failure latches the parent to `TraderError`; children already
    /// submitted keep `TraderSubmitted`.
    fn handle_split_order(&mut self, parent: &OrderEntry) -> bool {
        self.stats.orders_split += 1;

        let book = self.book;
        let children = match self
            .splitter
            .split(&parent.request, &mut || book.next_order_id())
        {
            Ok(children) if !children.is_empty() => children,
            Ok(_) | Err(_) => {
                self.stats.orders_rejected += 1;
                self.book
                    .update_status(parent.request.internal_order_id, OrderStatus::TraderError);
                error::report(
                    ErrorDomain::Order,
                    ErrorCode::SplitFailed,
                    "order_router",
                    "split order failed",
                );
                return false;
            }
        };

        let mut any_sent = false;
        let mut any_failed = false;

        for mut child_request in children {
            child_request.order_status = OrderStatus::TraderPending;

            let Some(child_index) = self.create_internal_order_slot(&child_request) else {
                any_failed = true;
                self.stats.orders_rejected += 1;
                error::report(
                    ErrorDomain::Order,
                    ErrorCode::OrderPoolFull,
                    "order_router",
                    "failed to allocate child order slot",
                );
                continue;
            };

            let mut child_entry = OrderEntry::from_request(child_request, child_index);
            child_entry.strategy_id = parent.strategy_id;
            child_entry.risk_result = parent.risk_result;
            child_entry.is_split_child = true;
            child_entry.parent_order_id = parent.request.internal_order_id;

            if !self.book.add_order(&child_entry) {
                self.orders_shm
                    .update_stage(child_index, SlotStage::QueuePushFailed, now_ns());
                any_failed = true;
                self.stats.orders_rejected += 1;
                error::report(
                    ErrorDomain::Order,
                    ErrorCode::OrderBookFull,
                    "order_router",
                    "failed to add child order",
                );
                continue;
            }

            if !self.send_to_downstream(child_index) {
                any_failed = true;
                self.stats.orders_rejected += 1;
                self.stats.queue_full_count += 1;
                self.book.update_status(
                    child_entry.request.internal_order_id,
                    OrderStatus::TraderError,
                );
                error::report(
                    ErrorDomain::Order,
                    ErrorCode::QueuePushFailed,
                    "order_router",
                    "failed to send child order",
                );
                continue;
            }

            self.stats.orders_sent += 1;
            any_sent = true;
            self.book.update_status(
                child_entry.request.internal_order_id,
                OrderStatus::TraderSubmitted,
            );
        }

        if any_failed {
            self.book
                .update_status(parent.request.internal_order_id, OrderStatus::TraderError);
        }

        any_sent
    }

    /// Allocate a pool slot for an internally synthesized order.
    fn create_internal_order_slot(&self, request: &OrderRequest) -> Option<OrderIndex> {
        self.orders_shm.append(
            request,
            SlotStage::UpstreamDequeued,
            SlotSource::AccountInternal,
            now_ns(),
        )
    }
}
