//! The account event loop.
//!
//! One cooperative single-threaded loop per account process. Each iteration
//! drains upstream order indices, runs admitted orders through risk and the
//! router, then drains trade responses and applies them to the order book
//! and positions. No worker pools, no async runtime; the only locks taken
//! are the book spinlock and position row locks, neither of which is ever
//! held across a syscall.

use crate::common::{now_monotonic_ns, now_ns};
use crate::core::config::EventLoopConfig;
use crate::core::error::{self, ErrorCode, ErrorDomain, should_stop_service};
use crate::core::signals;
use crate::order::{
    OrderBook, OrderEntry, OrderRouter, OrderStatus, OrderType, TradeSide,
};
use crate::portfolio::PositionManager;
use crate::risk::RiskManager;
use crate::shm::{
    OrderIndex, OrdersShm, SlotStage, TradeResponse, TradesShmLayout, UpstreamShmLayout,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// Loop counters and per-iteration latency aggregates.
#[derive(Debug, Clone, Copy)]
pub struct EventLoopStats {
    /// Iterations run.
    pub total_iterations: u64,
    /// Upstream orders processed.
    pub orders_processed: u64,
    /// Trade responses processed.
    pub responses_processed: u64,
    /// Iterations that found no work.
    pub idle_iterations: u64,
    /// Loop start, wall-clock nanoseconds.
    pub start_time_ns: u64,
    /// Last order processed, wall-clock nanoseconds.
    pub last_order_time_ns: u64,
    /// Last response processed, wall-clock nanoseconds.
    pub last_response_time_ns: u64,
    /// Fastest iteration.
    pub min_latency_ns: u64,
    /// Slowest iteration.
    pub max_latency_ns: u64,
    /// Sum of iteration latencies.
    pub total_latency_ns: u64,
    /// Number of latency samples.
    pub latency_samples: u64,
}

impl EventLoopStats {
    /// Mean iteration latency in nanoseconds.
    pub fn avg_latency_ns(&self) -> f64 {
        if self.latency_samples == 0 {
            0.0
        } else {
            self.total_latency_ns as f64 / self.latency_samples as f64
        }
    }
}

impl Default for EventLoopStats {
    fn default() -> Self {
        EventLoopStats {
            total_iterations: 0,
            orders_processed: 0,
            responses_processed: 0,
            idle_iterations: 0,
            start_time_ns: 0,
            last_order_time_ns: 0,
            last_response_time_ns: 0,
            min_latency_ns: u64::MAX,
            max_latency_ns: 0,
            total_latency_ns: 0,
            latency_samples: 0,
        }
    }
}

/// The account-side event loop. Owns the router, risk pipeline, and
/// position manager; borrows the segments and the order book.
pub struct EventLoop<'shm> {
    config: EventLoopConfig,
    upstream: &'shm UpstreamShmLayout,
    trades: &'shm TradesShmLayout,
    orders_shm: &'shm OrdersShm,
    book: &'shm OrderBook,
    router: OrderRouter<'shm>,
    positions: PositionManager<'shm>,
    risk: RiskManager,
    running: Arc<AtomicBool>,
    stats: EventLoopStats,
    last_stats_time_ns: u64,
}

impl<'shm> EventLoop<'shm> {
    /// Wire up a loop over already-opened segments and components.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EventLoopConfig,
        upstream: &'shm UpstreamShmLayout,
        trades: &'shm TradesShmLayout,
        orders_shm: &'shm OrdersShm,
        book: &'shm OrderBook,
        router: OrderRouter<'shm>,
        positions: PositionManager<'shm>,
        risk: RiskManager,
    ) -> Self {
        EventLoop {
            config,
            upstream,
            trades,
            orders_shm,
            book,
            router,
            positions,
            risk,
            running: Arc::new(AtomicBool::new(false)),
            stats: EventLoopStats::default(),
            last_stats_time_ns: 0,
        }
    }

    /// Run until stopped by [`Self::stop`], a signal, or a critical error.
    pub fn run(&mut self) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }

        if self.config.pin_cpu && self.config.cpu_core >= 0 {
            self.pin_to_core(self.config.cpu_core as usize);
        }

        self.stats.start_time_ns = now_ns();
        self.last_stats_time_ns = now_monotonic_ns();

        while self.running.load(Ordering::Acquire) {
            self.poll_once();
            if signals::stop_requested() || should_stop_service() {
                self.running.store(false, Ordering::Release);
            }
        }
    }

    /// Request the loop to exit after the current iteration.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Handle that external threads (signal wiring, tests) can flip.
    pub fn running_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Whether the loop is inside [`Self::run`].
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Loop counters.
    pub fn stats(&self) -> &EventLoopStats {
        &self.stats
    }

    /// Reset the counters.
    pub fn reset_stats(&mut self) {
        self.stats = EventLoopStats::default();
    }

    /// Risk pipeline, for configuration at wiring time.
    pub fn risk_mut(&mut self) -> &mut RiskManager {
        &mut self.risk
    }

    /// Position manager view.
    pub fn positions(&self) -> &PositionManager<'shm> {
        &self.positions
    }

    /// One loop iteration: drain upstream, drain responses, sleep when
    /// idle, emit periodic stats. Returns `(orders, responses)` processed.
    pub fn poll_once(&mut self) -> (usize, usize) {
        let start = now_monotonic_ns();
        self.stats.total_iterations += 1;

        let orders = self.process_upstream_orders();
        let responses = self.process_trade_responses();

        if orders == 0 && responses == 0 {
            self.stats.idle_iterations += 1;
            if !self.config.busy_polling && self.config.idle_sleep_us > 0 {
                std::thread::sleep(std::time::Duration::from_micros(
                    u64::from(self.config.idle_sleep_us),
                ));
            }
        }

        let now = now_monotonic_ns();
        if self.config.stats_interval_ms > 0 {
            let interval_ns = u64::from(self.config.stats_interval_ms) * 1_000_000;
            if now >= self.last_stats_time_ns && now - self.last_stats_time_ns >= interval_ns {
                self.emit_periodic_stats();
                self.last_stats_time_ns = now;
            }
        }

        if now >= start {
            let latency = now - start;
            self.stats.min_latency_ns = self.stats.min_latency_ns.min(latency);
            self.stats.max_latency_ns = self.stats.max_latency_ns.max(latency);
            self.stats.total_latency_ns += latency;
            self.stats.latency_samples += 1;
        }

        (orders, responses)
    }

    fn process_upstream_orders(&mut self) -> usize {
        let batch_limit = self.config.poll_batch_size.max(1) as usize;
        let mut processed = 0;

        let mut index: OrderIndex = 0;
        while processed < batch_limit && self.upstream.strategy_order_queue.try_pop(&mut index) {
            self.handle_order_index(index);
            processed += 1;
        }

        if processed > 0 {
            self.stats.orders_processed += processed as u64;
            self.stats.last_order_time_ns = now_ns();
        }
        processed
    }

    fn process_trade_responses(&mut self) -> usize {
        let batch_limit = self.config.poll_batch_size.max(1) as usize;
        let mut processed = 0;

        let mut response = TradeResponse::new();
        while processed < batch_limit && self.trades.response_queue.try_pop(&mut response) {
            self.handle_trade_response(&response);
            processed += 1;
        }

        if processed > 0 {
            self.stats.responses_processed += processed as u64;
            self.stats.last_response_time_ns = now_ns();
        }
        processed
    }

    /// Admit one upstream slot index: snapshot, book entry, risk, route.
    fn handle_order_index(&mut self, index: OrderIndex) {
        let snapshot = match self.orders_shm.read_snapshot(index) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                error::report(
                    ErrorDomain::Order,
                    ErrorCode::QueuePopFailed,
                    "event_loop",
                    format!("failed to read upstream slot {index}: {err}"),
                );
                return;
            }
        };
        self.orders_shm
            .update_stage(index, SlotStage::UpstreamDequeued, now_ns());

        let mut request = snapshot.request;
        if request.internal_order_id == 0 {
            request.internal_order_id = self.book.next_order_id();
        }
        let order_id = request.internal_order_id;

        let entry = OrderEntry::from_request(request, index);
        if !self.book.add_order(&entry) {
            error::report(
                ErrorDomain::Order,
                ErrorCode::OrderBookFull,
                "event_loop",
                format!("order book admission failed for {order_id}"),
            );
            return;
        }

        self.book
            .update_status(order_id, OrderStatus::RiskControllerPending);

        if request.order_type == OrderType::New {
            let risk_result = self.risk.check_order(&request, &self.positions);
            self.book.set_risk_result(order_id, risk_result.code);

            if !risk_result.passed() {
                self.book
                    .update_status(order_id, OrderStatus::RiskControllerRejected);
                self.orders_shm
                    .update_stage(index, SlotStage::RiskRejected, now_ns());
                self.sync_slot(order_id);
                return;
            }
            self.book
                .update_status(order_id, OrderStatus::RiskControllerAccepted);
        } else {
            // Cancels skip the risk pipeline.
            self.book
                .update_status(order_id, OrderStatus::RiskControllerAccepted);
        }

        let routed = match self.book.get_order(order_id) {
            Some(active) => self.router.route_order(&active),
            None => false,
        };
        if !routed {
            self.book.update_status(order_id, OrderStatus::TraderError);
            error::report(
                ErrorDomain::Order,
                ErrorCode::RouteFailed,
                "event_loop",
                format!("route_order failed for {order_id}"),
            );
        }
        self.sync_slot(order_id);
    }

    /// Mirror an order's current book state back into its pool slot.
    fn sync_slot(&self, order_id: u32) {
        if let Some(entry) = self.book.get_order(order_id) {
            if entry.shm_order_index != crate::shm::INVALID_ORDER_INDEX {
                self.orders_shm
                    .sync_order(entry.shm_order_index, &entry.request, now_ns());
            }
        }
    }

    /// Apply one trade response: status, fills, fund/position updates,
    /// archive on terminal.
    fn handle_trade_response(&mut self, response: &TradeResponse) {
        if response.internal_order_id == 0 {
            return;
        }
        let order_id = response.internal_order_id;

        self.book.update_status(order_id, response.new_status);

        if response.volume_traded > 0 {
            self.book.update_trade(
                order_id,
                response.volume_traded,
                response.dprice_traded,
                response.dvalue_traded,
                response.dfee,
            );

            if let Some(order) = self.book.get_order(order_id) {
                if order.request.order_type == OrderType::New {
                    self.apply_position_update(&order, response);
                }
            }
        }

        if response.new_status.is_terminal() {
            if let Some(order) = self.book.get_order(order_id) {
                if order.shm_order_index != crate::shm::INVALID_ORDER_INDEX {
                    self.orders_shm.sync_order(
                        order.shm_order_index,
                        &order.request,
                        now_ns(),
                    );
                    self.orders_shm.update_stage(
                        order.shm_order_index,
                        SlotStage::Terminal,
                        now_ns(),
                    );
                }
            }
            let _ = self.book.archive_order(order_id);
        } else {
            self.sync_slot(order_id);
        }
    }

    fn apply_position_update(&mut self, order: &OrderEntry, response: &TradeResponse) {
        let security_id = if !response.internal_security_id.is_empty() {
            response.internal_security_id
        } else {
            order.request.internal_security_id
        };
        if security_id.is_empty() {
            return;
        }

        // Auto-create the row on first reference.
        if !self.positions.has_position(&security_id) && !order.request.security_id.is_empty() {
            match self.positions.add_security(
                order.request.security_id.as_str(),
                order.request.security_id.as_str(),
                order.request.market,
            ) {
                None => {
                    error::report(
                        ErrorDomain::Portfolio,
                        ErrorCode::PositionUpdateFailed,
                        "event_loop",
                        format!("failed to create position row for {security_id}"),
                    );
                }
                Some(added) if added != security_id => {
                    error::report(
                        ErrorDomain::Portfolio,
                        ErrorCode::OrderInvariantBroken,
                        "event_loop",
                        format!("security id mismatch creating row: {added} vs {security_id}"),
                    );
                }
                Some(_) => {}
            }
        }

        let applied = match response.trade_side {
            TradeSide::Buy => self.positions.add_position(
                &security_id,
                response.volume_traded,
                response.dprice_traded,
                response.internal_order_id,
            ),
            TradeSide::Sell => self.positions.deduct_position(
                &security_id,
                response.volume_traded,
                response.dvalue_traded,
                response.internal_order_id,
            ),
            TradeSide::NotSet => true,
        };
        if !applied {
            error::report(
                ErrorDomain::Portfolio,
                ErrorCode::PositionUpdateFailed,
                "event_loop",
                format!(
                    "failed to apply {:?} trade to {security_id}",
                    response.trade_side
                ),
            );
        }
    }

    fn emit_periodic_stats(&self) {
        info!(
            iterations = self.stats.total_iterations,
            orders = self.stats.orders_processed,
            responses = self.stats.responses_processed,
            idle = self.stats.idle_iterations,
            avg_ns = self.stats.avg_latency_ns(),
            min_ns = if self.stats.min_latency_ns == u64::MAX {
                0
            } else {
                self.stats.min_latency_ns
            },
            max_ns = self.stats.max_latency_ns,
            active_orders = self.book.active_count(),
            "event loop stats"
        );
    }

    fn pin_to_core(&self, core: usize) {
        if let Some(core_ids) = core_affinity::get_core_ids() {
            if let Some(core_id) = core_ids.into_iter().find(|c| c.id == core) {
                if core_affinity::set_for_current(core_id) {
                    info!(core, "event loop pinned to core");
                }
            }
        }
    }
}
