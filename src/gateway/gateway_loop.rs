//! The gateway event loop.
//!
//! Single-threaded, wrapping one broker adapter. Each iteration: drain due
//! retries, drain downstream slot indices into broker submissions, poll
//! adapter events into trade responses. Retry here is the system's only
//! retry point; the account core surfaces queue pressure immediately and
//! never resubmits.

use crate::common::now_ns;
use crate::core::error::{self, ErrorCode, ErrorDomain, should_stop_service};
use crate::core::signals;
use crate::gateway::adapter::{BrokerAdapter, BrokerEvent, BrokerOrderRequest};
use crate::gateway::config::GatewayConfig;
use crate::gateway::mapper::{
    map_broker_event_to_trade_response, map_order_request_to_broker, to_order_side,
};
use crate::order::{InternalSecurityId, OrderId, OrderStatus, TimestampNs, TradeSide};
use crate::shm::{
    DownstreamShmLayout, OrderIndex, OrdersShm, SlotStage, TradeResponse, TradesShmLayout,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

/// Attempts to push one trade response before giving up.
const RESPONSE_PUSH_ATTEMPTS: u32 = 3;

/// Hard cap on events polled per iteration.
const MAX_EVENT_BATCH: usize = 256;

/// Gateway counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct GatewayStats {
    /// Iterations run.
    pub loop_iterations: u64,
    /// Iterations that found no work.
    pub idle_iterations: u64,
    /// Slot indices popped from downstream.
    pub orders_received: u64,
    /// Orders the broker accepted.
    pub orders_submitted: u64,
    /// Orders that failed permanently.
    pub orders_failed: u64,
    /// Retries scheduled.
    pub retries_scheduled: u64,
    /// Orders that exhausted their retry budget.
    pub retries_exhausted: u64,
    /// Events polled from the adapter.
    pub events_received: u64,
    /// Trade responses pushed.
    pub responses_pushed: u64,
    /// Responses dropped (unmappable events or queue pressure).
    pub responses_dropped: u64,
    /// Current retry-queue depth.
    pub retry_queue_size: u64,
    /// Last order activity, wall-clock nanoseconds.
    pub last_order_time_ns: u64,
}

struct RetryItem {
    request: BrokerOrderRequest,
    attempts: u32,
    next_retry_at_ns: TimestampNs,
}

/// The gateway loop over one adapter and the downstream/trades segments.
pub struct GatewayLoop<'shm, A: BrokerAdapter> {
    config: GatewayConfig,
    downstream: &'shm DownstreamShmLayout,
    trades: &'shm TradesShmLayout,
    orders_shm: &'shm OrdersShm,
    adapter: A,
    running: Arc<AtomicBool>,
    retry_queue: VecDeque<RetryItem>,
    stats: GatewayStats,
    last_stats_print_ns: TimestampNs,
    fatal_stop: bool,
}

impl<'shm, A: BrokerAdapter> GatewayLoop<'shm, A> {
    /// Wire up a loop over already-opened segments and an initialized
    /// adapter.
    pub fn new(
        config: GatewayConfig,
        downstream: &'shm DownstreamShmLayout,
        trades: &'shm TradesShmLayout,
        orders_shm: &'shm OrdersShm,
        adapter: A,
    ) -> Self {
        GatewayLoop {
            config,
            downstream,
            trades,
            orders_shm,
            adapter,
            running: Arc::new(AtomicBool::new(false)),
            retry_queue: VecDeque::new(),
            stats: GatewayStats::default(),
            last_stats_print_ns: 0,
            fatal_stop: false,
        }
    }

    /// Run until stopped. Returns the process exit code.
    pub fn run(&mut self) -> i32 {
        if self.running.swap(true, Ordering::AcqRel) {
            return 1;
        }
        self.last_stats_print_ns = now_ns();

        while self.running.load(Ordering::Acquire) {
            self.poll_once();
            if signals::stop_requested() || should_stop_service() {
                self.running.store(false, Ordering::Release);
            }
        }
        i32::from(self.fatal_stop)
    }

    /// Request the loop to exit after the current iteration.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Handle that external threads (signal wiring, tests) can flip.
    pub fn running_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Gateway counters.
    pub fn stats(&self) -> &GatewayStats {
        &self.stats
    }

    /// Adapter access for tests and drains.
    pub fn adapter_mut(&mut self) -> &mut A {
        &mut self.adapter
    }

    /// One iteration: retries, downstream orders, adapter events.
    /// Returns whether any work happened.
    pub fn poll_once(&mut self) -> bool {
        self.stats.loop_iterations += 1;

        let mut did_work = self.process_retry_queue();
        did_work |= self.process_orders(self.config.poll_batch_size as usize);
        did_work |= self.process_events(self.config.poll_batch_size as usize);

        if !did_work {
            self.stats.idle_iterations += 1;
            if self.config.idle_sleep_us > 0 {
                std::thread::sleep(std::time::Duration::from_micros(
                    u64::from(self.config.idle_sleep_us),
                ));
            }
        }

        if self.config.stats_interval_ms > 0 {
            let now = now_ns();
            let interval_ns = u64::from(self.config.stats_interval_ms) * 1_000_000;
            if now >= self.last_stats_print_ns + interval_ns {
                self.emit_periodic_stats();
                self.last_stats_print_ns = now;
            }
        }
        did_work
    }

    /// Resubmit retry items whose deadline has passed; requeue the rest.
    fn process_retry_queue(&mut self) -> bool {
        if self.retry_queue.is_empty() {
            return false;
        }

        let mut did_work = false;
        let now = now_ns();
        // Only touch items present at entry so a retry that reschedules
        // itself cannot starve the rest of the iteration.
        let count = self.retry_queue.len();

        for _ in 0..count {
            let item = self.retry_queue.pop_front().expect("len checked above");
            if item.next_retry_at_ns > now {
                self.retry_queue.push_back(item);
                continue;
            }
            did_work = true;
            self.submit_request(&item.request, item.attempts);
        }

        self.stats.retry_queue_size = self.retry_queue.len() as u64;
        did_work
    }

    /// Drain downstream slot indices and submit them to the broker.
    fn process_orders(&mut self, batch_limit: usize) -> bool {
        if batch_limit == 0 {
            return false;
        }

        let mut did_work = false;
        let mut processed = 0;
        let mut index: OrderIndex = 0;

        while processed < batch_limit && self.downstream.order_queue.try_pop(&mut index) {
            processed += 1;
            did_work = true;
            self.stats.orders_received += 1;
            self.stats.last_order_time_ns = now_ns();

            let snapshot = match self.orders_shm.read_snapshot(index) {
                Ok(snapshot) => snapshot,
                Err(err) => {
                    self.stats.orders_failed += 1;
                    error::report(
                        ErrorDomain::Order,
                        ErrorCode::OrderNotFound,
                        "gateway_loop",
                        format!("failed to read downstream slot {index}: {err}"),
                    );
                    continue;
                }
            };

            self.orders_shm
                .update_stage(index, SlotStage::DownstreamDequeued, now_ns());

            let Some(mapped) = map_order_request_to_broker(&snapshot.request) else {
                self.stats.orders_failed += 1;
                self.emit_trader_error(
                    snapshot.request.internal_order_id,
                    snapshot.request.internal_security_id,
                    snapshot.request.trade_side,
                );
                continue;
            };

            self.submit_request(&mapped, 0);
        }

        did_work
    }

    /// Poll adapter events and push mapped trade responses.
    fn process_events(&mut self, batch_limit: usize) -> bool {
        if batch_limit == 0 {
            return false;
        }

        let mut events = [BrokerEvent::default(); MAX_EVENT_BATCH];
        let max_events = batch_limit.min(MAX_EVENT_BATCH);
        let count = self.adapter.poll_events(&mut events[..max_events]);
        if count == 0 {
            return false;
        }

        self.stats.events_received += count as u64;

        for event in &events[..count] {
            let Some(response) = map_broker_event_to_trade_response(event) else {
                self.stats.responses_dropped += 1;
                continue;
            };

            if !self.push_response(&response) {
                // The account side is not draining; losing event responses
                // would desynchronize order state for good.
                self.stats.responses_dropped += 1;
                self.fatal_stop = true;
                self.stop();
                error::report(
                    ErrorDomain::Order,
                    ErrorCode::QueuePushFailed,
                    "gateway_loop",
                    "failed to push trade response; stopping",
                );
                break;
            }
            self.stats.responses_pushed += 1;
        }

        true
    }

    /// Submit once; schedule a retry or synthesize a terminal error
    /// according to the result.
    fn submit_request(&mut self, request: &BrokerOrderRequest, attempts: u32) {
        let result = self.adapter.submit(request);
        if result.accepted {
            self.stats.orders_submitted += 1;
            return;
        }

        if result.retryable && attempts < self.config.max_retry_attempts {
            self.retry_queue.push_back(RetryItem {
                request: *request,
                attempts: attempts + 1,
                next_retry_at_ns: now_ns() + u64::from(self.config.retry_interval_us) * 1_000,
            });
            self.stats.retries_scheduled += 1;
            self.stats.retry_queue_size = self.retry_queue.len() as u64;
            return;
        }

        self.stats.orders_failed += 1;
        if attempts > 0 {
            self.stats.retries_exhausted += 1;
        }
        self.emit_trader_error(
            request.internal_order_id,
            request.internal_security_id,
            to_order_side(request.trade_side),
        );
    }

    /// Push with bounded retries; the queue may be momentarily full while
    /// the account loop catches up.
    fn push_response(&self, response: &TradeResponse) -> bool {
        for _ in 0..RESPONSE_PUSH_ATTEMPTS {
            if self.trades.response_queue.try_push(response) {
                return true;
            }
            if self.config.retry_interval_us > 0 {
                std::thread::sleep(std::time::Duration::from_micros(
                    u64::from(self.config.retry_interval_us),
                ));
            }
        }
        false
    }

    /// Best-effort terminal `TraderError` response so upstream can observe
    /// the failure in band.
    fn emit_trader_error(
        &mut self,
        internal_order_id: OrderId,
        internal_security_id: InternalSecurityId,
        trade_side: TradeSide,
    ) {
        if internal_order_id == 0 {
            return;
        }

        let mut response = TradeResponse::new();
        response.internal_order_id = internal_order_id;
        response.internal_security_id = internal_security_id;
        response.trade_side = trade_side;
        response.new_status = OrderStatus::TraderError;
        response.recv_time_ns = now_ns();

        if self.push_response(&response) {
            self.stats.responses_pushed += 1;
        } else {
            self.stats.responses_dropped += 1;
        }
    }

    fn emit_periodic_stats(&self) {
        info!(
            loops = self.stats.loop_iterations,
            idle = self.stats.idle_iterations,
            received = self.stats.orders_received,
            submitted = self.stats.orders_submitted,
            failed = self.stats.orders_failed,
            retry_queue = self.stats.retry_queue_size,
            events = self.stats.events_received,
            responses = self.stats.responses_pushed,
            dropped = self.stats.responses_dropped,
            "gateway stats"
        );
    }
}
