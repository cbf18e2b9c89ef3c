//! Gateway loop scenarios: downstream drain, broker submission, bounded
//! retry, and event-to-response mapping with the sim adapter.

use account_service_rs::gateway::{
    BrokerAdapter, BrokerEvent, BrokerOrderRequest, BrokerRuntimeConfig, EventKind, GatewayConfig,
    GatewayLoop, SendResult, SimBrokerAdapter,
};
use account_service_rs::order::{Market, OrderRequest, OrderStatus, OrderType, TradeSide};
use account_service_rs::shm::{
    DownstreamShmLayout, OrdersShm, Shm, ShmManager, ShmMode, SlotSource, SlotStage,
    TradeResponse, TradesShmLayout,
};

struct Rig {
    _dir: tempfile::TempDir,
    downstream: Shm<DownstreamShmLayout>,
    trades: Shm<TradesShmLayout>,
    orders: OrdersShm,
}

fn open_rig() -> Rig {
    let dir = tempfile::tempdir().unwrap();
    let manager = ShmManager::with_base_dir(dir.path());
    Rig {
        downstream: manager
            .open_downstream("/downstream_order_shm", ShmMode::Create)
            .unwrap(),
        trades: manager.open_trades("/trades_shm", ShmMode::Create).unwrap(),
        orders: manager
            .open_orders("/orders_shm", "20260801", 1024, ShmMode::Create)
            .unwrap(),
        _dir: dir,
    }
}

fn gateway_config() -> GatewayConfig {
    GatewayConfig {
        trading_day: "20260801".to_string(),
        order_pool_capacity: 1024,
        stats_interval_ms: 0,
        idle_sleep_us: 0,
        retry_interval_us: 0,
        ..GatewayConfig::default()
    }
}

fn submit_slot(rig: &Rig, id: u32, volume: u64, price: u64) -> u32 {
    let mut request = OrderRequest::new();
    request.init_new(
        "000001",
        "SZ.000001".into(),
        id,
        TradeSide::Buy,
        Market::Sz,
        volume,
        price,
        93_000_000,
    );
    request.order_status = OrderStatus::TraderSubmitted;
    let index = rig
        .orders
        .append(
            &request,
            SlotStage::DownstreamQueued,
            SlotSource::Strategy,
            account_service_rs::common::now_ns(),
        )
        .unwrap();
    assert!(rig.downstream.order_queue.try_push(&index));
    index
}

fn sim_adapter(auto_fill: bool) -> SimBrokerAdapter {
    let mut adapter = SimBrokerAdapter::new();
    assert!(adapter.initialize(&BrokerRuntimeConfig {
        account_id: 1,
        auto_fill,
    }));
    adapter
}

fn pop_response(rig: &Rig) -> Option<TradeResponse> {
    let mut response = TradeResponse::new();
    rig.trades.response_queue.try_pop(&mut response).then_some(response)
}

#[test]
fn auto_fill_round_trip_produces_three_responses() {
    let rig = open_rig();
    let index = submit_slot(&rig, 5001, 100, 1000);

    let mut gateway =
        GatewayLoop::new(gateway_config(), &rig.downstream, &rig.trades, &rig.orders, sim_adapter(true));
    assert!(gateway.poll_once());

    assert_eq!(gateway.stats().orders_received, 1);
    assert_eq!(gateway.stats().orders_submitted, 1);
    assert_eq!(gateway.stats().responses_pushed, 3);

    let snapshot = rig.orders.read_snapshot(index).unwrap();
    assert_eq!(snapshot.stage, SlotStage::DownstreamDequeued);

    let accepted = pop_response(&rig).unwrap();
    assert_eq!(accepted.internal_order_id, 5001);
    assert_eq!(accepted.new_status, OrderStatus::BrokerAccepted);

    let fill = pop_response(&rig).unwrap();
    assert_eq!(fill.new_status, OrderStatus::MarketAccepted);
    assert_eq!(fill.volume_traded, 100);
    assert_eq!(fill.dvalue_traded, 100_000);
    assert_eq!(fill.trade_side, TradeSide::Buy);

    let finished = pop_response(&rig).unwrap();
    assert_eq!(finished.new_status, OrderStatus::Finished);

    assert!(pop_response(&rig).is_none());
}

#[test]
fn unmappable_slot_yields_trader_error_response() {
    let rig = open_rig();

    // A slot with no usable type: the mapper refuses it.
    let mut request = OrderRequest::new();
    request.internal_order_id = 6001;
    request.order_type = OrderType::NotSet;
    let index = rig
        .orders
        .append(
            &request,
            SlotStage::DownstreamQueued,
            SlotSource::Strategy,
            account_service_rs::common::now_ns(),
        )
        .unwrap();
    assert!(rig.downstream.order_queue.try_push(&index));

    let mut gateway =
        GatewayLoop::new(gateway_config(), &rig.downstream, &rig.trades, &rig.orders, sim_adapter(true));
    gateway.poll_once();

    assert_eq!(gateway.stats().orders_failed, 1);
    let response = pop_response(&rig).unwrap();
    assert_eq!(response.internal_order_id, 6001);
    assert_eq!(response.new_status, OrderStatus::TraderError);
}

/// Adapter that fails with a retryable error a fixed number of times.
struct FlakyAdapter {
    failures_left: u32,
    submitted: Vec<u32>,
}

impl BrokerAdapter for FlakyAdapter {
    fn initialize(&mut self, _config: &BrokerRuntimeConfig) -> bool {
        true
    }

    fn submit(&mut self, request: &BrokerOrderRequest) -> SendResult {
        if self.failures_left > 0 {
            self.failures_left -= 1;
            return SendResult::retryable_error(-7);
        }
        self.submitted.push(request.internal_order_id);
        SendResult::ok()
    }

    fn poll_events(&mut self, _out: &mut [BrokerEvent]) -> usize {
        0
    }

    fn shutdown(&mut self) {}
}

#[test]
fn retryable_failures_are_rescheduled_until_accepted() {
    let rig = open_rig();
    submit_slot(&rig, 7001, 100, 1000);

    let adapter = FlakyAdapter {
        failures_left: 2,
        submitted: Vec::new(),
    };
    let mut gateway =
        GatewayLoop::new(gateway_config(), &rig.downstream, &rig.trades, &rig.orders, adapter);

    // First iteration: submit fails, retry scheduled.
    gateway.poll_once();
    assert_eq!(gateway.stats().retries_scheduled, 1);
    assert_eq!(gateway.stats().orders_submitted, 0);

    // Two more iterations drain the retry budget into success.
    gateway.poll_once();
    gateway.poll_once();
    assert_eq!(gateway.stats().orders_submitted, 1);
    assert_eq!(gateway.stats().orders_failed, 0);
    assert_eq!(gateway.adapter_mut().submitted, vec![7001]);

    // No error response was synthesized.
    assert!(pop_response(&rig).is_none());
}

#[test]
fn exhausted_retries_emit_trader_error() {
    let rig = open_rig();
    submit_slot(&rig, 7002, 100, 1000);

    let adapter = FlakyAdapter {
        failures_left: u32::MAX,
        submitted: Vec::new(),
    };
    let mut config = gateway_config();
    config.max_retry_attempts = 2;
    let mut gateway = GatewayLoop::new(config, &rig.downstream, &rig.trades, &rig.orders, adapter);

    // Initial attempt plus two retries, then the order fails for good.
    gateway.poll_once();
    gateway.poll_once();
    gateway.poll_once();
    gateway.poll_once();

    assert_eq!(gateway.stats().retries_scheduled, 2);
    assert_eq!(gateway.stats().retries_exhausted, 1);
    assert_eq!(gateway.stats().orders_failed, 1);

    let response = pop_response(&rig).unwrap();
    assert_eq!(response.internal_order_id, 7002);
    assert_eq!(response.new_status, OrderStatus::TraderError);
}

/// Adapter that emits one unmappable event.
struct NoiseAdapter {
    emitted: bool,
}

impl BrokerAdapter for NoiseAdapter {
    fn initialize(&mut self, _config: &BrokerRuntimeConfig) -> bool {
        true
    }

    fn submit(&mut self, _request: &BrokerOrderRequest) -> SendResult {
        SendResult::ok()
    }

    fn poll_events(&mut self, out: &mut [BrokerEvent]) -> usize {
        if self.emitted || out.is_empty() {
            return 0;
        }
        self.emitted = true;
        out[0] = BrokerEvent {
            kind: EventKind::None,
            internal_order_id: 9001,
            ..BrokerEvent::default()
        };
        1
    }

    fn shutdown(&mut self) {}
}

#[test]
fn unknown_event_kinds_are_dropped() {
    let rig = open_rig();
    let mut gateway = GatewayLoop::new(
        gateway_config(),
        &rig.downstream,
        &rig.trades,
        &rig.orders,
        NoiseAdapter { emitted: false },
    );

    gateway.poll_once();
    assert_eq!(gateway.stats().events_received, 1);
    assert_eq!(gateway.stats().responses_dropped, 1);
    assert_eq!(gateway.stats().responses_pushed, 0);
    assert!(pop_response(&rig).is_none());
}

#[test]
fn fifo_submission_order_is_preserved() {
    let rig = open_rig();
    for id in [1u32, 2, 3, 4, 5] {
        submit_slot(&rig, id, 10, 100);
    }

    let adapter = FlakyAdapter {
        failures_left: 0,
        submitted: Vec::new(),
    };
    let mut gateway =
        GatewayLoop::new(gateway_config(), &rig.downstream, &rig.trades, &rig.orders, adapter);
    gateway.poll_once();

    assert_eq!(gateway.adapter_mut().submitted, vec![1, 2, 3, 4, 5]);
}

#[test]
fn cancel_slots_are_submitted_to_broker() {
    let rig = open_rig();

    let mut cancel = OrderRequest::new();
    cancel.init_cancel(8001, 93_100_000, 5001);
    let index = rig
        .orders
        .append(
            &cancel,
            SlotStage::DownstreamQueued,
            SlotSource::AccountInternal,
            account_service_rs::common::now_ns(),
        )
        .unwrap();
    assert!(rig.downstream.order_queue.try_push(&index));

    let mut gateway =
        GatewayLoop::new(gateway_config(), &rig.downstream, &rig.trades, &rig.orders, sim_adapter(true));
    gateway.poll_once();

    assert_eq!(gateway.stats().orders_submitted, 1);
    // Sim broker acknowledges and finishes cancels.
    let accepted = pop_response(&rig).unwrap();
    assert_eq!(accepted.internal_order_id, 8001);
    assert_eq!(accepted.new_status, OrderStatus::BrokerAccepted);
    let finished = pop_response(&rig).unwrap();
    assert_eq!(finished.new_status, OrderStatus::Finished);
}
