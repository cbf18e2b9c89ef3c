//! Simulated broker adapter.
//!
//! Validates requests, assigns incrementing broker ids, and queues the
//! events a real broker would produce. With `auto_fill` on, every accepted
//! `New` fills completely at its limit price: `BrokerAccepted`, `Trade`,
//! `Finished`, in order. Cancels acknowledge and finish.

use crate::common::now_ns;
use crate::gateway::adapter::{
    BrokerAdapter, BrokerEvent, BrokerMarket, BrokerOrderRequest, BrokerRuntimeConfig, BrokerSide,
    EventKind, RequestType, SendResult,
};
use std::collections::VecDeque;

/// In-process simulated broker.
#[derive(Debug, Default)]
pub struct SimBrokerAdapter {
    runtime_config: BrokerRuntimeConfig,
    initialized: bool,
    next_broker_order_id: u32,
    pending_events: VecDeque<BrokerEvent>,
}

impl SimBrokerAdapter {
    /// A fresh, uninitialized adapter.
    pub fn new() -> Self {
        SimBrokerAdapter {
            runtime_config: BrokerRuntimeConfig::default(),
            initialized: false,
            next_broker_order_id: 1,
            pending_events: VecDeque::new(),
        }
    }

    fn make_base_event(
        kind: EventKind,
        request: &BrokerOrderRequest,
        broker_order_id: u32,
    ) -> BrokerEvent {
        BrokerEvent {
            kind,
            internal_order_id: request.internal_order_id,
            broker_order_id,
            internal_security_id: request.internal_security_id,
            trade_side: request.trade_side,
            md_time_traded: request.md_time,
            recv_time_ns: now_ns(),
            ..BrokerEvent::default()
        }
    }

    fn calc_trade_value(volume: u64, price: u64) -> u64 {
        if volume == 0 || price == 0 {
            0
        } else {
            volume * price
        }
    }

    fn calc_fee(traded_value: u64) -> u64 {
        if traded_value == 0 {
            0
        } else {
            (traded_value / 10_000).max(1)
        }
    }
}

impl BrokerAdapter for SimBrokerAdapter {
    fn initialize(&mut self, config: &BrokerRuntimeConfig) -> bool {
        self.runtime_config = *config;
        self.initialized = true;
        self.next_broker_order_id = 1;
        self.pending_events.clear();
        true
    }

    fn submit(&mut self, request: &BrokerOrderRequest) -> SendResult {
        if !self.initialized {
            return SendResult::fatal_error(-100);
        }
        if request.internal_order_id == 0 {
            return SendResult::fatal_error(-101);
        }

        match request.request_type {
            RequestType::New => {
                if request.trade_side == BrokerSide::Unknown
                    || request.market == BrokerMarket::Unknown
                    || request.volume == 0
                    || request.price == 0
                    || request.security_id.is_empty()
                {
                    return SendResult::fatal_error(-102);
                }

                let broker_order_id = self.next_broker_order_id;
                self.next_broker_order_id += 1;
                self.pending_events.push_back(Self::make_base_event(
                    EventKind::BrokerAccepted,
                    request,
                    broker_order_id,
                ));

                if self.runtime_config.auto_fill {
                    let mut trade =
                        Self::make_base_event(EventKind::Trade, request, broker_order_id);
                    trade.volume_traded = request.volume;
                    trade.price_traded = request.price;
                    trade.value_traded = Self::calc_trade_value(request.volume, request.price);
                    trade.fee = Self::calc_fee(trade.value_traded);
                    self.pending_events.push_back(trade);
                    self.pending_events.push_back(Self::make_base_event(
                        EventKind::Finished,
                        request,
                        broker_order_id,
                    ));
                }

                SendResult::ok()
            }
            RequestType::Cancel => {
                if request.orig_internal_order_id == 0 {
                    return SendResult::fatal_error(-103);
                }
                let broker_order_id = self.next_broker_order_id;
                self.next_broker_order_id += 1;
                self.pending_events.push_back(Self::make_base_event(
                    EventKind::BrokerAccepted,
                    request,
                    broker_order_id,
                ));
                self.pending_events.push_back(Self::make_base_event(
                    EventKind::Finished,
                    request,
                    broker_order_id,
                ));
                SendResult::ok()
            }
            RequestType::Unknown => SendResult::fatal_error(-104),
        }
    }

    fn poll_events(&mut self, out: &mut [BrokerEvent]) -> usize {
        if !self.initialized || out.is_empty() {
            return 0;
        }
        let count = out.len().min(self.pending_events.len());
        for slot in out.iter_mut().take(count) {
            *slot = self.pending_events.pop_front().expect("count bounded above");
        }
        count
    }

    fn shutdown(&mut self) {
        self.pending_events.clear();
        self.initialized = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_request(id: u32) -> BrokerOrderRequest {
        BrokerOrderRequest {
            internal_order_id: id,
            request_type: RequestType::New,
            trade_side: BrokerSide::Buy,
            market: BrokerMarket::Sz,
            volume: 100,
            price: 1000,
            md_time: 93_000_000,
            security_id: "000001".into(),
            internal_security_id: "SZ.000001".into(),
            ..BrokerOrderRequest::default()
        }
    }

    fn initialized(auto_fill: bool) -> SimBrokerAdapter {
        let mut adapter = SimBrokerAdapter::new();
        assert!(adapter.initialize(&BrokerRuntimeConfig {
            account_id: 1,
            auto_fill,
        }));
        adapter
    }

    #[test]
    fn submit_before_initialize_fails() {
        let mut adapter = SimBrokerAdapter::new();
        let result = adapter.submit(&make_request(1));
        assert!(!result.accepted);
        assert!(!result.retryable);
    }

    #[test]
    fn auto_fill_emits_accept_trade_finish() {
        let mut adapter = initialized(true);
        assert!(adapter.submit(&make_request(5001)).accepted);

        let mut events = [BrokerEvent::default(); 8];
        let count = adapter.poll_events(&mut events);
        assert_eq!(count, 3);
        assert_eq!(events[0].kind, EventKind::BrokerAccepted);
        assert_eq!(events[1].kind, EventKind::Trade);
        assert_eq!(events[1].volume_traded, 100);
        assert_eq!(events[1].value_traded, 100_000);
        assert_eq!(events[1].fee, 10);
        assert_eq!(events[2].kind, EventKind::Finished);
        assert!(events.iter().take(3).all(|e| e.internal_order_id == 5001));
        assert!(events.iter().take(3).all(|e| e.broker_order_id == 1));
    }

    #[test]
    fn without_auto_fill_only_acceptance_is_emitted() {
        let mut adapter = initialized(false);
        assert!(adapter.submit(&make_request(5001)).accepted);
        let mut events = [BrokerEvent::default(); 8];
        assert_eq!(adapter.poll_events(&mut events), 1);
        assert_eq!(events[0].kind, EventKind::BrokerAccepted);
    }

    #[test]
    fn fee_has_a_floor_of_one() {
        // value 100 * 1 = 100 < 10_000 → fee clamps to 1
        let mut adapter = initialized(true);
        let mut request = make_request(1);
        request.volume = 100;
        request.price = 1;
        assert!(adapter.submit(&request).accepted);
        let mut events = [BrokerEvent::default(); 4];
        adapter.poll_events(&mut events);
        assert_eq!(events[1].fee, 1);
    }

    #[test]
    fn invalid_new_requests_are_fatal() {
        let mut adapter = initialized(true);
        let mut request = make_request(1);
        request.volume = 0;
        assert_eq!(adapter.submit(&request), SendResult::fatal_error(-102));

        let mut request = make_request(0);
        request.internal_order_id = 0;
        assert_eq!(adapter.submit(&request), SendResult::fatal_error(-101));
    }

    #[test]
    fn cancel_acknowledges_and_finishes() {
        let mut adapter = initialized(true);
        let mut cancel = BrokerOrderRequest {
            internal_order_id: 6001,
            orig_internal_order_id: 5001,
            request_type: RequestType::Cancel,
            ..BrokerOrderRequest::default()
        };
        assert!(adapter.submit(&cancel).accepted);

        cancel.orig_internal_order_id = 0;
        assert_eq!(adapter.submit(&cancel), SendResult::fatal_error(-103));

        let mut events = [BrokerEvent::default(); 4];
        let count = adapter.poll_events(&mut events);
        assert_eq!(count, 2);
        assert_eq!(events[0].kind, EventKind::BrokerAccepted);
        assert_eq!(events[1].kind, EventKind::Finished);
    }

    #[test]
    fn poll_respects_buffer_capacity() {
        let mut adapter = initialized(true);
        assert!(adapter.submit(&make_request(1)).accepted);
        let mut events = [BrokerEvent::default(); 2];
        assert_eq!(adapter.poll_events(&mut events), 2);
        assert_eq!(adapter.poll_events(&mut events), 1);
        assert_eq!(adapter.poll_events(&mut events), 0);
    }
}
