//! Mapping between order-pool slots, broker requests, and trade responses.

use crate::common::now_ns;
use crate::gateway::adapter::{
    BrokerEvent, BrokerMarket, BrokerOrderRequest, BrokerSide, EventKind, RequestType,
};
use crate::order::{Market, OrderRequest, OrderStatus, OrderType, TradeSide};
use crate::shm::TradeResponse;

/// Order side → broker side.
pub fn to_broker_side(side: TradeSide) -> BrokerSide {
    match side {
        TradeSide::Buy => BrokerSide::Buy,
        TradeSide::Sell => BrokerSide::Sell,
        TradeSide::NotSet => BrokerSide::Unknown,
    }
}

/// Broker side → order side.
pub fn to_order_side(side: BrokerSide) -> TradeSide {
    match side {
        BrokerSide::Buy => TradeSide::Buy,
        BrokerSide::Sell => TradeSide::Sell,
        BrokerSide::Unknown => TradeSide::NotSet,
    }
}

fn to_broker_request_type(order_type: OrderType) -> RequestType {
    match order_type {
        OrderType::New => RequestType::New,
        OrderType::Cancel => RequestType::Cancel,
        _ => RequestType::Unknown,
    }
}

fn to_broker_market(market: Market) -> BrokerMarket {
    match market {
        Market::Sz => BrokerMarket::Sz,
        Market::Sh => BrokerMarket::Sh,
        Market::Bj => BrokerMarket::Bj,
        Market::Hk => BrokerMarket::Hk,
        _ => BrokerMarket::Unknown,
    }
}

/// Map a slot request to a broker request. Returns `None` for requests a
/// broker cannot act on: zero id, unknown type, or a `New` missing side,
/// market, volume, price, or security.
pub fn map_order_request_to_broker(request: &OrderRequest) -> Option<BrokerOrderRequest> {
    if request.internal_order_id == 0 {
        return None;
    }
    let request_type = to_broker_request_type(request.order_type);
    if request_type == RequestType::Unknown {
        return None;
    }

    let mapped = BrokerOrderRequest {
        internal_order_id: request.internal_order_id,
        orig_internal_order_id: request.orig_internal_order_id,
        request_type,
        trade_side: to_broker_side(request.trade_side),
        market: to_broker_market(request.market),
        volume: request.volume_entrust,
        price: request.dprice_entrust,
        md_time: if request.md_time_entrust != 0 {
            request.md_time_entrust
        } else {
            request.md_time_driven
        },
        security_id: request.security_id,
        internal_security_id: request.internal_security_id,
    };

    if mapped.request_type == RequestType::New
        && (mapped.trade_side == BrokerSide::Unknown
            || mapped.market == BrokerMarket::Unknown
            || mapped.volume == 0
            || mapped.price == 0
            || mapped.security_id.is_empty())
    {
        return None;
    }

    Some(mapped)
}

/// Event kind → resulting order status. `None` and anything unrecognized
/// yield no status; callers drop such events.
pub fn map_event_kind_to_status(kind: EventKind) -> Option<OrderStatus> {
    match kind {
        EventKind::BrokerAccepted => Some(OrderStatus::BrokerAccepted),
        EventKind::BrokerRejected => Some(OrderStatus::BrokerRejected),
        EventKind::MarketRejected => Some(OrderStatus::MarketRejected),
        EventKind::Trade => Some(OrderStatus::MarketAccepted),
        EventKind::Finished => Some(OrderStatus::Finished),
        EventKind::None => None,
    }
}

/// Map a broker event to a trade response. Returns `None` for events with
/// no order id or no recognizable status.
pub fn map_broker_event_to_trade_response(event: &BrokerEvent) -> Option<TradeResponse> {
    if event.internal_order_id == 0 {
        return None;
    }
    let new_status = map_event_kind_to_status(event.kind)?;

    let mut response = TradeResponse::new();
    response.internal_order_id = event.internal_order_id;
    response.broker_order_id = event.broker_order_id;
    response.internal_security_id = event.internal_security_id;
    response.trade_side = to_order_side(event.trade_side);
    response.new_status = new_status;
    response.volume_traded = event.volume_traded;
    response.dprice_traded = event.price_traded;
    response.dvalue_traded = event.value_traded;
    response.dfee = event.fee;
    response.md_time_traded = event.md_time_traded;
    // Local receive time as a fallback when the broker supplied none.
    response.recv_time_ns = if event.recv_time_ns != 0 {
        event.recv_time_ns
    } else {
        now_ns()
    };
    Some(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_new_request() -> OrderRequest {
        let mut request = OrderRequest::new();
        request.init_new(
            "000001",
            "SZ.000001".into(),
            5001,
            TradeSide::Buy,
            Market::Sz,
            100,
            1000,
            93_000_000,
        );
        request
    }

    #[test]
    fn maps_new_requests_field_by_field() {
        let request = make_new_request();
        let mapped = map_order_request_to_broker(&request).unwrap();
        assert_eq!(mapped.internal_order_id, 5001);
        assert_eq!(mapped.request_type, RequestType::New);
        assert_eq!(mapped.trade_side, BrokerSide::Buy);
        assert_eq!(mapped.market, BrokerMarket::Sz);
        assert_eq!(mapped.volume, 100);
        assert_eq!(mapped.price, 1000);
        assert_eq!(mapped.md_time, 93_000_000);
        assert_eq!(mapped.security_id, "000001");
        assert_eq!(mapped.internal_security_id, "SZ.000001");
    }

    #[test]
    fn rejects_unroutable_requests() {
        let mut request = make_new_request();
        request.internal_order_id = 0;
        assert!(map_order_request_to_broker(&request).is_none());

        let mut request = make_new_request();
        request.order_type = OrderType::NotSet;
        assert!(map_order_request_to_broker(&request).is_none());

        let mut request = make_new_request();
        request.volume_entrust = 0;
        assert!(map_order_request_to_broker(&request).is_none());

        let mut request = make_new_request();
        request.security_id.clear();
        assert!(map_order_request_to_broker(&request).is_none());
    }

    #[test]
    fn cancels_map_without_new_order_fields() {
        let mut cancel = OrderRequest::new();
        cancel.init_cancel(6001, 93_100_000, 5001);
        let mapped = map_order_request_to_broker(&cancel).unwrap();
        assert_eq!(mapped.request_type, RequestType::Cancel);
        assert_eq!(mapped.orig_internal_order_id, 5001);
        assert_eq!(mapped.volume, 0);
    }

    #[test]
    fn status_mapping_is_total_and_injective() {
        let mapped: Vec<OrderStatus> = [
            EventKind::BrokerAccepted,
            EventKind::BrokerRejected,
            EventKind::MarketRejected,
            EventKind::Trade,
            EventKind::Finished,
        ]
        .iter()
        .map(|&kind| map_event_kind_to_status(kind).unwrap())
        .collect();

        assert_eq!(
            mapped,
            vec![
                OrderStatus::BrokerAccepted,
                OrderStatus::BrokerRejected,
                OrderStatus::MarketRejected,
                OrderStatus::MarketAccepted,
                OrderStatus::Finished,
            ]
        );
        // injective: all distinct
        let mut unique = mapped.clone();
        unique.dedup();
        assert_eq!(unique.len(), mapped.len());

        assert!(map_event_kind_to_status(EventKind::None).is_none());
    }

    #[test]
    fn event_with_zero_order_id_is_dropped() {
        let event = BrokerEvent {
            kind: EventKind::Trade,
            ..BrokerEvent::default()
        };
        assert!(map_broker_event_to_trade_response(&event).is_none());
    }

    #[test]
    fn trade_event_becomes_market_accepted_response() {
        let event = BrokerEvent {
            kind: EventKind::Trade,
            internal_order_id: 5001,
            broker_order_id: 42,
            internal_security_id: "SZ.000001".into(),
            trade_side: BrokerSide::Buy,
            volume_traded: 100,
            price_traded: 1000,
            value_traded: 100_000,
            fee: 10,
            md_time_traded: 93_000_500,
            recv_time_ns: 777,
        };
        let response = map_broker_event_to_trade_response(&event).unwrap();
        assert_eq!(response.new_status, OrderStatus::MarketAccepted);
        assert_eq!(response.volume_traded, 100);
        assert_eq!(response.dvalue_traded, 100_000);
        assert_eq!(response.trade_side, TradeSide::Buy);
        assert_eq!(response.recv_time_ns, 777);
    }

    #[test]
    fn missing_receive_time_falls_back_to_local_clock() {
        let event = BrokerEvent {
            kind: EventKind::Finished,
            internal_order_id: 5001,
            ..BrokerEvent::default()
        };
        let response = map_broker_event_to_trade_response(&event).unwrap();
        assert!(response.recv_time_ns > 0);
    }
}
