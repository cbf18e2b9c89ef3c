//! Router scenarios: split fan-out, partial queue-full latching, and
//! cancel fan-out over a split parent.

use account_service_rs::order::{
    Market, OrderBook, OrderEntry, OrderRequest, OrderRouter, OrderStatus, OrderType, SplitConfig,
    SplitStrategy, TradeSide,
};
use account_service_rs::shm::{
    DownstreamShmLayout, OrdersShm, Shm, ShmManager, ShmMode, SlotSource, SlotStage,
};

struct Rig {
    _dir: tempfile::TempDir,
    downstream: Shm<DownstreamShmLayout>,
    orders: OrdersShm,
}

fn open_rig() -> Rig {
    let dir = tempfile::tempdir().unwrap();
    let manager = ShmManager::with_base_dir(dir.path());
    Rig {
        downstream: manager
            .open_downstream("/downstream_order_shm", ShmMode::Create)
            .unwrap(),
        orders: manager
            .open_orders("/orders_shm", "20260801", 4096, ShmMode::Create)
            .unwrap(),
        _dir: dir,
    }
}

fn split_config() -> SplitConfig {
    SplitConfig {
        strategy: SplitStrategy::FixedSize,
        max_child_volume: 100,
        min_child_volume: 1,
        max_child_count: 16,
        ..SplitConfig::default()
    }
}

fn make_parent(rig: &Rig, book: &OrderBook, volume: u64) -> OrderEntry {
    let mut request = OrderRequest::new();
    request.init_new(
        "000001",
        "SZ.000001".into(),
        book.next_order_id(),
        TradeSide::Buy,
        Market::Sz,
        volume,
        1000,
        93_000_000,
    );
    request.order_status = OrderStatus::RiskControllerAccepted;

    let index = rig
        .orders
        .append(
            &request,
            SlotStage::UpstreamDequeued,
            SlotSource::Strategy,
            account_service_rs::common::now_ns(),
        )
        .unwrap();
    let entry = OrderEntry::from_request(request, index);
    assert!(book.add_order(&entry));
    entry
}

#[test]
fn small_order_routes_without_splitting() {
    let rig = open_rig();
    let book = OrderBook::new();
    let mut router = OrderRouter::new(&book, &rig.downstream, &rig.orders, split_config());

    let parent = make_parent(&rig, &book, 100);
    assert!(router.route_order(&parent));

    let mut index = 0u32;
    assert!(rig.downstream.order_queue.try_pop(&mut index));
    assert_eq!(index, parent.shm_order_index);
    assert!(!rig.downstream.order_queue.try_pop(&mut index));

    assert!(book.get_children(parent.request.internal_order_id).is_empty());
    assert_eq!(
        book.get_order(parent.request.internal_order_id)
            .unwrap()
            .request
            .order_status,
        OrderStatus::TraderSubmitted
    );
    assert_eq!(router.stats().orders_sent, 1);
}

#[test]
fn split_parent_fans_out_children() {
    let rig = open_rig();
    let book = OrderBook::new();
    let mut router = OrderRouter::new(&book, &rig.downstream, &rig.orders, split_config());

    let parent = make_parent(&rig, &book, 250);
    let parent_id = parent.request.internal_order_id;
    assert!(router.route_order(&parent));

    let children = book.get_children(parent_id);
    assert_eq!(children.len(), 3);

    // Downstream carries three child slots, none of them the parent's.
    let mut downstream_ids = std::collections::HashSet::new();
    let mut index = 0u32;
    while rig.downstream.order_queue.try_pop(&mut index) {
        assert_ne!(index, parent.shm_order_index);
        let snapshot = rig.orders.read_snapshot(index).unwrap();
        assert_eq!(snapshot.request.order_type, OrderType::New);
        assert_eq!(snapshot.source, SlotSource::AccountInternal);
        downstream_ids.insert(snapshot.request.internal_order_id);
    }
    assert_eq!(
        downstream_ids,
        children.iter().copied().collect::<std::collections::HashSet<_>>()
    );

    // Volumes partition the parent.
    let volumes: u64 = children
        .iter()
        .map(|&id| book.get_order(id).unwrap().request.volume_entrust)
        .sum();
    assert_eq!(volumes, 250);

    for &child_id in &children {
        let child = book.get_order(child_id).unwrap();
        assert!(child.is_split_child);
        assert_eq!(child.parent_order_id, parent_id);
        assert_eq!(child.request.order_status, OrderStatus::TraderSubmitted);
    }
    assert_eq!(
        book.get_order(parent_id).unwrap().request.order_status,
        OrderStatus::TraderSubmitted
    );
    assert_eq!(router.stats().orders_split, 1);
    assert_eq!(router.stats().orders_sent, 3);
}

#[test]
fn queue_full_during_split_latches_parent_error() {
    let rig = open_rig();
    let book = OrderBook::new();
    let mut router = OrderRouter::new(&book, &rig.downstream, &rig.orders, split_config());

    // Leave room for exactly one more element.
    let capacity = account_service_rs::shm::DOWNSTREAM_QUEUE_CAPACITY - 1;
    for filler in 0..(capacity - 1) as u32 {
        assert!(rig.downstream.order_queue.try_push(&filler));
    }

    let parent = make_parent(&rig, &book, 300);
    let parent_id = parent.request.internal_order_id;

    // One child fits, the rest hit the full queue.
    assert!(router.route_order(&parent));

    let children = book.get_children(parent_id);
    assert_eq!(children.len(), 3);

    let mut submitted = 0;
    let mut errored = 0;
    for &child_id in &children {
        match book.get_order(child_id).unwrap().request.order_status {
            OrderStatus::TraderSubmitted => submitted += 1,
            OrderStatus::TraderError => errored += 1,
            other => panic!("unexpected child status {other:?}"),
        }
    }
    assert_eq!(submitted, 1);
    assert_eq!(errored, 2);

    // The parent error is latched and sticky.
    assert_eq!(
        book.get_order(parent_id).unwrap().request.order_status,
        OrderStatus::TraderError
    );
    assert!(book.update_status(children[0], OrderStatus::Finished));
    assert_eq!(
        book.get_order(parent_id).unwrap().request.order_status,
        OrderStatus::TraderError
    );

    assert_eq!(router.stats().queue_full_count, 2);

    // The failed children's slots record the push failure.
    let mut failed_stage_count = 0;
    for &child_id in &children {
        let child = book.get_order(child_id).unwrap();
        let snapshot = rig.orders.read_snapshot(child.shm_order_index).unwrap();
        if snapshot.stage == SlotStage::QueuePushFailed {
            failed_stage_count += 1;
        }
    }
    assert_eq!(failed_stage_count, 2);
}

#[test]
fn cancel_of_split_parent_fans_out_per_child() {
    let rig = open_rig();
    let book = OrderBook::new();
    let mut router = OrderRouter::new(&book, &rig.downstream, &rig.orders, split_config());

    let parent = make_parent(&rig, &book, 300);
    let parent_id = parent.request.internal_order_id;
    assert!(router.route_order(&parent));

    let children: std::collections::HashSet<_> =
        book.get_children(parent_id).into_iter().collect();
    assert_eq!(children.len(), 3);

    // Drain the three child submissions.
    let mut index = 0u32;
    while rig.downstream.order_queue.try_pop(&mut index) {}

    let cancel_id = book.next_order_id();
    assert!(router.route_cancel(parent_id, cancel_id, 93_100_000));

    // Three cancels, each targeting a distinct child, each a child of the
    // parent in the book.
    let mut cancelled = std::collections::HashSet::new();
    let mut first_cancel_seen = false;
    while rig.downstream.order_queue.try_pop(&mut index) {
        let snapshot = rig.orders.read_snapshot(index).unwrap();
        assert_eq!(snapshot.request.order_type, OrderType::Cancel);
        cancelled.insert(snapshot.request.orig_internal_order_id);
        if snapshot.request.internal_order_id == cancel_id {
            first_cancel_seen = true;
        }

        let entry = book.get_order(snapshot.request.internal_order_id).unwrap();
        assert!(entry.is_split_child);
        assert_eq!(entry.parent_order_id, parent_id);
        assert_eq!(entry.request.order_status, OrderStatus::TraderSubmitted);
    }
    assert_eq!(cancelled, children);
    assert!(first_cancel_seen);
}

#[test]
fn cancel_of_plain_order_is_single() {
    let rig = open_rig();
    let book = OrderBook::new();
    let mut router = OrderRouter::new(&book, &rig.downstream, &rig.orders, split_config());

    let order = make_parent(&rig, &book, 100);
    let order_id = order.request.internal_order_id;
    assert!(router.route_order(&order));
    let mut index = 0u32;
    assert!(rig.downstream.order_queue.try_pop(&mut index));

    let cancel_id = book.next_order_id();
    assert!(router.route_cancel(order_id, cancel_id, 93_100_000));

    assert!(rig.downstream.order_queue.try_pop(&mut index));
    let snapshot = rig.orders.read_snapshot(index).unwrap();
    assert_eq!(snapshot.request.internal_order_id, cancel_id);
    assert_eq!(snapshot.request.orig_internal_order_id, order_id);
    assert!(!rig.downstream.order_queue.try_pop(&mut index));
}

#[test]
fn cancel_skips_terminal_children() {
    let rig = open_rig();
    let book = OrderBook::new();
    let mut router = OrderRouter::new(&book, &rig.downstream, &rig.orders, split_config());

    let parent = make_parent(&rig, &book, 300);
    let parent_id = parent.request.internal_order_id;
    assert!(router.route_order(&parent));
    let children = book.get_children(parent_id);

    // One child already finished; it must not receive a cancel.
    assert!(book.update_status(children[0], OrderStatus::Finished));
    let mut index = 0u32;
    while rig.downstream.order_queue.try_pop(&mut index) {}

    let cancel_id = book.next_order_id();
    assert!(router.route_cancel(parent_id, cancel_id, 93_100_000));

    let mut cancelled = Vec::new();
    while rig.downstream.order_queue.try_pop(&mut index) {
        let snapshot = rig.orders.read_snapshot(index).unwrap();
        cancelled.push(snapshot.request.orig_internal_order_id);
    }
    assert_eq!(cancelled.len(), 2);
    assert!(!cancelled.contains(&children[0]));
}

#[test]
fn missing_slot_index_fails_routing() {
    let rig = open_rig();
    let book = OrderBook::new();
    let mut router = OrderRouter::new(&book, &rig.downstream, &rig.orders, split_config());

    let mut request = OrderRequest::new();
    request.init_new(
        "000001",
        "SZ.000001".into(),
        book.next_order_id(),
        TradeSide::Buy,
        Market::Sz,
        50,
        1000,
        93_000_000,
    );
    let entry = OrderEntry::from_request(request, account_service_rs::shm::INVALID_ORDER_INDEX);
    assert!(book.add_order(&entry));

    assert!(!router.route_order(&entry));
    assert_eq!(
        book.get_order(request.internal_order_id)
            .unwrap()
            .request
            .order_status,
        OrderStatus::TraderError
    );
    assert_eq!(router.stats().orders_rejected, 1);
}
