//! Seqlock read stability: a monitor-style reader hammering a slot that a
//! writer keeps mutating must only ever observe coherent snapshots.

use account_service_rs::order::{Market, OrderRequest, TradeSide};
use account_service_rs::shm::{
    OrdersShm, ShmManager, ShmMode, SlotReadError, SlotSource, SlotStage,
};
use std::sync::atomic::{AtomicBool, Ordering};

fn open_pool(capacity: u32) -> (tempfile::TempDir, OrdersShm) {
    let dir = tempfile::tempdir().unwrap();
    let manager = ShmManager::with_base_dir(dir.path());
    let pool = manager
        .open_orders("/orders_shm", "20260801", capacity, ShmMode::Create)
        .unwrap();
    (dir, pool)
}

fn make_request(id: u32, volume: u64, price: u64) -> OrderRequest {
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
    request
}

#[test]
fn allocation_is_monotonic_and_bounded() {
    let (_dir, pool) = open_pool(4);

    assert!(!pool.index_exists(0));
    assert_eq!(pool.try_allocate(), Some(0));
    assert_eq!(pool.try_allocate(), Some(1));
    assert_eq!(pool.try_allocate(), Some(2));
    assert_eq!(pool.try_allocate(), Some(3));
    assert!(pool.index_exists(3));

    // The pool never reuses indices within a day; exhaustion counts.
    assert_eq!(pool.try_allocate(), None);
    assert_eq!(pool.try_allocate(), None);
    assert_eq!(
        pool.header().full_reject_count.load(Ordering::Relaxed),
        2
    );
}

#[test]
fn snapshot_round_trips_a_write() {
    let (_dir, pool) = open_pool(16);
    let request = make_request(5001, 100, 1000);
    let index = pool
        .append(&request, SlotStage::UpstreamQueued, SlotSource::Strategy, 111)
        .unwrap();

    let snapshot = pool.read_snapshot(index).unwrap();
    assert_eq!(snapshot.request, request);
    assert_eq!(snapshot.stage, SlotStage::UpstreamQueued);
    assert_eq!(snapshot.source, SlotSource::Strategy);
    assert_eq!(snapshot.last_update_ns, 111);
}

#[test]
fn unpublished_indices_are_not_found() {
    let (_dir, pool) = open_pool(16);
    assert_eq!(pool.read_snapshot(0), Err(SlotReadError::NotFound));
    assert_eq!(pool.read_snapshot(999), Err(SlotReadError::NotFound));
    assert_eq!(
        pool.read_snapshot(account_service_rs::shm::INVALID_ORDER_INDEX),
        Err(SlotReadError::NotFound)
    );
}

#[test]
fn stage_updates_are_visible_to_readers() {
    let (_dir, pool) = open_pool(16);
    let request = make_request(5001, 100, 1000);
    let index = pool
        .append(&request, SlotStage::UpstreamQueued, SlotSource::Strategy, 1)
        .unwrap();

    assert!(pool.update_stage(index, SlotStage::DownstreamQueued, 2));
    let snapshot = pool.read_snapshot(index).unwrap();
    assert_eq!(snapshot.stage, SlotStage::DownstreamQueued);
    assert_eq!(snapshot.last_update_ns, 2);

    // The request payload is untouched by stage transitions.
    assert_eq!(snapshot.request, request);
}

#[test]
fn reader_never_observes_a_torn_request() {
    let (_dir, pool) = open_pool(16);

    // Slot 7 exists among others.
    for id in 0..8u32 {
        pool.append(
            &make_request(1000 + id, 1, 1001),
            SlotStage::UpstreamQueued,
            SlotSource::Strategy,
            1,
        )
        .unwrap();
    }

    let stop = AtomicBool::new(false);

    std::thread::scope(|scope| {
        // Writer: rewrites slot 7 keeping the invariant price == volume + 1000.
        scope.spawn(|| {
            let mut round = 0u64;
            while !stop.load(Ordering::Acquire) {
                round += 1;
                let request = make_request(7007, round, round + 1000);
                pool.sync_order(7, &request, round);
            }
        });

        // Reader: every accepted snapshot satisfies the invariant.
        let mut coherent_reads = 0u64;
        let mut retries = 0u64;
        while coherent_reads < 200_000 {
            match pool.read_snapshot(7) {
                Ok(snapshot) => {
                    assert_eq!(
                        snapshot.request.dprice_entrust,
                        snapshot.request.volume_entrust + 1000,
                        "torn snapshot: volume {} price {}",
                        snapshot.request.volume_entrust,
                        snapshot.request.dprice_entrust
                    );
                    coherent_reads += 1;
                }
                Err(SlotReadError::Retry) => retries += 1,
                Err(SlotReadError::NotFound) => panic!("slot 7 vanished"),
            }
        }
        stop.store(true, Ordering::Release);

        // Retries are allowed, torn data is not.
        let _ = retries;
    });
}

#[test]
fn concurrent_readers_see_monotonic_publication() {
    let (_dir, pool) = open_pool(512);
    let total: u32 = 512;

    std::thread::scope(|scope| {
        // Writer publishes slots one by one.
        scope.spawn(|| {
            for id in 0..total {
                pool.append(
                    &make_request(id + 1, 1, 1001),
                    SlotStage::UpstreamQueued,
                    SlotSource::Strategy,
                    1,
                )
                .unwrap();
            }
        });

        // Reader: once an index is visible it stays visible, and every
        // visible slot reads coherently.
        let mut highest_seen: i64 = -1;
        loop {
            let published = pool.header().next_index.load(Ordering::Acquire);
            assert!(i64::from(published) >= highest_seen);
            highest_seen = i64::from(published);

            if published > 0 {
                let probe = published - 1;
                match pool.read_snapshot(probe) {
                    // An allocated slot may still be empty for the moment
                    // between index publication and the first write.
                    Ok(snapshot) if snapshot.stage != SlotStage::Empty => {
                        assert_eq!(snapshot.request.internal_order_id, probe + 1)
                    }
                    Ok(_) => {}
                    Err(SlotReadError::Retry) => {}
                    Err(SlotReadError::NotFound) => panic!("published slot unreadable"),
                }
            }
            if published == total {
                break;
            }
        }
    });
}
