//! Router behaviour observed from outside the crate.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use proptest::prelude::*;
use taskweave_scheduler::{
    current_worker, hash_to_region, Domain, DomainRouter, EntityId, LocationKey,
    PeriodicFailurePolicy, RouterState, SchedulerConfig, SharedRegionTable, TaskHandle,
    TickGranularity, Unresolved, WorkerId,
};
use tokio::sync::oneshot;

fn regions_with(world: &str) -> SharedRegionTable {
    let regions = SharedRegionTable::from_config(&SchedulerConfig::default());
    regions.load_world(world);
    regions
}

/// Submit a task that reports the worker it ran on.
async fn worker_for(router: &DomainRouter, domain: &Domain) -> Option<WorkerId> {
    let (tx, rx) = oneshot::channel();
    router
        .submit(domain, move || {
            let _ = tx.send(current_worker());
            Ok(())
        })
        .unwrap();
    rx.await.unwrap()
}

#[tokio::test]
async fn entity_follows_its_region() {
    let regions = regions_with("world");
    let router = DomainRouter::start(SchedulerConfig::default(), Arc::new(regions.clone())).unwrap();
    let entity = EntityId::random();
    let domain = Domain::Entity(entity);

    let here = LocationKey::new("world", 0, 0);
    let there = LocationKey::new("world", 3, -7);
    regions.place_entity(entity, here.clone());
    assert_eq!(
        worker_for(&router, &domain).await,
        Some(WorkerId::Region(hash_to_region(&here, 64)))
    );

    regions.place_entity(entity, there.clone());
    assert_eq!(
        worker_for(&router, &domain).await,
        Some(WorkerId::Region(hash_to_region(&there, 64)))
    );

    regions.unload_world("world");
    assert_eq!(worker_for(&router, &domain).await, Some(WorkerId::Global));
    assert_eq!(router.active_regions().len(), 2);
}

#[tokio::test]
async fn work_on_one_domain_is_fifo_across_submitters() {
    let router = DomainRouter::start(
        SchedulerConfig::default(),
        Arc::new(regions_with("world")),
    )
    .unwrap();
    let chunk = Domain::Location(LocationKey::new("world", 2, 2));
    let log = Arc::new(Mutex::new(Vec::new()));

    let mut submitters = Vec::new();
    for s in 0..4 {
        let router = router.clone();
        let chunk = chunk.clone();
        let log = Arc::clone(&log);
        submitters.push(tokio::spawn(async move {
            for i in 0..25 {
                let log = Arc::clone(&log);
                router
                    .submit(&chunk, move || {
                        log.lock().push((s, i));
                        Ok(())
                    })
                    .unwrap();
            }
        }));
    }
    for submitter in submitters {
        submitter.await.unwrap();
    }
    worker_for(&router, &chunk).await;

    let log = log.lock();
    assert_eq!(log.len(), 100);
    for s in 0..4 {
        let order: Vec<_> = log.iter().filter(|(who, _)| *who == s).map(|(_, i)| *i).collect();
        assert_eq!(order, (0..25).collect::<Vec<_>>());
    }
}

#[tokio::test]
async fn is_running_only_inside_body() {
    let router = DomainRouter::start(SchedulerConfig::default(), Arc::new(Unresolved)).unwrap();
    let slot: Arc<Mutex<Option<TaskHandle>>> = Arc::new(Mutex::new(None));
    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
    let (inside_tx, inside_rx) = oneshot::channel();

    let body_slot = Arc::clone(&slot);
    let handle = router
        .submit_delayed(
            &Domain::Background,
            move || {
                let running = body_slot.lock().as_ref().map(TaskHandle::is_running);
                let _ = inside_tx.send(running);
                let _ = release_rx.recv();
                Ok(())
            },
            Duration::from_millis(50),
        )
        .unwrap();
    *slot.lock() = Some(handle.clone());
    assert!(!handle.is_running());

    assert_eq!(inside_rx.await.unwrap(), Some(true));
    assert!(handle.is_running());
    release_tx.send(()).unwrap();

    while router.pending_count() > 0 {
        tokio::task::yield_now().await;
    }
    assert!(!handle.is_running());
}

#[tokio::test]
async fn background_periodic_stops_after_cancel() {
    let router = DomainRouter::start(SchedulerConfig::default(), Arc::new(Unresolved)).unwrap();
    let fired = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&fired);
    let handle = router
        .submit_periodic(
            &Domain::Background,
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            Duration::ZERO,
            Duration::from_millis(50),
        )
        .unwrap();

    while fired.load(Ordering::SeqCst) < 3 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    handle.cancel();
    tokio::time::sleep(Duration::from_millis(200)).await;
    let settled = fired.load(Ordering::SeqCst);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(fired.load(Ordering::SeqCst), settled);
    assert_eq!(router.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancel_policy_stops_failing_periodic() {
    let router = DomainRouter::start(
        SchedulerConfig {
            periodic_failure: PeriodicFailurePolicy::Cancel,
            ..SchedulerConfig::default()
        },
        Arc::new(Unresolved),
    )
    .unwrap();
    let fired = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&fired);
    let handle = router
        .submit_periodic(
            &Domain::Global,
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("disk full")
            },
            Duration::ZERO,
            Duration::from_millis(50),
        )
        .unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(handle.is_cancelled());
    assert!(router.task(handle.id()).is_none());
}

#[tokio::test]
async fn shutdown_default_stops_region_workers() {
    let router =
        DomainRouter::start(SchedulerConfig::default(), Arc::new(regions_with("world"))).unwrap();
    worker_for(&router, &Domain::Location(LocationKey::new("world", 9, 9))).await;
    assert_eq!(router.active_regions().len(), 1);

    assert!(router.shutdown_default().await);
    assert_eq!(router.state(), RouterState::Stopped);
    assert!(!router.is_running());
}

#[tokio::test(start_paused = true)]
async fn huge_period_does_not_stall_the_global_worker() {
    let router = DomainRouter::start(SchedulerConfig::default(), Arc::new(Unresolved)).unwrap();
    let fired = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&fired);
    let handle = router
        .submit_periodic(
            &Domain::Global,
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            Duration::ZERO,
            Duration::MAX,
        )
        .unwrap();

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(worker_for(&router, &Domain::Global).await, Some(WorkerId::Global));

    handle.cancel();
    assert!(router.shutdown_default().await);
}

#[tokio::test(start_paused = true)]
async fn periodic_on_location_runs_on_its_region() {
    let router =
        DomainRouter::start(SchedulerConfig::default(), Arc::new(regions_with("world"))).unwrap();
    let chunk = LocationKey::new("world", 3, -7);
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&seen);
    let handle = router
        .submit_periodic(
            &Domain::Location(chunk.clone()),
            move || {
                log.lock().push(current_worker());
                Ok(())
            },
            Duration::ZERO,
            Duration::from_millis(100),
        )
        .unwrap();
    let region = WorkerId::Region(hash_to_region(&chunk, 64));
    assert_eq!(handle.domain(), region);

    tokio::time::sleep(Duration::from_millis(350)).await;
    handle.cancel();
    tokio::time::sleep(Duration::from_millis(500)).await;

    let seen = seen.lock();
    assert_eq!(seen.len(), 4);
    assert!(seen.iter().all(|worker| *worker == Some(region)));
    assert_eq!(router.pending_count(), 0);
}

proptest! {
    #[test]
    fn delays_round_up_to_whole_ticks(ms in 0_u64..10_000) {
        let tick = TickGranularity::default();
        let aligned = tick.align(Duration::from_millis(ms));
        prop_assert!(aligned >= Duration::from_millis(ms));
        prop_assert!(aligned < Duration::from_millis(ms) + tick.tick());
        prop_assert_eq!(aligned.as_millis() % 50, 0);
    }
}
