//! Point allocation and read-query integration tests

mod common;

use proptest::prelude::*;
use rust_decimal_macros::dec;

use common::*;
use lib_sngp::testing::StaticNodeActivity;
use lib_sngp::*;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_remaining_points_stay_within_capacity(
        total in 1u64..500,
        events in prop::collection::vec((1u64..4, 1u64..200), 1..30),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let service = service(StaticNodeActivity::new());
            let pool = service
                .create_pool(pool_terms(PoolCategory::GlobalActivity, total, dec!(100), dec!(2)))
                .await
                .unwrap();

            let mut granted = 0u64;
            let mut exhaustions = 0;
            for (user, points) in events {
                if let AllocationOutcome::Allocated(allocation) = service
                    .allocate(AllocationRequest::new(UserId(user), PoolCategory::GlobalActivity, points))
                    .await
                    .unwrap()
                {
                    assert!(allocation.record.points <= points);
                    granted += allocation.record.points;
                    if allocation.exhausted_run.is_some() {
                        exhaustions += 1;
                    }
                }

                let stored = service.get_pool(pool.id).unwrap();
                assert!(stored.remaining_points <= stored.total_points);
                assert_eq!(stored.total_points - stored.remaining_points, granted);
            }

            let rows = service
                .participation_history(
                    &ParticipationFilter { pool_id: Some(pool.id), ..Default::default() },
                    PageRequest::first(100),
                )
                .unwrap();
            assert_eq!(rows.items.iter().map(|r| r.points).sum::<u64>(), granted);
            assert!(granted <= total);
            assert!(exhaustions <= 1);
        });
    }
}

#[tokio::test]
async fn test_future_and_deleted_pools_receive_nothing() {
    let service = service(StaticNodeActivity::new());

    let mut terms = pool_terms(PoolCategory::Country, 100, dec!(10), dec!(1));
    terms.start_date = chrono::Utc::now() + chrono::Duration::days(1);
    service.create_pool(terms).await.unwrap();
    assert_eq!(
        service
            .allocate(AllocationRequest::new(ALICE, PoolCategory::Country, 5))
            .await
            .unwrap(),
        AllocationOutcome::NothingToAllocate
    );

    let open = standard_pool(&service).await;
    allocate(&service, ALICE, PoolCategory::Country, 5).await;
    service.soft_delete_pool(open.id).await.unwrap();
    assert_eq!(
        service
            .allocate(AllocationRequest::new(ALICE, PoolCategory::Country, 5))
            .await
            .unwrap(),
        AllocationOutcome::NothingToAllocate
    );
}

#[tokio::test]
async fn test_activity_pools_take_turns_after_each_draw() {
    let service = service(StaticNodeActivity::new().with_active(ALICE, dec!(100)));
    let first = service
        .create_pool(pool_terms(PoolCategory::GlobalActivity, 10, dec!(10), dec!(2)))
        .await
        .unwrap();

    let exhausted = allocate(&service, ALICE, PoolCategory::GlobalActivity, 10).await;
    let run = exhausted.exhausted_run.expect("first pool should be exhausted");
    service.distribute(OPERATOR, run.id, None).await.unwrap();
    assert_eq!(service.get_pool(first.id).unwrap().status, PoolStatus::Active);

    let mut terms = pool_terms(PoolCategory::GlobalActivity, 100, dec!(10), dec!(2));
    terms.start_date = chrono::Utc::now() - chrono::Duration::minutes(1);
    let second = service.create_pool(terms).await.unwrap();

    let allocation = allocate(&service, ALICE, PoolCategory::GlobalActivity, 5).await;
    assert_eq!(allocation.record.pool_id, second.id);
    assert_eq!(service.get_pool(second.id).unwrap().remaining_points, 95);
    assert_eq!(service.get_pool(first.id).unwrap().remaining_points, 0);
}

#[tokio::test]
async fn test_exhausted_activity_pool_hands_over_before_its_draw() {
    let service = service(StaticNodeActivity::new());
    let first = service
        .create_pool(pool_terms(PoolCategory::GlobalActivity, 10, dec!(10), dec!(2)))
        .await
        .unwrap();
    allocate(&service, ALICE, PoolCategory::GlobalActivity, 10).await;

    let mut terms = pool_terms(PoolCategory::GlobalActivity, 50, dec!(10), dec!(2));
    terms.start_date = chrono::Utc::now() - chrono::Duration::minutes(1);
    let second = service.create_pool(terms).await.unwrap();

    let allocation = allocate(&service, BOB, PoolCategory::GlobalActivity, 7).await;
    assert_eq!(allocation.record.pool_id, second.id);
    assert_eq!(
        service.get_run(first.run_id).unwrap().status,
        RunStatus::WaitForConfirmation
    );
}

#[tokio::test]
async fn test_allocation_keeps_provenance() {
    let service = service(StaticNodeActivity::new());
    let pool = standard_pool(&service).await;

    service
        .allocate(
            AllocationRequest::new(ALICE, PoolCategory::Country, 25)
                .with_machine(MachineId(7))
                .with_metadata("source", "miner"),
        )
        .await
        .unwrap();

    let history = service
        .participation_history(
            &ParticipationFilter {
                user_id: Some(ALICE),
                ..Default::default()
            },
            PageRequest::first(10),
        )
        .unwrap();
    assert_eq!(history.total, 1);
    let row = &history.items[0];
    assert_eq!(row.pool_id, pool.id);
    assert_eq!(row.machine_id, Some(MachineId(7)));
    assert_eq!(row.metadata.get("source").map(String::as_str), Some("miner"));
}

#[tokio::test]
async fn test_pool_and_run_listings_are_newest_first() {
    let service = service(StaticNodeActivity::new());
    let mut created = Vec::new();
    for _ in 0..5 {
        created.push(standard_pool(&service).await);
    }
    service.soft_delete_pool(created[0].id).await.unwrap();

    let first = service
        .list_pools(&PoolFilter::default(), PageRequest::new(1, 3))
        .unwrap();
    assert_eq!(first.total, 4);
    assert_eq!(first.items.len(), 3);
    assert_eq!(first.items[0].id, created[4].id);
    assert!(first.has_next());

    let second = service
        .list_pools(&PoolFilter::default(), PageRequest::new(2, 3))
        .unwrap();
    assert_eq!(second.items.len(), 1);
    assert_eq!(second.items[0].id, created[1].id);

    let pending = service
        .list_runs(
            &RunFilter {
                status: Some(RunStatus::Pending),
                ..Default::default()
            },
            PageRequest::first(10),
        )
        .unwrap();
    assert_eq!(pending.total, 4);
    assert!(pending.items.iter().all(|run| run.pool_id != created[0].id));
    assert!(matches!(
        service.get_run(created[0].run_id),
        Err(SngpError::RunNotFound(_))
    ));

    let global = service
        .list_pools(
            &PoolFilter {
                category: Some(PoolCategory::GlobalActivity),
                ..Default::default()
            },
            PageRequest::first(10),
        )
        .unwrap();
    assert_eq!(global.total, 0);
}
