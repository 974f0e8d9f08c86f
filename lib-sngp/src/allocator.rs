//! Point Allocator
//!
//! Converts external point events into participation rows against the open
//! pool of a category. Each allocation is clipped to the pool's remaining
//! capacity, so re-delivering an event can never overfill a pool.
//!
//! The allocation that takes the last point promotes the pool's run to
//! `WaitForConfirmation` and, unless the category is perpetual, closes the
//! pool.

use std::collections::BTreeMap;

use chrono::Utc;

use crate::error::{SngpError, SngpResult};
use crate::participation::{self, ParticipationRecord};
use crate::pools;
use crate::runs::{self, DistributionRun};
use crate::storage::SledStore;
use crate::types::{MachineId, ParticipationStatus, PoolCategory, PoolStatus, RecordId, UserId};

/// One external point event
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationRequest {
    pub user_id: UserId,
    pub category: PoolCategory,
    pub points: u64,
    pub machine_id: Option<MachineId>,
    pub remark: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl AllocationRequest {
    pub fn new(user_id: UserId, category: PoolCategory, points: u64) -> Self {
        Self {
            user_id,
            category,
            points,
            machine_id: None,
            remark: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_machine(mut self, machine: MachineId) -> Self {
        self.machine_id = Some(machine);
        self
    }

    pub fn with_remark(mut self, remark: impl Into<String>) -> Self {
        self.remark = Some(remark.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Allocation {
    pub record: ParticipationRecord,
    pub requested: u64,
    /// Points were cut to the remaining capacity
    pub clipped: bool,
    /// Set when this allocation exhausted the pool
    pub exhausted_run: Option<DistributionRun>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AllocationOutcome {
    Allocated(Allocation),
    /// No open pool with capacity; not an error
    NothingToAllocate,
}

impl AllocationOutcome {
    pub fn allocation(&self) -> Option<&Allocation> {
        match self {
            AllocationOutcome::Allocated(allocation) => Some(allocation),
            AllocationOutcome::NothingToAllocate => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PointAllocator {
    store: SledStore,
}

impl PointAllocator {
    pub fn new(store: SledStore) -> Self {
        Self { store }
    }

    pub async fn allocate(&self, request: AllocationRequest) -> SngpResult<AllocationOutcome> {
        if request.points == 0 {
            return Err(SngpError::ZeroPoints);
        }

        let now = Utc::now();
        let mut uow = self.store.begin().await;

        let Some(mut pool) = pools::find_open(&uow, request.category, now)? else {
            tracing::debug!(category = %request.category, user_id = %request.user_id, "no open pool");
            return Ok(AllocationOutcome::NothingToAllocate);
        };

        // find_open only yields pools with capacity and an undrawn run
        let mut run = runs::require(&uow, pool.run_id)?;

        let granted = pool.consume_points(request.points, now);
        let record = ParticipationRecord {
            id: RecordId(uow.generate_id()?),
            pool_id: pool.id,
            user_id: request.user_id,
            machine_id: request.machine_id,
            points: granted,
            status: ParticipationStatus::Active,
            metadata: request.metadata,
            remark: request.remark,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        participation::insert(&mut uow, &record)?;

        let mut exhausted_run = None;
        if pool.is_exhausted() {
            let rows = participation::for_pool(&uow, pool.id)?;
            let participants = participation::unique_participants(&rows);
            run.await_confirmation(participants, now)?;
            runs::save(&mut uow, &run)?;

            if !pool.category.is_perpetual() {
                pool.status = PoolStatus::Inactive;
            }
            exhausted_run = Some(run);
        }

        pools::save(&mut uow, &pool)?;
        uow.commit()?;

        tracing::info!(
            pool_id = %pool.id,
            user_id = %record.user_id,
            requested = request.points,
            granted,
            remaining = pool.remaining_points,
            "points allocated"
        );
        if let Some(run) = &exhausted_run {
            tracing::info!(
                pool_id = %pool.id,
                run_id = %run.id,
                participants = run.participant_count,
                pool_status = %pool.status,
                "pool exhausted, awaiting distribution"
            );
        }

        Ok(AllocationOutcome::Allocated(Allocation {
            record,
            requested: request.points,
            clipped: granted < request.points,
            exhausted_run,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    use crate::pools::{NewPool, PoolRegistry};
    use crate::types::RunStatus;

    async fn setup(category: PoolCategory, total_points: u64) -> (SledStore, PointAllocator, pools::Pool) {
        let store = SledStore::open_temporary().unwrap();
        let pool = PoolRegistry::new(store.clone())
            .create_pool(NewPool {
                name: "alloc".to_string(),
                category,
                total_points,
                reward_amount: dec!(100),
                multiplier: dec!(2),
                start_date: Utc::now() - chrono::Duration::minutes(1),
                is_primary_activity: false,
            })
            .await
            .unwrap();
        (store.clone(), PointAllocator::new(store), pool)
    }

    #[tokio::test]
    async fn test_zero_points_rejected() {
        let (_store, allocator, _pool) = setup(PoolCategory::Country, 10).await;
        let err = allocator
            .allocate(AllocationRequest::new(UserId(1), PoolCategory::Country, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, SngpError::ZeroPoints));
    }

    #[tokio::test]
    async fn test_no_open_pool_is_not_an_error() {
        let (_store, allocator, _pool) = setup(PoolCategory::Country, 10).await;
        let outcome = allocator
            .allocate(AllocationRequest::new(UserId(1), PoolCategory::GlobalActivity, 5))
            .await
            .unwrap();
        assert_eq!(outcome, AllocationOutcome::NothingToAllocate);
    }

    #[tokio::test]
    async fn test_exhausting_allocation_is_clipped_and_closes_country_pool() {
        let (store, allocator, pool) = setup(PoolCategory::Country, 100).await;

        allocator
            .allocate(AllocationRequest::new(UserId(1), PoolCategory::Country, 60))
            .await
            .unwrap();
        let outcome = allocator
            .allocate(AllocationRequest::new(UserId(2), PoolCategory::Country, 70).with_machine(MachineId(9)))
            .await
            .unwrap();

        let allocation = outcome.allocation().unwrap();
        assert_eq!(allocation.record.points, 40);
        assert!(allocation.clipped);
        let run = allocation.exhausted_run.as_ref().unwrap();
        assert_eq!(run.status, RunStatus::WaitForConfirmation);
        assert_eq!(run.participant_count, 2);

        let stored = pools::require(&store, pool.id).unwrap();
        assert_eq!(stored.remaining_points, 0);
        assert_eq!(stored.status, PoolStatus::Inactive);
        assert_eq!(runs::require(&store, pool.run_id).unwrap().status, RunStatus::WaitForConfirmation);

        let after = allocator
            .allocate(AllocationRequest::new(UserId(3), PoolCategory::Country, 1))
            .await
            .unwrap();
        assert_eq!(after, AllocationOutcome::NothingToAllocate);
    }

    #[tokio::test]
    async fn test_perpetual_pool_stays_active_when_exhausted() {
        let (store, allocator, pool) = setup(PoolCategory::GlobalActivity, 10).await;

        let outcome = allocator
            .allocate(AllocationRequest::new(UserId(1), PoolCategory::GlobalActivity, 10))
            .await
            .unwrap();
        assert!(outcome.allocation().unwrap().exhausted_run.is_some());

        let stored = pools::require(&store, pool.id).unwrap();
        assert_eq!(stored.status, PoolStatus::Active);
        assert_eq!(
            allocator
                .allocate(AllocationRequest::new(UserId(1), PoolCategory::GlobalActivity, 1))
                .await
                .unwrap(),
            AllocationOutcome::NothingToAllocate
        );
    }
}
