//! Pool Registry
//!
//! Owns pool definitions: point capacity, reward budget, cap multiplier,
//! status and activation window. Pools are never physically deleted.
//!
//! **Capacity invariant:** `0 <= remaining_points <= total_points` for every
//! pool at all times. The only writer of `remaining_points` is
//! [`Pool::consume_points`], which clips to the remaining capacity.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{SngpError, SngpResult};
use crate::runs::{self, DistributionRun};
use crate::storage::{keys, Collection, SledStore, StoreRead, UnitOfWork};
use crate::types::{PoolCategory, PoolId, PoolStatus, RunId};

/// A bounded reward budget distributed proportionally to points
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pool {
    pub id: PoolId,
    pub name: String,
    pub category: PoolCategory,
    pub total_points: u64,
    pub remaining_points: u64,
    /// Budget distributed among participants
    pub reward_amount: Decimal,
    /// Cap factor applied to a user's daily reference reward
    pub multiplier: Decimal,
    pub status: PoolStatus,
    pub start_date: DateTime<Utc>,
    /// Flagged pools are excluded from country-pool claims
    pub is_primary_activity: bool,
    /// The distribution run this pool feeds
    pub run_id: RunId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Pool {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// ACTIVE, not tombstoned and already started
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.status == PoolStatus::Active && !self.is_deleted() && self.start_date <= now
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining_points == 0
    }

    pub fn allocated_points(&self) -> u64 {
        self.total_points - self.remaining_points
    }

    /// Take up to `requested` points from the remaining capacity
    ///
    /// Returns the clipped amount actually taken.
    pub fn consume_points(&mut self, requested: u64, now: DateTime<Utc>) -> u64 {
        let granted = requested.min(self.remaining_points);
        self.remaining_points -= granted;
        self.updated_at = now;
        granted
    }
}

/// Operator input for [`PoolRegistry::create_pool`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPool {
    pub name: String,
    pub category: PoolCategory,
    pub total_points: u64,
    pub reward_amount: Decimal,
    pub multiplier: Decimal,
    pub start_date: DateTime<Utc>,
    pub is_primary_activity: bool,
}

impl NewPool {
    pub fn validate(&self) -> SngpResult<()> {
        if self.name.trim().is_empty() {
            return Err(SngpError::InvalidPool("name must not be empty".to_string()));
        }
        if self.total_points == 0 {
            return Err(SngpError::InvalidPool("total_points must be greater than zero".to_string()));
        }
        if self.reward_amount <= Decimal::ZERO {
            return Err(SngpError::InvalidPool("reward_amount must be greater than zero".to_string()));
        }
        if self.multiplier <= Decimal::ZERO {
            return Err(SngpError::InvalidPool("multiplier must be greater than zero".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// DATA ACCESS
// ============================================================================

/// Live (non-tombstoned) pool by id
pub fn get<R: StoreRead>(store: &R, id: PoolId) -> SngpResult<Option<Pool>> {
    Ok(get_any(store, id)?.filter(|p| !p.is_deleted()))
}

/// Pool by id, tombstoned or not
pub fn get_any<R: StoreRead>(store: &R, id: PoolId) -> SngpResult<Option<Pool>> {
    Ok(store.get(Collection::Pools, &keys::pool_key(id))?)
}

pub fn require<R: StoreRead>(store: &R, id: PoolId) -> SngpResult<Pool> {
    get(store, id)?.ok_or(SngpError::PoolNotFound(id))
}

/// Every pool, tombstoned ones included, in id order
pub fn all<R: StoreRead>(store: &R) -> SngpResult<Vec<Pool>> {
    Ok(store.values(Collection::Pools, &[])?)
}

/// The open pool of `category` that receives new points
///
/// Pools with no remaining points or an already completed run are passed
/// over, so an exhausted perpetual pool never shadows a newer one. Among the
/// rest the earliest started wins (ties: lowest id), so older pools fill up
/// first.
pub fn find_open<R: StoreRead>(store: &R, category: PoolCategory, now: DateTime<Utc>) -> SngpResult<Option<Pool>> {
    let mut open: Option<Pool> = None;
    for pool in all(store)? {
        if pool.category != category || !pool.is_open(now) || pool.is_exhausted() {
            continue;
        }
        let drawn = runs::get(store, pool.run_id)?.map_or(true, |run| run.status.is_terminal());
        if drawn {
            continue;
        }
        let earlier = match &open {
            Some(best) => (pool.start_date, pool.id) < (best.start_date, best.id),
            None => true,
        };
        if earlier {
            open = Some(pool);
        }
    }
    Ok(open)
}

pub fn save(uow: &mut UnitOfWork, pool: &Pool) -> SngpResult<()> {
    uow.put(Collection::Pools, &keys::pool_key(pool.id), pool)?;
    Ok(())
}

// ============================================================================
// OPERATOR OPERATIONS
// ============================================================================

/// Operator-facing pool management
#[derive(Debug, Clone)]
pub struct PoolRegistry {
    store: SledStore,
}

impl PoolRegistry {
    pub fn new(store: SledStore) -> Self {
        Self { store }
    }

    /// Create an ACTIVE pool together with its PENDING distribution run
    pub async fn create_pool(&self, new_pool: NewPool) -> SngpResult<Pool> {
        new_pool.validate()?;

        let now = Utc::now();
        let mut uow = self.store.begin().await;

        let pool_id = PoolId(uow.generate_id()?);
        let run_id = RunId(uow.generate_id()?);

        let pool = Pool {
            id: pool_id,
            name: new_pool.name.trim().to_string(),
            category: new_pool.category,
            total_points: new_pool.total_points,
            remaining_points: new_pool.total_points,
            reward_amount: new_pool.reward_amount,
            multiplier: new_pool.multiplier,
            status: PoolStatus::Active,
            start_date: new_pool.start_date,
            is_primary_activity: new_pool.is_primary_activity,
            run_id,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        save(&mut uow, &pool)?;
        runs::save(&mut uow, &DistributionRun::pending(run_id, pool_id, now))?;
        uow.commit()?;

        tracing::info!(
            pool_id = %pool.id,
            run_id = %run_id,
            category = %pool.category,
            total_points = pool.total_points,
            reward_amount = %pool.reward_amount,
            "pool created"
        );

        Ok(pool)
    }

    pub fn get_pool(&self, id: PoolId) -> SngpResult<Pool> {
        require(&self.store, id)
    }

    /// Tombstone a pool; it stops receiving points and cannot be distributed
    ///
    /// An undrawn run goes with it. A completed run stays, it is the audit
    /// trail of rewards already written.
    pub async fn soft_delete_pool(&self, id: PoolId) -> SngpResult<Pool> {
        let mut uow = self.store.begin().await;
        let mut pool = require(&uow, id)?;

        let now = Utc::now();
        pool.deleted_at = Some(now);
        pool.updated_at = now;
        save(&mut uow, &pool)?;

        let mut run_tombstoned = false;
        if let Some(mut run) = runs::get(&uow, pool.run_id)? {
            if !run.status.is_terminal() {
                run.deleted_at = Some(now);
                run.updated_at = now;
                runs::save(&mut uow, &run)?;
                run_tombstoned = true;
            }
        }
        uow.commit()?;

        tracing::info!(pool_id = %id, run_id = %pool.run_id, run_tombstoned, "pool tombstoned");
        Ok(pool)
    }

    pub async fn set_primary_activity_pool(&self, id: PoolId, primary: bool) -> SngpResult<Pool> {
        let mut uow = self.store.begin().await;
        let mut pool = require(&uow, id)?;

        pool.is_primary_activity = primary;
        pool.updated_at = Utc::now();
        save(&mut uow, &pool)?;
        uow.commit()?;

        tracing::info!(pool_id = %id, primary, "primary activity flag updated");
        Ok(pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    use crate::types::{RunStatus, UserId};

    fn new_pool(category: PoolCategory, start: DateTime<Utc>) -> NewPool {
        NewPool {
            name: "Test pool".to_string(),
            category,
            total_points: 1_000,
            reward_amount: dec!(100),
            multiplier: dec!(2),
            start_date: start,
            is_primary_activity: false,
        }
    }

    #[test]
    fn test_consume_points_clips_to_remaining() {
        let now = Utc::now();
        let mut pool = Pool {
            id: PoolId(1),
            name: "p".to_string(),
            category: PoolCategory::Country,
            total_points: 100,
            remaining_points: 30,
            reward_amount: dec!(10),
            multiplier: dec!(1),
            status: PoolStatus::Active,
            start_date: now,
            is_primary_activity: false,
            run_id: RunId(2),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };

        assert_eq!(pool.consume_points(20, now), 20);
        assert_eq!(pool.remaining_points, 10);
        assert_eq!(pool.consume_points(50, now), 10);
        assert!(pool.is_exhausted());
        assert_eq!(pool.consume_points(5, now), 0);
        assert_eq!(pool.allocated_points(), 100);
    }

    #[test]
    fn test_new_pool_validation() {
        let now = Utc::now();
        let mut pool = new_pool(PoolCategory::Country, now);
        pool.validate().unwrap();

        pool.total_points = 0;
        assert!(matches!(pool.validate(), Err(SngpError::InvalidPool(_))));

        let mut pool = new_pool(PoolCategory::Country, now);
        pool.multiplier = dec!(0);
        assert!(pool.validate().is_err());

        let mut pool = new_pool(PoolCategory::Country, now);
        pool.name = " ".to_string();
        assert!(pool.validate().is_err());
    }

    #[tokio::test]
    async fn test_create_pool_links_pending_run() {
        let store = SledStore::open_temporary().unwrap();
        let registry = PoolRegistry::new(store.clone());

        let pool = registry
            .create_pool(new_pool(PoolCategory::Country, Utc::now()))
            .await
            .unwrap();

        assert_eq!(pool.remaining_points, pool.total_points);
        assert_eq!(pool.status, PoolStatus::Active);

        let run = runs::require(&store, pool.run_id).unwrap();
        assert_eq!(run.pool_id, pool.id);
        assert_eq!(run.status, RunStatus::Pending);
    }

    #[tokio::test]
    async fn test_soft_deleted_pool_is_hidden() {
        let store = SledStore::open_temporary().unwrap();
        let registry = PoolRegistry::new(store.clone());
        let pool = registry
            .create_pool(new_pool(PoolCategory::Country, Utc::now()))
            .await
            .unwrap();

        registry.soft_delete_pool(pool.id).await.unwrap();

        assert!(matches!(registry.get_pool(pool.id), Err(SngpError::PoolNotFound(_))));
        // Tombstone is still on disk
        let raw = all(&store).unwrap();
        assert!(raw[0].deleted_at.is_some());
    }

    #[tokio::test]
    async fn test_find_open_prefers_earliest_started_pool() {
        let store = SledStore::open_temporary().unwrap();
        let registry = PoolRegistry::new(store.clone());
        let now = Utc::now();

        let later = registry
            .create_pool(new_pool(PoolCategory::Country, now - Duration::hours(1)))
            .await
            .unwrap();
        let earlier = registry
            .create_pool(new_pool(PoolCategory::Country, now - Duration::days(1)))
            .await
            .unwrap();
        let _future = registry
            .create_pool(new_pool(PoolCategory::Country, now + Duration::days(1)))
            .await
            .unwrap();

        let open = find_open(&store, PoolCategory::Country, now).unwrap().unwrap();
        assert_eq!(open.id, earlier.id);
        assert_ne!(open.id, later.id);

        assert!(find_open(&store, PoolCategory::GlobalActivity, now).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_find_open_passes_over_exhausted_and_drawn_pools() {
        let store = SledStore::open_temporary().unwrap();
        let registry = PoolRegistry::new(store.clone());
        let now = Utc::now();

        let drained = registry
            .create_pool(new_pool(PoolCategory::GlobalActivity, now - Duration::days(2)))
            .await
            .unwrap();
        let next = registry
            .create_pool(new_pool(PoolCategory::GlobalActivity, now - Duration::days(1)))
            .await
            .unwrap();

        let mut uow = store.begin().await;
        let mut stored = require(&uow, drained.id).unwrap();
        stored.consume_points(stored.total_points, now);
        save(&mut uow, &stored).unwrap();
        uow.commit().unwrap();

        let open = find_open(&store, PoolCategory::GlobalActivity, now).unwrap().unwrap();
        assert_eq!(open.id, next.id);

        let mut uow = store.begin().await;
        let mut run = runs::require(&uow, next.run_id).unwrap();
        run.complete(UserId(1), 0, None, now).unwrap();
        runs::save(&mut uow, &run).unwrap();
        uow.commit().unwrap();

        assert!(find_open(&store, PoolCategory::GlobalActivity, now).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_soft_delete_tombstones_undrawn_run_only() {
        let store = SledStore::open_temporary().unwrap();
        let registry = PoolRegistry::new(store.clone());
        let now = Utc::now();

        let undrawn = registry
            .create_pool(new_pool(PoolCategory::Country, now))
            .await
            .unwrap();
        registry.soft_delete_pool(undrawn.id).await.unwrap();
        assert!(runs::get(&store, undrawn.run_id).unwrap().is_none());

        let drawn = registry
            .create_pool(new_pool(PoolCategory::Country, now))
            .await
            .unwrap();
        let mut uow = store.begin().await;
        let mut run = runs::require(&uow, drawn.run_id).unwrap();
        run.complete(UserId(1), 1, None, now).unwrap();
        runs::save(&mut uow, &run).unwrap();
        uow.commit().unwrap();

        registry.soft_delete_pool(drawn.id).await.unwrap();
        let kept = runs::require(&store, drawn.run_id).unwrap();
        assert_eq!(kept.status, RunStatus::Completed);
    }
}
