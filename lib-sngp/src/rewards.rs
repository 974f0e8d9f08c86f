//! Reward Ledger
//!
//! Append-only computed-but-unsettled rewards. A record is written once by the
//! distribution engine and changes exactly once afterwards, when a claim
//! flips it to `Claimed`. Records with `receivable = false` never change.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::SngpResult;
use crate::pools::Pool;
use crate::storage::{keys, Collection, StoreRead, UnitOfWork};
use crate::types::{LostReason, PoolCategory, PoolId, RecordId, RewardStatus, RunId, UserId};

/// Values captured at computation time, kept for audit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardSnapshot {
    pub note: Option<String>,
    pub user_points: u64,
    pub pool_reward_amount: Decimal,
    pub multiplier: Decimal,
    pub participant_count: u64,
    /// Proportional share before any cap
    pub computed_reward: Decimal,
    pub computed_reward_usd: Decimal,
    pub daily_reference_reward: Option<Decimal>,
    pub daily_reference_reward_usd: Option<Decimal>,
    pub pre_approved: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardRecord {
    pub id: RecordId,
    pub user_id: UserId,
    pub pool_id: PoolId,
    pub run_id: RunId,
    /// Pool total points at computation time
    pub pool_total_points: u64,
    pub reward_amount: Decimal,
    pub reward_amount_usd: Decimal,
    pub token_symbol: String,
    pub token_price: Decimal,
    pub status: RewardStatus,
    pub receivable: bool,
    pub lost_reason: Option<LostReason>,
    /// Human-readable explanation of any cap applied
    pub remark: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub snapshot: RewardSnapshot,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl RewardRecord {
    /// Unclaimed, receivable and not tombstoned
    pub fn is_claimable(&self) -> bool {
        self.status == RewardStatus::Unclaimed && self.receivable && self.deleted_at.is_none()
    }
}

/// The selection a claim consumes
///
/// The same filter selects the rows to sum and, inside the claim's unit of
/// work, the rows to flip; it is never replaced by a cached id list. Only
/// rewards denominated in `token_symbol` are selected, so a reward is always
/// credited in the token it was computed in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimFilter {
    pub user_id: UserId,
    pub category: PoolCategory,
    pub token_symbol: String,
}

impl ClaimFilter {
    pub fn new(user_id: UserId, category: PoolCategory, token_symbol: impl Into<String>) -> Self {
        Self {
            user_id,
            category,
            token_symbol: token_symbol.into(),
        }
    }

    pub fn matches(&self, record: &RewardRecord, pool: Option<&Pool>) -> bool {
        if record.user_id != self.user_id
            || !record.is_claimable()
            || !record.token_symbol.eq_ignore_ascii_case(&self.token_symbol)
        {
            return false;
        }
        match pool {
            Some(pool) => {
                pool.category == self.category
                    // Country claims never reach into the primary activity pool
                    && !(self.category == PoolCategory::Country && pool.is_primary_activity)
            }
            None => false,
        }
    }
}

// ============================================================================
// DATA ACCESS
// ============================================================================

pub fn insert_batch(uow: &mut UnitOfWork, records: &[RewardRecord]) -> SngpResult<()> {
    for record in records {
        save(uow, record)?;
    }
    Ok(())
}

pub fn save(uow: &mut UnitOfWork, record: &RewardRecord) -> SngpResult<()> {
    uow.put(Collection::Rewards, &keys::reward_key(record.user_id, record.id), record)?;
    Ok(())
}

/// A user's live reward records, oldest first
pub fn for_user<R: StoreRead>(store: &R, user: UserId) -> SngpResult<Vec<RewardRecord>> {
    Ok(store
        .values::<RewardRecord>(Collection::Rewards, &keys::reward_user_prefix(user))?
        .into_iter()
        .filter(|r| r.deleted_at.is_none())
        .collect())
}

pub fn all<R: StoreRead>(store: &R) -> SngpResult<Vec<RewardRecord>> {
    Ok(store
        .values::<RewardRecord>(Collection::Rewards, &[])?
        .into_iter()
        .filter(|r| r.deleted_at.is_none())
        .collect())
}

pub fn for_run<R: StoreRead>(store: &R, run: RunId) -> SngpResult<Vec<RewardRecord>> {
    Ok(all(store)?.into_iter().filter(|r| r.run_id == run).collect())
}

/// Rows matching `filter`, resolving each pool's current flags
pub fn select_claimable<R: StoreRead>(store: &R, filter: &ClaimFilter) -> SngpResult<Vec<RewardRecord>> {
    let mut pools: HashMap<PoolId, Option<Pool>> = HashMap::new();
    let mut selected = Vec::new();

    for record in for_user(store, filter.user_id)? {
        if !record.is_claimable() {
            continue;
        }
        if !pools.contains_key(&record.pool_id) {
            // Raw lookup: a pool tombstoned after its draw still owns its rewards
            pools.insert(record.pool_id, crate::pools::get_any(store, record.pool_id)?);
        }
        let pool = pools.get(&record.pool_id).and_then(Option::as_ref);
        if filter.matches(&record, pool) {
            selected.push(record);
        }
    }

    Ok(selected)
}

pub fn sum_amounts(records: &[RewardRecord]) -> Decimal {
    records.iter().map(|r| r.reward_amount).sum()
}

/// Re-select with `filter` inside the unit of work and flip every match
///
/// Returns the rows that were flipped.
pub fn mark_claimed(uow: &mut UnitOfWork, filter: &ClaimFilter, now: DateTime<Utc>) -> SngpResult<Vec<RewardRecord>> {
    let mut claimed = select_claimable(uow, filter)?;
    for record in claimed.iter_mut() {
        record.status = RewardStatus::Claimed;
        record.claimed_at = Some(now);
        record.updated_at = now;
        save(uow, record)?;
    }
    Ok(claimed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    use crate::types::{PoolStatus, RunId};

    fn pool(category: PoolCategory, primary: bool) -> Pool {
        let now = Utc::now();
        Pool {
            id: PoolId(1),
            name: "pool".to_string(),
            category,
            total_points: 1000,
            remaining_points: 0,
            reward_amount: dec!(100),
            multiplier: dec!(2),
            status: PoolStatus::Inactive,
            start_date: now,
            is_primary_activity: primary,
            run_id: RunId(2),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub(crate) fn reward(user: u64, amount: Decimal) -> RewardRecord {
        let now = Utc::now();
        RewardRecord {
            id: RecordId(1),
            user_id: UserId(user),
            pool_id: PoolId(1),
            run_id: RunId(2),
            pool_total_points: 1000,
            reward_amount: amount,
            reward_amount_usd: amount,
            token_symbol: "SNGP".to_string(),
            token_price: dec!(1),
            status: RewardStatus::Unclaimed,
            receivable: true,
            lost_reason: None,
            remark: None,
            claimed_at: None,
            snapshot: RewardSnapshot {
                note: None,
                user_points: 300,
                pool_reward_amount: dec!(100),
                multiplier: dec!(2),
                participant_count: 1,
                computed_reward: amount,
                computed_reward_usd: amount,
                daily_reference_reward: Some(dec!(20)),
                daily_reference_reward_usd: Some(dec!(20)),
                pre_approved: false,
            },
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[test]
    fn test_filter_requires_unclaimed_receivable_live_rows() {
        let filter = ClaimFilter::new(UserId(1), PoolCategory::Country, "SNGP");
        let country = pool(PoolCategory::Country, false);

        assert!(filter.matches(&reward(1, dec!(5)), Some(&country)));
        assert!(!filter.matches(&reward(2, dec!(5)), Some(&country)));

        let mut lost = reward(1, dec!(5));
        lost.receivable = false;
        assert!(!filter.matches(&lost, Some(&country)));

        let mut claimed = reward(1, dec!(5));
        claimed.status = RewardStatus::Claimed;
        assert!(!filter.matches(&claimed, Some(&country)));

        let mut deleted = reward(1, dec!(5));
        deleted.deleted_at = Some(Utc::now());
        assert!(!filter.matches(&deleted, Some(&country)));

        assert!(!filter.matches(&reward(1, dec!(5)), None));

        let mut other_token = reward(1, dec!(5));
        other_token.token_symbol = "LEGACY".to_string();
        assert!(!filter.matches(&other_token, Some(&country)));
        assert!(ClaimFilter::new(UserId(1), PoolCategory::Country, "sngp").matches(&reward(1, dec!(5)), Some(&country)));
    }

    #[test]
    fn test_country_filter_excludes_primary_activity_pool() {
        let record = reward(1, dec!(5));
        let country = ClaimFilter::new(UserId(1), PoolCategory::Country, "SNGP");

        assert!(!country.matches(&record, Some(&pool(PoolCategory::Country, true))));
        assert!(!country.matches(&record, Some(&pool(PoolCategory::GlobalActivity, false))));

        let global = ClaimFilter::new(UserId(1), PoolCategory::GlobalActivity, "SNGP");
        assert!(global.matches(&record, Some(&pool(PoolCategory::GlobalActivity, true))));
    }

    #[test]
    fn test_sum_amounts() {
        let records = vec![reward(1, dec!(1.5)), reward(1, dec!(2.25))];
        assert_eq!(sum_amounts(&records), dec!(3.75));
        assert_eq!(sum_amounts(&[]), Decimal::ZERO);
    }
}
