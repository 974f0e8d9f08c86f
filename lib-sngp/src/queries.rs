//! Read-only listings
//!
//! Every query reads committed state only, excludes tombstoned rows, returns
//! newest first and is paginated with the configured page bounds.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::QueryConfig;
use crate::error::{SngpError, SngpResult};
use crate::gateways::{names, TeamGateway};
use crate::participation::{self, ParticipationRecord};
use crate::pools::{self, Pool};
use crate::rewards::{self, RewardRecord};
use crate::runs::{self, DistributionRun};
use crate::storage::SledStore;
use crate::types::{
    DateRange, Page, PageRequest, ParticipationStatus, PoolCategory, PoolId, PoolStatus, RewardStatus, RunId, RunStatus,
    UserId,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolFilter {
    pub category: Option<PoolCategory>,
    pub status: Option<PoolStatus>,
    pub created: DateRange,
}

impl PoolFilter {
    fn matches(&self, pool: &Pool) -> bool {
        !pool.is_deleted()
            && self.category.map_or(true, |c| pool.category == c)
            && self.status.map_or(true, |s| pool.status == s)
            && self.created.contains(&pool.created_at)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParticipationFilter {
    pub user_id: Option<UserId>,
    pub pool_id: Option<PoolId>,
    pub status: Option<ParticipationStatus>,
    pub created: DateRange,
}

impl ParticipationFilter {
    fn matches(&self, row: &ParticipationRecord) -> bool {
        row.deleted_at.is_none()
            && self.user_id.map_or(true, |u| row.user_id == u)
            && self.pool_id.map_or(true, |p| row.pool_id == p)
            && self.status.map_or(true, |s| row.status == s)
            && self.created.contains(&row.created_at)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RewardFilter {
    pub user_id: Option<UserId>,
    pub pool_id: Option<PoolId>,
    pub status: Option<RewardStatus>,
    pub receivable: Option<bool>,
    pub category: Option<PoolCategory>,
    pub created: DateRange,
}

impl RewardFilter {
    fn matches(&self, record: &RewardRecord, category: Option<PoolCategory>) -> bool {
        record.deleted_at.is_none()
            && self.user_id.map_or(true, |u| record.user_id == u)
            && self.pool_id.map_or(true, |p| record.pool_id == p)
            && self.status.map_or(true, |s| record.status == s)
            && self.receivable.map_or(true, |r| record.receivable == r)
            && self.category.map_or(true, |c| category == Some(c))
            && self.created.contains(&record.created_at)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunFilter {
    pub pool_id: Option<PoolId>,
    pub status: Option<RunStatus>,
    pub created: DateRange,
}

impl RunFilter {
    fn matches(&self, run: &DistributionRun) -> bool {
        run.deleted_at.is_none()
            && self.pool_id.map_or(true, |p| run.pool_id == p)
            && self.status.map_or(true, |s| run.status == s)
            && self.created.contains(&run.created_at)
    }
}

pub struct QueryService {
    store: SledStore,
    config: QueryConfig,
    team: Arc<dyn TeamGateway>,
}

impl QueryService {
    pub fn new(store: SledStore, config: QueryConfig, team: Arc<dyn TeamGateway>) -> Self {
        Self { store, config, team }
    }

    fn page<T>(&self, items: Vec<T>, request: PageRequest) -> Page<T> {
        let request = request.normalized(self.config.default_page_size, self.config.max_page_size);
        Page::from_items(items, request)
    }

    pub fn list_pools(&self, filter: &PoolFilter, request: PageRequest) -> SngpResult<Page<Pool>> {
        let mut items: Vec<Pool> = pools::all(&self.store)?
            .into_iter()
            .filter(|p| filter.matches(p))
            .collect();
        items.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(self.page(items, request))
    }

    pub fn get_run(&self, id: RunId) -> SngpResult<DistributionRun> {
        runs::require(&self.store, id)
    }

    pub fn list_runs(&self, filter: &RunFilter, request: PageRequest) -> SngpResult<Page<DistributionRun>> {
        let mut items: Vec<DistributionRun> = runs::all(&self.store)?
            .into_iter()
            .filter(|r| filter.matches(r))
            .collect();
        items.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(self.page(items, request))
    }

    pub fn participation_history(
        &self,
        filter: &ParticipationFilter,
        request: PageRequest,
    ) -> SngpResult<Page<ParticipationRecord>> {
        let rows = match (filter.user_id, filter.pool_id) {
            (Some(user), _) => participation::for_user(&self.store, user)?,
            (None, Some(pool)) => participation::for_pool(&self.store, pool)?,
            (None, None) => participation::all(&self.store)?,
        };
        let mut items: Vec<ParticipationRecord> = rows.into_iter().filter(|r| filter.matches(r)).collect();
        items.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(self.page(items, request))
    }

    fn filter_rewards(&self, rows: Vec<RewardRecord>, filter: &RewardFilter) -> SngpResult<Vec<RewardRecord>> {
        let mut categories: HashMap<PoolId, Option<PoolCategory>> = HashMap::new();
        let mut items = Vec::new();
        for record in rows {
            let category = match categories.get(&record.pool_id) {
                Some(category) => *category,
                None => {
                    let category = pools::get_any(&self.store, record.pool_id)?.map(|p| p.category);
                    categories.insert(record.pool_id, category);
                    category
                }
            };
            if filter.matches(&record, category) {
                items.push(record);
            }
        }
        items.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(items)
    }

    pub fn reward_history(&self, filter: &RewardFilter, request: PageRequest) -> SngpResult<Page<RewardRecord>> {
        let rows = match filter.user_id {
            Some(user) => rewards::for_user(&self.store, user)?,
            None => rewards::all(&self.store)?,
        };
        let items = self.filter_rewards(rows, filter)?;
        Ok(self.page(items, request))
    }

    /// A user's claimed rewards, filtered and ordered by claim time
    pub fn claim_history(&self, user: UserId, range: DateRange, request: PageRequest) -> SngpResult<Page<RewardRecord>> {
        let mut items: Vec<RewardRecord> = rewards::for_user(&self.store, user)?
            .into_iter()
            .filter(|r| r.status == RewardStatus::Claimed)
            .filter(|r| r.claimed_at.is_some_and(|at| range.contains(&at)))
            .collect();
        items.sort_by(|a, b| (b.claimed_at, b.id).cmp(&(a.claimed_at, a.id)));
        Ok(self.page(items, request))
    }

    /// Reward history of every member of `leader`'s team
    ///
    /// `filter.user_id` is ignored; the team membership decides whose rows
    /// are listed.
    pub async fn team_reward_history(
        &self,
        leader: UserId,
        filter: &RewardFilter,
        request: PageRequest,
    ) -> SngpResult<Page<RewardRecord>> {
        let members = self
            .team
            .get_team_member_ids(leader)
            .await
            .map_err(|e| SngpError::upstream(names::TEAM, e))?;

        let mut rows = Vec::new();
        for member in members.into_iter().collect::<BTreeSet<_>>() {
            rows.extend(rewards::for_user(&self.store, member)?);
        }

        let filter = RewardFilter {
            user_id: None,
            ..filter.clone()
        };
        let items = self.filter_rewards(rows, &filter)?;
        Ok(self.page(items, request))
    }
}
