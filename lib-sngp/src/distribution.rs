//! Distribution Engine
//!
//! Converts a pool's accumulated points into per-user reward records.
//!
//! # Reward formula
//!
//! ```text
//! raw      = user_points / pool.total_points * pool.reward_amount
//! raw_usd  = raw * reference_price
//! cap      = pool.multiplier * daily_reference_reward
//! reward   = min(raw, cap)
//! ```
//!
//! Amounts are truncated toward zero to the configured scale, so the sum of
//! every receivable reward of a pool never exceeds its budget.
//!
//! # Atomicity
//!
//! Every write of a run happens inside one unit of work. Any failure, including
//! an upstream eligibility lookup, drops the unit and no reward row, run
//! status or pool status change is persisted. Gateways are never awaited
//! while the unit holds the store's writer lock.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::{SngpError, SngpResult};
use crate::gateways::{names, EligibilitySettingsGateway, NodeActivityGateway};
use crate::participation::{self, UserPoints};
use crate::pools::{self, Pool};
use crate::rewards::{self, RewardRecord, RewardSnapshot};
use crate::runs::{self, DistributionRun};
use crate::storage::{SledStore, StoreRead};
use crate::types::{LostReason, PoolStatus, RecordId, RewardStatus, RunId, UserId};

/// Outcome of a user's eligibility check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    /// Every row came through the migration path; no check, no cap
    PreApproved,
    Eligible {
        daily_reference_reward: Decimal,
        daily_reference_reward_usd: Option<Decimal>,
    },
    Lost(LostReason),
}

/// Pool terms and pricing shared by every user of one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewardTerms {
    pub total_points: u64,
    pub reward_amount: Decimal,
    pub multiplier: Decimal,
    pub reference_price: Decimal,
    pub amount_scale: u32,
}

impl RewardTerms {
    pub fn for_pool(pool: &Pool, reference_price: Decimal, amount_scale: u32) -> Self {
        Self {
            total_points: pool.total_points,
            reward_amount: pool.reward_amount,
            multiplier: pool.multiplier,
            reference_price,
            amount_scale,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputedReward {
    pub amount: Decimal,
    pub amount_usd: Decimal,
    pub raw: Decimal,
    pub raw_usd: Decimal,
    pub receivable: bool,
    pub lost_reason: Option<LostReason>,
    pub remark: Option<String>,
}

impl ComputedReward {
    pub fn is_capped(&self) -> bool {
        self.receivable && self.amount < self.raw
    }
}

fn overflow() -> SngpError {
    SngpError::InvalidInput("reward computation overflowed".to_string())
}

fn truncate(value: Decimal, scale: u32) -> Decimal {
    value.round_dp_with_strategy(scale, RoundingStrategy::ToZero)
}

/// Apply the proportional split and the multiplier cap for one user
///
/// Non-receivable results keep the uncapped share for audit.
pub fn compute_reward(user_points: u64, terms: &RewardTerms, eligibility: Eligibility) -> SngpResult<ComputedReward> {
    if terms.total_points == 0 {
        return Err(SngpError::InvalidPool("total_points is zero".to_string()));
    }

    let raw = terms
        .reward_amount
        .checked_mul(Decimal::from(user_points))
        .and_then(|v| v.checked_div(Decimal::from(terms.total_points)))
        .map(|v| truncate(v, terms.amount_scale))
        .ok_or_else(overflow)?;
    let raw_usd = raw
        .checked_mul(terms.reference_price)
        .map(|v| truncate(v, terms.amount_scale))
        .ok_or_else(overflow)?;

    let computed = match eligibility {
        Eligibility::PreApproved => ComputedReward {
            amount: raw,
            amount_usd: raw_usd,
            raw,
            raw_usd,
            receivable: true,
            lost_reason: None,
            remark: None,
        },
        Eligibility::Lost(reason) => ComputedReward {
            amount: raw,
            amount_usd: raw_usd,
            raw,
            raw_usd,
            receivable: false,
            lost_reason: Some(reason),
            remark: None,
        },
        Eligibility::Eligible {
            daily_reference_reward,
            ..
        } => {
            let max_allowed = terms
                .multiplier
                .checked_mul(daily_reference_reward)
                .map(|v| truncate(v, terms.amount_scale))
                .ok_or_else(overflow)?;

            if raw > max_allowed {
                let capped_usd = max_allowed
                    .checked_mul(terms.reference_price)
                    .map(|v| truncate(v, terms.amount_scale))
                    .ok_or_else(overflow)?;
                ComputedReward {
                    amount: max_allowed,
                    amount_usd: capped_usd,
                    raw,
                    raw_usd,
                    receivable: true,
                    lost_reason: None,
                    remark: Some(format!(
                        "reward capped from {} to {} ({}x daily reference reward of {})",
                        raw.normalize(),
                        max_allowed.normalize(),
                        terms.multiplier.normalize(),
                        daily_reference_reward.normalize()
                    )),
                }
            } else {
                ComputedReward {
                    amount: raw,
                    amount_usd: raw_usd,
                    raw,
                    raw_usd,
                    receivable: true,
                    lost_reason: None,
                    remark: None,
                }
            }
        }
    };

    Ok(computed)
}

/// Summary of a completed run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionReport {
    pub run: DistributionRun,
    pub records: usize,
    pub receivable_total: Decimal,
    pub lost: usize,
    pub capped: usize,
}

/// Times a draw re-checks eligibility for participants that arrived meanwhile
pub const ELIGIBILITY_ROUNDS: u32 = 3;

pub struct DistributionEngine {
    store: SledStore,
    settings: Arc<dyn EligibilitySettingsGateway>,
    node_activity: Arc<dyn NodeActivityGateway>,
    migration_remark: String,
    amount_scale: u32,
}

impl DistributionEngine {
    pub fn new(
        store: SledStore,
        settings: Arc<dyn EligibilitySettingsGateway>,
        node_activity: Arc<dyn NodeActivityGateway>,
        migration_remark: impl Into<String>,
        amount_scale: u32,
    ) -> Self {
        Self {
            store,
            settings,
            node_activity,
            migration_remark: migration_remark.into(),
            amount_scale,
        }
    }

    /// Node activity verdict for a user outside the migration path
    async fn check_node(&self, user: UserId) -> SngpResult<Eligibility> {
        let active = self
            .node_activity
            .is_user_active_node(user)
            .await
            .map_err(|e| SngpError::upstream(names::NODE_ACTIVITY, e))?;
        if !active {
            return Ok(Eligibility::Lost(LostReason::InactiveUser));
        }

        let daily = self
            .node_activity
            .get_user_daily_reference_reward(user)
            .await
            .map_err(|e| SngpError::upstream(names::NODE_ACTIVITY, e))?;
        let daily = match daily {
            Some(amount) if amount > Decimal::ZERO => amount,
            _ => return Ok(Eligibility::Lost(LostReason::NoDailyReferenceReward)),
        };

        let daily_usd = self
            .node_activity
            .get_user_daily_reference_reward_usd(user)
            .await
            .map_err(|e| SngpError::upstream(names::NODE_ACTIVITY, e))?;

        Ok(Eligibility::Eligible {
            daily_reference_reward: daily,
            daily_reference_reward_usd: daily_usd,
        })
    }

    /// Fill `resolved` for every user that still needs a node check
    async fn resolve_eligibility(
        &self,
        users: &[UserPoints],
        resolved: &mut HashMap<UserId, Eligibility>,
    ) -> SngpResult<()> {
        for user in users {
            if user.pre_approved || resolved.contains_key(&user.user_id) {
                continue;
            }
            let verdict = self.check_node(user.user_id).await?;
            resolved.insert(user.user_id, verdict);
        }
        Ok(())
    }

    fn load_run<R: StoreRead>(&self, store: &R, run_id: RunId) -> SngpResult<(DistributionRun, Pool, Vec<UserPoints>)> {
        let run = runs::require(store, run_id)?;
        if run.status.is_terminal() {
            tracing::warn!(run_id = %run_id, "distribution re-run rejected");
            return Err(SngpError::RunAlreadyCompleted(run_id));
        }
        let pool = pools::require(store, run.pool_id)?;

        let rows = participation::for_pool(store, pool.id)?;
        let users = participation::aggregate_user_points(&rows, &self.migration_remark);
        if users.is_empty() {
            tracing::warn!(run_id = %run_id, pool_id = %pool.id, "nothing to distribute");
            return Err(SngpError::NoParticipants(pool.id));
        }
        Ok((run, pool, users))
    }

    /// Execute a run. `Pending` runs may be forced by an operator.
    ///
    /// Gateway lookups happen on committed state before the unit of work
    /// starts. Inside it the participants are aggregated again; if someone
    /// appeared whose eligibility is unknown the unit is dropped, the new
    /// users are checked and the draw starts over, at most
    /// [`ELIGIBILITY_ROUNDS`] times.
    pub async fn distribute(
        &self,
        operator: UserId,
        run_id: RunId,
        note: Option<String>,
    ) -> SngpResult<DistributionReport> {
        let (_, _, mut users) = self.load_run(&self.store, run_id)?;

        let token = self
            .settings
            .get_reward_token_config()
            .await
            .map_err(|e| SngpError::upstream(names::ELIGIBILITY_SETTINGS, e))?
            .ok_or(SngpError::RewardConfigMissing)?;
        let price = self
            .settings
            .get_current_reference_price()
            .await
            .map_err(|e| SngpError::upstream(names::ELIGIBILITY_SETTINGS, e))?;

        let mut resolved = HashMap::new();
        for attempt in 1..=ELIGIBILITY_ROUNDS {
            self.resolve_eligibility(&users, &mut resolved).await?;

            let mut uow = self.store.begin().await;
            let (mut run, mut pool, current) = self.load_run(&uow, run_id)?;

            let verdicts: Option<Vec<Eligibility>> = current
                .iter()
                .map(|user| settled_eligibility(user, &resolved))
                .collect();
            let Some(verdicts) = verdicts else {
                tracing::debug!(run_id = %run_id, attempt, "new participants since eligibility check");
                users = current;
                continue;
            };

            let terms = RewardTerms::for_pool(&pool, price, self.amount_scale);
            let participant_count = current.len() as u64;
            let now = Utc::now();

            let mut records = Vec::with_capacity(current.len());
            let mut receivable_total = Decimal::ZERO;
            let mut lost = 0;
            let mut capped = 0;

            for (user, eligibility) in current.iter().zip(verdicts) {
                let computed = compute_reward(user.points, &terms, eligibility)?;

                tracing::debug!(
                    run_id = %run_id,
                    user_id = %user.user_id,
                    points = user.points,
                    raw = %computed.raw,
                    amount = %computed.amount,
                    receivable = computed.receivable,
                    "reward computed"
                );

                if computed.receivable {
                    receivable_total += computed.amount;
                } else {
                    lost += 1;
                }
                if computed.is_capped() {
                    capped += 1;
                }

                let (daily, daily_usd) = match eligibility {
                    Eligibility::Eligible {
                        daily_reference_reward,
                        daily_reference_reward_usd,
                    } => (Some(daily_reference_reward), daily_reference_reward_usd),
                    _ => (None, None),
                };

                records.push(RewardRecord {
                    id: RecordId(uow.generate_id()?),
                    user_id: user.user_id,
                    pool_id: pool.id,
                    run_id,
                    pool_total_points: pool.total_points,
                    reward_amount: computed.amount,
                    reward_amount_usd: computed.amount_usd,
                    token_symbol: token.token_symbol.clone(),
                    token_price: price,
                    status: RewardStatus::Unclaimed,
                    receivable: computed.receivable,
                    lost_reason: computed.lost_reason,
                    remark: computed.remark,
                    claimed_at: None,
                    snapshot: RewardSnapshot {
                        note: note.clone(),
                        user_points: user.points,
                        pool_reward_amount: pool.reward_amount,
                        multiplier: pool.multiplier,
                        participant_count,
                        computed_reward: computed.raw,
                        computed_reward_usd: computed.raw_usd,
                        daily_reference_reward: daily,
                        daily_reference_reward_usd: daily_usd,
                        pre_approved: user.pre_approved,
                    },
                    created_at: now,
                    updated_at: now,
                    deleted_at: None,
                });
            }

            rewards::insert_batch(&mut uow, &records)?;

            run.complete(operator, participant_count, note, now)?;
            runs::save(&mut uow, &run)?;

            if !pool.category.is_perpetual() && pool.status != PoolStatus::Inactive {
                pool.status = PoolStatus::Inactive;
                pool.updated_at = now;
                pools::save(&mut uow, &pool)?;
            }

            uow.commit()?;

            tracing::info!(
                run_id = %run_id,
                pool_id = %pool.id,
                operator = %operator,
                records = records.len(),
                receivable_total = %receivable_total,
                lost,
                capped,
                "distribution completed"
            );

            return Ok(DistributionReport {
                run,
                records: records.len(),
                receivable_total,
                lost,
                capped,
            });
        }

        tracing::warn!(run_id = %run_id, rounds = ELIGIBILITY_ROUNDS, "distribution gave up on changing participants");
        Err(SngpError::DistributionContended(run_id))
    }
}

/// Verdict for `user` from the pre-resolved checks; `None` if never checked
fn settled_eligibility(user: &UserPoints, resolved: &HashMap<UserId, Eligibility>) -> Option<Eligibility> {
    if user.pre_approved {
        return Some(Eligibility::PreApproved);
    }
    resolved.get(&user.user_id).copied()
}
