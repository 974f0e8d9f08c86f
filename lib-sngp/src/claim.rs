//! Claim Processor
//!
//! Moves a user's unclaimed, receivable rewards of one pool category into
//! their wallet for the configured reward token. Rewards written in another
//! token stay unclaimed until that token is configured again.
//!
//! **Double-claim guard:** the claim filter is evaluated twice, once on
//! committed state to decide whether there is anything to do and once
//! inside the unit of work, where the rows it selects are summed, credited
//! and flipped to `Claimed`. Units of work are serialised, so a second claim
//! for the same rows only starts after the first has committed and finds
//! nothing left.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{SngpError, SngpResult};
use crate::gateways::{
    names, DepositFields, DepositRef, EligibilitySettingsGateway, FlowDirection, RewardTokenConfig, WalletLedgerGateway,
};
use crate::pools;
use crate::rewards::{self, ClaimFilter};
use crate::storage::SledStore;
use crate::types::{PoolCategory, UserId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClaimOutcome {
    Claimed {
        amount: Decimal,
        records: usize,
        request_id: String,
        deposit: DepositRef,
        previous_balance: Decimal,
        new_balance: Decimal,
    },
    NothingToClaim,
}

impl ClaimOutcome {
    pub fn amount(&self) -> Decimal {
        match self {
            ClaimOutcome::Claimed { amount, .. } => *amount,
            ClaimOutcome::NothingToClaim => Decimal::ZERO,
        }
    }

    pub fn is_claimed(&self) -> bool {
        matches!(self, ClaimOutcome::Claimed { .. })
    }
}

impl fmt::Display for ClaimOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClaimOutcome::Claimed { amount, .. } => write!(f, "claimed {}", amount.normalize()),
            ClaimOutcome::NothingToClaim => f.write_str("nothing to claim"),
        }
    }
}

/// What a user could claim right now
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimableSummary {
    pub claimable: Decimal,
    pub record_count: usize,
    /// Non-receivable records of the same category
    pub lost_count: usize,
}

pub struct ClaimProcessor {
    store: SledStore,
    wallets: Arc<dyn WalletLedgerGateway>,
    settings: Arc<dyn EligibilitySettingsGateway>,
    reason_code: String,
}

impl ClaimProcessor {
    pub fn new(
        store: SledStore,
        wallets: Arc<dyn WalletLedgerGateway>,
        settings: Arc<dyn EligibilitySettingsGateway>,
        reason_code: impl Into<String>,
    ) -> Self {
        Self {
            store,
            wallets,
            settings,
            reason_code: reason_code.into(),
        }
    }

    pub async fn claim(&self, user: UserId, category: PoolCategory) -> SngpResult<ClaimOutcome> {
        let token = self.reward_token().await?;
        let filter = ClaimFilter::new(user, category, token.token_symbol.clone());

        let preview = rewards::select_claimable(&self.store, &filter)?;
        if rewards::sum_amounts(&preview).is_zero() {
            tracing::debug!(user_id = %user, category = %category, token = %token.token_symbol, "nothing to claim");
            return Ok(ClaimOutcome::NothingToClaim);
        }

        let wallet_err = |e: anyhow::Error| SngpError::upstream(names::WALLET_LEDGER, e);
        let mut uow = self.store.begin().await;

        // Re-select under the writer lock; a concurrent claim may have won
        let selected = rewards::select_claimable(&uow, &filter)?;
        let amount = rewards::sum_amounts(&selected);
        if amount.is_zero() {
            return Ok(ClaimOutcome::NothingToClaim);
        }

        let wallet = self
            .wallets
            .find_wallet(&uow, user, &token.token_symbol)
            .map_err(wallet_err)?
            .ok_or_else(|| SngpError::WalletNotFound {
                user,
                token: token.token_symbol.clone(),
            })?;
        let previous_balance = self.wallets.get_balance(&uow, user, wallet.id).map_err(wallet_err)?;
        let new_balance = previous_balance + amount;

        self.wallets
            .record_ledger_entry(&mut uow, &wallet, amount, FlowDirection::Inbound, &self.reason_code)
            .map_err(wallet_err)?;
        let request = self
            .wallets
            .next_request_id(&mut uow, &self.reason_code)
            .map_err(wallet_err)?;
        let request_id = request.request_id.clone();

        let deposit = self
            .wallets
            .record_deposit(
                &mut uow,
                DepositFields {
                    wallet_id: wallet.id,
                    user_id: user,
                    token_symbol: wallet.token_symbol.clone(),
                    amount,
                    previous_balance,
                    new_balance,
                    request,
                    reason_code: self.reason_code.clone(),
                    note: format!(
                        "Claimed {} {} from {} {} rewards",
                        amount.normalize(),
                        wallet.token_symbol,
                        selected.len(),
                        category
                    ),
                },
            )
            .map_err(wallet_err)?;

        // Same filter, same unit of work: flips exactly the rows summed above
        let claimed = rewards::mark_claimed(&mut uow, &filter, Utc::now())?;

        uow.commit()?;

        tracing::info!(
            user_id = %user,
            category = %category,
            amount = %amount,
            records = claimed.len(),
            request_id = %request_id,
            "reward claim credited"
        );

        Ok(ClaimOutcome::Claimed {
            amount,
            records: claimed.len(),
            request_id,
            deposit,
            previous_balance,
            new_balance,
        })
    }

    async fn reward_token(&self) -> SngpResult<RewardTokenConfig> {
        self.settings
            .get_reward_token_config()
            .await
            .map_err(|e| SngpError::upstream(names::ELIGIBILITY_SETTINGS, e))?
            .ok_or(SngpError::RewardConfigMissing)
    }

    /// Rewards a claim for the configured token would credit right now
    pub async fn claimable_summary(&self, user: UserId, category: PoolCategory) -> SngpResult<ClaimableSummary> {
        let token = self.reward_token().await?;
        let filter = ClaimFilter::new(user, category, token.token_symbol.clone());
        let claimable = rewards::select_claimable(&self.store, &filter)?;

        let mut lost_count = 0;
        for record in rewards::for_user(&self.store, user)? {
            if record.receivable || !record.token_symbol.eq_ignore_ascii_case(&token.token_symbol) {
                continue;
            }
            let pool = pools::get_any(&self.store, record.pool_id)?;
            if pool.is_some_and(|p| p.category == category) {
                lost_count += 1;
            }
        }

        Ok(ClaimableSummary {
            claimable: rewards::sum_amounts(&claimable),
            record_count: claimable.len(),
            lost_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_outcome_display() {
        let claimed = ClaimOutcome::Claimed {
            amount: dec!(30.00000000),
            records: 1,
            request_id: "SNGP_REWARD-00000001".to_string(),
            deposit: DepositRef {
                deposit_id: 1,
                history_id: 2,
            },
            previous_balance: dec!(0),
            new_balance: dec!(30),
        };
        assert_eq!(claimed.to_string(), "claimed 30");
        assert_eq!(claimed.amount(), dec!(30));
        assert_eq!(ClaimOutcome::NothingToClaim.to_string(), "nothing to claim");
        assert!(!ClaimOutcome::NothingToClaim.is_claimed());
    }
}
