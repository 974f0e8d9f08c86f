//! Testing utilities for lib-sngp
//!
//! In-memory gateway doubles for tests and local development. None of them
//! perform I/O; their answers are fixed when they are built.

use std::collections::HashMap;

use anyhow::bail;
use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::gateways::{
    DepositFields, DepositRef, EligibilitySettingsGateway, FlowDirection, LedgerEntryRef, NodeActivityGateway, RequestId,
    RewardTokenConfig, TeamGateway, Wallet, WalletLedgerGateway,
};
use crate::storage::UnitOfWork;
use crate::types::{UserId, WalletId};
use crate::wallet_ledger::SledWalletLedger;

/// Fixed reward token configuration and reference price
#[derive(Debug, Clone)]
pub struct StaticSettings {
    pub token: Option<RewardTokenConfig>,
    pub reference_price: Decimal,
}

impl StaticSettings {
    /// SNGP token priced at `price`
    pub fn sngp(price: Decimal) -> Self {
        Self {
            token: Some(RewardTokenConfig {
                token_symbol: "SNGP".to_string(),
                token_name: "SNGP Reward Token".to_string(),
                price,
            }),
            reference_price: price,
        }
    }

    /// No reward token configured
    pub fn unconfigured() -> Self {
        Self {
            token: None,
            reference_price: Decimal::ZERO,
        }
    }
}

#[async_trait]
impl EligibilitySettingsGateway for StaticSettings {
    async fn get_reward_token_config(&self) -> anyhow::Result<Option<RewardTokenConfig>> {
        Ok(self.token.clone())
    }

    async fn get_current_reference_price(&self) -> anyhow::Result<Decimal> {
        Ok(self.reference_price)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct NodeProfile {
    active: bool,
    daily: Option<Decimal>,
    daily_usd: Option<Decimal>,
}

/// Node activity answers per user; unknown users are inactive
#[derive(Debug, Clone, Default)]
pub struct StaticNodeActivity {
    profiles: HashMap<UserId, NodeProfile>,
}

impl StaticNodeActivity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Active node earning `daily` per day (USD figure equal to `daily`)
    pub fn with_active(self, user: UserId, daily: Decimal) -> Self {
        self.with_profile(user, true, Some(daily), Some(daily))
    }

    /// Active node the node subsystem has no daily figure for
    pub fn with_active_without_daily(self, user: UserId) -> Self {
        self.with_profile(user, true, None, None)
    }

    pub fn with_inactive(self, user: UserId) -> Self {
        self.with_profile(user, false, None, None)
    }

    pub fn with_profile(
        mut self,
        user: UserId,
        active: bool,
        daily: Option<Decimal>,
        daily_usd: Option<Decimal>,
    ) -> Self {
        self.profiles.insert(
            user,
            NodeProfile {
                active,
                daily,
                daily_usd,
            },
        );
        self
    }
}

#[async_trait]
impl NodeActivityGateway for StaticNodeActivity {
    async fn is_user_active_node(&self, user: UserId) -> anyhow::Result<bool> {
        Ok(self.profiles.get(&user).is_some_and(|p| p.active))
    }

    async fn get_user_daily_reference_reward(&self, user: UserId) -> anyhow::Result<Option<Decimal>> {
        Ok(self.profiles.get(&user).and_then(|p| p.daily))
    }

    async fn get_user_daily_reference_reward_usd(&self, user: UserId) -> anyhow::Result<Option<Decimal>> {
        Ok(self.profiles.get(&user).and_then(|p| p.daily_usd))
    }
}

/// Node activity subsystem that is down
#[derive(Debug, Clone, Copy, Default)]
pub struct FailingNodeActivity;

#[async_trait]
impl NodeActivityGateway for FailingNodeActivity {
    async fn is_user_active_node(&self, user: UserId) -> anyhow::Result<bool> {
        bail!("node activity unavailable for {}", user)
    }

    async fn get_user_daily_reference_reward(&self, user: UserId) -> anyhow::Result<Option<Decimal>> {
        bail!("node activity unavailable for {}", user)
    }

    async fn get_user_daily_reference_reward_usd(&self, user: UserId) -> anyhow::Result<Option<Decimal>> {
        bail!("node activity unavailable for {}", user)
    }
}

/// Sled wallet ledger whose deposit write fails
///
/// Everything before the deposit (wallet lookup, ledger entry, request id)
/// goes through to the real ledger and is buffered in the caller's unit of
/// work.
#[derive(Debug, Clone)]
pub struct FailingDepositWallet {
    inner: SledWalletLedger,
}

impl FailingDepositWallet {
    pub fn new(inner: SledWalletLedger) -> Self {
        Self { inner }
    }
}

impl WalletLedgerGateway for FailingDepositWallet {
    fn find_wallet(&self, uow: &UnitOfWork, user: UserId, token_symbol: &str) -> anyhow::Result<Option<Wallet>> {
        self.inner.find_wallet(uow, user, token_symbol)
    }

    fn get_balance(&self, uow: &UnitOfWork, user: UserId, wallet: WalletId) -> anyhow::Result<Decimal> {
        self.inner.get_balance(uow, user, wallet)
    }

    fn record_ledger_entry(
        &self,
        uow: &mut UnitOfWork,
        wallet: &Wallet,
        amount: Decimal,
        direction: FlowDirection,
        reason_code: &str,
    ) -> anyhow::Result<LedgerEntryRef> {
        self.inner.record_ledger_entry(uow, wallet, amount, direction, reason_code)
    }

    fn next_request_id(&self, uow: &mut UnitOfWork, reason_code: &str) -> anyhow::Result<RequestId> {
        self.inner.next_request_id(uow, reason_code)
    }

    fn record_deposit(&self, _uow: &mut UnitOfWork, fields: DepositFields) -> anyhow::Result<DepositRef> {
        bail!("deposit store unavailable for {}", fields.wallet_id)
    }
}

/// Fixed team membership; unknown leaders have no members
#[derive(Debug, Clone, Default)]
pub struct StaticTeam {
    teams: HashMap<UserId, Vec<UserId>>,
}

impl StaticTeam {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_team(mut self, leader: UserId, members: impl IntoIterator<Item = UserId>) -> Self {
        self.teams.insert(leader, members.into_iter().collect());
        self
    }
}

#[async_trait]
impl TeamGateway for StaticTeam {
    async fn get_team_member_ids(&self, leader: UserId) -> anyhow::Result<Vec<UserId>> {
        Ok(self.teams.get(&leader).cloned().unwrap_or_default())
    }
}
