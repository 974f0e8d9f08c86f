//! External collaborator contracts
//!
//! The engine never reaches into the wallet, settings, node-activity or team
//! subsystems directly. Each one is injected behind a narrow trait.
//!
//! Gateways own their errors and return `anyhow::Result`. The engine wraps
//! every failure into [`SngpError::Upstream`](crate::SngpError::Upstream)
//! and aborts the unit of work it was called from: eligibility is never
//! guessed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::storage::UnitOfWork;
use crate::types::{UserId, WalletId};

/// Gateway names used in [`SngpError::Upstream`](crate::SngpError::Upstream)
pub mod names {
    pub const WALLET_LEDGER: &str = "wallet_ledger";
    pub const ELIGIBILITY_SETTINGS: &str = "eligibility_settings";
    pub const NODE_ACTIVITY: &str = "node_activity";
    pub const TEAM: &str = "team";
}

// ============================================================================
// WALLET LEDGER
// ============================================================================

/// A user's balance in one token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub user_id: UserId,
    pub token_symbol: String,
    pub balance: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowDirection {
    Inbound,
    Outbound,
}

impl FlowDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowDirection::Inbound => "IN",
            FlowDirection::Outbound => "OUT",
        }
    }
}

impl std::fmt::Display for FlowDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntryRef {
    pub entry_id: u64,
}

/// Uniquely sequenced request identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestId {
    pub sequence: u64,
    pub request_id: String,
}

/// Everything a deposit (and its history row) records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepositFields {
    pub wallet_id: WalletId,
    pub user_id: UserId,
    pub token_symbol: String,
    pub amount: Decimal,
    pub previous_balance: Decimal,
    pub new_balance: Decimal,
    pub request: RequestId,
    pub reason_code: String,
    pub note: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositRef {
    pub deposit_id: u64,
    pub history_id: u64,
}

/// Minimal wallet primitives the claim engine needs
///
/// Every call writes into the caller's [`UnitOfWork`], so a claim's ledger
/// entry, deposit, history row and reward status flips commit together.
/// Methods are synchronous: they only read committed state and buffer writes.
pub trait WalletLedgerGateway: Send + Sync {
    fn find_wallet(&self, uow: &UnitOfWork, user: UserId, token_symbol: &str) -> anyhow::Result<Option<Wallet>>;

    fn get_balance(&self, uow: &UnitOfWork, user: UserId, wallet: WalletId) -> anyhow::Result<Decimal>;

    /// Balance-changing entry; returns the entry reference
    fn record_ledger_entry(
        &self,
        uow: &mut UnitOfWork,
        wallet: &Wallet,
        amount: Decimal,
        direction: FlowDirection,
        reason_code: &str,
    ) -> anyhow::Result<LedgerEntryRef>;

    fn next_request_id(&self, uow: &mut UnitOfWork, reason_code: &str) -> anyhow::Result<RequestId>;

    /// Deposit record plus its paired history record
    fn record_deposit(&self, uow: &mut UnitOfWork, fields: DepositFields) -> anyhow::Result<DepositRef>;
}

// ============================================================================
// SETTINGS / ELIGIBILITY / TEAM
// ============================================================================

/// Reference token rewards are denominated in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardTokenConfig {
    pub token_symbol: String,
    pub token_name: String,
    pub price: Decimal,
}

#[async_trait]
pub trait EligibilitySettingsGateway: Send + Sync {
    /// `None` when no reward token has been configured
    async fn get_reward_token_config(&self) -> anyhow::Result<Option<RewardTokenConfig>>;

    /// Reference price used to convert rewards into the reference currency
    async fn get_current_reference_price(&self) -> anyhow::Result<Decimal>;
}

#[async_trait]
pub trait NodeActivityGateway: Send + Sync {
    async fn is_user_active_node(&self, user: UserId) -> anyhow::Result<bool>;

    /// `None` when the node subsystem has no figure for the user
    async fn get_user_daily_reference_reward(&self, user: UserId) -> anyhow::Result<Option<Decimal>>;

    async fn get_user_daily_reference_reward_usd(&self, user: UserId) -> anyhow::Result<Option<Decimal>>;
}

/// Used by reporting views only
#[async_trait]
pub trait TeamGateway: Send + Sync {
    async fn get_team_member_ids(&self, leader: UserId) -> anyhow::Result<Vec<UserId>>;
}
