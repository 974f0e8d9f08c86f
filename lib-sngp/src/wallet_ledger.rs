//! Sled-backed wallet ledger
//!
//! Lives in the same database as the reward ledger so that a claim's wallet
//! writes and reward flips share one unit of work.
//!
//! Balances only move through [`WalletLedgerGateway::record_ledger_entry`].
//! Every entry records the balance after it was applied.

use anyhow::{anyhow, bail};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::SngpResult;
use crate::gateways::{DepositFields, DepositRef, FlowDirection, LedgerEntryRef, RequestId, Wallet, WalletLedgerGateway};
use crate::storage::{keys, Collection, SledStore, StoreRead, UnitOfWork};
use crate::types::{UserId, WalletId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: u64,
    pub wallet_id: WalletId,
    pub user_id: UserId,
    pub amount: Decimal,
    pub direction: FlowDirection,
    pub reason_code: String,
    pub balance_after: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DepositStatus {
    Success,
}

impl DepositStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepositStatus::Success => "SUCCESS",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deposit {
    pub id: u64,
    pub wallet_id: WalletId,
    pub user_id: UserId,
    pub token_symbol: String,
    pub amount: Decimal,
    pub previous_balance: Decimal,
    pub new_balance: Decimal,
    pub status: DepositStatus,
    pub request_id: String,
    pub sequence: u64,
    pub reason_code: String,
    pub note: String,
    pub created_at: DateTime<Utc>,
}

/// Audit mirror of a [`Deposit`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepositHistory {
    pub id: u64,
    pub deposit_id: u64,
    pub wallet_id: WalletId,
    pub user_id: UserId,
    pub amount: Decimal,
    pub previous_balance: Decimal,
    pub new_balance: Decimal,
    pub status: DepositStatus,
    pub request_id: String,
    pub note: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SledWalletLedger {
    store: SledStore,
}

impl SledWalletLedger {
    pub fn new(store: SledStore) -> Self {
        Self { store }
    }

    /// The user's wallet for `token_symbol`, created with a zero balance if absent
    pub async fn open_wallet(&self, user: UserId, token_symbol: &str) -> SngpResult<Wallet> {
        let mut uow = self.store.begin().await;
        if let Some(wallet) = find_in(&uow, user, token_symbol)? {
            return Ok(wallet);
        }

        let now = Utc::now();
        let wallet = Wallet {
            id: WalletId(uow.generate_id()?),
            user_id: user,
            token_symbol: token_symbol.to_ascii_uppercase(),
            balance: Decimal::ZERO,
            created_at: now,
            updated_at: now,
        };
        uow.put(Collection::Wallets, &keys::wallet_key(user, wallet.id), &wallet)?;
        uow.commit()?;

        tracing::info!(user_id = %user, wallet_id = %wallet.id, token = %wallet.token_symbol, "wallet opened");
        Ok(wallet)
    }

    /// Committed wallet lookup
    pub fn wallet(&self, user: UserId, token_symbol: &str) -> SngpResult<Option<Wallet>> {
        find_in(&self.store, user, token_symbol)
    }

    pub fn deposits_for_wallet(&self, wallet: WalletId) -> SngpResult<Vec<Deposit>> {
        Ok(self.store.values(Collection::Deposits, &keys::deposit_wallet_prefix(wallet))?)
    }

    pub fn history_for_deposit(&self, deposit_id: u64) -> SngpResult<Vec<DepositHistory>> {
        Ok(self
            .store
            .values(Collection::DepositHistory, &keys::deposit_history_prefix(deposit_id))?)
    }

    pub fn ledger_entries(&self, wallet: WalletId) -> SngpResult<Vec<LedgerEntry>> {
        Ok(self.store.values(Collection::WalletLedger, &keys::ledger_wallet_prefix(wallet))?)
    }
}

fn find_in<R: StoreRead>(store: &R, user: UserId, token_symbol: &str) -> SngpResult<Option<Wallet>> {
    let wallets: Vec<Wallet> = store.values(Collection::Wallets, &keys::wallet_user_prefix(user))?;
    Ok(wallets
        .into_iter()
        .find(|w| w.token_symbol.eq_ignore_ascii_case(token_symbol)))
}

impl WalletLedgerGateway for SledWalletLedger {
    fn find_wallet(&self, uow: &UnitOfWork, user: UserId, token_symbol: &str) -> anyhow::Result<Option<Wallet>> {
        Ok(find_in(uow, user, token_symbol)?)
    }

    fn get_balance(&self, uow: &UnitOfWork, user: UserId, wallet: WalletId) -> anyhow::Result<Decimal> {
        let stored: Option<Wallet> = uow.get(Collection::Wallets, &keys::wallet_key(user, wallet))?;
        stored
            .map(|w| w.balance)
            .ok_or_else(|| anyhow!("{} does not exist for {}", wallet, user))
    }

    fn record_ledger_entry(
        &self,
        uow: &mut UnitOfWork,
        wallet: &Wallet,
        amount: Decimal,
        direction: FlowDirection,
        reason_code: &str,
    ) -> anyhow::Result<LedgerEntryRef> {
        if amount <= Decimal::ZERO {
            bail!("ledger amount must be positive, got {}", amount);
        }

        let key = keys::wallet_key(wallet.user_id, wallet.id);
        let mut current: Wallet = uow
            .get(Collection::Wallets, &key)?
            .ok_or_else(|| anyhow!("{} does not exist for {}", wallet.id, wallet.user_id))?;

        current.balance = match direction {
            FlowDirection::Inbound => current
                .balance
                .checked_add(amount)
                .ok_or_else(|| anyhow!("balance overflow on {}", wallet.id))?,
            FlowDirection::Outbound => {
                if current.balance < amount {
                    bail!(
                        "insufficient balance on {}: {} < {}",
                        wallet.id,
                        current.balance,
                        amount
                    );
                }
                current.balance - amount
            }
        };

        let now = Utc::now();
        current.updated_at = now;

        let entry = LedgerEntry {
            id: uow.generate_id()?,
            wallet_id: wallet.id,
            user_id: wallet.user_id,
            amount,
            direction,
            reason_code: reason_code.to_string(),
            balance_after: current.balance,
            created_at: now,
        };

        uow.put(Collection::Wallets, &key, &current)?;
        uow.put(Collection::WalletLedger, &keys::ledger_entry_key(wallet.id, entry.id), &entry)?;

        Ok(LedgerEntryRef { entry_id: entry.id })
    }

    fn next_request_id(&self, uow: &mut UnitOfWork, reason_code: &str) -> anyhow::Result<RequestId> {
        let key = keys::meta::sequence_key(reason_code);
        let last: u64 = uow.get(Collection::Meta, &key)?.unwrap_or(0);
        let sequence = last + 1;
        uow.put(Collection::Meta, &key, &sequence)?;

        Ok(RequestId {
            sequence,
            request_id: format!("{}-{:08}", reason_code, sequence),
        })
    }

    fn record_deposit(&self, uow: &mut UnitOfWork, fields: DepositFields) -> anyhow::Result<DepositRef> {
        let now = Utc::now();
        let deposit = Deposit {
            id: uow.generate_id()?,
            wallet_id: fields.wallet_id,
            user_id: fields.user_id,
            token_symbol: fields.token_symbol,
            amount: fields.amount,
            previous_balance: fields.previous_balance,
            new_balance: fields.new_balance,
            status: DepositStatus::Success,
            request_id: fields.request.request_id,
            sequence: fields.request.sequence,
            reason_code: fields.reason_code,
            note: fields.note,
            created_at: now,
        };
        let history = DepositHistory {
            id: uow.generate_id()?,
            deposit_id: deposit.id,
            wallet_id: deposit.wallet_id,
            user_id: deposit.user_id,
            amount: deposit.amount,
            previous_balance: deposit.previous_balance,
            new_balance: deposit.new_balance,
            status: deposit.status,
            request_id: deposit.request_id.clone(),
            note: deposit.note.clone(),
            created_at: now,
        };

        uow.put(Collection::Deposits, &keys::deposit_key(deposit.wallet_id, deposit.id), &deposit)?;
        uow.put(
            Collection::DepositHistory,
            &keys::deposit_history_key(deposit.id, history.id),
            &history,
        )?;

        Ok(DepositRef {
            deposit_id: deposit.id,
            history_id: history.id,
        })
    }
}
