//! Key Encoding Helpers
//!
//! Key encoding is PROTOCOL. These functions define the canonical byte layout
//! for all storage keys. Never inline key construction in business logic.
//!
//! # Format Conventions
//!
//! - Ids are big-endian u64 (sorts numerically)
//! - Composite keys are fixed-width `[owner: 8][id: 8]` so that the owner is a
//!   scannable prefix (all participations of a pool, all rewards of a user)

use crate::types::{PoolId, RecordId, RunId, UserId, WalletId};

#[inline]
fn pair_key(owner: [u8; 8], id: [u8; 8]) -> [u8; 16] {
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&owner);
    key[8..].copy_from_slice(&id);
    key
}

#[inline]
fn split_pair_key(key: &[u8]) -> Option<([u8; 8], [u8; 8])> {
    if key.len() != 16 {
        return None;
    }
    let mut owner = [0u8; 8];
    let mut id = [0u8; 8];
    owner.copy_from_slice(&key[..8]);
    id.copy_from_slice(&key[8..]);
    Some((owner, id))
}

// =============================================================================
// POOL & RUN KEYS
// =============================================================================

/// Key for pools tree: pool_id (8 bytes BE) → pool
#[inline]
pub fn pool_key(pool: PoolId) -> [u8; 8] {
    pool.to_be_bytes()
}

/// Key for distribution_runs tree: run_id (8 bytes BE) → run
#[inline]
pub fn run_key(run: RunId) -> [u8; 8] {
    run.to_be_bytes()
}

// =============================================================================
// PARTICIPATION KEYS
// =============================================================================

/// Key for participations tree: [pool_id: 8][record_id: 8] → record
#[inline]
pub fn participation_key(pool: PoolId, record: RecordId) -> [u8; 16] {
    pair_key(pool.to_be_bytes(), record.to_be_bytes())
}

/// Prefix for scanning every participation row of a pool
#[inline]
pub fn participation_pool_prefix(pool: PoolId) -> [u8; 8] {
    pool.to_be_bytes()
}

/// Key for participations_by_user tree: [user_id: 8][record_id: 8] → participation key
#[inline]
pub fn participation_user_key(user: UserId, record: RecordId) -> [u8; 16] {
    pair_key(user.to_be_bytes(), record.to_be_bytes())
}

#[inline]
pub fn participation_user_prefix(user: UserId) -> [u8; 8] {
    user.to_be_bytes()
}

/// Parse a participations tree key back into (pool, record)
#[inline]
pub fn parse_participation_key(key: &[u8]) -> Option<(PoolId, RecordId)> {
    split_pair_key(key).map(|(pool, record)| (PoolId::from_be_bytes(pool), RecordId::from_be_bytes(record)))
}

// =============================================================================
// REWARD KEYS
// =============================================================================

/// Key for rewards tree: [user_id: 8][record_id: 8] → reward
///
/// User-first so that a claim scans exactly one user's rewards.
#[inline]
pub fn reward_key(user: UserId, record: RecordId) -> [u8; 16] {
    pair_key(user.to_be_bytes(), record.to_be_bytes())
}

#[inline]
pub fn reward_user_prefix(user: UserId) -> [u8; 8] {
    user.to_be_bytes()
}

// =============================================================================
// WALLET KEYS
// =============================================================================

/// Key for wallets tree: [user_id: 8][wallet_id: 8] → wallet
#[inline]
pub fn wallet_key(user: UserId, wallet: WalletId) -> [u8; 16] {
    pair_key(user.to_be_bytes(), wallet.to_be_bytes())
}

#[inline]
pub fn wallet_user_prefix(user: UserId) -> [u8; 8] {
    user.to_be_bytes()
}

/// Key for wallet_ledger tree: [wallet_id: 8][entry_id: 8] → entry
#[inline]
pub fn ledger_entry_key(wallet: WalletId, entry: u64) -> [u8; 16] {
    pair_key(wallet.to_be_bytes(), entry.to_be_bytes())
}

#[inline]
pub fn ledger_wallet_prefix(wallet: WalletId) -> [u8; 8] {
    wallet.to_be_bytes()
}

/// Key for deposits tree: [wallet_id: 8][deposit_id: 8] → deposit
#[inline]
pub fn deposit_key(wallet: WalletId, deposit: u64) -> [u8; 16] {
    pair_key(wallet.to_be_bytes(), deposit.to_be_bytes())
}

#[inline]
pub fn deposit_wallet_prefix(wallet: WalletId) -> [u8; 8] {
    wallet.to_be_bytes()
}

/// Key for deposit_history tree: [deposit_id: 8][history_id: 8] → history row
#[inline]
pub fn deposit_history_key(deposit: u64, history: u64) -> [u8; 16] {
    pair_key(deposit.to_be_bytes(), history.to_be_bytes())
}

#[inline]
pub fn deposit_history_prefix(deposit: u64) -> [u8; 8] {
    deposit.to_be_bytes()
}

// =============================================================================
// META KEYS
// =============================================================================

/// Well-known meta keys
pub mod meta {
    /// Prefix of per-reason request sequences
    pub const SEQUENCE_PREFIX: &[u8] = b"seq/";

    /// Key holding the last issued request sequence for a reason code
    pub fn sequence_key(reason_code: &str) -> Vec<u8> {
        let mut key = Vec::with_capacity(SEQUENCE_PREFIX.len() + reason_code.len());
        key.extend_from_slice(SEQUENCE_PREFIX);
        key.extend_from_slice(reason_code.as_bytes());
        key
    }
}

// =============================================================================
// TESTS
// =============================================================================
