//! SNGP Storage Layer
//!
//! All persistence goes through [`SledStore`] and, for writes, through a
//! [`UnitOfWork`] obtained from [`SledStore::begin`].
//!
//! # Data Model Invariants
//!
//! 1. **Writes only happen inside a unit of work** - There is no write API on
//!    the store itself. A unit of work buffers every write and applies all of
//!    them in one multi-tree transaction on `commit`, or none of them.
//!
//! 2. **Nothing is physically deleted** - Records carry a `deleted_at`
//!    tombstone instead. There is no delete operation at this layer.
//!
//! 3. **Units of work are serialised** - A unit of work holds the store's
//!    writer lock from `begin` until it is committed or dropped. Reads inside
//!    a unit see committed state overlaid with the unit's own pending writes.
//!
//! 4. **Committed readers never see pending writes** - Query code reads
//!    straight from the trees.
//!
//! # Design Principles
//!
//! - Key encoding is protocol - see `keys.rs`. Never build keys inline.
//! - Values are `bincode`-encoded serde structs.

pub mod keys;
pub mod sled_store;

use thiserror::Error;

pub use sled_store::{SledStore, UnitOfWork};

/// Storage result alias
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by the storage layer
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("corrupted data: {0}")]
    CorruptedData(String),

    #[error("commit aborted")]
    CommitAborted,
}

// =============================================================================
// COLLECTIONS (TREE NAMES ARE PROTOCOL - DO NOT CHANGE)
// =============================================================================

/// One sled tree per persisted collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Collection {
    Pools,
    Participations,
    ParticipationsByUser,
    DistributionRuns,
    Rewards,
    Wallets,
    WalletLedger,
    Deposits,
    DepositHistory,
    Meta,
}

impl Collection {
    pub const ALL: [Collection; 10] = [
        Collection::Pools,
        Collection::Participations,
        Collection::ParticipationsByUser,
        Collection::DistributionRuns,
        Collection::Rewards,
        Collection::Wallets,
        Collection::WalletLedger,
        Collection::Deposits,
        Collection::DepositHistory,
        Collection::Meta,
    ];

    pub fn tree_name(&self) -> &'static str {
        match self {
            Collection::Pools => "pools",
            Collection::Participations => "participations",
            Collection::ParticipationsByUser => "participations_by_user",
            Collection::DistributionRuns => "distribution_runs",
            Collection::Rewards => "rewards",
            Collection::Wallets => "wallets",
            Collection::WalletLedger => "wallet_ledger",
            Collection::Deposits => "deposits",
            Collection::DepositHistory => "deposit_history",
            Collection::Meta => "meta",
        }
    }

    pub(crate) fn index(&self) -> usize {
        *self as usize
    }
}

/// Read access shared by the committed store and a unit of work
///
/// Repository read functions are generic over this so the same lookup runs
/// against committed state (queries) or inside a transaction (engine paths).
pub trait StoreRead {
    fn get<T: serde::de::DeserializeOwned>(&self, collection: Collection, key: &[u8]) -> StorageResult<Option<T>>;

    /// All entries under `prefix`, in key order
    fn scan_prefix<T: serde::de::DeserializeOwned>(
        &self,
        collection: Collection,
        prefix: &[u8],
    ) -> StorageResult<Vec<(Vec<u8>, T)>>;

    fn values<T: serde::de::DeserializeOwned>(&self, collection: Collection, prefix: &[u8]) -> StorageResult<Vec<T>> {
        Ok(self
            .scan_prefix(collection, prefix)?
            .into_iter()
            .map(|(_, value)| value)
            .collect())
    }
}

/// Helper to serialize a value
pub(crate) fn encode<T: serde::Serialize>(value: &T) -> StorageResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// Helper to deserialize a value
pub(crate) fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> StorageResult<T> {
    bincode::deserialize(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_tree_names_are_unique_and_indexed_in_order() {
        let names: HashSet<_> = Collection::ALL.iter().map(|c| c.tree_name()).collect();
        assert_eq!(names.len(), Collection::ALL.len());

        for (i, collection) in Collection::ALL.iter().enumerate() {
            assert_eq!(collection.index(), i);
        }
    }
}
