//! Sled-based SNGP store
//!
//! Do not rely on sled-specific features beyond basic KV, prefix scans and
//! multi-tree transactions.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{TransactionError, TransactionResult};
use sled::{Batch, Db, Transactional, Tree};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{decode, encode, Collection, StorageError, StorageResult, StoreRead};

/// Sled-backed store with one tree per [`Collection`]
#[derive(Clone)]
pub struct SledStore {
    db: Db,

    // Trees (opened once, reused), indexed by `Collection::index`
    trees: Vec<Tree>,

    // Held by the active unit of work
    writer: Arc<Mutex<()>>,
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore")
            .field("trees", &self.trees.len())
            .field("writer_busy", &self.writer.try_lock().is_err())
            .finish_non_exhaustive()
    }
}

impl SledStore {
    /// Open or create a store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> StorageResult<Self> {
        let db = sled::open(path).map_err(|e| StorageError::Database(e.to_string()))?;
        Self::from_db(db)
    }

    /// Open a temporary store, removed when the last handle is dropped
    pub fn open_temporary() -> StorageResult<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| StorageError::Database(e.to_string()))?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> StorageResult<Self> {
        let trees = Collection::ALL
            .iter()
            .map(|collection| {
                db.open_tree(collection.tree_name())
                    .map_err(|e| StorageError::Database(e.to_string()))
            })
            .collect::<StorageResult<Vec<_>>>()?;

        Ok(Self {
            db,
            trees,
            writer: Arc::new(Mutex::new(())),
        })
    }

    pub(crate) fn tree(&self, collection: Collection) -> &Tree {
        &self.trees[collection.index()]
    }

    /// Flush all pending writes to disk
    pub fn flush(&self) -> StorageResult<()> {
        self.db
            .flush()
            .map_err(|e| StorageError::Database(e.to_string()))?;
        Ok(())
    }

    /// Monotonic id, unique for the lifetime of the database
    pub fn generate_id(&self) -> StorageResult<u64> {
        self.db
            .generate_id()
            .map_err(|e| StorageError::Database(e.to_string()))
    }

    // =========================================================================
    // Transaction Control
    // =========================================================================

    /// Start a unit of work, waiting for any active one to finish
    pub async fn begin(&self) -> UnitOfWork {
        let guard = self.writer.clone().lock_owned().await;
        UnitOfWork {
            store: self.clone(),
            pending: BTreeMap::new(),
            _guard: guard,
        }
    }
}

impl StoreRead for SledStore {
    fn get<T: DeserializeOwned>(&self, collection: Collection, key: &[u8]) -> StorageResult<Option<T>> {
        match self.tree(collection).get(key) {
            Ok(Some(bytes)) => Ok(Some(decode(&bytes)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(StorageError::Database(e.to_string())),
        }
    }

    fn scan_prefix<T: DeserializeOwned>(
        &self,
        collection: Collection,
        prefix: &[u8],
    ) -> StorageResult<Vec<(Vec<u8>, T)>> {
        self.tree(collection)
            .scan_prefix(prefix)
            .map(|item| {
                let (key, value) = item.map_err(|e| StorageError::Database(e.to_string()))?;
                Ok((key.to_vec(), decode(&value)?))
            })
            .collect()
    }
}

/// Buffered, all-or-nothing set of writes
///
/// Dropping a unit of work without calling [`UnitOfWork::commit`] discards
/// every buffered write, so an early `?` return is a rollback.
pub struct UnitOfWork {
    store: SledStore,
    pending: BTreeMap<Collection, BTreeMap<Vec<u8>, Vec<u8>>>,
    _guard: OwnedMutexGuard<()>,
}

impl std::fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("pending_writes", &self.pending_writes())
            .finish_non_exhaustive()
    }
}

impl UnitOfWork {
    /// Number of buffered writes across all collections
    pub fn pending_writes(&self) -> usize {
        self.pending.values().map(BTreeMap::len).sum()
    }

    pub fn generate_id(&self) -> StorageResult<u64> {
        self.store.generate_id()
    }

    /// Buffer an insert/overwrite
    pub fn put<T: Serialize>(&mut self, collection: Collection, key: &[u8], value: &T) -> StorageResult<()> {
        let bytes = encode(value)?;
        self.pending
            .entry(collection)
            .or_default()
            .insert(key.to_vec(), bytes);
        Ok(())
    }

    /// Apply every buffered write in one multi-tree transaction
    pub fn commit(mut self) -> StorageResult<()> {
        let pending = std::mem::take(&mut self.pending);
        if pending.is_empty() {
            return Ok(());
        }

        let mut trees = Vec::with_capacity(pending.len());
        let mut batches = Vec::with_capacity(pending.len());
        for (collection, writes) in pending {
            let mut batch = Batch::default();
            for (key, value) in writes {
                batch.insert(key, value);
            }
            trees.push(self.store.tree(collection).clone());
            batches.push(batch);
        }

        let result: TransactionResult<(), ()> = trees.as_slice().transaction(|views| {
            for (view, batch) in views.iter().zip(batches.iter()) {
                view.apply_batch(batch)?;
            }
            Ok(())
        });

        match result {
            Ok(()) => {}
            Err(TransactionError::Abort(())) => return Err(StorageError::CommitAborted),
            Err(TransactionError::Storage(e)) => return Err(StorageError::Database(e.to_string())),
        }

        // Flush to ensure durability
        self.store.flush()
    }

    /// Discard every buffered write
    pub fn rollback(mut self) {
        let discarded = self.pending_writes();
        self.pending.clear();
        if discarded > 0 {
            tracing::debug!(discarded, "unit of work rolled back");
        }
    }
}

impl StoreRead for UnitOfWork {
    /// Read-your-writes lookup
    fn get<T: DeserializeOwned>(&self, collection: Collection, key: &[u8]) -> StorageResult<Option<T>> {
        if let Some(bytes) = self.pending.get(&collection).and_then(|writes| writes.get(key)) {
            return Ok(Some(decode(bytes)?));
        }
        self.store.get(collection, key)
    }

    /// Committed entries under `prefix` merged with this unit's pending writes
    fn scan_prefix<T: DeserializeOwned>(
        &self,
        collection: Collection,
        prefix: &[u8],
    ) -> StorageResult<Vec<(Vec<u8>, T)>> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = BTreeMap::new();
        for item in self.store.tree(collection).scan_prefix(prefix) {
            let (key, value) = item.map_err(|e| StorageError::Database(e.to_string()))?;
            merged.insert(key.to_vec(), value.to_vec());
        }

        if let Some(writes) = self.pending.get(&collection) {
            for (key, value) in writes.range(prefix.to_vec()..) {
                if !key.starts_with(prefix) {
                    break;
                }
                merged.insert(key.clone(), value.clone());
            }
        }

        merged
            .into_iter()
            .map(|(key, value)| Ok((key, decode(&value)?)))
            .collect()
    }
}

// =============================================================================
// TESTS
// =============================================================================
