//! Participation Ledger
//!
//! Append-only record of point contributions per user per pool. Rows are
//! immutable after insertion except for moderation status flips.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SngpError, SngpResult};
use crate::pools;
use crate::runs;
use crate::storage::{keys, Collection, SledStore, StorageError, StoreRead, UnitOfWork};
use crate::types::{MachineId, ParticipationStatus, PoolId, RecordId, UserId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipationRecord {
    pub id: RecordId,
    pub pool_id: PoolId,
    pub user_id: UserId,
    pub machine_id: Option<MachineId>,
    pub points: u64,
    pub status: ParticipationStatus,
    /// Free-form provenance
    pub metadata: BTreeMap<String, String>,
    /// Flags special ingestion paths (e.g. migration scripts)
    pub remark: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl ParticipationRecord {
    pub fn counts(&self) -> bool {
        self.status == ParticipationStatus::Active && self.deleted_at.is_none()
    }
}

/// Points summed for one user of one pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPoints {
    pub user_id: UserId,
    pub points: u64,
    /// Every counted row came in through the migration path
    pub pre_approved: bool,
    pub rows: usize,
}

/// Group counted rows by user and sum their points
///
/// Output is ordered by user id. Inactive and tombstoned rows are ignored; a
/// user is pre-approved only if all of their counted rows carry
/// `migration_remark`.
pub fn aggregate_user_points(rows: &[ParticipationRecord], migration_remark: &str) -> Vec<UserPoints> {
    let mut grouped: BTreeMap<UserId, UserPoints> = BTreeMap::new();

    for row in rows.iter().filter(|r| r.counts()) {
        let migrated = row.remark.as_deref() == Some(migration_remark);
        let entry = grouped.entry(row.user_id).or_insert(UserPoints {
            user_id: row.user_id,
            points: 0,
            pre_approved: true,
            rows: 0,
        });
        entry.points = entry.points.saturating_add(row.points);
        entry.pre_approved &= migrated;
        entry.rows += 1;
    }

    grouped.into_values().collect()
}

/// Distinct users among counted rows
pub fn unique_participants(rows: &[ParticipationRecord]) -> u64 {
    rows.iter()
        .filter(|r| r.counts())
        .map(|r| r.user_id)
        .collect::<BTreeSet<_>>()
        .len() as u64
}

// ============================================================================
// DATA ACCESS
// ============================================================================

pub fn insert(uow: &mut UnitOfWork, record: &ParticipationRecord) -> SngpResult<()> {
    uow.put(
        Collection::Participations,
        &keys::participation_key(record.pool_id, record.id),
        record,
    )?;
    uow.put(
        Collection::ParticipationsByUser,
        &keys::participation_user_key(record.user_id, record.id),
        &record.pool_id,
    )?;
    Ok(())
}

/// Overwrite an existing row (moderation only)
pub fn save(uow: &mut UnitOfWork, record: &ParticipationRecord) -> SngpResult<()> {
    uow.put(
        Collection::Participations,
        &keys::participation_key(record.pool_id, record.id),
        record,
    )?;
    Ok(())
}

pub fn get<R: StoreRead>(store: &R, pool: PoolId, record: RecordId) -> SngpResult<Option<ParticipationRecord>> {
    Ok(store.get(Collection::Participations, &keys::participation_key(pool, record))?)
}

/// Every row of a pool, in insertion order
pub fn for_pool<R: StoreRead>(store: &R, pool: PoolId) -> SngpResult<Vec<ParticipationRecord>> {
    Ok(store.values(Collection::Participations, &keys::participation_pool_prefix(pool))?)
}

/// Every row of a user across pools, via the user index
pub fn for_user<R: StoreRead>(store: &R, user: UserId) -> SngpResult<Vec<ParticipationRecord>> {
    let index: Vec<(Vec<u8>, PoolId)> =
        store.scan_prefix(Collection::ParticipationsByUser, &keys::participation_user_prefix(user))?;

    let mut records = Vec::with_capacity(index.len());
    for (key, pool) in index {
        let record = key
            .get(8..16)
            .and_then(|bytes| <[u8; 8]>::try_from(bytes).ok())
            .map(RecordId::from_be_bytes)
            .ok_or_else(|| {
                StorageError::CorruptedData("invalid participation index key".to_string())
            })?;
        match get(store, pool, record)? {
            Some(row) => records.push(row),
            None => {
                return Err(StorageError::CorruptedData(format!(
                    "participation index points at missing {} in {}",
                    record, pool
                ))
                .into())
            }
        }
    }
    Ok(records)
}

/// Every row of every pool
pub fn all<R: StoreRead>(store: &R) -> SngpResult<Vec<ParticipationRecord>> {
    Ok(store.values(Collection::Participations, &[])?)
}

// ============================================================================
// MODERATION
// ============================================================================

#[derive(Debug, Clone)]
pub struct ParticipationLedger {
    store: SledStore,
}

impl ParticipationLedger {
    pub fn new(store: SledStore) -> Self {
        Self { store }
    }

    /// Flip a row ACTIVE/INACTIVE; refused once the pool has been distributed
    pub async fn set_participation_status(
        &self,
        pool_id: PoolId,
        record_id: RecordId,
        status: ParticipationStatus,
    ) -> SngpResult<ParticipationRecord> {
        let mut uow = self.store.begin().await;

        let pool = pools::require(&uow, pool_id)?;
        let run = runs::require(&uow, pool.run_id)?;
        if run.status.is_terminal() {
            return Err(SngpError::PoolAlreadyDistributed(pool_id));
        }

        let mut record = get(&uow, pool_id, record_id)?.ok_or(SngpError::ParticipationNotFound {
            pool: pool_id,
            record: record_id,
        })?;

        if record.status == status {
            return Ok(record);
        }

        record.status = status;
        record.updated_at = Utc::now();
        save(&mut uow, &record)?;
        uow.commit()?;

        tracing::info!(
            pool_id = %pool_id,
            record_id = %record_id,
            status = %status,
            "participation status changed"
        );
        Ok(record)
    }

    pub fn history_for_user(&self, user: UserId) -> SngpResult<Vec<ParticipationRecord>> {
        for_user(&self.store, user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: u64, user: u64, points: u64, remark: Option<&str>) -> ParticipationRecord {
        let now = Utc::now();
        ParticipationRecord {
            id: RecordId(id),
            pool_id: PoolId(1),
            user_id: UserId(user),
            machine_id: None,
            points,
            status: ParticipationStatus::Active,
            metadata: BTreeMap::new(),
            remark: remark.map(str::to_string),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[test]
    fn test_aggregate_sums_per_user_in_user_order() {
        let rows = vec![
            row(1, 20, 100, None),
            row(2, 10, 50, None),
            row(3, 20, 25, None),
        ];

        let grouped = aggregate_user_points(&rows, "MIGRATION_SCRIPT");
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].user_id, UserId(10));
        assert_eq!(grouped[0].points, 50);
        assert_eq!(grouped[1].user_id, UserId(20));
        assert_eq!(grouped[1].points, 125);
        assert_eq!(grouped[1].rows, 2);
    }

    #[test]
    fn test_aggregate_skips_inactive_rows() {
        let mut disputed = row(2, 10, 500, None);
        disputed.status = ParticipationStatus::Inactive;
        let rows = vec![row(1, 10, 40, None), disputed];

        let grouped = aggregate_user_points(&rows, "MIGRATION_SCRIPT");
        assert_eq!(grouped[0].points, 40);
        assert_eq!(unique_participants(&rows), 1);
    }

    #[test]
    fn test_pre_approval_requires_every_row_migrated() {
        let rows = vec![
            row(1, 1, 10, Some("MIGRATION_SCRIPT")),
            row(2, 1, 10, Some("MIGRATION_SCRIPT")),
            row(3, 2, 10, Some("MIGRATION_SCRIPT")),
            row(4, 2, 10, None),
        ];

        let grouped = aggregate_user_points(&rows, "MIGRATION_SCRIPT");
        assert!(grouped[0].pre_approved);
        assert!(!grouped[1].pre_approved);
    }

    #[test]
    fn test_unique_participants_counts_distinct_users() {
        let rows = vec![row(1, 1, 10, None), row(2, 1, 10, None), row(3, 7, 1, None)];
        assert_eq!(unique_participants(&rows), 2);
        assert_eq!(unique_participants(&[]), 0);
    }
}
