//! Distribution runs
//!
//! One run per pool draw. A run is consumed by the distribution engine
//! exactly once: `Completed` is terminal and re-runs are rejected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SngpError, SngpResult};
use crate::storage::{keys, Collection, StoreRead, UnitOfWork};
use crate::types::{PoolId, RunId, RunStatus, UserId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionRun {
    pub id: RunId,
    pub pool_id: PoolId,
    /// Set when the distribution executes
    pub draw_date: Option<DateTime<Utc>>,
    /// Unique participants at exhaustion, refreshed at distribution
    pub participant_count: u64,
    pub status: RunStatus,
    /// Operator who executed the distribution
    pub operator: Option<UserId>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl DistributionRun {
    pub fn pending(id: RunId, pool_id: PoolId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            pool_id,
            draw_date: None,
            participant_count: 0,
            status: RunStatus::Pending,
            operator: None,
            note: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    fn transition(&mut self, next: RunStatus, now: DateTime<Utc>) -> SngpResult<()> {
        if self.status.is_terminal() {
            return Err(SngpError::RunAlreadyCompleted(self.id));
        }
        if !self.status.can_transition_to(next) {
            return Err(SngpError::InvalidRunTransition {
                run: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Pool exhausted: wait for an operator to confirm the draw
    pub fn await_confirmation(&mut self, participant_count: u64, now: DateTime<Utc>) -> SngpResult<()> {
        self.transition(RunStatus::WaitForConfirmation, now)?;
        self.participant_count = participant_count;
        Ok(())
    }

    pub fn complete(
        &mut self,
        operator: UserId,
        participant_count: u64,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> SngpResult<()> {
        self.transition(RunStatus::Completed, now)?;
        self.operator = Some(operator);
        self.participant_count = participant_count;
        self.draw_date = Some(now);
        self.note = note;
        Ok(())
    }
}

pub fn get<R: StoreRead>(store: &R, id: RunId) -> SngpResult<Option<DistributionRun>> {
    let run: Option<DistributionRun> = store.get(Collection::DistributionRuns, &keys::run_key(id))?;
    Ok(run.filter(|r| r.deleted_at.is_none()))
}

pub fn require<R: StoreRead>(store: &R, id: RunId) -> SngpResult<DistributionRun> {
    get(store, id)?.ok_or(SngpError::RunNotFound(id))
}

pub fn all<R: StoreRead>(store: &R) -> SngpResult<Vec<DistributionRun>> {
    Ok(store
        .values::<DistributionRun>(Collection::DistributionRuns, &[])?
        .into_iter()
        .filter(|r| r.deleted_at.is_none())
        .collect())
}

pub fn save(uow: &mut UnitOfWork, run: &DistributionRun) -> SngpResult<()> {
    uow.put(Collection::DistributionRuns, &keys::run_key(run.id), run)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_lifecycle() {
        let now = Utc::now();
        let mut run = DistributionRun::pending(RunId(1), PoolId(1), now);

        run.await_confirmation(3, now).unwrap();
        assert_eq!(run.status, RunStatus::WaitForConfirmation);
        assert_eq!(run.participant_count, 3);

        run.complete(UserId(99), 4, Some("weekly draw".to_string()), now).unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.operator, Some(UserId(99)));
        assert_eq!(run.draw_date, Some(now));
        assert_eq!(run.participant_count, 4);
    }

    #[test]
    fn test_completed_run_rejects_everything() {
        let now = Utc::now();
        let mut run = DistributionRun::pending(RunId(5), PoolId(1), now);
        run.complete(UserId(1), 1, None, now).unwrap();

        assert!(matches!(
            run.complete(UserId(1), 1, None, now),
            Err(SngpError::RunAlreadyCompleted(RunId(5)))
        ));
        assert!(matches!(
            run.await_confirmation(1, now),
            Err(SngpError::RunAlreadyCompleted(_))
        ));
    }

    #[test]
    fn test_waiting_run_cannot_wait_again() {
        let now = Utc::now();
        let mut run = DistributionRun::pending(RunId(5), PoolId(1), now);
        run.await_confirmation(1, now).unwrap();
        assert!(matches!(
            run.await_confirmation(2, now),
            Err(SngpError::InvalidRunTransition { .. })
        ));
    }
}
